pub mod error;
pub mod http;

use serde::{Deserialize, Serialize};

/// One row of model output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementPrediction {
    /// 1 = up, 0 = down.
    pub movement: i32,
    /// P(up). None when the backing model cannot produce probabilities;
    /// never defaulted to 0.0 or 1.0.
    #[serde(default)]
    pub proba_up: Option<f64>,
}

/// Opaque pretrained movement-prediction model.
///
/// The model declares its required feature names; callers must project each
/// row into exactly that order before calling `predict`. Implementations
/// are loaded once per process and shared read-only across requests.
#[async_trait::async_trait]
pub trait MovementModel: Send + Sync {
    fn model_name(&self) -> &'static str;

    /// Required feature names, in the order `predict` expects them.
    fn feature_names(&self) -> &[String];

    /// Predict one movement per input row. Row length must equal
    /// `feature_names().len()`; output length must equal the input length.
    async fn predict(&self, rows: &[Vec<f64>]) -> anyhow::Result<Vec<MovementPrediction>>;
}
