use crate::domain::risk::RiskTier;
use serde::{Deserialize, Serialize};

/// One asset in a recommendation response. Ineligible assets are returned
/// flagged, not filtered out; presentation is the caller's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetRecommendation {
    /// Base symbol, quote suffix stripped (e.g. "BTC", not "BTCUSDT").
    pub symbol: String,
    pub network: Option<String>,
    pub risk_tier: RiskTier,
    /// Binary movement prediction from the model: 1 = up, 0 = down.
    pub predicted_movement: i32,
    /// P(up) when the model supports probabilities; null otherwise.
    pub predicted_proba_up: Option<f64>,
    pub eligible_for_profile: bool,
}
