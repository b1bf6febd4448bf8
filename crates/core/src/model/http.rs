use crate::config::Settings;
use crate::model::error::ModelDiagnosticsError;
use crate::model::{MovementModel, MovementPrediction};
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

const MODEL_NAME: &str = "external_http_model";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRIES: u32 = 3;
const FEATURES_PATH: &str = "/v1/model/features";
const PREDICT_PATH: &str = "/v1/model/predict";

#[derive(Debug, Deserialize)]
struct FeaturesResponse {
    features: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    predictions: Vec<MovementPrediction>,
}

/// Movement model served over HTTP by a separate inference process.
///
/// The required feature list is fetched once at construction; after that the
/// client is immutable and safe to share across concurrent requests.
#[derive(Debug, Clone)]
pub struct HttpMovementModel {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    retries: u32,
    feature_names: Vec<String>,
}

impl HttpMovementModel {
    /// Build the client and load the model's feature list.
    pub async fn load(settings: &Settings) -> Result<Self> {
        let base_url = settings.require_model_base_url()?.to_string();
        let api_key = settings.model_api_key.clone();

        let timeout_secs = std::env::var("MODEL_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let retries = std::env::var("MODEL_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_RETRIES);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build model http client")?;

        let mut model = Self {
            http,
            base_url,
            api_key,
            retries,
            feature_names: Vec::new(),
        };

        let mut attempt: u32 = 0;
        let features = loop {
            attempt += 1;
            match model.fetch_features_once().await {
                Ok(features) => break features,
                Err(err) => {
                    if attempt >= model.retries {
                        return Err(err);
                    }
                    let backoff = Duration::from_secs(1 << (attempt - 1));
                    tracing::warn!(attempt, ?backoff, error = %err, "model feature fetch failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        };
        anyhow::ensure!(!features.is_empty(), "model declared an empty feature list");
        model.feature_names = features;

        tracing::info!(
            feature_count = model.feature_names.len(),
            "loaded movement model feature list"
        );
        Ok(model)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            headers.insert("x-api-key", HeaderValue::from_str(api_key)?);
        }
        Ok(headers)
    }

    async fn fetch_features_once(&self) -> Result<Vec<String>> {
        let res = self
            .http
            .get(self.url(FEATURES_PATH))
            .headers(self.headers()?)
            .send()
            .await
            .context("model features request failed")?;

        let status = res.status();
        let body: Value = res
            .json()
            .await
            .context("model features response is not valid JSON")?;
        if !status.is_success() {
            return Err(diagnostics("features", format!("HTTP {status}"), Some(body)));
        }

        let parsed: FeaturesResponse = serde_json::from_value(body.clone())
            .map_err(|e| diagnostics("features", e.to_string(), Some(body)))?;
        Ok(parsed.features)
    }

    async fn predict_once(&self, rows: &[Vec<f64>]) -> Result<Vec<MovementPrediction>> {
        let payload = serde_json::json!({
            "features": self.feature_names,
            "rows": rows,
        });

        let res = self
            .http
            .post(self.url(PREDICT_PATH))
            .headers(self.headers()?)
            .json(&payload)
            .send()
            .await
            .context("model predict request failed")?;

        let status = res.status();
        let body: Value = res
            .json()
            .await
            .context("model predict response is not valid JSON")?;
        if !status.is_success() {
            return Err(diagnostics("predict", format!("HTTP {status}"), Some(body)));
        }

        let parsed: PredictResponse = serde_json::from_value(body.clone())
            .map_err(|e| diagnostics("predict", e.to_string(), Some(body.clone())))?;
        validate_predictions(&parsed.predictions, rows.len())
            .map_err(|e| diagnostics("predict", format!("{e:#}"), Some(body)))?;
        Ok(parsed.predictions)
    }
}

#[async_trait::async_trait]
impl MovementModel for HttpMovementModel {
    fn model_name(&self) -> &'static str {
        MODEL_NAME
    }

    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    async fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<MovementPrediction>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        for (i, row) in rows.iter().enumerate() {
            anyhow::ensure!(
                row.len() == self.feature_names.len(),
                "row {i} has {} features, model expects {}",
                row.len(),
                self.feature_names.len()
            );
        }

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.predict_once(rows).await {
                Ok(preds) => return Ok(preds),
                Err(err) => {
                    if attempt >= self.retries {
                        return Err(err);
                    }
                    let backoff = Duration::from_secs(1 << (attempt - 1));
                    tracing::warn!(attempt, ?backoff, error = %err, "model predict failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

fn validate_predictions(preds: &[MovementPrediction], expected_len: usize) -> Result<()> {
    anyhow::ensure!(
        preds.len() == expected_len,
        "model returned {} predictions for {expected_len} rows",
        preds.len()
    );
    for (i, p) in preds.iter().enumerate() {
        anyhow::ensure!(
            p.movement == 0 || p.movement == 1,
            "prediction {i} has movement {} (expected 0 or 1)",
            p.movement
        );
        if let Some(proba) = p.proba_up {
            anyhow::ensure!(
                (0.0..=1.0).contains(&proba),
                "prediction {i} has proba_up {proba} outside [0, 1]"
            );
        }
    }
    Ok(())
}

fn diagnostics(stage: &'static str, detail: String, raw: Option<Value>) -> anyhow::Error {
    anyhow::Error::new(ModelDiagnosticsError {
        model: MODEL_NAME,
        stage,
        detail,
        raw_response_json: raw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_predict_response_with_and_without_proba() {
        let v = json!({
            "predictions": [
                {"movement": 1, "proba_up": 0.73},
                {"movement": 0},
            ]
        });
        let parsed: PredictResponse = serde_json::from_value(v).unwrap();
        assert_eq!(parsed.predictions.len(), 2);
        assert_eq!(parsed.predictions[0].proba_up, Some(0.73));
        assert_eq!(parsed.predictions[1].proba_up, None);
        validate_predictions(&parsed.predictions, 2).unwrap();
    }

    #[test]
    fn rejects_out_of_range_movement() {
        let preds = vec![MovementPrediction {
            movement: 2,
            proba_up: None,
        }];
        assert!(validate_predictions(&preds, 1).is_err());
    }

    #[test]
    fn rejects_length_mismatch() {
        let preds = vec![MovementPrediction {
            movement: 1,
            proba_up: Some(0.5),
        }];
        assert!(validate_predictions(&preds, 3).is_err());
    }

    #[test]
    fn rejects_probability_outside_unit_interval() {
        let preds = vec![MovementPrediction {
            movement: 1,
            proba_up: Some(1.5),
        }];
        assert!(validate_predictions(&preds, 1).is_err());
    }
}
