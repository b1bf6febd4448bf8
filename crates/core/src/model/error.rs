use serde_json::Value;
use std::fmt;

/// Model-integration failure with enough context to report upstream.
/// Callers downcast to recover the raw response for audit rows.
#[derive(Debug, Clone)]
pub struct ModelDiagnosticsError {
    pub model: &'static str,
    pub stage: &'static str,
    pub detail: String,
    pub raw_response_json: Option<Value>,
}

impl fmt::Display for ModelDiagnosticsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "model error (model={}, stage={}): {}",
            self.model, self.stage, self.detail
        )
    }
}

impl std::error::Error for ModelDiagnosticsError {}
