use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One market-snapshot row. Multiple rows per symbol may exist (time
/// series); the engine consolidates down to the latest per base symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketRow {
    /// As delivered by the source, possibly quote-suffixed ("BTCUSDT").
    pub symbol: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub close: Option<f64>,
    pub volatility_7: Option<f64>,
    pub network: Option<String>,
    /// Every numeric column of the source row, keyed by column name. The
    /// engine projects this map onto the model's declared feature order.
    pub features: BTreeMap<String, f64>,
}
