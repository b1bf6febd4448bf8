use crate::market::types::MarketRow;
use anyhow::Context;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

/// Load a market snapshot from a CSV file.
///
/// A missing or unreadable file is a recoverable error for the caller to
/// report (the API degrades to "recommendations unavailable"); a present
/// file without a `symbol` column is a validation error naming the column.
pub fn load_snapshot(path: &Path) -> anyhow::Result<Vec<MarketRow>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open market snapshot at {}", path.display()))?;
    read_snapshot(file).with_context(|| format!("malformed market snapshot at {}", path.display()))
}

pub fn read_snapshot<R: Read>(reader: R) -> anyhow::Result<Vec<MarketRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr
        .headers()
        .context("failed to read market snapshot headers")?
        .clone();

    let symbol_idx = headers
        .iter()
        .position(|h| h == "symbol")
        .context("market snapshot is missing required column: symbol")?;
    let timestamp_idx = headers
        .iter()
        .position(|h| h == "timestamp" || h == "date");
    let network_idx = headers.iter().position(|h| h == "network");

    let mut out = Vec::new();
    for (line, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("bad CSV record at data row {}", line + 1))?;

        let symbol = record.get(symbol_idx).unwrap_or("").trim().to_string();
        if symbol.is_empty() {
            // Rows without a symbol can never match the registered set.
            continue;
        }

        let timestamp = timestamp_idx
            .and_then(|i| record.get(i))
            .and_then(parse_timestamp);
        let network = network_idx
            .and_then(|i| record.get(i))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let mut features = BTreeMap::new();
        for (i, field) in record.iter().enumerate() {
            if i == symbol_idx || Some(i) == timestamp_idx || Some(i) == network_idx {
                continue;
            }
            let Some(name) = headers.get(i) else { continue };
            if let Ok(v) = field.trim().parse::<f64>() {
                features.insert(name.to_string(), v);
            }
        }

        out.push(MarketRow {
            symbol,
            timestamp,
            close: features.get("close").copied(),
            volatility_7: features.get("volatility_7").copied(),
            network,
            features,
        });
    }

    Ok(out)
}

/// Tolerant timestamp parsing; anything unparseable becomes None and sorts
/// as oldest during consolidation.
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0).map(|naive| Utc.from_utc_datetime(&naive));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn reads_rows_and_collects_numeric_features() {
        let csv = "symbol,timestamp,close,volatility_7,network,extra\n\
                   BTCUSDT,2026-08-01,100.0,0.5,bitcoin,1.25\n\
                   ETHUSDT,2026-08-01 12:30:00,50.0,0.2,ethereum,not-a-number\n";
        let rows = read_snapshot(csv.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);

        assert_eq!(rows[0].symbol, "BTCUSDT");
        assert_eq!(rows[0].close, Some(100.0));
        assert_eq!(rows[0].volatility_7, Some(0.5));
        assert_eq!(rows[0].network.as_deref(), Some("bitcoin"));
        assert_eq!(rows[0].features.get("extra").copied(), Some(1.25));
        assert_eq!(rows[0].timestamp.unwrap().date_naive().day(), 1);

        // Non-numeric cells are skipped, not zero-filled.
        assert!(!rows[1].features.contains_key("extra"));
    }

    #[test]
    fn missing_symbol_column_is_a_named_error() {
        let csv = "ticker,close\nBTC,1.0\n";
        let err = read_snapshot(csv.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("symbol"));
    }

    #[test]
    fn date_header_is_accepted_for_timestamps() {
        let csv = "symbol,date,close\nBTCUSDT,2026-08-15,7.0\n";
        let rows = read_snapshot(csv.as_bytes()).unwrap();
        assert!(rows[0].timestamp.is_some());
    }

    #[test]
    fn unparseable_timestamp_becomes_none() {
        let csv = "symbol,timestamp,close\nBTCUSDT,soon,7.0\n";
        let rows = read_snapshot(csv.as_bytes()).unwrap();
        assert!(rows[0].timestamp.is_none());
    }

    #[test]
    fn blank_symbol_rows_are_dropped() {
        let csv = "symbol,close\n,1.0\nBTCUSDT,2.0\n";
        let rows = read_snapshot(csv.as_bytes()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].symbol, "BTCUSDT");
    }

    #[test]
    fn absent_optional_columns_leave_fields_none() {
        let csv = "symbol,close\nBTCUSDT,2.0\n";
        let rows = read_snapshot(csv.as_bytes()).unwrap();
        assert!(rows[0].volatility_7.is_none());
        assert!(rows[0].timestamp.is_none());
        assert!(rows[0].network.is_none());
    }
}
