pub mod quantile;

use crate::domain::recommendation::AssetRecommendation;
use crate::domain::risk::RiskTier;
use crate::market::types::MarketRow;
use crate::model::MovementModel;
use anyhow::bail;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};

use quantile::quantile;

// Guards the volatility/price ratio against zero closes.
const RISK_EPSILON: f64 = 1e-9;
const MINMAX_EPSILON: f64 = 1e-12;

const LOW_QUANTILE: f64 = 0.33;
const HIGH_QUANTILE: f64 = 0.66;

#[derive(Debug, Clone)]
pub struct RecommendOptions {
    /// Quote-currency suffixes stripped from snapshot symbols to obtain the
    /// registered base symbol ("BTCUSDT" -> "BTC").
    pub quote_suffixes: Vec<String>,
}

impl Default for RecommendOptions {
    fn default() -> Self {
        Self {
            quote_suffixes: vec!["USDT".to_string()],
        }
    }
}

impl RecommendOptions {
    /// Extend via MARKET_QUOTE_SUFFIXES="USDT,USDC".
    pub fn from_env() -> Self {
        let mut out = Self::default();
        if let Ok(s) = std::env::var("MARKET_QUOTE_SUFFIXES") {
            let suffixes: Vec<String> = s
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
            if !suffixes.is_empty() {
                out.quote_suffixes = suffixes;
            }
        }
        out
    }
}

/// Profile-aware recommendations over the current market snapshot.
///
/// Pipeline: normalize symbols, filter to the registered universe,
/// consolidate to the latest row per base symbol, compute the volatility
/// risk metric, bucket by 33rd/66th percentile, run model inference, and
/// flag eligibility against the requesting tier.
///
/// Risk tiers are peer-relative: thresholds come from the consolidated set
/// of this call and are never cached across requests. Every consolidated
/// asset is returned; ineligible ones are flagged, not hidden.
///
/// Any model failure aborts the whole call. The service layer decides
/// whether to degrade to "recommendations unavailable".
pub async fn recommend(
    tier: RiskTier,
    snapshot: Vec<MarketRow>,
    registered_symbols: &HashSet<String>,
    model: &dyn MovementModel,
    options: &RecommendOptions,
) -> anyhow::Result<Vec<AssetRecommendation>> {
    let mut rows = Vec::with_capacity(snapshot.len());
    for row in snapshot {
        let base = base_symbol(&row.symbol, &options.quote_suffixes);
        if registered_symbols.contains(&base) {
            rows.push((base, row));
        }
    }

    // Nothing registered in this snapshot is a normal outcome, not an error.
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let consolidated = consolidate(rows);
    let metrics = risk_metrics(&consolidated);

    let q1 = quantile(&metrics, LOW_QUANTILE).unwrap_or(0.0);
    let q2 = quantile(&metrics, HIGH_QUANTILE).unwrap_or(0.0);

    let feature_names = model.feature_names();
    let mut matrix = Vec::with_capacity(consolidated.len());
    for (base, row) in &consolidated {
        matrix.push(project_features(base, row, feature_names)?);
    }

    let predictions = model.predict(&matrix).await?;
    anyhow::ensure!(
        predictions.len() == consolidated.len(),
        "model returned {} predictions for {} assets",
        predictions.len(),
        consolidated.len()
    );

    let mut out = Vec::with_capacity(consolidated.len());
    for (((base, row), metric), prediction) in consolidated
        .into_iter()
        .zip(metrics.iter())
        .zip(predictions)
    {
        let asset_tier = classify_metric(*metric, q1, q2);
        out.push(AssetRecommendation {
            symbol: base,
            network: row.network,
            risk_tier: asset_tier,
            predicted_movement: prediction.movement,
            predicted_proba_up: prediction.proba_up,
            eligible_for_profile: tier.allows(asset_tier),
        });
    }

    tracing::debug!(
        model = model.model_name(),
        user_tier = %tier,
        assets = out.len(),
        q1,
        q2,
        "recommendation run complete"
    );
    Ok(out)
}

/// Strip the first matching quote suffix. The result can be empty (a row
/// whose symbol equals the suffix); such rows never match the registered
/// set and fall out at the filter step.
pub fn base_symbol(symbol: &str, quote_suffixes: &[String]) -> String {
    let s = symbol.trim();
    for suffix in quote_suffixes {
        if let Some(stripped) = s.strip_suffix(suffix.as_str()) {
            return stripped.to_string();
        }
    }
    s.to_string()
}

/// Keep the most recent row per base symbol. Rows without a timestamp count
/// as oldest; equal timestamps keep the later input row.
fn consolidate(rows: Vec<(String, MarketRow)>) -> Vec<(String, MarketRow)> {
    let mut latest: BTreeMap<String, (Option<DateTime<Utc>>, MarketRow)> = BTreeMap::new();
    for (base, row) in rows {
        let ts = row.timestamp;
        let replace = match latest.get(&base) {
            // None timestamps compare smaller than any Some.
            Some((existing_ts, _)) => ts >= *existing_ts,
            None => true,
        };
        if replace {
            latest.insert(base, (ts, row));
        }
    }
    latest
        .into_iter()
        .map(|(base, (_, row))| (base, row))
        .collect()
}

/// Per-asset risk metric over the consolidated set, freshly computed per
/// call. Ratio of 7-day volatility to price where every close is present;
/// min-max normalized volatility when some close is missing; all zeros when
/// no row carries a volatility at all.
fn risk_metrics(rows: &[(String, MarketRow)]) -> Vec<f64> {
    let any_volatility = rows.iter().any(|(_, r)| r.volatility_7.is_some());
    if !any_volatility {
        return vec![0.0; rows.len()];
    }

    let all_close = rows.iter().all(|(_, r)| r.close.is_some());
    if all_close {
        return rows
            .iter()
            .map(|(_, r)| {
                let vol = r.volatility_7.unwrap_or(0.0);
                let close = r.close.unwrap_or(0.0);
                vol / (close.abs() + RISK_EPSILON)
            })
            .collect();
    }

    let vols: Vec<f64> = rows
        .iter()
        .map(|(_, r)| r.volatility_7.unwrap_or(0.0))
        .collect();
    let min = vols.iter().copied().fold(f64::INFINITY, f64::min);
    let max = vols.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = if max - min == 0.0 { 1.0 } else { max - min };
    vols.iter()
        .map(|v| (v - min) / (range + MINMAX_EPSILON))
        .collect()
}

fn classify_metric(metric: f64, q1: f64, q2: f64) -> RiskTier {
    if metric <= q1 {
        RiskTier::Low
    } else if metric <= q2 {
        RiskTier::Moderate
    } else {
        RiskTier::High
    }
}

/// Project a row's feature map onto the model's declared order. Missing
/// features fail fast by name; zero-filling here would silently corrupt
/// predictions.
fn project_features(
    base: &str,
    row: &MarketRow,
    feature_names: &[String],
) -> anyhow::Result<Vec<f64>> {
    let mut out = Vec::with_capacity(feature_names.len());
    let mut missing = Vec::new();
    for name in feature_names {
        match row.features.get(name) {
            Some(v) => out.push(*v),
            None => missing.push(name.as_str()),
        }
    }
    if !missing.is_empty() {
        bail!(
            "asset {base} is missing required model features: {}",
            missing.join(", ")
        );
    }
    Ok(out)
}
