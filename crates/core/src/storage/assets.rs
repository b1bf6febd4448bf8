use anyhow::Context;
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize)]
pub struct AssetRecord {
    pub id: i64,
    pub name: String,
    pub symbol: String,
}

pub async fn list_assets(pool: &sqlx::PgPool) -> anyhow::Result<Vec<AssetRecord>> {
    let rows = sqlx::query_as::<_, (i64, String, String)>(
        "SELECT id, name, symbol FROM assets ORDER BY symbol ASC",
    )
    .fetch_all(pool)
    .await
    .context("select assets failed")?;

    Ok(rows
        .into_iter()
        .map(|(id, name, symbol)| AssetRecord { id, name, symbol })
        .collect())
}

pub async fn fetch_asset(pool: &sqlx::PgPool, asset_id: i64) -> anyhow::Result<Option<AssetRecord>> {
    let row = sqlx::query_as::<_, (i64, String, String)>(
        "SELECT id, name, symbol FROM assets WHERE id = $1",
    )
    .bind(asset_id)
    .fetch_optional(pool)
    .await
    .context("select assets by id failed")?;

    Ok(row.map(|(id, name, symbol)| AssetRecord { id, name, symbol }))
}

pub async fn insert_asset(
    pool: &sqlx::PgPool,
    name: &str,
    symbol: &str,
) -> anyhow::Result<AssetRecord> {
    let symbol = symbol.trim().to_ascii_uppercase();
    anyhow::ensure!(!symbol.is_empty(), "asset symbol must be non-empty");

    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO assets (name, symbol) VALUES ($1, $2) RETURNING id",
    )
    .bind(name.trim())
    .bind(&symbol)
    .fetch_one(pool)
    .await
    .context("insert assets failed")?;

    Ok(AssetRecord {
        id,
        name: name.trim().to_string(),
        symbol,
    })
}

/// The onboarded base-symbol set; the engine never recommends outside it.
pub async fn registered_symbols(pool: &sqlx::PgPool) -> anyhow::Result<HashSet<String>> {
    let rows = sqlx::query_as::<_, (String,)>("SELECT symbol FROM assets")
        .fetch_all(pool)
        .await
        .context("select asset symbols failed")?;
    Ok(rows.into_iter().map(|(s,)| s).collect())
}
