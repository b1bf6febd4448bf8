use crate::domain::risk::RiskTier;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct RecommendationRecord {
    pub id: i64,
    pub user_id: i64,
    pub asset_id: i64,
    pub risk_tier: RiskTier,
    pub recommended_at: DateTime<Utc>,
}

pub async fn list_recommendations(pool: &sqlx::PgPool) -> anyhow::Result<Vec<RecommendationRecord>> {
    let rows = sqlx::query_as::<_, (i64, i64, i64, String, DateTime<Utc>)>(
        "SELECT id, user_id, asset_id, risk_tier, recommended_at \
         FROM recommendations \
         ORDER BY id ASC",
    )
    .fetch_all(pool)
    .await
    .context("select recommendations failed")?;

    rows.into_iter().map(into_record).collect()
}

pub async fn fetch_recommendation(
    pool: &sqlx::PgPool,
    id: i64,
) -> anyhow::Result<Option<RecommendationRecord>> {
    let row = sqlx::query_as::<_, (i64, i64, i64, String, DateTime<Utc>)>(
        "SELECT id, user_id, asset_id, risk_tier, recommended_at \
         FROM recommendations \
         WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("select recommendations by id failed")?;

    row.map(into_record).transpose()
}

pub async fn insert_recommendation(
    pool: &sqlx::PgPool,
    user_id: i64,
    asset_id: i64,
    risk_tier: RiskTier,
) -> anyhow::Result<RecommendationRecord> {
    let (id, recommended_at): (i64, DateTime<Utc>) = sqlx::query_as(
        "INSERT INTO recommendations (user_id, asset_id, risk_tier) \
         VALUES ($1, $2, $3) \
         RETURNING id, recommended_at",
    )
    .bind(user_id)
    .bind(asset_id)
    .bind(risk_tier.as_str())
    .fetch_one(pool)
    .await
    .context("insert recommendations failed")?;

    Ok(RecommendationRecord {
        id,
        user_id,
        asset_id,
        risk_tier,
        recommended_at,
    })
}

pub async fn update_recommendation_tier(
    pool: &sqlx::PgPool,
    id: i64,
    risk_tier: RiskTier,
) -> anyhow::Result<Option<RecommendationRecord>> {
    let row = sqlx::query_as::<_, (i64, i64, i64, String, DateTime<Utc>)>(
        "UPDATE recommendations SET risk_tier = $2 \
         WHERE id = $1 \
         RETURNING id, user_id, asset_id, risk_tier, recommended_at",
    )
    .bind(id)
    .bind(risk_tier.as_str())
    .fetch_optional(pool)
    .await
    .context("update recommendations failed")?;

    row.map(into_record).transpose()
}

/// Audit row for one engine invocation, success or error. Mirrors what the
/// response reported so degraded outcomes stay visible after the fact.
pub async fn record_run(
    pool: &sqlx::PgPool,
    user_id: Option<i64>,
    risk_tier: RiskTier,
    status: &str,
    asset_count: Option<i32>,
    error: Option<&str>,
) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO recommendation_runs (id, user_id, risk_tier, status, asset_count, error) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(id)
    .bind(user_id)
    .bind(risk_tier.as_str())
    .bind(status)
    .bind(asset_count)
    .bind(error)
    .execute(pool)
    .await
    .context("insert recommendation_runs failed")?;

    Ok(id)
}

fn into_record(
    row: (i64, i64, i64, String, DateTime<Utc>),
) -> anyhow::Result<RecommendationRecord> {
    let (id, user_id, asset_id, risk_tier, recommended_at) = row;
    Ok(RecommendationRecord {
        id,
        user_id,
        asset_id,
        risk_tier: RiskTier::parse(&risk_tier)
            .with_context(|| format!("invalid risk_tier in DB for recommendation {id}"))?,
        recommended_at,
    })
}
