use crate::domain::risk::RiskTier;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct UserRecord {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub risk_profile: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub risk_profile: Option<RiskTier>,
}

pub async fn create_user(pool: &sqlx::PgPool, name: &str, email: &str) -> anyhow::Result<UserRecord> {
    let row = sqlx::query_as::<_, (i64, String, String, String, DateTime<Utc>)>(
        "INSERT INTO users (name, email) \
         VALUES ($1, $2) \
         RETURNING id, name, email, risk_profile, created_at",
    )
    .bind(name.trim())
    .bind(email.trim())
    .fetch_one(pool)
    .await
    .context("insert users failed")?;

    Ok(into_record(row))
}

pub async fn fetch_user(pool: &sqlx::PgPool, user_id: i64) -> anyhow::Result<Option<UserRecord>> {
    let row = sqlx::query_as::<_, (i64, String, String, String, DateTime<Utc>)>(
        "SELECT id, name, email, risk_profile, created_at FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .context("select users by id failed")?;

    Ok(row.map(into_record))
}

pub async fn fetch_user_by_email(
    pool: &sqlx::PgPool,
    email: &str,
) -> anyhow::Result<Option<UserRecord>> {
    let row = sqlx::query_as::<_, (i64, String, String, String, DateTime<Utc>)>(
        "SELECT id, name, email, risk_profile, created_at FROM users WHERE email = $1",
    )
    .bind(email.trim())
    .fetch_optional(pool)
    .await
    .context("select users by email failed")?;

    Ok(row.map(into_record))
}

pub async fn update_user(
    pool: &sqlx::PgPool,
    user_id: i64,
    update: &UserUpdate,
) -> anyhow::Result<Option<UserRecord>> {
    let row = sqlx::query_as::<_, (i64, String, String, String, DateTime<Utc>)>(
        "UPDATE users \
         SET name = COALESCE($2, name), \
             email = COALESCE($3, email), \
             risk_profile = COALESCE($4, risk_profile) \
         WHERE id = $1 \
         RETURNING id, name, email, risk_profile, created_at",
    )
    .bind(user_id)
    .bind(update.name.as_deref().map(str::trim))
    .bind(update.email.as_deref().map(str::trim))
    .bind(update.risk_profile.map(|t| t.as_str()))
    .fetch_optional(pool)
    .await
    .context("update users failed")?;

    Ok(row.map(into_record))
}

fn into_record(row: (i64, String, String, String, DateTime<Utc>)) -> UserRecord {
    let (id, name, email, risk_profile, created_at) = row;
    UserRecord {
        id,
        name,
        email,
        risk_profile,
        created_at,
    }
}
