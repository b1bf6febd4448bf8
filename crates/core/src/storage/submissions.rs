use crate::domain::questionnaire::ScoreOutcome;
use crate::domain::risk::RiskTier;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct SubmissionRecord {
    pub id: i64,
    pub user_id: i64,
    pub total_score: i32,
    pub max_score: i32,
    pub risk_tier: RiskTier,
    pub created_at: DateTime<Utc>,
}

/// Persist a scored submission: the submission row, its answer rows, and the
/// user's updated risk profile commit as one transaction.
pub async fn create_submission(
    pool: &sqlx::PgPool,
    user_id: i64,
    outcome: &ScoreOutcome,
) -> anyhow::Result<SubmissionRecord> {
    let mut tx = pool.begin().await.context("begin transaction failed")?;

    let (id, created_at): (i64, DateTime<Utc>) = sqlx::query_as(
        "INSERT INTO questionnaire_submissions (user_id, total_score, max_score, risk_tier) \
         VALUES ($1, $2, $3, $4) \
         RETURNING id, created_at",
    )
    .bind(user_id)
    .bind(outcome.total_score)
    .bind(outcome.max_score)
    .bind(outcome.risk_tier.as_str())
    .fetch_one(&mut *tx)
    .await
    .context("insert questionnaire_submissions failed")?;

    insert_answers(&mut tx, id, user_id, outcome).await?;
    update_profile(&mut tx, user_id, outcome.risk_tier).await?;

    tx.commit().await.context("commit transaction failed")?;

    Ok(SubmissionRecord {
        id,
        user_id,
        total_score: outcome.total_score,
        max_score: outcome.max_score,
        risk_tier: outcome.risk_tier,
        created_at,
    })
}

/// Replace a submission's answers wholesale and re-persist the freshly
/// computed score (the caller re-scores against the current question bank,
/// so max_score may differ from the original). Rolls back on any failure;
/// None when the submission does not exist or belongs to another user.
pub async fn replace_submission(
    pool: &sqlx::PgPool,
    submission_id: i64,
    user_id: i64,
    outcome: &ScoreOutcome,
) -> anyhow::Result<Option<SubmissionRecord>> {
    let mut tx = pool.begin().await.context("begin transaction failed")?;

    let existing: Option<(i64,)> = sqlx::query_as(
        "SELECT id FROM questionnaire_submissions WHERE id = $1 AND user_id = $2 FOR UPDATE",
    )
    .bind(submission_id)
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await
    .context("select questionnaire_submissions for update failed")?;

    if existing.is_none() {
        return Ok(None);
    }

    sqlx::query("DELETE FROM user_answers WHERE submission_id = $1")
        .bind(submission_id)
        .execute(&mut *tx)
        .await
        .context("delete user_answers failed")?;

    let (created_at,): (DateTime<Utc>,) = sqlx::query_as(
        "UPDATE questionnaire_submissions \
         SET total_score = $2, max_score = $3, risk_tier = $4 \
         WHERE id = $1 \
         RETURNING created_at",
    )
    .bind(submission_id)
    .bind(outcome.total_score)
    .bind(outcome.max_score)
    .bind(outcome.risk_tier.as_str())
    .fetch_one(&mut *tx)
    .await
    .context("update questionnaire_submissions failed")?;

    insert_answers(&mut tx, submission_id, user_id, outcome).await?;
    update_profile(&mut tx, user_id, outcome.risk_tier).await?;

    tx.commit().await.context("commit transaction failed")?;

    Ok(Some(SubmissionRecord {
        id: submission_id,
        user_id,
        total_score: outcome.total_score,
        max_score: outcome.max_score,
        risk_tier: outcome.risk_tier,
        created_at,
    }))
}

pub async fn fetch_submission(
    pool: &sqlx::PgPool,
    submission_id: i64,
) -> anyhow::Result<Option<SubmissionRecord>> {
    let row = sqlx::query_as::<_, (i64, i64, i32, i32, String, DateTime<Utc>)>(
        "SELECT id, user_id, total_score, max_score, risk_tier, created_at \
         FROM questionnaire_submissions \
         WHERE id = $1",
    )
    .bind(submission_id)
    .fetch_optional(pool)
    .await
    .context("select questionnaire_submissions failed")?;

    let Some((id, user_id, total_score, max_score, risk_tier, created_at)) = row else {
        return Ok(None);
    };

    Ok(Some(SubmissionRecord {
        id,
        user_id,
        total_score,
        max_score,
        risk_tier: RiskTier::parse(&risk_tier)
            .with_context(|| format!("invalid risk_tier in DB for submission {id}"))?,
        created_at,
    }))
}

async fn insert_answers(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    submission_id: i64,
    user_id: i64,
    outcome: &ScoreOutcome,
) -> anyhow::Result<()> {
    for answer in &outcome.answers {
        sqlx::query(
            "INSERT INTO user_answers (submission_id, user_id, question_id, option_id, selected_value, score) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(submission_id)
        .bind(user_id)
        .bind(answer.question_id)
        .bind(answer.option_id)
        .bind(&answer.selected_value)
        .bind(answer.score)
        .execute(&mut **tx)
        .await
        .context("insert user_answers failed")?;
    }
    Ok(())
}

async fn update_profile(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: i64,
    tier: RiskTier,
) -> anyhow::Result<()> {
    sqlx::query("UPDATE users SET risk_profile = $2 WHERE id = $1")
        .bind(user_id)
        .bind(tier.as_str())
        .execute(&mut **tx)
        .await
        .context("update users.risk_profile failed")?;
    Ok(())
}
