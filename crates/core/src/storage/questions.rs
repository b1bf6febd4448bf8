use crate::domain::questionnaire::{Question, QuestionOption, MAX_SCORE_PER_QUESTION};
use anyhow::Context;

/// Full question bank with options, ordered by id.
pub async fn fetch_question_bank(pool: &sqlx::PgPool) -> anyhow::Result<Vec<Question>> {
    let question_rows = sqlx::query_as::<_, (i64, String)>(
        "SELECT id, question_text FROM questions ORDER BY id ASC",
    )
    .fetch_all(pool)
    .await
    .context("select questions failed")?;

    let option_rows = sqlx::query_as::<_, (i64, i64, String, String, i32)>(
        "SELECT id, question_id, value, label, score \
         FROM question_options \
         ORDER BY question_id ASC, id ASC",
    )
    .fetch_all(pool)
    .await
    .context("select question_options failed")?;

    let mut questions: Vec<Question> = question_rows
        .into_iter()
        .map(|(id, question_text)| Question {
            id,
            question_text,
            options: Vec::new(),
        })
        .collect();

    for (id, question_id, value, label, score) in option_rows {
        if let Some(q) = questions.iter_mut().find(|q| q.id == question_id) {
            q.options.push(QuestionOption {
                id,
                question_id,
                value,
                label,
                score,
            });
        }
    }

    Ok(questions)
}

pub async fn count_questions(pool: &sqlx::PgPool) -> anyhow::Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM questions")
        .fetch_one(pool)
        .await
        .context("count questions failed")?;
    Ok(count)
}

/// Insert one question with its options inside the caller's transaction.
///
/// Option scores are validated to 1..=3 here: the scorer's
/// `max_score = question_count * 3` assumption holds only as long as no
/// option can be authored outside that range.
pub async fn insert_question(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    question_text: &str,
    options: &[(String, String, i32)],
) -> anyhow::Result<i64> {
    anyhow::ensure!(
        !question_text.trim().is_empty(),
        "question text must be non-empty"
    );
    anyhow::ensure!(!options.is_empty(), "question must have at least one option");
    for (value, _, score) in options {
        anyhow::ensure!(
            (1..=MAX_SCORE_PER_QUESTION).contains(score),
            "option {value:?} has score {score} outside 1..={MAX_SCORE_PER_QUESTION}"
        );
    }

    let question_id: i64 = sqlx::query_scalar(
        "INSERT INTO questions (question_text) VALUES ($1) RETURNING id",
    )
    .bind(question_text.trim())
    .fetch_one(&mut **tx)
    .await
    .context("insert questions failed")?;

    for (value, label, score) in options {
        sqlx::query(
            "INSERT INTO question_options (question_id, value, label, score) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(question_id)
        .bind(value)
        .bind(label)
        .bind(score)
        .execute(&mut **tx)
        .await
        .context("insert question_options failed")?;
    }

    Ok(question_id)
}
