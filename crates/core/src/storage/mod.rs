pub mod assets;
pub mod lock;
pub mod questions;
pub mod recommendations;
pub mod submissions;
pub mod users;

use anyhow::Context;

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}
