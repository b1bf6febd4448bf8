use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod seed;

#[derive(Debug, Parser)]
#[command(name = "cryptolens_worker")]
struct Args {
    /// Do everything except writing to the database.
    #[arg(long)]
    dry_run: bool,

    /// Seed even when questions/assets already exist (appends nothing that
    /// is already present).
    #[arg(long)]
    force: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = cryptolens_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let bank = seed::question_bank();
    let assets = seed::default_assets();

    if args.dry_run {
        tracing::info!(
            dry_run = true,
            questions = bank.len(),
            assets = assets.len(),
            "seed dry-run; nothing written"
        );
        return Ok(());
    }

    let db_url = settings.require_database_url()?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")?;

    cryptolens_core::storage::migrate(&pool).await?;

    let acquired = cryptolens_core::storage::lock::try_acquire_seed_lock(&pool).await?;
    if !acquired {
        tracing::warn!("seed lock not acquired; another seed run in progress");
        return Ok(());
    }

    let result = seed::run(&pool, &bank, &assets, args.force).await;

    let _ = cryptolens_core::storage::lock::release_seed_lock(&pool).await;

    match result {
        Ok(report) => {
            tracing::info!(
                questions_inserted = report.questions_inserted,
                assets_inserted = report.assets_inserted,
                "seed complete"
            );
            Ok(())
        }
        Err(err) => {
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(error = %err, "seed failed");
            Err(err)
        }
    }
}

fn init_sentry(settings: &cryptolens_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
