use anyhow::Context;
use cryptolens_core::storage;

pub struct SeedQuestion {
    pub text: &'static str,
    pub options: [(&'static str, &'static str, i32); 3],
}

#[derive(Debug, Default)]
pub struct SeedReport {
    pub questions_inserted: usize,
    pub assets_inserted: usize,
}

/// The default risk questionnaire: five questions, options scored 1..=3.
pub fn question_bank() -> Vec<SeedQuestion> {
    vec![
        SeedQuestion {
            text: "What is your investment horizon for crypto assets?",
            options: [
                ("short", "Short term (up to 6 months)", 1),
                ("medium", "Medium term (6 months to 2 years)", 2),
                ("long", "Long term (more than 2 years)", 3),
            ],
        },
        SeedQuestion {
            text: "If the value dropped 20% in a week, what would you do?",
            options: [
                ("sell", "Sell everything immediately", 1),
                ("hold", "Keep part of it and watch", 2),
                ("buyMore", "Buy more (take advantage of the dip)", 3),
            ],
        },
        SeedQuestion {
            text: "How would you rate your investment knowledge?",
            options: [
                ("beginner", "None or beginner", 1),
                ("intermediate", "I already invest in other asset classes", 2),
                ("advanced", "I have crypto/trading experience", 3),
            ],
        },
        SeedQuestion {
            text: "What is your main goal with crypto assets?",
            options: [
                ("protect", "Protect capital", 1),
                ("grow", "Grow gradually", 2),
                ("maximize", "Maximum possible return", 3),
            ],
        },
        SeedQuestion {
            text: "What share of your wealth would you put into crypto?",
            options: [
                ("upto10", "Up to 10%", 1),
                ("10to30", "Between 10% and 30%", 2),
                ("over30", "More than 30%", 3),
            ],
        },
    ]
}

/// Registered base symbols available from day one.
pub fn default_assets() -> Vec<(&'static str, &'static str)> {
    vec![
        ("Bitcoin", "BTC"),
        ("Ethereum", "ETH"),
        ("Solana", "SOL"),
        ("Cardano", "ADA"),
        ("Polkadot", "DOT"),
    ]
}

pub async fn run(
    pool: &sqlx::PgPool,
    bank: &[SeedQuestion],
    assets: &[(&str, &str)],
    force: bool,
) -> anyhow::Result<SeedReport> {
    let mut report = SeedReport::default();

    let existing = storage::questions::count_questions(pool).await?;
    if existing > 0 && !force {
        tracing::info!(existing, "questions already seeded; skipping");
    } else {
        report.questions_inserted = seed_questions(pool, bank).await?;
    }

    let registered = storage::assets::registered_symbols(pool).await?;
    if !registered.is_empty() && !force {
        tracing::info!(existing = registered.len(), "assets already seeded; skipping");
    } else {
        for (name, symbol) in assets {
            if registered.contains(*symbol) {
                continue;
            }
            storage::assets::insert_asset(pool, name, symbol).await?;
            report.assets_inserted += 1;
        }
    }

    Ok(report)
}

/// All questions commit in one transaction; a failed option insert leaves
/// the bank untouched.
async fn seed_questions(pool: &sqlx::PgPool, bank: &[SeedQuestion]) -> anyhow::Result<usize> {
    let mut tx = pool.begin().await.context("begin transaction failed")?;

    let mut inserted = 0;
    for q in bank {
        let options: Vec<(String, String, i32)> = q
            .options
            .iter()
            .map(|(value, label, score)| (value.to_string(), label.to_string(), *score))
            .collect();
        storage::questions::insert_question(&mut tx, q.text, &options).await?;
        inserted += 1;
    }

    tx.commit().await.context("commit transaction failed")?;
    Ok(inserted)
}
