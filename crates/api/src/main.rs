use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cryptolens_core::domain::questionnaire::{score_questionnaire, RawAnswer};
use cryptolens_core::domain::recommendation::AssetRecommendation;
use cryptolens_core::domain::risk::{resolve_effective_tier, RiskTier};
use cryptolens_core::engine::{self, RecommendOptions};
use cryptolens_core::market;
use cryptolens_core::model::http::HttpMovementModel;
use cryptolens_core::model::MovementModel;
use cryptolens_core::storage;

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

    let pool: Option<PgPool> = match settings.require_database_url() {
        Ok(db_url) => match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
        {
            Ok(pool) => match storage::migrate(&pool).await {
                Ok(()) => Some(pool),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "db migrations failed; starting API in degraded mode");
                    None
                }
            },
            Err(e) => {
                let err = anyhow::Error::new(e);
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "db connect failed; starting API in degraded mode");
                None
            }
        },
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "DATABASE_URL missing; starting API in degraded mode");
            None
        }
    };

    // The model is loaded once here and shared read-only across requests.
    let model: Option<Arc<dyn MovementModel>> = match HttpMovementModel::load(&settings).await {
        Ok(m) => Some(Arc::new(m)),
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "model load failed; recommendations unavailable");
            None
        }
    };

    let state = AppState {
        pool,
        model,
        options: RecommendOptions::from_env(),
        settings,
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/users", post(create_user))
        .route("/users/:user_id", get(get_user).put(update_user))
        .route("/questionnaire/questions", get(list_questions))
        .route("/questionnaire/submit", post(submit_questionnaire))
        .route(
            "/questionnaire/submission/:submission_id",
            get(get_submission).put(update_submission),
        )
        .route("/assets", get(list_assets).post(create_asset))
        .route("/assets/:asset_id", get(get_asset))
        .route("/recommend", get(recommend_for_profile))
        .route(
            "/recommendations",
            get(list_recommendations).post(create_recommendation),
        )
        .route(
            "/recommendations/:recommendation_id",
            get(get_recommendation).patch(update_recommendation),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    pool: Option<PgPool>,
    model: Option<Arc<dyn MovementModel>>,
    options: RecommendOptions,
    settings: cryptolens_core::config::Settings,
}

impl AppState {
    fn pool(&self) -> Result<&PgPool, StatusCode> {
        self.pool.as_ref().ok_or(StatusCode::SERVICE_UNAVAILABLE)
    }
}

fn internal(e: anyhow::Error) -> StatusCode {
    sentry_anyhow::capture_anyhow(&e);
    tracing::error!(error = %e, "request failed");
    StatusCode::INTERNAL_SERVER_ERROR
}

/// Pre-insert duplicate checks race with concurrent writers; the unique
/// indexes are the source of truth, so their violations map to 400 here
/// rather than surfacing as a 500.
fn is_unique_violation(e: &anyhow::Error) -> bool {
    e.downcast_ref::<sqlx::Error>()
        .and_then(|e| e.as_database_error())
        .is_some_and(|db| db.kind() == sqlx::error::ErrorKind::UniqueViolation)
}

fn conflict_or_internal(e: anyhow::Error) -> StatusCode {
    if is_unique_violation(&e) {
        StatusCode::BAD_REQUEST
    } else {
        internal(e)
    }
}

// ---- users -----------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CreateUserIn {
    name: String,
    email: String,
}

#[derive(Debug, Deserialize)]
struct UpdateUserIn {
    name: Option<String>,
    email: Option<String>,
    risk_profile: Option<String>,
}

async fn create_user(
    State(state): State<AppState>,
    Json(body): Json<CreateUserIn>,
) -> Result<Json<storage::users::UserRecord>, StatusCode> {
    let pool = state.pool()?;

    if body.email.trim().is_empty() || body.name.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let existing = storage::users::fetch_user_by_email(pool, &body.email)
        .await
        .map_err(internal)?;
    if existing.is_some() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let user = storage::users::create_user(pool, &body.name, &body.email)
        .await
        .map_err(conflict_or_internal)?;
    Ok(Json(user))
}

async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<storage::users::UserRecord>, StatusCode> {
    let pool = state.pool()?;
    let user = storage::users::fetch_user(pool, user_id)
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(user))
}

async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(body): Json<UpdateUserIn>,
) -> Result<Json<storage::users::UserRecord>, StatusCode> {
    let pool = state.pool()?;

    let risk_profile = match body.risk_profile.as_deref() {
        Some(s) => Some(RiskTier::parse(s).map_err(|_| StatusCode::BAD_REQUEST)?),
        None => None,
    };

    if let Some(email) = body.email.as_deref() {
        let taken = storage::users::fetch_user_by_email(pool, email)
            .await
            .map_err(internal)?
            .is_some_and(|u| u.id != user_id);
        if taken {
            return Err(StatusCode::BAD_REQUEST);
        }
    }

    let update = storage::users::UserUpdate {
        name: body.name,
        email: body.email,
        risk_profile,
    };
    let user = storage::users::update_user(pool, user_id, &update)
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(user))
}

// ---- questionnaire ---------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SubmitIn {
    user_id: i64,
    answers: Vec<RawAnswer>,
    #[serde(default)]
    include_recommendations: bool,
}

#[derive(Debug, Serialize)]
struct QuestionnaireResult {
    submission_id: i64,
    total_score: i32,
    max_score: i32,
    risk_tier: RiskTier,
    #[serde(skip_serializing_if = "Option::is_none")]
    recommendations: Option<Vec<AssetRecommendation>>,
    /// Set when recommendations were requested but unavailable; the
    /// questionnaire result above is still valid.
    #[serde(skip_serializing_if = "Option::is_none")]
    recommendations_error: Option<String>,
}

async fn list_questions(
    State(state): State<AppState>,
) -> Result<Json<Vec<cryptolens_core::domain::questionnaire::Question>>, StatusCode> {
    let pool = state.pool()?;
    let bank = storage::questions::fetch_question_bank(pool)
        .await
        .map_err(internal)?;
    Ok(Json(bank))
}

async fn submit_questionnaire(
    State(state): State<AppState>,
    Json(body): Json<SubmitIn>,
) -> Result<Json<QuestionnaireResult>, StatusCode> {
    let pool = state.pool()?;

    storage::users::fetch_user(pool, body.user_id)
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let bank = storage::questions::fetch_question_bank(pool)
        .await
        .map_err(internal)?;
    let outcome = score_questionnaire(&bank, &body.answers);
    let submission = storage::submissions::create_submission(pool, body.user_id, &outcome)
        .await
        .map_err(internal)?;

    let mut result = QuestionnaireResult {
        submission_id: submission.id,
        total_score: submission.total_score,
        max_score: submission.max_score,
        risk_tier: submission.risk_tier,
        recommendations: None,
        recommendations_error: None,
    };

    // A recommendation failure must not lose the questionnaire result.
    if body.include_recommendations {
        match run_engine(&state, submission.risk_tier, Some(body.user_id)).await {
            Ok(items) => result.recommendations = Some(items),
            Err(e) => {
                sentry_anyhow::capture_anyhow(&e);
                tracing::warn!(error = %e, "recommendations unavailable for submission");
                result.recommendations_error = Some("recommendations unavailable".to_string());
            }
        }
    }

    Ok(Json(result))
}

async fn get_submission(
    State(state): State<AppState>,
    Path(submission_id): Path<i64>,
) -> Result<Json<QuestionnaireResult>, StatusCode> {
    let pool = state.pool()?;
    let submission = storage::submissions::fetch_submission(pool, submission_id)
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(QuestionnaireResult {
        submission_id: submission.id,
        total_score: submission.total_score,
        max_score: submission.max_score,
        risk_tier: submission.risk_tier,
        recommendations: None,
        recommendations_error: None,
    }))
}

async fn update_submission(
    State(state): State<AppState>,
    Path(submission_id): Path<i64>,
    Json(body): Json<SubmitIn>,
) -> Result<Json<QuestionnaireResult>, StatusCode> {
    let pool = state.pool()?;

    let existing = storage::submissions::fetch_submission(pool, submission_id)
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;
    if existing.user_id != body.user_id {
        return Err(StatusCode::BAD_REQUEST);
    }

    // Replace semantics: re-score against the current bank, so max_score can
    // differ from the original submission.
    let bank = storage::questions::fetch_question_bank(pool)
        .await
        .map_err(internal)?;
    let outcome = score_questionnaire(&bank, &body.answers);
    let submission =
        storage::submissions::replace_submission(pool, submission_id, body.user_id, &outcome)
            .await
            .map_err(internal)?
            .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(QuestionnaireResult {
        submission_id: submission.id,
        total_score: submission.total_score,
        max_score: submission.max_score,
        risk_tier: submission.risk_tier,
        recommendations: None,
        recommendations_error: None,
    }))
}

// ---- assets ----------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CreateAssetIn {
    name: String,
    symbol: String,
}

async fn list_assets(
    State(state): State<AppState>,
) -> Result<Json<Vec<storage::assets::AssetRecord>>, StatusCode> {
    let pool = state.pool()?;
    let assets = storage::assets::list_assets(pool).await.map_err(internal)?;
    Ok(Json(assets))
}

async fn get_asset(
    State(state): State<AppState>,
    Path(asset_id): Path<i64>,
) -> Result<Json<storage::assets::AssetRecord>, StatusCode> {
    let pool = state.pool()?;
    let asset = storage::assets::fetch_asset(pool, asset_id)
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(asset))
}

async fn create_asset(
    State(state): State<AppState>,
    Json(body): Json<CreateAssetIn>,
) -> Result<Json<storage::assets::AssetRecord>, StatusCode> {
    let pool = state.pool()?;

    let registered = storage::assets::registered_symbols(pool)
        .await
        .map_err(internal)?;
    if registered.contains(&body.symbol.trim().to_ascii_uppercase()) {
        return Err(StatusCode::BAD_REQUEST);
    }

    let asset = storage::assets::insert_asset(pool, &body.name, &body.symbol)
        .await
        .map_err(conflict_or_internal)?;
    Ok(Json(asset))
}

// ---- recommendation engine -------------------------------------------------

#[derive(Debug, Deserialize)]
struct RecommendParams {
    tier: Option<String>,
    user_id: Option<i64>,
}

#[derive(Debug, Serialize)]
struct RecommendResponse {
    risk_tier: RiskTier,
    items: Vec<AssetRecommendation>,
}

async fn recommend_for_profile(
    State(state): State<AppState>,
    Query(params): Query<RecommendParams>,
) -> Response {
    let pool = match state.pool() {
        Ok(pool) => pool,
        Err(code) => return code.into_response(),
    };

    let stored_profile = match params.user_id {
        Some(user_id) => {
            match storage::users::fetch_user(pool, user_id).await {
                Ok(Some(user)) => Some(user.risk_profile),
                Ok(None) => return StatusCode::NOT_FOUND.into_response(),
                Err(e) => return internal(e).into_response(),
            }
        }
        None => None,
    };

    let tier = match resolve_effective_tier(
        params.tier.as_deref(),
        None,
        stored_profile.as_deref(),
    ) {
        Ok(tier) => tier,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("{e:#}") })),
            )
                .into_response();
        }
    };

    match run_engine(&state, tier, params.user_id).await {
        Ok(items) => Json(RecommendResponse {
            risk_tier: tier,
            items,
        })
        .into_response(),
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "recommendation run failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "recommendations unavailable" })),
            )
                .into_response()
        }
    }
}

/// Load the snapshot, run the engine, and leave an audit row either way.
async fn run_engine(
    state: &AppState,
    tier: RiskTier,
    user_id: Option<i64>,
) -> anyhow::Result<Vec<AssetRecommendation>> {
    let pool = state
        .pool
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("database unavailable"))?;
    let model = state
        .model
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("movement model unavailable"))?;
    let path = state.settings.require_market_data_path()?;

    let result = async {
        let snapshot = market::csv::load_snapshot(std::path::Path::new(path))?;
        let registered = storage::assets::registered_symbols(pool).await?;
        engine::recommend(tier, snapshot, &registered, model.as_ref(), &state.options).await
    }
    .await;

    // Audit rows are best-effort: a failed write must not fail the request,
    // but it should not vanish from the logs either.
    let audit = match &result {
        Ok(items) => {
            storage::recommendations::record_run(
                pool,
                user_id,
                tier,
                "success",
                Some(items.len() as i32),
                None,
            )
            .await
        }
        Err(e) => {
            storage::recommendations::record_run(
                pool,
                user_id,
                tier,
                "error",
                None,
                Some(&format!("{e:#}")),
            )
            .await
        }
    };
    if let Err(e) = audit {
        tracing::warn!(error = %e, "failed to record recommendation run");
    }

    result
}

// ---- stored recommendation records -----------------------------------------

#[derive(Debug, Deserialize)]
struct CreateRecommendationIn {
    user_id: i64,
    asset_id: i64,
    risk_tier: String,
}

#[derive(Debug, Deserialize)]
struct UpdateRecommendationIn {
    risk_tier: String,
}

async fn list_recommendations(
    State(state): State<AppState>,
) -> Result<Json<Vec<storage::recommendations::RecommendationRecord>>, StatusCode> {
    let pool = state.pool()?;
    let records = storage::recommendations::list_recommendations(pool)
        .await
        .map_err(internal)?;
    Ok(Json(records))
}

async fn get_recommendation(
    State(state): State<AppState>,
    Path(recommendation_id): Path<i64>,
) -> Result<Json<storage::recommendations::RecommendationRecord>, StatusCode> {
    let pool = state.pool()?;
    let record = storage::recommendations::fetch_recommendation(pool, recommendation_id)
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(record))
}

async fn create_recommendation(
    State(state): State<AppState>,
    Json(body): Json<CreateRecommendationIn>,
) -> Result<Json<storage::recommendations::RecommendationRecord>, StatusCode> {
    let pool = state.pool()?;

    let tier = RiskTier::parse(&body.risk_tier).map_err(|_| StatusCode::BAD_REQUEST)?;
    storage::users::fetch_user(pool, body.user_id)
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;
    storage::assets::fetch_asset(pool, body.asset_id)
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let record =
        storage::recommendations::insert_recommendation(pool, body.user_id, body.asset_id, tier)
            .await
            .map_err(internal)?;
    Ok(Json(record))
}

async fn update_recommendation(
    State(state): State<AppState>,
    Path(recommendation_id): Path<i64>,
    Json(body): Json<UpdateRecommendationIn>,
) -> Result<Json<storage::recommendations::RecommendationRecord>, StatusCode> {
    let pool = state.pool()?;
    let tier = RiskTier::parse(&body.risk_tier).map_err(|_| StatusCode::BAD_REQUEST)?;
    let record =
        storage::recommendations::update_recommendation_tier(pool, recommendation_id, tier)
            .await
            .map_err(internal)?
            .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(record))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
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

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct DuplicateKey;

    impl std::fmt::Display for DuplicateKey {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("duplicate key value violates unique constraint")
        }
    }

    impl std::error::Error for DuplicateKey {}

    impl sqlx::error::DatabaseError for DuplicateKey {
        fn message(&self) -> &str {
            "duplicate key value violates unique constraint"
        }

        fn kind(&self) -> sqlx::error::ErrorKind {
            sqlx::error::ErrorKind::UniqueViolation
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }
    }

    #[test]
    fn unique_violation_maps_to_bad_request_through_context_wrapping() {
        // A concurrent duplicate slips past the pre-insert check and hits
        // the unique index; the storage layer wraps it in context.
        let err = anyhow::Error::new(sqlx::Error::Database(Box::new(DuplicateKey)))
            .context("insert users failed");
        assert!(is_unique_violation(&err));
        assert_eq!(conflict_or_internal(err), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn other_errors_stay_internal() {
        assert!(!is_unique_violation(&anyhow::anyhow!("connection reset")));
        assert!(!is_unique_violation(&anyhow::Error::new(
            sqlx::Error::RowNotFound
        )));
    }
}
