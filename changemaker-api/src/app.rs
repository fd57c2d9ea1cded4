/// Application state and router builder
///
/// This module defines the shared application state and provides
/// a function to build the Axum router with all routes and middleware.
///
/// # Example
///
/// ```no_run
/// use changemaker_api::{app::AppState, config::Config};
/// use sqlx::PgPool;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// let pool = PgPool::connect(&config.database.url).await?;
/// let state = AppState::new(pool, config)?;
/// let app = changemaker_api::app::build_router(state);
/// # Ok(())
/// # }
/// ```

use crate::{
    config::{Config, EmailProvider},
    middleware::{rate_limit::ai_rate_limit, security::SecurityHeadersLayer},
    routes,
};
use axum::{
    http::{header, HeaderValue, Method},
    middleware::from_fn_with_state,
    routing::{delete, get, post, put},
    Router,
};
use changemaker_shared::{
    ai::{
        cost::{CostTracker, Pricing},
        provider::{CompletionProvider, OpenAiCompatibleClient},
        rate_limit::SlidingWindowLimiter,
    },
    auth::middleware::{session_auth, SessionAuthState},
    email::mailer::{LogMailer, Mailer, ResendMailer},
    rewards::{
        client::{RewardProvider, RewardStackClient, RewardStackConfig, UnconfiguredProvider},
        issuance::IssuanceService,
    },
};
use sqlx::PgPool;
use std::{sync::Arc, time::Duration};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

/// Shared application state
///
/// This is cloned for each request handler via Axum's `State` extractor.
/// Every field is cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: PgPool,

    /// Application configuration
    pub config: Arc<Config>,

    /// Reward issuance workflow
    pub rewards: IssuanceService,

    /// Outbound email delivery
    pub mailer: Arc<dyn Mailer>,

    /// AI composer backend; `None` when no API key is configured
    pub ai: Option<Arc<dyn CompletionProvider>>,

    /// Per-user AI generation limiter
    pub ai_limiter: Arc<SlidingWindowLimiter>,

    /// Per-workspace AI spend
    pub ai_costs: Arc<CostTracker>,
}

impl AppState {
    /// Creates application state, building provider clients from config
    ///
    /// # Errors
    ///
    /// Returns an error if a configured HTTP client cannot be built.
    pub fn new(db: PgPool, config: Config) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(config.rewardstack.timeout_secs);
        let provider: Arc<dyn RewardProvider> = match config.rewardstack.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Arc::new(RewardStackClient::new(
                RewardStackConfig {
                    base_url: config.rewardstack.base_url.clone(),
                    api_key: key.to_string(),
                    timeout,
                },
            )?),
            _ => {
                info!("RewardSTACK API key not set; reward dispatch is disabled");
                Arc::new(UnconfiguredProvider)
            }
        };

        let mailer: Arc<dyn Mailer> = match config.email.provider {
            EmailProvider::Resend => Arc::new(ResendMailer::new(
                config.email.resend_api_key.clone().unwrap_or_default(),
                config.email.from_address.clone(),
                Duration::from_secs(15),
            )?),
            EmailProvider::Log => Arc::new(LogMailer),
        };

        let ai: Option<Arc<dyn CompletionProvider>> = match config.ai.api_key.as_deref() {
            Some(key) if config.ai_enabled() => Some(Arc::new(OpenAiCompatibleClient::new(
                config.ai.base_url.clone(),
                key,
                config.ai.model.clone(),
                Duration::from_secs(config.ai.timeout_secs),
            )?)),
            _ => None,
        };

        Ok(Self::with_services(db, config, provider, mailer, ai))
    }

    /// Creates application state around the given provider implementations
    pub fn with_services(
        db: PgPool,
        config: Config,
        provider: Arc<dyn RewardProvider>,
        mailer: Arc<dyn Mailer>,
        ai: Option<Arc<dyn CompletionProvider>>,
    ) -> Self {
        let ai_limiter = SlidingWindowLimiter::new(
            config.ai.requests_per_window,
            Duration::from_secs(config.ai.window_secs),
        );
        let ai_costs = CostTracker::new(
            Pricing {
                input_per_1k: config.ai.input_price_per_1k,
                output_per_1k: config.ai.output_price_per_1k,
            },
            config.ai.daily_budget_usd,
        );

        Self {
            rewards: IssuanceService::new(db.clone(), provider),
            db,
            config: Arc::new(config),
            mailer,
            ai,
            ai_limiter: Arc::new(ai_limiter),
            ai_costs: Arc::new(ai_costs),
        }
    }

    /// State for the session middleware
    pub fn session_auth_state(&self) -> SessionAuthState {
        SessionAuthState {
            pool: self.db.clone(),
            jwt_secret: Arc::from(self.config.auth.supabase_jwt_secret.as_str()),
            audience: Arc::from(self.config.auth.audience.as_str()),
        }
    }
}

/// Builds the complete Axum router with all routes and middleware
///
/// # Architecture
///
/// ```text
/// /
/// ├── GET  /health                            # public
/// └── /api
///     ├── POST /webhooks/rewardstack          # public, signed
///     ├── /me                                 # session required from here on
///     ├── /invites/:code/accept
///     └── /workspaces
///         └── /:slug
///             ├── /primary
///             ├── /members[/:user_id]
///             ├── /invites
///             ├── /challenges[/:id[/enroll|/enrollments|/submissions]]
///             ├── /submissions/:id/review
///             ├── /rewards[/:id/retry]
///             ├── /points, /leaderboard
///             ├── /email-templates[/:type]
///             ├── /emails/send
///             ├── /emails/ai/generate, /emails/ai/usage
///             └── /activity
/// ```
///
/// # Middleware Stack
///
/// Applied in order (outermost first):
/// 1. Security headers
/// 2. CORS (tower-http CorsLayer)
/// 3. Logging (tower-http TraceLayer)
/// 4. Session authentication (everything under `/api` except the webhook)
/// 5. AI rate limiting (generation endpoint only)
pub fn build_router(state: AppState) -> Router {
    let workspace_routes = Router::new()
        .route(
            "/",
            get(routes::workspaces::list_workspaces).post(routes::workspaces::create_workspace),
        )
        .route(
            "/:slug",
            get(routes::workspaces::get_workspace).patch(routes::workspaces::update_workspace),
        )
        .route("/:slug/primary", post(routes::workspaces::set_primary))
        .route("/:slug/members", get(routes::members::list_members))
        .route(
            "/:slug/members/:user_id",
            put(routes::members::update_member).delete(routes::members::remove_member),
        )
        .route(
            "/:slug/invites",
            get(routes::invites::list_invites).post(routes::invites::create_invite),
        )
        .route(
            "/:slug/challenges",
            get(routes::challenges::list_challenges).post(routes::challenges::create_challenge),
        )
        .route(
            "/:slug/challenges/:id",
            get(routes::challenges::get_challenge)
                .patch(routes::challenges::update_challenge)
                .delete(routes::challenges::delete_challenge),
        )
        .route(
            "/:slug/challenges/:id/enroll",
            post(routes::enrollments::enroll).delete(routes::enrollments::withdraw),
        )
        .route(
            "/:slug/challenges/:id/enrollments",
            get(routes::enrollments::list_enrollments),
        )
        .route(
            "/:slug/challenges/:id/submissions",
            get(routes::submissions::list_submissions).post(routes::submissions::create_submission),
        )
        .route(
            "/:slug/submissions/:id/review",
            post(routes::submissions::review_submission),
        )
        .route(
            "/:slug/rewards",
            get(routes::rewards::list_rewards).post(routes::rewards::grant_reward),
        )
        .route("/:slug/rewards/:id/retry", post(routes::rewards::retry_reward))
        .route("/:slug/points", get(routes::rewards::my_points))
        .route("/:slug/leaderboard", get(routes::rewards::leaderboard))
        .route(
            "/:slug/email-templates",
            get(routes::email_templates::list_templates),
        )
        .route(
            "/:slug/email-templates/:template_type",
            put(routes::email_templates::upsert_template)
                .delete(routes::email_templates::delete_template),
        )
        .route("/:slug/emails/send", post(routes::emails::send_emails))
        .route(
            "/:slug/emails/ai/generate",
            post(routes::ai::generate_email)
                .layer(from_fn_with_state(state.clone(), ai_rate_limit)),
        )
        .route("/:slug/emails/ai/usage", get(routes::ai::usage))
        .route("/:slug/activity", get(routes::activity::list_activity));

    let authenticated = Router::new()
        .route("/me", get(routes::me::get_me).patch(routes::me::update_me))
        .route("/invites/:code/accept", post(routes::invites::accept_invite))
        .nest("/workspaces", workspace_routes)
        .layer(from_fn_with_state(state.session_auth_state(), session_auth));

    let api_routes = Router::new()
        .route(
            "/webhooks/rewardstack",
            post(routes::webhooks::rewardstack_webhook),
        )
        .merge(authenticated);

    let cors = cors_layer(&state.config.api.cors_origins);

    Router::new()
        .route("/health", get(routes::health::health_check))
        .nest("/api", api_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors)
        .layer(SecurityHeadersLayer::new(state.config.api.production))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        // Development mode: permissive CORS
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600))
}
