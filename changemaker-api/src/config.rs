/// Configuration management for the API server
///
/// Settings are layered, later sources winning:
///
/// 1. Built-in defaults
/// 2. `changemaker.toml` in the working directory (optional)
/// 3. `CHANGEMAKER__SECTION__KEY` environment variables
/// 4. The conventional plain variables listed below
///
/// A `.env` file is loaded first when present.
///
/// # Environment Variables
///
/// - `DATABASE_URL`: PostgreSQL connection string (required)
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: 10)
/// - `API_HOST` / `API_PORT`: bind address (default: 0.0.0.0:8080)
/// - `CORS_ORIGINS`: comma-separated allowed origins (default: `*`)
/// - `SUPABASE_JWT_SECRET`: Supabase project JWT secret (required, ≥ 32 chars)
/// - `SUPABASE_JWT_AUDIENCE`: expected `aud` claim (default: authenticated)
/// - `REWARDSTACK_BASE_URL`, `REWARDSTACK_API_KEY`, `REWARDSTACK_WEBHOOK_SECRET`
/// - `AI_BASE_URL`, `AI_API_KEY`, `AI_MODEL`
/// - `EMAIL_PROVIDER` (`log` or `resend`), `RESEND_API_KEY`, `EMAIL_FROM`
///
/// # Example
///
/// ```no_run
/// use changemaker_api::config::Config;
///
/// # fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.bind_address());
/// # Ok(())
/// # }
/// ```

use config::{Environment, File};
use serde::{Deserialize, Serialize};
use std::env;

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub rewardstack: RewardStackSettings,
    pub ai: AiConfig,
    pub email: EmailConfig,
}

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,

    /// Allowed CORS origins; `*` allows any
    pub cors_origins: Vec<String>,

    /// Enables HSTS and JSON logs
    pub production: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in pool
    pub max_connections: u32,
}

/// Supabase session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Supabase project JWT secret
    ///
    /// IMPORTANT: This must be kept secret and should be at least 32 bytes.
    pub supabase_jwt_secret: String,

    /// Expected `aud` claim
    pub audience: String,
}

/// RewardSTACK connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardStackSettings {
    pub base_url: String,

    /// Rewards are dispatched only when set
    pub api_key: Option<String>,

    /// Webhooks are rejected when unset
    pub webhook_secret: Option<String>,

    pub timeout_secs: u64,
}

/// AI composer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// OpenAI-compatible API root, e.g. `https://api.openai.com/v1`
    pub base_url: String,

    /// The composer is disabled when unset
    pub api_key: Option<String>,

    pub model: String,

    /// Generations allowed per user per window
    pub requests_per_window: u32,
    pub window_secs: u64,

    /// Per-workspace spend cap per UTC day
    pub daily_budget_usd: f64,

    pub input_price_per_1k: f64,
    pub output_price_per_1k: f64,

    pub max_tokens: u32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailProvider {
    /// Log messages instead of sending them
    Log,
    Resend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub provider: EmailProvider,
    pub resend_api_key: Option<String>,

    /// Sender, e.g. `Changemaker <noreply@example.com>`
    pub from_address: String,
}

/// Plain environment variables and the keys they override
const PLAIN_VARS: &[(&str, &str)] = &[
    ("API_HOST", "api.host"),
    ("API_PORT", "api.port"),
    ("API_PRODUCTION", "api.production"),
    ("DATABASE_URL", "database.url"),
    ("DATABASE_MAX_CONNECTIONS", "database.max_connections"),
    ("SUPABASE_JWT_SECRET", "auth.supabase_jwt_secret"),
    ("SUPABASE_JWT_AUDIENCE", "auth.audience"),
    ("REWARDSTACK_BASE_URL", "rewardstack.base_url"),
    ("REWARDSTACK_API_KEY", "rewardstack.api_key"),
    ("REWARDSTACK_WEBHOOK_SECRET", "rewardstack.webhook_secret"),
    ("AI_BASE_URL", "ai.base_url"),
    ("AI_API_KEY", "ai.api_key"),
    ("AI_MODEL", "ai.model"),
    ("AI_DAILY_BUDGET_USD", "ai.daily_budget_usd"),
    ("EMAIL_PROVIDER", "email.provider"),
    ("RESEND_API_KEY", "email.resend_api_key"),
    ("EMAIL_FROM", "email.from_address"),
];

impl Config {
    /// Loads configuration from all sources and validates it
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - A value has the wrong type
    /// - `DATABASE_URL` is missing
    /// - The Supabase JWT secret is missing or shorter than 32 characters
    /// - The Resend provider is selected without an API key
    pub fn from_env() -> anyhow::Result<Self> {
        // Load .env file if present (for development)
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder()
            .set_default("api.host", "0.0.0.0")?
            .set_default("api.port", 8080)?
            .set_default("api.cors_origins", vec!["*"])?
            .set_default("api.production", false)?
            .set_default("database.url", "")?
            .set_default("database.max_connections", 10)?
            .set_default("auth.supabase_jwt_secret", "")?
            .set_default("auth.audience", "authenticated")?
            .set_default("rewardstack.base_url", "https://api.rewardstack.io")?
            .set_default("rewardstack.timeout_secs", 15)?
            .set_default("ai.base_url", "https://api.openai.com/v1")?
            .set_default("ai.model", "gpt-4o-mini")?
            .set_default("ai.requests_per_window", 10)?
            .set_default("ai.window_secs", 60)?
            .set_default("ai.daily_budget_usd", 5.0)?
            .set_default("ai.input_price_per_1k", 0.00015)?
            .set_default("ai.output_price_per_1k", 0.0006)?
            .set_default("ai.max_tokens", 800)?
            .set_default("ai.timeout_secs", 60)?
            .set_default("email.provider", "log")?
            .set_default("email.from_address", "Changemaker <noreply@changemaker.local>")?
            .add_source(File::with_name("changemaker").required(false))
            .add_source(Environment::with_prefix("CHANGEMAKER").separator("__"));

        for (var, key) in PLAIN_VARS {
            builder = builder.set_override_option(*key, env::var(var).ok())?;
        }

        if let Ok(origins) = env::var("CORS_ORIGINS") {
            let origins: Vec<String> = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
            builder = builder.set_override("api.cors_origins", origins)?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field rules that deserialization can't express
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.url.trim().is_empty() {
            anyhow::bail!("DATABASE_URL environment variable is required");
        }

        if self.auth.supabase_jwt_secret.len() < 32 {
            anyhow::bail!("SUPABASE_JWT_SECRET must be at least 32 characters long");
        }

        if self.email.provider == EmailProvider::Resend
            && self
                .email
                .resend_api_key
                .as_deref()
                .map_or(true, |k| k.trim().is_empty())
        {
            anyhow::bail!("RESEND_API_KEY is required when EMAIL_PROVIDER=resend");
        }

        if self.ai.requests_per_window == 0 || self.ai.window_secs == 0 {
            anyhow::bail!("AI rate limit window and request count must be positive");
        }

        Ok(())
    }

    /// Returns the server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }

    /// Whether the AI composer has credentials
    pub fn ai_enabled(&self) -> bool {
        self.ai
            .api_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config {
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                cors_origins: vec!["*".to_string()],
                production: false,
            },
            database: DatabaseConfig {
                url: "postgresql://localhost/test".to_string(),
                max_connections: 10,
            },
            auth: AuthConfig {
                supabase_jwt_secret: "test-secret-key-at-least-32-bytes-long".to_string(),
                audience: "authenticated".to_string(),
            },
            rewardstack: RewardStackSettings {
                base_url: "https://api.rewardstack.io".to_string(),
                api_key: None,
                webhook_secret: None,
                timeout_secs: 15,
            },
            ai: AiConfig {
                base_url: "https://api.openai.com/v1".to_string(),
                api_key: None,
                model: "gpt-4o-mini".to_string(),
                requests_per_window: 10,
                window_secs: 60,
                daily_budget_usd: 5.0,
                input_price_per_1k: 0.00015,
                output_price_per_1k: 0.0006,
                max_tokens: 800,
                timeout_secs: 60,
            },
            email: EmailConfig {
                provider: EmailProvider::Log,
                resend_api_key: None,
                from_address: "noreply@example.com".to_string(),
            },
        }
    }

    #[test]
    fn test_bind_address() {
        assert_eq!(sample().bind_address(), "127.0.0.1:8080");
    }

    #[test]
    fn test_validate_accepts_sample() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_short_secret() {
        let mut config = sample();
        config.auth.supabase_jwt_secret = "too-short".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_database_url() {
        let mut config = sample();
        config.database.url = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resend_requires_api_key() {
        let mut config = sample();
        config.email.provider = EmailProvider::Resend;
        assert!(config.validate().is_err());

        config.email.resend_api_key = Some("re_123".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_ai_enabled_requires_key() {
        let mut config = sample();
        assert!(!config.ai_enabled());

        config.ai.api_key = Some("sk-test".to_string());
        assert!(config.ai_enabled());
    }

    #[test]
    fn test_email_provider_deserializes_lowercase() {
        let provider: EmailProvider = serde_json::from_str("\"resend\"").unwrap();
        assert_eq!(provider, EmailProvider::Resend);
    }
}
