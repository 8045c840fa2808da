use anyhow::{Context, Result};
use std::{env, str::FromStr, time::Duration};

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub redis_url: Option<String>,
    pub jwt_secret: String,
    pub credits: CreditPolicy,
    pub images: ImageListLimits,
    pub generator: GeneratorConfig,
    pub debit_retry_delay: Duration,
    pub verify_writes: bool,
    pub merge_anonymous_on_login: bool,
    pub anonymous_ttl_secs: u64,
    pub request_timeout: Duration,
    pub cors_allowed_origins: Vec<String>,
}

/// Credit amounts handed out by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditPolicy {
    pub anonymous_credits: u32,
    pub login_bonus_credits: u32,
    pub daily_credits: u32,
}

impl Default for CreditPolicy {
    fn default() -> Self {
        Self {
            anonymous_credits: 10,
            login_bonus_credits: 10,
            daily_credits: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageListLimits {
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for ImageListLimits {
    fn default() -> Self {
        Self {
            default_limit: 50,
            max_limit: 200,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub base_url: String,
    pub default_model: String,
    pub prefetch: bool,
    pub timeout: Duration,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            base_url: "https://image.pollinations.ai".to_string(),
            default_model: "flux".to_string(),
            prefetch: false,
            timeout: Duration::from_secs(60),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            database_url: None,
            database_max_connections: 20,
            redis_url: None,
            jwt_secret: "your-secret-key".to_string(),
            credits: CreditPolicy::default(),
            images: ImageListLimits::default(),
            generator: GeneratorConfig::default(),
            debit_retry_delay: Duration::from_millis(500),
            verify_writes: true,
            merge_anonymous_on_login: false,
            anonymous_ttl_secs: 30 * 24 * 3600,
            request_timeout: Duration::from_secs(30),
            cors_allowed_origins: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();

        Ok(Config {
            port: env_or("PORT", defaults.port)?,
            database_url: env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            database_max_connections: env_or(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            )?,
            redis_url: env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
            jwt_secret: env::var("JWT_SECRET").unwrap_or(defaults.jwt_secret),
            credits: CreditPolicy {
                anonymous_credits: env_or(
                    "ANONYMOUS_CREDITS",
                    defaults.credits.anonymous_credits,
                )?,
                login_bonus_credits: env_or(
                    "LOGIN_BONUS_CREDITS",
                    defaults.credits.login_bonus_credits,
                )?,
                daily_credits: env_or("DAILY_CREDITS", defaults.credits.daily_credits)?,
            },
            images: ImageListLimits {
                default_limit: env_or("IMAGE_LIST_DEFAULT_LIMIT", defaults.images.default_limit)?,
                max_limit: env_or("IMAGE_LIST_MAX_LIMIT", defaults.images.max_limit)?,
            },
            generator: GeneratorConfig {
                base_url: env::var("IMAGE_API_BASE_URL")
                    .unwrap_or(defaults.generator.base_url),
                default_model: env::var("IMAGE_API_DEFAULT_MODEL")
                    .unwrap_or(defaults.generator.default_model),
                prefetch: env_or("IMAGE_API_PREFETCH", defaults.generator.prefetch)?,
                timeout: Duration::from_secs(env_or(
                    "IMAGE_API_TIMEOUT_SECS",
                    defaults.generator.timeout.as_secs(),
                )?),
            },
            debit_retry_delay: Duration::from_millis(env_or(
                "DEBIT_RETRY_DELAY_MS",
                defaults.debit_retry_delay.as_millis() as u64,
            )?),
            verify_writes: env_or("VERIFY_WRITES", defaults.verify_writes)?,
            merge_anonymous_on_login: env_or(
                "MERGE_ANONYMOUS_ON_LOGIN",
                defaults.merge_anonymous_on_login,
            )?,
            anonymous_ttl_secs: env_or("ANONYMOUS_TTL_SECS", defaults.anonymous_ttl_secs)?,
            request_timeout: Duration::from_secs(env_or(
                "REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )?),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .map(|origins| parse_list(&origins))
                .unwrap_or_default(),
        })
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        Err(_) => Ok(default),
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
