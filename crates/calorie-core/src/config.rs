use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-5-mini";
pub const DEFAULT_AWS_REGION: &str = "auto";

/// Deployment environment, mirrors the `APP_ENV` env var.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppEnv {
    Dev,
    Prod,
}

impl Default for AppEnv {
    fn default() -> Self {
        AppEnv::Dev
    }
}

/// Top-level config. The `database`/`redis`/`openai`/`object_store` sections
/// are populated from their literal, unprefixed env vars (`DATABASE_URL`,
/// `REDIS_URL`, `OPENAI_API_KEY`, ...); everything else comes from an
/// optional TOML file plus `CALORIE_*` overrides. `AppConfig::load` fails
/// fast when a required var is absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub app_env: AppEnv,
    #[serde(default)]
    pub gateway: GatewayConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub openai: OpenAiConfig,
    pub object_store: ObjectStoreConfig,
    pub hashing: HashingConfig,
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
}

/// The messaging platform the inline pipeline fronts is Telegram throughout
/// (webhook `message_thread_id`, `media_group_id`, inline queries).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub bot_username: String,
}

/// Where the daily-rollup SQLite file (C9) lives. Analytics persistence is
/// ambient, not an external collaborator, so it carries a sane on-disk
/// default instead of failing fast when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default = "default_analytics_db_path")]
    pub db_path: String,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            db_path: default_analytics_db_path(),
        }
    }
}

fn default_analytics_db_path() -> String {
    "calorie_analytics.sqlite3".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

/// `DATABASE_URL`, or the `SUPABASE_URL`/`SUPABASE_DB_PASSWORD` pair the
/// meal store resolves against. The core only ever hands this to
/// the `MealStore` implementation — it never parses it itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub database_url: Option<String>,
    pub supabase_url: Option<String>,
    pub supabase_db_password: Option<String>,
}

impl DatabaseConfig {
    /// Resolves a connectable URL from whichever pair of env vars was set,
    /// or fails with a config error naming both accepted shapes.
    pub fn resolve_url(&self) -> Result<String> {
        if let Some(url) = &self.database_url {
            return Ok(url.clone());
        }
        if let (Some(url), Some(_password)) = (&self.supabase_url, &self.supabase_db_password) {
            return Ok(url.clone());
        }
        Err(CoreError::Config(
            "one of DATABASE_URL or (SUPABASE_URL, SUPABASE_DB_PASSWORD) is required".into(),
        ))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub redis_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    pub openai_api_key: String,
    #[serde(default = "default_openai_model")]
    pub openai_model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    pub aws_endpoint_url_s3: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub bucket_name: String,
    #[serde(default = "default_aws_region")]
    pub aws_region: String,
}

/// Process-wide identifier-hashing secret. Kept in its own struct so `Debug` can be hand-rolled
/// to redact it.
#[derive(Clone, Serialize, Deserialize)]
pub struct HashingConfig {
    pub hash_salt: String,
}

impl std::fmt::Debug for HashingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashingConfig")
            .field("hash_salt", &"<redacted>")
            .finish()
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_openai_model() -> String {
    DEFAULT_OPENAI_MODEL.to_string()
}
fn default_aws_region() -> String {
    DEFAULT_AWS_REGION.to_string()
}

fn required_env(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| CoreError::Config(format!("missing required environment variable {name}")))
}

impl AppConfig {
    /// Loads config from an optional TOML file (for the knobs with no
    /// externally-documented env var — `telegram`, `gateway`, `hashing`,
    /// `analytics`), with `CALORIE_*` env overrides layered on top of that
    /// file for those same knobs. The collaborator credentials with a
    /// documented external name (`DATABASE_URL`/`SUPABASE_URL`+
    /// `SUPABASE_DB_PASSWORD`, `REDIS_URL`, `OPENAI_API_KEY`, `OPENAI_MODEL`,
    /// the `AWS_*`/`BUCKET_NAME` object-store vars, `APP_ENV`) are read under
    /// their literal names — Figment's prefix/nesting convention would
    /// otherwise force operators to set `CALORIE_DATABASE_URL` instead of
    /// plain `DATABASE_URL` — and missing required vars fail fast here rather
    /// than at first use.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut figment = Figment::new();
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("CALORIE_").split("_"));

        let app_env = match std::env::var("APP_ENV") {
            Ok(v) if v.eq_ignore_ascii_case("prod") => AppEnv::Prod,
            Ok(v) if v.eq_ignore_ascii_case("dev") => AppEnv::Dev,
            Ok(other) => {
                return Err(CoreError::Config(format!(
                    "APP_ENV must be \"dev\" or \"prod\", got {other:?}"
                )))
            }
            Err(_) => figment.extract_inner("app_env").unwrap_or_default(),
        };
        let gateway: GatewayConfig = figment.extract_inner("gateway").unwrap_or_default();
        let analytics: AnalyticsConfig = figment.extract_inner("analytics").unwrap_or_default();
        let hashing: HashingConfig = figment
            .extract_inner("hashing")
            .map_err(|e| CoreError::Config(e.to_string()))?;
        let telegram: TelegramConfig = figment
            .extract_inner("telegram")
            .map_err(|e| CoreError::Config(e.to_string()))?;

        let database = DatabaseConfig {
            database_url: std::env::var("DATABASE_URL").ok(),
            supabase_url: std::env::var("SUPABASE_URL").ok(),
            supabase_db_password: std::env::var("SUPABASE_DB_PASSWORD").ok(),
        };
        database.resolve_url()?;

        let redis = RedisConfig {
            redis_url: required_env("REDIS_URL")?,
        };
        let openai = OpenAiConfig {
            openai_api_key: required_env("OPENAI_API_KEY")?,
            openai_model: std::env::var("OPENAI_MODEL")
                .unwrap_or_else(|_| DEFAULT_OPENAI_MODEL.to_string()),
        };
        let object_store = ObjectStoreConfig {
            aws_endpoint_url_s3: required_env("AWS_ENDPOINT_URL_S3")?,
            aws_access_key_id: required_env("AWS_ACCESS_KEY_ID")?,
            aws_secret_access_key: required_env("AWS_SECRET_ACCESS_KEY")?,
            bucket_name: required_env("BUCKET_NAME")?,
            aws_region: std::env::var("AWS_REGION").unwrap_or_else(|_| DEFAULT_AWS_REGION.to_string()),
        };

        Ok(Self {
            app_env,
            gateway,
            database,
            redis,
            openai,
            object_store,
            hashing,
            telegram,
            analytics,
        })
    }
}
