use crate::error::{Error, Result};
use crate::models::policy::{AssessmentPolicy, FallbackScoring, ForceCompletionPolicy};
use dotenvy::dotenv;
use std::env;
use std::sync::OnceLock;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_address: String,
    pub database_url: String,
    pub openai_api_key: String,
    pub scoring_api_url: url::Url,
    pub public_rps: u32,
    pub session_ttl_minutes: i64,
    pub fullscreen_exit_grace_seconds: i64,
    pub shortcut_warning_limit: u32,
    pub media_timeslice_ms: u64,
    pub sweep_interval_ms: u64,
    pub uploads_dir: String,
    pub fallback_scoring: FallbackScoring,
    pub force_completion: ForceCompletionPolicy,
    pub log_format: Option<String>,
}

pub static CONFIG: OnceLock<Config> = OnceLock::new();

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let scoring_api_url = env::var("SCORING_API_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1/".to_string());
        let scoring_api_url = url::Url::parse(&scoring_api_url)
            .map_err(|e| Error::Config(format!("Invalid value for SCORING_API_URL: {}", e)))?;

        Ok(Self {
            server_address: get_env("SERVER_ADDRESS")?,
            database_url: get_env("DATABASE_URL")?,
            openai_api_key: get_env("OPENAI_API_KEY")?,
            scoring_api_url,
            public_rps: get_env_parse("PUBLIC_RPS")?,
            session_ttl_minutes: get_env_parse_or("SESSION_TTL_MINUTES", 180)?,
            fullscreen_exit_grace_seconds: get_env_parse_or("FULLSCREEN_EXIT_GRACE_SECONDS", 3)?,
            shortcut_warning_limit: get_env_parse_or("SHORTCUT_WARNING_LIMIT", 3)?,
            media_timeslice_ms: get_env_parse_or("MEDIA_TIMESLICE_MS", 1000)?,
            sweep_interval_ms: get_env_parse_or("SWEEP_INTERVAL_MS", 500)?,
            uploads_dir: env::var("UPLOADS_DIR").unwrap_or_else(|_| "uploads".to_string()),
            fallback_scoring: get_env_parse_or("FALLBACK_SCORING", FallbackScoring::Conservative)?,
            force_completion: get_env_parse_or("FORCE_COMPLETION_POLICY", ForceCompletionPolicy::Fail)?,
            log_format: env::var("LOG_FORMAT").ok(),
        })
    }

    pub fn policy(&self) -> AssessmentPolicy {
        AssessmentPolicy {
            session_ttl: chrono::Duration::minutes(self.session_ttl_minutes),
            fullscreen_exit_grace: chrono::Duration::seconds(self.fullscreen_exit_grace_seconds),
            shortcut_warning_limit: self.shortcut_warning_limit,
            media_timeslice: Duration::from_millis(self.media_timeslice_ms),
            fallback_scoring: self.fallback_scoring,
            force_completion: self.force_completion,
            ..AssessmentPolicy::default()
        }
    }
}

fn get_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::Config(format!("Missing environment variable: {}", name)))
}

fn get_env_parse<T>(name: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = get_env(name)?;
    raw.parse()
        .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e)))
}

fn get_env_parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(_) => get_env_parse(name),
        Err(_) => Ok(default),
    }
}

pub fn init_config() -> Result<()> {
    let config = Config::from_env()?;
    CONFIG
        .set(config)
        .map_err(|_| Error::Config("Configuration has already been initialized".to_string()))?;
    Ok(())
}

pub fn get_config() -> &'static Config {
    CONFIG
        .get()
        .expect("Configuration has not been initialized")
}
