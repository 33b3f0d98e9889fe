use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, anyhow};
use common::AnomalyParams;

use crate::cors::OriginPolicy;
use crate::state::AppState;

pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: String,
    pub port: u16,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,
    pub ai_timeout: Duration,
    pub allowed_origins: Vec<String>,
    pub preview_origin_pattern: String,
    pub frontend_dir: PathBuf,
    pub anomaly: AnomalyParams,
    pub upload_limit_bytes: usize,
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("{} has invalid value `{}`: {}", key, raw, e)),
        None => Ok(default),
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| "sqlite://risk_desk.sqlite".to_string());
        let bind_addr = lookup("BIND_ADDR").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = parse_or(&lookup, "PORT", 8000u16)?;

        let openai_api_key = lookup("OPENAI_API_KEY").filter(|key| !key.trim().is_empty());
        let openai_base_url = lookup("OPENAI_BASE_URL")
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let openai_model = lookup("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string());
        let ai_timeout = Duration::from_secs(parse_or(&lookup, "AI_TIMEOUT_SECS", 30u64)?);

        let allowed_origins = lookup("ALLOWED_ORIGINS")
            .unwrap_or_else(|| "http://localhost:5173,http://localhost:3000".to_string())
            .split(',')
            .map(|origin| origin.trim().trim_end_matches('/').to_string())
            .filter(|origin| !origin.is_empty())
            .collect();
        let preview_origin_pattern = lookup("PREVIEW_ORIGIN_PATTERN")
            .unwrap_or_else(|| r"^https://[a-z0-9-]+\.vercel\.app$".to_string());

        let frontend_dir =
            PathBuf::from(lookup("FRONTEND_DIR").unwrap_or_else(|| "frontend/dist".to_string()));

        let defaults = AnomalyParams::default();
        let anomaly = AnomalyParams {
            contamination: parse_or(&lookup, "ANOMALY_CONTAMINATION", defaults.contamination)?,
            min_samples: parse_or(&lookup, "ANOMALY_MIN_SAMPLES", defaults.min_samples)?,
            seed: parse_or(&lookup, "ANOMALY_SEED", defaults.seed)?,
            ..defaults
        };
        if !(anomaly.contamination > 0.0 && anomaly.contamination <= 0.5) {
            return Err(anyhow!(
                "ANOMALY_CONTAMINATION must be in (0, 0.5], got {}",
                anomaly.contamination
            ));
        }

        let upload_limit_bytes = parse_or(&lookup, "UPLOAD_LIMIT_BYTES", 10 * 1024 * 1024usize)?;

        let config = Self {
            database_url,
            bind_addr,
            port,
            openai_api_key,
            openai_base_url,
            openai_model,
            ai_timeout,
            allowed_origins,
            preview_origin_pattern,
            frontend_dir,
            anomaly,
            upload_limit_bytes,
        };
        // Fail at startup rather than on the first cross-origin request.
        config.origin_policy()?;
        Ok(config)
    }

    pub fn origin_policy(&self) -> anyhow::Result<OriginPolicy> {
        OriginPolicy::new(&self.allowed_origins, &self.preview_origin_pattern)
            .context("PREVIEW_ORIGIN_PATTERN is not a valid pattern")
    }

    pub async fn create_app_state(&self) -> anyhow::Result<AppState> {
        AppState::new(self)
            .await
            .context("Failed to initialize AppState")
    }
}
