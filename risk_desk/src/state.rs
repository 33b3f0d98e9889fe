use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use common::{AnomalyModel, AnomalyParams, Database, DeepAnalyzer, OfflineAnalyst, OpenAiAnalyst};

use crate::config::AppConfig;

/// Shared by every worker. The anomaly model is fitted once here and only read afterwards.
pub struct AppState {
    pub db: Database,
    pub model: AnomalyModel,
    pub analyst: Arc<dyn DeepAnalyzer>,
    pub frontend_dir: PathBuf,
    pub upload_limit_bytes: usize,
}
impl AppState {
    pub async fn new(config: &AppConfig) -> Result<Self> {
        let db = Database::new(&config.database_url).await?;
        log::info!("Database initialized successfully!");

        let model = train_anomaly_model(&db, &config.anomaly).await?;

        let analyst: Arc<dyn DeepAnalyzer> = match &config.openai_api_key {
            Some(api_key) => Arc::new(
                OpenAiAnalyst::new(
                    api_key,
                    &config.openai_base_url,
                    &config.openai_model,
                    config.ai_timeout,
                )
                .context("Failed to create deep analysis client")?,
            ),
            None => {
                log::warn!("OPENAI_API_KEY is not set, deep analysis is disabled");
                Arc::new(OfflineAnalyst)
            }
        };

        Ok(Self::from_parts(
            db,
            model,
            analyst,
            config.frontend_dir.clone(),
            config.upload_limit_bytes,
        ))
    }

    pub fn from_parts(
        db: Database,
        model: AnomalyModel,
        analyst: Arc<dyn DeepAnalyzer>,
        frontend_dir: PathBuf,
        upload_limit_bytes: usize,
    ) -> Self {
        AppState {
            db,
            model,
            analyst,
            frontend_dir,
            upload_limit_bytes,
        }
    }
}

pub async fn train_anomaly_model(db: &Database, params: &AnomalyParams) -> Result<AnomalyModel> {
    let amounts = db
        .get_training_amounts()
        .await
        .context("Failed to load historical amounts for the anomaly model")?;
    Ok(AnomalyModel::train(&amounts, params))
}
