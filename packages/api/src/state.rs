use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use neuroscan_vision::InferenceAdapter;
use sea_orm::DatabaseConnection;

use crate::{
    auth::TokenService,
    config::ServiceConfig,
    database,
    error::ApiError,
    pipeline::PredictionPipeline,
    repository::{InMemoryPredictionRepository, PredictionRepository, SeaOrmPredictionRepository},
};

pub type AppState = Arc<State>;

const PRUNE_INTERVAL: Duration = Duration::from_secs(60 * 60);

pub struct State {
    pub config: ServiceConfig,
    pub pipeline: Arc<PredictionPipeline>,
    pub repository: Arc<dyn PredictionRepository>,
    /// `None` when `DATABASE_URL` is unset or unreachable; accounts are unavailable then.
    pub db: Option<DatabaseConnection>,
    pub tokens: TokenService,
    pub started_at: Instant,
}

impl State {
    /// Connects to `DATABASE_URL` when set. Without a database, or when it cannot be
    /// reached, history is kept in memory and accounts are disabled.
    pub async fn new(config: ServiceConfig, adapter: InferenceAdapter) -> Self {
        let connected = match &config.database_url {
            Some(url) => match database::connect(url).await {
                Ok(db) => Some(db),
                Err(e) => {
                    tracing::error!(
                        "Database unreachable, serving predictions without it: {}",
                        e
                    );
                    None
                }
            },
            None => {
                tracing::warn!("DATABASE_URL not set");
                None
            }
        };

        let repository: Arc<dyn PredictionRepository> = match &connected {
            Some(db) => {
                let repository = Arc::new(SeaOrmPredictionRepository::new(db.clone()));
                if let Some(days) = config.retention_days {
                    Arc::clone(&repository)
                        .spawn_pruning(chrono::Duration::days(i64::from(days)), PRUNE_INTERVAL);
                }
                repository
            }
            None => {
                tracing::warn!(
                    "Keeping the last {} predictions in memory; accounts are disabled.",
                    config.history_capacity
                );
                Arc::new(InMemoryPredictionRepository::new(config.history_capacity))
            }
        };
        Self::from_parts(config, adapter, repository, connected)
    }

    pub fn from_parts(
        config: ServiceConfig,
        adapter: InferenceAdapter,
        repository: Arc<dyn PredictionRepository>,
        db: Option<DatabaseConnection>,
    ) -> Self {
        let pipeline = Arc::new(PredictionPipeline::from_config(&config, adapter));
        let tokens =
            TokenService::from_secret(config.jwt_secret.as_deref(), config.jwt_expiration_hours);
        Self {
            pipeline,
            repository,
            db,
            tokens,
            started_at: Instant::now(),
            config,
        }
    }

    pub fn db(&self) -> Result<&DatabaseConnection, ApiError> {
        self.db
            .as_ref()
            .ok_or_else(|| ApiError::service_unavailable("No database configured for accounts"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neuroscan_vision::ClassLabelTable;

    fn adapter() -> InferenceAdapter {
        InferenceAdapter::unavailable(ClassLabelTable::brain_mri_4class(), "no model in tests")
    }

    #[tokio::test]
    async fn unreachable_database_falls_back_to_memory() {
        let config = ServiceConfig {
            database_url: Some("postgres://u:p@127.0.0.1:1/neuroscan".to_string()),
            ..ServiceConfig::default()
        };
        let state = State::new(config, adapter()).await;
        assert!(state.db.is_none());
        assert_eq!(state.repository.backend_name(), "memory");
        assert!(state.db().is_err());
    }

    #[tokio::test]
    async fn reachable_database_backs_history_and_accounts() {
        let config = ServiceConfig {
            database_url: Some("sqlite::memory:".to_string()),
            retention_days: Some(30),
            ..ServiceConfig::default()
        };
        let state = State::new(config, adapter()).await;
        assert!(state.db().is_ok());
        assert_eq!(state.repository.backend_name(), "sqlite");
    }
}
