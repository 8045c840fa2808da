use anyhow::Context;
use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    auth::JwtService,
    config::Config,
    database::Database,
    device::{DeviceStore, MemoryDeviceStore, RedisDeviceStore},
    services::{
        AccountService, CreditLedger, GeneratedImageStore, ImageGenerator, Metrics, RedisService,
    },
    store::{DocumentStore, MemoryDocumentStore, PgDocumentStore},
    utils::{Clock, RetryPolicy, SystemClock},
};

pub mod admin;
pub mod credits;
pub mod generate;
pub mod health;
pub mod images;
pub mod metrics;
pub mod session;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub documents: Arc<dyn DocumentStore>,
    pub devices: Arc<dyn DeviceStore>,
    pub ledger: Arc<CreditLedger>,
    pub images: Arc<GeneratedImageStore>,
    pub accounts: Arc<AccountService>,
    pub generator: Arc<ImageGenerator>,
    pub jwt: Arc<JwtService>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Connects the configured backends, falling back to in-memory stores.
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let documents: Arc<dyn DocumentStore> = match &config.database_url {
            Some(url) => {
                let database = Database::new(url, config.database_max_connections)
                    .await
                    .context("Failed to connect to database")?;
                database
                    .migrate()
                    .await
                    .context("Failed to run database migrations")?;
                info!("Documents stored in PostgreSQL");
                Arc::new(PgDocumentStore::new(database))
            }
            None => {
                warn!("DATABASE_URL not set, documents are kept in memory");
                Arc::new(MemoryDocumentStore::new())
            }
        };

        let devices: Arc<dyn DeviceStore> = match &config.redis_url {
            Some(url) => {
                let redis = RedisService::new(url)
                    .await
                    .context("Failed to connect to Redis")?;
                info!("Anonymous credits stored in Redis");
                Arc::new(RedisDeviceStore::new(redis, config.anonymous_ttl_secs))
            }
            None => {
                warn!("REDIS_URL not set, anonymous credits are kept in memory");
                Arc::new(MemoryDeviceStore::new())
            }
        };

        Self::assemble(config, documents, devices, Arc::new(SystemClock))
    }

    pub fn in_memory(config: Config, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        Self::assemble(
            config,
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(MemoryDeviceStore::new()),
            clock,
        )
    }

    pub fn assemble(
        config: Config,
        documents: Arc<dyn DocumentStore>,
        devices: Arc<dyn DeviceStore>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let metrics = Arc::new(Metrics::new().context("Failed to register metrics")?);

        let ledger = Arc::new(
            CreditLedger::new(
                documents.clone(),
                devices.clone(),
                config.credits,
                clock.clone(),
                metrics.clone(),
            )
            .with_fetch_retry(RetryPolicy::fixed(1, config.debit_retry_delay))
            .with_write_verification(config.verify_writes),
        );
        let images = Arc::new(GeneratedImageStore::new(
            documents.clone(),
            config.images,
            metrics.clone(),
        ));
        let accounts = Arc::new(AccountService::new(
            documents.clone(),
            ledger.clone(),
            clock,
            config.merge_anonymous_on_login,
        ));
        let generator = Arc::new(ImageGenerator::new(&config.generator)?);
        let jwt = Arc::new(JwtService::new(&config.jwt_secret));

        Ok(Self {
            config: Arc::new(config),
            documents,
            devices,
            ledger,
            images,
            accounts,
            generator,
            jwt,
            metrics,
        })
    }
}
