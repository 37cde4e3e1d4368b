use std::{fs, sync::Arc};

use colored::Colorize;
use deadpool_redis::Runtime;
use log::{error, info, warn};
use thiserror::Error;

use pullup_core::{
    db::DatabaseError, util::load_bad_words, BulkCache, CacheStore, Config, Counters, GeoIndex,
    JsonCodec, LocalStorage, LogMailer, PgDatabase, PubSub,
};
use pullup_domain::{Domain, DomainContext};
use pullup_server::{init_logger, run_server};

const BAD_WORDS_FILE: &str = "resource/badwords.txt";
const INITIAL_CHATS_FILE: &str = "resource/initial_chat_messages.json";

#[derive(Debug, Error)]
enum StartupError {
    #[error("Could not initialize database: {0}")]
    Database(DatabaseError),
    #[error("Could not initialize cache: {0}")]
    Cache(String),
}

impl StartupError {
    fn hint(&self) -> &'static str {
        match self {
            StartupError::Database(_) => {
                "Make sure Postgres is running and DATABASE_URL points at it, then try again."
            }
            StartupError::Cache(_) => {
                "Make sure Redis is running and REDIS_URL points at it, then try again."
            }
        }
    }
}

async fn boot() -> Result<(), StartupError> {
    let config = Config::from_env();

    match fs::read_to_string(BAD_WORDS_FILE) {
        Ok(words) => load_bad_words(words.lines()),
        Err(err) => warn!("Profanity filter disabled, {BAD_WORDS_FILE} unavailable: {err}"),
    }

    info!("Connecting to database...");
    let db = PgDatabase::new(&config.database_url)
        .await
        .map_err(StartupError::Database)?;

    info!("Connecting to cache...");
    let redis_pool = deadpool_redis::Config::from_url(&config.redis_url)
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|e| StartupError::Cache(e.to_string()))?;

    let context = DomainContext {
        config: config.clone(),
        db: Arc::new(db),
        storage: Arc::new(LocalStorage::new("./objects", config.storage_base_url.clone())),
        mailer: Arc::new(LogMailer),
        cache: CacheStore::new(redis_pool.clone(), JsonCodec),
        bulk: Arc::new(BulkCache::new()),
        geo: GeoIndex::new(redis_pool.clone()),
        counters: Counters::new(redis_pool.clone()),
        pubsub: PubSub::new(redis_pool, config.redis_url.clone()),
    };

    let domain = Domain::new(context);

    match domain.markers.warm_geo_index().await {
        Ok(count) => info!("Warmed the geo index with {count} markers"),
        Err(err) => warn!("Geo index warm-up failed, falling back to SQL search: {err}"),
    }

    if config.is_production() {
        match fs::read_to_string(INITIAL_CHATS_FILE) {
            Ok(raw) => domain.chat.bootstrap_messages(&raw).await,
            Err(err) => warn!("Skipping chat bootstrap, {INITIAL_CHATS_FILE} unavailable: {err}"),
        }
    }

    info!("Initialized successfully.");
    run_server(domain, config).await;

    Ok(())
}

#[tokio::main]
async fn main() {
    init_logger();

    if let Err(error) = boot().await {
        error!(
            "{} Read the error below to troubleshoot the issue.",
            "pullup-server failed to start!".bold().red()
        );
        error!("{error}");
        error!("{}", format!("Hint: {}", error.hint()).italic());
    }
}
