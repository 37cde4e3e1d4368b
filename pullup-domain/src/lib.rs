use std::sync::Arc;

use tokio::sync::watch;

pub mod auth;
pub mod chat;
pub mod comments;
pub mod markers;
pub mod oauth;
pub mod reports;
pub mod stories;
pub mod users;

pub use auth::{Auth, AuthError, IssuedToken, NewSignup, OAuthProfile};
pub use chat::{ChatMessage, ChatService, RoomManager};
pub use comments::{CommentError, CommentService};
pub use markers::{
    MarkerError, MarkerInteractions, MarkerLocator, MarkerManager, PhotoUpload, RankService,
    Requester,
};
pub use oauth::{OAuth, OAuthError};
pub use reports::{NewCorrectionReport, ReportError, ReportService};
pub use stories::{StoryError, StoryService};
pub use users::{UserProfile, UserService};

use pullup_core::{
    BulkCache, CacheStore, Config, Counters, Database, GeoIndex, Mailer, ObjectStorage, PubSub,
};

/// A type passed to every service, to access shared state and collaborators.
#[derive(Clone)]
pub struct DomainContext {
    pub config: Config,
    pub db: Arc<dyn Database>,
    pub storage: Arc<dyn ObjectStorage>,
    pub mailer: Arc<dyn Mailer>,
    pub cache: CacheStore,
    pub bulk: Arc<BulkCache>,
    pub geo: GeoIndex,
    pub counters: Counters,
    pub pubsub: PubSub,
}

/// The pullup domain system, facilitating markers, stories, chat, and auth.
pub struct Domain {
    pub auth: Auth,
    pub oauth: OAuth,
    pub markers: MarkerManager,
    pub locator: MarkerLocator,
    pub interactions: MarkerInteractions,
    pub rank: Arc<RankService>,
    pub stories: StoryService,
    pub comments: CommentService,
    pub reports: ReportService,
    pub chat: Arc<ChatService>,
    pub users: UserService,
}

impl Domain {
    pub fn new(context: DomainContext) -> Self {
        Self {
            auth: Auth::new(&context),
            oauth: OAuth::from_env(),
            markers: MarkerManager::new(&context),
            locator: MarkerLocator::new(&context),
            interactions: MarkerInteractions::new(&context),
            rank: Arc::new(RankService::new(&context)),
            stories: StoryService::new(&context),
            comments: CommentService::new(&context),
            reports: ReportService::new(&context),
            chat: Arc::new(ChatService::new(&context)),
            users: UserService::new(&context),
        }
    }

    /// Spawns the background loops: the click flusher, the chat idle
    /// sweeper, and the chat retry drainer. All of them exit when the
    /// shutdown signal flips.
    pub fn run_background_tasks(&self, shutdown: watch::Receiver<bool>) {
        let rank = self.rank.clone();
        let rank_shutdown = shutdown.clone();
        tokio::spawn(async move { rank.run_flusher(rank_shutdown).await });

        let chat = self.chat.clone();
        let chat_shutdown = shutdown.clone();
        tokio::spawn(async move { chat.run_idle_sweeper(chat_shutdown).await });

        let chat = self.chat.clone();
        tokio::spawn(async move { chat.run_retry_queue(shutdown).await });
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use deadpool_redis::Runtime;
    use pullup_core::{
        BulkCache, CacheStore, Config, Counters, GeoIndex, JsonCodec, LogMailer, MemoryStorage,
        PgDatabase, PubSub,
    };

    use super::DomainContext;

    /// A context whose pools are lazy: nothing connects until a call is
    /// made, which the unit tests never do.
    pub fn test_context() -> DomainContext {
        let redis = deadpool_redis::Config::from_url("redis://127.0.0.1")
            .create_pool(Some(Runtime::Tokio1))
            .expect("pool config is valid");

        let pg = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/pullup_test")
            .expect("lazy pool builds");

        DomainContext {
            config: Config::from_env(),
            db: Arc::new(PgDatabase::with_pool(pg)),
            storage: Arc::new(MemoryStorage::new("http://storage.test")),
            mailer: Arc::new(LogMailer),
            cache: CacheStore::new(redis.clone(), JsonCodec),
            bulk: Arc::new(BulkCache::new()),
            geo: GeoIndex::new(redis.clone()),
            counters: Counters::new(redis.clone()),
            pubsub: PubSub::new(redis, "redis://127.0.0.1".to_string()),
        }
    }
}
