mod config;
mod mailer;
mod storage;

pub mod cache;
pub mod db;
pub mod util;

pub use config::*;
pub use mailer::*;
pub use storage::*;

pub use cache::{BulkCache, BulkSlot, CacheCodec, CacheStore, Counters, GeoIndex, JsonCodec, PubSub};
pub use db::{Database, DatabaseError, PgDatabase};
