//! The cache layer.
//!
//! Three tiers with distinct contracts:
//! - [BulkCache]: in-process byte slots for bulk endpoints, storing
//!   already-serialized JSON.
//! - [CacheStore]: keyed object cache in Redis with a TTL, polymorphic over
//!   the entity type through an injected [CacheCodec].
//! - [GeoIndex]: a sorted set over a geohash of marker coordinates,
//!   supporting radius queries.
//!
//! [Counters] holds the atomic per-day quota counters and the click rank
//! store, [PubSub] the dedicated subscription connections.
//!
//! Cache failures never fail a request. Every fallible operation logs and
//! degrades to a miss or a no-op.

mod bulk;
mod codec;
mod counters;
mod geo;
mod keyed;
mod pubsub;

pub use bulk::*;
pub use codec::*;
pub use counters::*;
pub use geo::*;
pub use keyed::*;
pub use pubsub::*;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache pool unavailable: {0}")]
    Pool(String),
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
    #[error("value could not be encoded: {0}")]
    Encode(String),
    #[error("value could not be decoded: {0}")]
    Decode(String),
    /// Writing this value would poison the cache, so it is skipped.
    #[error("refusing to cache an empty payload")]
    EmptyPayload,
}

pub(crate) type CacheResult<T> = Result<T, CacheError>;

/// Well-known key builders, so mutation paths and read paths cannot drift
/// apart on formatting.
pub mod keys {
    pub const GEO_MARKERS: &str = "geo:markers";

    pub fn close_markers(lat: f64, lng: f64, distance: i64, page: i64, page_size: i64) -> String {
        format!("close_markers:{lat}:{lng}:{distance}:{page}:{page_size}")
    }

    pub const CLOSE_MARKERS_PATTERN: &str = "close_markers:*";

    pub fn stories_page(marker_id: i64, offset: i64) -> String {
        format!("stories:{marker_id}:offset:{offset}")
    }

    pub fn stories_pattern(marker_id: i64) -> String {
        format!("stories:{marker_id}:*")
    }

    pub fn stories_offsets_pattern(marker_id: i64) -> String {
        format!("stories:{marker_id}:offset:*")
    }

    pub fn all_stories_page(page: i64) -> String {
        format!("stories:all:page:{page}")
    }

    pub const ALL_STORIES_PATTERN: &str = "stories:all:*";

    pub fn user_markers_page(user_id: i64, page: i64) -> String {
        format!("userMarkers:{user_id}:page:{page}")
    }

    pub fn user_markers_pattern(user_id: i64) -> String {
        format!("userMarkers:{user_id}:*")
    }

    pub fn user_profile(user_id: i64) -> String {
        format!("profile:{user_id}")
    }

    pub fn user_favorites(user_id: i64) -> String {
        format!("favorites:{user_id}")
    }

    pub fn facilities(marker_id: i64) -> String {
        format!("facilities:{marker_id}")
    }

    pub fn daily_quota(kind: &str, user_id: i64, date: &str) -> String {
        format!("{kind}_limit:{user_id}:{date}")
    }

    pub const MARKER_CLICKS: &str = "marker_clicks";

    pub fn unique_visitors(marker_id: &str) -> String {
        format!("unique_visitors:{marker_id}")
    }

    pub fn room_messages(marker_id: &str) -> String {
        format!("room:{marker_id}:messages")
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_key_formats() {
            assert_eq!(
                close_markers(37.5665, 126.978, 500, 1, 4),
                "close_markers:37.5665:126.978:500:1:4"
            );
            assert_eq!(stories_page(12, 4), "stories:12:offset:4");
            assert_eq!(stories_offsets_pattern(12), "stories:12:offset:*");
            assert_eq!(user_markers_page(7, 2), "userMarkers:7:page:2");
            assert_eq!(daily_quota("comment", 3, "2024-03-01"), "comment_limit:3:2024-03-01");
            assert_eq!(room_messages("5329"), "room:5329:messages");
        }
    }
}
