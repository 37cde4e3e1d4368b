use std::time::Duration;

use chrono::Utc;
use log::warn;
use thiserror::Error;

use pullup_core::cache::keys;
use pullup_core::db::{
    DatabaseError, NewStory, PrimaryKey, ReactionCounts, ReactionKind, StoryWithDetails,
};
use pullup_core::util::contains_bad_word;

use crate::DomainContext;

/// Captions are short by design.
pub const MAX_CAPTION_CHARS: usize = 30;

/// Blurhash component counts, tuned for a small vertical preview.
const BLURHASH_COMPONENTS: (u32, u32) = (6, 5);

/// How long a story lives.
const STORY_TTL_HOURS: i64 = 24;

/// Floor for cached story pages, also used for empty pages to dampen
/// repeated database hits.
const MIN_PAGE_TTL: Duration = Duration::from_secs(5 * 60);

/// TTL used when rewriting a page after a reaction patch.
const PATCHED_PAGE_TTL: Duration = Duration::from_secs(10 * 60);

const ALL_STORIES_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Error)]
pub enum StoryError {
    #[error("Marker does not exist")]
    MarkerNotFound,
    #[error("Story does not exist")]
    StoryNotFound,
    #[error("User already has an active story on this marker")]
    AlreadyPosted,
    #[error("You have already reported this story")]
    AlreadyReported,
    #[error("Caption is invalid")]
    InvalidCaption,
    #[error("The image could not be decoded")]
    InvalidImage,
    #[error("User is not allowed to delete this story")]
    Forbidden,
    #[error("Photo upload failed")]
    Upload,
    #[error(transparent)]
    Db(DatabaseError),
}

impl From<DatabaseError> for StoryError {
    fn from(value: DatabaseError) -> Self {
        match value {
            DatabaseError::NotFound { ref resource, .. } if resource == "story" => {
                Self::StoryNotFound
            }
            DatabaseError::Conflict { .. } => Self::AlreadyReported,
            err => Self::Db(err),
        }
    }
}

/// Ephemeral 24h stories attached to markers.
pub struct StoryService {
    context: DomainContext,
}

impl StoryService {
    pub fn new(context: &DomainContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Posts a story: decodes the photo, computes its blurhash, uploads the
    /// blob, inserts the row with a 24h expiry, and invalidates the story
    /// caches. One active story per (user, marker) is allowed.
    pub async fn add_story(
        &self,
        marker_id: PrimaryKey,
        user_id: PrimaryKey,
        caption: &str,
        file_name: &str,
        photo_bytes: Vec<u8>,
    ) -> Result<StoryWithDetails, StoryError> {
        validate_caption(caption)?;

        let address = self
            .context
            .db
            .marker_address(marker_id)
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound { .. } => StoryError::MarkerNotFound,
                err => StoryError::Db(err),
            })?;

        let now = Utc::now();

        let already = self
            .context
            .db
            .active_story_exists(marker_id, user_id, now)
            .await
            .map_err(StoryError::Db)?;

        if already {
            return Err(StoryError::AlreadyPosted);
        }

        let blurhash = encode_blurhash(&photo_bytes)?;

        let folder = format!("stories/{marker_id}");
        let photo_url = self
            .context
            .storage
            .put(&folder, file_name, photo_bytes)
            .await
            .map_err(|err| {
                warn!("Story upload failed for marker {marker_id}: {err}");
                StoryError::Upload
            })?;

        let expires_at = now + chrono::Duration::hours(STORY_TTL_HOURS);

        let story_id = self
            .context
            .db
            .create_story(NewStory {
                marker_id,
                user_id,
                caption: caption.to_string(),
                photo_url: photo_url.clone(),
                blurhash: blurhash.clone(),
                address: address.clone(),
                expires_at,
            })
            .await
            .map_err(StoryError::Db)?;

        let username = self
            .context
            .db
            .user_by_id(user_id)
            .await
            .map(|u| u.username)
            .unwrap_or_default();

        self.invalidate_story_caches(marker_id).await;

        Ok(StoryWithDetails {
            story_id,
            marker_id,
            user_id,
            username,
            caption: caption.to_string(),
            photo_url,
            blurhash: Some(blurhash),
            address,
            created_at: now,
            expires_at,
            thumbs_up: 0,
            thumbs_down: 0,
            user_liked: false,
        })
    }

    /// One page of a marker's active stories with embedded aggregates. The
    /// page is cached until its earliest entry expires, floored at five
    /// minutes; empty pages are cached briefly too.
    pub async fn stories_for_marker(
        &self,
        requester: Option<PrimaryKey>,
        marker_id: PrimaryKey,
        offset: i64,
        page_size: i64,
    ) -> Result<(Vec<StoryWithDetails>, bool), StoryError> {
        let cache_key = keys::stories_page(marker_id, offset);

        if let Some(cached) = self
            .context
            .cache
            .get::<Vec<StoryWithDetails>>(&cache_key)
            .await
        {
            return Ok((cached, true));
        }

        let now = Utc::now();
        let stories = self
            .context
            .db
            .stories_for_marker(requester, marker_id, now, page_size, offset)
            .await
            .map_err(StoryError::Db)?;

        let ttl = page_ttl(&stories);
        self.context.cache.set(&cache_key, &stories, ttl).await;

        Ok((stories, false))
    }

    /// The global story feed, paginated and cached for ten minutes.
    pub async fn all_stories(
        &self,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<StoryWithDetails>, bool), StoryError> {
        let cache_key = keys::all_stories_page(page);

        if let Some(cached) = self
            .context
            .cache
            .get::<Vec<StoryWithDetails>>(&cache_key)
            .await
        {
            return Ok((cached, true));
        }

        let offset = (page - 1).max(0) * page_size;
        let stories = self
            .context
            .db
            .all_stories(Utc::now(), page_size, offset)
            .await
            .map_err(StoryError::Db)?;

        self.context
            .cache
            .set(&cache_key, &stories, ALL_STORIES_TTL)
            .await;

        Ok((stories, false))
    }

    /// Adds or flips a reaction. The database transaction upserts and
    /// re-aggregates; afterwards the marker's cached pages are patched in
    /// place instead of being reloaded.
    pub async fn react(
        &self,
        story_id: PrimaryKey,
        user_id: PrimaryKey,
        kind: ReactionKind,
    ) -> Result<ReactionCounts, StoryError> {
        let (marker_id, counts) = self
            .context
            .db
            .react_to_story(story_id, user_id, kind)
            .await?;

        self.patch_cached_reaction(marker_id, story_id, counts).await;

        Ok(counts)
    }

    /// Removes a reaction and patches the cached pages the same way.
    pub async fn remove_reaction(
        &self,
        story_id: PrimaryKey,
        user_id: PrimaryKey,
    ) -> Result<ReactionCounts, StoryError> {
        let (marker_id, counts) = self
            .context
            .db
            .remove_reaction(story_id, user_id)
            .await?;

        self.patch_cached_reaction(marker_id, story_id, counts).await;

        Ok(counts)
    }

    /// Deletes a story owned by the requester (or by an admin), removes the
    /// blob best-effort after commit, and invalidates the caches.
    pub async fn delete_story(
        &self,
        marker_id: PrimaryKey,
        story_id: PrimaryKey,
        user_id: PrimaryKey,
        is_admin: bool,
    ) -> Result<(), StoryError> {
        let (story_marker, owner) = self.context.db.story_owner(story_id).await?;

        // The story must belong to the marker in the path.
        if story_marker != marker_id {
            return Err(StoryError::StoryNotFound);
        }

        if owner != user_id && !is_admin {
            return Err(StoryError::Forbidden);
        }

        let photo_url = self.context.db.story_photo(story_id).await?;

        self.context.db.delete_story(story_id).await?;

        if let Err(err) = self.context.storage.delete(&photo_url).await {
            warn!("Failed to delete story blob {photo_url}: {err}");
        }

        self.invalidate_story_caches(marker_id).await;

        Ok(())
    }

    /// Files a report against a story. Reporting the same story twice from
    /// one user is a conflict.
    pub async fn report_story(
        &self,
        story_id: PrimaryKey,
        user_id: PrimaryKey,
        reason: &str,
    ) -> Result<(), StoryError> {
        let (_, _) = self.context.db.story_owner(story_id).await?;

        self.context
            .db
            .report_story(story_id, user_id, reason)
            .await?;

        Ok(())
    }

    /// Walks the marker's cached pages and rewrites the one entry whose
    /// counts changed, keeping everything else untouched.
    async fn patch_cached_reaction(
        &self,
        marker_id: PrimaryKey,
        story_id: PrimaryKey,
        counts: ReactionCounts,
    ) {
        let pattern = keys::stories_offsets_pattern(marker_id);

        for key in self.context.cache.keys_matching(&pattern).await {
            let Some(mut stories) = self
                .context
                .cache
                .get::<Vec<StoryWithDetails>>(&key)
                .await
            else {
                continue;
            };

            let mut modified = false;

            for story in stories.iter_mut() {
                if story.story_id == story_id {
                    story.thumbs_up = counts.thumbs_up;
                    story.thumbs_down = counts.thumbs_down;
                    story.user_liked = counts.user_liked;
                    modified = true;
                    break;
                }
            }

            if modified {
                self.context
                    .cache
                    .set(&key, &stories, PATCHED_PAGE_TTL)
                    .await;
            }
        }
    }

    async fn invalidate_story_caches(&self, marker_id: PrimaryKey) {
        self.context
            .cache
            .evict_pattern(&keys::stories_pattern(marker_id))
            .await;
        self.context
            .cache
            .evict_pattern(keys::ALL_STORIES_PATTERN)
            .await;
    }
}

fn validate_caption(caption: &str) -> Result<(), StoryError> {
    if caption.chars().count() > MAX_CAPTION_CHARS || contains_bad_word(caption) {
        return Err(StoryError::InvalidCaption);
    }

    Ok(())
}

fn encode_blurhash(photo_bytes: &[u8]) -> Result<String, StoryError> {
    let image = image::load_from_memory(photo_bytes).map_err(|_| StoryError::InvalidImage)?;
    let rgba = image.to_rgba8();

    let (cx, cy) = BLURHASH_COMPONENTS;

    blurhash::encode(cx, cy, rgba.width(), rgba.height(), rgba.as_raw())
        .map_err(|_| StoryError::InvalidImage)
}

/// TTL = the earliest expiry among the page's entries, floored at five
/// minutes. Empty pages get the floor.
fn page_ttl(stories: &[StoryWithDetails]) -> Duration {
    let now = Utc::now();

    let earliest = stories
        .iter()
        .map(|s| s.expires_at)
        .min()
        .map(|expires| (expires - now).num_seconds().max(0) as u64)
        .unwrap_or(0);

    Duration::from_secs(earliest).max(MIN_PAGE_TTL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn story_expiring_in(hours: i64) -> StoryWithDetails {
        let now = Utc::now();

        StoryWithDetails {
            story_id: 1,
            marker_id: 1,
            user_id: 1,
            username: "tester".to_string(),
            caption: "aaa".to_string(),
            photo_url: "http://storage.test/stories/1/a.jpg".to_string(),
            blurhash: None,
            address: None,
            created_at: now,
            expires_at: now + ChronoDuration::hours(hours),
            thumbs_up: 0,
            thumbs_down: 0,
            user_liked: false,
        }
    }

    #[test]
    fn test_caption_length_boundary() {
        assert!(validate_caption(&"a".repeat(30)).is_ok());
        assert!(validate_caption(&"a".repeat(31)).is_err());
        assert!(validate_caption("").is_ok());
    }

    #[test]
    fn test_page_ttl_uses_earliest_expiry() {
        let page = vec![story_expiring_in(20), story_expiring_in(2)];

        let ttl = page_ttl(&page);
        let two_hours = Duration::from_secs(2 * 60 * 60);

        assert!(
            ttl <= two_hours && ttl > two_hours - Duration::from_secs(60),
            "ttl follows the soonest-expiring story, got {ttl:?}"
        );
    }

    #[test]
    fn test_page_ttl_floors_at_five_minutes() {
        assert_eq!(page_ttl(&[]), Duration::from_secs(300), "empty page");

        let page = vec![story_expiring_in(0)];
        assert_eq!(
            page_ttl(&page),
            Duration::from_secs(300),
            "nearly-expired entries still get the floor"
        );
    }
}
