use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

mod data;
mod pg;

pub use data::*;
pub use pg::*;

pub type Result<T> = std::result::Result<T, DatabaseError>;

#[derive(Debug, Error)]
pub enum DatabaseError {
    /// An unknown or internal error happened with the database
    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send + Sync>),
    /// A resource already exists
    #[error("{resource} with {field} of value {value} already exists")]
    Conflict {
        /// The resource in question
        resource: String,
        /// The field that is conflicting
        field: String,
        /// The conflicting value
        value: String,
    },
    /// A resource in the database doesn't exist
    #[error("{resource}:{identifier} doesn't exist")]
    NotFound {
        resource: String,
        identifier: String,
    },
    /// A service-enforced cap was hit
    #[error("limit reached for {resource}")]
    LimitReached { resource: String },
}

impl DatabaseError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Represents a type that can fetch and mutate pullup data in a database
#[async_trait]
pub trait Database: Send + Sync {
    // Users
    async fn user_by_id(&self, user_id: PrimaryKey) -> Result<UserRow>;
    async fn website_user_by_email(&self, email: &str) -> Result<UserRow>;
    async fn user_by_provider(&self, provider: &str, provider_id: &str) -> Result<UserRow>;
    async fn create_website_user(&self, new_user: NewUser) -> Result<UserRow>;
    async fn upsert_oauth_user(&self, new_user: NewUser) -> Result<UserRow>;
    async fn update_username(&self, user_id: PrimaryKey, username: &str) -> Result<UserRow>;
    /// Removes a user and their dependent rows, setting retained markers'
    /// owner to NULL. Returns the photo URLs that should be deleted from the
    /// object store. The primordial admin (user id 1) is refused.
    async fn delete_user_cascade(&self, user_id: PrimaryKey) -> Result<Vec<String>>;

    // Email verification
    async fn upsert_email_verification(
        &self,
        email: &str,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;
    async fn confirm_email_verification(&self, email: &str, token: &str) -> Result<()>;
    async fn has_verified_email(&self, email: &str) -> Result<bool>;

    // Opaque tokens
    async fn create_token(
        &self,
        user_id: PrimaryKey,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;
    async fn auth_by_token(&self, token: &str) -> Result<AuthDetails>;
    async fn delete_token(&self, token: &str) -> Result<()>;
    async fn clear_expired_tokens(&self) -> Result<()>;

    // Password reset
    async fn upsert_reset_token(
        &self,
        user_id: PrimaryKey,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;
    async fn reset_password(&self, token: &str, new_hash: &str) -> Result<()>;

    // Markers
    async fn all_markers_simple(&self) -> Result<Vec<MarkerSimple>>;
    async fn new_markers(&self, limit: i64, offset: i64) -> Result<Vec<MarkerSimpleWithAddr>>;
    async fn marker_by_id(&self, marker_id: PrimaryKey) -> Result<MarkerRow>;
    async fn marker_detail(&self, marker_id: PrimaryKey) -> Result<MarkerDetailRow>;
    async fn photos_of_marker(&self, marker_id: PrimaryKey) -> Result<Vec<PhotoRow>>;
    async fn marker_address(&self, marker_id: PrimaryKey) -> Result<Option<String>>;
    async fn create_marker(&self, new_marker: NewMarker) -> Result<PrimaryKey>;
    /// Attaches uploaded photo rows to a marker in one transaction.
    async fn add_marker_photos(
        &self,
        marker_id: PrimaryKey,
        photo_urls: &[String],
    ) -> Result<()>;
    async fn update_marker_description(
        &self,
        marker_id: PrimaryKey,
        description: &str,
    ) -> Result<()>;
    /// Deletes the marker and its photo rows in one transaction, returning
    /// the photo URLs for best-effort blob deletion afterwards.
    async fn delete_marker_cascade(&self, marker_id: PrimaryKey) -> Result<Vec<String>>;
    async fn markers_by_user(
        &self,
        user_id: PrimaryKey,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<MarkerSimpleWithDescription>, i64)>;
    async fn markers_by_ids(&self, ids: &[PrimaryKey]) -> Result<Vec<MarkerSimpleWithAddr>>;
    async fn markers_in_bounding_box(
        &self,
        bounds: crate::util::BoundingBox,
    ) -> Result<Vec<MarkerSimpleWithAddr>>;

    // Facilities
    async fn facilities_of_marker(&self, marker_id: PrimaryKey) -> Result<Vec<FacilityRow>>;
    async fn replace_facilities(
        &self,
        marker_id: PrimaryKey,
        facilities: &[FacilityEntry],
    ) -> Result<()>;

    // Favorites and dislikes
    async fn add_favorite(
        &self,
        user_id: PrimaryKey,
        marker_id: PrimaryKey,
        max_favorites: i64,
    ) -> Result<()>;
    async fn remove_favorite(&self, user_id: PrimaryKey, marker_id: PrimaryKey) -> Result<()>;
    async fn favorites_of_user(
        &self,
        user_id: PrimaryKey,
    ) -> Result<Vec<MarkerSimpleWithDescription>>;
    async fn is_favorited(&self, user_id: PrimaryKey, marker_id: PrimaryKey) -> Result<bool>;
    async fn add_dislike(&self, user_id: PrimaryKey, marker_id: PrimaryKey) -> Result<()>;
    async fn remove_dislike(&self, user_id: PrimaryKey, marker_id: PrimaryKey) -> Result<()>;
    async fn is_disliked(&self, user_id: PrimaryKey, marker_id: PrimaryKey) -> Result<bool>;

    // Stories
    async fn active_story_exists(
        &self,
        marker_id: PrimaryKey,
        user_id: PrimaryKey,
        now: DateTime<Utc>,
    ) -> Result<bool>;
    async fn create_story(&self, new_story: NewStory) -> Result<PrimaryKey>;
    async fn stories_for_marker(
        &self,
        requester: Option<PrimaryKey>,
        marker_id: PrimaryKey,
        now: DateTime<Utc>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<StoryWithDetails>>;
    async fn all_stories(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<StoryWithDetails>>;
    async fn story_owner(&self, story_id: PrimaryKey) -> Result<(PrimaryKey, PrimaryKey)>;
    async fn story_photo(&self, story_id: PrimaryKey) -> Result<String>;
    async fn delete_story(&self, story_id: PrimaryKey) -> Result<()>;
    /// Upserts the reaction and re-aggregates the story's counts in the same
    /// transaction. Returns the story's marker id and the fresh counts.
    async fn react_to_story(
        &self,
        story_id: PrimaryKey,
        user_id: PrimaryKey,
        kind: ReactionKind,
    ) -> Result<(PrimaryKey, ReactionCounts)>;
    /// Deletes the reaction and re-aggregates in the same transaction.
    async fn remove_reaction(
        &self,
        story_id: PrimaryKey,
        user_id: PrimaryKey,
    ) -> Result<(PrimaryKey, ReactionCounts)>;
    async fn report_story(
        &self,
        story_id: PrimaryKey,
        user_id: PrimaryKey,
        reason: &str,
    ) -> Result<()>;

    // Comments
    /// Inserts a comment, enforcing the active-per-marker cap inside the
    /// insert statement itself so concurrent creates cannot exceed it.
    async fn create_comment(
        &self,
        marker_id: PrimaryKey,
        user_id: PrimaryKey,
        text: &str,
        max_per_marker: i64,
    ) -> Result<CommentWithUsername>;
    async fn update_comment(
        &self,
        comment_id: PrimaryKey,
        user_id: PrimaryKey,
        text: &str,
    ) -> Result<()>;
    async fn remove_comment(&self, comment_id: PrimaryKey, user_id: PrimaryKey) -> Result<()>;
    async fn comments_for_marker(
        &self,
        marker_id: PrimaryKey,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<CommentWithUsername>, i64)>;

    // Reports
    async fn create_report(&self, new_report: NewReport) -> Result<PrimaryKey>;
    async fn reports_for_marker(&self, marker_id: PrimaryKey) -> Result<Vec<ReportWithPhotos>>;
    async fn reports_by_user(&self, user_id: PrimaryKey) -> Result<Vec<ReportWithPhotos>>;
    async fn reports_for_owned_markers(
        &self,
        owner_id: PrimaryKey,
    ) -> Result<Vec<ReportWithPhotos>>;
    /// pending → approved. Moves the marker or, when the report says the
    /// spot no longer exists, deletes it. Returns photo URLs orphaned by a
    /// deletion so the caller can clean up blobs.
    async fn approve_report(&self, report_id: PrimaryKey) -> Result<ReportResolution>;
    /// pending → denied.
    async fn deny_report(&self, report_id: PrimaryKey) -> Result<()>;
}

/// Maps driver errors into [DatabaseError] without leaking sqlx everywhere.
pub(crate) trait IntoDatabaseError {
    fn any(self) -> DatabaseError;
    fn not_found_or(self, resource: &str, identifier: &str) -> DatabaseError;
    fn conflict_or(self, resource: &str, field: &str, value: &str) -> DatabaseError;
}
