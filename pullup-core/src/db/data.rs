use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub type PrimaryKey = i64;

/// The primordial admin account, which can never be deleted.
pub const ADMIN_USER_ID: PrimaryKey = 1;

pub mod roles {
    pub const USER: &str = "user";
    pub const ADMIN: &str = "admin";
    /// A recognized expert. Drives the `isChulbong` detail flag.
    pub const CHULBONG: &str = "chulbong";
}

pub mod providers {
    pub const WEBSITE: &str = "website";
    pub const GOOGLE: &str = "google";
    pub const KAKAO: &str = "kakao";
    pub const NAVER: &str = "naver";
    pub const GITHUB: &str = "github";
}

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRow {
    pub user_id: PrimaryKey,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub provider: Option<String>,
    #[serde(skip_serializing)]
    pub provider_id: Option<String>,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRow {
    pub fn is_admin(&self) -> bool {
        self.role == roles::ADMIN
    }

    /// Whether the role alone grants the expert flag.
    pub fn is_chulbong(&self) -> bool {
        self.role == roles::CHULBONG || self.role == roles::ADMIN
    }
}

#[derive(Debug)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub provider: String,
    pub provider_id: Option<String>,
}

/// What the auth middleware needs for one request, resolved from an opaque
/// token in a single join.
#[derive(Debug, Clone, FromRow)]
pub struct AuthDetails {
    pub user_id: PrimaryKey,
    pub username: String,
    pub email: String,
    pub role: String,
    pub expires_at: DateTime<Utc>,
}

impl AuthDetails {
    pub fn is_admin(&self) -> bool {
        self.role == roles::ADMIN
    }

    pub fn is_chulbong(&self) -> bool {
        self.role == roles::CHULBONG || self.role == roles::ADMIN
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerRow {
    pub marker_id: PrimaryKey,
    pub user_id: Option<PrimaryKey>,
    pub latitude: f64,
    pub longitude: f64,
    pub description: String,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The lightweight row returned by the bulk endpoint.
#[derive(Debug, Clone, Copy, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerSimple {
    pub marker_id: PrimaryKey,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerSimpleWithAddr {
    pub marker_id: PrimaryKey,
    pub latitude: f64,
    pub longitude: f64,
    pub address: Option<String>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerSimpleWithDescription {
    pub marker_id: PrimaryKey,
    pub latitude: f64,
    pub longitude: f64,
    pub description: String,
    pub address: Option<String>,
}

/// Marker detail scalar columns, joined with the owner's username and the
/// dislike count. Photos and per-user flags are assembled by the service.
#[derive(Debug, Clone, FromRow)]
pub struct MarkerDetailRow {
    pub marker_id: PrimaryKey,
    pub user_id: Option<PrimaryKey>,
    pub latitude: f64,
    pub longitude: f64,
    pub description: String,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub username: Option<String>,
    pub dislike_count: i64,
}

#[derive(Debug)]
pub struct NewMarker {
    pub user_id: PrimaryKey,
    pub latitude: f64,
    pub longitude: f64,
    pub description: String,
    pub address: Option<String>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoRow {
    pub photo_id: PrimaryKey,
    pub marker_id: PrimaryKey,
    pub photo_url: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilityRow {
    pub facility_id: i32,
    pub marker_id: PrimaryKey,
    pub quantity: i32,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilityEntry {
    pub facility_id: i32,
    pub quantity: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionKind {
    #[serde(rename = "thumbsup")]
    ThumbsUp,
    #[serde(rename = "thumbsdown")]
    ThumbsDown,
}

impl ReactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ThumbsUp => "thumbsup",
            Self::ThumbsDown => "thumbsdown",
        }
    }
}

#[derive(Debug)]
pub struct NewStory {
    pub marker_id: PrimaryKey,
    pub user_id: PrimaryKey,
    pub caption: String,
    pub photo_url: String,
    pub blurhash: String,
    pub address: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// A story row with its embedded aggregates, exactly the shape cached per
/// page. `user_liked` is computed against the requesting user.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryWithDetails {
    pub story_id: PrimaryKey,
    pub marker_id: PrimaryKey,
    pub user_id: PrimaryKey,
    pub username: String,
    pub caption: String,
    pub photo_url: String,
    pub blurhash: Option<String>,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub thumbs_up: i64,
    pub thumbs_down: i64,
    pub user_liked: bool,
}

#[derive(Debug, Clone, Copy, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionCounts {
    pub thumbs_up: i64,
    pub thumbs_down: i64,
    pub user_liked: bool,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentWithUsername {
    pub comment_id: PrimaryKey,
    pub marker_id: PrimaryKey,
    pub user_id: PrimaryKey,
    pub comment_text: String,
    pub posted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub username: Option<String>,
}

pub mod report_status {
    pub const PENDING: &str = "pending";
    pub const APPROVED: &str = "approved";
    pub const DENIED: &str = "denied";
}

#[derive(Debug, Clone, FromRow)]
pub struct ReportRow {
    pub report_id: PrimaryKey,
    pub marker_id: PrimaryKey,
    pub user_id: Option<PrimaryKey>,
    pub latitude: f64,
    pub longitude: f64,
    pub new_latitude: f64,
    pub new_longitude: f64,
    pub description: String,
    pub status: String,
    pub does_exist: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportWithPhotos {
    pub report_id: PrimaryKey,
    pub marker_id: PrimaryKey,
    pub user_id: Option<PrimaryKey>,
    pub latitude: f64,
    pub longitude: f64,
    pub new_latitude: f64,
    pub new_longitude: f64,
    pub description: String,
    pub status: String,
    pub does_exist: bool,
    pub created_at: DateTime<Utc>,
    pub address: Option<String>,
    pub photo_urls: Vec<String>,
}

#[derive(Debug)]
pub struct NewReport {
    pub marker_id: PrimaryKey,
    pub user_id: Option<PrimaryKey>,
    pub latitude: f64,
    pub longitude: f64,
    pub new_latitude: f64,
    pub new_longitude: f64,
    pub description: String,
    pub does_exist: bool,
    pub photo_urls: Vec<String>,
}

/// What approving a report did to the marker.
#[derive(Debug)]
pub enum ReportResolution {
    /// The marker was moved to the proposed location.
    Moved,
    /// The marker no longer exists and was deleted. The contained photo
    /// URLs should be removed from the object store, best-effort.
    Removed { photo_urls: Vec<String> },
}
