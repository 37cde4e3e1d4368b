use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

use pullup_core::cache::keys;
use pullup_core::db::{DatabaseError, PrimaryKey, UserRow};

use crate::DomainContext;

const PROFILE_TTL: Duration = Duration::from_secs(60 * 30);

/// Account-level operations that are not authentication.
pub struct UserService {
    context: DomainContext,
}

/// The cached profile blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: PrimaryKey,
    pub username: String,
    pub email: String,
    pub provider: Option<String>,
    pub role: String,
}

impl From<UserRow> for UserProfile {
    fn from(user: UserRow) -> Self {
        Self {
            user_id: user.user_id,
            username: user.username,
            email: user.email,
            provider: user.provider,
            role: user.role,
        }
    }
}

impl UserService {
    pub fn new(context: &DomainContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// The user's profile, cache-first.
    pub async fn profile(&self, user_id: PrimaryKey) -> Result<(UserProfile, bool), DatabaseError> {
        let cache_key = keys::user_profile(user_id);

        if let Some(cached) = self.context.cache.get::<UserProfile>(&cache_key).await {
            return Ok((cached, true));
        }

        let profile: UserProfile = self.context.db.user_by_id(user_id).await?.into();

        self.context
            .cache
            .set(&cache_key, &profile, PROFILE_TTL)
            .await;

        Ok((profile, false))
    }

    /// Renames the user and evicts their cached profile.
    pub async fn change_username(
        &self,
        user_id: PrimaryKey,
        username: &str,
    ) -> Result<UserProfile, DatabaseError> {
        let user = self.context.db.update_username(user_id, username).await?;

        self.context.cache.evict(&keys::user_profile(user_id)).await;

        Ok(user.into())
    }

    /// Deletes the account and its dependent rows. Markers are kept with a
    /// NULL owner; their photo blobs are removed best-effort afterwards.
    pub async fn delete_account(&self, user_id: PrimaryKey) -> Result<(), DatabaseError> {
        let photo_urls = self.context.db.delete_user_cascade(user_id).await?;

        for url in photo_urls {
            if let Err(err) = self.context.storage.delete(&url).await {
                warn!("Failed to delete blob {url}: {err}");
            }
        }

        self.context.cache.evict(&keys::user_profile(user_id)).await;
        self.context
            .cache
            .evict(&keys::user_favorites(user_id))
            .await;
        self.context
            .cache
            .evict_pattern(&keys::user_markers_pattern(user_id))
            .await;

        Ok(())
    }
}
