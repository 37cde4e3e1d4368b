use std::time::Duration;

use pullup_core::cache::keys;
use pullup_core::db::{MarkerSimpleWithDescription, PrimaryKey};

use super::MarkerError;
use crate::DomainContext;

const FAVORITES_TTL: Duration = Duration::from_secs(60 * 10);

/// Favorites and dislikes.
pub struct MarkerInteractions {
    context: DomainContext,
}

impl MarkerInteractions {
    pub fn new(context: &DomainContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Adds a favorite, enforcing the per-user cap, then patches the user's
    /// cached favorites list in place rather than reloading it.
    pub async fn add_favorite(
        &self,
        user_id: PrimaryKey,
        marker_id: PrimaryKey,
    ) -> Result<(), MarkerError> {
        self.context
            .db
            .add_favorite(user_id, marker_id, self.context.config.max_favorites)
            .await?;

        let cache_key = keys::user_favorites(user_id);

        if let Some(mut cached) = self
            .context
            .cache
            .get::<Vec<MarkerSimpleWithDescription>>(&cache_key)
            .await
        {
            if let Ok(marker) = self.context.db.marker_by_id(marker_id).await {
                cached.insert(
                    0,
                    MarkerSimpleWithDescription {
                        marker_id: marker.marker_id,
                        latitude: marker.latitude,
                        longitude: marker.longitude,
                        description: marker.description,
                        address: marker.address,
                    },
                );

                self.context
                    .cache
                    .set(&cache_key, &cached, FAVORITES_TTL)
                    .await;
            }
        }

        Ok(())
    }

    /// Removes a favorite and patches the single row out of the cached list.
    pub async fn remove_favorite(
        &self,
        user_id: PrimaryKey,
        marker_id: PrimaryKey,
    ) -> Result<(), MarkerError> {
        self.context
            .db
            .remove_favorite(user_id, marker_id)
            .await
            .map_err(MarkerError::Db)?;

        let cache_key = keys::user_favorites(user_id);

        if let Some(mut cached) = self
            .context
            .cache
            .get::<Vec<MarkerSimpleWithDescription>>(&cache_key)
            .await
        {
            cached.retain(|m| m.marker_id != marker_id);
            self.context
                .cache
                .set(&cache_key, &cached, FAVORITES_TTL)
                .await;
        }

        Ok(())
    }

    /// The user's favorites, cache-first.
    pub async fn favorites(
        &self,
        user_id: PrimaryKey,
    ) -> Result<(Vec<MarkerSimpleWithDescription>, bool), MarkerError> {
        let cache_key = keys::user_favorites(user_id);

        if let Some(cached) = self
            .context
            .cache
            .get::<Vec<MarkerSimpleWithDescription>>(&cache_key)
            .await
        {
            return Ok((cached, true));
        }

        let favorites = self
            .context
            .db
            .favorites_of_user(user_id)
            .await
            .map_err(MarkerError::Db)?;

        self.context
            .cache
            .set(&cache_key, &favorites, FAVORITES_TTL)
            .await;

        Ok((favorites, false))
    }

    /// Idempotent dislike per (user, marker).
    pub async fn add_dislike(
        &self,
        user_id: PrimaryKey,
        marker_id: PrimaryKey,
    ) -> Result<(), MarkerError> {
        self.context
            .db
            .add_dislike(user_id, marker_id)
            .await
            .map_err(MarkerError::Db)
    }

    /// Undoes a dislike; undoing one that was never left is not-found.
    pub async fn remove_dislike(
        &self,
        user_id: PrimaryKey,
        marker_id: PrimaryKey,
    ) -> Result<(), MarkerError> {
        self.context
            .db
            .remove_dislike(user_id, marker_id)
            .await
            .map_err(MarkerError::Db)
    }

    pub async fn is_disliked(
        &self,
        user_id: PrimaryKey,
        marker_id: PrimaryKey,
    ) -> Result<bool, MarkerError> {
        self.context
            .db
            .is_disliked(user_id, marker_id)
            .await
            .map_err(MarkerError::Db)
    }
}
