use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, Error as SqlxError, PgPool};

use super::{
    AuthDetails, CommentWithUsername, Database, DatabaseError, FacilityEntry, FacilityRow,
    IntoDatabaseError, MarkerDetailRow, MarkerRow, MarkerSimple, MarkerSimpleWithAddr,
    MarkerSimpleWithDescription, NewMarker, NewReport, NewStory, NewUser, PhotoRow, PrimaryKey,
    ReactionCounts, ReactionKind, ReportResolution, ReportRow, ReportWithPhotos, Result,
    StoryWithDetails, UserRow, ADMIN_USER_ID,
};

const STORY_AGGREGATES: &str = "
    (SELECT COUNT(*) FROM reactions r2
     WHERE r2.story_id = s.story_id AND r2.reaction_type = 'thumbsup') AS thumbs_up,
    (SELECT COUNT(*) FROM reactions r3
     WHERE r3.story_id = s.story_id AND r3.reaction_type = 'thumbsdown') AS thumbs_down,
    EXISTS (SELECT 1 FROM reactions r4
            WHERE r4.story_id = s.story_id
              AND r4.user_id = $1
              AND r4.reaction_type = 'thumbsup') AS user_liked";

/// A postgres database implementation for pullup
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    pub async fn new(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .map_err(|e| e.any())?;

        Ok(Self { pool })
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn report_photos(&self, report_id: PrimaryKey) -> Result<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            "SELECT photo_url FROM report_photos WHERE report_id = $1",
        )
        .bind(report_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())
    }

    async fn assemble_reports(&self, rows: Vec<ReportJoinedRow>) -> Result<Vec<ReportWithPhotos>> {
        let mut reports = Vec::with_capacity(rows.len());

        for row in rows {
            let photo_urls = self.report_photos(row.report_id).await?;

            reports.push(ReportWithPhotos {
                report_id: row.report_id,
                marker_id: row.marker_id,
                user_id: row.user_id,
                latitude: row.latitude,
                longitude: row.longitude,
                new_latitude: row.new_latitude,
                new_longitude: row.new_longitude,
                description: row.description,
                status: row.status,
                does_exist: row.does_exist,
                created_at: row.created_at,
                address: row.address,
                photo_urls,
            });
        }

        Ok(reports)
    }
}

#[derive(sqlx::FromRow)]
struct ReportJoinedRow {
    report_id: PrimaryKey,
    marker_id: PrimaryKey,
    user_id: Option<PrimaryKey>,
    latitude: f64,
    longitude: f64,
    new_latitude: f64,
    new_longitude: f64,
    description: String,
    status: String,
    does_exist: bool,
    created_at: DateTime<Utc>,
    address: Option<String>,
}

const SELECT_REPORTS: &str = "
    SELECT r.report_id, r.marker_id, r.user_id, r.latitude, r.longitude,
           r.new_latitude, r.new_longitude, r.description, r.status,
           r.does_exist, r.created_at, m.address
    FROM reports r
    LEFT JOIN markers m ON r.marker_id = m.marker_id";

#[async_trait]
impl Database for PgDatabase {
    async fn user_by_id(&self, user_id: PrimaryKey) -> Result<UserRow> {
        sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("user", "id"))
    }

    async fn website_user_by_email(&self, email: &str) -> Result<UserRow> {
        sqlx::query_as::<_, UserRow>(
            "SELECT * FROM users WHERE email = $1 AND provider = 'website'",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.not_found_or("user", "email"))
    }

    async fn user_by_provider(&self, provider: &str, provider_id: &str) -> Result<UserRow> {
        sqlx::query_as::<_, UserRow>(
            "SELECT * FROM users WHERE provider = $1 AND provider_id = $2",
        )
        .bind(provider)
        .bind(provider_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.not_found_or("user", "provider id"))
    }

    async fn create_website_user(&self, new_user: NewUser) -> Result<UserRow> {
        let mut tx = self.pool.begin().await.map_err(|e| e.any())?;

        let user = sqlx::query_as::<_, UserRow>(
            "INSERT INTO users (username, email, password_hash, provider, provider_id, role)
             VALUES ($1, $2, $3, $4, $5, 'user')
             RETURNING *",
        )
        .bind(&new_user.username)
        .bind(&new_user.email)
        .bind(&new_user.password_hash)
        .bind(&new_user.provider)
        .bind(&new_user.provider_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| e.conflict_or("user", "username", &new_user.username))?;

        // The verification that gated this signup is spent now.
        sqlx::query("DELETE FROM email_verifications WHERE email = $1 AND verified = TRUE")
            .bind(&new_user.email)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.any())?;

        tx.commit().await.map_err(|e| e.any())?;

        Ok(user)
    }

    async fn upsert_oauth_user(&self, new_user: NewUser) -> Result<UserRow> {
        let provider_id = new_user.provider_id.clone().unwrap_or_default();

        match self
            .user_by_provider(&new_user.provider, &provider_id)
            .await
        {
            Ok(user) => return Ok(user),
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }

        let inserted = sqlx::query_as::<_, UserRow>(
            "INSERT INTO users (username, email, password_hash, provider, provider_id, role)
             VALUES ($1, $2, NULL, $3, $4, 'user')
             RETURNING *",
        )
        .bind(&new_user.username)
        .bind(&new_user.email)
        .bind(&new_user.provider)
        .bind(&new_user.provider_id)
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok(user) => Ok(user),
            // Another request won the insert race, the lookup now succeeds.
            Err(SqlxError::Database(db)) if db.is_unique_violation() => {
                self.user_by_provider(&new_user.provider, &provider_id).await
            }
            Err(e) => Err(e.any()),
        }
    }

    async fn update_username(&self, user_id: PrimaryKey, username: &str) -> Result<UserRow> {
        sqlx::query_as::<_, UserRow>(
            "UPDATE users SET username = $1, updated_at = now() WHERE user_id = $2 RETURNING *",
        )
        .bind(username)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if matches!(e, SqlxError::RowNotFound) {
                e.not_found_or("user", "id")
            } else {
                e.conflict_or("user", "username", username)
            }
        })
    }

    async fn delete_user_cascade(&self, user_id: PrimaryKey) -> Result<Vec<String>> {
        if user_id == ADMIN_USER_ID {
            return Err(DatabaseError::Conflict {
                resource: "user".to_string(),
                field: "user_id".to_string(),
                value: user_id.to_string(),
            });
        }

        let mut tx = self.pool.begin().await.map_err(|e| e.any())?;

        let photo_urls = sqlx::query_scalar::<_, String>(
            "SELECT photo_url FROM photos
             WHERE marker_id IN (SELECT marker_id FROM markers WHERE user_id = $1)",
        )
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| e.any())?;

        sqlx::query(
            "DELETE FROM photos
             WHERE marker_id IN (SELECT marker_id FROM markers WHERE user_id = $1)",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| e.any())?;

        // Markers are retained, owner goes NULL.
        sqlx::query("UPDATE markers SET user_id = NULL WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.any())?;

        sqlx::query("DELETE FROM opaque_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.any())?;

        let deleted = sqlx::query("DELETE FROM users WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.any())?;

        if deleted.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                resource: "user".to_string(),
                identifier: user_id.to_string(),
            });
        }

        tx.commit().await.map_err(|e| e.any())?;

        Ok(photo_urls)
    }

    async fn upsert_email_verification(
        &self,
        email: &str,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO email_verifications (email, token, verified, expires_at)
             VALUES ($1, $2, FALSE, $3)
             ON CONFLICT (email)
             DO UPDATE SET token = EXCLUDED.token, verified = FALSE,
                           expires_at = EXCLUDED.expires_at",
        )
        .bind(email)
        .bind(token)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| e.any())
        .map(|_| ())
    }

    async fn confirm_email_verification(&self, email: &str, token: &str) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE email_verifications SET verified = TRUE
             WHERE email = $1 AND token = $2 AND expires_at > now()",
        )
        .bind(email)
        .bind(token)
        .execute(&self.pool)
        .await
        .map_err(|e| e.any())?;

        if updated.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                resource: "email verification".to_string(),
                identifier: email.to_string(),
            });
        }

        Ok(())
    }

    async fn has_verified_email(&self, email: &str) -> Result<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM email_verifications
             WHERE email = $1 AND verified = TRUE AND expires_at > now())",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())
    }

    async fn create_token(
        &self,
        user_id: PrimaryKey,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO opaque_tokens (opaque_token, user_id, expires_at) VALUES ($1, $2, $3)",
        )
        .bind(token)
        .bind(user_id)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| e.conflict_or("token", "value", token))
        .map(|_| ())
    }

    async fn auth_by_token(&self, token: &str) -> Result<AuthDetails> {
        sqlx::query_as::<_, AuthDetails>(
            "SELECT u.user_id, u.username, u.email, u.role, ot.expires_at
             FROM opaque_tokens ot
             JOIN users u ON ot.user_id = u.user_id
             WHERE ot.opaque_token = $1",
        )
        .bind(token)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.not_found_or("token", "value"))
    }

    async fn delete_token(&self, token: &str) -> Result<()> {
        sqlx::query("DELETE FROM opaque_tokens WHERE opaque_token = $1")
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())
            .map(|_| ())
    }

    async fn clear_expired_tokens(&self) -> Result<()> {
        sqlx::query("DELETE FROM opaque_tokens WHERE expires_at < now()")
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())
            .map(|_| ())
    }

    async fn upsert_reset_token(
        &self,
        user_id: PrimaryKey,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO password_reset_tokens (user_id, token, expires_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (user_id)
             DO UPDATE SET token = EXCLUDED.token, expires_at = EXCLUDED.expires_at",
        )
        .bind(user_id)
        .bind(token)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| e.any())
        .map(|_| ())
    }

    async fn reset_password(&self, token: &str, new_hash: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| e.any())?;

        let user_id = sqlx::query_scalar::<_, PrimaryKey>(
            "SELECT user_id FROM password_reset_tokens WHERE token = $1 AND expires_at > now()",
        )
        .bind(token)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| e.not_found_or("reset token", "value"))?;

        sqlx::query("UPDATE users SET password_hash = $1, updated_at = now() WHERE user_id = $2")
            .bind(new_hash)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.any())?;

        sqlx::query("DELETE FROM password_reset_tokens WHERE token = $1")
            .bind(token)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.any())?;

        tx.commit().await.map_err(|e| e.any())
    }

    async fn all_markers_simple(&self) -> Result<Vec<MarkerSimple>> {
        sqlx::query_as::<_, MarkerSimple>("SELECT marker_id, latitude, longitude FROM markers")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| e.any())
    }

    async fn new_markers(&self, limit: i64, offset: i64) -> Result<Vec<MarkerSimpleWithAddr>> {
        sqlx::query_as::<_, MarkerSimpleWithAddr>(
            "SELECT marker_id, latitude, longitude, address FROM markers
             ORDER BY created_at DESC
             LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())
    }

    async fn marker_by_id(&self, marker_id: PrimaryKey) -> Result<MarkerRow> {
        sqlx::query_as::<_, MarkerRow>("SELECT * FROM markers WHERE marker_id = $1")
            .bind(marker_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("marker", "id"))
    }

    async fn marker_detail(&self, marker_id: PrimaryKey) -> Result<MarkerDetailRow> {
        sqlx::query_as::<_, MarkerDetailRow>(
            "SELECT m.marker_id, m.user_id, m.latitude, m.longitude, m.description,
                    m.address, m.created_at, m.updated_at, u.username,
                    COUNT(d.user_id) AS dislike_count
             FROM markers m
             LEFT JOIN users u ON m.user_id = u.user_id
             LEFT JOIN marker_dislikes d ON m.marker_id = d.marker_id
             WHERE m.marker_id = $1
             GROUP BY m.marker_id, u.username",
        )
        .bind(marker_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.not_found_or("marker", "id"))
    }

    async fn photos_of_marker(&self, marker_id: PrimaryKey) -> Result<Vec<PhotoRow>> {
        sqlx::query_as::<_, PhotoRow>("SELECT * FROM photos WHERE marker_id = $1")
            .bind(marker_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| e.any())
    }

    async fn marker_address(&self, marker_id: PrimaryKey) -> Result<Option<String>> {
        sqlx::query_scalar::<_, Option<String>>(
            "SELECT address FROM markers WHERE marker_id = $1",
        )
        .bind(marker_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.not_found_or("marker", "id"))
    }

    async fn create_marker(&self, new_marker: NewMarker) -> Result<PrimaryKey> {
        sqlx::query_scalar::<_, PrimaryKey>(
            "INSERT INTO markers (user_id, latitude, longitude, description, address)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING marker_id",
        )
        .bind(new_marker.user_id)
        .bind(new_marker.latitude)
        .bind(new_marker.longitude)
        .bind(&new_marker.description)
        .bind(&new_marker.address)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())
    }

    async fn add_marker_photos(
        &self,
        marker_id: PrimaryKey,
        photo_urls: &[String],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| e.any())?;

        for url in photo_urls {
            sqlx::query("INSERT INTO photos (marker_id, photo_url) VALUES ($1, $2)")
                .bind(marker_id)
                .bind(url)
                .execute(&mut *tx)
                .await
                .map_err(|e| e.any())?;
        }

        tx.commit().await.map_err(|e| e.any())
    }

    async fn update_marker_description(
        &self,
        marker_id: PrimaryKey,
        description: &str,
    ) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE markers SET description = $1, updated_at = now() WHERE marker_id = $2",
        )
        .bind(description)
        .bind(marker_id)
        .execute(&self.pool)
        .await
        .map_err(|e| e.any())?;

        if updated.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                resource: "marker".to_string(),
                identifier: marker_id.to_string(),
            });
        }

        Ok(())
    }

    async fn delete_marker_cascade(&self, marker_id: PrimaryKey) -> Result<Vec<String>> {
        let mut tx = self.pool.begin().await.map_err(|e| e.any())?;

        let photo_urls = sqlx::query_scalar::<_, String>(
            "SELECT photo_url FROM photos WHERE marker_id = $1",
        )
        .bind(marker_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| e.any())?;

        sqlx::query("DELETE FROM photos WHERE marker_id = $1")
            .bind(marker_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.any())?;

        let deleted = sqlx::query("DELETE FROM markers WHERE marker_id = $1")
            .bind(marker_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.any())?;

        if deleted.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                resource: "marker".to_string(),
                identifier: marker_id.to_string(),
            });
        }

        tx.commit().await.map_err(|e| e.any())?;

        Ok(photo_urls)
    }

    async fn markers_by_user(
        &self,
        user_id: PrimaryKey,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<MarkerSimpleWithDescription>, i64)> {
        let markers = sqlx::query_as::<_, MarkerSimpleWithDescription>(
            "SELECT marker_id, latitude, longitude, description, address
             FROM markers
             WHERE user_id = $1
             ORDER BY created_at DESC
             LIMIT $2 OFFSET $3",
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())?;

        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM markers WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())?;

        Ok((markers, total))
    }

    async fn markers_by_ids(&self, ids: &[PrimaryKey]) -> Result<Vec<MarkerSimpleWithAddr>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        sqlx::query_as::<_, MarkerSimpleWithAddr>(
            "SELECT marker_id, latitude, longitude, address FROM markers
             WHERE marker_id = ANY($1)",
        )
        .bind(ids.to_vec())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())
    }

    async fn markers_in_bounding_box(
        &self,
        bounds: crate::util::BoundingBox,
    ) -> Result<Vec<MarkerSimpleWithAddr>> {
        sqlx::query_as::<_, MarkerSimpleWithAddr>(
            "SELECT marker_id, latitude, longitude, address FROM markers
             WHERE latitude BETWEEN $1 AND $2
               AND longitude BETWEEN $3 AND $4",
        )
        .bind(bounds.min_latitude)
        .bind(bounds.max_latitude)
        .bind(bounds.min_longitude)
        .bind(bounds.max_longitude)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())
    }

    async fn facilities_of_marker(&self, marker_id: PrimaryKey) -> Result<Vec<FacilityRow>> {
        sqlx::query_as::<_, FacilityRow>(
            "SELECT facility_id, marker_id, quantity FROM facilities WHERE marker_id = $1",
        )
        .bind(marker_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())
    }

    async fn replace_facilities(
        &self,
        marker_id: PrimaryKey,
        facilities: &[FacilityEntry],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| e.any())?;

        sqlx::query("DELETE FROM facilities WHERE marker_id = $1")
            .bind(marker_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.any())?;

        for facility in facilities {
            sqlx::query(
                "INSERT INTO facilities (facility_id, marker_id, quantity) VALUES ($1, $2, $3)",
            )
            .bind(facility.facility_id)
            .bind(marker_id)
            .bind(facility.quantity)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.any())?;
        }

        tx.commit().await.map_err(|e| e.any())
    }

    async fn add_favorite(
        &self,
        user_id: PrimaryKey,
        marker_id: PrimaryKey,
        max_favorites: i64,
    ) -> Result<()> {
        // The cap lives inside the insert so concurrent adds cannot pass it.
        let inserted = sqlx::query_scalar::<_, PrimaryKey>(
            "INSERT INTO favorites (user_id, marker_id)
             SELECT $1, $2
             WHERE (SELECT COUNT(*) FROM favorites WHERE user_id = $1) < $3
             RETURNING marker_id",
        )
        .bind(user_id)
        .bind(marker_id)
        .bind(max_favorites)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| e.conflict_or("favorite", "marker", &marker_id.to_string()))?;

        if inserted.is_none() {
            return Err(DatabaseError::LimitReached {
                resource: "favorites".to_string(),
            });
        }

        Ok(())
    }

    async fn remove_favorite(&self, user_id: PrimaryKey, marker_id: PrimaryKey) -> Result<()> {
        let deleted = sqlx::query("DELETE FROM favorites WHERE user_id = $1 AND marker_id = $2")
            .bind(user_id)
            .bind(marker_id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())?;

        if deleted.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                resource: "favorite".to_string(),
                identifier: marker_id.to_string(),
            });
        }

        Ok(())
    }

    async fn favorites_of_user(
        &self,
        user_id: PrimaryKey,
    ) -> Result<Vec<MarkerSimpleWithDescription>> {
        sqlx::query_as::<_, MarkerSimpleWithDescription>(
            "SELECT m.marker_id, m.latitude, m.longitude, m.description, m.address
             FROM favorites f
             JOIN markers m ON f.marker_id = m.marker_id
             WHERE f.user_id = $1
             ORDER BY m.created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())
    }

    async fn is_favorited(&self, user_id: PrimaryKey, marker_id: PrimaryKey) -> Result<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM favorites WHERE user_id = $1 AND marker_id = $2)",
        )
        .bind(user_id)
        .bind(marker_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())
    }

    async fn add_dislike(&self, user_id: PrimaryKey, marker_id: PrimaryKey) -> Result<()> {
        sqlx::query(
            "INSERT INTO marker_dislikes (user_id, marker_id)
             VALUES ($1, $2)
             ON CONFLICT (user_id, marker_id) DO UPDATE SET disliked_at = now()",
        )
        .bind(user_id)
        .bind(marker_id)
        .execute(&self.pool)
        .await
        .map_err(|e| e.any())
        .map(|_| ())
    }

    async fn remove_dislike(&self, user_id: PrimaryKey, marker_id: PrimaryKey) -> Result<()> {
        let deleted =
            sqlx::query("DELETE FROM marker_dislikes WHERE user_id = $1 AND marker_id = $2")
                .bind(user_id)
                .bind(marker_id)
                .execute(&self.pool)
                .await
                .map_err(|e| e.any())?;

        if deleted.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                resource: "dislike".to_string(),
                identifier: marker_id.to_string(),
            });
        }

        Ok(())
    }

    async fn is_disliked(&self, user_id: PrimaryKey, marker_id: PrimaryKey) -> Result<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM marker_dislikes WHERE user_id = $1 AND marker_id = $2)",
        )
        .bind(user_id)
        .bind(marker_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())
    }

    async fn active_story_exists(
        &self,
        marker_id: PrimaryKey,
        user_id: PrimaryKey,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM stories
             WHERE marker_id = $1 AND user_id = $2 AND expires_at > $3)",
        )
        .bind(marker_id)
        .bind(user_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())
    }

    async fn create_story(&self, new_story: NewStory) -> Result<PrimaryKey> {
        sqlx::query_scalar::<_, PrimaryKey>(
            "INSERT INTO stories (marker_id, user_id, caption, photo_url, blurhash, address, expires_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING story_id",
        )
        .bind(new_story.marker_id)
        .bind(new_story.user_id)
        .bind(&new_story.caption)
        .bind(&new_story.photo_url)
        .bind(&new_story.blurhash)
        .bind(&new_story.address)
        .bind(new_story.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())
    }

    async fn stories_for_marker(
        &self,
        requester: Option<PrimaryKey>,
        marker_id: PrimaryKey,
        now: DateTime<Utc>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<StoryWithDetails>> {
        let query = format!(
            "SELECT s.story_id, s.marker_id, s.user_id, u.username, s.caption,
                    s.photo_url, s.blurhash, s.address, s.created_at, s.expires_at,
                    {STORY_AGGREGATES}
             FROM stories s
             JOIN users u ON s.user_id = u.user_id
             WHERE s.marker_id = $2 AND s.expires_at > $3
             ORDER BY s.created_at DESC
             LIMIT $4 OFFSET $5"
        );

        sqlx::query_as::<_, StoryWithDetails>(&query)
            .bind(requester)
            .bind(marker_id)
            .bind(now)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| e.any())
    }

    async fn all_stories(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<StoryWithDetails>> {
        let query = format!(
            "SELECT s.story_id, s.marker_id, s.user_id, u.username, s.caption,
                    s.photo_url, s.blurhash, s.address, s.created_at, s.expires_at,
                    {STORY_AGGREGATES}
             FROM stories s
             JOIN users u ON s.user_id = u.user_id
             WHERE s.expires_at > $2
             ORDER BY s.created_at DESC
             LIMIT $3 OFFSET $4"
        );

        sqlx::query_as::<_, StoryWithDetails>(&query)
            .bind(None::<PrimaryKey>)
            .bind(now)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| e.any())
    }

    async fn story_owner(&self, story_id: PrimaryKey) -> Result<(PrimaryKey, PrimaryKey)> {
        sqlx::query_as::<_, (PrimaryKey, PrimaryKey)>(
            "SELECT marker_id, user_id FROM stories WHERE story_id = $1",
        )
        .bind(story_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.not_found_or("story", "id"))
    }

    async fn story_photo(&self, story_id: PrimaryKey) -> Result<String> {
        sqlx::query_scalar::<_, String>("SELECT photo_url FROM stories WHERE story_id = $1")
            .bind(story_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("story", "id"))
    }

    async fn delete_story(&self, story_id: PrimaryKey) -> Result<()> {
        let deleted = sqlx::query("DELETE FROM stories WHERE story_id = $1")
            .bind(story_id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())?;

        if deleted.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                resource: "story".to_string(),
                identifier: story_id.to_string(),
            });
        }

        Ok(())
    }

    async fn react_to_story(
        &self,
        story_id: PrimaryKey,
        user_id: PrimaryKey,
        kind: ReactionKind,
    ) -> Result<(PrimaryKey, ReactionCounts)> {
        let mut tx = self.pool.begin().await.map_err(|e| e.any())?;

        let marker_id = sqlx::query_scalar::<_, PrimaryKey>(
            "SELECT marker_id FROM stories WHERE story_id = $1",
        )
        .bind(story_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| e.not_found_or("story", "id"))?;

        // The primary key is (story, user): reacting again flips the kind.
        sqlx::query(
            "INSERT INTO reactions (story_id, user_id, reaction_type)
             VALUES ($1, $2, $3)
             ON CONFLICT (story_id, user_id)
             DO UPDATE SET reaction_type = EXCLUDED.reaction_type",
        )
        .bind(story_id)
        .bind(user_id)
        .bind(kind.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| e.any())?;

        let counts = aggregate_reactions(&mut tx, story_id, user_id).await?;

        tx.commit().await.map_err(|e| e.any())?;

        Ok((marker_id, counts))
    }

    async fn remove_reaction(
        &self,
        story_id: PrimaryKey,
        user_id: PrimaryKey,
    ) -> Result<(PrimaryKey, ReactionCounts)> {
        let mut tx = self.pool.begin().await.map_err(|e| e.any())?;

        let marker_id = sqlx::query_scalar::<_, PrimaryKey>(
            "SELECT marker_id FROM stories WHERE story_id = $1",
        )
        .bind(story_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| e.not_found_or("story", "id"))?;

        sqlx::query("DELETE FROM reactions WHERE story_id = $1 AND user_id = $2")
            .bind(story_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.any())?;

        let counts = aggregate_reactions(&mut tx, story_id, user_id).await?;

        tx.commit().await.map_err(|e| e.any())?;

        Ok((marker_id, counts))
    }

    async fn report_story(
        &self,
        story_id: PrimaryKey,
        user_id: PrimaryKey,
        reason: &str,
    ) -> Result<()> {
        sqlx::query("INSERT INTO story_reports (story_id, user_id, reason) VALUES ($1, $2, $3)")
            .bind(story_id)
            .bind(user_id)
            .bind(reason)
            .execute(&self.pool)
            .await
            .map_err(|e| e.conflict_or("story report", "story", &story_id.to_string()))
            .map(|_| ())
    }

    async fn create_comment(
        &self,
        marker_id: PrimaryKey,
        user_id: PrimaryKey,
        text: &str,
        max_per_marker: i64,
    ) -> Result<CommentWithUsername> {
        let marker_exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM markers WHERE marker_id = $1)",
        )
        .bind(marker_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())?;

        if !marker_exists {
            return Err(DatabaseError::NotFound {
                resource: "marker".to_string(),
                identifier: marker_id.to_string(),
            });
        }

        let inserted = sqlx::query_as::<_, CommentWithUsername>(
            "INSERT INTO comments (marker_id, user_id, comment_text)
             SELECT $1, $2, $3
             WHERE (SELECT COUNT(*) FROM comments
                    WHERE marker_id = $1 AND user_id = $2 AND deleted_at IS NULL) < $4
             RETURNING comment_id, marker_id, user_id, comment_text, posted_at, updated_at,
                       (SELECT username FROM users WHERE user_id = $2) AS username",
        )
        .bind(marker_id)
        .bind(user_id)
        .bind(text)
        .bind(max_per_marker)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| e.any())?;

        inserted.ok_or(DatabaseError::LimitReached {
            resource: "comments per marker".to_string(),
        })
    }

    async fn update_comment(
        &self,
        comment_id: PrimaryKey,
        user_id: PrimaryKey,
        text: &str,
    ) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE comments SET comment_text = $1, updated_at = now()
             WHERE comment_id = $2 AND user_id = $3 AND deleted_at IS NULL",
        )
        .bind(text)
        .bind(comment_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| e.any())?;

        if updated.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                resource: "comment".to_string(),
                identifier: comment_id.to_string(),
            });
        }

        Ok(())
    }

    async fn remove_comment(&self, comment_id: PrimaryKey, user_id: PrimaryKey) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE comments SET deleted_at = now()
             WHERE comment_id = $1 AND user_id = $2 AND deleted_at IS NULL",
        )
        .bind(comment_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| e.any())?;

        if updated.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                resource: "comment".to_string(),
                identifier: comment_id.to_string(),
            });
        }

        Ok(())
    }

    async fn comments_for_marker(
        &self,
        marker_id: PrimaryKey,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<CommentWithUsername>, i64)> {
        let comments = sqlx::query_as::<_, CommentWithUsername>(
            "SELECT c.comment_id, c.marker_id, c.user_id, c.comment_text,
                    c.posted_at, c.updated_at, u.username
             FROM comments c
             LEFT JOIN users u ON c.user_id = u.user_id
             WHERE c.marker_id = $1 AND c.deleted_at IS NULL
             ORDER BY c.posted_at DESC
             LIMIT $2 OFFSET $3",
        )
        .bind(marker_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())?;

        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM comments WHERE marker_id = $1 AND deleted_at IS NULL",
        )
        .bind(marker_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())?;

        Ok((comments, total))
    }

    async fn create_report(&self, new_report: NewReport) -> Result<PrimaryKey> {
        let mut tx = self.pool.begin().await.map_err(|e| e.any())?;

        let marker_exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM markers WHERE marker_id = $1)",
        )
        .bind(new_report.marker_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| e.any())?;

        if !marker_exists {
            return Err(DatabaseError::NotFound {
                resource: "marker".to_string(),
                identifier: new_report.marker_id.to_string(),
            });
        }

        let report_id = sqlx::query_scalar::<_, PrimaryKey>(
            "INSERT INTO reports (marker_id, user_id, latitude, longitude,
                                  new_latitude, new_longitude, description, does_exist, status)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending')
             RETURNING report_id",
        )
        .bind(new_report.marker_id)
        .bind(new_report.user_id)
        .bind(new_report.latitude)
        .bind(new_report.longitude)
        .bind(new_report.new_latitude)
        .bind(new_report.new_longitude)
        .bind(&new_report.description)
        .bind(new_report.does_exist)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| e.any())?;

        for url in &new_report.photo_urls {
            sqlx::query("INSERT INTO report_photos (report_id, photo_url) VALUES ($1, $2)")
                .bind(report_id)
                .bind(url)
                .execute(&mut *tx)
                .await
                .map_err(|e| e.any())?;
        }

        tx.commit().await.map_err(|e| e.any())?;

        Ok(report_id)
    }

    async fn reports_for_marker(&self, marker_id: PrimaryKey) -> Result<Vec<ReportWithPhotos>> {
        let rows = sqlx::query_as::<_, ReportJoinedRow>(&format!(
            "{SELECT_REPORTS} WHERE r.marker_id = $1 ORDER BY r.created_at DESC"
        ))
        .bind(marker_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())?;

        self.assemble_reports(rows).await
    }

    async fn reports_by_user(&self, user_id: PrimaryKey) -> Result<Vec<ReportWithPhotos>> {
        let rows = sqlx::query_as::<_, ReportJoinedRow>(&format!(
            "{SELECT_REPORTS} WHERE r.user_id = $1 ORDER BY r.created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())?;

        self.assemble_reports(rows).await
    }

    async fn reports_for_owned_markers(
        &self,
        owner_id: PrimaryKey,
    ) -> Result<Vec<ReportWithPhotos>> {
        let rows = sqlx::query_as::<_, ReportJoinedRow>(&format!(
            "{SELECT_REPORTS}
             WHERE EXISTS (SELECT 1 FROM markers
                           WHERE markers.marker_id = r.marker_id
                             AND markers.user_id = $1)
             ORDER BY r.marker_id, r.created_at DESC"
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())?;

        self.assemble_reports(rows).await
    }

    async fn approve_report(&self, report_id: PrimaryKey) -> Result<ReportResolution> {
        let mut tx = self.pool.begin().await.map_err(|e| e.any())?;

        let report = sqlx::query_as::<_, ReportRow>(
            "SELECT report_id, marker_id, user_id, latitude, longitude,
                    new_latitude, new_longitude, description, status, does_exist, created_at
             FROM reports WHERE report_id = $1",
        )
        .bind(report_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| e.not_found_or("report", "id"))?;

        // Approval and denial are terminal.
        if report.status != super::report_status::PENDING {
            return Err(DatabaseError::Conflict {
                resource: "report".to_string(),
                field: "status".to_string(),
                value: report.status,
            });
        }

        let resolution = if report.does_exist {
            sqlx::query(
                "UPDATE markers SET latitude = $1, longitude = $2, updated_at = now()
                 WHERE marker_id = $3",
            )
            .bind(report.new_latitude)
            .bind(report.new_longitude)
            .bind(report.marker_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.any())?;

            ReportResolution::Moved
        } else {
            let photo_urls = sqlx::query_scalar::<_, String>(
                "SELECT photo_url FROM photos WHERE marker_id = $1",
            )
            .bind(report.marker_id)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| e.any())?;

            sqlx::query("DELETE FROM photos WHERE marker_id = $1")
                .bind(report.marker_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| e.any())?;

            sqlx::query("DELETE FROM markers WHERE marker_id = $1")
                .bind(report.marker_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| e.any())?;

            ReportResolution::Removed { photo_urls }
        };

        sqlx::query("UPDATE reports SET status = 'approved' WHERE report_id = $1")
            .bind(report_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.any())?;

        tx.commit().await.map_err(|e| e.any())?;

        Ok(resolution)
    }

    async fn deny_report(&self, report_id: PrimaryKey) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE reports SET status = 'denied' WHERE report_id = $1 AND status = 'pending'",
        )
        .bind(report_id)
        .execute(&self.pool)
        .await
        .map_err(|e| e.any())?;

        if updated.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                resource: "pending report".to_string(),
                identifier: report_id.to_string(),
            });
        }

        Ok(())
    }
}

async fn aggregate_reactions(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    story_id: PrimaryKey,
    user_id: PrimaryKey,
) -> Result<ReactionCounts> {
    sqlx::query_as::<_, ReactionCounts>(
        "SELECT
            COALESCE(SUM(CASE WHEN reaction_type = 'thumbsup' THEN 1 ELSE 0 END), 0) AS thumbs_up,
            COALESCE(SUM(CASE WHEN reaction_type = 'thumbsdown' THEN 1 ELSE 0 END), 0) AS thumbs_down,
            COALESCE(BOOL_OR(user_id = $2 AND reaction_type = 'thumbsup'), FALSE) AS user_liked
         FROM reactions
         WHERE story_id = $1",
    )
    .bind(story_id)
    .bind(user_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| e.any())
}

impl IntoDatabaseError for SqlxError {
    fn any(self) -> DatabaseError {
        DatabaseError::Internal(Box::new(self))
    }

    fn not_found_or(self, resource: &str, identifier: &str) -> DatabaseError {
        match self {
            SqlxError::RowNotFound => DatabaseError::NotFound {
                resource: resource.to_string(),
                identifier: identifier.to_string(),
            },
            e => e.any(),
        }
    }

    fn conflict_or(self, resource: &str, field: &str, value: &str) -> DatabaseError {
        match &self {
            SqlxError::Database(db) if db.is_unique_violation() => DatabaseError::Conflict {
                resource: resource.to_string(),
                field: field.to_string(),
                value: value.to_string(),
            },
            _ => self.any(),
        }
    }
}
