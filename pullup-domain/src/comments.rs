use chrono::Utc;
use thiserror::Error;

use pullup_core::db::{CommentWithUsername, DatabaseError, PrimaryKey};
use pullup_core::util::{contains_bad_word, total_pages, PageParams};

use crate::DomainContext;

#[derive(Debug, Error)]
pub enum CommentError {
    #[error("Marker does not exist")]
    MarkerNotFound,
    #[error("Comment not found or not owned by user")]
    NotFound,
    #[error("Comment contains inappropriate language")]
    InvalidContent,
    #[error("No more comments allowed on this marker")]
    MarkerQuota,
    #[error("Daily comment limit reached")]
    DailyQuota,
    #[error(transparent)]
    Db(DatabaseError),
}

/// Per-marker comments with two quotas: at most three active comments per
/// (user, marker) and fifteen per user per UTC day.
pub struct CommentService {
    context: DomainContext,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentPage {
    pub comments: Vec<CommentWithUsername>,
    pub current_page: i64,
    pub total_pages: i64,
    pub total_comments: i64,
}

impl CommentService {
    pub fn new(context: &DomainContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Posts a comment. The daily quota is an atomic counter, so concurrent
    /// posts cannot slip past it; the per-marker cap is enforced inside the
    /// insert statement.
    pub async fn create(
        &self,
        marker_id: PrimaryKey,
        user_id: PrimaryKey,
        text: &str,
    ) -> Result<CommentWithUsername, CommentError> {
        if contains_bad_word(text) {
            return Err(CommentError::InvalidContent);
        }

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let posted_today = self
            .context
            .counters
            .increment_daily("comment", user_id, &today)
            .await
            .unwrap_or(0);

        if posted_today > self.context.config.comment_daily_limit {
            return Err(CommentError::DailyQuota);
        }

        self.context
            .db
            .create_comment(
                marker_id,
                user_id,
                text,
                self.context.config.comments_per_marker_limit,
            )
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound { .. } => CommentError::MarkerNotFound,
                DatabaseError::LimitReached { .. } => CommentError::MarkerQuota,
                err => CommentError::Db(err),
            })
    }

    /// Edits a comment the user owns.
    pub async fn update(
        &self,
        comment_id: PrimaryKey,
        user_id: PrimaryKey,
        text: &str,
    ) -> Result<(), CommentError> {
        if contains_bad_word(text) {
            return Err(CommentError::InvalidContent);
        }

        self.context
            .db
            .update_comment(comment_id, user_id, text)
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound { .. } => CommentError::NotFound,
                err => CommentError::Db(err),
            })
    }

    /// Soft-deletes a comment the user owns.
    pub async fn remove(
        &self,
        comment_id: PrimaryKey,
        user_id: PrimaryKey,
    ) -> Result<(), CommentError> {
        self.context
            .db
            .remove_comment(comment_id, user_id)
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound { .. } => CommentError::NotFound,
                err => CommentError::Db(err),
            })
    }

    /// One page of a marker's active comments, newest first.
    pub async fn for_marker(
        &self,
        marker_id: PrimaryKey,
        page: PageParams,
    ) -> Result<CommentPage, CommentError> {
        let (comments, total) = self
            .context
            .db
            .comments_for_marker(marker_id, page.page_size, page.offset)
            .await
            .map_err(CommentError::Db)?;

        Ok(CommentPage {
            comments,
            current_page: page.page,
            total_pages: total_pages(total, page.page_size),
            total_comments: total,
        })
    }
}
