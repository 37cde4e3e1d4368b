use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use log::error;
use serde_json::json;
use thiserror::Error;

use pullup_core::db::DatabaseError;
use pullup_domain::{
    AuthError, CommentError, MarkerError, OAuthError, ReportError, StoryError,
};

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    // General
    #[error("{resource}:{identifier} not found")]
    NotFound {
        resource: String,
        identifier: String,
    },
    #[error("{resource} with {field} of value {value} already exists")]
    Conflict {
        resource: String,
        field: String,
        value: String,
    },
    #[error("Unknown internal error: {0}")]
    Unknown(String),
    // Auth
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Email has not been verified")]
    EmailNotVerified,
    #[error("Could not find a free username")]
    UsernameExhausted,
    #[error("OAuth state did not match")]
    BadOAuthState,
    #[error("Unknown provider {0}")]
    UnknownProvider(String),
    #[error("Access denied")]
    AccessDenied,
    // Markers
    #[error("Operations are only allowed within South Korea")]
    OutsideKorea,
    #[error("Content contains inappropriate language")]
    InvalidContent,
    #[error("A marker already exists nearby")]
    NearbyMarker,
    #[error("Distance cannot be greater than {0}m")]
    DistanceTooLarge(i64),
    #[error("Maximum number of favorites reached")]
    MaxFavorites,
    #[error("Too many requests, please try again later")]
    RateLimited,
    #[error("An error happened during file upload")]
    UploadFailed,
    // Stories
    #[error("User already has an active story on this marker")]
    StoryAlreadyPosted,
    #[error("You have already reported this story")]
    StoryAlreadyReported,
    #[error("Caption is invalid")]
    InvalidCaption,
    #[error("The image could not be decoded")]
    InvalidImage,
    // Reports
    #[error("New location is too far from the original")]
    ProposalTooFar,
    #[error("Upload at least one photo")]
    NoPhotos,
    #[error("Report is not pending")]
    ReportNotPending,
    // Requests
    #[error("Request body is invalid: {0}")]
    BadRequest(String),
}

impl ServerError {
    fn as_status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::InvalidToken => StatusCode::UNAUTHORIZED,
            Self::BadOAuthState => StatusCode::UNAUTHORIZED,
            Self::EmailNotVerified => StatusCode::BAD_REQUEST,
            Self::UsernameExhausted => StatusCode::CONFLICT,
            Self::UnknownProvider(_) => StatusCode::BAD_REQUEST,
            Self::AccessDenied => StatusCode::FORBIDDEN,
            Self::OutsideKorea => StatusCode::FORBIDDEN,
            Self::InvalidContent => StatusCode::BAD_REQUEST,
            Self::NearbyMarker => StatusCode::CONFLICT,
            Self::DistanceTooLarge(_) => StatusCode::FORBIDDEN,
            Self::MaxFavorites => StatusCode::CONFLICT,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::UploadFailed => StatusCode::BAD_GATEWAY,
            Self::StoryAlreadyPosted => StatusCode::CONFLICT,
            Self::StoryAlreadyReported => StatusCode::CONFLICT,
            Self::InvalidCaption => StatusCode::BAD_REQUEST,
            Self::InvalidImage => StatusCode::BAD_REQUEST,
            Self::ProposalTooFar => StatusCode::NOT_ACCEPTABLE,
            Self::NoPhotos => StatusCode::CONFLICT,
            Self::ReportNotPending => StatusCode::CONFLICT,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.as_status_code();

        // Log server errors when they happen, and keep the body neutral.
        if status.as_u16() >= 500 {
            error!("Request failed: {self}");
            return (status, Json(json!({ "error": "Internal Server Error" }))).into_response();
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<DatabaseError> for ServerError {
    fn from(value: DatabaseError) -> Self {
        match value {
            DatabaseError::NotFound {
                resource,
                identifier,
            } => Self::NotFound {
                resource,
                identifier,
            },
            DatabaseError::Conflict {
                resource,
                field,
                value,
            } => Self::Conflict {
                resource,
                field,
                value,
            },
            DatabaseError::LimitReached { .. } => Self::MaxFavorites,
            e => Self::Unknown(e.to_string()),
        }
    }
}

impl From<AuthError> for ServerError {
    fn from(value: AuthError) -> Self {
        match value {
            AuthError::InvalidCredentials => Self::InvalidCredentials,
            AuthError::InvalidToken => Self::InvalidToken,
            AuthError::EmailNotVerified => Self::EmailNotVerified,
            AuthError::UsernameExhausted => Self::UsernameExhausted,
            AuthError::Db(e) => e.into(),
            e => Self::Unknown(e.to_string()),
        }
    }
}

impl From<OAuthError> for ServerError {
    fn from(value: OAuthError) -> Self {
        match value {
            OAuthError::UnknownProvider(name) => Self::UnknownProvider(name),
            OAuthError::StateMismatch => Self::BadOAuthState,
            e => Self::Unknown(e.to_string()),
        }
    }
}

impl From<MarkerError> for ServerError {
    fn from(value: MarkerError) -> Self {
        match value {
            MarkerError::OutsideKorea => Self::OutsideKorea,
            MarkerError::InvalidContent => Self::InvalidContent,
            MarkerError::NearbyMarker => Self::NearbyMarker,
            MarkerError::Forbidden => Self::AccessDenied,
            MarkerError::DistanceTooLarge(max) => Self::DistanceTooLarge(max),
            MarkerError::MaxFavorites => Self::MaxFavorites,
            MarkerError::Upload => Self::UploadFailed,
            MarkerError::Db(e) => e.into(),
        }
    }
}

impl From<StoryError> for ServerError {
    fn from(value: StoryError) -> Self {
        match value {
            StoryError::MarkerNotFound => Self::NotFound {
                resource: "marker".to_string(),
                identifier: String::new(),
            },
            StoryError::StoryNotFound => Self::NotFound {
                resource: "story".to_string(),
                identifier: String::new(),
            },
            StoryError::AlreadyPosted => Self::StoryAlreadyPosted,
            StoryError::AlreadyReported => Self::StoryAlreadyReported,
            StoryError::InvalidCaption => Self::InvalidCaption,
            StoryError::InvalidImage => Self::InvalidImage,
            StoryError::Forbidden => Self::AccessDenied,
            StoryError::Upload => Self::UploadFailed,
            StoryError::Db(e) => e.into(),
        }
    }
}

impl From<CommentError> for ServerError {
    fn from(value: CommentError) -> Self {
        match value {
            CommentError::MarkerNotFound => Self::NotFound {
                resource: "marker".to_string(),
                identifier: String::new(),
            },
            CommentError::NotFound => Self::NotFound {
                resource: "comment".to_string(),
                identifier: String::new(),
            },
            CommentError::InvalidContent => Self::InvalidContent,
            CommentError::MarkerQuota => Self::RateLimited,
            CommentError::DailyQuota => Self::RateLimited,
            CommentError::Db(e) => e.into(),
        }
    }
}

impl From<ReportError> for ServerError {
    fn from(value: ReportError) -> Self {
        match value {
            ReportError::OutsideKorea => Self::OutsideKorea,
            ReportError::InvalidContent => Self::InvalidContent,
            ReportError::TooFar => Self::ProposalTooFar,
            ReportError::NoPhotos => Self::NoPhotos,
            ReportError::Upload => Self::UploadFailed,
            ReportError::MarkerNotFound => Self::NotFound {
                resource: "marker".to_string(),
                identifier: String::new(),
            },
            ReportError::NotPending => Self::ReportNotPending,
            ReportError::NotFound => Self::NotFound {
                resource: "report".to_string(),
                identifier: String::new(),
            },
            ReportError::Db(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ServerError::NearbyMarker.as_status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServerError::DistanceTooLarge(50_000).as_status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ServerError::ProposalTooFar.as_status_code(),
            StatusCode::NOT_ACCEPTABLE
        );
        assert_eq!(
            ServerError::RateLimited.as_status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ServerError::InvalidToken.as_status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_domain_errors_translate() {
        let err: ServerError = MarkerError::NearbyMarker.into();
        assert!(matches!(err, ServerError::NearbyMarker));

        let err: ServerError = CommentError::DailyQuota.into();
        assert!(matches!(err, ServerError::RateLimited));

        let err: ServerError = StoryError::AlreadyPosted.into();
        assert!(matches!(err, ServerError::StoryAlreadyPosted));
    }
}
