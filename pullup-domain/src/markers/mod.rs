mod interact;
mod locate;
mod manage;
mod rank;

pub use interact::*;
pub use locate::*;
pub use manage::*;
pub use rank::*;

use thiserror::Error;

use pullup_core::db::DatabaseError;

#[derive(Debug, Error)]
pub enum MarkerError {
    #[error("Operations are only allowed within South Korea")]
    OutsideKorea,
    #[error("Content contains inappropriate language")]
    InvalidContent,
    #[error("A marker already exists nearby")]
    NearbyMarker,
    #[error("User is not allowed to modify this marker")]
    Forbidden,
    #[error("Distance cannot be greater than {0}m")]
    DistanceTooLarge(i64),
    #[error("Maximum number of favorites reached")]
    MaxFavorites,
    #[error("An error happened during file upload")]
    Upload,
    #[error(transparent)]
    Db(DatabaseError),
}

impl From<DatabaseError> for MarkerError {
    fn from(value: DatabaseError) -> Self {
        match value {
            DatabaseError::LimitReached { .. } => Self::MaxFavorites,
            err => Self::Db(err),
        }
    }
}

/// One photo sent along with a marker creation or report.
#[derive(Debug)]
pub struct PhotoUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}
