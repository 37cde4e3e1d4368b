//! Wire forms for auth and user data, along with the From impls.
//! Resource payloads that already carry their wire shape (markers, stories,
//! comments, reports) are serialized straight from the domain types.

use serde::Serialize;
use utoipa::ToSchema;

use pullup_core::db::{AuthDetails, UserRow};
use pullup_domain::{IssuedToken, UserProfile};

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub user_id: i64,
    pub username: String,
    pub email: String,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoginResult {
    pub token: String,
    pub expires_at: String,
    pub user: User,
}

/// Helper trait to convert any type into a serialized version
pub trait ToSerialized<T> {
    fn to_serialized(&self) -> T;
}

impl ToSerialized<User> for UserRow {
    fn to_serialized(&self) -> User {
        User {
            user_id: self.user_id,
            username: self.username.clone(),
            email: self.email.clone(),
            role: self.role.clone(),
        }
    }
}

impl ToSerialized<User> for AuthDetails {
    fn to_serialized(&self) -> User {
        User {
            user_id: self.user_id,
            username: self.username.clone(),
            email: self.email.clone(),
            role: self.role.clone(),
        }
    }
}

impl ToSerialized<User> for UserProfile {
    fn to_serialized(&self) -> User {
        User {
            user_id: self.user_id,
            username: self.username.clone(),
            email: self.email.clone(),
            role: self.role.clone(),
        }
    }
}

impl ToSerialized<LoginResult> for (UserRow, IssuedToken) {
    fn to_serialized(&self) -> LoginResult {
        LoginResult {
            token: self.1.token.clone(),
            expires_at: self.1.expires_at.to_rfc3339(),
            user: self.0.to_serialized(),
        }
    }
}

impl<T, S> ToSerialized<Vec<S>> for Vec<T>
where
    T: ToSerialized<S>,
{
    fn to_serialized(&self) -> Vec<S> {
        self.iter().map(|item| item.to_serialized()).collect()
    }
}
