use chrono::{DateTime, Duration, Utc};
use crossbeam::atomic::AtomicCell;
use log::warn;
use thiserror::Error;

use pullup_core::db::{providers, AuthDetails, DatabaseError, NewUser, PrimaryKey, UserRow};
use pullup_core::util::random_string;

use crate::DomainContext;

/// Process-wide login counter, incremented on every successful credential
/// or OAuth login.
static LOGIN_COUNT: AtomicCell<u64> = AtomicCell::new(0);

pub fn login_count() -> u64 {
    LOGIN_COUNT.load()
}

const USERNAME_RETRIES: usize = 5;
const RESET_TOKEN_LENGTH: usize = 16;
const VERIFICATION_TOKEN_LENGTH: usize = 6;

pub struct Auth {
    context: DomainContext,
}

#[derive(Debug, Error)]
pub enum AuthError {
    /// Email or password is incorrect
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Token is missing or expired")]
    InvalidToken,
    #[error("Email has not been verified")]
    EmailNotVerified,
    #[error("Could not find a free username")]
    UsernameExhausted,
    /// Something else went wrong with the database
    #[error(transparent)]
    Db(DatabaseError),
    #[error("HashError: {0}")]
    Hash(String),
}

/// A freshly issued opaque token with its expiry.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct NewSignup {
    pub email: String,
    pub password: String,
    pub username: Option<String>,
}

/// A profile fetched from an OAuth provider, ready to be turned into a user.
#[derive(Debug, Clone)]
pub struct OAuthProfile {
    pub provider: String,
    pub provider_id: String,
    pub email: Option<String>,
    pub username: Option<String>,
}

impl Auth {
    pub fn new(context: &DomainContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Logs in a website user, returning the user and a new opaque token.
    pub async fn login(&self, email: &str, password: &str) -> Result<(UserRow, IssuedToken), AuthError> {
        self.clear_expired().await;

        let user = self
            .context
            .db
            .website_user_by_email(email)
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound { .. } => AuthError::InvalidCredentials,
                err => AuthError::Db(err),
            })?;

        let stored_hash = user
            .password_hash
            .as_deref()
            .ok_or(AuthError::InvalidCredentials)?;

        let matches = bcrypt::verify(password, stored_hash)
            .map_err(|e| AuthError::Hash(e.to_string()))?;

        if !matches {
            return Err(AuthError::InvalidCredentials);
        }

        let issued = self.issue_token(user.user_id).await?;
        LOGIN_COUNT.fetch_add(1);

        Ok((user, issued))
    }

    /// Upserts a user from an OAuth profile and logs them in. The mobile and
    /// web flows both end here.
    pub async fn login_with_profile(
        &self,
        profile: OAuthProfile,
    ) -> Result<(UserRow, IssuedToken), AuthError> {
        let username = profile
            .username
            .unwrap_or_else(|| format!("{}-{}", profile.provider, random_string(5)));

        let email = profile
            .email
            .unwrap_or_else(|| format!("{}@{}.oauth", profile.provider_id, profile.provider));

        let mut new_user = NewUser {
            username,
            email,
            password_hash: None,
            provider: profile.provider.clone(),
            provider_id: Some(profile.provider_id.clone()),
        };

        let mut user = None;

        for _ in 0..USERNAME_RETRIES {
            match self.context.db.upsert_oauth_user(new_user).await {
                Ok(found) => {
                    user = Some(found);
                    break;
                }
                // Username or email collided with an unrelated account.
                Err(err) if err.is_conflict() => {
                    new_user = NewUser {
                        username: format!("{}-{}", profile.provider, random_string(5)),
                        email: format!("{}@{}.oauth", profile.provider_id, profile.provider),
                        password_hash: None,
                        provider: profile.provider.clone(),
                        provider_id: Some(profile.provider_id.clone()),
                    };
                }
                Err(err) => return Err(AuthError::Db(err)),
            }
        }

        let user = user.ok_or(AuthError::UsernameExhausted)?;

        let issued = self.issue_token(user.user_id).await?;
        LOGIN_COUNT.fetch_add(1);

        Ok((user, issued))
    }

    /// Deletes the associated token, if it exists
    pub async fn logout(&self, token: &str) -> Result<(), DatabaseError> {
        self.context.db.delete_token(token).await
    }

    /// Registers a website user. Requires a prior verified email, and
    /// retries with a short random suffix when the username is taken.
    pub async fn signup(&self, new_signup: NewSignup) -> Result<UserRow, AuthError> {
        let verified = self
            .context
            .db
            .has_verified_email(&new_signup.email)
            .await
            .map_err(AuthError::Db)?;

        if !verified {
            return Err(AuthError::EmailNotVerified);
        }

        let password_hash = bcrypt::hash(&new_signup.password, bcrypt::DEFAULT_COST)
            .map_err(|e| AuthError::Hash(e.to_string()))?;

        let base_username = new_signup
            .username
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| {
                new_signup
                    .email
                    .split('@')
                    .next()
                    .unwrap_or("user")
                    .to_string()
            });

        let mut username = base_username.clone();

        for _ in 0..USERNAME_RETRIES {
            let result = self
                .context
                .db
                .create_website_user(NewUser {
                    username: username.clone(),
                    email: new_signup.email.clone(),
                    password_hash: Some(password_hash.clone()),
                    provider: providers::WEBSITE.to_string(),
                    provider_id: None,
                })
                .await;

            match result {
                Ok(user) => return Ok(user),
                Err(err) if err.is_conflict() => {
                    username = format!("{}-{}", base_username, random_string(5));
                }
                Err(err) => return Err(AuthError::Db(err)),
            }
        }

        Err(AuthError::UsernameExhausted)
    }

    /// Validates an opaque token against the store, rejecting expired ones.
    pub async fn authenticate(&self, token: &str, now: DateTime<Utc>) -> Result<AuthDetails, AuthError> {
        let details = self
            .context
            .db
            .auth_by_token(token)
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound { .. } => AuthError::InvalidToken,
                err => AuthError::Db(err),
            })?;

        if now > details.expires_at {
            return Err(AuthError::InvalidToken);
        }

        Ok(details)
    }

    /// Stores a fresh opaque token for the user.
    pub async fn issue_token(&self, user_id: PrimaryKey) -> Result<IssuedToken, AuthError> {
        let token = random_string(self.context.config.token_length);
        let expires_at = Utc::now() + Duration::days(self.context.config.token_duration_in_days);

        self.context
            .db
            .create_token(user_id, &token, expires_at)
            .await
            .map_err(AuthError::Db)?;

        Ok(IssuedToken { token, expires_at })
    }

    /// Issues an email verification token and mails it in the background.
    pub async fn request_email_verification(&self, email: &str) -> Result<(), AuthError> {
        let token = random_string(VERIFICATION_TOKEN_LENGTH);
        let expires_at = Utc::now() + Duration::minutes(30);

        self.context
            .db
            .upsert_email_verification(email, &token, expires_at)
            .await
            .map_err(AuthError::Db)?;

        let mailer = self.context.mailer.clone();
        let email = email.to_string();

        tokio::spawn(async move {
            if let Err(err) = mailer.send_verification(&email, &token).await {
                warn!("Failed to send verification mail to {email}: {err}");
            }
        });

        Ok(())
    }

    /// Marks an email as verified when the token matches.
    pub async fn confirm_email(&self, email: &str, token: &str) -> Result<(), AuthError> {
        self.context
            .db
            .confirm_email_verification(email, token)
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound { .. } => AuthError::InvalidToken,
                err => AuthError::Db(err),
            })
    }

    /// Issues a password reset token valid for 24 hours and mails it in the
    /// background. An unknown email is reported as invalid credentials so the
    /// endpoint does not leak which addresses exist.
    pub async fn request_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let user = self
            .context
            .db
            .website_user_by_email(email)
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound { .. } => AuthError::InvalidCredentials,
                err => AuthError::Db(err),
            })?;

        let token = random_string(RESET_TOKEN_LENGTH);
        let expires_at = Utc::now() + Duration::hours(24);

        self.context
            .db
            .upsert_reset_token(user.user_id, &token, expires_at)
            .await
            .map_err(AuthError::Db)?;

        let mailer = self.context.mailer.clone();
        let email = email.to_string();

        tokio::spawn(async move {
            if let Err(err) = mailer.send_password_reset(&email, &token).await {
                warn!("Failed to send reset mail to {email}: {err}");
            }
        });

        Ok(())
    }

    /// Verifies the reset token, hashes and stores the new password, and
    /// deletes the token, all in one transaction.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), AuthError> {
        let new_hash = bcrypt::hash(new_password, bcrypt::DEFAULT_COST)
            .map_err(|e| AuthError::Hash(e.to_string()))?;

        self.context
            .db
            .reset_password(token, &new_hash)
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound { .. } => AuthError::InvalidToken,
                err => AuthError::Db(err),
            })
    }

    async fn clear_expired(&self) {
        if let Err(err) = self.context.db.clear_expired_tokens().await {
            warn!("Failed to clear expired tokens: {err}");
        }
    }
}
