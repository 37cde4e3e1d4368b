use std::ops::Deref;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Path, Query},
    http::request::Parts,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use cookie::{Cookie, SameSite};
use serde::Deserialize;
use serde_json::json;

use pullup_core::db::AuthDetails;
use pullup_core::util::random_string;
use pullup_domain::NewSignup;

use crate::{
    errors::{ServerError, ServerResult},
    schemas::{
        ConfirmVerificationSchema, LoginSchema, RequestResetSchema, ResetPasswordSchema,
        SendVerificationSchema, SignupSchema, ValidatedJson,
    },
    serialized::{LoginResult, ToSerialized, User},
    Router, ServerContext,
};

const OAUTH_STATE_COOKIE: &str = "oauth_state";

/// An authenticated request, resolved from the opaque token cookie.
pub struct Session {
    pub details: AuthDetails,
    pub token: String,
}

impl Deref for Session {
    type Target = AuthDetails;

    fn deref(&self) -> &Self::Target {
        &self.details
    }
}

#[async_trait]
impl FromRequestParts<ServerContext> for Session {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServerContext,
    ) -> Result<Self, Self::Rejection> {
        let context = ServerContext::from_ref(state);
        let jar = CookieJar::from_headers(&parts.headers);

        let token = jar
            .get(&context.config.token_cookie)
            .map(|cookie| cookie.value().to_string())
            .ok_or(ServerError::InvalidToken)?;

        let details = context.domain.auth.authenticate(&token, Utc::now()).await?;

        Ok(Self { details, token })
    }
}

/// Like [Session], but anonymous requests pass through with `None`.
pub struct SoftSession(pub Option<AuthDetails>);

#[async_trait]
impl FromRequestParts<ServerContext> for SoftSession {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServerContext,
    ) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state).await.ok();

        Ok(Self(session.map(|s| s.details)))
    }
}

/// A [Session] that additionally requires the admin role.
pub struct AdminSession(pub AuthDetails);

#[async_trait]
impl FromRequestParts<ServerContext> for AdminSession {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServerContext,
    ) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state).await?;

        if !session.is_admin() {
            return Err(ServerError::AccessDenied);
        }

        Ok(Self(session.details))
    }
}

fn token_cookie(context: &ServerContext, token: &str) -> Cookie<'static> {
    Cookie::build((context.config.token_cookie.clone(), token.to_string()))
        .http_only(true)
        .secure(context.config.is_production())
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(cookie::time::Duration::days(
            context.config.token_duration_in_days,
        ))
        .build()
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/signup",
    tag = "auth",
    request_body = SignupSchema,
    responses(
        (status = 201, body = User),
        (status = 400, description = "Email has not been verified"),
        (status = 409, description = "Email already registered")
    )
)]
pub(crate) async fn signup(
    context: ServerContext,
    ValidatedJson(body): ValidatedJson<SignupSchema>,
) -> ServerResult<Json<User>> {
    let user = context
        .domain
        .auth
        .signup(NewSignup {
            email: body.email,
            password: body.password,
            username: body.username,
        })
        .await?;

    Ok(Json(user.to_serialized()))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    tag = "auth",
    request_body = LoginSchema,
    responses(
        (status = 200, body = LoginResult),
        (status = 401, description = "Invalid credentials")
    )
)]
pub(crate) async fn login(
    context: ServerContext,
    jar: CookieJar,
    ValidatedJson(body): ValidatedJson<LoginSchema>,
) -> ServerResult<(CookieJar, Json<LoginResult>)> {
    let (user, issued) = context.domain.auth.login(&body.email, &body.password).await?;

    let jar = jar.add(token_cookie(&context, &issued.token));

    Ok((jar, Json((user, issued).to_serialized())))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/logout",
    tag = "auth",
    responses((status = 200))
)]
pub(crate) async fn logout(
    context: ServerContext,
    session: Session,
    jar: CookieJar,
) -> ServerResult<(CookieJar, Json<serde_json::Value>)> {
    context
        .domain
        .auth
        .logout(&session.token)
        .await
        .map_err(ServerError::from)?;

    let jar = jar.remove(Cookie::from(context.config.token_cookie.clone()));

    Ok((jar, Json(json!({ "message": "logged out" }))))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/verify-email/send",
    tag = "auth",
    request_body = SendVerificationSchema,
    responses((status = 200))
)]
pub(crate) async fn send_verification(
    context: ServerContext,
    ValidatedJson(body): ValidatedJson<SendVerificationSchema>,
) -> ServerResult<Json<serde_json::Value>> {
    context
        .domain
        .auth
        .request_email_verification(&body.email)
        .await?;

    Ok(Json(json!({ "message": "verification mail sent" })))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/verify-email/confirm",
    tag = "auth",
    request_body = ConfirmVerificationSchema,
    responses((status = 200), (status = 401, description = "Token mismatch"))
)]
pub(crate) async fn confirm_verification(
    context: ServerContext,
    ValidatedJson(body): ValidatedJson<ConfirmVerificationSchema>,
) -> ServerResult<Json<serde_json::Value>> {
    context
        .domain
        .auth
        .confirm_email(&body.email, &body.token)
        .await?;

    Ok(Json(json!({ "message": "email verified" })))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/request-password-reset",
    tag = "auth",
    request_body = RequestResetSchema,
    responses((status = 200))
)]
pub(crate) async fn request_password_reset(
    context: ServerContext,
    ValidatedJson(body): ValidatedJson<RequestResetSchema>,
) -> ServerResult<Json<serde_json::Value>> {
    context.domain.auth.request_password_reset(&body.email).await?;

    Ok(Json(json!({ "message": "reset mail sent" })))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/reset-password",
    tag = "auth",
    request_body = ResetPasswordSchema,
    responses((status = 200), (status = 401, description = "Token invalid or expired"))
)]
pub(crate) async fn reset_password(
    context: ServerContext,
    ValidatedJson(body): ValidatedJson<ResetPasswordSchema>,
) -> ServerResult<Json<serde_json::Value>> {
    context
        .domain
        .auth
        .reset_password(&body.token, &body.password)
        .await?;

    Ok(Json(json!({ "message": "password updated" })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OAuthQuery {
    code: Option<String>,
    state: Option<String>,
    mobile_token: Option<String>,
}

/// One endpoint drives all three legs of the OAuth dance: the initial
/// redirect, the provider callback, and the mobile token shortcut.
#[utoipa::path(
    get,
    path = "/api/v1/auth/{provider}",
    tag = "auth",
    responses(
        (status = 200, body = LoginResult, description = "Mobile flow"),
        (status = 303, description = "Web flow redirect"),
        (status = 401, description = "State mismatch")
    )
)]
pub(crate) async fn oauth(
    context: ServerContext,
    jar: CookieJar,
    Path(provider): Path<String>,
    Query(query): Query<OAuthQuery>,
) -> ServerResult<Response> {
    // Mobile clients already hold an access token; no state dance needed.
    if let Some(access_token) = query.mobile_token {
        let profile = context
            .domain
            .oauth
            .fetch_profile(&provider, &access_token)
            .await?;

        let (user, issued) = context.domain.auth.login_with_profile(profile).await?;
        let jar = jar.add(token_cookie(&context, &issued.token));
        let result: LoginResult = (user, issued).to_serialized();

        return Ok((jar, Json(result)).into_response());
    }

    let redirect_uri = format!(
        "{}/api/v1/auth/{provider}",
        context.config.backend_url
    );

    // Callback leg: the state must match the cookie we set on the way out.
    if let Some(code) = query.code {
        let expected = jar
            .get(OAUTH_STATE_COOKIE)
            .map(|cookie| cookie.value().to_string());

        if query.state.is_none() || query.state != expected {
            return Err(ServerError::BadOAuthState);
        }

        let access_token = context
            .domain
            .oauth
            .exchange_code(&provider, &code, &redirect_uri)
            .await?;

        let profile = context
            .domain
            .oauth
            .fetch_profile(&provider, &access_token)
            .await?;

        let (_, issued) = context.domain.auth.login_with_profile(profile).await?;

        let jar = jar
            .remove(Cookie::from(OAUTH_STATE_COOKIE))
            .add(token_cookie(&context, &issued.token));

        return Ok((jar, Redirect::to(&context.config.frontend_url)).into_response());
    }

    // First leg: remember a state and send the browser to the provider.
    let state = random_string(16);
    let authorize = context
        .domain
        .oauth
        .authorize_url(&provider, &state, &redirect_uri)?;

    let state_cookie = Cookie::build((OAUTH_STATE_COOKIE, state))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .build();

    Ok((jar.add(state_cookie), Redirect::to(&authorize)).into_response())
}

pub fn router() -> Router {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/verify-email/send", post(send_verification))
        .route("/verify-email/confirm", post(confirm_verification))
        .route("/request-password-reset", post(request_password_reset))
        .route("/reset-password", post(reset_password))
        .route("/:provider", get(oauth))
}
