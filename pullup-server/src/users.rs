use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use cookie::Cookie;

use crate::{
    auth::Session,
    errors::{ServerError, ServerResult},
    markers::cache_header,
    schemas::{UpdateUsernameSchema, ValidatedJson},
    serialized::{ToSerialized, User},
    Router, ServerContext,
};

#[utoipa::path(
    get,
    path = "/api/v1/users/me",
    tag = "users",
    responses((status = 200, body = User))
)]
pub(crate) async fn me(context: ServerContext, session: Session) -> ServerResult<impl IntoResponse> {
    let (profile, hit) = context
        .domain
        .users
        .profile(session.user_id)
        .await
        .map_err(ServerError::from)?;

    Ok((cache_header(hit), Json(profile.to_serialized())))
}

#[utoipa::path(
    patch,
    path = "/api/v1/users/me",
    tag = "users",
    request_body = UpdateUsernameSchema,
    responses((status = 200, body = User), (status = 409, description = "Username taken"))
)]
pub(crate) async fn update_me(
    context: ServerContext,
    session: Session,
    ValidatedJson(body): ValidatedJson<UpdateUsernameSchema>,
) -> ServerResult<Json<User>> {
    let profile = context
        .domain
        .users
        .change_username(session.user_id, &body.username)
        .await
        .map_err(ServerError::from)?;

    Ok(Json(profile.to_serialized()))
}

#[utoipa::path(
    delete,
    path = "/api/v1/users/me",
    tag = "users",
    responses((status = 204), (status = 409, description = "The admin account is undeletable"))
)]
pub(crate) async fn delete_me(
    context: ServerContext,
    session: Session,
    jar: CookieJar,
) -> ServerResult<impl IntoResponse> {
    context
        .domain
        .users
        .delete_account(session.user_id)
        .await
        .map_err(ServerError::from)?;

    let jar = jar.remove(Cookie::from(context.config.token_cookie.clone()));

    Ok((jar, StatusCode::NO_CONTENT))
}

#[utoipa::path(
    get,
    path = "/api/v1/users/favorites",
    tag = "users",
    responses((status = 200, description = "The requester's favorite markers"))
)]
pub(crate) async fn favorites(context: ServerContext, session: Session) -> ServerResult<impl IntoResponse> {
    let (favorites, hit) = context
        .domain
        .interactions
        .favorites(session.user_id)
        .await?;

    Ok((cache_header(hit), Json(favorites)))
}

pub fn router() -> Router {
    Router::new()
        .route("/me", get(me).patch(update_me).delete(delete_me))
        .route("/favorites", get(favorites))
}
