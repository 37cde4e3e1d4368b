use axum::{response::IntoResponse, Json};
use utoipa::OpenApi;

use crate::{auth, comments, markers, reports, schemas, serialized, stories, users};

#[derive(OpenApi)]
#[openapi(
    info(description = "pullup-server exposes the pullup marker, story, and chat API"),
    paths(
        auth::signup,
        auth::login,
        auth::logout,
        auth::send_verification,
        auth::confirm_verification,
        auth::request_password_reset,
        auth::reset_password,
        auth::oauth,
        markers::all_markers,
        markers::new_markers,
        markers::marker_detail,
        markers::create_marker,
        markers::update_marker,
        markers::delete_marker,
        markers::close_markers,
        markers::area_ranking,
        markers::global_ranking,
        markers::unique_visitors,
        markers::verify_location,
        markers::my_markers,
        markers::facilities,
        markers::set_facilities,
        markers::add_dislike,
        markers::remove_dislike,
        markers::dislike_status,
        markers::add_favorite,
        markers::remove_favorite,
        markers::upload_photos,
        stories::all_stories,
        stories::marker_stories,
        stories::add_story,
        stories::delete_story,
        stories::add_reaction,
        stories::remove_reaction,
        stories::report_story,
        comments::create_comment,
        comments::marker_comments,
        comments::update_comment,
        comments::remove_comment,
        reports::create_report,
        reports::reports_for_marker,
        reports::my_reports,
        reports::reports_for_my_markers,
        reports::approve_report,
        reports::deny_report,
        users::me,
        users::update_me,
        users::delete_me,
        users::favorites,
    ),
    components(schemas(
        schemas::LoginSchema,
        schemas::SignupSchema,
        schemas::SendVerificationSchema,
        schemas::ConfirmVerificationSchema,
        schemas::RequestResetSchema,
        schemas::ResetPasswordSchema,
        schemas::UpdateUsernameSchema,
        schemas::UpdateDescriptionSchema,
        schemas::NewCommentSchema,
        schemas::UpdateCommentSchema,
        schemas::FacilityQuantitySchema,
        schemas::SetFacilitiesSchema,
        schemas::ReactionSchema,
        schemas::StoryReportSchema,
        serialized::User,
        serialized::LoginResult,
    ))
)]
pub struct ApiDoc;

pub async fn docs() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}
