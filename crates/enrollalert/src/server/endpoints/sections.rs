use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::info;

use crate::server::types::ApiErrorType;
use crate::server::AppState;
use crate::types::Term;

/// GET /terms/:term/courses/:course_id/sections
/// Returns the stored sections of one course, ordered by section number
pub async fn get_course_sections(
    Path((term, course_id)): Path<(String, String)>,
    State(s): State<Arc<AppState>>,
) -> Response {
    info!("GET /terms/{}/courses/{}/sections", term, course_id);

    let term: Term = match term.parse() {
        Ok(term) => term,
        Err(e) => {
            return ApiErrorType::from((
                StatusCode::BAD_REQUEST,
                "Invalid term",
                Some(format!("{}", e)),
            ))
            .into_response()
        }
    };

    match s.db.sections_for_course(term, &course_id) {
        Ok(sections) => (StatusCode::OK, Json(sections)).into_response(),
        Err(e) => ApiErrorType::from((
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to fetch sections",
            Some(e.to_string()),
        ))
        .into_response(),
    }
}
