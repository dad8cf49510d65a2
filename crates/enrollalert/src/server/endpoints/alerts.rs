use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, LazyLock};
use tracing::{error, info};

use crate::notify::RecipientKey;
use crate::server::types::ApiErrorType;
use crate::server::AppState;
use crate::types::{AlertKind, AlertRule};

static EMAIL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

/// Body of `POST /alerts`.
#[derive(Debug, Deserialize)]
pub struct CreateAlertsRequest {
    pub email: String,
    pub course_id: String,
    #[serde(default)]
    pub section_nums: Vec<String>,
    pub alert_type: String,
    pub seat_threshold: Option<i64>,
}

fn bad_request(message: &str, context: Option<String>) -> Response {
    ApiErrorType::from((StatusCode::BAD_REQUEST, message, context)).into_response()
}

/// POST /alerts
/// Creates (or replaces) one alert per listed section for the given address
pub async fn post_alerts(
    State(s): State<Arc<AppState>>,
    Json(body): Json<CreateAlertsRequest>,
) -> Response {
    let email = body.email.trim();
    info!(
        "POST /alerts - {} section(s) of {} for {}",
        body.section_nums.len(),
        body.course_id,
        RecipientKey::from_address(email)
    );

    if !EMAIL_REGEX.is_match(email) {
        return bad_request("Invalid email address", None);
    }
    if body.course_id.trim().is_empty() {
        return bad_request("Missing course_id", None);
    }
    if body.section_nums.is_empty() || body.section_nums.iter().any(|s| s.trim().is_empty()) {
        return bad_request("At least one section number is required", None);
    }

    let kind = match AlertKind::from_parts(&body.alert_type, body.seat_threshold) {
        Ok(kind) => kind,
        Err(e) => return bad_request("Invalid alert", Some(e.to_string())),
    };

    let user_id = match s.db.upsert_user(email) {
        Ok(id) => id,
        Err(e) => {
            error!("Failed to upsert user: {}", e);
            return ApiErrorType::from((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to save alert",
                Some(e.to_string()),
            ))
            .into_response();
        }
    };

    let mut created = Vec::with_capacity(body.section_nums.len());
    for section_num in &body.section_nums {
        let rule = AlertRule {
            user_id,
            course_id: body.course_id.trim().to_string(),
            section_num: section_num.trim().to_string(),
            kind,
        };
        if let Err(e) = s.db.upsert_alert(&rule) {
            error!("Failed to upsert alert: {}", e);
            return ApiErrorType::from((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to save alert",
                Some(e.to_string()),
            ))
            .into_response();
        }
        created.push(rule);
    }

    (
        StatusCode::CREATED,
        Json(json!({
            "user_id": user_id,
            "alerts": created,
        })),
    )
        .into_response()
}
