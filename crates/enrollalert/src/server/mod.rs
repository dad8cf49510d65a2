use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::db::EnrollDb;
use crate::server::endpoints::{alerts, sections, status};

mod endpoints;
mod types;

/// State shared by all handlers.
pub struct AppState {
    pub db: Arc<EnrollDb>,
}

/// Creates a router that can be used by `axum`.
///
/// # Parameters
/// - `app_state`: The app server state.
///
/// # Returns
/// The router.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(status::get_health))
        .route(
            "/terms/:term/courses/:course_id/sections",
            get(sections::get_course_sections),
        )
        .route("/alerts", post(alerts::post_alerts))
        .with_state(app_state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::section;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app() -> (Router, Arc<EnrollDb>) {
        let db = Arc::new(EnrollDb::open_in_memory().unwrap());
        let router = create_router(Arc::new(AppState {
            db: Arc::clone(&db),
        }));
        (router, db)
    }

    async fn body_json(resp: axum::response::Response) -> Value {
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    fn post_alerts(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/alerts")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app();
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_get_sections() {
        let (app, db) = app();
        db.upsert_section(&section("266-024795", "001", 3)).unwrap();
        db.upsert_section(&section("266-024795", "002", 0)).unwrap();

        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/terms/1262/courses/266-024795/sections")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = body_json(resp).await;
        let sections = body.as_array().unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0]["section_num"], "001");
        assert_eq!(sections[0]["open_seats"], 3);
        assert_eq!(sections[1]["term"], "1262");
    }

    #[tokio::test]
    async fn test_get_sections_bad_term() {
        let (app, _) = app();
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/terms/fall/courses/266-024795/sections")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(resp).await["error"].is_string());
    }

    #[tokio::test]
    async fn test_post_alerts_creates_rules() {
        let (app, db) = app();
        let resp = app
            .oneshot(post_alerts(json!({
                "email": "bucky@wisc.edu",
                "course_id": "266-024795",
                "section_nums": ["001", "002"],
                "alert_type": "at_least",
                "seat_threshold": 3
            })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let body = body_json(resp).await;
        let user_id = body["user_id"].as_i64().unwrap();
        assert_eq!(body["alerts"].as_array().unwrap().len(), 2);

        let rules = db.alerts_for_user(user_id).unwrap();
        assert_eq!(rules.len(), 2);
        assert!(rules.iter().all(|r| r.kind == crate::types::AlertKind::AtLeast(3)));
    }

    #[tokio::test]
    async fn test_post_alerts_replaces_existing_rule() {
        let (app, db) = app();
        for (alert_type, threshold) in [("at_most", json!(2)), ("any", Value::Null)] {
            let resp = app
                .clone()
                .oneshot(post_alerts(json!({
                    "email": "bucky@wisc.edu",
                    "course_id": "266-024795",
                    "section_nums": ["001"],
                    "alert_type": alert_type,
                    "seat_threshold": threshold
                })))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::CREATED);
        }

        let user_id = db.upsert_user("bucky@wisc.edu").unwrap();
        let rules = db.alerts_for_user(user_id).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].kind, crate::types::AlertKind::Any);
    }

    #[tokio::test]
    async fn test_post_alerts_validation() {
        let cases = [
            json!({ "email": "bucky@wisc.edu", "course_id": "1", "section_nums": [], "alert_type": "any" }),
            json!({ "email": "not-an-email", "course_id": "1", "section_nums": ["001"], "alert_type": "any" }),
            json!({ "email": "bucky@wisc.edu", "course_id": "1", "section_nums": ["001"], "alert_type": "at_least" }),
            json!({ "email": "bucky@wisc.edu", "course_id": "1", "section_nums": ["001"], "alert_type": "at_most", "seat_threshold": 0 }),
            json!({ "email": "bucky@wisc.edu", "course_id": "1", "section_nums": ["001"], "alert_type": "threshold", "seat_threshold": 5 }),
            json!({ "email": "bucky@wisc.edu", "course_id": "", "section_nums": ["001"], "alert_type": "any" }),
        ];

        let (app, _) = app();
        for case in cases {
            let resp = app.clone().oneshot(post_alerts(case.clone())).await.unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "accepted {case}");
        }
    }
}
