use std::time::Duration;

use axum::{
    http::{header, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    Router,
};
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer,
};
use tracing::warn;
use utoipa::OpenApi;
use utoipa_rapidoc::RapiDoc;
use utoipa_swagger_ui::SwaggerUi;

use crate::app_state::AppState;
use crate::config::Config;
use crate::db::queries::category::CategoryDoc;
use crate::db::queries::requests::RequestDoc;
use crate::middleware::auth::{require_admin, require_session, session_middleware};
use crate::middleware::error_detail::expose_error_detail;
use crate::middleware::request_logger::log_requests;

pub mod auth;
pub mod categories;
pub mod health;
pub mod requests;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub fn api_doc() -> utoipa::openapi::OpenApi {
    auth::AuthDoc::openapi()
        .merge_from(CategoryDoc::openapi())
        .merge_from(RequestDoc::openapi())
        .merge_from(health::HealthDoc::openapi())
}

fn cors_layer(config: &Config) -> CorsLayer {
    let Some(origin) = config.cors_origin.as_deref() else {
        return CorsLayer::permissive();
    };
    match HeaderValue::from_str(origin) {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_credentials(true)
            .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::ACCEPT]),
        Err(_) => {
            warn!(origin, "CORS_ORIGIN is not a valid header value; allowing any origin");
            CorsLayer::permissive()
        }
    }
}

/// Full application: public, member and admin routes, API docs, and the
/// middleware stack.
pub fn app_router(state: AppState) -> Router {
    let doc = api_doc();

    let public_routes = Router::new()
        .merge(health::health_routes())
        .merge(auth::auth_routes())
        .merge(categories::category_routes());

    let member_routes = Router::new()
        .merge(requests::request_routes())
        .route_layer(from_fn_with_state(state.clone(), require_session));

    let admin_routes = Router::new()
        .merge(categories::admin_category_routes())
        .merge(requests::admin_request_routes())
        .route_layer(from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .merge(public_routes)
        .merge(member_routes)
        .merge(admin_routes)
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", doc.clone()))
        .merge(RapiDoc::with_openapi("/api-docs/rapidoc.json", doc).path("/rapidoc"))
        .layer(from_fn_with_state(state.clone(), expose_error_detail))
        .layer(from_fn_with_state(state.clone(), session_middleware))
        .layer(from_fn(log_requests))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(CompressionLayer::new())
        .layer(cors_layer(&state.config))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{header::COOKIE, Request, StatusCode};
    use chrono::{DateTime, Months, Utc};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::db::models::user::{NewUser, Role, User};
    use crate::db::store::Store;
    use crate::middleware::auth::Session;

    struct TestApp {
        router: Router,
        state: AppState,
    }

    impl TestApp {
        fn new(config: Config) -> Self {
            let state = AppState::new(Arc::new(MemoryStore::new()), Arc::new(config));
            TestApp {
                router: app_router(state.clone()),
                state,
            }
        }

        async fn user(&self, google_id: &str, role: Role) -> (User, String) {
            let user = self
                .state
                .store
                .upsert_google_user(&NewUser {
                    google_id: google_id.to_string(),
                    email: format!("{google_id}@example.com"),
                    name: format!("Name {google_id}"),
                    avatar: String::new(),
                    role,
                })
                .await
                .unwrap();
            let session = self.state.sessions.create(Session {
                user_id: user.id,
                role,
            });
            (user, session)
        }

        async fn call(
            &self,
            method: Method,
            uri: &str,
            session: Option<&str>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(id) = session {
                builder = builder.header(COOKIE, format!("connect.sid={id}"));
            }
            let request = match body {
                Some(body) => builder
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };

            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            let json = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, json)
        }

        async fn create_category(&self, admin: &str, name: &str, rank: i32) -> String {
            let (status, body) = self
                .call(
                    Method::POST,
                    "/categories/createCategory",
                    Some(admin),
                    Some(json!({ "name": name, "description": format!("{name} courses"), "rank": rank })),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED, "{body}");
            body["category"]["_id"].as_str().unwrap().to_string()
        }
    }

    #[tokio::test]
    async fn request_approval_flows_into_grants_and_history() {
        let app = TestApp::new(Config::default());
        let (_, admin) = app.user("admin", Role::Admin).await;
        let (u1, u1_session) = app.user("u1", Role::User).await;
        let design = app.create_category(&admin, "Design", 1).await;

        let (status, body) = app
            .call(
                Method::POST,
                "/requests/send",
                Some(u1_session.as_str()),
                Some(json!({ "userId": u1.id, "categoryName": "Design" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["message"], "Request sent");
        assert_eq!(body["requests"].as_array().unwrap().len(), 1);
        assert_eq!(body["requests"][0]["categoryName"], "Design");
        let request_id = body["requests"][0]["_id"].as_str().unwrap().to_string();

        let (status, queue) = app.call(Method::GET, "/requests/getRequests", Some(admin.as_str()), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(queue["requests"][0]["userEmail"], "u1@example.com");

        let (status, body) = app
            .call(
                Method::POST,
                "/requests/allowRequest",
                Some(admin.as_str()),
                Some(json!({ "userId": u1.id, "id": request_id })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        let allowed = body["allowedCategories"].as_array().unwrap();
        assert_eq!(allowed.len(), 1);
        assert_eq!(allowed[0]["categoryId"], design.as_str());

        let expiry: DateTime<Utc> = allowed[0]["expiredDate"].as_str().unwrap().parse().unwrap();
        let expected = Utc::now().checked_add_months(Months::new(1)).unwrap();
        assert!((expected - expiry).num_seconds().abs() < 60);

        let (status, body) = app
            .call(Method::GET, "/requests/getAllRequestHistory", Some(admin.as_str()), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        let history = body["history"].as_array().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0]["state"], "accepted");
        assert_eq!(history[0]["userName"], "Name u1");
        assert_eq!(history[0]["categoryName"], "Design");

        // The request is gone: approving it again finds nothing.
        let (status, body) = app
            .call(
                Method::POST,
                "/requests/allowRequest",
                Some(admin.as_str()),
                Some(json!({ "userId": u1.id, "id": request_id })),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Request not found");

        let (status, body) = app
            .call(Method::GET, "/requests/getUserSubscriptions", Some(u1_session.as_str()), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["subscriptions"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn routes_are_gated_by_session_and_role() {
        let app = TestApp::new(Config::default());
        let (_, member) = app.user("member", Role::User).await;
        let (other, _) = app.user("other", Role::User).await;

        let (status, body) = app.call(Method::GET, "/requests/getRequests", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Not authenticated");

        let (status, _) = app.call(Method::GET, "/requests/getRequests", Some(member.as_str()), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app
            .call(
                Method::POST,
                "/categories/createCategory",
                Some(member.as_str()),
                Some(json!({ "name": "X", "description": "x", "rank": 1 })),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app
            .call(
                Method::POST,
                "/requests/send",
                Some(member.as_str()),
                Some(json!({ "userId": other.id, "categoryName": "Design" })),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app.call(Method::GET, "/requests/checkExpiration", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = app.call(Method::GET, "/categories/getCategories", None, None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = app.call(Method::GET, "/health/live", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn disabled_auth_opens_every_route() {
        let app = TestApp::new(Config {
            auth_disabled: true,
            ..Config::default()
        });
        let (status, body) = app.call(Method::GET, "/requests/getRequests", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["requests"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn categories_are_listed_by_rank() {
        let app = TestApp::new(Config::default());
        let (_, admin) = app.user("admin", Role::Admin).await;
        app.create_category(&admin, "Third", 3).await;
        app.create_category(&admin, "First", 1).await;
        app.create_category(&admin, "Second", 2).await;

        let (status, body) = app.call(Method::GET, "/categories/getCategories", None, None).await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = body["categoriesData"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["First", "Second", "Third"]);

        let (status, body) = app
            .call(
                Method::POST,
                "/categories/createCategory",
                Some(admin.as_str()),
                Some(json!({ "name": "First", "description": "again", "rank": 9 })),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT, "{body}");

        let (status, body) = app
            .call(
                Method::POST,
                "/categories/createCategory",
                Some(admin.as_str()),
                Some(json!({ "name": "No rank", "description": "x" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Name, description and rank are required");
    }

    #[tokio::test]
    async fn category_items_are_replaced_and_rendered_in_arabic() {
        let app = TestApp::new(Config::default());
        let (_, admin) = app.user("admin", Role::Admin).await;
        let id = app.create_category(&admin, "Design", 1).await;

        let (status, body) = app
            .call(
                Method::PATCH,
                "/categories/updateCategory",
                Some(admin.as_str()),
                Some(json!({
                    "_id": id,
                    "price": 25.0,
                    "items": [
                        { "title": "Intro", "state": "available" },
                        { "title": "Advanced", "state": "قريباً", "price": 10.0 }
                    ]
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        let items = body["category"]["items"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["state"], "متاح");
        assert_eq!(items[1]["state"], "قريباً");
        assert_eq!(body["category"]["name"], "Design");
        assert_eq!(body["category"]["price"], 25.0);

        let (status, _) = app
            .call(
                Method::PATCH,
                "/categories/updateCategory",
                Some(admin.as_str()),
                Some(json!({ "_id": id, "items": [{ "title": "A" }, { "title": "A" }] })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app
            .call(Method::DELETE, &format!("/categories/deleteCategory/{id}"), Some(admin.as_str()), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = app
            .call(Method::GET, &format!("/categories/getCategoryById/{id}"), None, None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Category not found");
    }

    #[tokio::test]
    async fn removing_an_unknown_request_succeeds() {
        let app = TestApp::new(Config::default());
        let (u1, session) = app.user("u1", Role::User).await;
        app.call(
            Method::POST,
            "/requests/send",
            Some(session.as_str()),
            Some(json!({ "userId": u1.id, "categoryName": "Design", "itemName": "Intro" })),
        )
        .await;

        let uri = format!("/requests/remove/{}/{}", u1.id, Uuid::new_v4());
        let (status, body) = app.call(Method::DELETE, &uri, Some(session.as_str()), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Request removed");
        assert_eq!(body["requests"].as_array().unwrap().len(), 1);

        let uri = format!("/requests/remove/{}/{}", Uuid::new_v4(), Uuid::new_v4());
        let (status, body) = app.call(Method::DELETE, &uri, None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{body}");
    }

    #[tokio::test]
    async fn check_auth_reports_the_session_user() {
        let app = TestApp::new(Config::default());
        let (_, session) = app.user("u1", Role::User).await;

        let (status, body) = app.call(Method::GET, "/auth/checkAuth", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({ "message": "Not authenticated", "user": null }));

        let (status, body) = app.call(Method::GET, "/auth/checkAuth", Some(session.as_str()), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["email"], "u1@example.com");
        assert_eq!(body["user"]["role"], "user");
        assert!(body["user"]["allowedCategories"].as_array().unwrap().is_empty());

        let (status, _) = app.call(Method::GET, "/auth/logout", Some(session.as_str()), None).await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        let (status, _) = app.call(Method::GET, "/auth/checkAuth", Some(session.as_str()), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_user_ids_are_not_found() {
        let app = TestApp::new(Config::default());
        let (_, admin) = app.user("admin", Role::Admin).await;

        let (status, body) = app
            .call(
                Method::POST,
                "/requests/allowRequest",
                Some(admin.as_str()),
                Some(json!({ "userId": "u1", "id": "r1" })),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "User not found");

        let (status, body) = app
            .call(Method::POST, "/requests/rejectRequest", Some(admin.as_str()), Some(json!({ "userId": "u1" })))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "userId and id are required");

        let uri = format!("/requests/checkExpiration/{}", Uuid::new_v4());
        let (status, _) = app.call(Method::GET, &uri, Some(admin.as_str()), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn server_error_detail_follows_the_router_config() {
        // No Google credentials configured, so the redirect fails with a 500.
        let app = TestApp::new(Config::default());
        let (status, body) = app.call(Method::GET, "/auth/google", None, None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Google sign-in is not configured");
        assert!(body["error"].as_str().unwrap().contains("GOOGLE_CLIENT_ID"));

        let app = TestApp::new(Config {
            production: true,
            ..Config::default()
        });
        let (status, body) = app.call(Method::GET, "/auth/google", None, None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Google sign-in is not configured");
        assert!(body.get("error").is_none());
    }
}
