use std::sync::Arc;

use axum::{
    extract::State,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;

use hrbank_storage::Database;

use crate::departments::{self, DepartmentService};
use crate::employees::{self, EmployeeService};

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    departments: DepartmentService,
    employees: EmployeeService,
}

impl AppState {
    pub fn new(metrics: PrometheusHandle, storage: Database) -> Self {
        let clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync> = Arc::new(Utc::now);
        let departments = DepartmentService::new(storage.clone(), clock.clone());
        let employees = EmployeeService::new(storage.clone(), clock);
        Self {
            metrics,
            storage,
            departments,
            employees,
        }
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn departments(&self) -> &DepartmentService {
        &self.departments
    }

    pub fn employees(&self) -> &EmployeeService {
        &self.employees
    }
}

/// Builds the full HTTP surface.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route(
            "/api/departments",
            get(departments::list).post(departments::create),
        )
        .route(
            "/api/departments/:id",
            get(departments::get_by_id)
                .patch(departments::update)
                .delete(departments::remove),
        )
        .route(
            "/api/employees",
            get(employees::list).post(employees::register),
        )
        .route("/api/employees/count", get(employees::count))
        .route(
            "/api/employees/:id",
            get(employees::get_by_id)
                .patch(employees::update)
                .delete(employees::remove),
        )
        .route("/api/employee-logs", get(employees::list_logs))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    crate::telemetry::record_uptime();
    state.metrics().render()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use chrono::Utc;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;
    use uuid::Uuid;

    use hrbank_core::types::EmployeeStatus;
    use hrbank_storage::NewEmployee;

    use crate::telemetry;

    async fn test_state() -> AppState {
        let url = format!(
            "sqlite:file:router_{}?mode=memory&cache=shared",
            Uuid::new_v4().simple()
        );
        let database = Database::connect(&url).await.expect("connect");
        database.run_migrations().await.expect("migrations");
        let metrics = telemetry::init_metrics().expect("metrics");
        AppState::new(metrics, database)
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("request")
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn healthz_reports_ok() {
        let app = app_router(test_state().await);
        let response = app.oneshot(get_request("/healthz")).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn metrics_endpoint_renders_prometheus_text() {
        let app = app_router(test_state().await);
        let response = app.oneshot(get_request("/metrics")).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        let text = String::from_utf8(bytes.to_vec()).expect("utf8");
        assert!(text.contains("app_build_info"));
    }

    #[tokio::test]
    async fn creating_a_department_returns_201_with_a_zero_count() {
        let app = app_router(test_state().await);
        let response = app
            .oneshot(json_request(
                "POST",
                "/api/departments",
                json!({ "name": "Engineering", "description": "Builds things" }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = body_json(response).await;
        assert_eq!(body["name"], "Engineering");
        assert_eq!(body["employee_count"], 0);
        assert!(body["id"].as_i64().is_some());
    }

    #[tokio::test]
    async fn duplicate_department_names_return_a_problem_document() {
        let state = test_state().await;
        let app = app_router(state);

        let first = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/departments",
                json!({ "name": "Engineering" }),
            ))
            .await
            .expect("response");
        assert_eq!(first.status(), StatusCode::CREATED);

        let second = app
            .oneshot(json_request(
                "POST",
                "/api/departments",
                json!({ "name": "Engineering" }),
            ))
            .await
            .expect("response");
        assert_eq!(second.status(), StatusCode::CONFLICT);
        assert_eq!(
            second
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok()),
            Some("application/problem+json")
        );

        let body = body_json(second).await;
        assert_eq!(body["type"], "duplicate_department_name");
    }

    #[tokio::test]
    async fn missing_department_is_a_404_problem() {
        let app = app_router(test_state().await);
        let response = app
            .oneshot(get_request("/api/departments/999"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = body_json(response).await;
        assert_eq!(body["type"], "department_not_found");
    }

    #[tokio::test]
    async fn malformed_cursor_tokens_are_rejected() {
        let app = app_router(test_state().await);
        let response = app
            .oneshot(get_request("/api/departments?cursor=!!notatoken!!"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["type"], "invalid_cursor");
    }

    #[tokio::test]
    async fn department_pages_chain_through_opaque_cursor_tokens() {
        let state = test_state().await;
        let app = app_router(state);

        for name in ["A", "B", "C", "D", "E"] {
            let response = app
                .clone()
                .oneshot(json_request(
                    "POST",
                    "/api/departments",
                    json!({ "name": name }),
                ))
                .await
                .expect("response");
            assert_eq!(response.status(), StatusCode::CREATED);
        }

        let mut names = Vec::new();
        let mut uri = "/api/departments?size=2".to_string();
        loop {
            let response = app
                .clone()
                .oneshot(get_request(&uri))
                .await
                .expect("response");
            assert_eq!(response.status(), StatusCode::OK);
            let body = body_json(response).await;

            for item in body["items"].as_array().expect("items") {
                names.push(item["name"].as_str().expect("name").to_string());
            }
            if body["has_next"] != Value::Bool(true) {
                assert!(body.get("next_cursor").is_none());
                break;
            }
            let token = body["next_cursor"].as_str().expect("cursor token");
            uri = format!("/api/departments?size=2&cursor={token}");
        }

        assert_eq!(names, vec!["A", "B", "C", "D", "E"]);
    }

    #[tokio::test]
    async fn deleting_an_occupied_department_conflicts() {
        let state = test_state().await;
        let app = app_router(state.clone());

        let created = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/departments",
                json!({ "name": "Engineering" }),
            ))
            .await
            .expect("response");
        let department_id = body_json(created).await["id"].as_i64().expect("id");

        let repo = state.storage().employees();
        let mut tx = repo.begin().await.expect("begin");
        repo.insert(
            &mut tx,
            NewEmployee {
                employee_number: "EMP-router",
                name: "Occupant",
                email: "occupant@example.com",
                department_id,
                position: None,
                status: EmployeeStatus::Active,
                hired_at: None,
                created_at: Utc::now(),
            },
        )
        .await
        .expect("insert employee");
        tx.commit().await.expect("commit");

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/departments/{department_id}"))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = body_json(response).await;
        assert_eq!(body["type"], "department_has_employees");
    }

    #[tokio::test]
    async fn employee_registration_and_audit_trail_work_end_to_end() {
        let app = app_router(test_state().await);

        let department = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/departments",
                json!({ "name": "Engineering" }),
            ))
            .await
            .expect("response");
        let department_id = body_json(department).await["id"].as_i64().expect("id");

        let registered = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/employees",
                json!({
                    "name": "Alex Doe",
                    "email": "alex@example.com",
                    "department_id": department_id,
                }),
            ))
            .await
            .expect("response");
        assert_eq!(registered.status(), StatusCode::CREATED);
        let employee = body_json(registered).await;
        assert_eq!(employee["status"], "ACTIVE");
        let employee_id = employee["id"].as_i64().expect("id");

        let updated = app
            .clone()
            .oneshot(json_request(
                "PATCH",
                &format!("/api/employees/{employee_id}"),
                json!({ "status": "ON_LEAVE", "memo": "sabbatical" }),
            ))
            .await
            .expect("response");
        assert_eq!(updated.status(), StatusCode::OK);
        assert_eq!(body_json(updated).await["status"], "ON_LEAVE");

        let trail = app
            .oneshot(get_request("/api/employee-logs"))
            .await
            .expect("response");
        assert_eq!(trail.status(), StatusCode::OK);
        let body = body_json(trail).await;
        let kinds: Vec<&str> = body["items"]
            .as_array()
            .expect("items")
            .iter()
            .map(|item| item["change_type"].as_str().expect("change_type"))
            .collect();
        assert_eq!(kinds, vec!["UPDATED", "CREATED"]);
        assert_eq!(body["items"][0]["memo"], "sabbatical");
    }

    #[tokio::test]
    async fn registering_into_a_missing_department_is_a_404_problem() {
        let app = app_router(test_state().await);
        let response = app
            .oneshot(json_request(
                "POST",
                "/api/employees",
                json!({
                    "name": "Nobody",
                    "email": "nobody@example.com",
                    "department_id": 4242,
                }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = body_json(response).await;
        assert_eq!(body["type"], "department_not_found");
    }

    #[tokio::test]
    async fn headcount_endpoint_filters_by_status_and_hire_dates() {
        let app = app_router(test_state().await);

        let department = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/departments",
                json!({ "name": "Engineering" }),
            ))
            .await
            .expect("response");
        let department_id = body_json(department).await["id"].as_i64().expect("id");

        for (email, hired_at) in [
            ("jan@example.com", Some("2023-01-10")),
            ("jun@example.com", Some("2023-06-15")),
            ("nodate@example.com", None),
        ] {
            let response = app
                .clone()
                .oneshot(json_request(
                    "POST",
                    "/api/employees",
                    json!({
                        "name": "Counted",
                        "email": email,
                        "department_id": department_id,
                        "hired_at": hired_at,
                    }),
                ))
                .await
                .expect("response");
            assert_eq!(response.status(), StatusCode::CREATED);
        }

        let all = app
            .clone()
            .oneshot(get_request("/api/employees/count"))
            .await
            .expect("response");
        assert_eq!(all.status(), StatusCode::OK);
        assert_eq!(body_json(all).await["count"], 3);

        let early = app
            .clone()
            .oneshot(get_request(
                "/api/employees/count?from=2023-01-01&to=2023-03-31",
            ))
            .await
            .expect("response");
        assert_eq!(body_json(early).await["count"], 1);

        let bad_status = app
            .oneshot(get_request("/api/employees/count?status=FIRED"))
            .await
            .expect("response");
        assert_eq!(bad_status.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_status_filters_are_rejected() {
        let app = app_router(test_state().await);
        let response = app
            .oneshot(get_request("/api/employees?status=FIRED"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["type"], "invalid_status");
    }
}
