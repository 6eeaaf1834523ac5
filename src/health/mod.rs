//! Liveness and readiness probes.
//!
//! - `/health` reports the process is up
//! - `/health/ready` pings the database and answers 503 when it is unreachable
//! - `/health/version` returns build information

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, warn};

use crate::db;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Up,
    Down,
}

impl HealthStatus {
    fn status_code(self) -> StatusCode {
        match self {
            HealthStatus::Up => StatusCode::OK,
            HealthStatus::Down => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HealthInfo {
    pub status: HealthStatus,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<HealthStatus>,
}

#[derive(Clone)]
pub struct HealthState {
    pub db_pool: Arc<DatabaseConnection>,
    pub start_time: SystemTime,
}

impl HealthState {
    pub fn new(db_pool: Arc<DatabaseConnection>) -> Self {
        Self {
            db_pool,
            start_time: SystemTime::now(),
        }
    }

    pub fn uptime(&self) -> u64 {
        SystemTime::now()
            .duration_since(self.start_time)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    fn info(&self, status: HealthStatus, database: Option<HealthStatus>) -> HealthInfo {
        HealthInfo {
            status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
            uptime_seconds: self.uptime(),
            database,
        }
    }
}

pub async fn version_info() -> impl IntoResponse {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "commit": option_env!("GIT_HASH").unwrap_or("unknown"),
    }))
}

pub async fn health_check(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    debug!("Health check endpoint called");
    (StatusCode::OK, Json(state.info(HealthStatus::Up, None)))
}

pub async fn readiness_check(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let database = match db::check_connection(&state.db_pool).await {
        Ok(()) => HealthStatus::Up,
        Err(e) => {
            warn!(error = %e, "readiness check failed: database unreachable");
            HealthStatus::Down
        }
    };

    (database.status_code(), Json(state.info(database, Some(database))))
}

/// Health endpoints, to be nested under `/health`
pub fn health_routes<S>(db_pool: Arc<DatabaseConnection>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/version", get(version_info))
        .with_state(Arc::new(HealthState::new(db_pool)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    #[tokio::test]
    async fn ready_reports_database_up() {
        let db = db::establish_connection_with_config(&db::DbConfig {
            url: "sqlite::memory:".into(),
            sqlx_logging: false,
            ..Default::default()
        })
        .await
        .unwrap();
        let app: Router = health_routes(Arc::new(db));

        let response = app
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let info: HealthInfo = serde_json::from_slice(&body).unwrap();
        assert_eq!(info.database, Some(HealthStatus::Up));
    }
}
