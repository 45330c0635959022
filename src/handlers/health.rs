use axum::Json;
use crate::models::HealthResponse;
use tracing::debug;

/// Root endpoint, doubles as a health check
pub async fn root() -> Json<HealthResponse> {
    debug!("Root requested");
    Json(HealthResponse {
        status: "healthy".to_string(),
        message: "Collaborative code editor server".to_string(),
    })
}

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    debug!("Health check requested");
    Json(HealthResponse {
        status: "healthy".to_string(),
        message: "Server is running".to_string(),
    })
}
