use actix_web::{web, HttpResponse, Result};

use crate::api_error::ApiError;
use crate::http::AppState;

pub async fn health_check(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    // Ledger backend: file directory or database connection
    state.ledger.backend().ping().await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "ledger": "ok",
        "pending_events": state.outbox.len()
    })))
}
