use actix_web::{web, HttpResponse, Responder};
use chrono::Utc;
use tracing::info;

use crate::api_error::ApiError;
use crate::http::AppState;
use crate::service::JobKind;

/// POST /api/jobs/{job}/run
/// Run a periodic job right away; 409 while the same job is in flight
pub async fn run_job(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<impl Responder, ApiError> {
    let job: JobKind = path.into_inner().parse().map_err(ApiError::bad_request)?;
    info!(job = %job, "Manual job trigger");

    let events = state.jobs.run(job, Utc::now(), &state.shutdown).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "job": job,
        "events": events
    })))
}

/// POST /api/events/drain
/// Hand every pending event to the chat adapter
pub async fn drain_events(state: web::Data<AppState>) -> Result<impl Responder, ApiError> {
    let events = state.outbox.drain();
    Ok(HttpResponse::Ok().json(serde_json::json!({ "events": events })))
}
