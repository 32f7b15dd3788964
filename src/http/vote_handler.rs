use actix_web::{web, HttpResponse, Responder};
use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use validator::Validate;

use crate::api_error::ApiError;
use crate::http::AppState;
use crate::service::{CooldownAction, LedgerError};

// =============================================================================
// CAST VOTE
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CastVoteRequest {
    #[validate(length(min = 1, max = 64))]
    pub user_id: String,
    #[validate(length(min = 1, max = 100))]
    pub username: String,
    #[validate(length(min = 1, max = 32))]
    pub vote_type: String,
}

/// POST /api/threads/{thread_id}/votes
/// Record a community vote, subject to the per-user vote cooldown.
/// Only a vote the ledger takes counts against the cooldown.
pub async fn cast_vote(
    state: web::Data<AppState>,
    path: web::Path<String>,
    req: web::Json<CastVoteRequest>,
) -> Result<impl Responder, ApiError> {
    let thread_id = path.into_inner();
    req.validate()?;
    if state.ledger.options().resolve(&req.vote_type).is_none() {
        return Err(LedgerError::UnknownVoteOption(req.vote_type.clone()).into());
    }

    let now = Utc::now();
    let decision = state.cooldowns.check(CooldownAction::CastVote, &req.user_id, now);
    if !decision.permitted {
        return Err(ApiError::TooManyRequests {
            retry_after: decision.retry_after,
        });
    }

    info!(
        thread_id = %thread_id,
        user_id = %req.user_id,
        vote_type = %req.vote_type,
        "Received vote"
    );

    let result = state
        .ledger
        .cast_vote(&thread_id, &req.user_id, &req.username, &req.vote_type, now)
        .await
        .inspect_err(|_| {
            state.cooldowns.revoke(CooldownAction::CastVote, &req.user_id, now);
        })?;

    Ok(HttpResponse::Ok().json(result))
}

// =============================================================================
// TALLY
// =============================================================================

/// GET /api/threads/{thread_id}/tally
pub async fn get_tally(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<impl Responder, ApiError> {
    let thread_id = path.into_inner();
    let tally = state.ledger.get_tally(&thread_id).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "thread_id": thread_id,
        "tally": tally
    })))
}

// =============================================================================
// REGISTER PROPOSAL
// =============================================================================

/// Titles longer than the ledger keeps are truncated, not rejected
#[derive(Debug, Deserialize)]
pub struct RegisterProposalRequest {
    pub proposal_index: u64,
    pub title: Option<String>,
    #[serde(default)]
    pub origin: Vec<String>,
}

/// PUT /api/threads/{thread_id}
/// Link a chat thread to the on-chain proposal it discusses
pub async fn register_proposal(
    state: web::Data<AppState>,
    path: web::Path<String>,
    req: web::Json<RegisterProposalRequest>,
) -> Result<impl Responder, ApiError> {
    let thread_id = path.into_inner();
    let req = req.into_inner();

    let entry = state
        .ledger
        .register_proposal(
            &thread_id,
            req.proposal_index,
            req.title.as_deref(),
            req.origin,
            Utc::now(),
        )
        .await?;

    Ok(HttpResponse::Ok().json(entry))
}

// =============================================================================
// VOTER COUNT
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SetVotersRequest {
    pub total_members: u64,
}

/// PUT /api/voters
/// Number of members holding the voter role, used for participation checks
pub async fn set_voters(
    state: web::Data<AppState>,
    req: web::Json<SetVotersRequest>,
) -> Result<impl Responder, ApiError> {
    let planner = state.jobs.proxy_planner();
    if let Some(planner) = planner {
        planner.set_total_members(req.total_members);
        info!(total_members = req.total_members, "Voter count updated");
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "total_members": req.total_members,
        "proxy_voting_enabled": planner.is_some()
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{configure_routes, tests::empty_state};
    use actix_web::{http::StatusCode, test, App};
    use serde_json::json;

    fn vote(user_id: &str, vote_type: &str) -> serde_json::Value {
        json!({"user_id": user_id, "username": user_id, "vote_type": vote_type})
    }

    #[actix_web::test]
    async fn test_cast_vote_and_read_tally() {
        let app = test::init_service(App::new().app_data(empty_state()).configure(configure_routes)).await;

        let req = test::TestRequest::post()
            .uri("/api/threads/T1/votes")
            .set_json(vote("u1", "aye"))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["accepted"], true);
        assert_eq!(body["tally"]["aye"], 1);

        let req = test::TestRequest::get().uri("/api/threads/T1/tally").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["tally"], json!({"aye": 1, "nay": 0, "recuse": 0}));
    }

    #[actix_web::test]
    async fn test_second_vote_within_cooldown_is_rejected() {
        let app = test::init_service(App::new().app_data(empty_state()).configure(configure_routes)).await;

        let first = test::TestRequest::post()
            .uri("/api/threads/T1/votes")
            .set_json(vote("u1", "aye"))
            .to_request();
        assert_eq!(test::call_service(&app, first).await.status(), StatusCode::OK);

        let second = test::TestRequest::post()
            .uri("/api/threads/T1/votes")
            .set_json(vote("u1", "nay"))
            .to_request();
        let resp = test::call_service(&app, second).await;
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(resp.headers().contains_key("Retry-After"));
    }

    #[actix_web::test]
    async fn test_invalid_votes_are_rejected() {
        let app = test::init_service(App::new().app_data(empty_state()).configure(configure_routes)).await;

        let empty_user = test::TestRequest::post()
            .uri("/api/threads/T1/votes")
            .set_json(vote("", "aye"))
            .to_request();
        assert_eq!(test::call_service(&app, empty_user).await.status(), StatusCode::BAD_REQUEST);

        let unknown = test::TestRequest::post()
            .uri("/api/threads/T1/votes")
            .set_json(vote("u2", "maybe"))
            .to_request();
        assert_eq!(test::call_service(&app, unknown).await.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_rejected_vote_does_not_start_cooldown() {
        let app = test::init_service(App::new().app_data(empty_state()).configure(configure_routes)).await;

        let unknown = test::TestRequest::post()
            .uri("/api/threads/T1/votes")
            .set_json(vote("u1", "maybe"))
            .to_request();
        assert_eq!(test::call_service(&app, unknown).await.status(), StatusCode::BAD_REQUEST);

        let corrected = test::TestRequest::post()
            .uri("/api/threads/T1/votes")
            .set_json(vote("u1", "aye"))
            .to_request();
        assert_eq!(test::call_service(&app, corrected).await.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_vote_on_archived_thread_does_not_start_cooldown() {
        let state = empty_state();
        state
            .ledger
            .register_proposal("T1", 1, Some("Old"), vec![], Utc::now())
            .await
            .unwrap();
        state.ledger.backend().archive("T1").await.unwrap();
        let app = test::init_service(App::new().app_data(state).configure(configure_routes)).await;

        let archived = test::TestRequest::post()
            .uri("/api/threads/T1/votes")
            .set_json(vote("u1", "aye"))
            .to_request();
        assert_eq!(test::call_service(&app, archived).await.status(), StatusCode::CONFLICT);

        let elsewhere = test::TestRequest::post()
            .uri("/api/threads/T2/votes")
            .set_json(vote("u1", "aye"))
            .to_request();
        assert_eq!(test::call_service(&app, elsewhere).await.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_register_proposal() {
        let app = test::init_service(App::new().app_data(empty_state()).configure(configure_routes)).await;

        let req = test::TestRequest::put()
            .uri("/api/threads/T9")
            .set_json(json!({"proposal_index": 9, "title": "Treasury", "origin": ["SmallSpender"]}))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["proposal_index"], 9);
        assert_eq!(body["title"], "Treasury");
        assert_eq!(body["origin"], json!(["SmallSpender"]));
    }

    #[actix_web::test]
    async fn test_set_voters_without_proxy_voting() {
        let app = test::init_service(App::new().app_data(empty_state()).configure(configure_routes)).await;

        let req = test::TestRequest::put()
            .uri("/api/voters")
            .set_json(json!({"total_members": 40}))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["proxy_voting_enabled"], false);
    }
}
