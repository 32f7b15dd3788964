use actix_web::{web, HttpResponse, Responder};
use chrono::Utc;

use crate::api_error::ApiError;
use crate::http::AppState;
use crate::service::CooldownAction;

/// POST /api/cooldowns/{action}/{actor_id}
/// Consume one action if the actor's window has passed
pub async fn check_cooldown(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> Result<impl Responder, ApiError> {
    let (action, actor_id) = path.into_inner();
    let action: CooldownAction = action.parse().map_err(ApiError::bad_request)?;

    let decision = state.cooldowns.check(action, &actor_id, Utc::now());
    Ok(HttpResponse::Ok().json(decision))
}

#[cfg(test)]
mod tests {
    use crate::http::{configure_routes, tests::empty_state};
    use actix_web::{http::StatusCode, test, App};

    #[actix_web::test]
    async fn test_role_toggle_cooldown() {
        let app = test::init_service(App::new().app_data(empty_state()).configure(configure_routes)).await;

        let req = test::TestRequest::post().uri("/api/cooldowns/role_toggle/u1").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["permitted"], true);

        let req = test::TestRequest::post().uri("/api/cooldowns/role_toggle/u1").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["permitted"], false);
        assert!(body["retry_after"].as_i64().unwrap() > 0);

        // Independent per actor and per action
        let req = test::TestRequest::post().uri("/api/cooldowns/cast_vote/u1").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["permitted"], true);
    }

    #[actix_web::test]
    async fn test_unknown_action() {
        let app = test::init_service(App::new().app_data(empty_state()).configure(configure_routes)).await;
        let req = test::TestRequest::post().uri("/api/cooldowns/dance/u1").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }
}
