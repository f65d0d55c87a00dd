use actix_web::{middleware::from_fn, web, HttpResponse};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::{
    auth::{admin_api_guard, AuthUser},
    error::ShopError,
    retention,
    settings::{self, SettingsUpdate},
    state::AppState,
};

#[derive(Deserialize)]
struct ResetRequest {
    #[serde(default)]
    confirmation: String,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/admin")
            .wrap(from_fn(admin_api_guard))
            .service(web::resource("/cleanup").route(web::post().to(cleanup)))
            .service(web::resource("/reset").route(web::post().to(reset)))
            .service(
                web::resource("/settings")
                    .route(web::get().to(read_settings))
                    .route(web::post().to(update_settings)),
            ),
    );
}

async fn cleanup(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
) -> Result<HttpResponse, ShopError> {
    let report = retention::cleanup(&state.db, Utc::now()).await?;
    log::info!(
        "{} removed {} old appointment(s) and {} service order(s).",
        auth.username,
        report.appointments,
        report.service_orders
    );
    Ok(HttpResponse::Ok().json(json!({
        "ok": true,
        "deleted": report.appointments,
        "report": report,
    })))
}

async fn reset(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    payload: web::Json<ResetRequest>,
) -> Result<HttpResponse, ShopError> {
    let report = retention::reset(&state.db, &payload.confirmation, &auth.id).await?;
    log::warn!("{} reset the shop data.", auth.username);
    Ok(HttpResponse::Ok().json(json!({
        "ok": true,
        "report": report,
    })))
}

async fn read_settings(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "ok": true,
        "settings": state.settings.current(),
    }))
}

async fn update_settings(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    payload: web::Json<SettingsUpdate>,
) -> Result<HttpResponse, ShopError> {
    let updated = settings::update(&state.db, &state.settings, payload.into_inner()).await?;
    log::info!("{} updated the shop settings.", auth.username);
    Ok(HttpResponse::Ok().json(json!({
        "ok": true,
        "settings": updated,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::{self, Role},
        state::test_state,
    };
    use actix_web::{cookie::Cookie, http::StatusCode, test, App};
    use serde_json::Value;

    async fn admin_token(state: &AppState) -> String {
        let user_id = auth::testing::insert_user(&state.db, "chefe", "segredo1", true).await;
        auth::create_session(&state.db, &user_id, Role::Administrator)
            .await
            .unwrap()
    }

    #[actix_web::test]
    async fn anonymous_calls_get_json_403() {
        let state = test_state().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post().uri("/api/admin/cleanup").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["ok"], false);
    }

    #[actix_web::test]
    async fn cleanup_rejects_other_methods() {
        let state = test_state().await;
        let token = admin_token(&state).await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/api/admin/cleanup")
            .cookie(Cookie::new("ms_session", token.clone()))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);

        let req = test::TestRequest::post()
            .uri("/api/admin/cleanup")
            .cookie(Cookie::new("ms_session", token))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["ok"], true);
        assert_eq!(body["deleted"], 0);
    }

    #[actix_web::test]
    async fn reset_needs_the_confirmation_phrase() {
        let state = test_state().await;
        let token = admin_token(&state).await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/admin/reset")
            .cookie(Cookie::new("ms_session", token.clone()))
            .set_json(json!({ "confirmation": "sim" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/api/admin/reset")
            .cookie(Cookie::new("ms_session", token))
            .set_json(json!({ "confirmation": retention::RESET_CONFIRMATION }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn settings_update_refreshes_the_cache() {
        let state = test_state().await;
        let token = admin_token(&state).await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/admin/settings")
            .cookie(Cookie::new("ms_session", token))
            .set_json(json!({ "max_daily_appointments": 4, "enforce_scheduling_policy": true }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let current = state.settings.current();
        assert_eq!(current.max_daily_appointments, 4);
        assert!(current.enforce_scheduling_policy);
    }
}
