use actix_web::{http::header, web, HttpRequest, HttpResponse, Result};
use askama::Template;
use serde::Deserialize;

use crate::{
    accounts::{self, ClientRegistration},
    auth::{self, clear_session_cookie, current_user, session_cookie, session_token, LoginError},
    db::log_activity,
    flash::{self, Flash},
    state::AppState,
    templates::{render_page, Page},
};

#[derive(Template)]
#[template(path = "login.html")]
struct LoginTemplate {
    page: Page,
    username: String,
    errors: Vec<String>,
}

#[derive(Clone, Debug, Default)]
struct RegistrationView {
    full_name: String,
    username: String,
    email: String,
    phone: String,
    cpf: String,
    address: String,
}

#[derive(Template)]
#[template(path = "register.html")]
struct RegisterTemplate {
    page: Page,
    form: RegistrationView,
    errors: Vec<String>,
}

#[derive(Deserialize)]
struct LoginForm {
    username: Option<String>,
    #[serde(alias = "senha")]
    password: Option<String>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(home)))
        .service(
            web::resource("/login")
                .route(web::get().to(show_login))
                .route(web::post().to(login)),
        )
        .service(
            web::resource("/logout")
                .route(web::get().to(logout))
                .route(web::post().to(logout)),
        )
        .service(
            web::resource("/register")
                .route(web::get().to(show_register))
                .route(web::post().to(register)),
        )
        .service(web::resource("/health").route(web::get().to(health)));
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().body("ok")
}

async fn home(state: web::Data<AppState>, req: HttpRequest) -> HttpResponse {
    match current_user(&state, &req).await {
        Some(user) => flash::redirect(user.role.dashboard_path()),
        None => flash::redirect("/login"),
    }
}

async fn show_login(state: web::Data<AppState>, req: HttpRequest) -> HttpResponse {
    if let Some(user) = current_user(&state, &req).await {
        return flash::redirect(user.role.dashboard_path());
    }
    render_page(
        &req,
        LoginTemplate {
            page: Page::public(&state, &req, "Sign in"),
            username: String::new(),
            errors: Vec::new(),
        },
    )
}

async fn login(state: web::Data<AppState>, req: HttpRequest, form: web::Form<LoginForm>) -> HttpResponse {
    let form = form.into_inner();
    let username = form.username.unwrap_or_default();
    let password = form.password.unwrap_or_default();

    match auth::login(&state.db, &username, &password).await {
        Ok(outcome) => {
            log_activity(
                &state.db,
                "login",
                &format!(
                    "{} signed in as {}.",
                    outcome.user.display_name, outcome.user.role
                ),
                Some(&outcome.user.id),
                None,
            )
            .await;

            let flash = if outcome.defaulted {
                Flash::info("No profile was found for your account; you are signed in as a client.")
            } else {
                Flash::success(format!("Welcome, {}!", outcome.user.display_name))
            };
            HttpResponse::Found()
                .append_header((header::LOCATION, outcome.user.role.dashboard_path()))
                .cookie(session_cookie(&req, &outcome.user.session))
                .cookie(flash.cookie())
                .insert_header((header::CACHE_CONTROL, "no-store"))
                .finish()
        }
        Err(err) => {
            let message = match err {
                LoginError::Store(err) => {
                    log::error!("Login failed: {err}");
                    "Something went wrong. Please try again.".to_string()
                }
                other => other.to_string(),
            };
            render_page(
                &req,
                LoginTemplate {
                    page: Page::public(&state, &req, "Sign in"),
                    username: username.trim().to_string(),
                    errors: vec![message],
                },
            )
        }
    }
}

async fn logout(state: web::Data<AppState>, req: HttpRequest) -> HttpResponse {
    if let Some(token) = session_token(&req) {
        if let Err(err) = auth::delete_session(&state.db, &token).await {
            log::warn!("Could not delete session: {err}");
        }
    }
    HttpResponse::Found()
        .append_header((header::LOCATION, "/login"))
        .cookie(clear_session_cookie(&req))
        .cookie(Flash::info("You have been signed out.").cookie())
        .insert_header((header::CACHE_CONTROL, "no-store"))
        .finish()
}

async fn show_register(state: web::Data<AppState>, req: HttpRequest) -> HttpResponse {
    render_page(
        &req,
        RegisterTemplate {
            page: Page::public(&state, &req, "Create account"),
            form: RegistrationView::default(),
            errors: Vec::new(),
        },
    )
}

async fn register(
    state: web::Data<AppState>,
    req: HttpRequest,
    form: web::Form<ClientRegistration>,
) -> Result<HttpResponse> {
    let registration = form.into_inner();
    match accounts::register_client(&state.db, &registration).await {
        Ok(_) => {
            log_activity(
                &state.db,
                "client_registered",
                &format!("{} created an account.", registration.full_name.trim()),
                None,
                None,
            )
            .await;
            Ok(flash::redirect_with(
                "/login",
                Flash::success("Account created. You can sign in now."),
            ))
        }
        Err(err) => Ok(render_page(
            &req,
            RegisterTemplate {
                page: Page::public(&state, &req, "Create account"),
                form: RegistrationView {
                    full_name: registration.full_name,
                    username: registration.username,
                    email: registration.email,
                    phone: registration.phone,
                    cpf: registration.cpf,
                    address: registration.address,
                },
                errors: err.messages(),
            },
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{auth::testing::insert_user, state::test_state};
    use actix_web::{http::StatusCode, test, App};

    #[actix_web::test]
    async fn login_redirects_to_the_resolved_dashboard() {
        let state = test_state().await;
        let user_id = insert_user(&state.db, "joao", "segredo1", false).await;
        sqlx::query(
            "INSERT INTO mechanics (id, user_id, full_name, specialty, phone, availability) VALUES ('m1', ?, 'João', 'Motor', '1', 'Sempre')",
        )
        .bind(&user_id)
        .execute(&state.db)
        .await
        .unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/login")
            .set_form([("username", "joao"), ("senha", "segredo1")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(
            resp.headers().get(header::LOCATION).unwrap(),
            "/mechanic/dashboard"
        );
        assert!(resp
            .response()
            .cookies()
            .any(|cookie| cookie.name() == "ms_session"));
    }

    #[actix_web::test]
    async fn bad_credentials_rerender_the_form() {
        let state = test_state().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/login")
            .set_form([("username", "ghost"), ("password", "whatever")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = test::read_body(resp).await;
        assert!(String::from_utf8_lossy(&body).contains("Invalid username or password."));
    }

    #[actix_web::test]
    async fn registration_then_login_lands_on_client_dashboard() {
        let state = test_state().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/register")
            .set_form([
                ("full_name", "Ana Souza"),
                ("username", "ana"),
                ("email", "ana@example.com"),
                ("phone", "(11) 99999-0000"),
                ("cpf", "123.456.789-00"),
                ("address", "Rua das Flores, 10"),
                ("password1", "segredo1"),
                ("password2", "segredo1"),
            ])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FOUND);

        let req = test::TestRequest::post()
            .uri("/login")
            .set_form([("username", "ana"), ("password", "segredo1")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(
            resp.headers().get(header::LOCATION).unwrap(),
            "/client/dashboard"
        );
    }
}
