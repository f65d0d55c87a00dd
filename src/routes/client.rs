use actix_web::{http::header, middleware::from_fn, web, HttpRequest, HttpResponse, Result};
use askama::Template;
use chrono::Utc;

use crate::{
    accounts::ensure_client_profile,
    auth::{client_guard, AuthUser},
    catalog::{self, NewMotorcycle},
    dashboard,
    error::ShopError,
    flash::{self, Flash},
    input,
    lifecycle::{Actor, AppointmentForm, LifecycleError},
    models::{format_cents, AppointmentRow, MotorcycleRow, ServiceRow},
    routes::{keep_option, to_view, to_views, AppointmentView, SelectOption, StatCard},
    state::AppState,
    templates::{render_page, Page},
};

#[derive(Template)]
#[template(path = "client_dashboard.html")]
struct ClientDashboardTemplate {
    page: Page,
    stats: Vec<StatCard>,
    upcoming: Vec<AppointmentView>,
    last_completed: Option<AppointmentView>,
}

#[derive(Template)]
#[template(path = "client_appointments.html")]
struct ClientAppointmentsTemplate {
    page: Page,
    heading: String,
    appointments: Vec<AppointmentView>,
    history: bool,
}

/// Booking/edit form values as typed, for re-rendering.
#[derive(Clone, Debug, Default)]
pub struct AppointmentFormView {
    pub brand: String,
    pub model: String,
    pub year: String,
    pub other_service: String,
    pub date: String,
    pub time: String,
    pub description: String,
}

impl AppointmentFormView {
    pub fn from_form(form: &AppointmentForm) -> Self {
        Self {
            brand: form.brand.clone().unwrap_or_default(),
            model: form.model.clone().unwrap_or_default(),
            year: form.year.clone().unwrap_or_default(),
            other_service: form.other_service.clone().unwrap_or_default(),
            date: form.date.clone().unwrap_or_default(),
            time: form.time.clone().unwrap_or_default(),
            description: form.description.clone().unwrap_or_default(),
        }
    }

    pub fn from_row(row: &AppointmentRow, offset_minutes: i64) -> Self {
        let (date, time) = input::local_fields(&row.scheduled_for, offset_minutes);
        Self {
            date,
            time,
            description: row.problem_description.clone().unwrap_or_default(),
            ..Self::default()
        }
    }
}

#[derive(Template)]
#[template(path = "client_appointment_form.html")]
struct AppointmentFormTemplate {
    page: Page,
    action: String,
    editing: bool,
    motorcycles: Vec<SelectOption>,
    services: Vec<SelectOption>,
    form: AppointmentFormView,
    errors: Vec<String>,
}

#[derive(Clone, Debug)]
struct MotorcycleView {
    id: String,
    title: String,
    color: String,
}

#[derive(Template)]
#[template(path = "client_motorcycles.html")]
struct MotorcyclesTemplate {
    page: Page,
    motorcycles: Vec<MotorcycleView>,
    errors: Vec<String>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/client")
            .wrap(from_fn(client_guard))
            .service(web::resource("").route(web::get().to(index)))
            .service(web::resource("/").route(web::get().to(index)))
            .service(web::resource("/dashboard").route(web::get().to(dashboard)))
            .service(web::resource("/appointments").route(web::get().to(list_appointments)))
            .service(web::resource("/history").route(web::get().to(history)))
            .service(
                web::resource("/appointments/new")
                    .route(web::get().to(show_booking))
                    .route(web::post().to(book)),
            )
            .service(
                web::resource("/appointments/{id}/edit")
                    .route(web::get().to(show_edit))
                    .route(web::post().to(reschedule)),
            )
            .service(web::resource("/appointments/{id}/cancel").route(web::post().to(cancel)))
            .service(
                web::resource("/motorcycles")
                    .route(web::get().to(list_motorcycles))
                    .route(web::post().to(add_motorcycle)),
            )
            .service(web::resource("/motorcycles/{id}/delete").route(web::post().to(delete_motorcycle))),
    );
}

async fn index() -> HttpResponse {
    HttpResponse::Found()
        .append_header((header::LOCATION, "/client/dashboard"))
        .finish()
}

async fn profile(state: &AppState, auth: &AuthUser) -> Result<String> {
    ensure_client_profile(&state.db, auth)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)
}

async fn dashboard(
    state: web::Data<AppState>,
    req: HttpRequest,
    auth: web::ReqData<AuthUser>,
) -> Result<HttpResponse> {
    let client_id = profile(&state, &auth).await?;
    let offset = state.settings.current().utc_offset_minutes;
    let view = dashboard::client(&state.db, &client_id, Utc::now())
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;

    let stats = vec![
        StatCard::new("Appointments", view.counts.total()),
        StatCard::new("Scheduled", view.counts.scheduled),
        StatCard::new("In progress", view.counts.in_progress),
        StatCard::new("Completed", view.counts.completed),
        StatCard::new("Cancelled", view.counts.cancelled),
        StatCard::new("Motorcycles", view.motorcycles),
        StatCard::new("Total spent", format_cents(view.revenue_cents)),
    ];

    Ok(render_page(
        &req,
        ClientDashboardTemplate {
            page: Page::new(&state, &req, &auth, "My dashboard"),
            stats,
            upcoming: to_views(view.upcoming, offset),
            last_completed: view.last_completed.map(|row| to_view(row, offset)),
        },
    ))
}

async fn list_appointments(
    state: web::Data<AppState>,
    req: HttpRequest,
    auth: web::ReqData<AuthUser>,
) -> Result<HttpResponse> {
    let client_id = profile(&state, &auth).await?;
    let rows = state
        .engine()
        .list_for_client(&client_id)
        .await
        .unwrap_or_default();

    Ok(render_page(
        &req,
        ClientAppointmentsTemplate {
            page: Page::new(&state, &req, &auth, "My appointments"),
            heading: "My appointments".to_string(),
            appointments: to_views(rows, state.settings.current().utc_offset_minutes),
            history: false,
        },
    ))
}

async fn history(
    state: web::Data<AppState>,
    req: HttpRequest,
    auth: web::ReqData<AuthUser>,
) -> Result<HttpResponse> {
    let client_id = profile(&state, &auth).await?;
    let rows = state
        .engine()
        .history_for_client(&client_id)
        .await
        .unwrap_or_default();

    Ok(render_page(
        &req,
        ClientAppointmentsTemplate {
            page: Page::new(&state, &req, &auth, "Service history"),
            heading: "Service history".to_string(),
            appointments: to_views(rows, state.settings.current().utc_offset_minutes),
            history: true,
        },
    ))
}

fn motorcycle_options(motorcycles: Vec<MotorcycleRow>, current: &str) -> Vec<SelectOption> {
    let mut options = vec![SelectOption::new("new", "Register a new motorcycle", current)];
    options.extend(
        motorcycles
            .iter()
            .map(|moto| SelectOption::new(moto.id.clone(), moto.title(), current)),
    );
    options
}

pub fn service_options(services: Vec<ServiceRow>, current: &str) -> Vec<SelectOption> {
    let mut options: Vec<SelectOption> = services
        .into_iter()
        .map(|service| {
            let label = match service.price_cents {
                Some(cents) => format!("{} ({})", service.name, format_cents(cents)),
                None => service.name,
            };
            SelectOption::new(service.id, label, current)
        })
        .collect();
    options.push(SelectOption::new("other", "Other (describe below)", current));
    options
}

#[allow(clippy::too_many_arguments)]
async fn form_page(
    state: &AppState,
    req: &HttpRequest,
    auth: &AuthUser,
    client_id: &str,
    action: String,
    editing: bool,
    current: Option<&AppointmentRow>,
    selected_motorcycle: &str,
    selected_service: &str,
    form: AppointmentFormView,
    errors: Vec<String>,
) -> HttpResponse {
    let motorcycles = catalog::list_motorcycles(&state.db, client_id)
        .await
        .unwrap_or_default();
    let services = catalog::list_services(&state.db, true)
        .await
        .unwrap_or_default();
    let title = if editing { "Edit appointment" } else { "Book a service" };

    let mut motorcycles = motorcycle_options(motorcycles, selected_motorcycle);
    let mut services = service_options(services, selected_service);
    if let Some(row) = current {
        keep_option(
            &mut motorcycles,
            &row.motorcycle_id,
            format!("{} {} {}", row.motorcycle_brand, row.motorcycle_model, row.motorcycle_year),
            selected_motorcycle,
        );
        keep_option(&mut services, &row.service_id, row.service_name.clone(), selected_service);
    }

    render_page(
        req,
        AppointmentFormTemplate {
            page: Page::new(state, req, auth, title),
            action,
            editing,
            motorcycles,
            services,
            form,
            errors,
        },
    )
}

async fn show_booking(
    state: web::Data<AppState>,
    req: HttpRequest,
    auth: web::ReqData<AuthUser>,
) -> Result<HttpResponse> {
    let client_id = profile(&state, &auth).await?;
    Ok(form_page(
        &state,
        &req,
        &auth,
        &client_id,
        "/client/appointments/new".to_string(),
        false,
        None,
        "",
        "",
        AppointmentFormView::default(),
        Vec::new(),
    )
    .await)
}

async fn book(
    state: web::Data<AppState>,
    req: HttpRequest,
    auth: web::ReqData<AuthUser>,
    form: web::Form<AppointmentForm>,
) -> Result<HttpResponse> {
    let client_id = profile(&state, &auth).await?;
    let form = form.into_inner();

    match state.engine().create(&client_id, &form).await {
        Ok(row) => Ok(flash::redirect_with(
            "/client/appointments",
            Flash::success(format!(
                "{} booked for {}.",
                row.service_name,
                input::local_display(&row.scheduled_for, state.settings.current().utc_offset_minutes)
            )),
        )),
        Err(err) => Ok(form_page(
            &state,
            &req,
            &auth,
            &client_id,
            "/client/appointments/new".to_string(),
            false,
            None,
            form.motorcycle_id.as_deref().unwrap_or_default(),
            form.service_id.as_deref().unwrap_or_default(),
            AppointmentFormView::from_form(&form),
            vec![err.user_message()],
        )
        .await),
    }
}

async fn show_edit(
    state: web::Data<AppState>,
    req: HttpRequest,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let client_id = profile(&state, &auth).await?;
    let appointment_id = path.into_inner();
    let row = match state
        .engine()
        .load_for(&appointment_id, Actor::Client(&client_id))
        .await
    {
        Ok(row) if !row.status().is_final() => row,
        Ok(row) => {
            return Ok(flash::redirect_with(
                "/client/appointments",
                Flash::error(format!(
                    "Cannot change a {} appointment.",
                    row.status().label().to_lowercase()
                )),
            ))
        }
        Err(err) => {
            return Ok(flash::redirect_with(
                "/client/appointments",
                Flash::error(err.user_message()),
            ))
        }
    };

    let offset = state.settings.current().utc_offset_minutes;
    Ok(form_page(
        &state,
        &req,
        &auth,
        &client_id,
        format!("/client/appointments/{appointment_id}/edit"),
        true,
        Some(&row),
        &row.motorcycle_id,
        &row.service_id,
        AppointmentFormView::from_row(&row, offset),
        Vec::new(),
    )
    .await)
}

async fn reschedule(
    state: web::Data<AppState>,
    req: HttpRequest,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    form: web::Form<AppointmentForm>,
) -> Result<HttpResponse> {
    let client_id = profile(&state, &auth).await?;
    let appointment_id = path.into_inner();
    let form = form.into_inner();

    match state
        .engine()
        .reschedule(&appointment_id, Actor::Client(&client_id), &form)
        .await
    {
        Ok(outcome) => {
            let message = if outcome.reverted {
                "Appointment updated. It is back in the queue and will be picked up by a mechanic again."
            } else {
                "Appointment updated."
            };
            Ok(flash::redirect_with("/client/appointments", Flash::success(message)))
        }
        Err(err @ LifecycleError::Validation(_)) => {
            let current = state.engine().find(&appointment_id).await.ok().flatten();
            Ok(form_page(
                &state,
                &req,
                &auth,
                &client_id,
                format!("/client/appointments/{appointment_id}/edit"),
                true,
                current.as_ref(),
                form.motorcycle_id.as_deref().unwrap_or_default(),
                form.service_id.as_deref().unwrap_or_default(),
                AppointmentFormView::from_form(&form),
                vec![err.user_message()],
            )
            .await)
        }
        Err(err) => Ok(flash::redirect_with(
            "/client/appointments",
            Flash::error(err.user_message()),
        )),
    }
}

async fn cancel(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let client_id = profile(&state, &auth).await?;
    let appointment_id = path.into_inner();
    let flash = match state
        .engine()
        .cancel(&appointment_id, Actor::Client(&client_id))
        .await
    {
        Ok(_) => Flash::success("Appointment cancelled."),
        Err(err) => Flash::error(err.user_message()),
    };
    Ok(flash::redirect_with("/client/appointments", flash))
}

async fn motorcycles_page(
    state: &AppState,
    req: &HttpRequest,
    auth: &AuthUser,
    client_id: &str,
    errors: Vec<String>,
) -> HttpResponse {
    let motorcycles = catalog::list_motorcycles(&state.db, client_id)
        .await
        .unwrap_or_default()
        .into_iter()
        .map(|moto| MotorcycleView {
            title: moto.title(),
            color: moto.color.unwrap_or_default(),
            id: moto.id,
        })
        .collect();

    render_page(
        req,
        MotorcyclesTemplate {
            page: Page::new(state, req, auth, "My motorcycles"),
            motorcycles,
            errors,
        },
    )
}

async fn list_motorcycles(
    state: web::Data<AppState>,
    req: HttpRequest,
    auth: web::ReqData<AuthUser>,
) -> Result<HttpResponse> {
    let client_id = profile(&state, &auth).await?;
    Ok(motorcycles_page(&state, &req, &auth, &client_id, Vec::new()).await)
}

async fn add_motorcycle(
    state: web::Data<AppState>,
    req: HttpRequest,
    auth: web::ReqData<AuthUser>,
    form: web::Form<NewMotorcycle>,
) -> Result<HttpResponse> {
    let client_id = profile(&state, &auth).await?;
    match catalog::register_motorcycle(&state.db, &client_id, &form).await {
        Ok(_) => Ok(flash::redirect_with(
            "/client/motorcycles",
            Flash::success("Motorcycle registered."),
        )),
        Err(err) => Ok(motorcycles_page(&state, &req, &auth, &client_id, err.messages()).await),
    }
}

async fn delete_motorcycle(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let client_id = profile(&state, &auth).await?;
    let flash = match catalog::delete_motorcycle(&state.db, &client_id, &path.into_inner()).await {
        Ok(()) => Flash::success("Motorcycle removed."),
        Err(ShopError::NotFound(_)) => Flash::error("Motorcycle not found."),
        Err(err) => Flash::error(err.user_message()),
    };
    Ok(flash::redirect_with("/client/motorcycles", flash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth,
        catalog::testing::{insert_client, insert_service},
        state::test_state,
    };
    use actix_web::{cookie::Cookie, http::StatusCode, test, App};

    async fn signed_in_client(state: &AppState) -> (String, String) {
        let client_id = insert_client(&state.db, "ana").await;
        let user_id: String = sqlx::query_scalar("SELECT user_id FROM clients WHERE id = ?")
            .bind(&client_id)
            .fetch_one(&state.db)
            .await
            .unwrap();
        let token = auth::create_session(&state.db, &user_id, auth::Role::Client)
            .await
            .unwrap();
        (client_id, token)
    }

    #[actix_web::test]
    async fn anonymous_visitors_are_sent_to_login() {
        let state = test_state().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/client/dashboard").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(resp.headers().get(header::LOCATION).unwrap(), "/login");
    }

    #[actix_web::test]
    async fn mechanic_session_cannot_enter_client_pages() {
        let state = test_state().await;
        let user_id = auth::testing::insert_user(&state.db, "joao", "segredo1", false).await;
        let token = auth::create_session(&state.db, &user_id, auth::Role::Mechanic)
            .await
            .unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/client/appointments")
            .cookie(Cookie::new("ms_session", token))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FOUND);
    }

    #[actix_web::test]
    async fn booking_form_creates_appointment_and_redirects() {
        let state = test_state().await;
        let (client_id, token) = signed_in_client(&state).await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let tomorrow = (Utc::now() + chrono::Duration::days(1))
            .format("%Y-%m-%d")
            .to_string();
        let req = test::TestRequest::post()
            .uri("/client/appointments/new")
            .cookie(Cookie::new("ms_session", token.clone()))
            .set_form([
                ("motorcycle_id", "new"),
                ("brand", "Honda"),
                ("model", "CB600F"),
                ("year", "2020"),
                ("service_id", "other"),
                ("other_service", "Troca de Óleo"),
                ("date", tomorrow.as_str()),
                ("time", "10:00"),
                ("description", ""),
            ])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(
            resp.headers().get(header::LOCATION).unwrap(),
            "/client/appointments"
        );

        let rows = state.engine().list_for_client(&client_id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, "scheduled");

        let req = test::TestRequest::get()
            .uri("/client/appointments")
            .cookie(Cookie::new("ms_session", token))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = test::read_body(resp).await;
        assert!(String::from_utf8_lossy(&body).contains("Honda CB600F 2020"));
    }

    #[actix_web::test]
    async fn invalid_booking_rerenders_with_message() {
        let state = test_state().await;
        let (_, token) = signed_in_client(&state).await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/client/appointments/new")
            .cookie(Cookie::new("ms_session", token))
            .set_form([
                ("brand", "Honda"),
                ("model", "CB600F"),
                ("year", "2020"),
                ("service_id", "other"),
                ("other_service", "Troca de Óleo"),
                ("date", "data_invalida"),
                ("time", "10:00"),
            ])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = test::read_body(resp).await;
        assert!(String::from_utf8_lossy(&body).contains("Please provide a valid date and time."));
    }

    #[actix_web::test]
    async fn edit_form_keeps_a_retired_service_selectable() {
        let state = test_state().await;
        let (client_id, token) = signed_in_client(&state).await;
        let service = insert_service(&state.db, "Pintura").await;
        let tomorrow = (Utc::now() + chrono::Duration::days(1))
            .format("%Y-%m-%d")
            .to_string();
        let row = state
            .engine()
            .create(
                &client_id,
                &AppointmentForm {
                    brand: Some("Honda".into()),
                    model: Some("CB600F".into()),
                    year: Some("2020".into()),
                    service_id: Some(service.clone()),
                    date: Some(tomorrow.clone()),
                    time: Some("10:00".into()),
                    ..AppointmentForm::default()
                },
            )
            .await
            .unwrap();
        catalog::toggle_service(&state.db, &service).await.unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get()
            .uri(&format!("/client/appointments/{}/edit", row.id))
            .cookie(Cookie::new("ms_session", token.clone()))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = test::read_body(resp).await;
        let html = String::from_utf8_lossy(&body);
        assert!(html.contains(&format!("<option value=\"{service}\" selected>Pintura</option>")));

        let req = test::TestRequest::post()
            .uri(&format!("/client/appointments/{}/edit", row.id))
            .cookie(Cookie::new("ms_session", token))
            .set_form([
                ("motorcycle_id", row.motorcycle_id.as_str()),
                ("service_id", service.as_str()),
                ("date", tomorrow.as_str()),
                ("time", "14:00"),
            ])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(
            resp.headers().get(header::LOCATION).unwrap(),
            "/client/appointments"
        );

        let updated = state.engine().find(&row.id).await.unwrap().unwrap();
        assert_eq!(updated.service_id, service);
        assert!(updated.scheduled_for.ends_with("T17:00:00Z"));
    }
}
