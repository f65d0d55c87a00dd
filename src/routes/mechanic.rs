use actix_web::{http::header, middleware::from_fn, web, HttpRequest, HttpResponse, Result};
use askama::Template;
use serde::Deserialize;

use crate::{
    accounts,
    auth::{mechanic_guard, AuthUser},
    dashboard,
    flash::{self, Flash},
    models::MechanicRow,
    routes::{to_view, to_views, AppointmentView, StatCard},
    state::AppState,
    templates::{render_page, Page},
};

#[derive(Template)]
#[template(path = "mechanic_dashboard.html")]
struct MechanicDashboardTemplate {
    page: Page,
    specialty: String,
    stats: Vec<StatCard>,
    available: Vec<AppointmentView>,
    active: Vec<AppointmentView>,
}

#[derive(Template)]
#[template(path = "mechanic_complete.html")]
struct CompleteTemplate {
    page: Page,
    appointment: AppointmentView,
    notes: String,
    value: String,
    errors: Vec<String>,
}

#[derive(Deserialize)]
struct CompleteForm {
    notes: Option<String>,
    value: Option<String>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/mechanic")
            .wrap(from_fn(mechanic_guard))
            .service(web::resource("").route(web::get().to(index)))
            .service(web::resource("/").route(web::get().to(index)))
            .service(web::resource("/dashboard").route(web::get().to(dashboard)))
            .service(web::resource("/appointments/{id}/claim").route(web::post().to(claim)))
            .service(web::resource("/appointments/{id}/release").route(web::post().to(release)))
            .service(
                web::resource("/appointments/{id}/complete")
                    .route(web::get().to(show_complete))
                    .route(web::post().to(complete)),
            ),
    );
}

async fn index() -> HttpResponse {
    HttpResponse::Found()
        .append_header((header::LOCATION, "/mechanic/dashboard"))
        .finish()
}

/// The signed-in mechanic's profile, or the redirect to show when it is gone.
async fn profile(state: &AppState, auth: &AuthUser) -> std::result::Result<MechanicRow, HttpResponse> {
    match accounts::mechanic_for_user(&state.db, &auth.id).await {
        Ok(Some(mechanic)) => Ok(mechanic),
        Ok(None) => Err(flash::redirect_with(
            "/login",
            Flash::error("Your mechanic profile no longer exists."),
        )),
        Err(err) => {
            log::error!("Could not load mechanic profile: {err}");
            Err(HttpResponse::InternalServerError().finish())
        }
    }
}

async fn dashboard(
    state: web::Data<AppState>,
    req: HttpRequest,
    auth: web::ReqData<AuthUser>,
) -> Result<HttpResponse> {
    let mechanic = match profile(&state, &auth).await {
        Ok(mechanic) => mechanic,
        Err(response) => return Ok(response),
    };
    let engine = state.engine();
    let view = dashboard::mechanic(&state.db, &engine, &mechanic.id)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;
    let offset = state.settings.current().utc_offset_minutes;

    let stats = vec![
        StatCard::new("Waiting in queue", view.available.len()),
        StatCard::new("In progress", view.active.len()),
        StatCard::new("Completed by you", view.completed),
    ];

    Ok(render_page(
        &req,
        MechanicDashboardTemplate {
            page: Page::new(&state, &req, &auth, "Work queue"),
            specialty: mechanic.specialty,
            stats,
            available: to_views(view.available, offset),
            active: to_views(view.active, offset),
        },
    ))
}

async fn claim(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let mechanic = match profile(&state, &auth).await {
        Ok(mechanic) => mechanic,
        Err(response) => return Ok(response),
    };
    let flash = match state.engine().claim(&path.into_inner(), &mechanic.id).await {
        Ok(row) => Flash::success(format!("You are now working on {} for {}.", row.service_name, row.client_name)),
        Err(err) => Flash::error(err.user_message()),
    };
    Ok(flash::redirect_with("/mechanic/dashboard", flash))
}

async fn release(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let mechanic = match profile(&state, &auth).await {
        Ok(mechanic) => mechanic,
        Err(response) => return Ok(response),
    };
    let flash = match state.engine().release(&path.into_inner(), &mechanic.id).await {
        Ok(_) => Flash::info("Appointment returned to the queue."),
        Err(err) => Flash::error(err.user_message()),
    };
    Ok(flash::redirect_with("/mechanic/dashboard", flash))
}

async fn show_complete(
    state: web::Data<AppState>,
    req: HttpRequest,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let mechanic = match profile(&state, &auth).await {
        Ok(mechanic) => mechanic,
        Err(response) => return Ok(response),
    };
    let row = match state.engine().find(&path.into_inner()).await {
        Ok(Some(row)) if row.mechanic_id.as_deref() == Some(mechanic.id.as_str()) && !row.status().is_final() => row,
        Ok(_) => {
            return Ok(flash::redirect_with(
                "/mechanic/dashboard",
                Flash::error("This appointment is not assigned to you."),
            ))
        }
        Err(err) => return Err(actix_web::error::ErrorInternalServerError(err)),
    };

    Ok(render_page(
        &req,
        CompleteTemplate {
            page: Page::new(&state, &req, &auth, "Complete service"),
            appointment: to_view(row, state.settings.current().utc_offset_minutes),
            notes: String::new(),
            value: String::new(),
            errors: Vec::new(),
        },
    ))
}

async fn complete(
    state: web::Data<AppState>,
    req: HttpRequest,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    form: web::Form<CompleteForm>,
) -> Result<HttpResponse> {
    let mechanic = match profile(&state, &auth).await {
        Ok(mechanic) => mechanic,
        Err(response) => return Ok(response),
    };
    let appointment_id = path.into_inner();
    let form = form.into_inner();
    let notes = form.notes.unwrap_or_default();
    let value = form.value.unwrap_or_default();
    let engine = state.engine();

    match engine.complete(&appointment_id, &mechanic.id, &notes, &value).await {
        Ok(row) => Ok(flash::redirect_with(
            "/mechanic/dashboard",
            Flash::success(format!("{} for {} completed.", row.service_name, row.client_name)),
        )),
        Err(err) => {
            let row = match engine.find(&appointment_id).await {
                Ok(Some(row)) => row,
                _ => {
                    return Ok(flash::redirect_with(
                        "/mechanic/dashboard",
                        Flash::error(err.user_message()),
                    ))
                }
            };
            Ok(render_page(
                &req,
                CompleteTemplate {
                    page: Page::new(&state, &req, &auth, "Complete service"),
                    appointment: to_view(row, state.settings.current().utc_offset_minutes),
                    notes,
                    value,
                    errors: vec![err.user_message()],
                },
            ))
        }
    }
}
