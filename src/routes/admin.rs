use actix_web::{http::header, middleware::from_fn, web, HttpRequest, HttpResponse, Result};
use askama::Template;
use chrono::Utc;
use serde::Deserialize;

use crate::{
    accounts::{self, ClientRegistration, ClientUpdate, MechanicRegistration, MechanicUpdate},
    auth::{admin_guard, AuthUser},
    catalog::{self, NewService},
    dashboard,
    db::log_activity,
    flash::{self, Flash},
    input,
    lifecycle::{Actor, AppointmentForm, LifecycleError},
    models::{format_cents, AppointmentRow, AppointmentStatus, ClientRow, MechanicRow, OrderStatus, ServiceOrderRow},
    orders,
    routes::{
        client::{service_options, AppointmentFormView},
        events, keep_option, to_views, AppointmentView, SelectOption, StatCard,
    },
    state::AppState,
    templates::{render_page, Page},
};

#[derive(Clone, Debug)]
struct ActivityView {
    message: String,
    created_at: String,
}

#[derive(Template)]
#[template(path = "admin_dashboard.html")]
struct AdminDashboardTemplate {
    page: Page,
    stats: Vec<StatCard>,
    activities: Vec<ActivityView>,
}

#[derive(Template)]
#[template(path = "admin_appointments.html")]
struct AdminAppointmentsTemplate {
    page: Page,
    appointments: Vec<AppointmentView>,
    statuses: Vec<SelectOption>,
}

#[derive(Template)]
#[template(path = "admin_appointment_form.html")]
struct AdminAppointmentFormTemplate {
    page: Page,
    action: String,
    editing: bool,
    clients: Vec<SelectOption>,
    services: Vec<SelectOption>,
    form: AppointmentFormView,
    errors: Vec<String>,
}

#[derive(Clone, Debug, Default)]
struct ClientView {
    id: String,
    full_name: String,
    username: String,
    email: String,
    cpf: String,
    phone: String,
    address: String,
}

impl From<ClientRow> for ClientView {
    fn from(row: ClientRow) -> Self {
        Self {
            id: row.id,
            full_name: row.full_name,
            username: row.username,
            email: row.email.unwrap_or_default(),
            cpf: row.cpf.unwrap_or_default(),
            phone: row.phone,
            address: row.address,
        }
    }
}

#[derive(Template)]
#[template(path = "admin_clients.html")]
struct AdminClientsTemplate {
    page: Page,
    clients: Vec<ClientView>,
}

#[derive(Template)]
#[template(path = "admin_client_form.html")]
struct AdminClientFormTemplate {
    page: Page,
    action: String,
    editing: bool,
    client: ClientView,
    errors: Vec<String>,
}

#[derive(Clone, Debug, Default)]
struct MechanicView {
    id: String,
    full_name: String,
    username: String,
    specialty: String,
    phone: String,
    availability: String,
}

impl From<MechanicRow> for MechanicView {
    fn from(row: MechanicRow) -> Self {
        Self {
            id: row.id,
            full_name: row.full_name,
            username: row.username,
            specialty: row.specialty,
            phone: row.phone,
            availability: row.availability,
        }
    }
}

#[derive(Template)]
#[template(path = "admin_mechanics.html")]
struct AdminMechanicsTemplate {
    page: Page,
    mechanics: Vec<MechanicView>,
}

#[derive(Template)]
#[template(path = "admin_mechanic_form.html")]
struct AdminMechanicFormTemplate {
    page: Page,
    action: String,
    editing: bool,
    mechanic: MechanicView,
    errors: Vec<String>,
}

#[derive(Clone, Debug)]
struct ServiceView {
    id: String,
    name: String,
    description: String,
    category: String,
    price: String,
    duration: String,
    active: bool,
}

#[derive(Template)]
#[template(path = "admin_services.html")]
struct AdminServicesTemplate {
    page: Page,
    services: Vec<ServiceView>,
    errors: Vec<String>,
}

#[derive(Clone, Debug)]
struct OrderView {
    id: String,
    client_name: String,
    service_name: String,
    description: String,
    cost: String,
    completed_at: String,
    status: String,
    statuses: Vec<SelectOption>,
}

#[derive(Template)]
#[template(path = "admin_orders.html")]
struct AdminOrdersTemplate {
    page: Page,
    orders: Vec<OrderView>,
}

#[derive(Deserialize)]
struct AppointmentFilter {
    status: Option<String>,
}

/// Appointment form as the administrator submits it: the booking fields plus
/// the client the appointment is for.
#[derive(Debug, Default, Deserialize)]
struct AdminAppointmentForm {
    client_id: Option<String>,
    brand: Option<String>,
    model: Option<String>,
    year: Option<String>,
    service_id: Option<String>,
    other_service: Option<String>,
    date: Option<String>,
    time: Option<String>,
    description: Option<String>,
}

impl AdminAppointmentForm {
    fn booking(&self) -> AppointmentForm {
        AppointmentForm {
            motorcycle_id: None,
            brand: self.brand.clone(),
            model: self.model.clone(),
            year: self.year.clone(),
            service_id: self.service_id.clone(),
            other_service: self.other_service.clone(),
            date: self.date.clone(),
            time: self.time.clone(),
            description: self.description.clone(),
        }
    }
}

#[derive(Deserialize)]
struct OrderStatusForm {
    status: String,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/admin")
            .wrap(from_fn(admin_guard))
            .service(web::resource("").route(web::get().to(index)))
            .service(web::resource("/").route(web::get().to(index)))
            .service(web::resource("/dashboard").route(web::get().to(dashboard)))
            .service(web::resource("/events").route(web::get().to(events::stream_events)))
            .service(web::resource("/appointments").route(web::get().to(list_appointments)))
            .service(
                web::resource("/appointments/new")
                    .route(web::get().to(show_new_appointment))
                    .route(web::post().to(create_appointment)),
            )
            .service(
                web::resource("/appointments/{id}/edit")
                    .route(web::get().to(show_edit_appointment))
                    .route(web::post().to(edit_appointment)),
            )
            .service(web::resource("/appointments/{id}/cancel").route(web::post().to(cancel_appointment)))
            .service(web::resource("/appointments/{id}/order").route(web::post().to(create_order)))
            .service(web::resource("/orders").route(web::get().to(list_orders)))
            .service(web::resource("/orders/{id}/status").route(web::post().to(update_order_status)))
            .service(web::resource("/clients").route(web::get().to(list_clients)))
            .service(
                web::resource("/clients/new")
                    .route(web::get().to(show_new_client))
                    .route(web::post().to(create_client)),
            )
            .service(
                web::resource("/clients/{id}/edit")
                    .route(web::get().to(show_edit_client))
                    .route(web::post().to(edit_client)),
            )
            .service(web::resource("/clients/{id}/delete").route(web::post().to(delete_client)))
            .service(web::resource("/mechanics").route(web::get().to(list_mechanics)))
            .service(
                web::resource("/mechanics/new")
                    .route(web::get().to(show_new_mechanic))
                    .route(web::post().to(create_mechanic)),
            )
            .service(
                web::resource("/mechanics/{id}/edit")
                    .route(web::get().to(show_edit_mechanic))
                    .route(web::post().to(edit_mechanic)),
            )
            .service(web::resource("/mechanics/{id}/delete").route(web::post().to(delete_mechanic)))
            .service(
                web::resource("/services")
                    .route(web::get().to(list_services))
                    .route(web::post().to(create_service)),
            )
            .service(web::resource("/services/{id}/toggle").route(web::post().to(toggle_service))),
    );
}

async fn index() -> HttpResponse {
    HttpResponse::Found()
        .append_header((header::LOCATION, "/admin/dashboard"))
        .finish()
}

async fn dashboard(
    state: web::Data<AppState>,
    req: HttpRequest,
    auth: web::ReqData<AuthUser>,
) -> Result<HttpResponse> {
    let offset = state.settings.current().utc_offset_minutes;
    let view = dashboard::admin(&state.db, Utc::now(), offset)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;

    let mut stats = vec![
        StatCard::new("Clients", view.clients),
        StatCard::new("Mechanics", view.mechanics),
        StatCard::new("Appointments", view.appointments),
        StatCard::new("Today", view.today),
    ];
    stats.extend(
        AppointmentStatus::ALL
            .into_iter()
            .map(|status| StatCard::new(status.label(), view.counts.get(status))),
    );
    stats.push(StatCard::new("Service orders", view.service_orders));
    let activities = view
        .activities
        .into_iter()
        .map(|row| ActivityView {
            created_at: input::local_display(&row.created_at, offset),
            message: row.message,
        })
        .collect();

    Ok(render_page(
        &req,
        AdminDashboardTemplate {
            page: Page::new(&state, &req, &auth, "Administration"),
            stats,
            activities,
        },
    ))
}

async fn list_appointments(
    state: web::Data<AppState>,
    req: HttpRequest,
    auth: web::ReqData<AuthUser>,
    query: web::Query<AppointmentFilter>,
) -> Result<HttpResponse> {
    let filter = query
        .status
        .as_deref()
        .filter(|status| !status.is_empty())
        .and_then(|status| status.parse::<AppointmentStatus>().ok());
    let current = filter.map(AppointmentStatus::as_str).unwrap_or_default();

    let rows = state.engine().list_all(filter).await.unwrap_or_default();
    let mut statuses = vec![SelectOption::new("", "All", current)];
    statuses.extend(
        AppointmentStatus::ALL
            .into_iter()
            .map(|status| SelectOption::new(status.as_str(), status.label(), current)),
    );

    Ok(render_page(
        &req,
        AdminAppointmentsTemplate {
            page: Page::new(&state, &req, &auth, "Appointments"),
            appointments: to_views(rows, state.settings.current().utc_offset_minutes),
            statuses,
        },
    ))
}

#[allow(clippy::too_many_arguments)]
async fn appointment_form_page(
    state: &AppState,
    req: &HttpRequest,
    auth: &AuthUser,
    action: String,
    editing: bool,
    current: Option<&AppointmentRow>,
    selected_client: &str,
    selected_service: &str,
    form: AppointmentFormView,
    errors: Vec<String>,
) -> HttpResponse {
    let clients = accounts::list_clients(&state.db)
        .await
        .unwrap_or_default()
        .into_iter()
        .map(|client| SelectOption::new(client.id, client.full_name, selected_client))
        .collect();
    let services = catalog::list_services(&state.db, true)
        .await
        .unwrap_or_default();
    let title = if editing { "Edit appointment" } else { "New appointment" };

    let mut services = service_options(services, selected_service);
    if let Some(row) = current {
        keep_option(&mut services, &row.service_id, row.service_name.clone(), selected_service);
    }

    render_page(
        req,
        AdminAppointmentFormTemplate {
            page: Page::new(state, req, auth, title),
            action,
            editing,
            clients,
            services,
            form,
            errors,
        },
    )
}

async fn show_new_appointment(
    state: web::Data<AppState>,
    req: HttpRequest,
    auth: web::ReqData<AuthUser>,
) -> HttpResponse {
    appointment_form_page(
        &state,
        &req,
        &auth,
        "/admin/appointments/new".to_string(),
        false,
        None,
        "",
        "",
        AppointmentFormView::default(),
        Vec::new(),
    )
    .await
}

async fn create_appointment(
    state: web::Data<AppState>,
    req: HttpRequest,
    auth: web::ReqData<AuthUser>,
    form: web::Form<AdminAppointmentForm>,
) -> HttpResponse {
    let form = form.into_inner();
    let booking = form.booking();
    let client_id = input::non_empty(form.client_id.as_deref());

    let result = match client_id.as_deref() {
        Some(client_id) => state.engine().create(client_id, &booking).await,
        None => Err(LifecycleError::Validation("Please choose a client.".into())),
    };

    match result {
        Ok(row) => flash::redirect_with(
            "/admin/appointments",
            Flash::success(format!("{} booked for {}.", row.service_name, row.client_name)),
        ),
        Err(err) => {
            appointment_form_page(
                &state,
                &req,
                &auth,
                "/admin/appointments/new".to_string(),
                false,
                None,
                client_id.as_deref().unwrap_or_default(),
                form.service_id.as_deref().unwrap_or_default(),
                AppointmentFormView::from_form(&booking),
                vec![err.user_message()],
            )
            .await
        }
    }
}

async fn show_edit_appointment(
    state: web::Data<AppState>,
    req: HttpRequest,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let appointment_id = path.into_inner();
    let row = match state.engine().find(&appointment_id).await {
        Ok(Some(row)) if !row.status().is_final() => row,
        Ok(Some(row)) => {
            return Ok(flash::redirect_with(
                "/admin/appointments",
                Flash::error(format!(
                    "Cannot change a {} appointment.",
                    row.status().label().to_lowercase()
                )),
            ))
        }
        Ok(None) => {
            return Ok(flash::redirect_with(
                "/admin/appointments",
                Flash::error("Appointment not found."),
            ))
        }
        Err(err) => return Err(actix_web::error::ErrorInternalServerError(err)),
    };

    let offset = state.settings.current().utc_offset_minutes;
    Ok(appointment_form_page(
        &state,
        &req,
        &auth,
        format!("/admin/appointments/{appointment_id}/edit"),
        true,
        Some(&row),
        &row.client_id,
        &row.service_id,
        AppointmentFormView::from_row(&row, offset),
        Vec::new(),
    )
    .await)
}

async fn edit_appointment(
    state: web::Data<AppState>,
    req: HttpRequest,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    form: web::Form<AdminAppointmentForm>,
) -> HttpResponse {
    let appointment_id = path.into_inner();
    let form = form.into_inner();
    let changes = form.booking();

    match state
        .engine()
        .reschedule(&appointment_id, Actor::Administrator, &changes)
        .await
    {
        Ok(outcome) => {
            let message = if outcome.reverted {
                "Appointment updated and returned to the queue."
            } else {
                "Appointment updated."
            };
            flash::redirect_with("/admin/appointments", Flash::success(message))
        }
        Err(err @ LifecycleError::Validation(_)) => {
            let current = state.engine().find(&appointment_id).await.ok().flatten();
            appointment_form_page(
                &state,
                &req,
                &auth,
                format!("/admin/appointments/{appointment_id}/edit"),
                true,
                current.as_ref(),
                form.client_id.as_deref().unwrap_or_default(),
                form.service_id.as_deref().unwrap_or_default(),
                AppointmentFormView::from_form(&changes),
                vec![err.user_message()],
            )
            .await
        }
        Err(err) => flash::redirect_with("/admin/appointments", Flash::error(err.user_message())),
    }
}

async fn cancel_appointment(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let flash = match state
        .engine()
        .cancel(&path.into_inner(), Actor::Administrator)
        .await
    {
        Ok(row) => Flash::success(format!("Appointment for {} cancelled.", row.client_name)),
        Err(err) => Flash::error(err.user_message()),
    };
    flash::redirect_with("/admin/appointments", flash)
}

async fn create_order(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    match orders::create_from_appointment(&state.db, &path.into_inner()).await {
        Ok(order) => flash::redirect_with(
            "/admin/orders",
            Flash::success(format!(
                "Service order opened for {} ({}).",
                order.client_name,
                format_cents(order.cost_cents)
            )),
        ),
        Err(err) => flash::redirect_with("/admin/appointments", Flash::error(err.user_message())),
    }
}

fn order_view(row: ServiceOrderRow, offset_minutes: i64) -> OrderView {
    const STATUSES: [(OrderStatus, &str); 4] = [
        (OrderStatus::Pending, "Pending"),
        (OrderStatus::InProgress, "In progress"),
        (OrderStatus::Completed, "Completed"),
        (OrderStatus::Cancelled, "Cancelled"),
    ];
    OrderView {
        statuses: STATUSES
            .iter()
            .map(|(status, label)| SelectOption::new(status.as_str(), *label, &row.status))
            .collect(),
        id: row.id,
        client_name: row.client_name,
        service_name: row.service_name,
        description: row.service_description,
        cost: format_cents(row.cost_cents),
        completed_at: row
            .completed_at
            .map(|at| input::local_display(&at, offset_minutes))
            .unwrap_or_else(|| "-".to_string()),
        status: row.status,
    }
}

async fn list_orders(
    state: web::Data<AppState>,
    req: HttpRequest,
    auth: web::ReqData<AuthUser>,
) -> HttpResponse {
    let offset = state.settings.current().utc_offset_minutes;
    let orders = orders::list(&state.db)
        .await
        .unwrap_or_default()
        .into_iter()
        .map(|row| order_view(row, offset))
        .collect();

    render_page(
        &req,
        AdminOrdersTemplate {
            page: Page::new(&state, &req, &auth, "Service orders"),
            orders,
        },
    )
}

async fn update_order_status(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    form: web::Form<OrderStatusForm>,
) -> HttpResponse {
    let order_id = path.into_inner();
    let Ok(status) = form.status.parse::<OrderStatus>() else {
        return flash::redirect_with("/admin/orders", Flash::error("Unknown order status."));
    };

    let flash = match orders::set_status(&state.db, &order_id, status).await {
        Ok(()) => {
            log_activity(
                &state.db,
                "order_status",
                &format!("{} set a service order to {}.", auth.display_name, status.as_str()),
                Some(&auth.id),
                None,
            )
            .await;
            Flash::success("Service order updated.")
        }
        Err(err) => Flash::error(err.user_message()),
    };
    flash::redirect_with("/admin/orders", flash)
}

async fn list_clients(
    state: web::Data<AppState>,
    req: HttpRequest,
    auth: web::ReqData<AuthUser>,
) -> HttpResponse {
    let clients = accounts::list_clients(&state.db)
        .await
        .unwrap_or_default()
        .into_iter()
        .map(ClientView::from)
        .collect();

    render_page(
        &req,
        AdminClientsTemplate {
            page: Page::new(&state, &req, &auth, "Clients"),
            clients,
        },
    )
}

async fn show_new_client(
    state: web::Data<AppState>,
    req: HttpRequest,
    auth: web::ReqData<AuthUser>,
) -> HttpResponse {
    render_page(
        &req,
        AdminClientFormTemplate {
            page: Page::new(&state, &req, &auth, "New client"),
            action: "/admin/clients/new".to_string(),
            editing: false,
            client: ClientView::default(),
            errors: Vec::new(),
        },
    )
}

async fn create_client(
    state: web::Data<AppState>,
    req: HttpRequest,
    auth: web::ReqData<AuthUser>,
    form: web::Form<ClientRegistration>,
) -> HttpResponse {
    let registration = form.into_inner();
    match accounts::register_client(&state.db, &registration).await {
        Ok(_) => {
            log_activity(
                &state.db,
                "client_created",
                &format!("{} registered client {}.", auth.display_name, registration.full_name.trim()),
                Some(&auth.id),
                None,
            )
            .await;
            flash::redirect_with("/admin/clients", Flash::success("Client registered."))
        }
        Err(err) => render_page(
            &req,
            AdminClientFormTemplate {
                page: Page::new(&state, &req, &auth, "New client"),
                action: "/admin/clients/new".to_string(),
                editing: false,
                client: ClientView {
                    full_name: registration.full_name,
                    username: registration.username,
                    email: registration.email,
                    cpf: registration.cpf,
                    phone: registration.phone,
                    address: registration.address,
                    ..ClientView::default()
                },
                errors: err.messages(),
            },
        ),
    }
}

async fn show_edit_client(
    state: web::Data<AppState>,
    req: HttpRequest,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let client_id = path.into_inner();
    let client = match accounts::get_client(&state.db, &client_id).await {
        Ok(Some(client)) => client,
        Ok(None) => return Ok(flash::redirect_with("/admin/clients", Flash::error("Client not found."))),
        Err(err) => return Err(actix_web::error::ErrorInternalServerError(err)),
    };

    Ok(render_page(
        &req,
        AdminClientFormTemplate {
            page: Page::new(&state, &req, &auth, "Edit client"),
            action: format!("/admin/clients/{client_id}/edit"),
            editing: true,
            client: client.into(),
            errors: Vec::new(),
        },
    ))
}

async fn edit_client(
    state: web::Data<AppState>,
    req: HttpRequest,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    form: web::Form<ClientUpdate>,
) -> HttpResponse {
    let client_id = path.into_inner();
    let changes = form.into_inner();
    match accounts::update_client(&state.db, &client_id, &changes).await {
        Ok(()) => {
            log_activity(
                &state.db,
                "client_updated",
                &format!("{} updated a client profile.", auth.display_name),
                Some(&auth.id),
                None,
            )
            .await;
            flash::redirect_with("/admin/clients", Flash::success("Client updated."))
        }
        Err(err) => render_page(
            &req,
            AdminClientFormTemplate {
                page: Page::new(&state, &req, &auth, "Edit client"),
                action: format!("/admin/clients/{client_id}/edit"),
                editing: true,
                client: ClientView {
                    id: client_id.clone(),
                    full_name: changes.full_name.unwrap_or_default(),
                    username: changes.username.unwrap_or_default(),
                    email: changes.email.unwrap_or_default(),
                    cpf: changes.cpf.unwrap_or_default(),
                    phone: changes.phone.unwrap_or_default(),
                    address: changes.address.unwrap_or_default(),
                },
                errors: err.messages(),
            },
        ),
    }
}

async fn delete_client(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> HttpResponse {
    let flash = match accounts::delete_client(&state.db, &path.into_inner()).await {
        Ok(client) => {
            log_activity(
                &state.db,
                "client_deleted",
                &format!("{} removed client {}.", auth.display_name, client.full_name),
                Some(&auth.id),
                None,
            )
            .await;
            Flash::success(format!("Client {} removed.", client.full_name))
        }
        Err(err) => Flash::error(err.user_message()),
    };
    flash::redirect_with("/admin/clients", flash)
}

async fn list_mechanics(
    state: web::Data<AppState>,
    req: HttpRequest,
    auth: web::ReqData<AuthUser>,
) -> HttpResponse {
    let mechanics = accounts::list_mechanics(&state.db)
        .await
        .unwrap_or_default()
        .into_iter()
        .map(MechanicView::from)
        .collect();

    render_page(
        &req,
        AdminMechanicsTemplate {
            page: Page::new(&state, &req, &auth, "Mechanics"),
            mechanics,
        },
    )
}

async fn show_new_mechanic(
    state: web::Data<AppState>,
    req: HttpRequest,
    auth: web::ReqData<AuthUser>,
) -> HttpResponse {
    render_page(
        &req,
        AdminMechanicFormTemplate {
            page: Page::new(&state, &req, &auth, "New mechanic"),
            action: "/admin/mechanics/new".to_string(),
            editing: false,
            mechanic: MechanicView::default(),
            errors: Vec::new(),
        },
    )
}

async fn create_mechanic(
    state: web::Data<AppState>,
    req: HttpRequest,
    auth: web::ReqData<AuthUser>,
    form: web::Form<MechanicRegistration>,
) -> HttpResponse {
    let registration = form.into_inner();
    match accounts::register_mechanic(&state.db, &registration).await {
        Ok(_) => {
            log_activity(
                &state.db,
                "mechanic_created",
                &format!("{} registered mechanic {}.", auth.display_name, registration.full_name.trim()),
                Some(&auth.id),
                None,
            )
            .await;
            flash::redirect_with("/admin/mechanics", Flash::success("Mechanic registered."))
        }
        Err(err) => render_page(
            &req,
            AdminMechanicFormTemplate {
                page: Page::new(&state, &req, &auth, "New mechanic"),
                action: "/admin/mechanics/new".to_string(),
                editing: false,
                mechanic: MechanicView {
                    full_name: registration.full_name,
                    username: registration.username,
                    specialty: registration.specialty,
                    phone: registration.phone,
                    availability: registration.availability,
                    ..MechanicView::default()
                },
                errors: err.messages(),
            },
        ),
    }
}

async fn show_edit_mechanic(
    state: web::Data<AppState>,
    req: HttpRequest,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let mechanic_id = path.into_inner();
    let mechanic = match accounts::get_mechanic(&state.db, &mechanic_id).await {
        Ok(Some(mechanic)) => mechanic,
        Ok(None) => {
            return Ok(flash::redirect_with(
                "/admin/mechanics",
                Flash::error("Mechanic not found."),
            ))
        }
        Err(err) => return Err(actix_web::error::ErrorInternalServerError(err)),
    };

    Ok(render_page(
        &req,
        AdminMechanicFormTemplate {
            page: Page::new(&state, &req, &auth, "Edit mechanic"),
            action: format!("/admin/mechanics/{mechanic_id}/edit"),
            editing: true,
            mechanic: mechanic.into(),
            errors: Vec::new(),
        },
    ))
}

async fn edit_mechanic(
    state: web::Data<AppState>,
    req: HttpRequest,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    form: web::Form<MechanicUpdate>,
) -> HttpResponse {
    let mechanic_id = path.into_inner();
    let changes = form.into_inner();
    match accounts::update_mechanic(&state.db, &mechanic_id, &changes).await {
        Ok(()) => {
            log_activity(
                &state.db,
                "mechanic_updated",
                &format!("{} updated a mechanic profile.", auth.display_name),
                Some(&auth.id),
                None,
            )
            .await;
            flash::redirect_with("/admin/mechanics", Flash::success("Mechanic updated."))
        }
        Err(err) => render_page(
            &req,
            AdminMechanicFormTemplate {
                page: Page::new(&state, &req, &auth, "Edit mechanic"),
                action: format!("/admin/mechanics/{mechanic_id}/edit"),
                editing: true,
                mechanic: MechanicView {
                    id: mechanic_id.clone(),
                    full_name: changes.full_name.unwrap_or_default(),
                    username: changes.username.unwrap_or_default(),
                    specialty: changes.specialty.unwrap_or_default(),
                    phone: changes.phone.unwrap_or_default(),
                    availability: changes.availability.unwrap_or_default(),
                },
                errors: err.messages(),
            },
        ),
    }
}

async fn delete_mechanic(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> HttpResponse {
    let flash = match accounts::delete_mechanic(&state.db, &path.into_inner()).await {
        Ok(mechanic) => {
            log_activity(
                &state.db,
                "mechanic_deleted",
                &format!("{} removed mechanic {}.", auth.display_name, mechanic.full_name),
                Some(&auth.id),
                None,
            )
            .await;
            Flash::success(format!("Mechanic {} removed.", mechanic.full_name))
        }
        Err(err) => Flash::error(err.user_message()),
    };
    flash::redirect_with("/admin/mechanics", flash)
}

async fn services_page(
    state: &AppState,
    req: &HttpRequest,
    auth: &AuthUser,
    errors: Vec<String>,
) -> HttpResponse {
    let services = catalog::list_services(&state.db, false)
        .await
        .unwrap_or_default()
        .into_iter()
        .map(|service| ServiceView {
            id: service.id,
            name: service.name,
            description: service.description,
            category: service.category,
            price: service
                .price_cents
                .map(format_cents)
                .unwrap_or_else(|| "-".to_string()),
            duration: service
                .duration_minutes
                .map(|minutes| format!("{minutes} min"))
                .unwrap_or_else(|| "-".to_string()),
            active: service.active,
        })
        .collect();

    render_page(
        req,
        AdminServicesTemplate {
            page: Page::new(state, req, auth, "Services"),
            services,
            errors,
        },
    )
}

async fn list_services(
    state: web::Data<AppState>,
    req: HttpRequest,
    auth: web::ReqData<AuthUser>,
) -> HttpResponse {
    services_page(&state, &req, &auth, Vec::new()).await
}

async fn create_service(
    state: web::Data<AppState>,
    req: HttpRequest,
    auth: web::ReqData<AuthUser>,
    form: web::Form<NewService>,
) -> HttpResponse {
    match catalog::create_service(&state.db, &form).await {
        Ok(_) => {
            log_activity(
                &state.db,
                "service_created",
                &format!("{} added service {}.", auth.display_name, form.name.trim()),
                Some(&auth.id),
                None,
            )
            .await;
            flash::redirect_with("/admin/services", Flash::success("Service added."))
        }
        Err(err) => services_page(&state, &req, &auth, err.messages()).await,
    }
}

async fn toggle_service(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let flash = match catalog::toggle_service(&state.db, &path.into_inner()).await {
        Ok(true) => Flash::success("Service activated."),
        Ok(false) => Flash::info("Service deactivated. It is no longer offered for booking."),
        Err(err) => Flash::error(err.user_message()),
    };
    flash::redirect_with("/admin/services", flash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::{self, Role},
        catalog::testing::{insert_client, insert_service},
        state::test_state,
    };
    use actix_web::{cookie::Cookie, http::StatusCode, test, App};
    use chrono::Duration;

    async fn signed_in_admin(state: &AppState) -> String {
        let user_id = auth::testing::insert_user(&state.db, "chefe", "segredo1", true).await;
        auth::create_session(&state.db, &user_id, Role::Administrator)
            .await
            .unwrap()
    }

    #[actix_web::test]
    async fn client_session_is_turned_away() {
        let state = test_state().await;
        let user_id = auth::testing::insert_user(&state.db, "ana", "segredo1", false).await;
        let token = auth::create_session(&state.db, &user_id, Role::Client).await.unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/admin/dashboard")
            .cookie(Cookie::new("ms_session", token))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(resp.headers().get(header::LOCATION).unwrap(), "/login");
    }

    #[actix_web::test]
    async fn admin_books_for_a_client_and_opens_an_order() {
        let state = test_state().await;
        let token = signed_in_admin(&state).await;
        let client_id = insert_client(&state.db, "Ana").await;
        let service_id = insert_service(&state.db, "Revisão").await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let date = (Utc::now() + Duration::days(3)).format("%Y-%m-%d").to_string();
        let req = test::TestRequest::post()
            .uri("/admin/appointments/new")
            .cookie(Cookie::new("ms_session", token.clone()))
            .set_form([
                ("client_id", client_id.as_str()),
                ("brand", "Honda"),
                ("model", "Biz"),
                ("year", "2018"),
                ("service_id", service_id.as_str()),
                ("date", date.as_str()),
                ("time", "11:00"),
            ])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FOUND);

        let rows = state.engine().list_for_client(&client_id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].mechanic_id.is_none());

        let req = test::TestRequest::post()
            .uri(&format!("/admin/appointments/{}/order", rows[0].id))
            .cookie(Cookie::new("ms_session", token))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.headers().get(header::LOCATION).unwrap(), "/admin/orders");

        let orders = orders::list(&state.db).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].cost_cents, 12000);
    }

    #[actix_web::test]
    async fn deleting_a_client_with_appointments_is_refused() {
        let state = test_state().await;
        let token = signed_in_admin(&state).await;
        let client_id = insert_client(&state.db, "Ana").await;
        let service_id = insert_service(&state.db, "Revisão").await;
        let form = AppointmentForm {
            brand: Some("Honda".into()),
            model: Some("Biz".into()),
            year: Some("2018".into()),
            service_id: Some(service_id),
            date: Some((Utc::now() + Duration::days(3)).format("%Y-%m-%d").to_string()),
            time: Some("11:00".into()),
            ..AppointmentForm::default()
        };
        state.engine().create(&client_id, &form).await.unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri(&format!("/admin/clients/{client_id}/delete"))
            .cookie(Cookie::new("ms_session", token))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert!(accounts::get_client(&state.db, &client_id).await.unwrap().is_some());
    }
}
