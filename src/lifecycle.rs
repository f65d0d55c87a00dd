//! Appointment lifecycle: booking, mechanic claim/release/complete, cancel and
//! reschedule. Every transition is a single conditional UPDATE whose WHERE clause
//! carries the state precondition; when no row matches, the current row is read
//! back only to explain the refusal.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use sqlx::{SqliteConnection, SqlitePool};
use thiserror::Error;

use crate::{
    auth::new_id,
    catalog, db,
    input::{self, non_empty, parse_positive_cents, parse_year},
    models::{AppointmentRow, AppointmentStatus, APPOINTMENT_SELECT},
    notify::{AppointmentEvent, Notifier},
    settings::{PolicyVerdict, SettingsHandle},
};

/// Who is asking for a transition. Client and mechanic carry their profile id.
#[derive(Clone, Copy, Debug)]
pub enum Actor<'a> {
    Client(&'a str),
    Mechanic(&'a str),
    Administrator,
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{0}")]
    Validation(String),
    #[error("You are not allowed to change this appointment.")]
    Forbidden,
    #[error("Appointment not found.")]
    NotFound,
    #[error("This appointment is no longer available.")]
    Unavailable,
    #[error("Cannot {action} a {status} appointment.")]
    Final {
        action: &'static str,
        status: AppointmentStatus,
    },
    #[error("This appointment is {}, not {}.", .actual.label().to_lowercase(), .expected.label().to_lowercase())]
    WrongState {
        expected: AppointmentStatus,
        actual: AppointmentStatus,
    },
    #[error("This appointment is assigned to another mechanic.")]
    NotAssigned,
    #[error("database error: {0}")]
    Store(#[from] sqlx::Error),
}

impl LifecycleError {
    pub fn user_message(&self) -> String {
        match self {
            LifecycleError::Store(err) => {
                log::error!("Appointment store failure: {err}");
                "Something went wrong. Please try again.".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl ResponseError for LifecycleError {
    fn status_code(&self) -> StatusCode {
        match self {
            LifecycleError::Validation(_) => StatusCode::BAD_REQUEST,
            LifecycleError::Forbidden => StatusCode::FORBIDDEN,
            LifecycleError::NotFound => StatusCode::NOT_FOUND,
            LifecycleError::Unavailable
            | LifecycleError::Final { .. }
            | LifecycleError::WrongState { .. }
            | LifecycleError::NotAssigned => StatusCode::CONFLICT,
            LifecycleError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "ok": false,
            "error": self.user_message(),
        }))
    }
}

/// Booking and edit form. On edits every absent field keeps its current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppointmentForm {
    /// Existing motorcycle; empty or `new` means describe one with brand, model and year.
    pub motorcycle_id: Option<String>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub year: Option<String>,
    /// Catalog service id, or `other` to use `other_service` as a free-text name.
    pub service_id: Option<String>,
    pub other_service: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub description: Option<String>,
}

impl AppointmentForm {
    fn existing_motorcycle(&self) -> Option<String> {
        non_empty(self.motorcycle_id.as_deref()).filter(|id| id != "new")
    }

    fn describes_motorcycle(&self) -> bool {
        self.existing_motorcycle().is_some()
            || non_empty(self.brand.as_deref()).is_some()
            || non_empty(self.model.as_deref()).is_some()
            || non_empty(self.year.as_deref()).is_some()
    }

    fn names_service(&self) -> bool {
        non_empty(self.service_id.as_deref()).is_some()
    }

    /// Nothing sent, or the appointment's own motorcycle sent back.
    fn keeps_motorcycle(&self, current: &str) -> bool {
        !self.describes_motorcycle() || self.existing_motorcycle().as_deref() == Some(current)
    }

    fn keeps_service(&self, current: &str) -> bool {
        match non_empty(self.service_id.as_deref()) {
            None => true,
            Some(id) => id == current,
        }
    }

    fn changes_schedule(&self) -> bool {
        non_empty(self.date.as_deref()).is_some() || non_empty(self.time.as_deref()).is_some()
    }
}

#[derive(Debug, Clone)]
pub struct RescheduleOutcome {
    pub appointment: AppointmentRow,
    /// The appointment was in progress and went back to the queue.
    pub reverted: bool,
}

pub struct AppointmentEngine<'a> {
    db: &'a SqlitePool,
    settings: &'a SettingsHandle,
    notifier: Notifier,
}

impl<'a> AppointmentEngine<'a> {
    pub fn new(db: &'a SqlitePool, settings: &'a SettingsHandle, notifier: Notifier) -> Self {
        Self {
            db,
            settings,
            notifier,
        }
    }

    /// Books a new appointment for `client_id`. The mechanic stays unset until claimed.
    pub async fn create(&self, client_id: &str, form: &AppointmentForm) -> Result<AppointmentRow, LifecycleError> {
        let settings = self.settings.current();

        if !form.names_service() {
            return Err(LifecycleError::Validation("Please select a service.".into()));
        }
        if !form.describes_motorcycle() {
            return Err(LifecycleError::Validation(
                "Please select a motorcycle or describe a new one.".into(),
            ));
        }
        let scheduled_for = input::combine_date_time(
            form.date.as_deref().unwrap_or_default(),
            form.time.as_deref().unwrap_or_default(),
            settings.utc_offset_minutes,
        )
        .ok_or_else(|| LifecycleError::Validation("Please provide a valid date and time.".into()))?;

        let client_exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM clients WHERE id = ?)")
            .bind(client_id)
            .fetch_one(self.db)
            .await?;
        if !client_exists {
            return Err(LifecycleError::Validation("Please select a client.".into()));
        }

        self.check_slot(scheduled_for, None).await?;

        let id = new_id();
        let now = db::now();
        let mut tx = self.db.begin().await?;
        let motorcycle_id = resolve_motorcycle(&mut tx, client_id, form).await?;
        let service_id = resolve_service(&mut tx, form).await?;
        sqlx::query(
            r#"INSERT INTO appointments (id, client_id, mechanic_id, service_id, motorcycle_id,
                   problem_description, scheduled_for, status, created_at, updated_at)
               VALUES (?, ?, NULL, ?, ?, ?, ?, 'scheduled', ?, ?)"#,
        )
        .bind(&id)
        .bind(client_id)
        .bind(service_id)
        .bind(motorcycle_id)
        .bind(non_empty(form.description.as_deref()))
        .bind(input::to_db_time(scheduled_for))
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        let row = self.fetch(&id).await?;
        self.announce(AppointmentEvent::Created, &row).await;
        Ok(row)
    }

    /// Moves a scheduled appointment to in progress for `mechanic_id`. Of two
    /// concurrent claims exactly one matches the `status = 'scheduled'` predicate.
    pub async fn claim(&self, id: &str, mechanic_id: &str) -> Result<AppointmentRow, LifecycleError> {
        let updated = sqlx::query(
            r#"UPDATE appointments
               SET mechanic_id = ?, status = 'in_progress', updated_at = ?
               WHERE id = ? AND status = 'scheduled'"#,
        )
        .bind(mechanic_id)
        .bind(db::now())
        .bind(id)
        .execute(self.db)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(self.explain(id, "claim", AppointmentStatus::Scheduled, None).await);
        }

        let row = self.fetch(id).await?;
        self.announce(AppointmentEvent::Claimed, &row).await;
        Ok(row)
    }

    /// Puts an in-progress appointment back in the queue. Only its mechanic may.
    pub async fn release(&self, id: &str, mechanic_id: &str) -> Result<AppointmentRow, LifecycleError> {
        let updated = sqlx::query(
            r#"UPDATE appointments
               SET mechanic_id = NULL, status = 'scheduled', updated_at = ?
               WHERE id = ? AND status = 'in_progress' AND mechanic_id = ?"#,
        )
        .bind(db::now())
        .bind(id)
        .bind(mechanic_id)
        .execute(self.db)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(self
                .explain(id, "release", AppointmentStatus::InProgress, Some(mechanic_id))
                .await);
        }

        let row = self.fetch(id).await?;
        self.announce(AppointmentEvent::Released, &row).await;
        Ok(row)
    }

    /// Finishes the assigned mechanic's work. Notes must be present and the value
    /// strictly positive; otherwise nothing changes.
    pub async fn complete(
        &self,
        id: &str,
        mechanic_id: &str,
        notes: &str,
        value: &str,
    ) -> Result<AppointmentRow, LifecycleError> {
        let current = self.find(id).await?.ok_or(LifecycleError::NotFound)?;
        let status = current.status();
        if status.is_final() {
            return Err(LifecycleError::Final {
                action: "complete",
                status,
            });
        }
        if status != AppointmentStatus::InProgress {
            return Err(LifecycleError::WrongState {
                expected: AppointmentStatus::InProgress,
                actual: status,
            });
        }
        if current.mechanic_id.as_deref() != Some(mechanic_id) {
            return Err(LifecycleError::NotAssigned);
        }

        let notes = notes.trim();
        if notes.is_empty() {
            return Err(LifecycleError::Validation(
                "Please describe the work performed.".into(),
            ));
        }
        let cents = parse_positive_cents(value).ok_or_else(|| {
            LifecycleError::Validation("The service value must be a positive amount.".into())
        })?;

        let updated = sqlx::query(
            r#"UPDATE appointments
               SET mechanic_notes = ?, service_value_cents = ?, status = 'completed', updated_at = ?
               WHERE id = ? AND status = 'in_progress' AND mechanic_id = ?"#,
        )
        .bind(notes)
        .bind(cents)
        .bind(db::now())
        .bind(id)
        .bind(mechanic_id)
        .execute(self.db)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(self
                .explain(id, "complete", AppointmentStatus::InProgress, Some(mechanic_id))
                .await);
        }

        let row = self.fetch(id).await?;
        self.announce(AppointmentEvent::Completed, &row).await;
        Ok(row)
    }

    /// Cancels a live appointment. Clients may only cancel their own.
    pub async fn cancel(&self, id: &str, actor: Actor<'_>) -> Result<AppointmentRow, LifecycleError> {
        let current = self.load_for(id, actor).await?;
        let status = current.status();
        if status.is_final() {
            return Err(LifecycleError::Final {
                action: "cancel",
                status,
            });
        }
        if let Actor::Client(_) = actor {
            self.check_client_change(&current, false)?;
        }

        let updated = sqlx::query(
            r#"UPDATE appointments
               SET status = 'cancelled', updated_at = ?
               WHERE id = ? AND status IN ('scheduled', 'in_progress')"#,
        )
        .bind(db::now())
        .bind(id)
        .execute(self.db)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(self.explain(id, "cancel", status, None).await);
        }

        let row = self.fetch(id).await?;
        self.announce(AppointmentEvent::Cancelled, &row).await;
        Ok(row)
    }

    /// Changes any of service, motorcycle, date-time and description. An
    /// in-progress appointment goes back to scheduled with no mechanic.
    pub async fn reschedule(
        &self,
        id: &str,
        actor: Actor<'_>,
        form: &AppointmentForm,
    ) -> Result<RescheduleOutcome, LifecycleError> {
        let current = self.load_for(id, actor).await?;
        let status = current.status();
        if status.is_final() {
            return Err(LifecycleError::Final {
                action: "reschedule",
                status,
            });
        }
        if let Actor::Client(_) = actor {
            self.check_client_change(&current, true)?;
        }

        let settings = self.settings.current();
        let scheduled_for = if form.changes_schedule() {
            let (current_date, current_time) =
                input::local_fields(&current.scheduled_for, settings.utc_offset_minutes);
            let date = non_empty(form.date.as_deref()).unwrap_or(current_date);
            let time = non_empty(form.time.as_deref()).unwrap_or(current_time);
            let when = input::combine_date_time(&date, &time, settings.utc_offset_minutes)
                .ok_or_else(|| LifecycleError::Validation("Please provide a valid date and time.".into()))?;
            if input::to_db_time(when) != current.scheduled_for {
                self.check_slot(when, Some(id)).await?;
            }
            input::to_db_time(when)
        } else {
            current.scheduled_for.clone()
        };

        let description = match form.description.as_deref() {
            Some(text) => non_empty(Some(text)),
            None => current.problem_description.clone(),
        };

        let reverted = status == AppointmentStatus::InProgress;
        let (next_status, next_mechanic) = if reverted {
            (AppointmentStatus::Scheduled, None)
        } else {
            (status, current.mechanic_id.clone())
        };

        // The appointment's own service and motorcycle stay valid even after the
        // service is deactivated or the motorcycle loses its owner.
        let mut tx = self.db.begin().await?;
        let motorcycle_id = if form.keeps_motorcycle(&current.motorcycle_id) {
            current.motorcycle_id.clone()
        } else {
            resolve_motorcycle(&mut tx, &current.client_id, form).await?
        };
        let service_id = if form.keeps_service(&current.service_id) {
            current.service_id.clone()
        } else {
            resolve_service(&mut tx, form).await?
        };

        // Matching on the observed status keeps a concurrent claim or cancel from
        // being overwritten.
        let updated = sqlx::query(
            r#"UPDATE appointments
               SET service_id = ?, motorcycle_id = ?, scheduled_for = ?, problem_description = ?,
                   status = ?, mechanic_id = ?, updated_at = ?
               WHERE id = ? AND status = ?"#,
        )
        .bind(service_id)
        .bind(motorcycle_id)
        .bind(&scheduled_for)
        .bind(description)
        .bind(next_status.as_str())
        .bind(next_mechanic)
        .bind(db::now())
        .bind(id)
        .bind(status.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            tx.rollback().await?;
            return Err(self.explain(id, "reschedule", status, None).await);
        }
        tx.commit().await?;

        let row = self.fetch(id).await?;
        self.announce(AppointmentEvent::Rescheduled, &row).await;
        if reverted {
            log::info!("Appointment {id} returned to the queue after rescheduling.");
        }
        Ok(RescheduleOutcome {
            appointment: row,
            reverted,
        })
    }

    pub async fn find(&self, id: &str) -> Result<Option<AppointmentRow>, sqlx::Error> {
        sqlx::query_as::<_, AppointmentRow>(&format!("{APPOINTMENT_SELECT} WHERE a.id = ?"))
            .bind(id)
            .fetch_optional(self.db)
            .await
    }

    /// Loads an appointment the actor may act on. A client asking for someone
    /// else's appointment gets the same answer as for a missing one.
    pub async fn load_for(&self, id: &str, actor: Actor<'_>) -> Result<AppointmentRow, LifecycleError> {
        match actor {
            Actor::Administrator => self.find(id).await?.ok_or(LifecycleError::NotFound),
            Actor::Client(client_id) => self
                .find(id)
                .await?
                .filter(|row| row.client_id == client_id)
                .ok_or(LifecycleError::Forbidden),
            Actor::Mechanic(_) => Err(LifecycleError::Forbidden),
        }
    }

    /// Scheduled appointments, earliest first.
    pub async fn available_work(&self) -> Result<Vec<AppointmentRow>, sqlx::Error> {
        sqlx::query_as::<_, AppointmentRow>(&format!(
            "{APPOINTMENT_SELECT} WHERE a.status = 'scheduled' ORDER BY a.scheduled_for ASC, a.created_at ASC"
        ))
        .fetch_all(self.db)
        .await
    }

    /// The mechanic's in-progress appointments, earliest first.
    pub async fn active_work(&self, mechanic_id: &str) -> Result<Vec<AppointmentRow>, sqlx::Error> {
        sqlx::query_as::<_, AppointmentRow>(&format!(
            "{APPOINTMENT_SELECT} WHERE a.status = 'in_progress' AND a.mechanic_id = ? ORDER BY a.scheduled_for ASC, a.created_at ASC"
        ))
        .bind(mechanic_id)
        .fetch_all(self.db)
        .await
    }

    pub async fn list_for_client(&self, client_id: &str) -> Result<Vec<AppointmentRow>, sqlx::Error> {
        sqlx::query_as::<_, AppointmentRow>(&format!(
            "{APPOINTMENT_SELECT} WHERE a.client_id = ? ORDER BY a.scheduled_for DESC"
        ))
        .bind(client_id)
        .fetch_all(self.db)
        .await
    }

    pub async fn history_for_client(&self, client_id: &str) -> Result<Vec<AppointmentRow>, sqlx::Error> {
        sqlx::query_as::<_, AppointmentRow>(&format!(
            "{APPOINTMENT_SELECT} WHERE a.client_id = ? AND a.status = 'completed' ORDER BY a.scheduled_for DESC"
        ))
        .bind(client_id)
        .fetch_all(self.db)
        .await
    }

    pub async fn list_all(&self, status: Option<AppointmentStatus>) -> Result<Vec<AppointmentRow>, sqlx::Error> {
        match status {
            Some(status) => {
                sqlx::query_as::<_, AppointmentRow>(&format!(
                    "{APPOINTMENT_SELECT} WHERE a.status = ? ORDER BY a.scheduled_for DESC"
                ))
                .bind(status.as_str())
                .fetch_all(self.db)
                .await
            }
            None => {
                sqlx::query_as::<_, AppointmentRow>(&format!(
                    "{APPOINTMENT_SELECT} ORDER BY a.scheduled_for DESC"
                ))
                .fetch_all(self.db)
                .await
            }
        }
    }

    async fn fetch(&self, id: &str) -> Result<AppointmentRow, LifecycleError> {
        self.find(id).await?.ok_or(LifecycleError::NotFound)
    }

    /// Reason a conditional update matched no row.
    async fn explain(
        &self,
        id: &str,
        action: &'static str,
        expected: AppointmentStatus,
        mechanic_id: Option<&str>,
    ) -> LifecycleError {
        let current = match self.find(id).await {
            Ok(Some(row)) => row,
            Ok(None) => return LifecycleError::NotFound,
            Err(err) => return err.into(),
        };
        let status = current.status();
        if status.is_final() {
            LifecycleError::Final { action, status }
        } else if status != expected {
            if action == "claim" {
                LifecycleError::Unavailable
            } else {
                LifecycleError::WrongState {
                    expected,
                    actual: status,
                }
            }
        } else if mechanic_id.is_some() && current.mechanic_id.as_deref() != mechanic_id {
            LifecycleError::NotAssigned
        } else {
            LifecycleError::Unavailable
        }
    }

    /// Runs a new slot through the booking policy. `exclude` skips the appointment
    /// being moved when counting that day's bookings.
    async fn check_slot(&self, scheduled_for: DateTime<Utc>, exclude: Option<&str>) -> Result<(), LifecycleError> {
        let settings = self.settings.current();
        let (day_start, day_end) = input::local_day_bounds(scheduled_for, settings.utc_offset_minutes);

        let booked = sqlx::query_scalar::<_, i64>(
            r#"SELECT COUNT(*) FROM appointments
               WHERE status IN ('scheduled', 'in_progress')
                 AND scheduled_for >= ? AND scheduled_for < ?
                 AND id != ?"#,
        )
        .bind(input::to_db_time(day_start))
        .bind(input::to_db_time(day_end))
        .bind(exclude.unwrap_or_default())
        .fetch_one(self.db)
        .await?;

        apply_verdict(settings.check_booking(scheduled_for, Utc::now(), booked))
    }

    fn check_client_change(&self, current: &AppointmentRow, rescheduling: bool) -> Result<(), LifecycleError> {
        let Some(scheduled_for) = input::from_db_time(&current.scheduled_for) else {
            return Ok(());
        };
        apply_verdict(
            self.settings
                .current()
                .check_client_change(scheduled_for, Utc::now(), rescheduling),
        )
    }

    async fn announce(&self, event: AppointmentEvent, row: &AppointmentRow) {
        self.notifier.publish(event, row);
        let message = match event {
            AppointmentEvent::Created => format!(
                "{} booked {} for {}.",
                row.client_name, row.service_name, row.scheduled_for
            ),
            AppointmentEvent::Claimed => format!(
                "{} claimed the appointment of {}.",
                row.mechanic_name.as_deref().unwrap_or("A mechanic"),
                row.client_name
            ),
            AppointmentEvent::Released => {
                format!("The appointment of {} went back to the queue.", row.client_name)
            }
            AppointmentEvent::Rescheduled => format!(
                "The appointment of {} was changed to {}.",
                row.client_name, row.scheduled_for
            ),
            AppointmentEvent::Cancelled => {
                format!("The appointment of {} was cancelled.", row.client_name)
            }
            AppointmentEvent::Completed => format!(
                "{} completed {} for {}.",
                row.mechanic_name.as_deref().unwrap_or("A mechanic"),
                row.service_name,
                row.client_name
            ),
        };
        db::log_activity(self.db, event.kind(), &message, None, Some(&row.id)).await;
    }
}

fn apply_verdict(verdict: PolicyVerdict) -> Result<(), LifecycleError> {
    match verdict {
        PolicyVerdict::Allowed => Ok(()),
        PolicyVerdict::Advisory(violations) => {
            log::warn!("Scheduling policy (advisory): {}", violations.join(" "));
            Ok(())
        }
        PolicyVerdict::Rejected(violations) => Err(LifecycleError::Validation(violations.join(" "))),
    }
}

async fn resolve_motorcycle(
    conn: &mut SqliteConnection,
    client_id: &str,
    form: &AppointmentForm,
) -> Result<String, LifecycleError> {
    if let Some(id) = form.existing_motorcycle() {
        return if catalog::is_owned_motorcycle(conn, client_id, &id).await? {
            Ok(id)
        } else {
            Err(LifecycleError::Validation("Please select one of your motorcycles.".into()))
        };
    }

    let brand = non_empty(form.brand.as_deref());
    let model = non_empty(form.model.as_deref());
    let year = form.year.as_deref().and_then(parse_year);
    match (brand, model, year) {
        (Some(brand), Some(model), Some(year)) => {
            Ok(catalog::get_or_create_motorcycle(conn, client_id, &brand, &model, year).await?)
        }
        _ => Err(LifecycleError::Validation(
            "Brand, model and a valid year are required for a new motorcycle.".into(),
        )),
    }
}

async fn resolve_service(conn: &mut SqliteConnection, form: &AppointmentForm) -> Result<String, LifecycleError> {
    match non_empty(form.service_id.as_deref()).as_deref() {
        Some("other") => match non_empty(form.other_service.as_deref()) {
            Some(name) => Ok(catalog::get_or_create_service(conn, &name).await?),
            None => Err(LifecycleError::Validation("Please name the service you need.".into())),
        },
        Some(id) => {
            if catalog::is_active_service(conn, id).await? {
                Ok(id.to_string())
            } else {
                Err(LifecycleError::Validation("Please select an available service.".into()))
            }
        }
        None => Err(LifecycleError::Validation("Please select a service.".into())),
    }
}
