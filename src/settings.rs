use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::{error::ShopError, input};

/// Shop-wide settings kept in the single `settings` row.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct ShopSettings {
    pub shop_name: String,
    pub address: String,
    pub phone: String,
    pub email: String,
    pub cnpj: String,
    pub opening_time: String,
    pub closing_time: String,
    pub working_days: String,
    pub slot_interval_minutes: i64,
    pub min_lead_hours: i64,
    pub max_daily_appointments: i64,
    pub cancellation_cutoff_hours: i64,
    pub allow_holidays: bool,
    pub allow_reschedule: bool,
    pub enforce_scheduling_policy: bool,
    pub notify_on_created: bool,
    pub notify_on_cancelled: bool,
    pub notify_on_completed: bool,
    pub utc_offset_minutes: i64,
}

impl Default for ShopSettings {
    fn default() -> Self {
        Self {
            shop_name: "MotoService".to_string(),
            address: "Endereço não configurado".to_string(),
            phone: "(00) 0000-0000".to_string(),
            email: "contato@oficina.com".to_string(),
            cnpj: "00.000.000/0000-00".to_string(),
            opening_time: "08:00".to_string(),
            closing_time: "18:00".to_string(),
            working_days: "Segunda a Sexta".to_string(),
            slot_interval_minutes: 30,
            min_lead_hours: 2,
            max_daily_appointments: 10,
            cancellation_cutoff_hours: 24,
            allow_holidays: false,
            allow_reschedule: true,
            enforce_scheduling_policy: false,
            notify_on_created: true,
            notify_on_cancelled: true,
            notify_on_completed: true,
            utc_offset_minutes: -180,
        }
    }
}

/// Outcome of running a request through the scheduling policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyVerdict {
    Allowed,
    /// Violations were found but the shop runs the policy in advisory mode.
    Advisory(Vec<String>),
    Rejected(Vec<String>),
}

impl ShopSettings {
    /// Checks a booking or new time slot against the lead time, opening hours and
    /// daily cap. `booked_that_day` counts the other live appointments on that local day.
    pub fn check_booking(
        &self,
        scheduled_for: DateTime<Utc>,
        now: DateTime<Utc>,
        booked_that_day: i64,
    ) -> PolicyVerdict {
        let mut violations = Vec::new();

        if scheduled_for < now + Duration::hours(self.min_lead_hours) {
            violations.push(format!(
                "Appointments must be booked at least {} hour(s) in advance.",
                self.min_lead_hours
            ));
        }

        let local_time = scheduled_for
            .with_timezone(&input::shop_offset(self.utc_offset_minutes))
            .time();
        let opening = NaiveTime::parse_from_str(&self.opening_time, "%H:%M").ok();
        let closing = NaiveTime::parse_from_str(&self.closing_time, "%H:%M").ok();
        if let (Some(opening), Some(closing)) = (opening, closing) {
            if local_time < opening || local_time >= closing {
                violations.push(format!(
                    "The shop is open from {} to {}.",
                    self.opening_time, self.closing_time
                ));
            }
        }

        if self.max_daily_appointments > 0 && booked_that_day >= self.max_daily_appointments {
            violations.push("The daily appointment limit has been reached for that date.".to_string());
        }

        self.verdict(violations)
    }

    /// Checks a client-initiated cancel or reschedule of an appointment scheduled
    /// at `scheduled_for`.
    pub fn check_client_change(
        &self,
        scheduled_for: DateTime<Utc>,
        now: DateTime<Utc>,
        rescheduling: bool,
    ) -> PolicyVerdict {
        let mut violations = Vec::new();
        if rescheduling && !self.allow_reschedule {
            violations.push("Rescheduling is disabled by the shop.".to_string());
        }
        if scheduled_for < now + Duration::hours(self.cancellation_cutoff_hours) {
            violations.push(format!(
                "Changes must be made at least {} hour(s) before the appointment.",
                self.cancellation_cutoff_hours
            ));
        }
        self.verdict(violations)
    }

    fn verdict(&self, violations: Vec<String>) -> PolicyVerdict {
        if violations.is_empty() {
            PolicyVerdict::Allowed
        } else if self.enforce_scheduling_policy {
            PolicyVerdict::Rejected(violations)
        } else {
            PolicyVerdict::Advisory(violations)
        }
    }
}

/// Process-wide cached copy of the settings row. Writes go through [`update`],
/// which stores the row and swaps the cached copy.
#[derive(Clone, Debug, Default)]
pub struct SettingsHandle {
    inner: Arc<RwLock<ShopSettings>>,
}

impl SettingsHandle {
    pub fn new(settings: ShopSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    pub fn current(&self) -> ShopSettings {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn replace(&self, settings: ShopSettings) {
        match self.inner.write() {
            Ok(mut guard) => *guard = settings,
            Err(poisoned) => *poisoned.into_inner() = settings,
        }
    }
}

const SETTINGS_COLUMNS: &str = "shop_name, address, phone, email, cnpj, opening_time, closing_time, \
    working_days, slot_interval_minutes, min_lead_hours, max_daily_appointments, \
    cancellation_cutoff_hours, allow_holidays, allow_reschedule, enforce_scheduling_policy, \
    notify_on_created, notify_on_cancelled, notify_on_completed, utc_offset_minutes";

/// Reads the settings row, writing the defaults first when the row is missing.
pub async fn load(pool: &SqlitePool) -> Result<SettingsHandle, sqlx::Error> {
    let existing = sqlx::query_as::<_, ShopSettings>(&format!(
        "SELECT {SETTINGS_COLUMNS} FROM settings WHERE id = 1"
    ))
    .fetch_optional(pool)
    .await?;

    let settings = match existing {
        Some(settings) => settings,
        None => {
            let defaults = ShopSettings::default();
            store(pool, &defaults).await?;
            log::info!("Seeded default shop settings.");
            defaults
        }
    };
    Ok(SettingsHandle::new(settings))
}

async fn store(pool: &SqlitePool, settings: &ShopSettings) -> Result<(), sqlx::Error> {
    sqlx::query(&format!(
        r#"INSERT INTO settings (id, {SETTINGS_COLUMNS}, updated_at)
           VALUES (1, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
           ON CONFLICT(id) DO UPDATE SET
             shop_name = excluded.shop_name,
             address = excluded.address,
             phone = excluded.phone,
             email = excluded.email,
             cnpj = excluded.cnpj,
             opening_time = excluded.opening_time,
             closing_time = excluded.closing_time,
             working_days = excluded.working_days,
             slot_interval_minutes = excluded.slot_interval_minutes,
             min_lead_hours = excluded.min_lead_hours,
             max_daily_appointments = excluded.max_daily_appointments,
             cancellation_cutoff_hours = excluded.cancellation_cutoff_hours,
             allow_holidays = excluded.allow_holidays,
             allow_reschedule = excluded.allow_reschedule,
             enforce_scheduling_policy = excluded.enforce_scheduling_policy,
             notify_on_created = excluded.notify_on_created,
             notify_on_cancelled = excluded.notify_on_cancelled,
             notify_on_completed = excluded.notify_on_completed,
             utc_offset_minutes = excluded.utc_offset_minutes,
             updated_at = excluded.updated_at"#
    ))
    .bind(&settings.shop_name)
    .bind(&settings.address)
    .bind(&settings.phone)
    .bind(&settings.email)
    .bind(&settings.cnpj)
    .bind(&settings.opening_time)
    .bind(&settings.closing_time)
    .bind(&settings.working_days)
    .bind(settings.slot_interval_minutes)
    .bind(settings.min_lead_hours)
    .bind(settings.max_daily_appointments)
    .bind(settings.cancellation_cutoff_hours)
    .bind(settings.allow_holidays)
    .bind(settings.allow_reschedule)
    .bind(settings.enforce_scheduling_policy)
    .bind(settings.notify_on_created)
    .bind(settings.notify_on_cancelled)
    .bind(settings.notify_on_completed)
    .bind(settings.utc_offset_minutes)
    .bind(input::to_db_time(Utc::now()))
    .execute(pool)
    .await?;
    Ok(())
}

/// Partial update accepted by the settings endpoint. Absent fields keep their value.
#[derive(Debug, Default, Deserialize)]
pub struct SettingsUpdate {
    pub shop_name: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub cnpj: Option<String>,
    pub opening_time: Option<String>,
    pub closing_time: Option<String>,
    pub working_days: Option<String>,
    pub slot_interval_minutes: Option<i64>,
    pub min_lead_hours: Option<i64>,
    pub max_daily_appointments: Option<i64>,
    pub cancellation_cutoff_hours: Option<i64>,
    pub allow_holidays: Option<bool>,
    pub allow_reschedule: Option<bool>,
    pub enforce_scheduling_policy: Option<bool>,
    pub notify_on_created: Option<bool>,
    pub notify_on_cancelled: Option<bool>,
    pub notify_on_completed: Option<bool>,
    pub utc_offset_minutes: Option<i64>,
}

impl SettingsUpdate {
    fn apply(self, mut settings: ShopSettings) -> Result<ShopSettings, ShopError> {
        let mut errors = Vec::new();

        if let Some(value) = self.shop_name {
            settings.shop_name = value;
        }
        if let Some(value) = self.address {
            settings.address = value;
        }
        if let Some(value) = self.phone {
            settings.phone = value;
        }
        if let Some(value) = self.email {
            settings.email = value;
        }
        if let Some(value) = self.cnpj {
            settings.cnpj = value;
        }
        if let Some(value) = self.opening_time {
            settings.opening_time = value;
        }
        if let Some(value) = self.closing_time {
            settings.closing_time = value;
        }
        if let Some(value) = self.working_days {
            settings.working_days = value;
        }
        if let Some(value) = self.slot_interval_minutes {
            settings.slot_interval_minutes = value;
        }
        if let Some(value) = self.min_lead_hours {
            settings.min_lead_hours = value;
        }
        if let Some(value) = self.max_daily_appointments {
            settings.max_daily_appointments = value;
        }
        if let Some(value) = self.cancellation_cutoff_hours {
            settings.cancellation_cutoff_hours = value;
        }
        if let Some(value) = self.allow_holidays {
            settings.allow_holidays = value;
        }
        if let Some(value) = self.allow_reschedule {
            settings.allow_reschedule = value;
        }
        if let Some(value) = self.enforce_scheduling_policy {
            settings.enforce_scheduling_policy = value;
        }
        if let Some(value) = self.notify_on_created {
            settings.notify_on_created = value;
        }
        if let Some(value) = self.notify_on_cancelled {
            settings.notify_on_cancelled = value;
        }
        if let Some(value) = self.notify_on_completed {
            settings.notify_on_completed = value;
        }
        if let Some(value) = self.utc_offset_minutes {
            settings.utc_offset_minutes = value;
        }

        let opening = NaiveTime::parse_from_str(&settings.opening_time, "%H:%M");
        let closing = NaiveTime::parse_from_str(&settings.closing_time, "%H:%M");
        match (opening, closing) {
            (Ok(opening), Ok(closing)) if opening >= closing => {
                errors.push("Opening time must be before closing time.".to_string())
            }
            (Ok(_), Ok(_)) => {}
            _ => errors.push("Opening and closing times must use HH:MM.".to_string()),
        }
        if settings.slot_interval_minutes <= 0 {
            errors.push("Slot interval must be positive.".to_string());
        }
        if settings.min_lead_hours < 0 || settings.cancellation_cutoff_hours < 0 {
            errors.push("Lead time and cancellation cutoff cannot be negative.".to_string());
        }
        if settings.max_daily_appointments < 0 {
            errors.push("Daily limit cannot be negative.".to_string());
        }
        if !(-720..=840).contains(&settings.utc_offset_minutes) {
            errors.push("UTC offset is out of range.".to_string());
        }
        if settings.shop_name.trim().is_empty() {
            errors.push("Shop name is required.".to_string());
        }

        if errors.is_empty() {
            Ok(settings)
        } else {
            Err(ShopError::Invalid(errors))
        }
    }
}

/// Validates and stores an update, then refreshes the cached copy.
pub async fn update(
    pool: &SqlitePool,
    handle: &SettingsHandle,
    changes: SettingsUpdate,
) -> Result<ShopSettings, ShopError> {
    let updated = changes.apply(handle.current())?;
    store(pool, &updated).await?;
    handle.replace(updated.clone());
    Ok(updated)
}
