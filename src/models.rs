use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Serialize;

/// Lifecycle status of an appointment as stored in `appointments.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 4] = [
        AppointmentStatus::Scheduled,
        AppointmentStatus::InProgress,
        AppointmentStatus::Completed,
        AppointmentStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::InProgress => "in_progress",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "Scheduled",
            AppointmentStatus::InProgress => "In progress",
            AppointmentStatus::Completed => "Completed",
            AppointmentStatus::Cancelled => "Cancelled",
        }
    }

    /// Completed and cancelled appointments accept no further client or mechanic changes.
    pub fn is_final(self) -> bool {
        matches!(self, AppointmentStatus::Completed | AppointmentStatus::Cancelled)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "scheduled" => Ok(AppointmentStatus::Scheduled),
            "in_progress" => Ok(AppointmentStatus::InProgress),
            "completed" => Ok(AppointmentStatus::Completed),
            "cancelled" => Ok(AppointmentStatus::Cancelled),
            other => Err(format!("unknown appointment status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::InProgress => "in_progress",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(OrderStatus::Pending),
            "in_progress" => Ok(OrderStatus::InProgress),
            "completed" => Ok(OrderStatus::Completed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status '{other}'")),
        }
    }
}

#[allow(dead_code)]
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub password_hash: String,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub active: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClientRow {
    pub id: String,
    pub user_id: String,
    pub username: String,
    pub full_name: String,
    pub email: Option<String>,
    pub cpf: Option<String>,
    pub phone: String,
    pub address: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MechanicRow {
    pub id: String,
    pub user_id: String,
    pub username: String,
    pub full_name: String,
    pub specialty: String,
    pub phone: String,
    pub availability: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MotorcycleRow {
    pub id: String,
    pub client_id: Option<String>,
    pub brand: String,
    pub model: String,
    pub year: i64,
    pub plate: Option<String>,
    pub color: Option<String>,
}

impl MotorcycleRow {
    pub fn title(&self) -> String {
        match self.plate.as_deref().filter(|plate| !plate.trim().is_empty()) {
            Some(plate) => format!("{} {} {} - {}", self.brand, self.model, self.year, plate),
            None => format!("{} {} {}", self.brand, self.model, self.year),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ServiceRow {
    pub id: String,
    pub name: String,
    pub description: String,
    pub price_cents: Option<i64>,
    pub duration_minutes: Option<i64>,
    pub category: String,
    pub active: bool,
}

/// Appointment joined with the names a listing needs.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AppointmentRow {
    pub id: String,
    pub client_id: String,
    pub client_name: String,
    pub mechanic_id: Option<String>,
    pub mechanic_name: Option<String>,
    pub service_id: String,
    pub service_name: String,
    pub motorcycle_id: String,
    pub motorcycle_brand: String,
    pub motorcycle_model: String,
    pub motorcycle_year: i64,
    pub problem_description: Option<String>,
    pub mechanic_notes: Option<String>,
    pub service_value_cents: Option<i64>,
    pub scheduled_for: String,
    pub status: String,
}

impl AppointmentRow {
    pub fn status(&self) -> AppointmentStatus {
        self.status.parse().unwrap_or(AppointmentStatus::Scheduled)
    }
}

pub const APPOINTMENT_SELECT: &str = r#"SELECT a.id, a.client_id, c.full_name AS client_name,
       a.mechanic_id, m.full_name AS mechanic_name,
       a.service_id, s.name AS service_name,
       a.motorcycle_id, mo.brand AS motorcycle_brand, mo.model AS motorcycle_model,
       mo.year AS motorcycle_year,
       a.problem_description, a.mechanic_notes, a.service_value_cents,
       a.scheduled_for, a.status
FROM appointments a
JOIN clients c ON a.client_id = c.id
JOIN services s ON a.service_id = s.id
JOIN motorcycles mo ON a.motorcycle_id = mo.id
LEFT JOIN mechanics m ON a.mechanic_id = m.id"#;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ServiceOrderRow {
    pub id: String,
    pub appointment_id: String,
    pub client_name: String,
    pub service_name: String,
    pub client_description: Option<String>,
    pub service_description: String,
    pub cost_cents: i64,
    pub completed_at: Option<String>,
    pub notes: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ActivityRow {
    pub message: String,
    pub created_at: String,
}

/// Formats an integer amount of cents as `R$ 1234,56`.
pub fn format_cents(cents: i64) -> String {
    let value = Decimal::new(cents, 2);
    format!("R$ {}", value.to_string().replace('.', ","))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_storage_text() {
        for status in AppointmentStatus::ALL {
            assert_eq!(status.as_str().parse::<AppointmentStatus>(), Ok(status));
        }
        assert!("agendado".parse::<AppointmentStatus>().is_err());
    }

    #[test]
    fn only_completed_and_cancelled_are_final() {
        assert!(!AppointmentStatus::Scheduled.is_final());
        assert!(!AppointmentStatus::InProgress.is_final());
        assert!(AppointmentStatus::Completed.is_final());
        assert!(AppointmentStatus::Cancelled.is_final());
    }

    #[test]
    fn cents_are_rendered_with_comma_separator() {
        assert_eq!(format_cents(15000), "R$ 150,00");
        assert_eq!(format_cents(5), "R$ 0,05");
    }

    #[test]
    fn motorcycle_title_includes_plate_when_present() {
        let mut moto = MotorcycleRow {
            id: "m1".into(),
            client_id: None,
            brand: "Honda".into(),
            model: "CB600F".into(),
            year: 2020,
            plate: None,
            color: None,
        };
        assert_eq!(moto.title(), "Honda CB600F 2020");
        moto.plate = Some("ABC-1234".into());
        assert_eq!(moto.title(), "Honda CB600F 2020 - ABC-1234");
    }
}
