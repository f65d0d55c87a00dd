pub mod admin;
pub mod api;
pub mod client;
pub mod events;
pub mod mechanic;
pub mod public;

use crate::{
    input,
    models::{format_cents, AppointmentRow},
};

/// Appointment as the templates show it, with every value already formatted.
#[derive(Clone, Debug)]
pub struct AppointmentView {
    pub id: String,
    pub client_name: String,
    pub mechanic_name: String,
    pub has_mechanic: bool,
    pub service: String,
    pub motorcycle: String,
    pub scheduled_for: String,
    pub status: String,
    pub status_label: String,
    pub description: String,
    pub has_description: bool,
    pub notes: String,
    pub value: String,
    pub can_change: bool,
}

pub fn to_view(row: AppointmentRow, offset_minutes: i64) -> AppointmentView {
    let status = row.status();
    let description = row.problem_description.unwrap_or_default();
    AppointmentView {
        scheduled_for: input::local_display(&row.scheduled_for, offset_minutes),
        motorcycle: format!(
            "{} {} {}",
            row.motorcycle_brand, row.motorcycle_model, row.motorcycle_year
        ),
        id: row.id,
        client_name: row.client_name,
        has_mechanic: row.mechanic_name.is_some(),
        mechanic_name: row.mechanic_name.unwrap_or_else(|| "Unassigned".to_string()),
        service: row.service_name,
        status: status.as_str().to_string(),
        status_label: status.label().to_string(),
        has_description: !description.trim().is_empty(),
        description,
        notes: row.mechanic_notes.unwrap_or_default(),
        value: row
            .service_value_cents
            .map(format_cents)
            .unwrap_or_else(|| "-".to_string()),
        can_change: !status.is_final(),
    }
}

pub fn to_views(rows: Vec<AppointmentRow>, offset_minutes: i64) -> Vec<AppointmentView> {
    rows.into_iter()
        .map(|row| to_view(row, offset_minutes))
        .collect()
}

/// Labelled number for the dashboard stat cards.
#[derive(Clone, Debug)]
pub struct StatCard {
    pub label: String,
    pub value: String,
}

impl StatCard {
    pub fn new(label: &str, value: impl ToString) -> Self {
        Self {
            label: label.to_string(),
            value: value.to_string(),
        }
    }
}

/// Option entry for `<select>` elements.
#[derive(Clone, Debug)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
    pub selected: bool,
}

impl SelectOption {
    pub fn new(value: impl Into<String>, label: impl Into<String>, current: &str) -> Self {
        let value = value.into();
        Self {
            selected: value == current,
            label: label.into(),
            value,
        }
    }
}

/// Puts `value` first when no option offers it, so an edit form can still
/// submit a choice the catalog no longer lists.
pub fn keep_option(options: &mut Vec<SelectOption>, value: &str, label: String, current: &str) {
    if !options.iter().any(|option| option.value == value) {
        options.insert(0, SelectOption::new(value, label, current));
    }
}
