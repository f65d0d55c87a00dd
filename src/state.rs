use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::broadcast;

use crate::{
    lifecycle::AppointmentEngine,
    models::AppointmentRow,
    notify::Notifier,
    settings::SettingsHandle,
};

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub settings: SettingsHandle,
    pub events: broadcast::Sender<ServerEvent>,
}

impl AppState {
    pub fn new(db: SqlitePool, settings: SettingsHandle) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            db,
            settings,
            events,
        }
    }

    pub fn engine(&self) -> AppointmentEngine<'_> {
        AppointmentEngine::new(&self.db, &self.settings, self.notifier())
    }

    pub fn notifier(&self) -> Notifier {
        Notifier::new(self.events.clone(), self.settings.clone())
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ServerEvent {
    pub kind: String,
    pub appointment_id: String,
    pub status: String,
    pub client_name: String,
    pub service: String,
    pub motorcycle: String,
    pub scheduled_for: String,
    pub mechanic_name: Option<String>,
}

impl ServerEvent {
    pub fn from_row(kind: &str, row: &AppointmentRow) -> Self {
        Self {
            kind: kind.to_string(),
            appointment_id: row.id.clone(),
            status: row.status.clone(),
            client_name: row.client_name.clone(),
            service: row.service_name.clone(),
            motorcycle: format!(
                "{} {} {}",
                row.motorcycle_brand, row.motorcycle_model, row.motorcycle_year
            ),
            scheduled_for: row.scheduled_for.clone(),
            mechanic_name: row.mechanic_name.clone(),
        }
    }
}

#[cfg(test)]
pub async fn test_state() -> AppState {
    let pool = crate::db::test_pool().await;
    let settings = crate::settings::load(&pool).await.expect("settings");
    AppState::new(pool, settings)
}
