use tokio::sync::broadcast;

use crate::{models::AppointmentRow, settings::SettingsHandle, state::ServerEvent};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppointmentEvent {
    Created,
    Claimed,
    Released,
    Rescheduled,
    Cancelled,
    Completed,
}

impl AppointmentEvent {
    pub fn kind(self) -> &'static str {
        match self {
            AppointmentEvent::Created => "appointment_created",
            AppointmentEvent::Claimed => "appointment_claimed",
            AppointmentEvent::Released => "appointment_released",
            AppointmentEvent::Rescheduled => "appointment_rescheduled",
            AppointmentEvent::Cancelled => "appointment_cancelled",
            AppointmentEvent::Completed => "appointment_completed",
        }
    }
}

/// Fire-and-forget publisher for appointment events. Subscribers (the admin
/// event stream, or any delivery channel added later) receive a [`ServerEvent`].
#[derive(Clone)]
pub struct Notifier {
    events: broadcast::Sender<ServerEvent>,
    settings: SettingsHandle,
}

impl Notifier {
    pub fn new(events: broadcast::Sender<ServerEvent>, settings: SettingsHandle) -> Self {
        Self { events, settings }
    }

    fn enabled(&self, event: AppointmentEvent) -> bool {
        let settings = self.settings.current();
        match event {
            AppointmentEvent::Created => settings.notify_on_created,
            AppointmentEvent::Cancelled => settings.notify_on_cancelled,
            AppointmentEvent::Completed => settings.notify_on_completed,
            AppointmentEvent::Claimed | AppointmentEvent::Released | AppointmentEvent::Rescheduled => true,
        }
    }

    /// Returns whether the event went out; disabled toggles and a channel without
    /// subscribers both count as not delivered.
    pub fn publish(&self, event: AppointmentEvent, row: &AppointmentRow) -> bool {
        if !self.enabled(event) {
            log::debug!("Notification {} for {} is disabled.", event.kind(), row.id);
            return false;
        }
        self.events
            .send(ServerEvent::from_row(event.kind(), row))
            .is_ok()
    }
}
