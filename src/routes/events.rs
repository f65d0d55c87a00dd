use actix_web::{http::header, web, HttpResponse};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::state::{AppState, ServerEvent};

/// Server-Sent Events feed of appointment lifecycle events. Mounted under the
/// admin scope, so only administrators can subscribe.
pub async fn stream_events(state: web::Data<AppState>) -> HttpResponse {
    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => Some(Ok::<web::Bytes, actix_web::Error>(event_to_bytes(&event))),
        Err(err) => {
            log::debug!("Event subscriber lagged: {err}");
            None
        }
    });

    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(stream)
}

fn event_to_bytes(event: &ServerEvent) -> web::Bytes {
    let payload = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    web::Bytes::from(format!("event: {}\ndata: {}\n\n", event.kind, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_framed_for_sse() {
        let event = ServerEvent {
            kind: "appointment_claimed".into(),
            appointment_id: "a1".into(),
            status: "in_progress".into(),
            client_name: "Ana".into(),
            service: "Revisão".into(),
            motorcycle: "Honda CG 2019".into(),
            scheduled_for: "2026-10-20T13:00:00Z".into(),
            mechanic_name: Some("João".into()),
        };
        let bytes = event_to_bytes(&event);
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.starts_with("event: appointment_claimed\ndata: {"));
        assert!(text.contains("\"appointment_id\":\"a1\""));
        assert!(text.ends_with("\n\n"));
    }
}
