//! Read-side statistics for the three dashboards. Nothing is cached; every call
//! recomputes from the database.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::{
    input,
    lifecycle::AppointmentEngine,
    models::{ActivityRow, AppointmentRow, AppointmentStatus, APPOINTMENT_SELECT},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub scheduled: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub cancelled: i64,
}

impl StatusCounts {
    pub fn total(&self) -> i64 {
        self.scheduled + self.in_progress + self.completed + self.cancelled
    }

    pub fn get(&self, status: AppointmentStatus) -> i64 {
        match status {
            AppointmentStatus::Scheduled => self.scheduled,
            AppointmentStatus::InProgress => self.in_progress,
            AppointmentStatus::Completed => self.completed,
            AppointmentStatus::Cancelled => self.cancelled,
        }
    }

    fn from_rows(rows: Vec<(String, i64)>) -> Self {
        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            match status.parse::<AppointmentStatus>() {
                Ok(AppointmentStatus::Scheduled) => counts.scheduled = count,
                Ok(AppointmentStatus::InProgress) => counts.in_progress = count,
                Ok(AppointmentStatus::Completed) => counts.completed = count,
                Ok(AppointmentStatus::Cancelled) => counts.cancelled = count,
                Err(err) => log::warn!("Skipping appointments with {err}."),
            }
        }
        counts
    }
}

#[derive(Debug, Clone)]
pub struct ClientDashboard {
    pub upcoming: Vec<AppointmentRow>,
    pub last_completed: Option<AppointmentRow>,
    pub counts: StatusCounts,
    pub motorcycles: i64,
    pub revenue_cents: i64,
}

#[derive(Debug, Clone)]
pub struct AdminDashboard {
    pub clients: i64,
    pub mechanics: i64,
    pub appointments: i64,
    pub service_orders: i64,
    pub today: i64,
    pub counts: StatusCounts,
    pub activities: Vec<ActivityRow>,
}

#[derive(Debug, Clone)]
pub struct MechanicDashboard {
    pub available: Vec<AppointmentRow>,
    pub active: Vec<AppointmentRow>,
    pub completed: i64,
}

fn count(query: &str) -> CountQuery<'_> {
    CountQuery {
        query,
        param: None,
    }
}

struct CountQuery<'q> {
    query: &'q str,
    param: Option<&'q str>,
}

impl<'q> CountQuery<'q> {
    fn bind(mut self, param: &'q str) -> Self {
        self.param = Some(param);
        self
    }

    async fn run(self, pool: &SqlitePool) -> Result<i64, sqlx::Error> {
        let query = sqlx::query_scalar::<_, i64>(self.query);
        match self.param {
            Some(param) => query.bind(param).fetch_one(pool).await,
            None => query.fetch_one(pool).await,
        }
    }
}

async fn status_counts(pool: &SqlitePool, client_id: Option<&str>) -> Result<StatusCounts, sqlx::Error> {
    let rows = match client_id {
        Some(client_id) => {
            sqlx::query_as::<_, (String, i64)>(
                "SELECT status, COUNT(*) FROM appointments WHERE client_id = ? GROUP BY status",
            )
            .bind(client_id)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, (String, i64)>("SELECT status, COUNT(*) FROM appointments GROUP BY status")
                .fetch_all(pool)
                .await?
        }
    };
    Ok(StatusCounts::from_rows(rows))
}

pub async fn client(pool: &SqlitePool, client_id: &str, now: DateTime<Utc>) -> Result<ClientDashboard, sqlx::Error> {
    let upcoming = sqlx::query_as::<_, AppointmentRow>(&format!(
        r#"{APPOINTMENT_SELECT}
           WHERE a.client_id = ? AND a.status != 'cancelled' AND a.scheduled_for >= ?
           ORDER BY a.scheduled_for ASC
           LIMIT 5"#
    ))
    .bind(client_id)
    .bind(input::to_db_time(now))
    .fetch_all(pool)
    .await?;

    let last_completed = sqlx::query_as::<_, AppointmentRow>(&format!(
        r#"{APPOINTMENT_SELECT}
           WHERE a.client_id = ? AND a.status = 'completed'
           ORDER BY a.scheduled_for DESC
           LIMIT 1"#
    ))
    .bind(client_id)
    .fetch_optional(pool)
    .await?;

    let counts = status_counts(pool, Some(client_id)).await?;
    let motorcycles = count("SELECT COUNT(*) FROM motorcycles WHERE client_id = ?")
        .bind(client_id)
        .run(pool)
        .await?;
    let revenue_cents = count(
        "SELECT COALESCE(SUM(service_value_cents), 0) FROM appointments WHERE client_id = ? AND status = 'completed'",
    )
    .bind(client_id)
    .run(pool)
    .await?;

    Ok(ClientDashboard {
        upcoming,
        last_completed,
        counts,
        motorcycles,
        revenue_cents,
    })
}

pub async fn admin(pool: &SqlitePool, now: DateTime<Utc>, offset_minutes: i64) -> Result<AdminDashboard, sqlx::Error> {
    let (day_start, day_end) = input::local_day_bounds(now, offset_minutes);
    let day_start = input::to_db_time(day_start);
    let day_end = input::to_db_time(day_end);
    let today = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM appointments WHERE scheduled_for >= ? AND scheduled_for < ?",
    )
    .bind(&day_start)
    .bind(&day_end)
    .fetch_one(pool)
    .await?;

    let activities = sqlx::query_as::<_, ActivityRow>(
        "SELECT message, created_at FROM activities ORDER BY created_at DESC LIMIT 10",
    )
    .fetch_all(pool)
    .await?;

    Ok(AdminDashboard {
        clients: count("SELECT COUNT(*) FROM clients").run(pool).await?,
        mechanics: count("SELECT COUNT(*) FROM mechanics").run(pool).await?,
        appointments: count("SELECT COUNT(*) FROM appointments").run(pool).await?,
        service_orders: count("SELECT COUNT(*) FROM service_orders").run(pool).await?,
        today,
        counts: status_counts(pool, None).await?,
        activities,
    })
}

pub async fn mechanic(
    pool: &SqlitePool,
    engine: &AppointmentEngine<'_>,
    mechanic_id: &str,
) -> Result<MechanicDashboard, sqlx::Error> {
    Ok(MechanicDashboard {
        available: engine.available_work().await?,
        active: engine.active_work(mechanic_id).await?,
        completed: count("SELECT COUNT(*) FROM appointments WHERE mechanic_id = ? AND status = 'completed'")
            .bind(mechanic_id)
            .run(pool)
            .await?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        catalog::{self, testing::insert_client, testing::insert_service},
        db::log_activity,
        state::test_state,
    };

    async fn appointment(pool: &SqlitePool, client: &str, when: &str, status: &str, value: Option<i64>) -> String {
        let service = insert_service(pool, &format!("Serviço {}", crate::auth::new_id())).await;
        let mut conn = pool.acquire().await.unwrap();
        let moto = catalog::get_or_create_motorcycle(&mut conn, client, "Honda", "CG", 2019)
            .await
            .unwrap();
        drop(conn);
        let id = crate::auth::new_id();
        sqlx::query(
            r#"INSERT INTO appointments (id, client_id, service_id, motorcycle_id, service_value_cents,
                   scheduled_for, status, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, '', '')"#,
        )
        .bind(&id)
        .bind(client)
        .bind(service)
        .bind(moto)
        .bind(value)
        .bind(when)
        .bind(status)
        .execute(pool)
        .await
        .unwrap();
        id
    }

    fn now() -> DateTime<Utc> {
        input::from_db_time("2026-10-18T15:00:00Z").unwrap()
    }

    #[actix_web::test]
    async fn client_dashboard_sums_completed_work() {
        let state = test_state().await;
        let pool = &state.db;
        let ana = insert_client(pool, "ana").await;
        appointment(pool, &ana, "2026-09-01T13:00:00Z", "completed", Some(15000)).await;
        let last = appointment(pool, &ana, "2026-10-01T13:00:00Z", "completed", Some(8050)).await;
        appointment(pool, &ana, "2026-10-20T13:00:00Z", "cancelled", None).await;
        let soon = appointment(pool, &ana, "2026-10-19T13:00:00Z", "scheduled", None).await;
        for day in 21..=26 {
            appointment(pool, &ana, &format!("2026-10-{day}T13:00:00Z"), "scheduled", None).await;
        }

        let view = client(pool, &ana, now()).await.unwrap();
        assert_eq!(view.upcoming.len(), 5);
        assert_eq!(view.upcoming[0].id, soon);
        assert!(view.upcoming.iter().all(|row| row.status != "cancelled"));
        assert_eq!(view.last_completed.map(|row| row.id), Some(last));
        assert_eq!(view.revenue_cents, 23050);
        assert_eq!(view.counts.completed, 2);
        assert_eq!(view.counts.scheduled, 7);
        assert_eq!(view.counts.total(), 10);
        assert_eq!(view.motorcycles, 1);
    }

    #[actix_web::test]
    async fn admin_dashboard_counts_today_in_shop_time() {
        let state = test_state().await;
        let pool = &state.db;
        let client = insert_client(pool, "ana").await;
        // 23:30 local on the 18th is already the 19th in UTC.
        appointment(pool, &client, "2026-10-19T02:30:00Z", "scheduled", None).await;
        appointment(pool, &client, "2026-10-19T13:00:00Z", "scheduled", None).await;
        log_activity(pool, "test", "Something happened.", None, None).await;

        let view = admin(pool, now(), -180).await.unwrap();
        assert_eq!(view.today, 1);
        assert_eq!(view.clients, 1);
        assert_eq!(view.appointments, 2);
        assert_eq!(view.service_orders, 0);
        assert_eq!(view.counts.get(AppointmentStatus::Scheduled), 2);
        assert_eq!(view.activities.len(), 1);
    }
}
