use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::{db, error::ShopError, input};

pub const RETENTION_DAYS: i64 = 180;
pub const RESET_CONFIRMATION: &str = "CONFIRMAR RESET";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub appointments: u64,
    pub service_orders: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResetReport {
    pub appointments: u64,
    pub service_orders: u64,
    pub motorcycles: u64,
    pub services: u64,
    pub clients: u64,
    pub mechanics: u64,
    pub users: u64,
}

/// Deletes completed and cancelled appointments scheduled before the retention
/// window, together with their service orders.
pub async fn cleanup(pool: &SqlitePool, now: DateTime<Utc>) -> Result<CleanupReport, sqlx::Error> {
    let cutoff = input::to_db_time(now - Duration::days(RETENTION_DAYS));
    let mut tx = pool.begin().await?;

    let service_orders = sqlx::query(
        r#"DELETE FROM service_orders
           WHERE appointment_id IN (
               SELECT id FROM appointments
               WHERE status IN ('completed', 'cancelled') AND scheduled_for < ?
           )"#,
    )
    .bind(&cutoff)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    let appointments = sqlx::query(
        "DELETE FROM appointments WHERE status IN ('completed', 'cancelled') AND scheduled_for < ?",
    )
    .bind(&cutoff)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    tx.commit().await?;

    let report = CleanupReport {
        appointments,
        service_orders,
    };
    log::info!(
        "Retention cleanup removed {} appointment(s) and {} service order(s) older than {cutoff}.",
        report.appointments,
        report.service_orders
    );
    db::log_activity(
        pool,
        "cleanup",
        &format!("Retention cleanup removed {} appointment(s).", report.appointments),
        None,
        None,
    )
    .await;
    Ok(report)
}

/// Wipes every business record. Administrator identities survive: users with an
/// administrator profile or a staff/superuser flag, plus the acting user.
pub async fn reset(pool: &SqlitePool, confirmation: &str, acting_user: &str) -> Result<ResetReport, ShopError> {
    if confirmation != RESET_CONFIRMATION {
        return Err(ShopError::Validation(format!(
            "Type exactly \"{RESET_CONFIRMATION}\" to confirm the reset."
        )));
    }

    let mut tx = pool.begin().await?;
    let mut report = ResetReport::default();

    report.service_orders = sqlx::query("DELETE FROM service_orders")
        .execute(&mut *tx)
        .await?
        .rows_affected();
    report.appointments = sqlx::query("DELETE FROM appointments")
        .execute(&mut *tx)
        .await?
        .rows_affected();
    report.motorcycles = sqlx::query("DELETE FROM motorcycles")
        .execute(&mut *tx)
        .await?
        .rows_affected();
    report.services = sqlx::query("DELETE FROM services")
        .execute(&mut *tx)
        .await?
        .rows_affected();
    report.clients = sqlx::query("DELETE FROM clients")
        .execute(&mut *tx)
        .await?
        .rows_affected();
    report.mechanics = sqlx::query("DELETE FROM mechanics")
        .execute(&mut *tx)
        .await?
        .rows_affected();
    report.users = sqlx::query(
        r#"DELETE FROM users
           WHERE id != ?
             AND is_staff = 0 AND is_superuser = 0
             AND id NOT IN (SELECT user_id FROM administrators)"#,
    )
    .bind(acting_user)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    sqlx::query("DELETE FROM activities").execute(&mut *tx).await?;

    tx.commit().await?;

    log::warn!(
        "Full reset by user {acting_user}: {} appointment(s), {} client(s), {} mechanic(s) removed.",
        report.appointments,
        report.clients,
        report.mechanics
    );
    db::log_activity(pool, "reset", "The shop data was reset.", Some(acting_user), None).await;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth,
        catalog::{self, testing::insert_client, testing::insert_service},
        db::{seed_defaults, test_pool},
        orders,
    };

    async fn appointment(pool: &SqlitePool, client: &str, when: &str, status: &str) -> String {
        let service = insert_service(pool, &format!("Serviço {}", auth::new_id())).await;
        let mut conn = pool.acquire().await.unwrap();
        let moto = catalog::get_or_create_motorcycle(&mut conn, client, "Honda", "CG", 2019)
            .await
            .unwrap();
        drop(conn);
        let id = auth::new_id();
        sqlx::query(
            r#"INSERT INTO appointments (id, client_id, service_id, motorcycle_id, scheduled_for, status, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, '', '')"#,
        )
        .bind(&id)
        .bind(client)
        .bind(service)
        .bind(moto)
        .bind(when)
        .bind(status)
        .execute(pool)
        .await
        .unwrap();
        id
    }

    async fn count(pool: &SqlitePool, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[actix_web::test]
    async fn cleanup_only_removes_old_final_appointments() {
        let pool = test_pool().await;
        let client = insert_client(&pool, "ana").await;
        let old_done = appointment(&pool, &client, "2026-01-10T13:00:00Z", "completed").await;
        appointment(&pool, &client, "2026-01-11T13:00:00Z", "cancelled").await;
        appointment(&pool, &client, "2026-01-12T13:00:00Z", "scheduled").await;
        appointment(&pool, &client, "2026-09-01T13:00:00Z", "completed").await;
        orders::create_from_appointment(&pool, &old_done).await.unwrap();

        let now = input::from_db_time("2026-10-18T12:00:00Z").unwrap();
        let report = cleanup(&pool, now).await.unwrap();
        assert_eq!(
            report,
            CleanupReport {
                appointments: 2,
                service_orders: 1
            }
        );
        assert_eq!(count(&pool, "appointments").await, 2);
        assert_eq!(count(&pool, "service_orders").await, 0);
    }

    #[actix_web::test]
    async fn reset_requires_the_exact_phrase() {
        let pool = test_pool().await;
        let client = insert_client(&pool, "ana").await;
        appointment(&pool, &client, "2026-01-10T13:00:00Z", "completed").await;

        for phrase in ["yes", "confirmar reset", "CONFIRMAR RESET ", ""] {
            assert!(matches!(
                reset(&pool, phrase, "nobody").await,
                Err(ShopError::Validation(_))
            ));
        }
        assert_eq!(count(&pool, "appointments").await, 1);
    }

    #[actix_web::test]
    async fn reset_keeps_administrators_only() {
        let pool = test_pool().await;
        seed_defaults(&pool).await.unwrap();
        let admin_id: String = sqlx::query_scalar("SELECT user_id FROM administrators")
            .fetch_one(&pool)
            .await
            .unwrap();
        let staff = auth::testing::insert_user(&pool, "staffer", "pass123", true).await;
        let client = insert_client(&pool, "ana").await;
        appointment(&pool, &client, "2026-10-19T13:00:00Z", "scheduled").await;

        let report = reset(&pool, RESET_CONFIRMATION, &admin_id).await.unwrap();
        assert_eq!(report.appointments, 1);
        assert_eq!(report.clients, 1);
        assert_eq!(report.users, 1);

        let remaining: Vec<String> = sqlx::query_scalar("SELECT id FROM users ORDER BY username")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.contains(&admin_id));
        assert!(remaining.contains(&staff));
        assert_eq!(count(&pool, "services").await, 0);
        assert_eq!(count(&pool, "administrators").await, 1);
    }
}
