use sqlx::SqlitePool;

use crate::{
    auth::new_id,
    catalog::is_unique_violation,
    db,
    error::ShopError,
    models::{OrderStatus, ServiceOrderRow},
};

/// Cost used when neither the appointment nor the service carries a value.
pub const FALLBACK_COST_CENTS: i64 = 15000;

const ORDER_SELECT: &str = r#"SELECT o.id, o.appointment_id, c.full_name AS client_name, s.name AS service_name,
       o.client_description, o.service_description, o.cost_cents, o.completed_at, o.notes, o.status
FROM service_orders o
JOIN appointments a ON o.appointment_id = a.id
JOIN clients c ON a.client_id = c.id
JOIN services s ON a.service_id = s.id"#;

/// Opens the service order of an appointment. Each appointment has at most one.
pub async fn create_from_appointment(pool: &SqlitePool, appointment_id: &str) -> Result<ServiceOrderRow, ShopError> {
    let source = sqlx::query_as::<_, (Option<String>, Option<String>, Option<i64>, Option<i64>, String, String)>(
        r#"SELECT a.problem_description, a.mechanic_notes, a.service_value_cents, s.price_cents, s.name, a.status
           FROM appointments a
           JOIN services s ON a.service_id = s.id
           WHERE a.id = ?"#,
    )
    .bind(appointment_id)
    .fetch_optional(pool)
    .await?;

    let Some((problem, notes, value, price, service_name, status)) = source else {
        return Err(ShopError::NotFound("appointment"));
    };

    let cost = value.or(price).unwrap_or(FALLBACK_COST_CENTS);
    let (order_status, completed_at) = if status == "completed" {
        (OrderStatus::Completed, Some(db::now()))
    } else {
        (OrderStatus::Pending, None)
    };

    let id = new_id();
    let result = sqlx::query(
        r#"INSERT INTO service_orders (id, appointment_id, client_description, service_description,
               cost_cents, completed_at, notes, status, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind(appointment_id)
    .bind(problem)
    .bind(notes.clone().unwrap_or(service_name))
    .bind(cost)
    .bind(completed_at)
    .bind(notes)
    .bind(order_status.as_str())
    .bind(db::now())
    .execute(pool)
    .await;

    match result {
        Ok(_) => {}
        Err(err) if is_unique_violation(&err) => {
            return Err(ShopError::Conflict(
                "This appointment already has a service order.".to_string(),
            ))
        }
        Err(err) => return Err(err.into()),
    }

    db::log_activity(
        pool,
        "order_created",
        "A service order was opened.",
        None,
        Some(appointment_id),
    )
    .await;
    find(pool, &id).await?.ok_or(ShopError::NotFound("service order"))
}

pub async fn find(pool: &SqlitePool, id: &str) -> Result<Option<ServiceOrderRow>, sqlx::Error> {
    sqlx::query_as::<_, ServiceOrderRow>(&format!("{ORDER_SELECT} WHERE o.id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn list(pool: &SqlitePool) -> Result<Vec<ServiceOrderRow>, sqlx::Error> {
    sqlx::query_as::<_, ServiceOrderRow>(&format!("{ORDER_SELECT} ORDER BY o.created_at DESC"))
        .fetch_all(pool)
        .await
}

/// Sets the order status. Completing stamps the completion time once.
pub async fn set_status(pool: &SqlitePool, id: &str, status: OrderStatus) -> Result<(), ShopError> {
    let updated = sqlx::query(
        r#"UPDATE service_orders
           SET status = ?1,
               completed_at = CASE WHEN ?1 = 'completed' THEN COALESCE(completed_at, ?2) ELSE completed_at END
           WHERE id = ?3"#,
    )
    .bind(status.as_str())
    .bind(db::now())
    .bind(id)
    .execute(pool)
    .await?
    .rows_affected();

    if updated == 0 {
        return Err(ShopError::NotFound("service order"));
    }
    Ok(())
}
