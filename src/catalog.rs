use serde::Deserialize;
use sqlx::{SqliteConnection, SqlitePool};

use crate::{
    auth::new_id,
    db,
    error::ShopError,
    input::{non_empty, parse_positive_cents, parse_year},
    models::{MotorcycleRow, ServiceRow},
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewService {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: Option<String>,
    pub duration_minutes: Option<String>,
    pub category: Option<String>,
}

pub async fn list_services(pool: &SqlitePool, active_only: bool) -> Result<Vec<ServiceRow>, sqlx::Error> {
    let query = if active_only {
        "SELECT id, name, description, price_cents, duration_minutes, category, active FROM services WHERE active = 1 ORDER BY name"
    } else {
        "SELECT id, name, description, price_cents, duration_minutes, category, active FROM services ORDER BY name"
    };
    sqlx::query_as::<_, ServiceRow>(query).fetch_all(pool).await
}

pub async fn create_service(pool: &SqlitePool, service: &NewService) -> Result<String, ShopError> {
    let mut errors = Vec::new();
    let name = service.name.trim();
    if name.is_empty() {
        errors.push("Service name is required.".to_string());
    }
    let price_cents = match non_empty(service.price.as_deref()) {
        Some(raw) => match parse_positive_cents(&raw) {
            Some(cents) => Some(cents),
            None => {
                errors.push("Price must be a positive amount.".to_string());
                None
            }
        },
        None => None,
    };
    let duration = match non_empty(service.duration_minutes.as_deref()) {
        Some(raw) => match raw.parse::<i64>() {
            Ok(minutes) if minutes > 0 => Some(minutes),
            _ => {
                errors.push("Duration must be a positive number of minutes.".to_string());
                None
            }
        },
        None => None,
    };
    if !errors.is_empty() {
        return Err(ShopError::Invalid(errors));
    }

    let id = new_id();
    let result = sqlx::query(
        r#"INSERT INTO services (id, name, description, price_cents, duration_minutes, category, active, created_at)
           VALUES (?, ?, ?, ?, ?, ?, 1, ?)"#,
    )
    .bind(&id)
    .bind(name)
    .bind(service.description.trim())
    .bind(price_cents)
    .bind(duration)
    .bind(non_empty(service.category.as_deref()).unwrap_or_else(|| "geral".to_string()))
    .bind(db::now())
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(id),
        Err(err) if is_unique_violation(&err) => Err(ShopError::Conflict(format!(
            "A service named '{name}' already exists."
        ))),
        Err(err) => Err(err.into()),
    }
}

pub async fn toggle_service(pool: &SqlitePool, service_id: &str) -> Result<bool, ShopError> {
    let active = sqlx::query_scalar::<_, bool>(
        "UPDATE services SET active = NOT active WHERE id = ? RETURNING active",
    )
    .bind(service_id)
    .fetch_optional(pool)
    .await?;
    active.ok_or(ShopError::NotFound("service"))
}

/// Id of the service with this exact name, creating it when missing.
pub async fn get_or_create_service(conn: &mut SqliteConnection, name: &str) -> Result<String, sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO services (id, name, description, category, active, created_at)
           VALUES (?, ?, ?, 'personalizado', 1, ?)
           ON CONFLICT(name) DO NOTHING"#,
    )
    .bind(new_id())
    .bind(name)
    .bind(format!("Custom service: {name}"))
    .bind(db::now())
    .execute(&mut *conn)
    .await?;

    sqlx::query_scalar::<_, String>("SELECT id FROM services WHERE name = ?")
        .bind(name)
        .fetch_one(&mut *conn)
        .await
}

pub async fn is_active_service(conn: &mut SqliteConnection, service_id: &str) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM services WHERE id = ? AND active = 1)")
        .bind(service_id)
        .fetch_one(conn)
        .await
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewMotorcycle {
    pub brand: String,
    pub model: String,
    pub year: String,
    pub plate: Option<String>,
    pub color: Option<String>,
}

pub async fn list_motorcycles(pool: &SqlitePool, client_id: &str) -> Result<Vec<MotorcycleRow>, sqlx::Error> {
    sqlx::query_as::<_, MotorcycleRow>(
        r#"SELECT id, client_id, brand, model, year, plate, color
           FROM motorcycles
           WHERE client_id = ?
           ORDER BY brand, model, year"#,
    )
    .bind(client_id)
    .fetch_all(pool)
    .await
}

pub async fn register_motorcycle(
    pool: &SqlitePool,
    client_id: &str,
    motorcycle: &NewMotorcycle,
) -> Result<String, ShopError> {
    let mut errors = Vec::new();
    let brand = motorcycle.brand.trim();
    let model = motorcycle.model.trim();
    if brand.is_empty() {
        errors.push("Brand is required.".to_string());
    }
    if model.is_empty() {
        errors.push("Model is required.".to_string());
    }
    let year = parse_year(&motorcycle.year);
    if year.is_none() {
        errors.push("Year must be a valid four-digit year.".to_string());
    }
    let Some(year) = year.filter(|_| errors.is_empty()) else {
        return Err(ShopError::Invalid(errors));
    };

    let id = new_id();
    let result = sqlx::query(
        r#"INSERT INTO motorcycles (id, client_id, brand, model, year, plate, color)
           VALUES (?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind(client_id)
    .bind(brand)
    .bind(model)
    .bind(year)
    .bind(non_empty(motorcycle.plate.as_deref()))
    .bind(non_empty(motorcycle.color.as_deref()))
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(id),
        Err(err) if is_unique_violation(&err) => Err(ShopError::Conflict(
            "This motorcycle is already registered.".to_string(),
        )),
        Err(err) => Err(err.into()),
    }
}

/// Deletes one of the client's motorcycles. Refused while any appointment
/// references it; the check and the delete are one statement.
pub async fn delete_motorcycle(pool: &SqlitePool, client_id: &str, motorcycle_id: &str) -> Result<(), ShopError> {
    let deleted = sqlx::query(
        r#"DELETE FROM motorcycles
           WHERE id = ?1 AND client_id = ?2
             AND NOT EXISTS (SELECT 1 FROM appointments WHERE motorcycle_id = ?1)"#,
    )
    .bind(motorcycle_id)
    .bind(client_id)
    .execute(pool)
    .await?
    .rows_affected();

    if deleted == 1 {
        return Ok(());
    }

    let owned = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM motorcycles WHERE id = ? AND client_id = ?)",
    )
    .bind(motorcycle_id)
    .bind(client_id)
    .fetch_one(pool)
    .await?;

    if owned {
        Err(ShopError::Conflict(
            "This motorcycle has appointments and cannot be deleted.".to_string(),
        ))
    } else {
        Err(ShopError::NotFound("motorcycle"))
    }
}

/// Id of the client's motorcycle with this brand, model and year, creating it when missing.
pub async fn get_or_create_motorcycle(
    conn: &mut SqliteConnection,
    client_id: &str,
    brand: &str,
    model: &str,
    year: i64,
) -> Result<String, sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO motorcycles (id, client_id, brand, model, year)
           VALUES (?, ?, ?, ?, ?)
           ON CONFLICT(client_id, brand, model, year) DO NOTHING"#,
    )
    .bind(new_id())
    .bind(client_id)
    .bind(brand)
    .bind(model)
    .bind(year)
    .execute(&mut *conn)
    .await?;

    sqlx::query_scalar::<_, String>(
        "SELECT id FROM motorcycles WHERE client_id = ? AND brand = ? AND model = ? AND year = ?",
    )
    .bind(client_id)
    .bind(brand)
    .bind(model)
    .bind(year)
    .fetch_one(&mut *conn)
    .await
}

pub async fn is_owned_motorcycle(
    conn: &mut SqliteConnection,
    client_id: &str,
    motorcycle_id: &str,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM motorcycles WHERE id = ? AND client_id = ?)",
    )
    .bind(motorcycle_id)
    .bind(client_id)
    .fetch_one(conn)
    .await
}

pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db_err| db_err.is_unique_violation())
        .unwrap_or(false)
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::db::test_pool;

    #[actix_web::test]
    async fn service_names_are_unique() {
        let pool = test_pool().await;
        insert_service(&pool, "Freios").await;
        let again = create_service(
            &pool,
            &NewService {
                name: "Freios".into(),
                ..NewService::default()
            },
        )
        .await;
        assert!(matches!(again, Err(ShopError::Conflict(_))));
    }

    #[actix_web::test]
    async fn service_validation_collects_every_problem() {
        let pool = test_pool().await;
        let result = create_service(
            &pool,
            &NewService {
                name: " ".into(),
                price: Some("0".into()),
                duration_minutes: Some("-5".into()),
                ..NewService::default()
            },
        )
        .await;
        match result {
            Err(ShopError::Invalid(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[actix_web::test]
    async fn toggled_services_disappear_from_booking_list() {
        let pool = test_pool().await;
        let id = insert_service(&pool, "Relação").await;
        assert!(!toggle_service(&pool, &id).await.unwrap());
        assert!(list_services(&pool, true).await.unwrap().is_empty());
        assert_eq!(list_services(&pool, false).await.unwrap().len(), 1);
        assert!(toggle_service(&pool, &id).await.unwrap());
        assert!(matches!(
            toggle_service(&pool, "missing").await,
            Err(ShopError::NotFound(_))
        ));
    }

    #[actix_web::test]
    async fn get_or_create_reuses_existing_rows() {
        let pool = test_pool().await;
        let client = insert_client(&pool, "ana").await;
        let mut conn = pool.acquire().await.unwrap();

        let first = get_or_create_service(&mut conn, "Pintura").await.unwrap();
        let second = get_or_create_service(&mut conn, "Pintura").await.unwrap();
        assert_eq!(first, second);

        let moto = get_or_create_motorcycle(&mut conn, &client, "Honda", "CB600F", 2020)
            .await
            .unwrap();
        let same = get_or_create_motorcycle(&mut conn, &client, "Honda", "CB600F", 2020)
            .await
            .unwrap();
        let newer = get_or_create_motorcycle(&mut conn, &client, "Honda", "CB600F", 2021)
            .await
            .unwrap();
        assert_eq!(moto, same);
        assert_ne!(moto, newer);
        assert!(is_owned_motorcycle(&mut conn, &client, &moto).await.unwrap());
    }

    #[actix_web::test]
    async fn motorcycle_without_appointments_can_be_deleted() {
        let pool = test_pool().await;
        let client = insert_client(&pool, "ana").await;
        let id = register_motorcycle(
            &pool,
            &client,
            &NewMotorcycle {
                brand: "Yamaha".into(),
                model: "MT-07".into(),
                year: "2022".into(),
                plate: Some("XYZ-9876".into()),
                color: None,
            },
        )
        .await
        .unwrap();

        delete_motorcycle(&pool, &client, &id).await.unwrap();
        assert!(list_motorcycles(&pool, &client).await.unwrap().is_empty());
    }

    #[actix_web::test]
    async fn motorcycle_with_appointments_is_kept() {
        let pool = test_pool().await;
        let client = insert_client(&pool, "ana").await;
        let service = insert_service(&pool, "Freios").await;
        let mut conn = pool.acquire().await.unwrap();
        let moto = get_or_create_motorcycle(&mut conn, &client, "Honda", "CG", 2019)
            .await
            .unwrap();
        drop(conn);
        sqlx::query(
            r#"INSERT INTO appointments (id, client_id, service_id, motorcycle_id, scheduled_for, status, created_at, updated_at)
               VALUES ('a1', ?, ?, ?, '2026-10-19T13:00:00Z', 'completed', '', '')"#,
        )
        .bind(&client)
        .bind(&service)
        .bind(&moto)
        .execute(&pool)
        .await
        .unwrap();

        let result = delete_motorcycle(&pool, &client, &moto).await;
        assert!(matches!(result, Err(ShopError::Conflict(_))));
        assert_eq!(list_motorcycles(&pool, &client).await.unwrap().len(), 1);
    }

    #[actix_web::test]
    async fn clients_cannot_delete_other_clients_motorcycles() {
        let pool = test_pool().await;
        let owner = insert_client(&pool, "ana").await;
        let other = insert_client(&pool, "bruno").await;
        let mut conn = pool.acquire().await.unwrap();
        let moto = get_or_create_motorcycle(&mut conn, &owner, "Honda", "CG", 2019)
            .await
            .unwrap();
        drop(conn);

        let result = delete_motorcycle(&pool, &other, &moto).await;
        assert!(matches!(result, Err(ShopError::NotFound(_))));
        assert_eq!(list_motorcycles(&pool, &owner).await.unwrap().len(), 1);
    }
}
