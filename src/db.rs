use std::{env, fs, path::Path};

use chrono::Utc;
use sqlx::SqlitePool;

use crate::{
    auth::{hash_password, new_id},
    input::to_db_time,
};

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

pub fn ensure_sqlite_dir(db_url: &str) -> std::io::Result<()> {
    let path = if let Some(path) = db_url.strip_prefix("sqlite://") {
        Some(path)
    } else if let Some(path) = db_url.strip_prefix("sqlite:") {
        Some(path)
    } else {
        None
    };

    let Some(path) = path else {
        return Ok(());
    };

    let path = path.split('?').next().unwrap_or(path);
    if path == ":memory:" || path.is_empty() {
        return Ok(());
    }

    let path = path.strip_prefix("file:").unwrap_or(path);
    let db_path = Path::new(path);
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

pub fn now() -> String {
    to_db_time(Utc::now())
}

pub async fn seed_defaults(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    seed_admin(pool).await?;
    seed_services(pool).await?;
    seed_mechanic(pool).await?;
    Ok(())
}

pub async fn log_activity(
    pool: &SqlitePool,
    kind: &str,
    message: &str,
    user_id: Option<&str>,
    appointment_id: Option<&str>,
) {
    let result = sqlx::query(
        r#"INSERT INTO activities (id, kind, message, created_at, user_id, appointment_id)
           VALUES (?, ?, ?, ?, ?, ?)"#,
    )
    .bind(new_id())
    .bind(kind)
    .bind(message)
    .bind(now())
    .bind(user_id)
    .bind(appointment_id)
    .execute(pool)
    .await;

    if let Err(err) = result {
        log::warn!("Could not record activity '{kind}': {err}");
    }
}

async fn seed_admin(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let existing = sqlx::query_scalar::<_, String>("SELECT id FROM administrators LIMIT 1")
        .fetch_optional(pool)
        .await?;

    if existing.is_some() {
        return Ok(());
    }

    let username = env::var("ADMIN_USER").unwrap_or_else(|_| "admin".to_string());
    let password = env::var("ADMIN_PASSWORD").unwrap_or_else(|_| "admin".to_string());
    let display_name = env::var("ADMIN_DISPLAY_NAME").unwrap_or_else(|_| "Administrador".to_string());

    if password == "admin" {
        log::warn!("ADMIN_PASSWORD not set. Using default password 'admin'. Set ADMIN_PASSWORD in production.");
    }

    let password_hash = hash_password(&password)
        .map_err(|_| sqlx::Error::Protocol("password hash failed".into()))?;
    let user_id = new_id();

    let mut tx = pool.begin().await?;
    sqlx::query(
        r#"INSERT INTO users (id, username, display_name, password_hash, is_staff, is_superuser, active, created_at)
           VALUES (?, ?, ?, ?, 1, 1, 1, ?)"#,
    )
    .bind(&user_id)
    .bind(&username)
    .bind(display_name)
    .bind(password_hash)
    .bind(now())
    .execute(&mut *tx)
    .await?;
    sqlx::query("INSERT INTO administrators (id, user_id, email, phone) VALUES (?, ?, ?, ?)")
        .bind(new_id())
        .bind(&user_id)
        .bind("admin@oficina.com")
        .bind("(00) 00000-0000")
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    log::info!("Seeded administrator account '{username}'.");
    Ok(())
}

async fn seed_services(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let services: [(&str, &str, i64, i64, &str); 5] = [
        ("Troca de Óleo", "Troca de óleo do motor e filtro.", 15000, 40, "manutencao"),
        ("Revisão Geral", "Revisão completa de itens de segurança.", 35000, 180, "manutencao"),
        ("Freios", "Troca de pastilhas e regulagem dos freios.", 18000, 60, "seguranca"),
        ("Relação", "Troca de corrente, coroa e pinhão.", 25000, 90, "transmissao"),
        ("Diagnóstico Elétrico", "Verificação de bateria, chicote e iluminação.", 12000, 60, "eletrica"),
    ];

    for (name, description, price_cents, duration, category) in services {
        sqlx::query(
            r#"INSERT INTO services (id, name, description, price_cents, duration_minutes, category, active, created_at)
               VALUES (?, ?, ?, ?, ?, ?, 1, ?)
               ON CONFLICT(name) DO NOTHING"#,
        )
        .bind(new_id())
        .bind(name)
        .bind(description)
        .bind(price_cents)
        .bind(duration)
        .bind(category)
        .bind(now())
        .execute(pool)
        .await?;
    }
    Ok(())
}

async fn seed_mechanic(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let mechanic_seed = env::var("SEED_MECHANIC").unwrap_or_else(|_| "false".to_string());
    if mechanic_seed != "true" {
        return Ok(());
    }

    let exists = sqlx::query_scalar::<_, String>("SELECT id FROM mechanics LIMIT 1")
        .fetch_optional(pool)
        .await?;
    if exists.is_some() {
        return Ok(());
    }

    let username = env::var("MECHANIC_USER").unwrap_or_else(|_| "mecanico1".to_string());
    let password = env::var("MECHANIC_PASSWORD").unwrap_or_else(|_| "change-me".to_string());
    if password == "change-me" {
        log::warn!("MECHANIC_PASSWORD not set. Using default password 'change-me'. Set MECHANIC_PASSWORD in production.");
    }
    let password_hash = hash_password(&password)
        .map_err(|_| sqlx::Error::Protocol("password hash failed".into()))?;
    let user_id = new_id();

    let mut tx = pool.begin().await?;
    sqlx::query(
        r#"INSERT INTO users (id, username, display_name, password_hash, is_staff, is_superuser, active, created_at)
           VALUES (?, ?, ?, ?, 0, 0, 1, ?)"#,
    )
    .bind(&user_id)
    .bind(&username)
    .bind("Mecânico")
    .bind(password_hash)
    .bind(now())
    .execute(&mut *tx)
    .await?;
    sqlx::query(
        r#"INSERT INTO mechanics (id, user_id, full_name, specialty, phone, availability)
           VALUES (?, ?, ?, ?, ?, ?)"#,
    )
    .bind(new_id())
    .bind(&user_id)
    .bind("Mecânico")
    .bind("Geral")
    .bind("(00) 00000-0000")
    .bind("Segunda a Sexta 8h-17h")
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(())
}

/// Fresh in-memory database with migrations applied. One connection only, so
/// every query sees the same database.
#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    use sqlx::sqlite::SqlitePoolOptions;

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory database");
    run_migrations(&pool).await.expect("migrations");
    pool
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_dir_is_skipped_for_memory_databases() {
        assert!(ensure_sqlite_dir("sqlite::memory:").is_ok());
        assert!(ensure_sqlite_dir("postgres://localhost/db").is_ok());
    }

    #[actix_web::test]
    async fn seeding_is_idempotent() {
        let pool = test_pool().await;
        seed_defaults(&pool).await.unwrap();
        seed_defaults(&pool).await.unwrap();

        let admins: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM administrators")
            .fetch_one(&pool)
            .await
            .unwrap();
        let services: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM services")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(admins, 1);
        assert_eq!(services, 5);
    }

    #[actix_web::test]
    async fn activities_are_recorded() {
        let pool = test_pool().await;
        log_activity(&pool, "test", "Something happened.", None, None).await;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM activities WHERE kind = 'test'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
