use serde::Deserialize;
use sqlx::{SqliteConnection, SqlitePool};

use crate::{
    auth::{hash_password, new_id, AuthUser, Role},
    catalog::is_unique_violation,
    db,
    error::ShopError,
    input::non_empty,
    models::{ClientRow, MechanicRow},
};

const MIN_PASSWORD_LEN: usize = 6;
const PLACEHOLDER_PHONE: &str = "(00) 00000-0000";
const PLACEHOLDER_ADDRESS: &str = "Endereço não informado";

const CLIENT_SELECT: &str = r#"SELECT c.id, c.user_id, u.username, c.full_name, c.email, c.cpf, c.phone, c.address
FROM clients c
JOIN users u ON c.user_id = u.id"#;

const MECHANIC_SELECT: &str = r#"SELECT m.id, m.user_id, u.username, m.full_name, m.specialty, m.phone, m.availability
FROM mechanics m
JOIN users u ON m.user_id = u.id"#;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientRegistration {
    pub full_name: String,
    pub username: String,
    pub email: String,
    pub phone: String,
    pub cpf: String,
    pub address: String,
    pub password1: String,
    pub password2: String,
}

impl ClientRegistration {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.full_name.trim().is_empty() {
            errors.push("Full name is required.".to_string());
        }
        if self.username.trim().is_empty() {
            errors.push("Username is required.".to_string());
        }
        if !looks_like_email(&self.email) {
            errors.push("A valid e-mail is required.".to_string());
        }
        if self.phone.trim().is_empty() {
            errors.push("Phone number is required.".to_string());
        }
        if self.cpf.trim().is_empty() {
            errors.push("CPF is required.".to_string());
        }
        if self.address.trim().is_empty() {
            errors.push("Address is required.".to_string());
        }
        check_passwords(&self.password1, &self.password2, &mut errors);
        errors
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientUpdate {
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub cpf: Option<String>,
    pub address: Option<String>,
    pub new_password: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MechanicRegistration {
    pub full_name: String,
    pub username: String,
    pub specialty: String,
    pub phone: String,
    pub availability: String,
    pub password1: String,
    pub password2: String,
}

impl MechanicRegistration {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.full_name.trim().is_empty() {
            errors.push("Full name is required.".to_string());
        }
        if self.username.trim().is_empty() {
            errors.push("Username is required.".to_string());
        }
        if self.specialty.trim().is_empty() {
            errors.push("Specialty is required.".to_string());
        }
        if self.phone.trim().is_empty() {
            errors.push("Phone number is required.".to_string());
        }
        check_passwords(&self.password1, &self.password2, &mut errors);
        errors
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MechanicUpdate {
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub specialty: Option<String>,
    pub phone: Option<String>,
    pub availability: Option<String>,
    pub new_password: Option<String>,
}

fn looks_like_email(value: &str) -> bool {
    let value = value.trim();
    match value.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    }
}

fn check_passwords(password: &str, confirmation: &str, errors: &mut Vec<String>) {
    if password.len() < MIN_PASSWORD_LEN {
        errors.push(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters."
        ));
    }
    if password != confirmation {
        errors.push("Passwords do not match.".to_string());
    }
}

async fn username_taken(pool: &SqlitePool, username: &str, except_user: Option<&str>) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE username = ? AND id != ?)")
        .bind(username)
        .bind(except_user.unwrap_or_default())
        .fetch_one(pool)
        .await
}

async fn client_field_taken(
    pool: &SqlitePool,
    column: &str,
    value: &str,
    except_client: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let query = match column {
        "email" => "SELECT EXISTS(SELECT 1 FROM clients WHERE email = ? AND id != ?)",
        _ => "SELECT EXISTS(SELECT 1 FROM clients WHERE cpf = ? AND id != ?)",
    };
    sqlx::query_scalar::<_, bool>(query)
        .bind(value)
        .bind(except_client.unwrap_or_default())
        .fetch_one(pool)
        .await
}

async fn insert_user(
    conn: &mut SqliteConnection,
    username: &str,
    display_name: &str,
    password: &str,
) -> Result<String, ShopError> {
    let password_hash = hash_password(password).map_err(|err| {
        log::error!("Password hashing failed: {err}");
        ShopError::Validation("Could not process the password.".to_string())
    })?;
    let user_id = new_id();
    sqlx::query(
        r#"INSERT INTO users (id, username, display_name, password_hash, is_staff, is_superuser, active, created_at)
           VALUES (?, ?, ?, ?, 0, 0, 1, ?)"#,
    )
    .bind(&user_id)
    .bind(username)
    .bind(display_name)
    .bind(password_hash)
    .bind(db::now())
    .execute(conn)
    .await?;
    Ok(user_id)
}

async fn update_user(
    conn: &mut SqliteConnection,
    user_id: &str,
    username: Option<&str>,
    display_name: Option<&str>,
    new_password: Option<&str>,
) -> Result<(), ShopError> {
    if let Some(username) = username {
        sqlx::query("UPDATE users SET username = ? WHERE id = ?")
            .bind(username)
            .bind(user_id)
            .execute(&mut *conn)
            .await?;
    }
    if let Some(display_name) = display_name {
        sqlx::query("UPDATE users SET display_name = ? WHERE id = ?")
            .bind(display_name)
            .bind(user_id)
            .execute(&mut *conn)
            .await?;
    }
    if let Some(password) = new_password {
        let password_hash = hash_password(password).map_err(|err| {
            log::error!("Password hashing failed: {err}");
            ShopError::Validation("Could not process the password.".to_string())
        })?;
        sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
            .bind(password_hash)
            .bind(user_id)
            .execute(&mut *conn)
            .await?;
        // A changed password ends every open session of that user.
        sqlx::query("DELETE FROM sessions WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

fn conflict_or_store(err: sqlx::Error) -> ShopError {
    if is_unique_violation(&err) {
        ShopError::Conflict("Username, e-mail or CPF already registered.".to_string())
    } else {
        err.into()
    }
}

/// Creates the user and client profile together. Returns the client id.
pub async fn register_client(pool: &SqlitePool, registration: &ClientRegistration) -> Result<String, ShopError> {
    let mut errors = registration.validate();
    let username = registration.username.trim();
    let email = registration.email.trim();
    let cpf = registration.cpf.trim();

    if !username.is_empty() && username_taken(pool, username, None).await? {
        errors.push("This username is already taken.".to_string());
    }
    if !email.is_empty() && client_field_taken(pool, "email", email, None).await? {
        errors.push("This e-mail is already registered.".to_string());
    }
    if !cpf.is_empty() && client_field_taken(pool, "cpf", cpf, None).await? {
        errors.push("This CPF is already registered.".to_string());
    }
    if !errors.is_empty() {
        return Err(ShopError::Invalid(errors));
    }

    let full_name = registration.full_name.trim();
    let client_id = new_id();
    let mut tx = pool.begin().await?;
    let user_id = insert_user(&mut tx, username, full_name, &registration.password1).await?;
    sqlx::query(
        r#"INSERT INTO clients (id, user_id, full_name, email, cpf, phone, address)
           VALUES (?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&client_id)
    .bind(&user_id)
    .bind(full_name)
    .bind(email)
    .bind(cpf)
    .bind(registration.phone.trim())
    .bind(registration.address.trim())
    .execute(&mut *tx)
    .await
    .map_err(conflict_or_store)?;
    tx.commit().await.map_err(conflict_or_store)?;

    log::info!("Registered client '{username}'.");
    Ok(client_id)
}

/// Client profile of a signed-in user, created with placeholder contact data
/// when the user has none yet.
pub async fn ensure_client_profile(pool: &SqlitePool, user: &AuthUser) -> Result<String, sqlx::Error> {
    if let Some(client) = client_for_user(pool, &user.id).await? {
        return Ok(client.id);
    }

    let inserted = sqlx::query(
        r#"INSERT INTO clients (id, user_id, full_name, email, cpf, phone, address)
           VALUES (?, ?, ?, NULL, NULL, ?, ?)
           ON CONFLICT(user_id) DO NOTHING"#,
    )
    .bind(new_id())
    .bind(&user.id)
    .bind(&user.display_name)
    .bind(PLACEHOLDER_PHONE)
    .bind(PLACEHOLDER_ADDRESS)
    .execute(pool)
    .await?
    .rows_affected();

    if inserted > 0 {
        log::warn!(
            "Created placeholder client profile for '{}'.",
            user.username
        );
    }

    sqlx::query_scalar::<_, String>("SELECT id FROM clients WHERE user_id = ?")
        .bind(&user.id)
        .fetch_one(pool)
        .await
}

pub async fn client_for_user(pool: &SqlitePool, user_id: &str) -> Result<Option<ClientRow>, sqlx::Error> {
    sqlx::query_as::<_, ClientRow>(&format!("{CLIENT_SELECT} WHERE c.user_id = ?"))
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

pub async fn get_client(pool: &SqlitePool, client_id: &str) -> Result<Option<ClientRow>, sqlx::Error> {
    sqlx::query_as::<_, ClientRow>(&format!("{CLIENT_SELECT} WHERE c.id = ?"))
        .bind(client_id)
        .fetch_optional(pool)
        .await
}

pub async fn list_clients(pool: &SqlitePool) -> Result<Vec<ClientRow>, sqlx::Error> {
    sqlx::query_as::<_, ClientRow>(&format!("{CLIENT_SELECT} ORDER BY c.full_name"))
        .fetch_all(pool)
        .await
}

/// Applies the provided fields; blank fields keep their current value.
pub async fn update_client(pool: &SqlitePool, client_id: &str, changes: &ClientUpdate) -> Result<(), ShopError> {
    let current = get_client(pool, client_id)
        .await?
        .ok_or(ShopError::NotFound("client"))?;

    let username = non_empty(changes.username.as_deref());
    let email = non_empty(changes.email.as_deref());
    let cpf = non_empty(changes.cpf.as_deref());
    let new_password = non_empty(changes.new_password.as_deref());

    let mut errors = Vec::new();
    if let Some(username) = &username {
        if username_taken(pool, username, Some(&current.user_id)).await? {
            errors.push("This username is already taken.".to_string());
        }
    }
    if let Some(email) = &email {
        if !looks_like_email(email) {
            errors.push("A valid e-mail is required.".to_string());
        } else if client_field_taken(pool, "email", email, Some(client_id)).await? {
            errors.push("This e-mail is already registered.".to_string());
        }
    }
    if let Some(cpf) = &cpf {
        if client_field_taken(pool, "cpf", cpf, Some(client_id)).await? {
            errors.push("This CPF is already registered.".to_string());
        }
    }
    if let Some(password) = &new_password {
        if password.len() < MIN_PASSWORD_LEN {
            errors.push(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters."
            ));
        }
    }
    if !errors.is_empty() {
        return Err(ShopError::Invalid(errors));
    }

    let full_name = non_empty(changes.full_name.as_deref());
    let mut tx = pool.begin().await?;
    update_user(
        &mut tx,
        &current.user_id,
        username.as_deref(),
        full_name.as_deref(),
        new_password.as_deref(),
    )
    .await
    .map_err(|err| match err {
        ShopError::Store(err) => conflict_or_store(err),
        other => other,
    })?;
    sqlx::query(
        r#"UPDATE clients
           SET full_name = ?, email = ?, cpf = ?, phone = ?, address = ?
           WHERE id = ?"#,
    )
    .bind(full_name.unwrap_or(current.full_name))
    .bind(email.or(current.email))
    .bind(cpf.or(current.cpf))
    .bind(non_empty(changes.phone.as_deref()).unwrap_or(current.phone))
    .bind(non_empty(changes.address.as_deref()).unwrap_or(current.address))
    .bind(client_id)
    .execute(&mut *tx)
    .await
    .map_err(conflict_or_store)?;
    tx.commit().await?;
    Ok(())
}

/// Deletes the client profile and its motorcycles. Refused while appointments
/// reference the client.
pub async fn delete_client(pool: &SqlitePool, client_id: &str) -> Result<ClientRow, ShopError> {
    let client = get_client(pool, client_id)
        .await?
        .ok_or(ShopError::NotFound("client"))?;

    let mut tx = pool.begin().await?;
    let deleted = sqlx::query(
        r#"DELETE FROM clients
           WHERE id = ?1
             AND NOT EXISTS (SELECT 1 FROM appointments WHERE client_id = ?1)"#,
    )
    .bind(client_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if deleted == 0 {
        tx.rollback().await?;
        return Err(ShopError::Conflict(format!(
            "{} has appointments and cannot be deleted.",
            client.full_name
        )));
    }
    drop_user_if_unused(&mut tx, &client.user_id, Role::Client).await?;
    tx.commit().await?;
    Ok(client)
}

/// Removes a user whose last profile was just deleted. A user that still
/// holds another profile or a staff flag is kept and only loses the sessions
/// of the removed role.
async fn drop_user_if_unused(conn: &mut SqliteConnection, user_id: &str, role: Role) -> Result<(), sqlx::Error> {
    let removed = sqlx::query(
        r#"DELETE FROM users
           WHERE id = ?1 AND is_staff = 0 AND is_superuser = 0
             AND NOT EXISTS (SELECT 1 FROM administrators WHERE user_id = ?1)
             AND NOT EXISTS (SELECT 1 FROM clients WHERE user_id = ?1)
             AND NOT EXISTS (SELECT 1 FROM mechanics WHERE user_id = ?1)"#,
    )
    .bind(user_id)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if removed == 0 {
        sqlx::query("DELETE FROM sessions WHERE user_id = ? AND role = ?")
            .bind(user_id)
            .bind(role.as_str())
            .execute(&mut *conn)
            .await?;
        log::info!("Kept user {user_id}: it still holds another profile.");
    }
    Ok(())
}

/// Creates the user and mechanic profile together. Returns the mechanic id.
pub async fn register_mechanic(pool: &SqlitePool, registration: &MechanicRegistration) -> Result<String, ShopError> {
    let mut errors = registration.validate();
    let username = registration.username.trim();
    if !username.is_empty() && username_taken(pool, username, None).await? {
        errors.push("This username is already taken.".to_string());
    }
    if !errors.is_empty() {
        return Err(ShopError::Invalid(errors));
    }

    let full_name = registration.full_name.trim();
    let mechanic_id = new_id();
    let mut tx = pool.begin().await?;
    let user_id = insert_user(&mut tx, username, full_name, &registration.password1)
        .await
        .map_err(|err| match err {
            ShopError::Store(err) => conflict_or_store(err),
            other => other,
        })?;
    sqlx::query(
        r#"INSERT INTO mechanics (id, user_id, full_name, specialty, phone, availability)
           VALUES (?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&mechanic_id)
    .bind(&user_id)
    .bind(full_name)
    .bind(registration.specialty.trim())
    .bind(registration.phone.trim())
    .bind(registration.availability.trim())
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    log::info!("Registered mechanic '{username}'.");
    Ok(mechanic_id)
}

pub async fn mechanic_for_user(pool: &SqlitePool, user_id: &str) -> Result<Option<MechanicRow>, sqlx::Error> {
    sqlx::query_as::<_, MechanicRow>(&format!("{MECHANIC_SELECT} WHERE m.user_id = ?"))
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

pub async fn get_mechanic(pool: &SqlitePool, mechanic_id: &str) -> Result<Option<MechanicRow>, sqlx::Error> {
    sqlx::query_as::<_, MechanicRow>(&format!("{MECHANIC_SELECT} WHERE m.id = ?"))
        .bind(mechanic_id)
        .fetch_optional(pool)
        .await
}

pub async fn list_mechanics(pool: &SqlitePool) -> Result<Vec<MechanicRow>, sqlx::Error> {
    sqlx::query_as::<_, MechanicRow>(&format!("{MECHANIC_SELECT} ORDER BY m.full_name"))
        .fetch_all(pool)
        .await
}

pub async fn update_mechanic(pool: &SqlitePool, mechanic_id: &str, changes: &MechanicUpdate) -> Result<(), ShopError> {
    let current = get_mechanic(pool, mechanic_id)
        .await?
        .ok_or(ShopError::NotFound("mechanic"))?;

    let username = non_empty(changes.username.as_deref());
    let new_password = non_empty(changes.new_password.as_deref());
    let mut errors = Vec::new();
    if let Some(username) = &username {
        if username_taken(pool, username, Some(&current.user_id)).await? {
            errors.push("This username is already taken.".to_string());
        }
    }
    if let Some(password) = &new_password {
        if password.len() < MIN_PASSWORD_LEN {
            errors.push(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters."
            ));
        }
    }
    if !errors.is_empty() {
        return Err(ShopError::Invalid(errors));
    }

    let full_name = non_empty(changes.full_name.as_deref());
    let mut tx = pool.begin().await?;
    update_user(
        &mut tx,
        &current.user_id,
        username.as_deref(),
        full_name.as_deref(),
        new_password.as_deref(),
    )
    .await
    .map_err(|err| match err {
        ShopError::Store(err) => conflict_or_store(err),
        other => other,
    })?;
    sqlx::query(
        r#"UPDATE mechanics
           SET full_name = ?, specialty = ?, phone = ?, availability = ?
           WHERE id = ?"#,
    )
    .bind(full_name.unwrap_or(current.full_name))
    .bind(non_empty(changes.specialty.as_deref()).unwrap_or(current.specialty))
    .bind(non_empty(changes.phone.as_deref()).unwrap_or(current.phone))
    .bind(non_empty(changes.availability.as_deref()).unwrap_or(current.availability))
    .bind(mechanic_id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(())
}

/// Deletes the mechanic profile. Refused while appointments reference the
/// mechanic.
pub async fn delete_mechanic(pool: &SqlitePool, mechanic_id: &str) -> Result<MechanicRow, ShopError> {
    let mechanic = get_mechanic(pool, mechanic_id)
        .await?
        .ok_or(ShopError::NotFound("mechanic"))?;

    let mut tx = pool.begin().await?;
    let deleted = sqlx::query(
        r#"DELETE FROM mechanics
           WHERE id = ?1
             AND NOT EXISTS (SELECT 1 FROM appointments WHERE mechanic_id = ?1)"#,
    )
    .bind(mechanic_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if deleted == 0 {
        tx.rollback().await?;
        return Err(ShopError::Conflict(format!(
            "{} has appointments and cannot be deleted.",
            mechanic.full_name
        )));
    }
    drop_user_if_unused(&mut tx, &mechanic.user_id, Role::Mechanic).await?;
    tx.commit().await?;
    Ok(mechanic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{auth, db::test_pool};

    fn registration(username: &str, email: &str, cpf: &str) -> ClientRegistration {
        ClientRegistration {
            full_name: "Ana Souza".into(),
            username: username.into(),
            email: email.into(),
            phone: "(11) 99999-0000".into(),
            cpf: cpf.into(),
            address: "Rua das Flores, 10".into(),
            password1: "segredo1".into(),
            password2: "segredo1".into(),
        }
    }

    fn mechanic(username: &str) -> MechanicRegistration {
        MechanicRegistration {
            full_name: "João Lima".into(),
            username: username.into(),
            specialty: "Motor".into(),
            phone: "(11) 98888-0000".into(),
            availability: "Seg a Sex".into(),
            password1: "segredo1".into(),
            password2: "segredo1".into(),
        }
    }

    #[test]
    fn registration_lists_every_problem() {
        let errors = ClientRegistration {
            password1: "abc".into(),
            password2: "abd".into(),
            ..ClientRegistration::default()
        }
        .validate();
        assert!(errors.contains(&"Passwords do not match.".to_string()));
        assert!(errors.contains(&"A valid e-mail is required.".to_string()));
        assert_eq!(errors.len(), 8);
        assert!(registration("ana", "ana@example.com", "1").validate().is_empty());
    }

    #[actix_web::test]
    async fn registered_client_signs_in_as_client() {
        let pool = test_pool().await;
        register_client(&pool, &registration("ana", "ana@example.com", "123"))
            .await
            .unwrap();

        let outcome = auth::login(&pool, "ana", "segredo1").await.unwrap();
        assert_eq!(outcome.user.role, auth::Role::Client);
        let client = client_for_user(&pool, &outcome.user.id).await.unwrap().unwrap();
        assert_eq!(client.full_name, "Ana Souza");
    }

    #[actix_web::test]
    async fn username_email_and_cpf_must_be_unique() {
        let pool = test_pool().await;
        register_client(&pool, &registration("ana", "ana@example.com", "123"))
            .await
            .unwrap();

        let err = register_client(&pool, &registration("ana", "ana@example.com", "123"))
            .await
            .unwrap_err();
        assert_eq!(err.messages().len(), 3);
    }

    #[actix_web::test]
    async fn profile_is_provisioned_once() {
        let pool = test_pool().await;
        let user_id = auth::testing::insert_user(&pool, "walkin", "segredo1", false).await;
        let user = AuthUser {
            id: user_id,
            username: "walkin".into(),
            display_name: "Walk In".into(),
            role: auth::Role::Client,
            session: String::new(),
        };

        let first = ensure_client_profile(&pool, &user).await.unwrap();
        let second = ensure_client_profile(&pool, &user).await.unwrap();
        assert_eq!(first, second);
        let client = get_client(&pool, &first).await.unwrap().unwrap();
        assert_eq!(client.phone, PLACEHOLDER_PHONE);
        assert_eq!(client.email, None);
    }

    #[actix_web::test]
    async fn client_update_keeps_blank_fields_and_changes_password() {
        let pool = test_pool().await;
        let id = register_client(&pool, &registration("ana", "ana@example.com", "123"))
            .await
            .unwrap();

        update_client(
            &pool,
            &id,
            &ClientUpdate {
                phone: Some("(21) 3333-4444".into()),
                email: Some(" ".into()),
                new_password: Some("novasenha".into()),
                ..ClientUpdate::default()
            },
        )
        .await
        .unwrap();

        let client = get_client(&pool, &id).await.unwrap().unwrap();
        assert_eq!(client.phone, "(21) 3333-4444");
        assert_eq!(client.email.as_deref(), Some("ana@example.com"));
        assert!(auth::login(&pool, "ana", "segredo1").await.is_err());
        assert!(auth::login(&pool, "ana", "novasenha").await.is_ok());
    }

    #[actix_web::test]
    async fn client_without_appointments_is_deleted_with_user() {
        let pool = test_pool().await;
        let id = register_client(&pool, &registration("ana", "ana@example.com", "123"))
            .await
            .unwrap();

        delete_client(&pool, &id).await.unwrap();
        assert!(get_client(&pool, &id).await.unwrap().is_none());
        assert!(!username_taken(&pool, "ana", None).await.unwrap());
    }

    #[actix_web::test]
    async fn profiles_with_appointments_are_kept() {
        let pool = test_pool().await;
        let client = register_client(&pool, &registration("ana", "ana@example.com", "123"))
            .await
            .unwrap();
        let mechanic = register_mechanic(&pool, &mechanic("joao")).await.unwrap();
        let service = crate::catalog::testing::insert_service(&pool, "Freios").await;
        let mut conn = pool.acquire().await.unwrap();
        let moto = crate::catalog::get_or_create_motorcycle(&mut conn, &client, "Honda", "CG", 2019)
            .await
            .unwrap();
        drop(conn);
        sqlx::query(
            r#"INSERT INTO appointments (id, client_id, mechanic_id, service_id, motorcycle_id, scheduled_for, status, created_at, updated_at)
               VALUES ('a1', ?, ?, ?, ?, '2026-10-19T13:00:00Z', 'in_progress', '', '')"#,
        )
        .bind(&client)
        .bind(&mechanic)
        .bind(&service)
        .bind(&moto)
        .execute(&pool)
        .await
        .unwrap();

        assert!(matches!(delete_client(&pool, &client).await, Err(ShopError::Conflict(_))));
        assert!(matches!(delete_mechanic(&pool, &mechanic).await, Err(ShopError::Conflict(_))));
        assert!(get_client(&pool, &client).await.unwrap().is_some());
        assert!(get_mechanic(&pool, &mechanic).await.unwrap().is_some());
    }

    #[actix_web::test]
    async fn deleting_one_profile_keeps_the_others() {
        let pool = test_pool().await;
        let mechanic = register_mechanic(&pool, &mechanic("joao")).await.unwrap();
        let row = get_mechanic(&pool, &mechanic).await.unwrap().unwrap();
        let user = AuthUser {
            id: row.user_id.clone(),
            username: "joao".into(),
            display_name: "João Lima".into(),
            role: Role::Client,
            session: String::new(),
        };
        let client = ensure_client_profile(&pool, &user).await.unwrap();
        auth::create_session(&pool, &row.user_id, Role::Client).await.unwrap();
        let mechanic_session = auth::create_session(&pool, &row.user_id, Role::Mechanic).await.unwrap();

        let other = register_client(&pool, &registration("ana", "ana@example.com", "123"))
            .await
            .unwrap();
        let service = crate::catalog::testing::insert_service(&pool, "Freios").await;
        let mut conn = pool.acquire().await.unwrap();
        let moto = crate::catalog::get_or_create_motorcycle(&mut conn, &other, "Honda", "CG", 2019)
            .await
            .unwrap();
        drop(conn);
        sqlx::query(
            r#"INSERT INTO appointments (id, client_id, mechanic_id, service_id, motorcycle_id, scheduled_for, status, created_at, updated_at)
               VALUES ('a1', ?, ?, ?, ?, '2026-10-19T13:00:00Z', 'in_progress', '', '')"#,
        )
        .bind(&other)
        .bind(&mechanic)
        .bind(&service)
        .bind(&moto)
        .execute(&pool)
        .await
        .unwrap();

        delete_client(&pool, &client).await.unwrap();
        assert!(get_client(&pool, &client).await.unwrap().is_none());
        assert!(get_mechanic(&pool, &mechanic).await.unwrap().is_some());
        assert!(username_taken(&pool, "joao", None).await.unwrap());

        let sessions: Vec<String> = sqlx::query_scalar("SELECT token FROM sessions WHERE user_id = ?")
            .bind(&row.user_id)
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(sessions, vec![mechanic_session]);

        assert!(matches!(delete_mechanic(&pool, &mechanic).await, Err(ShopError::Conflict(_))));
    }

    #[actix_web::test]
    async fn mechanic_registration_and_edit() {
        let pool = test_pool().await;
        let id = register_mechanic(&pool, &mechanic("joao")).await.unwrap();
        assert!(matches!(
            register_mechanic(&pool, &mechanic("joao")).await,
            Err(ShopError::Invalid(_))
        ));

        update_mechanic(
            &pool,
            &id,
            &MechanicUpdate {
                specialty: Some("Elétrica".into()),
                ..MechanicUpdate::default()
            },
        )
        .await
        .unwrap();
        let row = get_mechanic(&pool, &id).await.unwrap().unwrap();
        assert_eq!(row.specialty, "Elétrica");
        assert_eq!(row.username, "joao");

        let outcome = auth::login(&pool, "joao", "segredo1").await.unwrap();
        assert_eq!(outcome.user.role, auth::Role::Mechanic);
        assert_eq!(
            mechanic_for_user(&pool, &outcome.user.id).await.unwrap().map(|m| m.id),
            Some(id.clone())
        );

        delete_mechanic(&pool, &id).await.unwrap();
        assert!(list_mechanics(&pool).await.unwrap().is_empty());
    }
}
