use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use rand_core::OsRng;
use rusqlite::{Connection, OptionalExtension};
use tracing::info;
use uuid::Uuid;

use crate::models::{USER_COLUMNS, UserRow, now, user_from_row};
use crate::{Database, DbError, DbResult};

pub const MIN_PASSWORD_LEN: usize = 8;

pub struct NewUser {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: Option<String>,
    pub is_staff: bool,
}

impl NewUser {
    pub fn new(email: &str, password: &str, first_name: &str, last_name: &str) -> Self {
        Self {
            email: email.to_string(),
            password: password.to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            phone_number: None,
            is_staff: false,
        }
    }
}

/// Trim and lower-case the domain part; the local part is kept as given.
pub fn normalize_email(email: &str) -> DbResult<String> {
    let email = email.trim();
    if email.is_empty() {
        return Err(DbError::invalid("email", "must be set"));
    }

    match email.rsplit_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {
            Ok(format!("{}@{}", local, domain.to_lowercase()))
        }
        _ => Err(DbError::invalid("email", format!("'{}' is not an address", email))),
    }
}

pub fn hash_password(password: &str) -> DbResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| DbError::Password(e.to_string()))
}

pub fn verify_password(password: &str, hash: &str) -> DbResult<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| DbError::Password(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

impl Database {
    pub fn create_user(&self, new: &NewUser) -> DbResult<UserRow> {
        let email = normalize_email(&new.email)?;
        if new.first_name.trim().is_empty() || new.last_name.trim().is_empty() {
            return Err(DbError::invalid("name", "first and last name are required"));
        }
        if new.password.len() < MIN_PASSWORD_LEN {
            return Err(DbError::invalid(
                "password",
                format!("must be at least {} characters", MIN_PASSWORD_LEN),
            ));
        }
        let password = hash_password(&new.password)?;

        let user = self.with_tx(|tx| {
            if query_user_by_email(tx, &email)?.is_some() {
                return Err(DbError::duplicate("user", email.clone()));
            }
            if let Some(phone) = new.phone_number.as_deref() {
                let taken: Option<String> = tx
                    .query_row("SELECT id FROM users WHERE phone_number = ?1", [phone], |r| r.get(0))
                    .optional()?;
                if taken.is_some() {
                    return Err(DbError::duplicate("phone number", phone));
                }
            }

            let stamp = now();
            let user = UserRow {
                id: Uuid::new_v4().to_string(),
                email: email.clone(),
                password,
                first_name: new.first_name.trim().to_string(),
                last_name: new.last_name.trim().to_string(),
                phone_number: new.phone_number.clone(),
                is_active: true,
                is_staff: new.is_staff,
                created_at: stamp.clone(),
                updated_at: stamp,
            };

            tx.execute(
                "INSERT INTO users (id, email, password, first_name, last_name, phone_number,
                                    is_active, is_staff, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    user.id,
                    user.email,
                    user.password,
                    user.first_name,
                    user.last_name,
                    user.phone_number,
                    user.is_active,
                    user.is_staff,
                    user.created_at,
                    user.updated_at,
                ],
            )
            .map_err(|e| match DbError::from(e) {
                e if e.is_unique_violation() => DbError::duplicate("user", email.clone()),
                e => e,
            })?;
            Ok(user)
        })?;

        info!(user_id = %user.id, staff = user.is_staff, "User created");
        Ok(user)
    }

    /// Staff accounts are ordinary users with `is_staff` set.
    pub fn create_staff_user(&self, mut new: NewUser) -> DbResult<UserRow> {
        new.is_staff = true;
        self.create_user(&new)
    }

    /// True once any staff account exists.
    pub fn has_staff(&self) -> DbResult<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row("SELECT 1 FROM users WHERE is_staff = 1 LIMIT 1", [], |row| row.get(0))
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> DbResult<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    pub fn get_user_by_email(&self, email: &str) -> DbResult<Option<UserRow>> {
        let email = normalize_email(email)?;
        self.with_conn(|conn| query_user_by_email(conn, &email))
    }

    /// Returns the user when the password matches and the account is active.
    pub fn authenticate(&self, email: &str, password: &str) -> DbResult<Option<UserRow>> {
        let Some(user) = self.get_user_by_email(email)? else {
            return Ok(None);
        };
        if !user.is_active || !verify_password(password, &user.password)? {
            return Ok(None);
        }
        Ok(Some(user))
    }

    /// Returns false when no such user exists.
    pub fn deactivate_user(&self, id: &str) -> DbResult<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET is_active = 0, updated_at = ?2 WHERE id = ?1",
                (id, now()),
            )?;
            Ok(changed > 0)
        })
    }

    /// Delete a user. Registered user hooks run first, in the same
    /// transaction, so dependants are gone before the row itself.
    ///
    /// Returns false when no such user exists.
    pub fn delete_user(&self, id: &str) -> DbResult<bool> {
        let deleted = self.with_tx(|tx| {
            let Some(user) = query_user_by_id(tx, id)? else {
                return Ok(false);
            };

            self.hooks.user_deleted(tx, &user)?;
            tx.execute("DELETE FROM users WHERE id = ?1", [id])?;
            Ok(true)
        })?;

        if deleted {
            info!(user_id = id, "User deleted");
        }
        Ok(deleted)
    }
}

pub(crate) fn query_user_by_id(conn: &Connection, id: &str) -> DbResult<Option<UserRow>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], user_from_row).optional()?)
}

fn query_user_by_email(conn: &Connection, email: &str) -> DbResult<Option<UserRow>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1");
    Ok(conn.query_row(&sql, [email], user_from_row).optional()?)
}
