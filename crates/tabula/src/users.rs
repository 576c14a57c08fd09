use rusqlite::OptionalExtension;

use crate::auth::hash_password;
use crate::db::{Db, fmt_ts, now, user_from_row};
use crate::error::TabulaError;
use crate::id::{USER_PREFIX, next_id};
use crate::types::{NewUser, User};

impl Db {
    /// Inserts a validated user with a hashed credential.
    pub fn add_user(&self, new: &NewUser) -> Result<User, TabulaError> {
        crate::validate::new_user(new)?;
        let password_hash = hash_password(&new.password, self.config.bcrypt_cost)?;
        self.insert_user(new, password_hash)
    }

    /// Stores an already validated user whose password was hashed by the caller.
    pub fn insert_user(&self, new: &NewUser, password_hash: String) -> Result<User, TabulaError> {
        let email = new.email.trim();
        if self.find_user_by_email(email)?.is_some() {
            return Err(TabulaError::UserExists(email.to_string()));
        }

        let ids: Vec<String> = self
            .conn
            .prepare("SELECT id FROM users")?
            .query_map([], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        let id = next_id(USER_PREFIX, ids.iter().map(String::as_str));

        self.conn
            .execute(
                "INSERT INTO users (id, first_name, last_name, email, password_hash, role, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    id,
                    new.first_name.trim(),
                    new.last_name.trim(),
                    email,
                    password_hash,
                    new.role.as_str(),
                    fmt_ts(now()),
                ],
            )
            .map_err(|e| TabulaError::Internal(format!("failed to create user: {e}")))?;

        tracing::info!(%id, %email, role = new.role.as_str(), "user created");
        self.get_user(&id)
    }

    pub fn get_user(&self, id: &str) -> Result<User, TabulaError> {
        self.conn
            .query_row(
                "SELECT * FROM users WHERE id = ?1",
                rusqlite::params![id],
                user_from_row,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => TabulaError::UserNotFound(id.to_string()),
                other => TabulaError::Internal(format!("failed to get user: {other}")),
            })
    }

    /// Case-insensitive lookup.
    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>, TabulaError> {
        let user = self
            .conn
            .query_row(
                "SELECT * FROM users WHERE lower(email) = lower(?1)",
                rusqlite::params![email.trim()],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn list_users(&self) -> Result<Vec<User>, TabulaError> {
        let mut stmt = self.conn.prepare("SELECT * FROM users ORDER BY rowid")?;
        let users = stmt
            .query_map([], user_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use crate::db::test_support::*;
    use crate::error::TabulaError;
    use crate::types::Role;

    #[test]
    fn ids_are_sequential() {
        let (db, _dir) = open_temp_db();
        let a = add(&db, "Ada", Role::Admin);
        let b = add(&db, "Bob", Role::User);
        assert_eq!(a.id, "USR-001");
        assert_eq!(b.id, "USR-002");
    }

    #[test]
    fn email_unique_ignoring_case() {
        let (db, _dir) = open_temp_db();
        db.add_user(&new_user("Ada", "ada@example.com", Role::User))
            .unwrap();
        let err = db
            .add_user(&new_user("Ada", "ADA@Example.com", Role::User))
            .unwrap_err();
        assert!(matches!(err, TabulaError::UserExists(_)));
        assert_eq!(err.to_string(), "User already exists!");
    }

    #[test]
    fn find_by_email_ignores_case() {
        let (db, _dir) = open_temp_db();
        let ada = add(&db, "Ada", Role::User);
        let found = db.find_user_by_email("ADA@EXAMPLE.COM").unwrap().unwrap();
        assert_eq!(found.id, ada.id);
        assert!(db.find_user_by_email("nobody@example.com").unwrap().is_none());
    }

    #[test]
    fn credential_is_hashed() {
        let (db, _dir) = open_temp_db();
        let ada = add(&db, "Ada", Role::User);
        assert_ne!(ada.password_hash, "password1");
        assert!(ada.password_hash.starts_with("$2"));
    }

    #[test]
    fn missing_user() {
        let (db, _dir) = open_temp_db();
        assert!(matches!(
            db.get_user("USR-404"),
            Err(TabulaError::UserNotFound(id)) if id == "USR-404"
        ));
    }

    #[test]
    fn list_keeps_insertion_order() {
        let (db, _dir) = open_temp_db();
        add(&db, "Ada", Role::Admin);
        add(&db, "Bob", Role::User);
        add(&db, "Cy", Role::User);
        let names: Vec<String> = db
            .list_users()
            .unwrap()
            .into_iter()
            .map(|u| u.first_name)
            .collect();
        assert_eq!(names, ["Ada", "Bob", "Cy"]);
    }
}
