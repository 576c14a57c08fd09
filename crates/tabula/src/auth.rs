use chrono::{DateTime, Duration, Utc};
use rusqlite::OptionalExtension;

use crate::db::{Db, fmt_ts, now};
use crate::error::TabulaError;
use crate::id::session_token;
use crate::types::{AuthSession, NewUser, User};

pub fn hash_password(password: &str, cost: u32) -> Result<String, TabulaError> {
    bcrypt::hash(password, cost)
        .map_err(|e| TabulaError::Internal(format!("failed to hash password: {e}")))
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, TabulaError> {
    bcrypt::verify(password, hash)
        .map_err(|e| TabulaError::Internal(format!("failed to verify password: {e}")))
}

/// Checks `password` against the user found for `email`. Runs bcrypt, so the
/// daemon calls it without holding the store.
pub fn check_credentials(
    email: &str,
    user: Option<User>,
    password: &str,
) -> Result<User, TabulaError> {
    let Some(user) = user else {
        tracing::warn!(email, "login for unknown email");
        return Err(TabulaError::InvalidCredentials);
    };
    if !verify_password(password, &user.password_hash)? {
        tracing::warn!(id = %user.id, "login with wrong password");
        return Err(TabulaError::InvalidCredentials);
    }
    Ok(user)
}

impl Db {
    /// Registers a user and logs them in.
    pub fn signup(&self, new: &NewUser) -> Result<AuthSession, TabulaError> {
        let user = self.add_user(new)?;
        self.open_session(user)
    }

    pub fn login(&self, email: &str, password: &str) -> Result<AuthSession, TabulaError> {
        let user = check_credentials(email, self.find_user_by_email(email)?, password)?;
        self.open_session(user)
    }

    pub fn logout(&self, token: &str) -> Result<(), TabulaError> {
        let removed = self.conn.execute(
            "DELETE FROM sessions WHERE token = ?1",
            rusqlite::params![token],
        )?;
        tracing::debug!(removed, "session closed");
        Ok(())
    }

    /// Resolves a session token to its user. Expired sessions are removed.
    pub fn authenticate(&self, token: &str) -> Result<User, TabulaError> {
        let session: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT user_id, expires_at FROM sessions WHERE token = ?1",
                rusqlite::params![token],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((user_id, expires_at)) = session else {
            return Err(TabulaError::InvalidSession);
        };

        let expires_at: DateTime<Utc> = expires_at
            .parse()
            .map_err(|e| TabulaError::Internal(format!("bad session expiry: {e}")))?;
        if expires_at <= now() {
            self.logout(token)?;
            return Err(TabulaError::InvalidSession);
        }

        match self.get_user(&user_id) {
            Ok(user) => Ok(user),
            Err(TabulaError::UserNotFound(_)) => Err(TabulaError::InvalidSession),
            Err(other) => Err(other),
        }
    }

    pub fn open_session(&self, user: User) -> Result<AuthSession, TabulaError> {
        let token = session_token();
        let created = now();
        let expires = Duration::try_hours(self.config.session_ttl_hours)
            .and_then(|ttl| created.checked_add_signed(ttl))
            .ok_or_else(|| TabulaError::Internal("session lifetime out of range".to_string()))?;

        self.conn
            .execute(
                "INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![token, user.id, fmt_ts(created), fmt_ts(expires)],
            )
            .map_err(|e| TabulaError::Internal(format!("failed to create session: {e}")))?;

        tracing::info!(id = %user.id, "session opened");
        Ok(AuthSession { token, user })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::test_support::*;
    use crate::types::Role;

    #[test]
    fn signup_then_authenticate() {
        let (db, _dir) = open_temp_db();
        let session = db
            .signup(&new_user("Ada", "ada@example.com", Role::User))
            .unwrap();
        let user = db.authenticate(&session.token).unwrap();
        assert_eq!(user.id, session.user.id);
        assert_eq!(user.email, "ada@example.com");
    }

    #[test]
    fn signup_validates() {
        let (db, _dir) = open_temp_db();
        let mut new = new_user("Ada", "ada@example.com", Role::User);
        new.confirm_password = "different".into();
        let err = db.signup(&new).unwrap_err();
        assert_eq!(err.to_string(), "Passwords do not match.");
        assert!(db.list_users().unwrap().is_empty());
    }

    #[test]
    fn duplicate_signup_rejected() {
        let (db, _dir) = open_temp_db();
        db.signup(&new_user("Ada", "ada@example.com", Role::User))
            .unwrap();
        let err = db
            .signup(&new_user("Ada", "ada@example.com", Role::User))
            .unwrap_err();
        assert!(matches!(err, TabulaError::UserExists(_)));
    }

    #[test]
    fn login_checks_password() {
        let (db, _dir) = open_temp_db();
        add(&db, "Ada", Role::User);

        let session = db.login("ada@example.com", "password1").unwrap();
        assert_eq!(session.user.first_name, "Ada");

        assert!(matches!(
            db.login("ada@example.com", "wrong-pass"),
            Err(TabulaError::InvalidCredentials)
        ));
        assert!(matches!(
            db.login("nobody@example.com", "password1"),
            Err(TabulaError::InvalidCredentials)
        ));
    }

    #[test]
    fn logout_invalidates_token() {
        let (db, _dir) = open_temp_db();
        add(&db, "Ada", Role::User);
        let session = db.login("ada@example.com", "password1").unwrap();
        db.logout(&session.token).unwrap();
        assert!(matches!(
            db.authenticate(&session.token),
            Err(TabulaError::InvalidSession)
        ));
        // second logout is a no-op
        db.logout(&session.token).unwrap();
    }

    #[test]
    fn expired_session_rejected_and_removed() {
        let (db, _dir) = open_temp_db();
        let ada = add(&db, "Ada", Role::User);
        let past = fmt_ts(now() - Duration::hours(1));
        db.conn
            .execute(
                "INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES ('stale', ?1, ?2, ?2)",
                rusqlite::params![ada.id, past],
            )
            .unwrap();

        assert!(matches!(
            db.authenticate("stale"),
            Err(TabulaError::InvalidSession)
        ));
        let left: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))
            .unwrap();
        assert_eq!(left, 0);
    }

    #[test]
    fn oversized_ttl_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = Config {
            session_ttl_hours: i64::MAX,
            ..test_config()
        };
        let db = Db::open_with(dir.path(), config).unwrap();
        add(&db, "Ada", Role::User);
        assert!(matches!(
            db.login("ada@example.com", "password1"),
            Err(TabulaError::Internal(_))
        ));
    }

    #[test]
    fn unknown_token_rejected() {
        let (db, _dir) = open_temp_db();
        assert!(matches!(
            db.authenticate("nope"),
            Err(TabulaError::InvalidSession)
        ));
    }
}
