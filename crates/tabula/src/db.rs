use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::Connection;
use rusqlite::types::Type;
use tokio::sync::watch;

use crate::config::{Config, SeedUser};
use crate::error::TabulaError;
use crate::types::{ActivityLog, Change, Issue, NewUser, User};

pub struct Db {
    pub conn: Connection,
    pub data_dir: PathBuf,
    pub config: Config,
    revision: watch::Sender<u64>,
}

/// Parses a text column through `FromStr`, surfacing bad data as a conversion error.
fn column<T>(row: &rusqlite::Row, name: &str) -> Result<T, rusqlite::Error>
where
    T: FromStr,
    T::Err: Display,
{
    let raw: String = row.get(name)?;
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, Type::Text, format!("{name}: {e}").into())
    })
}

pub(crate) fn issue_from_row(row: &rusqlite::Row) -> Result<Issue, rusqlite::Error> {
    Ok(Issue {
        id: row.get("id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        state: column(row, "state")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
        due_date: column(row, "due_date")?,
        estimated_time: row.get("estimated_time")?,
        completed_time: row.get("completed_time")?,
        assigned_to: row.get("assigned_to")?,
        created_by: row.get("created_by")?,
    })
}

pub(crate) fn user_from_row(row: &rusqlite::Row) -> Result<User, rusqlite::Error> {
    Ok(User {
        id: row.get("id")?,
        first_name: row.get("first_name")?,
        last_name: row.get("last_name")?,
        email: row.get("email")?,
        password_hash: row.get("password_hash")?,
        role: column(row, "role")?,
        created_at: column(row, "created_at")?,
    })
}

pub(crate) fn log_from_row(row: &rusqlite::Row) -> Result<ActivityLog, rusqlite::Error> {
    let changes_json: String = row.get("changes")?;
    let changes: Vec<Change> = serde_json::from_str(&changes_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, Type::Text, format!("changes: {e}").into())
    })?;
    Ok(ActivityLog {
        id: row.get("id")?,
        issue_id: row.get("issue_id")?,
        user_id: row.get("user_id")?,
        user_name: row.get("user_name")?,
        action: column(row, "action")?,
        changes,
        timestamp: column(row, "timestamp")?,
    })
}

impl Db {
    /// Opens the store in `data_dir`, reading `config.toml` from the same directory.
    pub fn open(data_dir: &Path) -> Result<Db, TabulaError> {
        let config = Config::load(data_dir)?;
        Self::open_with(data_dir, config)
    }

    pub fn open_with(data_dir: &Path, config: Config) -> Result<Db, TabulaError> {
        fs::create_dir_all(data_dir).map_err(|e| {
            TabulaError::Internal(format!("failed to create {}: {e}", data_dir.display()))
        })?;

        let db_path = data_dir.join("db.sqlite");
        let conn = Connection::open(&db_path)
            .map_err(|e| TabulaError::Internal(format!("failed to open database: {e}")))?;

        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|e| TabulaError::Internal(format!("failed to set busy_timeout: {e}")))?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| TabulaError::Internal(format!("failed to enable foreign_keys: {e}")))?;

        Self::run_migrations(&conn)?;

        // Seeded from the clock so a restarted daemon never reissues a revision a
        // watcher has already seen.
        let initial = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        let (revision, _) = watch::channel(initial);

        let db = Db {
            conn,
            data_dir: data_dir.to_path_buf(),
            config,
            revision,
        };
        db.seed_users()?;

        tracing::debug!(path = %db_path.display(), "opened store");
        Ok(db)
    }

    fn run_migrations(conn: &Connection) -> Result<(), TabulaError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id            TEXT PRIMARY KEY,
                first_name    TEXT NOT NULL,
                last_name     TEXT NOT NULL,
                email         TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                role          TEXT NOT NULL DEFAULT 'user' CHECK (role IN ('admin', 'user')),
                created_at    TEXT NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS users_email_ci ON users (lower(email));

            CREATE TABLE IF NOT EXISTS issues (
                id             TEXT PRIMARY KEY,
                title          TEXT NOT NULL,
                description    TEXT NOT NULL,
                state          TEXT NOT NULL DEFAULT 'new'
                               CHECK (state IN ('new', 'in-progress', 'completed', 'blocked')),
                created_at     TEXT NOT NULL,
                updated_at     TEXT NOT NULL,
                due_date       TEXT NOT NULL,
                estimated_time INTEGER NOT NULL CHECK (estimated_time >= 0),
                completed_time INTEGER NOT NULL DEFAULT 0 CHECK (completed_time >= 0),
                assigned_to    TEXT NOT NULL REFERENCES users(id),
                created_by     TEXT NOT NULL REFERENCES users(id)
            );

            -- no foreign key to issues: entries outlive the issue they describe
            CREATE TABLE IF NOT EXISTS activity_logs (
                id        TEXT PRIMARY KEY,
                issue_id  TEXT NOT NULL,
                user_id   TEXT NOT NULL,
                user_name TEXT NOT NULL,
                action    TEXT NOT NULL
                          CHECK (action IN ('created', 'updated', 'deleted', 'state_changed')),
                changes   TEXT NOT NULL DEFAULT '[]',
                timestamp TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS activity_logs_issue ON activity_logs (issue_id);

            CREATE TABLE IF NOT EXISTS sessions (
                token      TEXT PRIMARY KEY,
                user_id    TEXT NOT NULL REFERENCES users(id),
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );",
        )
        .map_err(|e| TabulaError::Internal(format!("migration failed: {e}")))?;

        Ok(())
    }

    fn seed_users(&self) -> Result<(), TabulaError> {
        if self.config.seed_users.is_empty() {
            return Ok(());
        }
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        if count > 0 {
            return Ok(());
        }

        for seed in self.config.seed_users.clone() {
            let SeedUser {
                first_name,
                last_name,
                email,
                password,
                role,
            } = seed;
            let user = self.add_user(&NewUser {
                first_name,
                last_name,
                email,
                confirm_password: password.clone(),
                password,
                role,
            })?;
            tracing::info!(id = %user.id, email = %user.email, "seeded user");
        }
        Ok(())
    }

    /// Receivers observe the issue-list revision; it moves on every issue mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    pub(crate) fn publish(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    pub fn counts(&self) -> Result<(i64, i64), TabulaError> {
        let issues: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM issues", [], |row| row.get(0))?;
        let users: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok((issues, users))
    }
}

pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Drops the precision `fmt_ts` would lose, so values compare equal to what is read back.
pub fn stored_precision(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(3)
}

pub fn now() -> DateTime<Utc> {
    Utc::now()
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::config::SeedUser;
    use crate::types::Role;
    use tempfile::TempDir;

    #[test]
    fn open_creates_tables() {
        let (db, _dir) = open_temp_db();

        let tables: Vec<String> = db
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        for table in ["users", "issues", "activity_logs", "sessions"] {
            assert!(tables.contains(&table.to_string()), "missing {table}");
        }
    }

    #[test]
    fn open_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let _db1 = Db::open_with(dir.path(), test_config()).unwrap();
        let _db2 = Db::open_with(dir.path(), test_config()).unwrap();
    }

    #[test]
    fn issues_require_existing_users() {
        let (db, _dir) = open_temp_db();
        let ts = fmt_ts(now());
        let result = db.conn.execute(
            "INSERT INTO issues (id, title, description, state, created_at, updated_at, due_date,
                                 estimated_time, completed_time, assigned_to, created_by)
             VALUES ('ISS-001', 't', 'd', 'new', ?1, ?1, ?1, 1, 0, 'USR-404', 'USR-404')",
            rusqlite::params![ts],
        );
        assert!(result.is_err(), "should reject issue referencing missing users");
    }

    #[test]
    fn corrupt_state_is_an_error_not_a_panic() {
        let (db, _dir) = open_temp_db();
        let user = add(&db, "Ada", Role::Admin);
        let ts = fmt_ts(now());
        db.conn
            .execute_batch("PRAGMA ignore_check_constraints = ON")
            .unwrap();
        db.conn
            .execute(
                "INSERT INTO issues (id, title, description, state, created_at, updated_at, due_date,
                                     estimated_time, completed_time, assigned_to, created_by)
                 VALUES ('ISS-001', 't', 'd', 'done', ?1, ?1, ?1, 1, 0, ?2, ?2)",
                rusqlite::params![ts, user.id],
            )
            .unwrap();
        assert!(matches!(
            db.get_issue("ISS-001"),
            Err(TabulaError::Internal(_))
        ));
    }

    #[test]
    fn seeds_users_only_into_empty_store() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            seed_users: vec![SeedUser {
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
                email: "ada@example.com".into(),
                password: "engine".into(),
                role: Role::Admin,
            }],
            ..test_config()
        };

        let db = Db::open_with(dir.path(), config.clone()).unwrap();
        let users = db.list_users().unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, "USR-001");
        assert_eq!(users[0].role, Role::Admin);
        drop(db);

        let db = Db::open_with(dir.path(), config).unwrap();
        assert_eq!(db.list_users().unwrap().len(), 1);
    }

    #[test]
    fn publish_moves_revision() {
        let (db, _dir) = open_temp_db();
        let rx = db.subscribe();
        let before = db.revision();
        db.publish();
        assert_eq!(db.revision(), before + 1);
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn timestamps_keep_millis() {
        let ts: DateTime<Utc> = "2030-01-02T03:04:05.678Z".parse().unwrap();
        assert_eq!(fmt_ts(ts), "2030-01-02T03:04:05.678Z");
    }
}
