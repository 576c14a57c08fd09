use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueState {
    New,
    InProgress,
    Completed,
    Blocked,
}

impl IssueState {
    pub const ALL: [IssueState; 4] = [
        IssueState::New,
        IssueState::InProgress,
        IssueState::Completed,
        IssueState::Blocked,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IssueState::New => "new",
            IssueState::InProgress => "in-progress",
            IssueState::Completed => "completed",
            IssueState::Blocked => "blocked",
        }
    }
}

impl FromStr for IssueState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(IssueState::New),
            "in-progress" | "in_progress" => Ok(IssueState::InProgress),
            "completed" => Ok(IssueState::Completed),
            "blocked" => Ok(IssueState::Blocked),
            other => Err(format!(
                "invalid state '{other}' (expected new, in-progress, completed, blocked)"
            )),
        }
    }
}

impl fmt::Display for IssueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            other => Err(format!("invalid role '{other}' (expected admin or user)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    Created,
    Updated,
    Deleted,
    StateChanged,
}

impl ActivityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityAction::Created => "created",
            ActivityAction::Updated => "updated",
            ActivityAction::Deleted => "deleted",
            ActivityAction::StateChanged => "state_changed",
        }
    }

    /// Human label used by the activity printers.
    pub fn label(&self) -> &'static str {
        match self {
            ActivityAction::Created => "Created issue",
            ActivityAction::Updated => "Updated issue",
            ActivityAction::Deleted => "Deleted issue",
            ActivityAction::StateChanged => "Changed state",
        }
    }
}

impl FromStr for ActivityAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(ActivityAction::Created),
            "updated" => Ok(ActivityAction::Updated),
            "deleted" => Ok(ActivityAction::Deleted),
            "state_changed" => Ok(ActivityAction::StateChanged),
            other => Err(format!("invalid activity action '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub title: String,
    pub description: String,
    pub state: IssueState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub estimated_time: u32,
    pub completed_time: u32,
    pub assigned_to: String,
    pub created_by: String,
}

impl Issue {
    /// Hours spent beyond the estimate; negative when under.
    pub fn delay(&self) -> i64 {
        i64::from(self.completed_time) - i64::from(self.estimated_time)
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.state != IssueState::Completed && self.due_date < now
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub field: String,
    pub old_value: serde_json::Value,
    pub new_value: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityLog {
    pub id: String,
    pub issue_id: String,
    pub user_id: String,
    pub user_name: String,
    pub action: ActivityAction,
    pub changes: Vec<Change>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewIssue {
    pub title: String,
    pub description: String,
    pub estimated_time: u32,
    #[serde(default)]
    pub completed_time: u32,
    pub due_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IssueUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<IssueState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_time: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_time: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
}

impl IssueUpdate {
    pub fn is_empty(&self) -> bool {
        *self == IssueUpdate::default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    #[serde(default = "default_role")]
    pub role: Role,
}

fn default_role() -> Role {
    Role::User
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSession {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListFilters {
    pub search: Option<String>,
    pub states: Vec<IssueState>,
    pub assignees: Vec<String>,
    pub mine_only: bool,
    /// Non-admin viewers only see issues assigned to them.
    pub restricted: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BoardColumns {
    pub new: Vec<Issue>,
    pub in_progress: Vec<Issue>,
    pub blocked: Vec<Issue>,
    pub completed: Vec<Issue>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardSummary {
    pub total: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub blocked: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Board {
    pub columns: BoardColumns,
    pub summary: BoardSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueDetail {
    #[serde(flatten)]
    pub issue: Issue,
    pub assignee_name: String,
    pub creator_name: String,
    pub delay: i64,
    pub overdue: bool,
    pub activity: Vec<ActivityLog>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueFeed {
    pub revision: u64,
    pub issues: Vec<Issue>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn issue(state: IssueState, due_in_hours: i64) -> Issue {
        let now = Utc::now();
        Issue {
            id: "ISS-001".into(),
            title: "write release notes".into(),
            description: "cover every user-facing change".into(),
            state,
            created_at: now,
            updated_at: now,
            due_date: now + Duration::hours(due_in_hours),
            estimated_time: 8,
            completed_time: 11,
            assigned_to: "USR-001".into(),
            created_by: "USR-001".into(),
        }
    }

    #[test]
    fn state_wire_names() {
        for state in IssueState::ALL {
            let json = serde_json::to_value(state).unwrap();
            assert_eq!(json, state.as_str());
            assert_eq!(state.as_str().parse::<IssueState>().unwrap(), state);
        }
        assert!("done".parse::<IssueState>().is_err());
    }

    #[test]
    fn state_changed_serializes_snake_case() {
        let json = serde_json::to_value(ActivityAction::StateChanged).unwrap();
        assert_eq!(json, "state_changed");
    }

    #[test]
    fn delay_can_be_negative() {
        let mut i = issue(IssueState::New, 1);
        assert_eq!(i.delay(), 3);
        i.completed_time = 2;
        assert_eq!(i.delay(), -6);
    }

    #[test]
    fn overdue_ignores_completed() {
        let now = Utc::now();
        assert!(issue(IssueState::InProgress, -1).is_overdue(now));
        assert!(issue(IssueState::Blocked, -1).is_overdue(now));
        assert!(!issue(IssueState::Completed, -1).is_overdue(now));
        assert!(!issue(IssueState::New, 1).is_overdue(now));
    }

    #[test]
    fn password_hash_never_serialized() {
        let user = User {
            id: "USR-001".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@example.com".into(),
            password_hash: "$2b$04$secret".into(),
            role: Role::Admin,
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("secret"));
        assert!(!json.contains("password"));
        assert_eq!(user.full_name(), "Ada Lovelace");
    }

    #[test]
    fn empty_update_detected() {
        assert!(IssueUpdate::default().is_empty());
        let update = IssueUpdate {
            state: Some(IssueState::Blocked),
            ..Default::default()
        };
        assert!(!update.is_empty());
    }
}
