use chrono::{DateTime, NaiveDate, Utc};

use crate::error::TabulaError;
use crate::types::{IssueUpdate, NewIssue, NewUser};

pub const MIN_TITLE_LEN: usize = 5;
pub const MIN_DESCRIPTION_LEN: usize = 10;
pub const MAX_HOURS: u32 = 1000;
pub const MIN_PASSWORD_LEN: usize = 5;

fn invalid(msg: &str) -> TabulaError {
    TabulaError::Validation(msg.to_string())
}

pub fn title(title: &str) -> Result<(), TabulaError> {
    if title.trim().chars().count() < MIN_TITLE_LEN {
        return Err(invalid("Title must be at least 5 characters."));
    }
    Ok(())
}

pub fn description(description: &str) -> Result<(), TabulaError> {
    if description.trim().chars().count() < MIN_DESCRIPTION_LEN {
        return Err(invalid("Description must be at least 10 characters."));
    }
    Ok(())
}

pub fn estimated_time(hours: u32) -> Result<(), TabulaError> {
    if hours == 0 || hours > MAX_HOURS {
        return Err(invalid("Estimated time must be between 1 and 1000 hours."));
    }
    Ok(())
}

pub fn completed_time(hours: u32) -> Result<(), TabulaError> {
    if hours > MAX_HOURS {
        return Err(invalid("Completed time must be between 0 and 1000 hours."));
    }
    Ok(())
}

pub fn future_due_date(due: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), TabulaError> {
    if due <= now {
        return Err(invalid("Select a valid future due date."));
    }
    Ok(())
}

pub fn new_issue(issue: &NewIssue, now: DateTime<Utc>) -> Result<(), TabulaError> {
    title(&issue.title)?;
    description(&issue.description)?;
    estimated_time(issue.estimated_time)?;
    completed_time(issue.completed_time)?;
    future_due_date(issue.due_date, now)?;
    if matches!(&issue.assigned_to, Some(a) if a.trim().is_empty()) {
        return Err(invalid("Please select an assignee."));
    }
    Ok(())
}

/// Checks only the fields the update carries.
pub fn issue_update(update: &IssueUpdate) -> Result<(), TabulaError> {
    if let Some(t) = &update.title {
        title(t)?;
    }
    if let Some(d) = &update.description {
        description(d)?;
    }
    if let Some(hours) = update.estimated_time {
        estimated_time(hours)?;
    }
    if let Some(hours) = update.completed_time {
        completed_time(hours)?;
    }
    if matches!(&update.assigned_to, Some(a) if a.trim().is_empty()) {
        return Err(invalid("Please assign this issue to a user."));
    }
    Ok(())
}

/// `local@domain.tld`: no whitespace, exactly one `@`, and a dot inside the domain.
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    domain
        .char_indices()
        .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len())
}

pub fn new_user(user: &NewUser) -> Result<(), TabulaError> {
    let required = [
        &user.first_name,
        &user.last_name,
        &user.email,
        &user.password,
    ];
    if required.iter().any(|f| f.trim().is_empty()) {
        return Err(invalid("All fields are required."));
    }
    if !is_valid_email(user.email.trim()) {
        return Err(invalid("Please enter a valid email address."));
    }
    if user.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(invalid("Password must be at least 5 characters long."));
    }
    if user.password != user.confirm_password {
        return Err(invalid("Passwords do not match."));
    }
    Ok(())
}

/// Accepts RFC 3339 timestamps or plain `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_due_date(raw: &str) -> Result<DateTime<Utc>, TabulaError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| invalid("Due date must be YYYY-MM-DD or an RFC 3339 timestamp."))
}
