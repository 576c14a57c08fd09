use serde_json::Value;

use crate::error::{ErrorResponse, TabulaError};
use crate::types::ActivityAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Json,
    Human,
}

pub fn print_json(value: &Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}

pub fn print_error(err: &TabulaError, mode: OutputMode) {
    match mode {
        OutputMode::Json => {
            let resp = ErrorResponse::from(err);
            match serde_json::to_string(&resp) {
                Ok(line) => eprintln!("{line}"),
                Err(_) => eprintln!("error: {err}"),
            }
        }
        OutputMode::Human => {
            eprintln!("error: {err}");
        }
    }
}

fn str_of<'a>(value: &'a Value, key: &str, fallback: &'a str) -> &'a str {
    value[key].as_str().unwrap_or(fallback)
}

/// `2026-10-20T09:30:00.000Z` -> `2026-10-20`.
fn day(ts: &str) -> &str {
    ts.get(..10).unwrap_or(ts)
}

pub fn field_label(field: &str) -> &str {
    match field {
        "title" => "Title",
        "description" => "Description",
        "state" => "State",
        "estimated_time" => "Estimated time",
        "completed_time" => "Completed time",
        "due_date" => "Due date",
        "assigned_to" => "Assignee",
        other => other,
    }
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

pub fn issue_line(value: &Value) -> String {
    let id = str_of(value, "id", "?");
    let state = str_of(value, "state", "?");
    let title = str_of(value, "title", "?");
    let assignee = str_of(value, "assigned_to", "-");
    let due = day(str_of(value, "due_date", "?"));
    let spent = value["completed_time"].as_u64().unwrap_or(0);
    let estimate = value["estimated_time"].as_u64().unwrap_or(0);
    format!("{id}  {state:<11} {title}  @{assignee}  due {due}  {spent}/{estimate}h")
}

pub fn print_issue(value: &Value, mode: OutputMode) {
    match mode {
        OutputMode::Json => print_json(value),
        OutputMode::Human => println!("{}", issue_line(value)),
    }
}

pub fn print_issue_list(value: &Value, mode: OutputMode) {
    match mode {
        OutputMode::Json => print_json(value),
        OutputMode::Human => {
            if let Some(arr) = value.as_array() {
                if arr.is_empty() {
                    println!("(no issues)");
                } else {
                    for item in arr {
                        println!("{}", issue_line(item));
                    }
                }
            }
        }
    }
}

pub fn activity_line(entry: &Value) -> String {
    let at = str_of(entry, "timestamp", "?");
    let who = str_of(entry, "user_name", "?");
    let label = str_of(entry, "action", "?")
        .parse::<ActivityAction>()
        .map(|a| a.label())
        .unwrap_or("?");
    format!("[{at}] {who}: {label}")
}

fn print_activity_entries(entries: &[Value], indent: &str) {
    for entry in entries {
        println!("{indent}{}", activity_line(entry));
        if let Some(changes) = entry["changes"].as_array() {
            for c in changes {
                let field = field_label(str_of(c, "field", "?"));
                println!(
                    "{indent}    {field}: {} -> {}",
                    plain(&c["old_value"]),
                    plain(&c["new_value"])
                );
            }
        }
    }
}

pub fn print_activity(value: &Value, mode: OutputMode) {
    match mode {
        OutputMode::Json => print_json(value),
        OutputMode::Human => match value.as_array() {
            Some(arr) if !arr.is_empty() => print_activity_entries(arr, ""),
            _ => println!("(no activity)"),
        },
    }
}

pub fn print_issue_detail(value: &Value, mode: OutputMode) {
    match mode {
        OutputMode::Json => print_json(value),
        OutputMode::Human => {
            let id = str_of(value, "id", "?");
            let title = str_of(value, "title", "?");
            let state = str_of(value, "state", "?");
            let assignee = str_of(value, "assignee_name", "Unknown");
            let creator = str_of(value, "creator_name", "Unknown");
            let due = day(str_of(value, "due_date", "?"));
            let estimate = value["estimated_time"].as_u64().unwrap_or(0);
            let spent = value["completed_time"].as_u64().unwrap_or(0);
            let delay = value["delay"].as_i64().unwrap_or(0);

            println!("{id}  {title}");
            println!("  state: {state}  assignee: {assignee}  created by: {creator}");
            print!("  due: {due}");
            if value["overdue"].as_bool().unwrap_or(false) {
                print!(" (overdue)");
            }
            println!();
            println!("  time: {spent}h of {estimate}h estimated (delay {delay:+}h)");
            println!("  description: {}", str_of(value, "description", ""));

            if let Some(activity) = value["activity"].as_array()
                && !activity.is_empty()
            {
                println!("  activity:");
                print_activity_entries(activity, "    ");
            }
        }
    }
}

pub fn print_board(value: &Value, mode: OutputMode) {
    match mode {
        OutputMode::Json => print_json(value),
        OutputMode::Human => {
            let summary = &value["summary"];
            println!(
                "total {}  in progress {}  completed {}  blocked {}",
                summary["total"].as_u64().unwrap_or(0),
                summary["in_progress"].as_u64().unwrap_or(0),
                summary["completed"].as_u64().unwrap_or(0),
                summary["blocked"].as_u64().unwrap_or(0),
            );
            for (key, heading) in [
                ("new", "New"),
                ("in_progress", "In progress"),
                ("blocked", "Blocked"),
                ("completed", "Completed"),
            ] {
                let column = value["columns"][key].as_array();
                let count = column.map_or(0, Vec::len);
                println!();
                println!("{heading} ({count})");
                for issue in column.into_iter().flatten() {
                    println!("  {}", issue_line(issue));
                }
            }
        }
    }
}

pub fn user_line(value: &Value) -> String {
    let id = str_of(value, "id", "?");
    let first = str_of(value, "first_name", "");
    let last = str_of(value, "last_name", "");
    let email = str_of(value, "email", "?");
    let role = str_of(value, "role", "?");
    format!("{id}  {first} {last} <{email}>  {role}")
}

pub fn print_user(value: &Value, mode: OutputMode) {
    match mode {
        OutputMode::Json => print_json(value),
        OutputMode::Human => println!("{}", user_line(value)),
    }
}

pub fn print_users(value: &Value, mode: OutputMode) {
    match mode {
        OutputMode::Json => print_json(value),
        OutputMode::Human => {
            if let Some(arr) = value.as_array() {
                for user in arr {
                    println!("{}", user_line(user));
                }
            }
        }
    }
}

/// Prints a login or signup result. The token itself is only shown as JSON.
pub fn print_session(value: &Value, mode: OutputMode) {
    match mode {
        OutputMode::Json => print_json(value),
        OutputMode::Human => {
            let user = &value["user"];
            println!(
                "logged in as {} {} ({})",
                str_of(user, "first_name", ""),
                str_of(user, "last_name", ""),
                str_of(user, "id", "?"),
            );
        }
    }
}

pub fn print_deleted(id: &str, mode: OutputMode) {
    match mode {
        OutputMode::Json => print_json(&serde_json::json!({ "status": "deleted", "id": id })),
        OutputMode::Human => println!("deleted {id}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn issue_line_shows_core_fields() {
        let issue = json!({
            "id": "ISS-004",
            "title": "Broken login",
            "state": "in-progress",
            "assigned_to": "USR-002",
            "due_date": "2026-10-20T09:30:00.000Z",
            "estimated_time": 6,
            "completed_time": 2,
        });
        assert_eq!(
            issue_line(&issue),
            "ISS-004  in-progress Broken login  @USR-002  due 2026-10-20  2/6h"
        );
    }

    #[test]
    fn activity_line_uses_labels() {
        let entry = json!({
            "timestamp": "2026-10-15T12:00:00.000Z",
            "user_name": "Ada Lovelace",
            "action": "state_changed",
        });
        assert_eq!(
            activity_line(&entry),
            "[2026-10-15T12:00:00.000Z] Ada Lovelace: Changed state"
        );
    }

    #[test]
    fn field_labels() {
        assert_eq!(field_label("assigned_to"), "Assignee");
        assert_eq!(field_label("estimated_time"), "Estimated time");
        assert_eq!(field_label("custom"), "custom");
    }

    #[test]
    fn day_truncates_timestamps() {
        assert_eq!(day("2026-10-20T09:30:00.000Z"), "2026-10-20");
        assert_eq!(day("?"), "?");
    }
}
