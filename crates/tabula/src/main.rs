use std::path::PathBuf;
use std::process;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tabula::client::{self, Client};
use tabula::config::data_dir_in;
use tabula::error::TabulaError;
use tabula::output::{self, OutputMode};
use tabula::types::{IssueState, IssueUpdate, ListFilters, NewIssue, NewUser, Role};
use tabula::validate;

#[derive(Parser)]
#[command(name = "tb", about = "Team issue tracker with a Kanban board")]
struct Cli {
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon in the foreground
    Daemon {
        #[arg(long, env = "TB_PORT")]
        port: Option<u16>,
        #[arg(long, env = "TB_DATA_DIR")]
        data_dir: Option<PathBuf>,
        #[command(subcommand)]
        subcmd: Option<DaemonSubcommand>,
    },
    /// Print the data directory
    Where {
        #[arg(long, env = "TB_DATA_DIR")]
        data_dir: Option<PathBuf>,
    },
    Signup {
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long)]
        email: String,
        #[arg(long, env = "TB_PASSWORD")]
        password: String,
        /// Defaults to --password
        #[arg(long)]
        confirm_password: Option<String>,
        #[arg(long, default_value = "user")]
        role: Role,
    },
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "TB_PASSWORD")]
        password: String,
    },
    Logout,
    Whoami,
    /// List users, or show one
    Users {
        id: Option<String>,
    },
    Create {
        title: String,
        #[arg(short = 'd', long)]
        description: String,
        /// Estimated hours
        #[arg(short = 'e', long)]
        estimate: u32,
        /// Hours already spent
        #[arg(long, default_value_t = 0)]
        completed: u32,
        /// RFC 3339 timestamp or YYYY-MM-DD
        #[arg(long, value_parser = parse_due)]
        due: DateTime<Utc>,
        #[arg(short = 'a', long)]
        assignee: Option<String>,
    },
    Show {
        id: String,
    },
    Update {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(short = 'd', long)]
        description: Option<String>,
        #[arg(short = 's', long)]
        state: Option<IssueState>,
        #[arg(short = 'e', long)]
        estimate: Option<u32>,
        #[arg(long)]
        completed: Option<u32>,
        #[arg(long, value_parser = parse_due)]
        due: Option<DateTime<Utc>>,
        #[arg(short = 'a', long)]
        assignee: Option<String>,
    },
    Assign {
        id: String,
        user_id: String,
    },
    /// Mark an issue completed, booking its estimate as time spent
    Complete {
        id: String,
    },
    Delete {
        id: String,
    },
    /// Table view; non-admins only see issues assigned to them
    List {
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Kanban view grouped by state
    Board {
        #[command(flatten)]
        filters: FilterArgs,
    },
    Search {
        query: String,
    },
    History {
        id: String,
    },
    /// Re-render the board whenever issues change
    Watch {
        #[command(flatten)]
        filters: FilterArgs,
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },
}

#[derive(Subcommand)]
enum DaemonSubcommand {
    Status,
}

#[derive(clap::Args)]
struct FilterArgs {
    #[arg(short = 'q', long)]
    search: Option<String>,
    #[arg(short = 's', long = "state")]
    states: Vec<IssueState>,
    #[arg(short = 'a', long = "assignee")]
    assignees: Vec<String>,
    /// Only issues assigned to me
    #[arg(long, default_value_t = false)]
    mine: bool,
}

impl FilterArgs {
    fn into_filters(self, restricted: bool) -> ListFilters {
        ListFilters {
            search: self.search,
            states: self.states,
            assignees: self.assignees,
            mine_only: self.mine,
            restricted,
        }
    }
}

fn parse_due(raw: &str) -> Result<DateTime<Utc>, String> {
    validate::parse_due_date(raw).map_err(|e| e.to_string())
}

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn fail(err: TabulaError, mode: OutputMode) -> ! {
    output::print_error(&err, mode);
    process::exit(1);
}

fn resolve_data_dir(flag: Option<PathBuf>, mode: OutputMode) -> PathBuf {
    if let Some(dir) = flag {
        return dir;
    }
    match std::env::current_dir() {
        Ok(cwd) => data_dir_in(&cwd),
        Err(e) => fail(
            TabulaError::Internal(format!("cannot resolve current directory: {e}")),
            mode,
        ),
    }
}

fn watch_board(client: &Client, filters: &ListFilters, timeout_secs: u64, mode: OutputMode) {
    let mut since = 0;
    loop {
        let feed = match client.watch(since, timeout_secs) {
            Ok(v) => v,
            Err(e) => fail(e, mode),
        };
        let revision = feed["revision"].as_u64().unwrap_or(since);
        if revision == since {
            continue;
        }
        since = revision;
        match client.board(filters) {
            Ok(board) => {
                if mode == OutputMode::Human {
                    println!("--- revision {revision} ---");
                }
                output::print_board(&board, mode);
            }
            Err(e) => fail(e, mode),
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    let is_daemon = matches!(cli.command, Commands::Daemon { subcmd: None, .. });
    init_tracing(if is_daemon { "info" } else { "warn" });

    match cli.command {
        Commands::Daemon {
            port,
            data_dir,
            subcmd,
        } => match subcmd {
            Some(DaemonSubcommand::Status) => {
                let client = Client::new();
                match client.check_reachable() {
                    Ok(()) => {
                        println!("daemon reachable at {}", client.base_url());
                        process::exit(0);
                    }
                    Err(e) => {
                        eprintln!("daemon unreachable: {e}");
                        process::exit(1);
                    }
                }
            }
            None => {
                let dir = resolve_data_dir(data_dir, mode);
                let rt = match tokio::runtime::Runtime::new() {
                    Ok(rt) => rt,
                    Err(e) => fail(
                        TabulaError::Internal(format!("failed to create tokio runtime: {e}")),
                        mode,
                    ),
                };
                if let Err(e) = rt.block_on(tabula::daemon::start(port, dir)) {
                    fail(e, mode);
                }
            }
        },

        Commands::Where { data_dir } => {
            let dir = resolve_data_dir(data_dir, mode);
            match mode {
                OutputMode::Json => output::print_json(&serde_json::json!({
                    "data_dir": dir.display().to_string(),
                    "session": client::session_path().display().to_string(),
                })),
                OutputMode::Human => println!("{}", dir.display()),
            }
        }

        Commands::Signup {
            first_name,
            last_name,
            email,
            password,
            confirm_password,
            role,
        } => {
            let client = Client::new().with_token(None);
            let new = NewUser {
                first_name,
                last_name,
                email,
                confirm_password: confirm_password.unwrap_or_else(|| password.clone()),
                password,
                role,
            };
            match client.signup(&new) {
                Ok(v) => {
                    if let Some(token) = v["token"].as_str()
                        && let Err(e) = client::save_session(token)
                    {
                        fail(e, mode);
                    }
                    output::print_session(&v, mode);
                }
                Err(e) => fail(e, mode),
            }
        }

        Commands::Login { email, password } => {
            let client = Client::new().with_token(None);
            match client.login(&email, &password) {
                Ok(v) => {
                    if let Some(token) = v["token"].as_str()
                        && let Err(e) = client::save_session(token)
                    {
                        fail(e, mode);
                    }
                    output::print_session(&v, mode);
                }
                Err(e) => fail(e, mode),
            }
        }

        Commands::Logout => {
            let client = Client::new();
            // A session the daemon already forgot still gets cleared locally.
            match client.logout() {
                Ok(()) | Err(TabulaError::InvalidSession) | Err(TabulaError::Unauthenticated(_)) => {}
                Err(e) => fail(e, mode),
            }
            if let Err(e) = client::clear_session() {
                fail(e, mode);
            }
            match mode {
                OutputMode::Json => {
                    output::print_json(&serde_json::json!({ "status": "logged_out" }))
                }
                OutputMode::Human => println!("logged out"),
            }
        }

        Commands::Whoami => {
            let client = Client::new();
            match client.me() {
                Ok(v) => output::print_user(&v, mode),
                Err(e) => fail(e, mode),
            }
        }

        Commands::Users { id } => {
            let client = Client::new();
            match id {
                Some(id) => match client.get_user(&id) {
                    Ok(v) => output::print_user(&v, mode),
                    Err(e) => fail(e, mode),
                },
                None => match client.list_users() {
                    Ok(v) => output::print_users(&v, mode),
                    Err(e) => fail(e, mode),
                },
            }
        }

        Commands::Create {
            title,
            description,
            estimate,
            completed,
            due,
            assignee,
        } => {
            let client = Client::new();
            let new = NewIssue {
                title,
                description,
                estimated_time: estimate,
                completed_time: completed,
                due_date: due,
                assigned_to: assignee,
            };
            match client.create_issue(&new) {
                Ok(v) => output::print_issue(&v, mode),
                Err(e) => fail(e, mode),
            }
        }

        Commands::Show { id } => {
            let client = Client::new();
            match client.get_issue(&id) {
                Ok(v) => output::print_issue_detail(&v, mode),
                Err(e) => fail(e, mode),
            }
        }

        Commands::Update {
            id,
            title,
            description,
            state,
            estimate,
            completed,
            due,
            assignee,
        } => {
            let client = Client::new();
            let update = IssueUpdate {
                title,
                description,
                state,
                estimated_time: estimate,
                completed_time: completed,
                due_date: due,
                assigned_to: assignee,
            };
            if update.is_empty() {
                fail(
                    TabulaError::Validation("nothing to update".to_string()),
                    mode,
                );
            }
            match client.update_issue(&id, &update) {
                Ok(v) => output::print_issue(&v, mode),
                Err(e) => fail(e, mode),
            }
        }

        Commands::Assign { id, user_id } => {
            let client = Client::new();
            match client.assign_issue(&id, &user_id) {
                Ok(v) => output::print_issue(&v, mode),
                Err(e) => fail(e, mode),
            }
        }

        Commands::Complete { id } => {
            let client = Client::new();
            match client.complete_issue(&id) {
                Ok(v) => output::print_issue(&v, mode),
                Err(e) => fail(e, mode),
            }
        }

        Commands::Delete { id } => {
            let client = Client::new();
            match client.delete_issue(&id) {
                Ok(()) => output::print_deleted(&id, mode),
                Err(e) => fail(e, mode),
            }
        }

        Commands::List { filters } => {
            let client = Client::new();
            match client.list_issues(&filters.into_filters(true)) {
                Ok(v) => output::print_issue_list(&v, mode),
                Err(e) => fail(e, mode),
            }
        }

        Commands::Board { filters } => {
            let client = Client::new();
            match client.board(&filters.into_filters(false)) {
                Ok(v) => output::print_board(&v, mode),
                Err(e) => fail(e, mode),
            }
        }

        Commands::Search { query } => {
            let client = Client::new();
            match client.search_issues(&query) {
                Ok(v) => output::print_issue_list(&v, mode),
                Err(e) => fail(e, mode),
            }
        }

        Commands::History { id } => {
            let client = Client::new();
            match client.issue_activity(&id) {
                Ok(v) => output::print_activity(&v, mode),
                Err(e) => fail(e, mode),
            }
        }

        Commands::Watch {
            filters,
            timeout_secs,
        } => {
            let client = Client::new();
            watch_board(&client, &filters.into_filters(false), timeout_secs, mode);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn list_filters_parse() {
        let cli = Cli::parse_from([
            "tb", "list", "-s", "new", "-s", "in-progress", "-a", "USR-002", "--mine",
        ]);
        let Commands::List { filters } = cli.command else {
            panic!("expected list");
        };
        let filters = filters.into_filters(true);
        assert_eq!(filters.states, [IssueState::New, IssueState::InProgress]);
        assert_eq!(filters.assignees, ["USR-002"]);
        assert!(filters.mine_only);
        assert!(filters.restricted);
    }

    #[test]
    fn due_accepts_plain_dates() {
        let cli = Cli::parse_from([
            "tb", "create", "Broken login", "-d", "users land on a blank page", "-e", "4",
            "--due", "2030-01-02",
        ]);
        let Commands::Create { due, .. } = cli.command else {
            panic!("expected create");
        };
        assert_eq!(due.to_rfc3339(), "2030-01-02T00:00:00+00:00");
    }
}
