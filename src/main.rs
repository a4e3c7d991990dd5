//! clearml-sessions CLI - browse ClearML interactive sessions and SSH into them

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use colored::Colorize;

use clearml_session_manager::api::{LogOrder, Task, TaskLogRequest};
use clearml_session_manager::attach::{attach_to_session, AttachEvent};
use clearml_session_manager::config::{mask_secret, ClearMlConfig};
use clearml_session_manager::connect::create_connector;
use clearml_session_manager::discovery::{self, find_session, is_full_task_id, Connection, SessionQuery};
use clearml_session_manager::error::{FixSuggestion, Result, SessionError};
use clearml_session_manager::hocon::create_parser;
use clearml_session_manager::links::session_web_url;
use clearml_session_manager::python::{
    install_packages, missing_packages, resolve_interpreter, REQUIRED_PACKAGES,
};
use clearml_session_manager::settings::{FileSettings, SettingsLayer, SettingsProvider};
use clearml_session_manager::ssh::{query_ssh_details, wait_for_ssh_details, LogPatternExtractor, SshDetails};

#[derive(Parser)]
#[command(name = "clearml-sessions")]
#[command(about = "Browse ClearML interactive sessions and SSH into them")]
#[command(version)]
struct Cli {
    /// Path to clearml.conf (overrides settings and CLEARML_CONFIG_FILE)
    #[arg(long, global = true)]
    config_file: Option<String>,

    /// Workspace folder for workspace settings and ${workspaceFolder} (default: current dir)
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    /// Project holding the sessions (default: DevOps)
    #[arg(long, global = true)]
    project: Option<String>,

    /// More logging (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List active interactive sessions
    List {
        /// Print the raw task records as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one session's details
    Show {
        /// Task id or unique id prefix
        task: String,
    },

    /// Print a session's console log
    Logs {
        /// Task id or unique id prefix
        task: String,

        /// Number of log events to fetch
        #[arg(long, default_value_t = 1000)]
        batch_size: u32,

        /// Fetch from the earliest event forward
        #[arg(long)]
        oldest_first: bool,

        /// Epoch milliseconds to navigate from
        #[arg(long)]
        from_timestamp: Option<i64>,

        /// Order of returned events
        #[arg(long, value_enum)]
        order: Option<OrderArg>,
    },

    /// Extract SSH connection details from a session's log
    SshDetails {
        /// Task id or unique id prefix
        task: String,

        /// Keep polling until the SSH server is up
        #[arg(long)]
        wait: bool,

        /// Polling attempts with --wait
        #[arg(long, default_value_t = 30)]
        attempts: u32,

        /// Seconds between attempts with --wait
        #[arg(long, default_value_t = 10)]
        interval_secs: u64,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Connect to a session over SSH
    Connect {
        /// Task id or unique id prefix
        task: String,

        /// How to connect (ssh, vscode, print)
        #[arg(long, default_value = "ssh")]
        via: String,

        /// Wait for the SSH server to come up first
        #[arg(long)]
        wait: bool,
    },

    /// Open a local tunnel with `clearml-session --attach`
    Attach {
        /// Task id or unique id prefix
        task: String,
    },

    /// Print the web UI link for a session
    Url {
        /// Task id or unique id prefix
        task: String,
    },

    /// Show resolved settings and clearml.conf values
    Config,

    /// Check (and optionally install) the Python packages sessions need
    InstallDeps {
        /// Install missing packages with pip
        #[arg(long)]
        install: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OrderArg {
    Asc,
    Desc,
}

impl From<OrderArg> for LogOrder {
    fn from(order: OrderArg) -> Self {
        match order {
            OrderArg::Asc => LogOrder::Asc,
            OrderArg::Desc => LogOrder::Desc,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        _ => tracing::Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();

    let settings = settings_provider(&cli);

    let result = match cli.command {
        Commands::List { json } => list_sessions(&settings, json).await,
        Commands::Show { task } => show_session(&settings, &task).await,
        Commands::Logs {
            task,
            batch_size,
            oldest_first,
            from_timestamp,
            order,
        } => {
            let mut request = TaskLogRequest::new(String::new()).with_batch_size(batch_size);
            if oldest_first {
                request = request.with_navigate_earlier(false);
            }
            if let Some(ts) = from_timestamp {
                request = request.with_from_timestamp(ts);
            }
            if let Some(order) = order {
                request = request.with_order(order.into());
            }
            print_logs(&settings, &task, request).await
        }
        Commands::SshDetails {
            task,
            wait,
            attempts,
            interval_secs,
            json,
        } => {
            let attempts = if wait { attempts } else { 1 };
            ssh_details(&settings, &task, attempts, Duration::from_secs(interval_secs), json).await
        }
        Commands::Connect { task, via, wait } => connect_session(&settings, &task, &via, wait).await,
        Commands::Attach { task } => attach(&settings, &task).await,
        Commands::Url { task } => session_url(&settings, &task).await,
        Commands::Config => show_config(&settings).await,
        Commands::InstallDeps { install } => install_deps(&settings, install).await,
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        if let Some(suggestion) = e.fix_suggestion() {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
        std::process::exit(1);
    }
}

fn settings_provider(cli: &Cli) -> FileSettings {
    let workspace = cli
        .workspace
        .clone()
        .or_else(|| std::env::current_dir().ok());
    FileSettings::new(workspace).with_overrides(SettingsLayer {
        clearml_config_file: cli.config_file.clone(),
        project_name: cli.project.clone(),
        ..Default::default()
    })
}

async fn discover(conn: &Connection) -> Result<Vec<Task>> {
    SessionQuery::from(&conn.settings)
        .list_sessions(&conn.client)
        .await
}

/// Full ids pass through; prefixes resolve among active sessions
async fn resolve_task_id(conn: &Connection, task: &str) -> Result<String> {
    if is_full_task_id(task) {
        return Ok(task.to_string());
    }
    let sessions = discover(conn).await?;
    Ok(find_session(&sessions, task)?.id.clone())
}

async fn list_sessions(settings: &FileSettings, json: bool) -> Result<()> {
    let conn = discovery::connect(settings).await?;
    let sessions = discover(&conn).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }

    if sessions.is_empty() {
        println!(
            "{} No active '{}' sessions in project '{}'",
            "○".dimmed(),
            conn.settings.session_name,
            conn.settings.project_name
        );
        return Ok(());
    }

    for session in &sessions {
        print_session(session);
    }
    println!("{} session(s)", sessions.len());
    Ok(())
}

fn print_session(session: &Task) {
    println!(
        "{} {}  {}  [{}]",
        "●".green(),
        session.short_id().cyan().bold(),
        session.name,
        status_colored(&session.status)
    );
    for (label, value) in session.details() {
        if label == "Task ID" || label == "Status" || value.is_empty() {
            continue;
        }
        println!("    {}: {}", label.dimmed(), value);
    }
}

fn status_colored(status: &str) -> colored::ColoredString {
    match status {
        "in_progress" => status.green(),
        "queued" => status.yellow(),
        "failed" | "stopped" => status.red(),
        _ => status.normal(),
    }
}

async fn show_session(settings: &FileSettings, task: &str) -> Result<()> {
    let conn = discovery::connect(settings).await?;
    let sessions = discover(&conn).await?;
    let session = find_session(&sessions, task)?;

    println!("{} {}", session.name.cyan().bold(), status_colored(&session.status));
    for (label, value) in session.details() {
        println!("  {:<18} {}", format!("{}:", label), value);
    }
    Ok(())
}

async fn print_logs(settings: &FileSettings, task: &str, mut request: TaskLogRequest) -> Result<()> {
    let conn = discovery::connect(settings).await?;
    request.task = resolve_task_id(&conn, task).await?;

    let logs = conn.client.get_task_logs(&request).await?;
    for event in &logs.events {
        println!("{}", event.msg.trim_end());
    }
    if let Some(total) = logs.total {
        eprintln!(
            "{} {} of {} events",
            "→".cyan(),
            logs.events.len(),
            total
        );
    }
    Ok(())
}

async fn lookup_ssh_details(
    conn: &Connection,
    task_id: &str,
    attempts: u32,
    interval: Duration,
) -> Result<Option<SshDetails>> {
    if attempts > 1 {
        eprintln!(
            "{} Waiting for the SSH server of {} (up to {} attempts)",
            "→".cyan(),
            task_id,
            attempts
        );
        wait_for_ssh_details(&conn.client, task_id, &LogPatternExtractor, attempts, interval).await
    } else {
        query_ssh_details(&conn.client, task_id, &LogPatternExtractor).await
    }
}

async fn ssh_details(
    settings: &FileSettings,
    task: &str,
    attempts: u32,
    interval: Duration,
    json: bool,
) -> Result<()> {
    let conn = discovery::connect(settings).await?;
    let task_id = resolve_task_id(&conn, task).await?;

    match lookup_ssh_details(&conn, &task_id, attempts, interval).await? {
        Some(details) if json => println!("{}", serde_json::to_string_pretty(&details)?),
        Some(details) => {
            println!("  IP address: {}", details.ip_address);
            println!("  Port:       {}", details.port);
            println!("  Username:   {}", details.username);
            println!("  Password:   {}", details.password);
        }
        None => eprintln!(
            "{} No SSH details in the logs of {} yet; the session may still be starting",
            "○".yellow(),
            task_id
        ),
    }
    Ok(())
}

async fn connect_session(settings: &FileSettings, task: &str, via: &str, wait: bool) -> Result<()> {
    let connector = create_connector(via).map_err(|e| SessionError::Settings {
        reason: e.to_string(),
    })?;

    let conn = discovery::connect(settings).await?;
    let task_id = resolve_task_id(&conn, task).await?;
    let attempts = if wait { 30 } else { 1 };

    let details = lookup_ssh_details(&conn, &task_id, attempts, Duration::from_secs(10))
        .await?
        .ok_or_else(|| SessionError::SshDetailsUnavailable {
            task_id: task_id.clone(),
        })?;

    connector
        .connect(&details)
        .await
        .map_err(|e| SessionError::Subprocess {
            command: connector.name().to_string(),
            reason: format!("{:#}", e),
        })
}

async fn attach(settings: &FileSettings, task: &str) -> Result<()> {
    let resolved = settings.settings()?;
    let interpreter = resolve_interpreter(&resolved.interpreter).ok_or(SessionError::PythonNotConfigured)?;

    let task_id = if is_full_task_id(task) {
        task.to_string()
    } else {
        let conn = discovery::connect(settings).await?;
        resolve_task_id(&conn, task).await?
    };

    let mut handle = attach_to_session(&interpreter, &task_id)?;
    let mut ctrl_c = std::pin::pin!(tokio::signal::ctrl_c());
    let mut interrupted = false;

    loop {
        tokio::select! {
            event = handle.events.recv() => match event {
                Some(AttachEvent::Output { line, stderr }) => {
                    if stderr {
                        eprintln!("{}", line.dimmed());
                    } else {
                        println!("{}", line.dimmed());
                    }
                }
                Some(AttachEvent::Connected(tunnel)) => {
                    println!(
                        "{} Tunnel up: ssh {}@localhost -p {} (password: {})",
                        "✓".green(),
                        tunnel.username,
                        tunnel.local_port,
                        tunnel.password
                    );
                }
                Some(AttachEvent::Retry { notice, count }) => {
                    eprintln!(
                        "{} Retry #{} connecting to {}:{}, next attempt in {}s",
                        "↻".yellow(),
                        count,
                        notice.target_ip_address,
                        notice.target_ssh_port,
                        notice.retry_wait_seconds
                    );
                }
                Some(AttachEvent::Exited { code }) => {
                    if interrupted || code == Some(0) {
                        return Ok(());
                    }
                    return Err(SessionError::Subprocess {
                        command: format!("{} -m clearml_session --attach {}", interpreter, task_id),
                        reason: match code {
                            Some(code) => format!("exited with status {}", code),
                            None => "terminated by a signal".to_string(),
                        },
                    });
                }
                None => return Ok(()),
            },
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                handle.abort();
            }
        }
    }
}

async fn session_url(settings: &FileSettings, task: &str) -> Result<()> {
    let conn = discovery::connect(settings).await?;
    let sessions = discover(&conn).await?;
    let session = find_session(&sessions, task)?;

    let web_server = conn.config.web_server(&conn.settings.clearml_config_file)?;
    let url = session_web_url(&web_server, session).ok_or_else(|| SessionError::NotFound {
        what: format!("Project of session {}", session.id),
    })?;
    println!("{}", url);
    Ok(())
}

async fn show_config(settings: &FileSettings) -> Result<()> {
    let resolved = settings.settings()?;
    let interpreter = resolve_interpreter(&resolved.interpreter);

    println!("{}", "Settings".cyan().bold());
    println!("  clearml_config_file: {}", resolved.clearml_config_file.display());
    println!(
        "  interpreter:         {}",
        interpreter
            .as_ref()
            .map(|i| i.to_string())
            .unwrap_or_else(|| "(not configured)".to_string())
    );
    println!("  project_name:        {}", resolved.project_name);
    println!("  session_name:        {}", resolved.session_name);
    println!("  statuses:            {}", resolved.statuses.join(", "));
    println!("  project_match:       {:?}", resolved.project_match);
    println!("  hocon_parser:        {:?}", resolved.hocon_parser);
    println!("  auth_style:          {:?}", resolved.auth_style);

    let parser = create_parser(resolved.hocon_parser, interpreter.as_ref())?;
    let config = ClearMlConfig::load(&resolved.clearml_config_file, parser.as_ref()).await?;
    let show = |v: &Option<String>| v.clone().unwrap_or_else(|| "(missing)".to_string());

    println!("{} ({} parser)", "clearml.conf".cyan().bold(), parser.name());
    println!("  api_server:   {}", show(&config.api.api_server));
    println!("  web_server:   {}", show(&config.api.web_server));
    println!("  files_server: {}", show(&config.api.files_server));
    println!("  access_key:   {}", show(&config.api.access_key));
    println!(
        "  secret_key:   {}",
        config
            .api
            .secret_key
            .as_deref()
            .map(|s| mask_secret(s, 4))
            .unwrap_or_else(|| "(missing)".to_string())
    );
    Ok(())
}

async fn install_deps(settings: &FileSettings, install: bool) -> Result<()> {
    let resolved = settings.settings()?;
    let interpreter = resolve_interpreter(&resolved.interpreter).ok_or(SessionError::PythonNotConfigured)?;

    let missing = missing_packages(&interpreter, &REQUIRED_PACKAGES).await?;
    if missing.is_empty() {
        println!("{} All packages present in {}", "✓".green(), interpreter);
        return Ok(());
    }

    if !install {
        println!("{} Missing: {}", "○".yellow(), missing.join(", "));
        println!("  Run with --install to install them into {}", interpreter);
        return Ok(());
    }

    install_packages(&interpreter, &missing).await?;
    println!("{} Installed {}", "✓".green(), missing.join(", "));
    Ok(())
}
