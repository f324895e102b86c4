//! svcman: start, stop and watch shell-defined services from a console.
//!
//! This is the entry point of the application. It parses command-line arguments,
//! loads configuration and the service definitions, and either runs a one-shot
//! command or the main event loop that supervises services interactively.

mod console;
mod events;

use std::collections::HashSet;
use std::io::{BufRead, IsTerminal};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::builder::styling::{AnsiColor, Effects, Style};
use clap::builder::Styles;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use svcman::config::{self, Config, DEFAULT_SERVICES_FILE};
use svcman::output::DEFAULT_MAX_LINES;
use svcman::probe::{LivenessProber, ProbeBackend};
use svcman::shell::ShellLocator;
use svcman::translate::normalize_command;
use svcman::{Dialect, ServiceRegistry, Supervisor, SupervisorOptions};

use crate::console::{format_tool_message, status_label, status_table, ConsoleView};
use crate::events::{ConsoleCommand, Event, ShutdownSignal, HELP};

const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(
    name = "svcman",
    version,
    about = "Start, stop and watch shell-defined services",
    styles = help_styles(),
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to svcman.toml configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Ignore any svcman.toml in the current directory.
    #[arg(long, global = true)]
    no_config: bool,
    /// Service definition file (name;command per line).
    #[arg(long, global = true)]
    services: Option<PathBuf>,
    /// Max output lines kept per service.
    #[arg(long, global = true)]
    max_lines: Option<usize>,
    /// Status polling interval (ms).
    #[arg(long, global = true)]
    poll_ms: Option<u64>,
    /// Shell binary used to run commands; skips probing.
    #[arg(long, global = true)]
    shell: Option<PathBuf>,
    /// Treat `_name` entries as ordinary services.
    #[arg(long, global = true)]
    plain: bool,
    /// Strip ANSI escape codes from printed output.
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List services with their normalized commands.
    List,
    /// Print whether each service is running.
    Status {
        /// Emit a JSON array instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Start services and watch their output (all when no name is given).
    Run { names: Vec<String> },
    /// Run the stop commands of services (all when no name is given).
    Stop { names: Vec<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = load_config(&cli)?;
    let settings = RunSettings::from_cli(&cli, config);
    let registry = ServiceRegistry::load(&settings.services_path, settings.dialect)?;
    if registry.is_empty() {
        bail!(
            "no services defined (add name;command lines to {})",
            settings.services_path.display()
        );
    }
    let supervisors: Vec<Supervisor> = registry
        .into_iter()
        .map(|definition| Supervisor::new(definition, &settings.options))
        .collect();

    match &cli.command {
        Commands::List => {
            for line in list_lines(&supervisors) {
                println!("{}", line);
            }
            Ok(())
        }
        Commands::Status { json } => print_status(&supervisors, *json).await,
        Commands::Run { names } => run_services(&supervisors, names, &settings).await,
        Commands::Stop { names } => stop_services(&supervisors, names, &settings).await,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    if cli.no_config {
        return Ok(Config::default());
    }
    let config_path = cli.config.clone().or_else(config::default_config_path);
    match config_path {
        Some(path) => config::load_config(&path),
        None => Ok(Config::default()),
    }
}

/// Runtime configuration derived from CLI arguments and the config file.
#[derive(Debug, Clone)]
struct RunSettings {
    services_path: PathBuf,
    dialect: Dialect,
    poll_interval: Duration,
    strip_ansi: bool,
    options: SupervisorOptions,
}

impl RunSettings {
    fn from_cli(cli: &Cli, config: Config) -> Self {
        let services_path = cli
            .services
            .clone()
            .or(config.services)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SERVICES_FILE));
        let dialect = if cli.plain {
            Dialect::Plain
        } else {
            config.dialect.unwrap_or_default()
        };
        let poll_ms = cli
            .poll_ms
            .or(config.poll_interval_ms)
            .unwrap_or(DEFAULT_POLL_INTERVAL_MS)
            .max(1);
        let strip_ansi = cli.no_color || !std::io::stdout().is_terminal();

        // An explicit shell is still located so a wrong path is reported.
        let locator = match (cli.shell.clone().or(config.shell), config.shell_candidates) {
            (Some(shell), _) => ShellLocator::new(vec![shell]),
            (None, Some(candidates)) => ShellLocator::new(candidates),
            (None, None) => ShellLocator::default(),
        };
        let probe = config.probe.unwrap_or_else(ProbeBackend::host_default);
        let options = SupervisorOptions {
            max_lines: cli
                .max_lines
                .or(config.max_lines)
                .unwrap_or(DEFAULT_MAX_LINES),
            locator,
            shell: None,
            prober: LivenessProber::new(probe.table()),
        };

        Self {
            services_path,
            dialect,
            poll_interval: Duration::from_millis(poll_ms),
            strip_ansi,
            options,
        }
    }
}

fn list_lines(supervisors: &[Supervisor]) -> Vec<String> {
    let width = supervisors
        .iter()
        .map(|s| s.name().chars().count())
        .max()
        .unwrap_or(0);
    let mut lines = Vec::new();
    for supervisor in supervisors {
        let definition = supervisor.definition();
        lines.push(format!(
            "{:<width$}  start: {}",
            definition.name(),
            normalize_command(definition.start_command()),
            width = width
        ));
        if let Some(stop) = definition.stop_command() {
            lines.push(format!(
                "{:<width$}  stop:  {}",
                "",
                normalize_command(stop),
                width = width
            ));
        }
    }
    lines
}

#[derive(Debug, Serialize)]
struct StatusReport {
    name: String,
    status: &'static str,
    running: bool,
}

async fn print_status(supervisors: &[Supervisor], json: bool) -> Result<()> {
    if !json {
        for line in status_table(supervisors).await {
            println!("{}", line);
        }
        return Ok(());
    }
    let mut reports = Vec::with_capacity(supervisors.len());
    for supervisor in supervisors {
        let running = supervisor.is_running().await;
        reports.push(StatusReport {
            name: supervisor.name().to_string(),
            status: status_label(running),
            running,
        });
    }
    let rendered = serde_json::to_string_pretty(&reports).context("failed to encode status")?;
    println!("{}", rendered);
    Ok(())
}

fn select_services<'a>(supervisors: &'a [Supervisor], names: &[String]) -> Result<Vec<&'a Supervisor>> {
    if names.is_empty() {
        return Ok(supervisors.iter().collect());
    }
    names
        .iter()
        .map(|name| {
            find_service(supervisors, name)
                .with_context(|| format!("unknown service: {}", name))
        })
        .collect()
}

fn find_service<'a>(supervisors: &'a [Supervisor], name: &str) -> Option<&'a Supervisor> {
    supervisors.iter().find(|s| s.name() == name)
}

async fn stop_services(
    supervisors: &[Supervisor],
    names: &[String],
    settings: &RunSettings,
) -> Result<()> {
    let selected = select_services(supervisors, names)?;
    let mut view = ConsoleView::new(supervisors, settings.strip_ansi);
    let mut pending = Vec::new();
    for supervisor in selected {
        if supervisor.definition().stop_command().is_none() {
            println!(
                "{}",
                format_tool_message(&format!("{}: no stop command configured", supervisor.name()))
            );
        }
        pending.extend(supervisor.stop());
    }
    await_stop_tasks(pending).await;
    for line in view.poll(supervisors).await {
        println!("{}", line);
    }
    Ok(())
}

async fn await_stop_tasks(tasks: Vec<JoinHandle<()>>) {
    for task in tasks {
        if let Err(err) = task.await {
            debug!(error = %err, "stop command task did not finish");
        }
    }
}

async fn run_services(
    supervisors: &[Supervisor],
    names: &[String],
    settings: &RunSettings,
) -> Result<()> {
    let selected = select_services(supervisors, names)?;
    let (event_tx, mut event_rx) = mpsc::channel(64);
    spawn_signal_listener(event_tx.clone());
    spawn_stdin_listener(event_tx.clone());

    let mut view = ConsoleView::new(supervisors, settings.strip_ansi);
    let mut active: HashSet<String> = HashSet::new();
    for supervisor in selected {
        supervisor.start();
        active.insert(supervisor.name().to_string());
    }

    let mut ticker = tokio::time::interval(settings.poll_interval);
    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => match event {
                Event::Command(command) => {
                    if handle_command(command, supervisors, &mut active, &view).await {
                        break;
                    }
                }
                Event::InputClosed => debug!("stdin closed, keep running until a signal"),
                Event::Shutdown { signal } => {
                    info!(signal = signal.label(), "shutting down");
                    println!(
                        "{}",
                        format_tool_message(&format!("received {}, stopping services", signal.label()))
                    );
                    break;
                }
            },
            _ = ticker.tick() => {
                for line in view.poll(supervisors).await {
                    println!("{}", line);
                }
            }
        }
    }

    let mut pending = Vec::new();
    for supervisor in supervisors {
        if active.contains(supervisor.name()) || supervisor.is_tracked_alive() {
            pending.extend(supervisor.stop());
        }
    }
    await_stop_tasks(pending).await;
    for line in view.poll(supervisors).await {
        println!("{}", line);
    }
    Ok(())
}

// Returns true when the loop should exit.
async fn handle_command(
    command: ConsoleCommand,
    supervisors: &[Supervisor],
    active: &mut HashSet<String>,
    view: &ConsoleView,
) -> bool {
    match command {
        ConsoleCommand::Start(name) => {
            for supervisor in targets(supervisors, name.as_deref()) {
                supervisor.start();
                active.insert(supervisor.name().to_string());
            }
        }
        ConsoleCommand::Stop(name) => {
            for supervisor in targets(supervisors, name.as_deref()) {
                // The stop command finishes in the background; its output
                // shows up on a later poll.
                drop(supervisor.stop());
                active.remove(supervisor.name());
            }
        }
        ConsoleCommand::Status => {
            for line in status_table(supervisors).await {
                println!("{}", line);
            }
        }
        ConsoleCommand::Output(name) => match find_service(supervisors, &name) {
            Some(supervisor) => {
                for line in view.dump(supervisor) {
                    println!("{}", line);
                }
            }
            None => eprintln!("unknown service: {}", name),
        },
        ConsoleCommand::Help => println!("{}", HELP),
        ConsoleCommand::Quit => return true,
    }
    false
}

fn targets<'a>(supervisors: &'a [Supervisor], name: Option<&str>) -> Vec<&'a Supervisor> {
    match name {
        None => supervisors.iter().collect(),
        Some(name) => match find_service(supervisors, name) {
            Some(supervisor) => vec![supervisor],
            None => {
                eprintln!("unknown service: {}", name);
                Vec::new()
            }
        },
    }
}

fn spawn_signal_listener(tx: mpsc::Sender<Event>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(_) => return,
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    let _ = tx.send(Event::Shutdown { signal: ShutdownSignal::Interrupt }).await;
                }
                _ = sigterm.recv() => {
                    let _ = tx.send(Event::Shutdown { signal: ShutdownSignal::Terminate }).await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            let _ = tx
                .send(Event::Shutdown {
                    signal: ShutdownSignal::Interrupt,
                })
                .await;
        }
    });
}

fn spawn_stdin_listener(tx: mpsc::Sender<Event>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if line.trim().is_empty() {
                continue;
            }
            match line.parse::<ConsoleCommand>() {
                Ok(command) => {
                    if tx.blocking_send(Event::Command(command)).is_err() {
                        return;
                    }
                }
                Err(message) => eprintln!("{}", message),
            }
        }
        let _ = tx.blocking_send(Event::InputClosed);
    });
}

fn help_styles() -> Styles {
    Styles::styled()
        .header(
            Style::new()
                .fg_color(Some(AnsiColor::Cyan.into()))
                .effects(Effects::BOLD),
        )
        .usage(
            Style::new()
                .fg_color(Some(AnsiColor::Green.into()))
                .effects(Effects::BOLD),
        )
        .literal(Style::new().fg_color(Some(AnsiColor::Yellow.into())))
        .placeholder(Style::new().fg_color(Some(AnsiColor::Magenta.into())))
        .invalid(
            Style::new()
                .fg_color(Some(AnsiColor::Red.into()))
                .effects(Effects::BOLD),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use svcman::ServiceDefinition;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("svcman").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn cli_flags_override_config() {
        let cli = parse(&["--max-lines", "10", "--plain", "--shell", "/bin/sh", "status"]);
        let config = Config {
            services: Some(PathBuf::from("conf/services.txt")),
            max_lines: Some(99),
            poll_interval_ms: Some(250),
            dialect: Some(Dialect::StopAware),
            shell_candidates: Some(vec![PathBuf::from("/opt/bash")]),
            ..Config::default()
        };
        let settings = RunSettings::from_cli(&cli, config);
        assert_eq!(settings.services_path, PathBuf::from("conf/services.txt"));
        assert_eq!(settings.options.max_lines, 10);
        assert_eq!(settings.poll_interval, Duration::from_millis(250));
        assert_eq!(settings.dialect, Dialect::Plain);
        assert_eq!(settings.options.locator.candidates(), [PathBuf::from("/bin/sh")]);
    }

    #[test]
    fn defaults_apply_without_config() {
        let cli = parse(&["run", "api", "web"]);
        assert!(matches!(&cli.command, Commands::Run { names } if names.len() == 2));
        let settings = RunSettings::from_cli(&cli, Config::default());
        assert_eq!(settings.services_path, PathBuf::from(DEFAULT_SERVICES_FILE));
        assert_eq!(settings.options.max_lines, DEFAULT_MAX_LINES);
        assert_eq!(
            settings.poll_interval,
            Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)
        );
        assert_eq!(settings.dialect, Dialect::StopAware);
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = parse(&["status", "--json", "--no-config", "--no-color"]);
        assert!(matches!(cli.command, Commands::Status { json: true }));
        assert!(cli.no_config);
        assert!(cli.no_color);
    }

    #[test]
    fn select_rejects_unknown_names() {
        let options = SupervisorOptions::default();
        let supervisors = vec![
            Supervisor::new(ServiceDefinition::new("api", "run-api"), &options),
            Supervisor::new(ServiceDefinition::new("web", "run-web"), &options),
        ];
        assert_eq!(select_services(&supervisors, &[]).unwrap().len(), 2);
        let picked = select_services(&supervisors, &["web".to_string()]).unwrap();
        assert_eq!(picked[0].name(), "web");
        let err = select_services(&supervisors, &["db".to_string()]).unwrap_err();
        assert_eq!(err.to_string(), "unknown service: db");
    }

    #[test]
    fn list_aligns_non_ascii_names() {
        let options = SupervisorOptions::default();
        let supervisors = vec![
            Supervisor::new(ServiceDefinition::new("café", "run-cafe"), &options),
            Supervisor::new(ServiceDefinition::new("db", "run-db"), &options),
        ];
        assert_eq!(
            list_lines(&supervisors),
            vec!["café  start: run-cafe", "db    start: run-db"]
        );
    }

    #[test]
    fn list_shows_normalized_commands() {
        let options = SupervisorOptions::default();
        let supervisors = vec![Supervisor::new(
            ServiceDefinition::new("db", r"C:\bin\mysqld --port 3306")
                .with_stop_command(r"C:\bin\mysqladmin shutdown"),
            &options,
        )];
        assert_eq!(
            list_lines(&supervisors),
            vec![
                "db  start: /c/bin/mysqld --port 3306",
                "    stop:  /c/bin/mysqladmin shutdown",
            ]
        );
    }
}
