use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use domour_core::{ApplyOutcome, ElevationCredential, UpdateProgress};
use domour_vlink::{StartOutcome, StopOutcome};
use log::{error, info, warn};
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

mod app;
mod chat;
mod error;
mod logging;
mod settings;
mod single_instance;

use app::App;
use chat::Attachment;
use error::AppError;
use settings::AppSettings;
use single_instance::SingleInstance;

const PASSWORD_ENV: &str = "DOMOUR_ELEVATION_PASSWORD";

/// Domour Copilot: vlink helper supervisor and self-updater
#[derive(Parser, Debug)]
#[command(name = "domour-copilot")]
#[command(about = "Domour Copilot: vlink helper supervisor and self-updater", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Stay in the foreground until Ctrl-C (default)
    Run {
        /// Start the helper even if auto-start is off in settings
        #[arg(long)]
        start_helper: bool,
    },

    /// Start the vlink helper and keep it running until Ctrl-C
    StartHelper,

    /// Show whether the helper is installed and reachable
    Status,

    /// Update this application (default: latest)
    Update {
        /// Version to install (e.g., v1.4.0)
        #[arg(long)]
        version: Option<String>,
    },

    /// Download and install the vlink helper (default: latest)
    InstallHelper {
        /// Version to install (e.g., v2.1.0)
        #[arg(long)]
        version: Option<String>,
    },

    /// Print the helper configuration, or replace it with FILE
    HelperConfig {
        #[arg(long, value_name = "FILE")]
        set: Option<PathBuf>,
    },

    /// Print the application settings, or replace them with the JSON in FILE
    Settings {
        #[arg(long, value_name = "FILE")]
        set: Option<PathBuf>,
    },

    /// Send a prompt to the Gemini CLI
    Chat {
        prompt: String,

        /// Attach a file to the prompt (repeatable)
        #[arg(long = "attach", value_name = "FILE")]
        attachments: Vec<PathBuf>,
    },

    /// Print version information
    About,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let app = match App::new() {
        Ok(app) => app,
        Err(error) => {
            eprintln!("error: {error}");
            return ExitCode::FAILURE;
        }
    };
    let settings = app.settings();
    logging::init_logging(
        &app.paths().log_file(),
        settings.debug_logging,
        settings.max_log_size_bytes,
    );

    let command = cli.command.unwrap_or(Commands::Run {
        start_helper: false,
    });
    match run(&app, command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!("{error}");
            eprintln!("error: {error}");
            if let Some(hint) = hint_for(&error) {
                eprintln!("{hint}");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(app: &App, command: Commands) -> Result<(), AppError> {
    match command {
        Commands::Run { start_helper } => run_foreground(app, start_helper).await,
        Commands::StartHelper => {
            report_start(app.start_helper().await?);
            wait_for_ctrl_c().await?;
            report_stop(app.stop_helper().await);
            Ok(())
        }
        Commands::Status => {
            let status = app.helper_status().await;
            println!("installed:  {}", status.installed);
            println!("supervisor: {}", status.state);
            println!("port alive: {}", status.port_alive);
            Ok(())
        }
        Commands::Update { version } => {
            let (progress, printer) = spawn_progress_printer();
            let result = app
                .update_application(version.as_deref().unwrap_or_default(), &progress)
                .await;
            drop(progress);
            let _ = printer.await;
            report_outcome(&result?);
            Ok(())
        }
        Commands::InstallHelper { version } => {
            let credential = elevation_credential(app).await?;
            let (progress, printer) = spawn_progress_printer();
            let result = app
                .install_helper(
                    version.as_deref().unwrap_or_default(),
                    credential,
                    &progress,
                )
                .await;
            drop(progress);
            let _ = printer.await;
            report_outcome(&result?);
            Ok(())
        }
        Commands::HelperConfig { set } => {
            let config = match set {
                Some(file) => {
                    let content = std::fs::read_to_string(&file)
                        .map_err(|error| AppError::io("failed to read config file", error))?;
                    app.save_helper_config(&content)?
                }
                None => app.helper_config()?,
            };
            println!("# {}", config.path.display());
            print!("{}", config.content);
            Ok(())
        }
        Commands::Settings { set } => {
            if let Some(file) = set {
                let content = std::fs::read_to_string(&file)
                    .map_err(|error| AppError::io("failed to read settings file", error))?;
                let next: AppSettings = serde_json::from_str(&content).map_err(|error| {
                    AppError::io("invalid settings file", std::io::Error::other(error))
                })?;
                app.save_settings(next)?;
                logging::set_logging_enabled(app.settings().debug_logging);
            }
            let rendered = serde_json::to_string_pretty(&app.settings())
                .map_err(|error| AppError::io("failed to render settings", error.into()))?;
            println!("{rendered}");
            Ok(())
        }
        Commands::Chat {
            prompt,
            attachments,
        } => {
            let attachments = attachments
                .iter()
                .map(|path| Attachment::from_file(path))
                .collect::<Result<Vec<_>, _>>()?;
            let reply = app.chat(&prompt, &attachments).await?;
            println!("{reply}");
            Ok(())
        }
        Commands::About => {
            println!("{}", App::about());
            Ok(())
        }
    }
}

async fn run_foreground(app: &App, start_helper: bool) -> Result<(), AppError> {
    let _instance = SingleInstance::acquire(&app.paths().instance_lock_file())?;
    domour_core::cleanup_stale_backup();
    let settings = app.settings();
    info!("{} starting", settings.display_name);

    if settings.auto_update {
        match app.check_for_update().await {
            Ok(Some(latest)) => {
                println!("Update available: {latest} (run `domour-copilot update`)");
            }
            Ok(None) => info!("Already on the latest version"),
            Err(error) => warn!("Update check failed: {error}"),
        }
    }

    if start_helper || settings.vlink_auto_start {
        match app.start_helper().await {
            Ok(outcome) => report_start(outcome),
            Err(error) => {
                warn!("Helper not started: {error}");
                eprintln!("Helper not started: {error}");
                if let Some(hint) = hint_for(&error) {
                    eprintln!("{hint}");
                }
            }
        }
    }

    println!("{} is running, press Ctrl-C to quit", settings.display_name);
    wait_for_ctrl_c().await?;
    report_stop(app.stop_helper().await);
    Ok(())
}

async fn wait_for_ctrl_c() -> Result<(), AppError> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|error| AppError::io("failed to listen for Ctrl-C", error))
}

async fn elevation_credential(app: &App) -> Result<Option<ElevationCredential>, AppError> {
    if !app.helper_install_needs_credential() {
        return Ok(None);
    }
    if let Ok(secret) = std::env::var(PASSWORD_ENV) {
        return Ok(ElevationCredential::new(&secret));
    }

    eprint!("Administrator password: ");
    let _ = std::io::stderr().flush();
    let mut line = String::new();
    tokio::io::BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .map_err(|error| AppError::io("failed to read password", error))?;
    Ok(ElevationCredential::new(&line))
}

fn spawn_progress_printer() -> (mpsc::Sender<UpdateProgress>, JoinHandle<()>) {
    let (sender, mut receiver) = mpsc::channel(32);
    let printer = tokio::spawn(async move {
        let mut last_percent = None;
        while let Some(event) = receiver.recv().await {
            match event {
                UpdateProgress::Resolving => eprintln!("Resolving latest version..."),
                UpdateProgress::Downloading { downloaded, total } if total > 0 => {
                    let percent = downloaded.saturating_mul(100) / total;
                    if last_percent != Some(percent) {
                        last_percent = Some(percent);
                        eprint!("\rDownloading... {percent}%");
                    }
                }
                UpdateProgress::Downloading { .. } => {}
                UpdateProgress::Verifying => eprintln!("\nVerifying checksum..."),
                UpdateProgress::Extracting => eprintln!("\nExtracting..."),
                UpdateProgress::Applying => eprintln!("Installing..."),
                UpdateProgress::Complete(_) | UpdateProgress::Failed(_) => {}
            }
        }
    });
    (sender, printer)
}

fn report_outcome(outcome: &ApplyOutcome) {
    match outcome {
        ApplyOutcome::RestartRequired { version } => {
            println!("Updated to {version}. Restart Domour Copilot to use it.");
        }
        ApplyOutcome::HelperInstalled { version, path } => {
            println!("vlink {version} installed at {}", path.display());
        }
    }
}

fn report_start(outcome: StartOutcome) {
    match outcome {
        StartOutcome::Started { pid } => match pid {
            Some(pid) => println!("vlink started (pid {pid})"),
            None => println!("vlink started"),
        },
        StartOutcome::AlreadyRunning { .. } => println!("vlink is already running"),
    }
}

fn report_stop(outcome: StopOutcome) {
    match outcome {
        StopOutcome::NotRunning => {}
        StopOutcome::Exited => println!("vlink stopped"),
        StopOutcome::Killed => println!("vlink did not exit in time and was killed"),
    }
}

fn hint_for(error: &AppError) -> Option<String> {
    if !error.is_actionable() {
        return None;
    }
    match error {
        AppError::Supervisor(domour_vlink::SupervisorError::ConfigRequired(config)) => Some(
            format!(
                "Edit {} (or run `domour-copilot helper-config --set FILE`), then start again.",
                config.path.display()
            ),
        ),
        _ => Some(format!(
            "Set {PASSWORD_ENV} or enter the administrator password when prompted."
        )),
    }
}
