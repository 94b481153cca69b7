//! neurocap - command-line front end for the study client
//!
//! Drives the coordinator and the job tracker and prints every notification
//! the core publishes.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use neurocap_client::cache::PatientPage;
use neurocap_client::models::RecordingScope;
use neurocap_client::StudyClient;
use neurocap_common::config::{
    default_config_path, write_toml_config, ConfigResolver, LoggingConfig, TomlConfig, API_URL_ENV,
};
use neurocap_common::events::{ClientEvent, JobState, Notification, NotificationLevel};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "neurocap")]
#[command(about = "Clinical study data client")]
#[command(version)]
struct Args {
    /// Study server base URL
    #[arg(long, env = API_URL_ENV)]
    api_url: Option<String>,

    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List one page of patients
    Patients {
        #[arg(long, default_value_t = 0)]
        skip: usize,
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Create a patient
    CreatePatient { study_identifier: String },
    /// Delete a patient and everything under it
    DeletePatient { patient_id: i64 },
    /// Run feature extraction for a recording and wait for it
    Extract {
        #[arg(long)]
        patient: i64,
        #[arg(long)]
        assessment: i64,
        #[arg(long)]
        recording: i64,
    },
    /// Write the effective configuration to a TOML file
    InitConfig {
        /// Target file (platform config path if omitted)
        path: Option<PathBuf>,
    },
    /// Export patients or features as CSV
    Export {
        #[arg(value_enum)]
        what: ExportKind,
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ExportKind {
    Patients,
    Features,
}

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let registry = tracing_subscriber::registry().with(filter);

    match &logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            registry
                .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .init();
        }
        None => {
            registry
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
    Ok(())
}

fn render_notification(notification: &Notification) -> String {
    let tag = match notification.level {
        NotificationLevel::Success => "ok",
        NotificationLevel::Info => "info",
        NotificationLevel::Error => "error",
    };
    format!("[{}] {}", tag, notification.message)
}

/// Write notifications as they are published until `shutdown` fires
///
/// Events already queued when `shutdown` fires are still written.
async fn print_notifications<W: Write>(
    mut events: broadcast::Receiver<ClientEvent>,
    shutdown: CancellationToken,
    mut out: W,
) -> W {
    loop {
        tokio::select! {
            biased;
            received = events.recv() => match received {
                Ok(event) => {
                    if let Some(notification) = event.notification() {
                        if let Err(e) = writeln!(out, "{}", render_notification(notification)) {
                            warn!("Failed to print notification: {}", e);
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Notification printer fell behind");
                }
                Err(RecvError::Closed) => break,
            },
            _ = shutdown.cancelled() => break,
        }
    }
    out
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let resolver = match &args.config {
        Some(path) => ConfigResolver::with_path(path),
        None => ConfigResolver::new(),
    };
    let config = resolver.resolve(args.api_url.as_deref());
    init_logging(&config.logging)?;

    info!("Starting neurocap {}", env!("CARGO_PKG_VERSION"));

    if let Command::InitConfig { path } = &args.command {
        return init_config(&config, path.clone());
    }
    let client = StudyClient::from_config(&config).context("Failed to build study client")?;

    let shutdown = CancellationToken::new();
    let printer = tokio::spawn(print_notifications(
        client.bus().subscribe(),
        shutdown.clone(),
        std::io::stdout(),
    ));

    let outcome = run(&client, args.command).await;

    client.tracker().abandon_all();
    shutdown.cancel();
    if let Err(e) = printer.await {
        warn!("Notification printer stopped abnormally: {}", e);
    }
    outcome
}

fn init_config(config: &TomlConfig, path: Option<PathBuf>) -> Result<()> {
    let path = path
        .or_else(default_config_path)
        .context("Could not determine config directory")?;
    write_toml_config(config, &path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("{}", path.display());
    Ok(())
}

async fn run(client: &StudyClient, command: Command) -> Result<()> {
    let coordinator = client.coordinator();

    match command {
        Command::Patients { skip, limit } => {
            let page = PatientPage {
                skip,
                limit: limit.max(1),
            };
            let patients = coordinator.load_patients(page).await?;
            for patient in patients.iter() {
                println!(
                    "{}\t{}\t{}",
                    patient.patient_id,
                    patient.study_identifier,
                    patient.created_at.to_rfc3339()
                );
            }
        }
        Command::CreatePatient { study_identifier } => {
            let outcome = coordinator.create_patient(&study_identifier).await?;
            println!("{}", outcome.entity.patient_id);
        }
        Command::DeletePatient { patient_id } => {
            coordinator.delete_patient(patient_id).await?;
        }
        Command::Extract {
            patient,
            assessment,
            recording,
        } => {
            let scope = RecordingScope::new(patient, assessment, recording);
            let handle = client.tracker().start_extraction(scope).await?;

            let mut updates = handle.subscribe();
            loop {
                let snapshot = updates.borrow_and_update().clone();
                if snapshot.state == JobState::Running {
                    eprintln!("progress {:>3.0}%", snapshot.progress * 100.0);
                }
                if snapshot.state.is_finished() {
                    break;
                }
                if updates.changed().await.is_err() {
                    break;
                }
            }

            let finished = handle.wait_finished().await;
            if let Some(features) = client.cache().features(recording).await {
                for feature in features.iter() {
                    println!("{}\t{}", feature.feature_name, feature.value);
                }
            }
            if finished.state != JobState::Completed {
                anyhow::bail!("Extraction ended in state {:?}", finished.state);
            }
        }
        Command::InitConfig { .. } => {}
        Command::Export { what, output } => {
            let csv = match what {
                ExportKind::Patients => coordinator.export_patients_csv().await?,
                ExportKind::Features => coordinator.export_features_csv().await?,
            };
            match output {
                Some(path) => std::fs::write(&path, csv)
                    .with_context(|| format!("Failed to write {}", path.display()))?,
                None => print!("{}", csv),
            }
        }
    }
    Ok(())
}
