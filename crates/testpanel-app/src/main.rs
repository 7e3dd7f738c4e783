use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use integration_youtrack::{YouTrackClient, YouTrackConfig, ENV_YOUTRACK_TOKEN, ENV_YOUTRACK_URL};
use testpanel_app::spawn_controller;
use testpanel_config::{config_path_from_env, PanelConfig};
use testpanel_core::{CoreError, Reconciler, TrackerClient};
use testpanel_ui::Ui;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = parse_cli_flags()?;
    let config_path = cli.config.unwrap_or_else(config_path_from_env);
    let config = PanelConfig::load(&config_path)?;
    init_file_logging(&config_path)?;

    let token = required_env(ENV_YOUTRACK_TOKEN)?;
    let base_url = resolve_base_url(&config)?;
    let youtrack_config =
        YouTrackConfig::from_settings(base_url, token, config.youtrack.request_timeout_secs)?;
    let client = YouTrackClient::new(youtrack_config)?;
    client.health_check().await?;

    let client: Arc<dyn TrackerClient> = Arc::new(client);
    let reconciler =
        Reconciler::with_create_concurrency(client, config.reconcile.create_concurrency);
    let (handle, controller) = spawn_controller(reconciler);

    let poll_timeout = Duration::from_millis(config.ui.tick_interval_ms);
    let mut ui = Ui::init()?;
    let ui_result = ui.run(handle, poll_timeout);
    drop(ui);

    // The UI dropped its command sender, so the controller task winds down
    // on its own once any in-flight call finishes.
    if let Err(error) = controller.await {
        tracing::warn!(error = %error, "controller task did not exit cleanly");
    }

    ui_result?;
    Ok(())
}

fn init_file_logging(config_path: &Path) -> Result<(), CoreError> {
    let log_path = log_file_path(config_path);
    if let Some(parent) = log_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|error| {
                CoreError::Configuration(format!(
                    "failed to create testpanel log directory '{}': {error}",
                    parent.display()
                ))
            })?;
        }
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|error| {
            CoreError::Configuration(format!(
                "failed to open testpanel log file '{}': {error}",
                log_path.display()
            ))
        })?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(log_file))
        .init();

    Ok(())
}

fn log_file_path(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .join("testpanel.log")
}

#[derive(Debug, Default)]
struct CliFlags {
    config: Option<PathBuf>,
}

fn parse_cli_flags() -> Result<CliFlags, CoreError> {
    parse_cli_args(std::env::args().skip(1))
}

fn parse_cli_args(args: impl IntoIterator<Item = String>) -> Result<CliFlags, CoreError> {
    let mut flags = CliFlags::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let value = args.next().ok_or_else(|| {
                    CoreError::Configuration(
                        "Missing value after --config. Use --config <path>.".to_owned(),
                    )
                })?;
                let value = value.trim().to_owned();
                if value.is_empty() {
                    return Err(CoreError::Configuration(
                        "Flag '--config' requires a non-empty value.".to_owned(),
                    ));
                }
                flags.config = Some(PathBuf::from(value));
            }
            "--help" | "-h" => {
                print_cli_help();
                std::process::exit(0);
            }
            value if value.starts_with("--") => {
                return Err(CoreError::Configuration(format!(
                    "Unknown flag '{value}'. Run with --help for valid flags."
                )));
            }
            unknown => {
                return Err(CoreError::Configuration(format!(
                    "Unexpected argument '{unknown}'. Run with --help for valid flags."
                )));
            }
        }
    }

    Ok(flags)
}

fn print_cli_help() {
    println!("Usage: testpanel [--config <path>]");
    println!();
    println!("  --config <path>   Path to the TOML config file (default ./testpanel.toml,");
    println!("                    or the TESTPANEL_CONFIG environment variable)");
    println!("  --help            Show this help message");
}

fn required_env(name: &str) -> Result<String, CoreError> {
    let value = std::env::var(name).map_err(|_| {
        CoreError::Configuration(format!(
            "{name} is not set. Export a valid value before starting testpanel."
        ))
    })?;
    let value = value.trim().to_owned();
    if value.is_empty() {
        return Err(CoreError::Configuration(format!(
            "{name} is empty. Provide a non-empty value."
        )));
    }
    Ok(value)
}

/// Base URL resolution order: environment override, then the config file.
fn resolve_base_url(config: &PanelConfig) -> Result<String, CoreError> {
    if let Ok(value) = std::env::var(ENV_YOUTRACK_URL) {
        let value = value.trim();
        if !value.is_empty() {
            return Ok(value.to_owned());
        }
    }

    let value = config.youtrack.base_url.trim();
    if value.is_empty() {
        return Err(CoreError::Configuration(format!(
            "{ENV_YOUTRACK_URL} is not set and youtrack.base_url is empty. Configure one of them."
        )));
    }
    Ok(value.to_owned())
}
