//! deployd - Entry Point
//!
//! Remote deployment daemon: serves the HTTPS API that builds, runs and
//! tears down the project it tracks.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use deployd::app::options::AppOptions;
use deployd::app::run::{mint_api_token, run};
use deployd::errors::DaemonError;
use deployd::filesys::file::File;
use deployd::logs::{init_logging, LogLevel, LogOptions};
use deployd::storage::layout::StorageLayout;
use deployd::storage::settings::Settings;
use deployd::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(version) => println!("{}", version),
            Err(e) => eprintln!("Unable to print version: {e}"),
        }
        return ExitCode::SUCCESS;
    }

    let settings = match load_settings(&cli_args).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings: {e}");
            return ExitCode::FAILURE;
        }
    };
    let options = match AppOptions::from_settings(&settings) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("Invalid settings: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Mint an admin API token and exit
    if cli_args.contains_key("token") {
        return match mint_api_token(&options).await {
            Ok(token) => {
                println!("{}", token);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Unable to create API token: {e}");
                ExitCode::FAILURE
            }
        };
    }

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level,
        json_format: settings.json_logs,
        log_dir: Some(options.storage.layout.logs_dir().path().to_path_buf()),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    info!(
        host = %options.server.host,
        port = options.server.port,
        base_dir = %settings.base_dir.display(),
        "Running deployd {}",
        version_info().version
    );
    match run(options, await_shutdown_signal()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Failed to run the daemon: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Settings file plus command-line overrides
async fn load_settings(cli_args: &HashMap<String, String>) -> Result<Settings, DaemonError> {
    let base_dir = cli_args.get("base-dir").map(PathBuf::from);
    let settings_file = match (cli_args.get("settings"), &base_dir) {
        (Some(path), _) => File::new(path),
        (None, Some(dir)) => StorageLayout::new(dir.clone()).settings_file(),
        (None, None) => StorageLayout::default().settings_file(),
    };

    let mut settings = settings_file
        .read_json_opt::<Settings>()
        .await?
        .unwrap_or_default();

    if let Some(dir) = base_dir {
        settings.base_dir = dir;
    }
    if let Some(host) = cli_args.get("host") {
        settings.host = host.clone();
    }
    if let Some(port) = cli_args.get("port") {
        settings.port = port
            .parse()
            .map_err(|_| DaemonError::ConfigError(format!("invalid port: {port}")))?;
    }
    if let Some(level) = cli_args.get("log-level") {
        settings.log_level = level
            .parse::<LogLevel>()
            .map_err(|e| DaemonError::ConfigError(e.to_string()))?;
    }
    Ok(settings)
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                _ => {
                    error!("Unable to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl+C received, shutting down...");
    }
}
