//! addrbook - command line client for the address book API.
//!
//! Every command restores the persisted session first, so `call` requests
//! are authorized with the last login and renewed transparently when the
//! access token has expired.

mod commands;

use std::io;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use addrbook_core::Config;

#[derive(Parser)]
#[command(name = "addrbook", version, about = "Address book API client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and store the session
    Login {
        #[arg(short, long)]
        username: Option<String>,
    },
    /// Create an account (does not log in)
    Register {
        #[arg(long)]
        full_name: String,
        #[arg(long)]
        email: String,
        #[arg(short, long)]
        username: String,
    },
    /// End the session on the server and forget it locally
    Logout,
    /// Show the cached identity without contacting the server
    Whoami,
    /// Perform an authenticated request and print the response
    Call {
        /// HTTP method, e.g. GET or POST
        method: String,
        /// Path relative to the API base URL, e.g. routes/Contact.cfc
        path: String,
        /// Parameters as key=value; sent as query for GET, form body otherwise
        #[arg(value_parser = commands::parse_key_val)]
        params: Vec<(String, String)>,
    },
}

/// Initialize the tracing subscriber for logging
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let log_dir = if config.log_to_file {
        config.cache_dir().ok().map(|dir| dir.join("logs"))
    } else {
        None
    };
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "addrbook.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let config_result = Config::load();
    let config = config_result.as_ref().cloned().unwrap_or_else(|_| {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    });

    let _log_guard = init_tracing(&config);
    if let Err(ref e) = config_result {
        warn!(error = %e, "Failed to load config, using defaults");
    }
    info!(api = %config.api_base_url, "addrbook starting");

    let client = addrbook_core::connect(&config)?;
    client.controller().on_session_cleared(|| {
        eprintln!("Session ended. Run `addrbook login` to sign in again.");
    });
    client.controller().bootstrap();

    match cli.command {
        Command::Login { username } => commands::login(&client, config, username).await,
        Command::Register {
            full_name,
            email,
            username,
        } => commands::register(&client, full_name, email, username).await,
        Command::Logout => commands::logout(&client).await,
        Command::Whoami => commands::whoami(&client),
        Command::Call {
            method,
            path,
            params,
        } => commands::call(&client, &method, path, params).await,
    }
}
