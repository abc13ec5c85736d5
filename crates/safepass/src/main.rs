// SPDX-FileCopyrightText: 2026 Safepass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Safepass - a personal vault with encrypted credentials and notes.
//!
//! This is the binary entry point.

mod commands;

use clap::{Parser, Subcommand};

/// Safepass - a personal vault with encrypted credentials and notes.
#[derive(Parser, Debug)]
#[command(name = "safepass", version, about, long_about = None)]
struct Cli {
    /// User whose vault to open.
    #[arg(long, env = "SAFEPASS_USER")]
    user: String,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the key envelope (first login) or verify it opens.
    Init,
    /// Add a credential. The secret is prompted for, or read from stdin.
    AddCredential {
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        username: String,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        website: Option<String>,
        #[arg(long)]
        category: Option<String>,
        /// Also prompt for encrypted notes.
        #[arg(long)]
        with_notes: bool,
    },
    /// Add a note. The content is prompted for, or read from stdin.
    AddNote {
        #[arg(long)]
        title: String,
        #[arg(long)]
        category: Option<String>,
    },
    /// List every item.
    List,
    /// Search item metadata.
    Search { query: String },
    /// Show one item.
    Show {
        id: String,
        /// Print decrypted fields.
        #[arg(long)]
        reveal: bool,
    },
    /// Delete one item.
    Delete { id: String },
    /// Change the master password and re-encrypt every item.
    ChangePassword,
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("safepass={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match safepass_config::load_and_validate() {
        Ok(config) => config,
        Err(errors) => {
            safepass_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    init_tracing(&config.log.level);

    if let Err(e) = commands::run(cli, config).await {
        eprintln!("safepass: {e}");
        if e.requires_reauthentication() {
            eprintln!("safepass: run `safepass init` to unlock the vault with your master password");
        } else if e.indicates_corruption() {
            eprintln!("safepass: some stored data could not be decrypted; re-run the command to retry");
        }
        std::process::exit(1);
    }
}
