use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use joinwall_store::{UserListOptions, UserStatus};
use serde::Serialize;
use std::path::PathBuf;

use crate::config::PanelConfig;
use crate::logging::init_tracing;
use crate::routes::serve;
use crate::state::AppState;

#[derive(Parser)]
#[command(
    name = "joinwall",
    about = "Admin panel for force-join channel gating",
    version = env!("CARGO_PKG_VERSION"),
    long_about = "Serves the joinwall admin API and manages the record file offline: users, settings, statistics and blocked IP addresses."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "JOINWALL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Run the HTTP admin panel
    Serve,

    /// Blocked IP management
    #[command(subcommand)]
    Ip(IpCommands),

    /// User management
    #[command(subcommand)]
    Users(UserCommands),

    /// Show aggregate statistics
    Stats {
        /// Rebuild user counters from the user table first
        #[arg(long)]
        recount: bool,
    },

    /// Panel settings
    #[command(subcommand)]
    Settings(SettingsCommands),
}

#[derive(Subcommand, Clone)]
pub enum IpCommands {
    /// Block an IP address
    Block {
        ip: String,

        /// Reason stored with the block
        #[arg(short, long)]
        reason: Option<String>,
    },

    /// Unblock an IP address
    Unblock { ip: String },

    /// List blocked IP addresses
    List,

    /// Check whether an IP address is blocked
    Check { ip: String },
}

#[derive(Subcommand, Clone)]
pub enum UserCommands {
    /// List users
    List {
        /// Only users with this status (active, blocked, ...)
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Delete a user
    Delete { id: String },
}

#[derive(Subcommand, Clone)]
pub enum SettingsCommands {
    /// Print the current settings
    Show,
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = PanelConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&config.logging, cli.verbose);

    let state = AppState::initialize(&config).await?;

    match cli.command {
        Commands::Serve => serve(state, config.socket_addr()).await,
        Commands::Ip(command) => run_ip(&state, command).await,
        Commands::Users(command) => run_users(&state, command).await,
        Commands::Stats { recount } => run_stats(&state, recount).await,
        Commands::Settings(SettingsCommands::Show) => print_json(&state.settings.current()),
    }
}

async fn run_ip(state: &AppState, command: IpCommands) -> Result<()> {
    match command {
        IpCommands::Block { ip, reason } => {
            state.gate.block(&ip, reason).await?;
            println!("Blocked {}", ip);
        }
        IpCommands::Unblock { ip } => {
            if !state.gate.unblock(&ip).await? {
                bail!("{} is not blocked", ip);
            }
            println!("Unblocked {}", ip);
        }
        IpCommands::List => {
            let entries: Vec<_> = state
                .gate
                .list()
                .into_iter()
                .map(|(ip, entry)| {
                    serde_json::json!({
                        "ip": ip,
                        "reason": entry.reason,
                        "blocked_at": entry.blocked_at,
                    })
                })
                .collect();
            print_json(&entries)?;
        }
        IpCommands::Check { ip } => match state.gate.get(&ip) {
            Some(entry) => println!(
                "{}: blocked since {} ({})",
                ip,
                entry.blocked_at.to_rfc3339(),
                entry.reason
            ),
            None => println!("{}: allowed", ip),
        },
    }
    Ok(())
}

async fn run_users(state: &AppState, command: UserCommands) -> Result<()> {
    match command {
        UserCommands::List { status } => {
            let options = UserListOptions {
                status_filter: status.map(UserStatus::from),
                limit: None,
            };
            for (id, user) in state.users.list_users(Some(options)) {
                println!("{}\t{}\t{}\t{}\t{}", id, user.name, user.email, user.ip, user.status);
            }
        }
        UserCommands::Delete { id } => {
            state.users.delete_user(&id).await?;
            println!("Deleted user {}", id);
        }
    }
    Ok(())
}

async fn run_stats(state: &AppState, recount: bool) -> Result<()> {
    let statistics = if recount {
        state
            .store
            .transaction(|doc| {
                doc.statistics.recount(&doc.users);
                Ok(doc.statistics.clone())
            })
            .await?
    } else {
        state.store.snapshot().statistics.clone()
    };
    print_json(&statistics)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
