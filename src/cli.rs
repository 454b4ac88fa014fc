use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::{self, CommandReport};
use crate::intake::model::RetentionPolicy;

/// dossier-intake - rental application correspondence intake
#[derive(Parser, Debug)]
#[command(name = "dossier-intake")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Print the command report as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ingest one inbound message from a JSON file
    Ingest {
        /// Path to the message JSON
        #[arg(long)]
        file: PathBuf,
    },

    /// Drain the inbound spool directory
    Watch {
        /// Run a single drain cycle (default)
        #[arg(long)]
        once: bool,
        /// Keep polling and run the retention sweeper alongside
        #[arg(long)]
        daemon: bool,
    },

    /// Apply retention policies
    Sweep {
        #[arg(long)]
        once: bool,
        #[arg(long)]
        daemon: bool,
    },

    /// Manage tenants (agencies)
    #[command(subcommand)]
    Tenant(TenantCommands),

    /// Inspect and decide dossiers
    #[command(subcommand)]
    Dossier(DossierCommands),

    /// Stored documents
    #[command(subcommand)]
    Document(DocumentCommands),

    /// Show paths, config, counts, and daemon state
    Status,
}

#[derive(Subcommand, Debug)]
enum TenantCommands {
    /// Register a tenant
    Add {
        #[arg(long)]
        name: String,
        /// Routing alias matched against `local+alias@domain`
        #[arg(long)]
        alias: Option<String>,
        /// Route unmatched mail to this tenant
        #[arg(long)]
        default: bool,
        #[arg(long)]
        message_days: Option<u64>,
        #[arg(long)]
        document_days: Option<u64>,
        /// Days after closing before a dossier is anonymized
        #[arg(long)]
        dossier_days: Option<u64>,
    },

    /// List tenants
    #[command(alias = "ls")]
    List,
}

#[derive(Subcommand, Debug)]
enum DossierCommands {
    /// List dossiers, optionally for one tenant
    #[command(alias = "ls")]
    List {
        #[arg(long)]
        tenant: Option<u64>,
    },

    /// Show one dossier with its messages and documents
    Show {
        #[arg(long)]
        id: u64,
    },

    /// Close a dossier; it becomes eligible for anonymization
    Close {
        #[arg(long)]
        id: u64,
    },

    /// Mark a complete dossier as validated
    Validate {
        #[arg(long)]
        id: u64,
    },

    /// Reject a dossier
    Reject {
        #[arg(long)]
        id: u64,
    },

    /// Detach a document from a dossier
    Unlink {
        #[arg(long)]
        id: u64,
        #[arg(long)]
        document: u64,
    },
}

#[derive(Subcommand, Debug)]
enum DocumentCommands {
    /// Decrypt a stored document to a file
    Export {
        #[arg(long)]
        id: u64,
        #[arg(long)]
        out: PathBuf,
    },
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!("command={}", report.command);
    println!("ok={}", report.ok);
    for detail in &report.details {
        println!("{detail}");
    }
    for issue in &report.issues {
        println!("issue={issue}");
    }
    Ok(())
}

fn dispatch(command: Commands) -> Result<CommandReport> {
    match command {
        Commands::Ingest { file } => {
            commands::ingest::run(&commands::ingest::IngestOptions { file })
        }
        Commands::Watch { once, daemon } => {
            commands::watch::run(&commands::watch::WatchOptions { once, daemon })
        }
        Commands::Sweep { once, daemon } => {
            commands::sweep::run(&commands::sweep::SweepOptions { once, daemon })
        }
        Commands::Tenant(TenantCommands::Add {
            name,
            alias,
            default,
            message_days,
            document_days,
            dossier_days,
        }) => commands::tenant::add(&commands::tenant::TenantAddOptions {
            name,
            alias,
            is_default: default,
            retention: RetentionPolicy {
                message_days,
                document_days,
                dossier_closed_days: dossier_days,
            },
        }),
        Commands::Tenant(TenantCommands::List) => commands::tenant::list(),
        Commands::Dossier(DossierCommands::List { tenant }) => commands::dossier::list(tenant),
        Commands::Dossier(DossierCommands::Show { id }) => commands::dossier::show(id),
        Commands::Dossier(DossierCommands::Close { id }) => commands::dossier::close(id),
        Commands::Dossier(DossierCommands::Validate { id }) => commands::dossier::validate(id),
        Commands::Dossier(DossierCommands::Reject { id }) => commands::dossier::reject(id),
        Commands::Dossier(DossierCommands::Unlink { id, document }) => {
            commands::dossier::unlink(id, document)
        }
        Commands::Document(DocumentCommands::Export { id, out }) => {
            commands::document::export(&commands::document::ExportOptions { id, out })
        }
        Commands::Status => commands::status::run(),
    }
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let report = dispatch(cli.command)?;
    print_report(&report, cli.json)?;
    if !report.ok {
        std::process::exit(2);
    }
    Ok(())
}
