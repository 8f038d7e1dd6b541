//! padsync CLI
//!
//! Command-line client for padsync servers.
//!
//! # Usage
//!
//! ```bash
//! # Interactive protocol shell
//! padsync
//!
//! # Notepads
//! padsync -a secret list 'meeting*'
//! padsync show abc123
//! padsync new --content "Hello"
//! padsync edit abc123
//!
//! # Execute single command
//! padsync -c "GET abc123"
//! ```

mod edit;
mod lines;
mod repl;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use padsync_client::RemoteClient;
use padsync_core::{now_millis, Document, DocumentId};
use padsync_storage::{InsertOutcome, Storage};

const PREVIEW_CHARS: usize = 40;

/// padsync Command Line Interface
#[derive(Parser, Debug)]
#[command(name = "padsync")]
#[command(author, version, about = "padsync CLI - shared notepads from the terminal")]
struct Args {
    /// Server hostname
    #[arg(short = 'H', long, default_value = "127.0.0.1", env = "PADSYNC_HOST")]
    host: String,

    /// Server port
    #[arg(short, long, default_value = "6380", env = "PADSYNC_PORT")]
    port: u16,

    /// Admin secret (needed for list and delete)
    #[arg(short = 'a', long, env = "PADSYNC_SECRET")]
    secret: Option<String>,

    /// Execute a raw protocol command and exit
    #[arg(short, long)]
    command: Option<String>,

    /// Quiet mode (no banner)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    action: Option<Action>,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// List notepads (admin)
    List {
        /// Glob pattern: `*`, `prefix*` or `*suffix`
        pattern: Option<String>,
    },
    /// Print a notepad's content
    Show { id: String },
    /// Create a notepad, with a random id unless one is given
    New {
        #[arg(long)]
        id: Option<String>,
        #[arg(long, default_value = "")]
        content: String,
    },
    /// Delete a notepad (admin)
    Delete { id: String },
    /// Edit a notepad live
    Edit { id: String },
    /// Interactive protocol shell (default)
    Repl,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Library logs stay quiet unless asked for
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("off")),
        )
        .with_writer(std::io::stderr)
        .init();

    let addr = format!("{}:{}", args.host, args.port);
    let client = Arc::new(
        RemoteClient::connect(&addr)
            .await
            .with_context(|| format!("Failed to connect to {}", addr))?,
    );

    if let Some(secret) = &args.secret {
        client.auth(secret).await.context("Authentication failed")?;
        if !args.quiet {
            println!("{}", "Authenticated.".green());
        }
    }

    if let Some(cmd) = &args.command {
        let response = client.raw(cmd).await?;
        println!("{}", repl::format_response(&response));
        if response.is_error() {
            std::process::exit(1);
        }
        return Ok(());
    }

    match args.action.unwrap_or(Action::Repl) {
        Action::List { pattern } => list(&client, pattern.as_deref()).await,
        Action::Show { id } => show(&client, &parse_id(&id)?).await,
        Action::New { id, content } => {
            let id = match id {
                Some(id) => parse_id(&id)?,
                None => DocumentId::random(),
            };
            create(&client, id, &content).await
        }
        Action::Delete { id } => delete(&client, &parse_id(&id)?).await,
        Action::Edit { id } => edit::run(client, parse_id(&id)?, args.quiet).await,
        Action::Repl => {
            if !args.quiet {
                let auth_status = if args.secret.is_some() { " (authenticated)" } else { "" };
                println!(
                    "{}",
                    format!(
                        "\n  padsync CLI  connected to {}{}\n  Type 'help' for commands, 'quit' to exit\n",
                        addr, auth_status
                    )
                    .cyan()
                );
            }
            repl::run(&client).await
        }
    }
}

fn parse_id(id: &str) -> Result<DocumentId> {
    DocumentId::new(id).with_context(|| format!("Invalid notepad id '{}'", id))
}

async fn list(client: &RemoteClient, pattern: Option<&str>) -> Result<()> {
    let mut docs = client.list(pattern).await?;
    if docs.is_empty() {
        println!("{}", "(no notepads)".dimmed());
        return Ok(());
    }

    docs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    let now = now_millis();
    let width = docs.iter().map(|d| d.id.as_str().len()).max().unwrap_or(2).max(2);

    println!(
        "{}",
        format!("{:<width$}  {:>8}  {:>7}  {}", "ID", "UPDATED", "SIZE", "PREVIEW", width = width).bold()
    );
    for doc in &docs {
        println!(
            "{}  {:>8}  {:>7}  {}",
            format!("{:<width$}", doc.id.as_str(), width = width).cyan(),
            format_age(now.saturating_sub(doc.updated_at)),
            doc.content.len(),
            preview(&doc.content).dimmed()
        );
    }
    Ok(())
}

async fn show(client: &RemoteClient, id: &DocumentId) -> Result<()> {
    match client.read(id).await? {
        Some(doc) => {
            print!("{}", doc.content);
            if !doc.content.ends_with('\n') {
                println!();
            }
            Ok(())
        }
        None => bail!("Notepad {} not found", id),
    }
}

async fn create(client: &RemoteClient, id: DocumentId, content: &str) -> Result<()> {
    match client.insert_if_absent(&id, content).await? {
        InsertOutcome::Inserted(Document { id, .. }) => {
            println!("{} {}", "Created".green(), id);
            Ok(())
        }
        InsertOutcome::AlreadyExists => bail!("Notepad {} already exists", id),
    }
}

async fn delete(client: &RemoteClient, id: &DocumentId) -> Result<()> {
    if client.delete(id).await? {
        println!("{} {}", "Deleted".green(), id);
    } else {
        println!("{} {}", "(not found)".dimmed(), id);
    }
    Ok(())
}

fn format_age(ms: u64) -> String {
    let secs = ms / 1000;
    match secs {
        0..=59 => format!("{}s", secs),
        60..=3599 => format!("{}m", secs / 60),
        3600..=86399 => format!("{}h", secs / 3600),
        _ => format!("{}d", secs / 86400),
    }
}

fn preview(content: &str) -> String {
    let line = content.lines().next().unwrap_or("");
    let mut out: String = line.chars().take(PREVIEW_CHARS).collect();
    if line.chars().count() > PREVIEW_CHARS || content.lines().nth(1).is_some() {
        out.push_str("...");
    }
    out
}
