//! Cadence: scheduled posting for Bluesky feed accounts.
//!
//! Main binary with subcommands:
//! - `serve`: HTTP trigger for cron-style invocations
//! - `run`: Run one invocation and print the report
//! - `account`: Add, deactivate, and list publishing accounts
//! - `content`: Add stored content items

use std::sync::Arc;

use cadence::config::Settings;
use cadence::routes::{AppState, create_router};
use cadence_scheduler::{
    Category, DEFAULT_INTERVAL_HOURS, DEFAULT_MAX_ACCOUNTS, InvocationRequest, SourceKind,
};
use chrono::Utc;
use clap::{Parser, Subcommand};
use miette::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "Scheduled posting for Bluesky feed accounts", long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP invocation trigger
    Serve {
        /// Address to listen on
        #[arg(long, env = "CADENCE_LISTEN", default_value = "0.0.0.0:8080")]
        listen: String,
    },

    /// Run one invocation and print the JSON report
    Run {
        /// Process exactly this account, bypassing due selection
        #[arg(long)]
        account: Option<String>,

        /// Minimum hours between an account's publishes
        #[arg(long, default_value_t = DEFAULT_INTERVAL_HOURS)]
        interval_hours: u32,

        /// Maximum due accounts to process
        #[arg(long, default_value_t = DEFAULT_MAX_ACCOUNTS)]
        max_accounts: usize,
    },

    /// Manage publishing accounts
    Account {
        #[command(subcommand)]
        action: AccountAction,
    },

    /// Manage stored content
    Content {
        #[command(subcommand)]
        action: ContentAction,
    },
}

#[derive(Subcommand)]
enum AccountAction {
    /// Add an account, or update an existing account's kind and credentials
    Add {
        /// Account id
        id: String,

        /// Content category: artist, tag, quote, or card
        #[arg(long)]
        kind: Category,

        /// Artist, tag, or subject id (not used for card accounts)
        #[arg(long)]
        source_id: Option<i64>,

        /// Login identifier (handle or DID)
        #[arg(long)]
        identifier: String,

        /// App password
        #[arg(long, env = "CADENCE_APP_PASSWORD")]
        app_password: String,

        /// PDS for this account, if not the default
        #[arg(long = "account-pds-url")]
        account_pds_url: Option<String>,
    },

    /// Stop publishing for an account
    Deactivate {
        /// Account id
        id: String,
    },

    /// Resume publishing for an account
    Activate {
        /// Account id
        id: String,
    },

    /// List all accounts
    List,
}

#[derive(Subcommand)]
enum ContentAction {
    /// Add a content item
    Add {
        /// Source kind: artist, tag, or subject
        #[arg(long)]
        kind: SourceKind,

        /// Artist, tag, or subject id
        #[arg(long)]
        source_id: i64,

        /// Image path or http(s) URL
        #[arg(long, conflicts_with = "text", required_unless_present = "text")]
        image: Option<String>,

        /// Caption posted with the image
        #[arg(long, requires = "image")]
        caption: Option<String>,

        /// Alt text for the image
        #[arg(long, requires = "image")]
        alt: Option<String>,

        /// Text body, for quote content
        #[arg(long)]
        text: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "cadence=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let settings = cli.settings;

    match cli.command {
        Commands::Serve { listen } => serve(&settings, &listen).await,
        Commands::Run {
            account,
            interval_hours,
            max_accounts,
        } => {
            let mut request = InvocationRequest::new(Utc::now())
                .with_interval_hours(interval_hours)
                .with_max_accounts(max_accounts);
            if let Some(account) = account {
                request = request.for_account(account);
            }
            run_once(&settings, request).await
        }
        Commands::Account { action } => match action {
            AccountAction::Add {
                id,
                kind,
                source_id,
                identifier,
                app_password,
                account_pds_url,
            } => commands::add_account(
                &settings,
                id,
                kind,
                source_id,
                identifier,
                app_password,
                account_pds_url,
            ),
            AccountAction::Deactivate { id } => commands::set_active(&settings, &id, false),
            AccountAction::Activate { id } => commands::set_active(&settings, &id, true),
            AccountAction::List => commands::list_accounts(&settings),
        },
        Commands::Content { action } => match action {
            ContentAction::Add {
                kind,
                source_id,
                image,
                caption,
                alt,
                text,
            } => commands::add_content(&settings, kind, source_id, image, caption, alt, text),
        },
    }
}

async fn serve(settings: &Settings, listen: &str) -> Result<()> {
    let store = Arc::new(settings.open_store().map_err(|e| miette::miette!("{}", e))?);
    let publisher = settings
        .build_publisher(store)
        .map_err(|e| miette::miette!("{}", e))?;

    let router = create_router(Arc::new(AppState { publisher }));

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| miette::miette!("failed to bind {}: {}", listen, e))?;

    info!(listen = %listen, db = %settings.db.display(), "cadence started");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| miette::miette!("server error: {}", e))?;

    info!("cadence stopped");
    Ok(())
}

async fn run_once(settings: &Settings, request: InvocationRequest) -> Result<()> {
    let store = Arc::new(settings.open_store().map_err(|e| miette::miette!("{}", e))?);
    let publisher = settings
        .build_publisher(store)
        .map_err(|e| miette::miette!("{}", e))?;

    let report = publisher
        .run_invocation(request)
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    let json = serde_json::to_string_pretty(&report).map_err(|e| miette::miette!("{}", e))?;
    println!("{}", json);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
