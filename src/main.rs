use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use kbasix::auth::NoDirectory;
use kbasix::cli::{self, AdminCommands, GroupCommands};
use kbasix::cms::Cms;
use kbasix::config::Config;
use kbasix::mail::LogMailer;
use kbasix::server::{AppState, create_router};

#[derive(Parser)]
#[command(name = "kbasix")]
#[command(about = "A self-hosted file sharing server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Administrative commands
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },

    /// Start the server
    Serve {
        /// TOML configuration file
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Host to bind to (overrides the config file)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to (overrides the config file)
        #[arg(long, short)]
        port: Option<u16>,

        /// Data directory for the database and user storage
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Public base URL for external access (e.g., "https://files.example.com").
        /// Used for confirmation and password reset links.
        #[arg(long)]
        public_base_url: Option<String>,
    },
}

async fn serve(
    config_path: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
    data_dir: Option<PathBuf>,
    public_base_url: Option<String>,
) -> anyhow::Result<()> {
    let mut config = match config_path {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(data_dir) = data_dir {
        config.server.data_dir = data_dir;
    }
    if public_base_url.is_some() {
        config.server.public_base_url = public_base_url;
    }

    if !config.server.db_path().exists() {
        bail!("Server not initialized. Run 'kbasix admin init' first to create the database.");
    }

    let addr = config.server.socket_addr()?;
    let cms = Cms::open(config, Arc::new(LogMailer), Arc::new(NoDirectory))?;
    let app = create_router(Arc::new(AppState::new(cms)));

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("kbasix=info".parse()?))
        .init();

    let args = Cli::parse();

    match args.command {
        Commands::Admin { command } => match command {
            AdminCommands::Init { data_dir } => cli::run_init(data_dir)?,
            AdminCommands::Group { command } => match command {
                GroupCommands::Add {
                    data_dir,
                    name,
                    members,
                    info,
                } => cli::run_group_add(data_dir, name, members, info)?,
                GroupCommands::Remove { data_dir, name } => cli::run_group_remove(data_dir, name)?,
                GroupCommands::Members { data_dir, name, set } => {
                    cli::run_group_members(data_dir, name, set)?;
                }
            },
        },
        Commands::Serve {
            config,
            host,
            port,
            data_dir,
            public_base_url,
        } => serve(config, host, port, data_dir, public_base_url).await?,
    }

    Ok(())
}
