//! SvnGit Server - svn:// frontend for Git repositories
//!
//! Serves the ra_svn wire protocol directly on top of a bare Git
//! repository: checkouts, updates, logs, locks and commits from stock
//! SVN clients, revision history from first-parent Git history.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use svngit_core::{
    AnonymousAuthProvider, AuthProvider, ContentAccess, Git2Store, GitStore, LockTable,
    PasswordFileAuthProvider, RevisionCache, TreeResolver,
};
use svngit_protocol::{Session, SessionConfig, SessionContext};

mod config;
use config::ServerConfig;

#[derive(Parser, Debug)]
#[command(name = "svngit")]
#[command(version = "0.1.0")]
#[command(about = "SVN-compatible server backed by Git", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the svn:// server
    Serve {
        /// Configuration file
        #[arg(short, long, default_value = "svngit.toml")]
        config: PathBuf,

        /// Enable debug logging
        #[arg(long)]
        debug: bool,
    },

    /// Create an empty bare repository ready to serve
    Init {
        /// Repository path
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, debug } => serve(&config, debug).await,
        Commands::Init { path } => init(&path),
    }
}

fn init_tracing(debug: bool) {
    let env_filter = if debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();
}

fn init(path: &Path) -> Result<()> {
    Git2Store::init_bare(path)
        .with_context(|| format!("cannot initialize repository at {}", path.display()))?;
    println!("Initialized empty repository at {}", path.display());
    println!("Serve it with:");
    println!("  svngit serve --config svngit.toml");
    println!("where the config points [repository] path at {}", path.display());
    Ok(())
}

fn auth_provider(config: &config::AuthConfig) -> Result<Arc<dyn AuthProvider>> {
    if let Some(file) = &config.password_file {
        let provider = PasswordFileAuthProvider::from_file(file)
            .with_context(|| format!("cannot load password file {}", file.display()))?;
        return Ok(Arc::new(provider));
    }
    if config.anonymous {
        return Ok(Arc::new(AnonymousAuthProvider));
    }
    anyhow::bail!("auth: anonymous access disabled and no password_file configured")
}

async fn serve(config_path: &Path, debug: bool) -> Result<()> {
    init_tracing(debug);

    let config = ServerConfig::load(config_path)?;
    let store: Arc<dyn GitStore> = Arc::new(
        Git2Store::open(&config.repository.path).with_context(|| {
            format!(
                "cannot open repository at {}",
                config.repository.path.display()
            )
        })?,
    );
    let cache = Arc::new(
        RevisionCache::open(
            store.clone(),
            &config.ref_name(),
            config.repository.index.as_deref(),
        )
        .await?,
    );
    info!(
        uuid = cache.uuid(),
        head = cache.head_revision().await,
        branch = %config.repository.branch,
        "repository opened"
    );

    let ctx = Arc::new(SessionContext {
        resolver: Arc::new(TreeResolver::new(cache)),
        locks: Arc::new(LockTable::new()),
        auth: auth_provider(&config.auth)?,
        content: Arc::new(ContentAccess::new(store, None)),
        config: SessionConfig {
            realm: config.realm.clone(),
            url: config.url.clone(),
            retry_on_conflict: config.retry_on_conflict,
            lock_wait: Duration::from_secs(config.lock_wait_secs),
        },
    });

    let listener = TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("cannot bind {}", config.listen))?;
    info!("listening on {}", config.listen);
    info!("ready to accept SVN client connections");

    loop {
        let (stream, peer) = listener.accept().await?;
        let ctx = ctx.clone();
        tokio::spawn(async move {
            debug!(%peer, "client connected");
            if let Err(e) = serve_connection(stream, ctx).await {
                error!(%peer, error = %e, "connection error");
            }
            debug!(%peer, "client disconnected");
        });
    }
}

/// Pipe one TCP connection through a protocol session
async fn serve_connection(
    mut stream: TcpStream,
    ctx: Arc<SessionContext>,
) -> std::io::Result<()> {
    let (mut session, greeting) = Session::new(ctx);
    stream.write_all(&greeting).await?;

    let mut buf = vec![0u8; 16 * 1024];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let output = session.feed(&buf[..n]).await;
        if !output.bytes.is_empty() {
            stream.write_all(&output.bytes).await?;
        }
        if output.close {
            break;
        }
    }
    stream.shutdown().await.ok();
    Ok(())
}
