use anyhow::{anyhow, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::fs;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use crate::config::{self, AppConfig, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::error::SyncError;
use crate::queue::EventQueue;
use crate::server::{http, EventLog, ProjectionRebuilder};
use crate::sync::{HttpTransport, SyncCoordinator};

#[derive(Parser, Debug)]
#[command(name = "liftlog", version)]
#[command(
    about = "Offline-first workout tracker with an event-sourced sync core",
    long_about = "liftlog stages workout events in a durable local queue, syncs them to a \
server with idempotent batch ingestion, and rebuilds read models by deterministic replay."
)]
#[command(arg_required_else_help = true)]
#[command(after_long_help = "Examples:
  liftlog serve --bind 127.0.0.1:8080 --db server.db
  liftlog sync --server http://localhost:8080 --device <DEVICE_ID> --user <USER_ID>
  liftlog status --user <USER_ID>
  liftlog rebuild --db server.db
  liftlog merge --server http://localhost:8080 --anonymous-user <ANON_ID> --user <USER_ID>
  liftlog completion zsh > ~/.zsh/completions/_liftlog")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Run the sync/projection HTTP server")]
    Serve {
        #[arg(long, value_name = "ADDR", help = "Bind address (default: 127.0.0.1:8080)")]
        bind: Option<SocketAddr>,
        #[arg(
            long,
            value_name = "PATH",
            help = "Path to server DB (default: $XDG_STATE_HOME/liftlog/server.db)"
        )]
        db: Option<PathBuf>,
        #[arg(long, value_name = "PATH", help = "Path to config file")]
        config: Option<PathBuf>,
    },
    #[command(about = "Sync pending events from the local queue to the server")]
    #[command(arg_required_else_help = true)]
    Sync {
        #[arg(long, value_name = "URL", help = "Server base URL")]
        server: Option<String>,
        #[arg(long, value_name = "DEVICE_ID", help = "Device identity to sync for")]
        device: Option<Uuid>,
        #[arg(long, value_name = "USER_ID", help = "User identity to sync for")]
        user: Uuid,
        #[arg(
            long,
            value_name = "PATH",
            help = "Path to queue DB (default: $XDG_STATE_HOME/liftlog/queue.db)"
        )]
        db: Option<PathBuf>,
        #[arg(long, value_name = "PATH", help = "Append NDJSON sync journal to file")]
        journal: Option<PathBuf>,
        #[arg(long, value_name = "SECS", help = "Request timeout in seconds")]
        timeout_secs: Option<u64>,
        #[arg(long, value_name = "PATH", help = "Path to config file")]
        config: Option<PathBuf>,
    },
    #[command(about = "Show queue counts by status")]
    Status {
        #[arg(long, value_name = "PATH", help = "Path to queue DB")]
        db: Option<PathBuf>,
        #[arg(long, value_name = "USER_ID", help = "Scope counts to one user")]
        user: Option<Uuid>,
        #[arg(long, value_name = "PATH", help = "Path to config file")]
        config: Option<PathBuf>,
    },
    #[command(about = "Return failed events to pending and zero their retry counts")]
    ResetFailed {
        #[arg(long, value_name = "PATH", help = "Path to queue DB")]
        db: Option<PathBuf>,
        #[arg(long, value_name = "USER_ID", help = "Scope the reset to one user")]
        user: Option<Uuid>,
        #[arg(long, value_name = "PATH", help = "Path to config file")]
        config: Option<PathBuf>,
    },
    #[command(about = "Rebuild projections directly against a server DB")]
    #[command(arg_required_else_help = true)]
    Rebuild {
        #[arg(long, value_name = "PATH", help = "Path to server DB")]
        db: PathBuf,
        #[arg(long, value_name = "USER_ID", help = "Scope the rebuild to one user")]
        user: Option<Uuid>,
    },
    #[command(
        about = "Merge a local anonymous identity into an authenticated account",
        long_about = "Rewrites queue ownership, syncs remaining events under the authenticated \
identity, then asks the server to reassign previously synced events. On success the anonymous \
identity can be discarded."
    )]
    #[command(arg_required_else_help = true)]
    Merge {
        #[arg(long, value_name = "URL", help = "Server base URL")]
        server: Option<String>,
        #[arg(long, value_name = "DEVICE_ID", help = "Device identity to sync for")]
        device: Option<Uuid>,
        #[arg(long, value_name = "ANON_ID", help = "Anonymous user to fold in")]
        anonymous_user: Uuid,
        #[arg(long, value_name = "USER_ID", help = "Authenticated user to fold into")]
        user: Uuid,
        #[arg(long, value_name = "PATH", help = "Path to queue DB")]
        db: Option<PathBuf>,
        #[arg(long, value_name = "SECS", help = "Request timeout in seconds")]
        timeout_secs: Option<u64>,
        #[arg(long, value_name = "PATH", help = "Path to config file")]
        config: Option<PathBuf>,
    },
    #[command(about = "Generate shell completion script")]
    #[command(arg_required_else_help = true)]
    Completion {
        #[arg(value_enum, value_name = "SHELL", help = "Target shell")]
        shell: Shell,
    },
    #[command(about = "Generate a man page")]
    Man {
        #[arg(
            long,
            value_name = "PATH",
            help = "Write man page to file (stdout when omitted)"
        )]
        output: Option<PathBuf>,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { bind, db, config } => {
            let cfg = config::load_config(config.as_deref())?;
            serve(bind, db, &cfg)
        }
        Commands::Sync {
            server,
            device,
            user,
            db,
            journal,
            timeout_secs,
            config,
        } => {
            let cfg = config::load_config(config.as_deref())?;
            let coordinator = build_coordinator(server, db, timeout_secs, journal, &cfg)?;
            let device = resolve_device(device, &cfg)?;
            let outcome = coordinator.sync(device, user)?;
            if outcome.ok {
                println!("synced ({} events)", outcome.synced);
                if outcome.failed > 0 {
                    println!("{} event(s) rejected by the server", outcome.failed);
                }
                Ok(())
            } else if outcome.message == "sync already in progress" {
                Err(SyncError::SyncInProgress.into())
            } else {
                println!("saved locally; will sync when online");
                Err(SyncError::Network(outcome.message).into())
            }
        }
        Commands::Status { db, user, config } => {
            let cfg = config::load_config(config.as_deref())?;
            let queue = EventQueue::open(&queue_db_path(db, &cfg))?;
            let stats = queue.stats(user)?;
            println!("pending: {}", stats.pending);
            println!("syncing: {}", stats.syncing);
            println!("failed:  {}", stats.failed);
            println!("total:   {}", stats.total);
            if stats.failed > 0 {
                println!(
                    "{} event(s) exhausted their retry budget; run `liftlog reset-failed`",
                    stats.failed
                );
            }
            Ok(())
        }
        Commands::ResetFailed { db, user, config } => {
            let cfg = config::load_config(config.as_deref())?;
            let queue = EventQueue::open(&queue_db_path(db, &cfg))?;
            let reset = queue.reset_failed(user)?;
            println!("reset {reset} event(s) to pending");
            Ok(())
        }
        Commands::Rebuild { db, user } => {
            let log = EventLog::open(&db)?;
            let started = std::time::Instant::now();
            let stats = ProjectionRebuilder::new(&log).rebuild(user)?;
            println!(
                "rebuilt {} workout(s), {} set(s) in {} ms",
                stats.workouts_written,
                stats.sets_written,
                started.elapsed().as_millis()
            );
            if stats.unknown_skipped > 0 {
                println!("skipped {} event(s) of unknown type", stats.unknown_skipped);
            }
            Ok(())
        }
        Commands::Merge {
            server,
            device,
            anonymous_user,
            user,
            db,
            timeout_secs,
            config,
        } => {
            let cfg = config::load_config(config.as_deref())?;
            let coordinator = build_coordinator(server, db, timeout_secs, None, &cfg)?;
            let device = resolve_device(device, &cfg)?;
            let response = coordinator.merge_account(device, anonymous_user, user)?;
            println!(
                "merged {} event(s) into {user}; the anonymous identity can be discarded",
                response.merged_event_count
            );
            Ok(())
        }
        Commands::Completion { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "liftlog", &mut io::stdout());
            Ok(())
        }
        Commands::Man { output } => {
            let mut rendered = Vec::new();
            clap_mangen::Man::new(Cli::command()).render(&mut rendered)?;
            match output {
                Some(path) => fs::write(path, rendered)?,
                None => io::stdout().write_all(&rendered)?,
            }
            Ok(())
        }
    }
}

fn serve(bind: Option<SocketAddr>, db: Option<PathBuf>, cfg: &AppConfig) -> Result<()> {
    init_tracing();
    let addr = bind
        .or(cfg.server.bind_addr)
        .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8080)));
    let db = db
        .or_else(|| cfg.server.database.clone())
        .unwrap_or_else(default_server_db);
    let log = EventLog::open(&db)?;
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(http::serve(log, addr))
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_coordinator(
    server: Option<String>,
    db: Option<PathBuf>,
    timeout_secs: Option<u64>,
    journal: Option<PathBuf>,
    cfg: &AppConfig,
) -> Result<SyncCoordinator> {
    let server_url = server
        .or_else(|| cfg.client.server_url.clone())
        .ok_or_else(|| anyhow!("no server URL; pass --server or set [client].server_url"))?;
    let timeout = timeout_secs
        .or(cfg.client.request_timeout_secs)
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
    let queue = EventQueue::open(&queue_db_path(db, cfg))?;
    let transport = HttpTransport::new(&server_url, Duration::from_secs(timeout))?;
    let mut coordinator = SyncCoordinator::new(queue, Box::new(transport));
    if let Some(path) = journal {
        coordinator = coordinator.with_journal(path);
    }
    Ok(coordinator)
}

fn resolve_device(device: Option<Uuid>, cfg: &AppConfig) -> Result<Uuid> {
    device
        .or(cfg.client.device_id)
        .ok_or_else(|| anyhow!("no device identity; pass --device or set [client].device_id"))
}

fn queue_db_path(db: Option<PathBuf>, cfg: &AppConfig) -> PathBuf {
    db.or_else(|| cfg.client.database.clone())
        .unwrap_or_else(default_queue_db)
}

fn default_queue_db() -> PathBuf {
    state_dir().join("queue.db")
}

fn default_server_db() -> PathBuf {
    state_dir().join("server.db")
}

fn state_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("liftlog");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("state")
            .join("liftlog");
    }
    PathBuf::from(".liftlog")
}
