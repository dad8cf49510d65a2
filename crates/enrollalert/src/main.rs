use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use enrollalert::alert::AlertNotifier;
use enrollalert::config::AppConfig;
use enrollalert::db::EnrollDb;
use enrollalert::error::CycleError;
use enrollalert::notify::{HttpMailer, LogNotifier, Notifier};
use enrollalert::refresh::{initial_load, run_cycle, RefreshPipeline};
use enrollalert::scrape::{EnrollClient, SectionSource};
use enrollalert::server::{create_router, AppState};
use enrollalert::types::Term;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

#[derive(Debug, Parser)]
#[command(name = "enrollalert")]
#[command(about = "Course seat refresh and alerting")]
struct Cli {
    /// JSON config file; environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Term to operate on (e.g. 1262)
    #[arg(long, global = true)]
    term: Option<Term>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Load the course catalog of the term
    Init {
        /// Number of courses requested from the search
        #[arg(long)]
        count: Option<usize>,
    },
    /// Refresh stale courses, then send matching alerts
    Refresh {
        #[arg(long)]
        batch_size: Option<usize>,
        /// Repeat the cycle every N seconds until interrupted
        #[arg(long)]
        every: Option<u64>,
        #[arg(long)]
        skip_notify: bool,
    },
    /// Serve the HTTP API
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config =
        AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(term) = cli.term {
        config.term = term;
    }
    init_logging(&config)?;

    let db = Arc::new(
        EnrollDb::open(&config.database_path)
            .with_context(|| format!("Failed to open {}", config.database_path.display()))?,
    );

    match cli.command {
        Commands::Init { count } => {
            let count = count.unwrap_or(config.initial_count);
            let client = EnrollClient::new(&config.api_base_url, config.request_timeout())?;
            let loaded = initial_load(&client, &db, config.term, count)
                .await
                .context("Initial course load failed")?;
            info!(term = %config.term, loaded, "Courses loaded");
        }
        Commands::Refresh {
            batch_size,
            every,
            skip_notify,
        } => {
            let cancel = CancellationToken::new();
            spawn_interrupt_handler(cancel.clone());

            let source: Arc<dyn SectionSource> = Arc::new(EnrollClient::new(
                &config.api_base_url,
                config.request_timeout(),
            )?);
            let pipeline = RefreshPipeline::new(
                Arc::clone(&db),
                source,
                config.workers,
                batch_size.unwrap_or(config.batch_size),
                config.stale_after(),
            );

            let alerts = AlertNotifier::new(
                Arc::clone(&db),
                build_notifier(&config)?,
                config.site_url.clone(),
                config.alert_template.clone(),
            );
            let alerts = (!skip_notify).then_some(&alerts);

            match every {
                None => {
                    run_cycle(&pipeline, alerts, config.term, &cancel)
                        .await
                        .context("Refresh cycle failed")?;
                }
                Some(secs) => {
                    let mut interval = tokio::time::interval(Duration::from_secs(secs.max(1)));
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = interval.tick() => {}
                        }
                        // failures are logged by the cycle; the next tick retries
                        if let Err(CycleError::Cancelled) =
                            run_cycle(&pipeline, alerts, config.term, &cancel).await
                        {
                            break;
                        }
                    }
                    info!("Periodic refresh stopped");
                }
            }
        }
        Commands::Serve => {
            let listener = tokio::net::TcpListener::bind(&config.listen_addr)
                .await
                .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
            info!(addr = %config.listen_addr, "Listening");

            let router = create_router(Arc::new(AppState { db }));
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await
                .context("Server error")?;
        }
    }

    Ok(())
}

fn build_notifier(config: &AppConfig) -> Result<Arc<dyn Notifier>> {
    match &config.mail_relay_url {
        Some(url) => Ok(Arc::new(HttpMailer::new(
            url,
            &config.mail_from,
            config.request_timeout(),
        )?)),
        None => {
            warn!("No mail relay configured, alerts will only be logged and kept");
            Ok(Arc::new(LogNotifier))
        }
    }
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling refresh");
            cancel.cancel();
        }
    });
}

fn init_logging(config: &AppConfig) -> Result<()> {
    let level: Level = config
        .log_level
        .parse()
        .with_context(|| format!("Invalid log level {:?}", config.log_level))?;

    match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}
