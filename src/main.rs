mod api;
mod engine;
mod templates;

use anyhow::Context as _;
use chrono::Utc;
use clap::{Parser, Subcommand};
use leadflow_core::{
    config::{self, shellexpand, Config},
    stage::Stage,
    timefmt::parse_ts,
};
use leadflow_store::Store;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "leadflow",
    version,
    about = "Lead lifecycle and follow-up scheduling engine"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the dispatch worker (and the API, if enabled) until Ctrl-C.
    Start,
    /// Run a single dispatch pass and exit.
    Tick {
        /// Treat this instant as "now" (RFC 3339 or `YYYY-MM-DD HH:MM:SS`, UTC).
        #[arg(long)]
        at: Option<String>,
    },
    /// Print pending counts and the stage distribution.
    Status,
    /// Manage follow-up and reminder templates.
    Templates {
        #[command(subcommand)]
        action: TemplateAction,
    },
    /// Print the stage that follows the given one.
    NextStage {
        /// Stage name, e.g. `budget`.
        stage: String,
    },
}

#[derive(Subcommand)]
enum TemplateAction {
    /// Upsert templates from a TOML file.
    Import {
        /// Path to the template file.
        file: PathBuf,
    },
    /// List every follow-up and reminder template.
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load(&cli.config)?;

    // Only the long-running service writes a log file.
    let log_dir = matches!(cli.command, Commands::Start)
        .then(|| PathBuf::from(shellexpand(&cfg.leadflow.data_dir)).join("logs"));
    let _guard = init_tracing(&cfg.leadflow.log_level, log_dir)?;

    match cli.command {
        Commands::Start => {
            let engine = Arc::new(build_engine(&cfg).await?);
            println!("leadflow: starting engine...");
            engine.run(cfg.api.clone()).await?;
        }
        Commands::Tick { at } => {
            let now = match at {
                Some(raw) => parse_ts(&raw)?,
                None => Utc::now(),
            };
            let engine = build_engine(&cfg).await?;
            let report: engine::TickReport = engine.run_tick(now).await;
            println!("{report}");
            if report.errors > 0 {
                anyhow::bail!("{} item(s) failed with errors", report.errors);
            }
        }
        Commands::Status => {
            let store = Store::new(&cfg.store).await?;
            let snapshot = store.dashboard(5).await?;
            println!("leadflow status\n");
            println!("Config:     {}", cli.config);
            println!("Database:   {}", shellexpand(&cfg.store.db_path));
            println!("Transport:  {}", cfg.transport.kind);
            println!();
            println!("Leads:              {}", snapshot.total_leads);
            println!("Qualified:          {}", snapshot.qualified_leads);
            println!("Pending follow-ups: {}", snapshot.pending_follow_ups);
            println!("Pending reminders:  {}", snapshot.pending_reminders);
            println!();
            for entry in &snapshot.stage_distribution {
                println!("  {:<18} {}", entry.stage.as_str(), entry.count);
            }
            if !snapshot.recent_stage_changes.is_empty() {
                println!("\nRecent stage changes:");
                for h in &snapshot.recent_stage_changes {
                    println!(
                        "  {}  {:<16} {}",
                        h.entered_at.format("%Y-%m-%d %H:%M"),
                        h.customer_phone,
                        h.stage
                    );
                }
            }
        }
        Commands::Templates { action } => {
            let store = Store::new(&cfg.store).await?;
            match action {
                TemplateAction::Import { file } => {
                    let content = std::fs::read_to_string(&file)
                        .with_context(|| format!("failed to read {}", file.display()))?;
                    let parsed = templates::parse(&content)?;
                    let summary =
                        templates::import(&store, parsed, &cfg.followup.default_campaign).await?;
                    println!(
                        "Imported {} follow-up and {} reminder templates.",
                        summary.follow_ups, summary.reminders
                    );
                }
                TemplateAction::List => {
                    for t in store.list_follow_up_templates().await? {
                        println!(
                            "{:<18} {:<14} #{} +{}h{}m {}{}",
                            t.stage.as_str(),
                            t.template_type,
                            t.follow_up_number,
                            t.delay_hours,
                            t.delay_minutes,
                            t.template_name,
                            if t.is_active { "" } else { " (inactive)" }
                        );
                    }
                    for t in store.list_reminder_templates().await? {
                        println!(
                            "reminder {:<9} {}{}",
                            t.reminder_type.as_str(),
                            t.template_name,
                            if t.is_active { "" } else { " (inactive)" }
                        );
                    }
                }
            }
        }
        Commands::NextStage { stage } => {
            let stage: Stage = stage.parse()?;
            match stage.next() {
                Some(next) => println!("{next}"),
                None => println!("{stage} is terminal"),
            }
        }
    }

    Ok(())
}

/// Wire the store, the configured transport and the engine together.
async fn build_engine(cfg: &Config) -> anyhow::Result<engine::Engine> {
    let store = Store::new(&cfg.store).await?;
    let transport = leadflow_transport::build_transport(
        &cfg.transport,
        Duration::from_secs(cfg.dispatch.delivery_timeout_secs),
    )?;
    Ok(engine::Engine::new(store, transport, cfg))
}

/// Stderr logging, plus a daily-rolling file under `log_dir` when given.
///
/// `RUST_LOG` overrides the configured level. The returned guard must live
/// until exit so buffered file output is flushed.
fn init_tracing(level: &str, log_dir: Option<PathBuf>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let Some(dir) = log_dir else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return Ok(None);
    };

    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create log dir {}", dir.display()))?;
    let appender = tracing_appender::rolling::daily(dir, "leadflow.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer),
        )
        .init();
    Ok(Some(guard))
}
