use anyhow::Result;
use clap::{Parser, Subcommand};
use playgraph::db::{require_tables, Db, migrate};
use playgraph::graph::integrity;
use playgraph::pipeline::checkpoint;
use playgraph::{Config, EntityResolver, Pipeline, PlaygraphError};

#[derive(Parser, Debug)]
#[command(name = "playgraph")]
#[command(about = "Build the canonical play graph from radio logs and public music metadata")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every pipeline phase over the raw input tables
    Run {
        /// Continue the latest unfinished run instead of starting a new one
        #[arg(short, long)]
        resume: bool,
    },
    /// Check schema, resolver indexes and graph integrity
    Verify,
    /// Print the phase summaries of the latest run
    Report,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load()?;

    // RUST_LOG wins over the configured level
    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("RUST_LOG", config.playgraph.log_level.as_str())
    ).init();

    log::info!("Starting playgraph v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Database path: {}", config.db_path().display());

    let db = Db::new(config.db_path());
    let migrations_dir = config.migrations_dir().to_path_buf();
    db.with_connection(move |conn| {
        migrate::run_migrations(conn, &migrations_dir)
    }).await?;

    match args.command {
        Command::Run { resume } => run_pipeline(&db, config, resume).await,
        Command::Verify => run_verification(&db).await,
        Command::Report => print_report(&db).await,
    }
}

async fn run_pipeline(db: &Db, config: Config, resume: bool) -> Result<()> {
    let report = db.with_connection(move |conn| {
        Pipeline::new(config).run(conn, resume)
    }).await?;

    println!(
        "\nRun {} {}\n",
        report.run_id,
        if report.resumed { "(resumed)" } else { "" }
    );
    for summary in &report.summaries {
        println!("{}", summary);
    }
    Ok(())
}

/// Schema, index and graph checks; any failure is a non-zero exit
async fn run_verification(db: &Db) -> Result<()> {
    let report = db.with_connection(|conn| {
        let applied = migrate::get_applied_migrations(conn)?;
        log::debug!("✓ {} migrations applied", applied.len());
        require_tables(conn, &["entities", "triples", "bridge_records", "pipeline_runs"])?;

        let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        if journal_mode.to_uppercase() != "WAL" {
            return Err(PlaygraphError::Config(format!("Journal mode is not WAL: {}", journal_mode)));
        }
        log::debug!("✓ Journal mode: WAL");

        let sqlite_check: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        if sqlite_check != "ok" {
            return Err(PlaygraphError::Config(format!("Database integrity check failed: {}", sqlite_check)));
        }
        log::info!("✓ Database integrity: OK");

        // Every stored entity must be reachable through the resolver indexes
        let resolver = EntityResolver::load(conn)?;
        let stored: i64 = conn.query_row("SELECT COUNT(*) FROM entities", [], |row| row.get(0))?;
        if resolver.len() != stored as usize {
            return Err(PlaygraphError::Config(format!(
                "Resolver indexed {} entities but {} are stored",
                resolver.len(),
                stored
            )));
        }
        log::info!("✓ Resolver indexes cover {} entities", stored);
        for (kind, n) in resolver.count_by_kind() {
            log::debug!("  {}: {}", kind, n);
        }

        integrity::verify(conn)
    }).await?;

    for orphan in report.orphan_triples.iter().take(20) {
        println!("orphan {} in triple {} ({})", orphan.role, orphan.triple_id, orphan.missing_id);
    }
    if !report.is_clean() {
        anyhow::bail!(
            "graph integrity check failed: {} orphan references, {} kind mismatches, {} dangling bridges",
            report.orphan_triples.len(),
            report.kind_mismatches,
            report.dangling_bridges
        );
    }

    log::info!("✓ Graph verification complete");
    Ok(())
}

async fn print_report(db: &Db) -> Result<()> {
    let latest = db.with_connection(|conn| {
        match checkpoint::latest_run(conn)? {
            Some(run) => {
                let summaries = checkpoint::load_summaries(conn, &run.run_id)?;
                Ok(Some((run, summaries)))
            }
            None => Ok(None),
        }
    }).await?;

    let Some((run, summaries)) = latest else {
        println!("No pipeline runs recorded yet.");
        return Ok(());
    };

    println!("\nRun {} ({})", run.run_id, run.status);
    println!("  started:  {}", run.started_at);
    if let Some(finished) = &run.finished_at {
        println!("  finished: {}", finished);
    }
    println!();
    for summary in &summaries {
        println!("{}", summary);
    }
    Ok(())
}
