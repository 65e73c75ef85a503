use playgraph::bridge;
use playgraph::graph::{consolidator, discovery, validator};
use playgraph::resolve::store;
use playgraph::{config::Config, db::Db, error::PlaygraphError};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::load()?;
    let db = Db::new(config.db_path());

    println!("\n=== Playgraph Statistics ===\n");

    let entity_counts = db.with_connection(|conn| {
        let mut stmt = conn.prepare(
            "SELECT kind, COUNT(*), SUM(external_id IS NOT NULL) FROM entities GROUP BY kind ORDER BY kind",
        )?;
        let mut rows = stmt.query([])?;
        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            results.push((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<i64>>(2)?.unwrap_or(0), // with external id
            ));
        }
        Ok::<Vec<_>, PlaygraphError>(results)
    }).await?;

    if entity_counts.is_empty() {
        println!("No entities found.");
        println!("\nRun `playgraph run` to build the graph.");
        return Ok(());
    }

    println!("Canonical Entities by Kind:\n");
    println!("{:-<50}", "");
    println!("{:<20} {:>12} {:>16}", "Kind", "Count", "External Id");
    println!("{:-<50}", "");
    for (kind, count, keyed) in &entity_counts {
        println!("{:<20} {:>12} {:>16}", kind, count, keyed);
    }
    println!("{:-<50}", "");

    let triple_counts = db.with_connection(|conn| consolidator::count_by_predicate(conn)).await?;
    println!("\nTriples by Predicate:\n");
    println!("{:-<50}", "");
    println!("{:<30} {:>12}", "Predicate", "Count");
    println!("{:-<50}", "");
    for (predicate, count) in &triple_counts {
        println!("{:<30} {:>12}", predicate, count);
    }
    println!("{:-<50}", "");

    let reports = db.with_connection(|conn| discovery::load_reports(conn)).await?;
    if !reports.is_empty() {
        println!("\nRelation Types:\n");
        println!("{:-<80}", "");
        println!(
            "{:<36} {:>10} {:>10} {:>8}  {}",
            "Type", "Rows", "Resolved", "Cover", "Viability"
        );
        println!("{:-<80}", "");
        for report in reports.values() {
            println!(
                "{:<36} {:>10} {:>10} {:>8.3}  {}",
                report.key.to_string(),
                report.total_count,
                report.resolved_endpoint_count,
                report.coverage_ratio,
                report.viability.as_str()
            );
        }
        println!("{:-<80}", "");
    }

    let rejections = db.with_connection(|conn| validator::load_rejection_summary(conn)).await?;
    if !rejections.is_empty() {
        println!("\nRejected Candidates:\n");
        for (relation_type, reasons) in &rejections {
            for (reason, count) in reasons {
                println!("  {:<30} {:<22} {:>8}", relation_type, reason, count);
            }
        }
    }

    let (bridges, quarantined) = db.with_connection(|conn| {
        Ok::<_, PlaygraphError>((bridge::count_by_system(conn)?, store::count_quarantined(conn)?))
    }).await?;

    println!("\nSource Bridges:");
    for (system, count) in &bridges {
        println!("  {}: {}", system, count);
    }
    println!("\nQuarantined records: {}", quarantined);

    println!();

    Ok(())
}
