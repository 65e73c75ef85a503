//! Run bookkeeping: one row per pipeline run, one checkpoint per completed phase.

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::report::{Phase, PhaseSummary};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: String,
}

/// Register a new run and return its id
pub fn start_run(conn: &Connection) -> Result<String> {
    let run_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO pipeline_runs (run_id, started_at, status) VALUES (?1, ?2, ?3)",
        params![run_id, chrono::Utc::now().to_rfc3339(), RunStatus::Running.as_str()],
    )?;
    Ok(run_id)
}

pub fn finish_run(conn: &Connection, run_id: &str, status: RunStatus) -> Result<()> {
    conn.execute(
        "UPDATE pipeline_runs SET status = ?1, finished_at = ?2 WHERE run_id = ?3",
        params![status.as_str(), chrono::Utc::now().to_rfc3339(), run_id],
    )?;
    Ok(())
}

fn read_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        run_id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        status: row.get(3)?,
    })
}

/// Most recent run that did not complete
pub fn latest_unfinished_run(conn: &Connection) -> Result<Option<RunRecord>> {
    Ok(conn
        .query_row(
            "SELECT run_id, started_at, finished_at, status FROM pipeline_runs
             WHERE status != 'completed' ORDER BY started_at DESC, rowid DESC LIMIT 1",
            [],
            read_run,
        )
        .optional()?)
}

pub fn latest_run(conn: &Connection) -> Result<Option<RunRecord>> {
    Ok(conn
        .query_row(
            "SELECT run_id, started_at, finished_at, status FROM pipeline_runs
             ORDER BY started_at DESC, rowid DESC LIMIT 1",
            [],
            read_run,
        )
        .optional()?)
}

/// Record a completed phase; call inside the phase's transaction.
pub fn record_phase(conn: &Connection, run_id: &str, summary: &PhaseSummary) -> Result<()> {
    let summary_json = serde_json::to_string(summary)?;
    conn.execute(
        "INSERT OR REPLACE INTO phase_checkpoints (run_id, phase, completed_at, summary_json)
         VALUES (?1, ?2, ?3, ?4)",
        params![run_id, summary.phase.as_str(), chrono::Utc::now().to_rfc3339(), summary_json],
    )?;
    Ok(())
}

/// Summaries of the phases a run has completed, in phase order
pub fn load_summaries(conn: &Connection, run_id: &str) -> Result<Vec<PhaseSummary>> {
    let mut stmt = conn.prepare("SELECT summary_json FROM phase_checkpoints WHERE run_id = ?1")?;
    let rows = stmt.query_map([run_id], |row| row.get::<_, String>(0))?;
    let mut summaries = Vec::new();
    for row in rows {
        let summary: PhaseSummary = serde_json::from_str(&row?)?;
        summaries.push(summary);
    }
    summaries.sort_by_key(|s| s.phase);
    Ok(summaries)
}

pub fn completed_phases(conn: &Connection, run_id: &str) -> Result<Vec<Phase>> {
    Ok(load_summaries(conn, run_id)?.into_iter().map(|s| s.phase).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_connection;

    #[test]
    fn test_run_lifecycle() {
        let (conn, _temp) = test_connection();
        let run_id = start_run(&conn).unwrap();
        assert_eq!(latest_unfinished_run(&conn).unwrap().unwrap().run_id, run_id);

        record_phase(&conn, &run_id, &PhaseSummary::new(Phase::Discovery)).unwrap();
        record_phase(&conn, &run_id, &PhaseSummary::new(Phase::Entities)).unwrap();
        assert_eq!(
            completed_phases(&conn, &run_id).unwrap(),
            vec![Phase::Entities, Phase::Discovery]
        );

        finish_run(&conn, &run_id, RunStatus::Completed).unwrap();
        assert!(latest_unfinished_run(&conn).unwrap().is_none());
        let latest = latest_run(&conn).unwrap().unwrap();
        assert_eq!(latest.status, "completed");
        assert!(latest.finished_at.is_some());
    }

    #[test]
    fn test_failed_run_is_resumable() {
        let (conn, _temp) = test_connection();
        let run_id = start_run(&conn).unwrap();
        finish_run(&conn, &run_id, RunStatus::Failed).unwrap();
        assert_eq!(latest_unfinished_run(&conn).unwrap().unwrap().run_id, run_id);
    }
}
