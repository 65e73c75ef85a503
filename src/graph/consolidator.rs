//! Dedupe accepted triples and commit them with full-refresh semantics per predicate.

use std::collections::{BTreeSet, HashSet};

use rusqlite::{params, Connection};
use serde::Serialize;

use crate::error::Result;
use crate::model::{Predicate, Triple};

#[derive(Debug, Default, Clone, Serialize)]
pub struct CommitStats {
    pub deleted: usize,
    pub inserted: usize,
    pub duplicates: usize,
}

/// Drop repeated identity keys; the first occurrence (and its provenance) wins.
pub fn consolidate(triples: Vec<Triple>) -> (Vec<Triple>, usize) {
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(triples.len());
    let mut duplicates = 0;
    for triple in triples {
        if seen.insert(triple.triple_id.clone()) {
            kept.push(triple);
        } else {
            duplicates += 1;
        }
    }
    (kept, duplicates)
}

/// Replace every stored triple of the touched predicates with `triples`.
///
/// Predicates carried by `triples` are always treated as touched. Rows whose
/// `source_relation_type` is in `frozen` survive the refresh.
pub fn commit(
    conn: &Connection,
    triples: &[Triple],
    touched: &BTreeSet<Predicate>,
    frozen: &BTreeSet<String>,
) -> Result<CommitStats> {
    let mut predicates = touched.clone();
    predicates.extend(triples.iter().map(|t| t.predicate));

    let mut stats = CommitStats::default();
    {
        let mut delete = conn.prepare("DELETE FROM triples WHERE predicate = ?1")?;
        let mut labels = conn.prepare("SELECT DISTINCT source_relation_type FROM triples WHERE predicate = ?1")?;
        let mut delete_label =
            conn.prepare("DELETE FROM triples WHERE predicate = ?1 AND source_relation_type = ?2")?;
        for predicate in &predicates {
            if frozen.is_empty() {
                stats.deleted += delete.execute([predicate.as_str()])?;
                continue;
            }
            let stored = labels
                .query_map([predicate.as_str()], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for label in stored.iter().filter(|label| !frozen.contains(*label)) {
                stats.deleted += delete_label.execute(params![predicate.as_str(), label])?;
            }
        }
    }

    // a fresh triple replaces a frozen row with the same identity
    let mut insert = conn.prepare(
        "INSERT OR REPLACE INTO triples (
            triple_id, subject_kind, subject_id, predicate, object_kind, object_id,
            qualifier_kind, qualifier_id, source_relation_type, source_record_id,
            begin_date, end_date, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
    )?;
    for triple in triples {
        insert.execute(params![
            triple.triple_id,
            triple.subject.kind.as_str(),
            triple.subject.id.as_str(),
            triple.predicate.as_str(),
            triple.object.kind.as_str(),
            triple.object.id.as_str(),
            triple.qualifier.as_ref().map(|q| q.kind.as_str()),
            triple.qualifier.as_ref().map(|q| q.id.as_str()).unwrap_or(""),
            triple.provenance.source_relation_type,
            triple.provenance.source_record_id,
            triple.begin_date,
            triple.end_date,
            triple.created_at,
        ])?;
        stats.inserted += 1;
    }

    log::info!(
        "Committed {} triples across {} predicates ({} replaced)",
        stats.inserted,
        predicates.len(),
        stats.deleted
    );
    Ok(stats)
}

/// Stored triple counts per predicate
pub fn count_by_predicate(conn: &Connection) -> Result<Vec<(String, usize)>> {
    let mut stmt = conn.prepare(
        "SELECT predicate, COUNT(*) FROM triples GROUP BY predicate ORDER BY predicate",
    )?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
    let mut counts = Vec::new();
    for row in rows {
        let (predicate, count) = row?;
        counts.push((predicate, count as usize));
    }
    Ok(counts)
}
