//! Staging tables carrying phase output to the next phase across restarts.

use std::collections::BTreeSet;

use rusqlite::{params, Connection};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::model::{CandidateTriple, Predicate, Triple};

fn replace_json<T: Serialize>(conn: &Connection, table: &str, column: &str, items: &[T]) -> Result<()> {
    conn.execute(&format!("DELETE FROM {}", table), [])?;
    let mut stmt = conn.prepare(&format!("INSERT INTO {} (seq, {}) VALUES (?1, ?2)", table, column))?;
    for (seq, item) in items.iter().enumerate() {
        stmt.execute(params![seq as i64, serde_json::to_string(item)?])?;
    }
    Ok(())
}

fn load_json<T: DeserializeOwned>(conn: &Connection, table: &str, column: &str) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM {} ORDER BY seq", column, table))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut items: Vec<T> = Vec::new();
    for row in rows {
        items.push(serde_json::from_str(&row?)?);
    }
    Ok(items)
}

pub fn replace_candidates(conn: &Connection, candidates: &[CandidateTriple]) -> Result<()> {
    replace_json(conn, "stage_candidate_triples", "candidate_json", candidates)
}

pub fn load_candidates(conn: &Connection) -> Result<Vec<CandidateTriple>> {
    load_json(conn, "stage_candidate_triples", "candidate_json")
}

pub fn replace_accepted(conn: &Connection, triples: &[Triple]) -> Result<()> {
    replace_json(conn, "stage_accepted_triples", "triple_json", triples)
}

pub fn load_accepted(conn: &Connection) -> Result<Vec<Triple>> {
    load_json(conn, "stage_accepted_triples", "triple_json")
}

pub fn replace_touched(conn: &Connection, touched: &BTreeSet<Predicate>) -> Result<()> {
    conn.execute("DELETE FROM stage_touched_predicates", [])?;
    let mut stmt = conn.prepare("INSERT INTO stage_touched_predicates (predicate) VALUES (?1)")?;
    for predicate in touched {
        stmt.execute([predicate.as_str()])?;
    }
    Ok(())
}

pub fn load_touched(conn: &Connection) -> Result<BTreeSet<Predicate>> {
    let mut stmt = conn.prepare("SELECT predicate FROM stage_touched_predicates")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut touched: BTreeSet<Predicate> = BTreeSet::new();
    for row in rows {
        touched.insert(row?.parse()?);
    }
    Ok(touched)
}

/// Disabled labels, kept with the touched set so a resumed commit sees both
pub fn replace_frozen(conn: &Connection, frozen: &BTreeSet<String>) -> Result<()> {
    conn.execute("DELETE FROM stage_frozen_relation_types", [])?;
    let mut stmt = conn.prepare("INSERT INTO stage_frozen_relation_types (relation_type) VALUES (?1)")?;
    for label in frozen {
        stmt.execute([label])?;
    }
    Ok(())
}

pub fn load_frozen(conn: &Connection) -> Result<BTreeSet<String>> {
    let mut stmt = conn.prepare("SELECT relation_type FROM stage_frozen_relation_types")?;
    let labels = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<BTreeSet<_>>>()?;
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_connection;
    use crate::model::{Endpoint, EntityId, EntityKind, EntityRef, Provenance};

    #[test]
    fn test_staging_replaces_previous_contents() {
        let (conn, _temp) = test_connection();
        let entity = EntityRef::new(EntityKind::Artist, EntityId::from("a"));
        let candidate = CandidateTriple {
            subject: Endpoint::Resolved { entity: entity.clone() },
            predicate: Predicate::HasUrl,
            object: Endpoint::Unresolved { kind: EntityKind::Url, reference: "https://example.org".into() },
            qualifier: None,
            provenance: Provenance {
                source_relation_type: "official homepage".into(),
                source_record_id: "rel-1".into(),
            },
            begin_date: None,
            end_date: None,
        };

        replace_candidates(&conn, &[candidate.clone(), candidate.clone()]).unwrap();
        replace_candidates(&conn, &[candidate.clone()]).unwrap();
        assert_eq!(load_candidates(&conn).unwrap(), vec![candidate]);

        replace_touched(&conn, &BTreeSet::from([Predicate::HasUrl, Predicate::HasMember])).unwrap();
        replace_touched(&conn, &BTreeSet::from([Predicate::HasUrl])).unwrap();
        assert_eq!(load_touched(&conn).unwrap(), BTreeSet::from([Predicate::HasUrl]));

        replace_frozen(&conn, &BTreeSet::from(["bandcamp".to_string(), "discogs".to_string()])).unwrap();
        replace_frozen(&conn, &BTreeSet::from(["bandcamp".to_string()])).unwrap();
        assert_eq!(load_frozen(&conn).unwrap(), BTreeSet::from(["bandcamp".to_string()]));
    }
}
