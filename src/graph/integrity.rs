//! Full scans of the stored graph for broken references.

use rusqlite::Connection;
use serde::Serialize;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanTriple {
    pub triple_id: String,
    /// subject, object or qualifier
    pub role: String,
    pub missing_id: String,
}

#[derive(Debug, Default, Serialize)]
pub struct IntegrityReport {
    pub orphan_triples: Vec<OrphanTriple>,
    /// Triples whose recorded endpoint kind differs from the entity's kind
    pub kind_mismatches: usize,
    pub dangling_bridges: usize,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.orphan_triples.is_empty() && self.kind_mismatches == 0 && self.dangling_bridges == 0
    }
}

/// Triples whose subject, object or qualifier has no entity row
pub fn find_orphan_triples(conn: &Connection) -> Result<Vec<OrphanTriple>> {
    let mut stmt = conn.prepare(
        "SELECT t.triple_id, 'subject', t.subject_id FROM triples t
            LEFT JOIN entities e ON e.id = t.subject_id WHERE e.id IS NULL
         UNION ALL
         SELECT t.triple_id, 'object', t.object_id FROM triples t
            LEFT JOIN entities e ON e.id = t.object_id WHERE e.id IS NULL
         UNION ALL
         SELECT t.triple_id, 'qualifier', t.qualifier_id FROM triples t
            LEFT JOIN entities e ON e.id = t.qualifier_id
            WHERE t.qualifier_id != '' AND e.id IS NULL",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(OrphanTriple {
            triple_id: row.get(0)?,
            role: row.get(1)?,
            missing_id: row.get(2)?,
        })
    })?;
    let mut orphans = Vec::new();
    for row in rows {
        orphans.push(row?);
    }
    Ok(orphans)
}

fn count(conn: &Connection, sql: &str) -> Result<usize> {
    let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(n as usize)
}

/// Orphan scan plus kind and bridge consistency checks
pub fn verify(conn: &Connection) -> Result<IntegrityReport> {
    let report = IntegrityReport {
        orphan_triples: find_orphan_triples(conn)?,
        kind_mismatches: count(
            conn,
            "SELECT COUNT(*) FROM triples t
             JOIN entities s ON s.id = t.subject_id
             JOIN entities o ON o.id = t.object_id
             WHERE s.kind != t.subject_kind OR o.kind != t.object_kind",
        )?,
        dangling_bridges: count(
            conn,
            "SELECT COUNT(*) FROM bridge_records b
             LEFT JOIN entities e ON e.id = b.canonical_id
             WHERE e.id IS NULL OR e.kind != b.kind",
        )?,
    };

    if report.is_clean() {
        log::info!("Graph integrity check passed");
    } else {
        log::warn!(
            "Graph integrity check failed: {} orphan references, {} kind mismatches, {} dangling bridges",
            report.orphan_triples.len(),
            report.kind_mismatches,
            report.dangling_bridges
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_connection;
    use crate::graph::consolidator::commit;
    use crate::model::{EntityId, EntityKind, EntityRef, Predicate, Provenance, Triple};
    use crate::resolve::{EntityResolver, RawIdentity};
    use std::collections::BTreeSet;

    #[test]
    fn test_detects_orphans() {
        let (conn, _temp) = test_connection();
        let mut resolver = EntityResolver::new();
        let band = resolver.resolve(RawIdentity::new(EntityKind::Artist, "Wipers")).unwrap().entity;
        let member = resolver.resolve(RawIdentity::new(EntityKind::Artist, "Greg Sage")).unwrap().entity;
        resolver.flush(&conn).unwrap();

        let provenance = Provenance {
            source_relation_type: "member of band".into(),
            source_record_id: "rel-1".into(),
        };
        let ghost = EntityRef::new(EntityKind::Instrument, EntityId::from("ghost"));
        let good = Triple::new(band.clone(), Predicate::HasMember, member.clone(), None, provenance.clone());
        let bad = Triple::new(member, Predicate::PlaysInstrumentOn, band, Some(ghost), provenance);
        commit(&conn, &[good], &BTreeSet::new(), &BTreeSet::new()).unwrap();
        assert!(verify(&conn).unwrap().is_clean());

        commit(&conn, &[bad.clone()], &BTreeSet::new(), &BTreeSet::new()).unwrap();
        let orphans = find_orphan_triples(&conn).unwrap();
        assert_eq!(
            orphans,
            vec![OrphanTriple {
                triple_id: bad.triple_id,
                role: "qualifier".into(),
                missing_id: "ghost".into(),
            }]
        );
        assert!(!verify(&conn).unwrap().is_clean());
    }
}
