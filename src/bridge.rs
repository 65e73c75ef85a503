//! Lineage from each source record to the canonical entity it resolved to.

use std::collections::BTreeMap;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::model::{EntityId, EntityKind, EntityRef};

/// Source system for contributions reified from relation rows
pub const RELATION_SOURCE_SYSTEM: &str = "musicbrainz:relation";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeRecord {
    pub kind: EntityKind,
    pub source_system: String,
    pub source_record_id: String,
    pub canonical_id: EntityId,
}

impl BridgeRecord {
    pub fn new(entity: &EntityRef, source_system: &str, source_record_id: &str) -> Self {
        Self {
            kind: entity.kind,
            source_system: source_system.to_string(),
            source_record_id: source_record_id.to_string(),
            canonical_id: entity.id.clone(),
        }
    }
}

/// Upsert bridge rows keyed by (kind, source_system, source_record_id)
pub fn write_bridges(conn: &Connection, records: &[BridgeRecord]) -> Result<usize> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO bridge_records (kind, source_system, source_record_id, canonical_id)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(kind, source_system, source_record_id) DO UPDATE SET canonical_id = excluded.canonical_id",
    )?;
    for record in records {
        stmt.execute(params![
            record.kind.as_str(),
            record.source_system,
            record.source_record_id,
            record.canonical_id.as_str(),
        ])?;
    }
    Ok(records.len())
}

/// Canonical entity behind a source record, if bridged
pub fn lookup(
    conn: &Connection,
    kind: EntityKind,
    source_system: &str,
    source_record_id: &str,
) -> Result<Option<EntityRef>> {
    let id: Option<String> = conn
        .query_row(
            "SELECT canonical_id FROM bridge_records
             WHERE kind = ?1 AND source_system = ?2 AND source_record_id = ?3",
            params![kind.as_str(), source_system, source_record_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id.map(|id| EntityRef::new(kind, EntityId::from(id))))
}

/// Drop the bridge of a source record that no longer resolves
pub fn remove(conn: &Connection, kind: EntityKind, source_system: &str, source_record_id: &str) -> Result<bool> {
    let removed = conn.execute(
        "DELETE FROM bridge_records WHERE kind = ?1 AND source_system = ?2 AND source_record_id = ?3",
        params![kind.as_str(), source_system, source_record_id],
    )?;
    Ok(removed > 0)
}

/// Bridge row counts per source system
pub fn count_by_system(conn: &Connection) -> Result<BTreeMap<String, usize>> {
    let mut stmt = conn.prepare(
        "SELECT source_system, COUNT(*) FROM bridge_records GROUP BY source_system ORDER BY source_system",
    )?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
    let mut counts = BTreeMap::new();
    for row in rows {
        let (system, count) = row?;
        counts.insert(system, count as usize);
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_connection;
    use crate::resolve::{EntityResolver, RawIdentity};

    #[test]
    fn test_write_lookup_and_count() {
        let (conn, _temp) = test_connection();
        let mut resolver = EntityResolver::new();
        let artist = resolver
            .resolve(RawIdentity::new(EntityKind::Artist, "Pearl Jam").with_external_id("mb-pj"))
            .unwrap()
            .entity;
        resolver.flush(&conn).unwrap();

        let records = vec![
            BridgeRecord::new(&artist, "musicbrainz", "mb-pj"),
            BridgeRecord::new(&artist, "kexp", "kexp-artist-77"),
        ];
        assert_eq!(write_bridges(&conn, &records).unwrap(), 2);
        // upsert, not duplicate
        write_bridges(&conn, &records[..1]).unwrap();

        let found = lookup(&conn, EntityKind::Artist, "kexp", "kexp-artist-77").unwrap();
        assert_eq!(found, Some(artist.clone()));
        assert!(lookup(&conn, EntityKind::Song, "kexp", "kexp-artist-77").unwrap().is_none());

        let counts = count_by_system(&conn).unwrap();
        assert_eq!(counts.get("kexp"), Some(&1));
        assert_eq!(counts.get("musicbrainz"), Some(&1));

        assert!(remove(&conn, EntityKind::Artist, "kexp", "kexp-artist-77").unwrap());
        assert!(!remove(&conn, EntityKind::Artist, "kexp", "kexp-artist-77").unwrap());
        assert!(lookup(&conn, EntityKind::Artist, "kexp", "kexp-artist-77").unwrap().is_none());
    }
}
