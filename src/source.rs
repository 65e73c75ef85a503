//! Read-only access to the pre-materialized input tables.
//!
//! The normalization stage fills `raw_entities`, `raw_relations`, `raw_plays`
//! and `raw_show_hosts`; the pipeline never writes them.

use rusqlite::Connection;

use crate::db::require_tables;
use crate::error::Result;
use crate::model::EntityKind;

pub const RAW_ENTITIES: &str = "raw_entities";
pub const RAW_RELATIONS: &str = "raw_relations";
pub const RAW_PLAYS: &str = "raw_plays";
pub const RAW_SHOW_HOSTS: &str = "raw_show_hosts";

/// A raw entity row from one source system
#[derive(Debug, Clone)]
pub struct RawEntityRecord {
    pub source_system: String,
    pub record_id: String,
    pub kind: EntityKind,
    pub external_id: Option<String>,
    pub name: String,
    /// Disambiguating context for name-only keys (parent artist, locale, ...)
    pub context: Option<String>,
    pub attributes_json: Option<String>,
}

/// Raw entities grouped for resolution, plus rows whose kind is unknown.
#[derive(Debug, Default)]
pub struct RawEntityBatch {
    pub records: Vec<RawEntityRecord>,
    pub unknown_kind: usize,
}

impl RawEntityBatch {
    /// Records of one kind, in table order
    pub fn of_kind(&self, kind: EntityKind) -> impl Iterator<Item = &RawEntityRecord> {
        self.records.iter().filter(move |r| r.kind == kind)
    }
}

/// Raw relationship direction flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    /// `Ok(None)` when the flag is absent, `Err(raw)` when present but unknown.
    pub fn parse(raw: Option<&str>) -> std::result::Result<Option<Direction>, String> {
        match raw.map(|r| r.trim().to_lowercase()) {
            None => Ok(None),
            Some(r) if r.is_empty() => Ok(None),
            Some(r) if r == "forward" => Ok(Some(Direction::Forward)),
            Some(r) if r == "backward" => Ok(Some(Direction::Backward)),
            Some(r) => Err(r),
        }
    }
}

/// One row of the third-party relationship table
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawRelation {
    pub record_id: String,
    pub source_system: String,
    pub source_ref: String,
    pub source_kind: String,
    pub relation_type: String,
    pub target_ref: Option<String>,
    pub target_kind: String,
    pub direction: Option<String>,
    pub attributes_json: Option<String>,
    pub begin_date: Option<String>,
    pub end_date: Option<String>,
}

impl RawRelation {
    pub fn source_entity_kind(&self) -> Option<EntityKind> {
        self.source_kind.parse().ok()
    }

    pub fn target_entity_kind(&self) -> Option<EntityKind> {
        self.target_kind.parse().ok()
    }

    /// Non-blank target reference
    pub fn target(&self) -> Option<&str> {
        self.target_ref.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }

    /// Attribute list; an absent column is an empty list.
    pub fn attribute_values(&self) -> serde_json::Result<Vec<String>> {
        match self.attributes_json.as_deref().map(str::trim) {
            None | Some("") => Ok(Vec::new()),
            Some(raw) => serde_json::from_str(raw),
        }
    }
}

/// One first-party play event
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawPlay {
    pub record_id: String,
    pub source_system: String,
    pub track_ref: Option<String>,
    pub artist_ref: Option<String>,
    pub played_at: Option<String>,
    /// First-party record id of the show it aired in
    pub show_ref: Option<String>,
}

/// A host presenting a show
#[derive(Debug, Clone, PartialEq)]
pub struct RawShowHost {
    pub source_system: String,
    pub show_ref: String,
    pub host_ref: String,
}

/// Load every raw entity row; rows with an unrecognized kind are counted and skipped.
pub fn read_entities(conn: &Connection) -> Result<RawEntityBatch> {
    require_tables(conn, &[RAW_ENTITIES])?;
    let mut stmt = conn.prepare(
        "SELECT source_system, record_id, kind, external_id, name, context, attributes_json \
         FROM raw_entities ORDER BY source_system, kind, record_id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, Option<String>>(5)?,
            row.get::<_, Option<String>>(6)?,
        ))
    })?;

    let mut batch = RawEntityBatch::default();
    for row in rows {
        let (source_system, record_id, kind, external_id, name, context, attributes_json) = row?;
        match kind.parse::<EntityKind>() {
            Ok(kind) => batch.records.push(RawEntityRecord {
                source_system,
                record_id,
                kind,
                external_id,
                name,
                context,
                attributes_json,
            }),
            Err(_) => {
                log::debug!("Skipping raw entity {}/{} with unknown kind {}", source_system, record_id, kind);
                batch.unknown_kind += 1;
            }
        }
    }
    Ok(batch)
}

/// Load every raw relationship row
pub fn read_relations(conn: &Connection) -> Result<Vec<RawRelation>> {
    require_tables(conn, &[RAW_RELATIONS])?;
    let mut stmt = conn.prepare(
        "SELECT record_id, source_system, source_ref, source_kind, relation_type, target_ref, \
                target_kind, direction, attributes_json, begin_date, end_date \
         FROM raw_relations ORDER BY record_id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(RawRelation {
            record_id: row.get(0)?,
            source_system: row.get(1)?,
            source_ref: row.get(2)?,
            source_kind: row.get(3)?,
            relation_type: row.get(4)?,
            target_ref: row.get(5)?,
            target_kind: row.get(6)?,
            direction: row.get(7)?,
            attributes_json: row.get(8)?,
            begin_date: row.get(9)?,
            end_date: row.get(10)?,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Load every first-party play row
pub fn read_plays(conn: &Connection) -> Result<Vec<RawPlay>> {
    require_tables(conn, &[RAW_PLAYS])?;
    let mut stmt = conn.prepare(
        "SELECT record_id, source_system, track_ref, artist_ref, played_at, show_ref FROM raw_plays ORDER BY record_id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(RawPlay {
            record_id: row.get(0)?,
            source_system: row.get(1)?,
            track_ref: row.get(2)?,
            artist_ref: row.get(3)?,
            played_at: row.get(4)?,
            show_ref: row.get(5)?,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn read_show_hosts(conn: &Connection) -> Result<Vec<RawShowHost>> {
    require_tables(conn, &[RAW_SHOW_HOSTS])?;
    let mut stmt = conn.prepare(
        "SELECT source_system, show_ref, host_ref FROM raw_show_hosts ORDER BY source_system, show_ref, host_ref",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(RawShowHost {
            source_system: row.get(0)?,
            show_ref: row.get(1)?,
            host_ref: row.get(2)?,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_connection;
    use crate::error::PlaygraphError;
    use rusqlite::params;

    #[test]
    fn test_direction_parse() {
        assert_eq!(Direction::parse(None), Ok(None));
        assert_eq!(Direction::parse(Some("  ")), Ok(None));
        assert_eq!(Direction::parse(Some("Forward")), Ok(Some(Direction::Forward)));
        assert_eq!(Direction::parse(Some("backward")), Ok(Some(Direction::Backward)));
        assert_eq!(Direction::parse(Some("sideways")), Err("sideways".to_string()));
    }

    #[test]
    fn test_attribute_values() {
        let mut rel = RawRelation::default();
        assert!(rel.attribute_values().unwrap().is_empty());
        rel.attributes_json = Some(r#"["guitar","vocals"]"#.into());
        assert_eq!(rel.attribute_values().unwrap(), vec!["guitar", "vocals"]);
        rel.attributes_json = Some("guitar".into());
        assert!(rel.attribute_values().is_err());
    }

    #[test]
    fn test_read_entities_skips_unknown_kinds() {
        let (conn, _temp) = test_connection();
        conn.execute(
            "INSERT INTO raw_entities (source_system, record_id, kind, external_id, name) VALUES (?1, ?2, ?3, ?4, ?5)",
            params!["musicbrainz", "1", "artist", "mb-a", "Nirvana"],
        ).unwrap();
        conn.execute(
            "INSERT INTO raw_entities (source_system, record_id, kind, name) VALUES (?1, ?2, ?3, ?4)",
            params!["musicbrainz", "2", "recording", "Lithium"],
        ).unwrap();
        conn.execute(
            "INSERT INTO raw_entities (source_system, record_id, kind, name) VALUES (?1, ?2, ?3, ?4)",
            params!["musicbrainz", "3", "series", "Peel Sessions"],
        ).unwrap();

        let batch = read_entities(&conn).unwrap();
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.unknown_kind, 1);
        assert_eq!(batch.of_kind(EntityKind::Song).count(), 1);
    }

    #[test]
    fn test_read_relations_missing_table_is_fatal() {
        let (conn, _temp) = test_connection();
        conn.execute("DROP TABLE raw_relations", []).unwrap();
        let err = read_relations(&conn).unwrap_err();
        assert!(matches!(err, PlaygraphError::MissingTable(_)));
    }
}
