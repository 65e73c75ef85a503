use rusqlite::{params, Connection};
use serde::Serialize;

use crate::error::Result;
use crate::model::{CanonicalEntity, EntityAttributes, EntityId, EntityKind};

/// Load every canonical entity
pub fn load_entities(conn: &Connection) -> Result<Vec<CanonicalEntity>> {
    let mut stmt = conn.prepare(
        "SELECT id, kind, external_id, natural_key, fallback_key, name, attributes_json, created_at, updated_at \
         FROM entities ORDER BY created_at, id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, String>(6)?,
            row.get::<_, String>(7)?,
            row.get::<_, String>(8)?,
        ))
    })?;

    let mut entities = Vec::new();
    for row in rows {
        let (id, kind, external_id, natural_key, fallback_key, name, attributes_json, created_at, updated_at) = row?;
        let kind: EntityKind = kind.parse()?;
        let attributes: EntityAttributes = serde_json::from_str(&attributes_json)?;
        entities.push(CanonicalEntity {
            id: EntityId::from(id),
            kind,
            external_id,
            natural_key,
            fallback_key,
            name,
            attributes,
            created_at,
            updated_at,
        });
    }
    Ok(entities)
}

/// Insert an entity, or update the mutable columns of an existing one
pub fn upsert_entity(conn: &Connection, entity: &CanonicalEntity) -> Result<()> {
    let attributes_json = serde_json::to_string(&entity.attributes)?;
    conn.execute(
        "INSERT INTO entities (id, kind, external_id, natural_key, fallback_key, name, attributes_json, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(id) DO UPDATE SET
            external_id = excluded.external_id,
            name = excluded.name,
            attributes_json = excluded.attributes_json,
            updated_at = excluded.updated_at",
        params![
            entity.id.as_str(),
            entity.kind.as_str(),
            entity.external_id,
            entity.natural_key,
            entity.fallback_key,
            entity.name,
            attributes_json,
            entity.created_at,
            entity.updated_at,
        ],
    )?;
    Ok(())
}

/// A raw record held back instead of being merged
#[derive(Debug, Clone, Serialize)]
pub struct QuarantineRecord {
    pub source_system: String,
    pub record_id: String,
    pub kind: EntityKind,
    pub name: String,
    pub external_id: Option<String>,
    pub reason: String,
    pub candidates: Vec<String>,
}

pub fn write_quarantine(conn: &Connection, record: &QuarantineRecord) -> Result<()> {
    let candidates_json = serde_json::to_string(&record.candidates)?;
    conn.execute(
        "INSERT OR REPLACE INTO identity_quarantine
            (source_system, record_id, kind, name, external_id, reason, candidates_json, quarantined_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            record.source_system,
            record.record_id,
            record.kind.as_str(),
            record.name,
            record.external_id,
            record.reason,
            candidates_json,
            chrono::Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Quarantine is rebuilt by every entity pass
pub fn clear_quarantine(conn: &Connection) -> Result<usize> {
    Ok(conn.execute("DELETE FROM identity_quarantine", [])?)
}

pub fn count_quarantined(conn: &Connection) -> Result<usize> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM identity_quarantine", [], |row| row.get(0))?;
    Ok(count as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_connection;
    use crate::model::{ArtistAttributes, ArtistType};

    fn sample(id: &str, ext: Option<&str>) -> CanonicalEntity {
        let now = chrono::Utc::now().to_rfc3339();
        CanonicalEntity {
            id: EntityId::from(id),
            kind: EntityKind::Artist,
            external_id: ext.map(str::to_string),
            natural_key: ext.unwrap_or("fallback-nirvana").to_string(),
            fallback_key: "fallback-nirvana".to_string(),
            name: "Nirvana".to_string(),
            attributes: EntityAttributes::Artist(ArtistAttributes {
                artist_type: ArtistType::Group,
                ..Default::default()
            }),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    #[test]
    fn test_upsert_and_load() {
        let (conn, _temp) = test_connection();
        let mut entity = sample("e-1", None);
        upsert_entity(&conn, &entity).unwrap();

        entity.external_id = Some("mb-1".to_string());
        upsert_entity(&conn, &entity).unwrap();

        let loaded = load_entities(&conn).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].external_id.as_deref(), Some("mb-1"));
        // natural key is fixed at creation
        assert_eq!(loaded[0].natural_key, "fallback-nirvana");
        assert_eq!(loaded[0].attributes, entity.attributes);
    }

    #[test]
    fn test_quarantine_round() {
        let (conn, _temp) = test_connection();
        let record = QuarantineRecord {
            source_system: "kexp".into(),
            record_id: "r-9".into(),
            kind: EntityKind::Artist,
            name: "Nirvana".into(),
            external_id: None,
            reason: "ambiguous".into(),
            candidates: vec!["e-1".into(), "e-2".into()],
        };
        write_quarantine(&conn, &record).unwrap();
        write_quarantine(&conn, &record).unwrap();
        assert_eq!(count_quarantined(&conn).unwrap(), 1);
        assert_eq!(clear_quarantine(&conn).unwrap(), 1);
        assert_eq!(count_quarantined(&conn).unwrap(), 0);
    }
}
