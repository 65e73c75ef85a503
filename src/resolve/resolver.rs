use std::collections::{BTreeMap, BTreeSet, HashMap};

use rusqlite::Connection;

use super::identity::natural_key;
use super::store;
use crate::error::{PlaygraphError, Result};
use crate::model::{CanonicalEntity, EntityAttributes, EntityId, EntityKind, EntityRef};

/// A raw record asking for a canonical id
#[derive(Debug, Clone)]
pub struct RawIdentity {
    pub kind: EntityKind,
    pub name: String,
    pub external_id: Option<String>,
    pub context: Option<String>,
    pub attributes: EntityAttributes,
    /// Entity this source record was bridged to by an earlier run
    pub bridged: Option<EntityId>,
}

impl RawIdentity {
    pub fn new(kind: EntityKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            external_id: None,
            context: None,
            attributes: EntityAttributes::empty(),
            bridged: None,
        }
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_attributes(mut self, attributes: EntityAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_bridge(mut self, bridged: Option<EntityId>) -> Self {
        self.bridged = bridged;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub entity: EntityRef,
    pub created: bool,
    /// An existing name-only entity gained an external id
    pub enriched: bool,
}

impl Resolution {
    fn existing(entity: EntityRef) -> Self {
        Self { entity, created: false, enriched: false }
    }
}

type IndexKey = (EntityKind, String);

/// In-memory identity index over every canonical entity.
///
/// All lookups and creations go through here; changes are tracked in a
/// dirty set and written back by [`EntityResolver::flush`].
#[derive(Debug, Default)]
pub struct EntityResolver {
    entities: HashMap<EntityId, CanonicalEntity>,
    by_external: HashMap<IndexKey, EntityId>,
    by_natural: HashMap<IndexKey, EntityId>,
    by_fallback: HashMap<IndexKey, Vec<EntityId>>,
    dirty: BTreeSet<EntityId>,
}

impl EntityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the index from the `entities` table
    pub fn load(conn: &Connection) -> Result<Self> {
        let mut resolver = Self::new();
        for entity in store::load_entities(conn)? {
            resolver.index(entity);
        }
        log::debug!("Loaded {} canonical entities into the resolver", resolver.len());
        Ok(resolver)
    }

    /// Write created or changed entities back to the store
    pub fn flush(&mut self, conn: &Connection) -> Result<usize> {
        let mut written = 0;
        for id in &self.dirty {
            if let Some(entity) = self.entities.get(id) {
                store::upsert_entity(conn, entity)?;
                written += 1;
            }
        }
        self.dirty.clear();
        Ok(written)
    }

    /// Map a raw record to its canonical id, creating or enriching an entity when needed.
    pub fn resolve(&mut self, raw: RawIdentity) -> Result<Resolution> {
        let key = natural_key(raw.kind, raw.external_id.as_deref(), &raw.name, raw.context.as_deref())?;
        let kind = raw.kind;

        if let Some(ext) = &key.external_id {
            if let Some(id) = self.by_external.get(&(kind, ext.clone())).cloned() {
                self.refresh_attributes(&id, raw.attributes);
                return Ok(Resolution::existing(EntityRef::new(kind, id)));
            }
        }

        if let Some(id) = self.by_natural.get(&(kind, key.natural_key.clone())) {
            return Ok(Resolution::existing(EntityRef::new(kind, id.clone())));
        }

        // A name-only record keeps the link it was given while its name is unchanged
        if key.external_id.is_none() {
            if let Some(entity) = raw.bridged.as_ref().and_then(|id| self.entities.get(id)) {
                if entity.kind == kind && entity.fallback_key == key.fallback_key {
                    return Ok(Resolution::existing(entity.entity_ref()));
                }
            }
        }

        let candidates: Vec<&CanonicalEntity> = self
            .by_fallback
            .get(&(kind, key.fallback_key.clone()))
            .map(|ids| ids.iter().filter_map(|id| self.entities.get(id)).collect())
            .unwrap_or_default();

        match &key.external_id {
            Some(ext) => {
                let bare: Vec<EntityId> = candidates
                    .iter()
                    .filter(|c| c.external_id.is_none())
                    .map(|c| c.id.clone())
                    .collect();
                let keyed = candidates.len() - bare.len();
                match (bare.len(), keyed) {
                    (0, _) => {}
                    (1, 0) => {
                        let id = bare[0].clone();
                        self.enrich(&id, ext.clone(), raw.attributes);
                        return Ok(Resolution {
                            entity: EntityRef::new(kind, id),
                            created: false,
                            enriched: true,
                        });
                    }
                    _ => {
                        return Err(PlaygraphError::AmbiguousIdentity {
                            key: key.fallback_key.clone(),
                            candidates: candidates.iter().map(|c| c.id.to_string()).collect(),
                        })
                    }
                }
            }
            None => match candidates.len() {
                0 => {}
                1 => return Ok(Resolution::existing(candidates[0].entity_ref())),
                _ => {
                    return Err(PlaygraphError::AmbiguousIdentity {
                        key: key.fallback_key.clone(),
                        candidates: candidates.iter().map(|c| c.id.to_string()).collect(),
                    })
                }
            },
        }

        let now = chrono::Utc::now().to_rfc3339();
        let entity = CanonicalEntity {
            id: EntityId::generate(),
            kind,
            external_id: key.external_id,
            natural_key: key.natural_key,
            fallback_key: key.fallback_key,
            name: raw.name.trim().to_string(),
            attributes: raw.attributes,
            created_at: now.clone(),
            updated_at: now,
        };
        let entity_ref = entity.entity_ref();
        self.dirty.insert(entity.id.clone());
        self.index(entity);
        Ok(Resolution { entity: entity_ref, created: true, enriched: false })
    }

    pub fn lookup_external(&self, kind: EntityKind, external_id: &str) -> Option<EntityRef> {
        self.by_external
            .get(&(kind, external_id.trim().to_string()))
            .map(|id| EntityRef::new(kind, id.clone()))
    }

    pub fn lookup_natural(&self, kind: EntityKind, natural_key: &str) -> Option<EntityRef> {
        self.by_natural
            .get(&(kind, natural_key.to_string()))
            .map(|id| EntityRef::new(kind, id.clone()))
    }

    /// True when the reference names an indexed entity of the same kind
    pub fn contains(&self, entity: &EntityRef) -> bool {
        self.entities
            .get(&entity.id)
            .map(|e| e.kind == entity.kind)
            .unwrap_or(false)
    }

    pub fn get(&self, id: &EntityId) -> Option<&CanonicalEntity> {
        self.entities.get(id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn count_by_kind(&self) -> BTreeMap<EntityKind, usize> {
        let mut counts = BTreeMap::new();
        for entity in self.entities.values() {
            *counts.entry(entity.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Entities created or changed since the last flush
    pub fn pending(&self) -> usize {
        self.dirty.len()
    }

    fn index(&mut self, entity: CanonicalEntity) {
        let kind = entity.kind;
        if let Some(ext) = &entity.external_id {
            self.by_external.insert((kind, ext.clone()), entity.id.clone());
        }
        self.by_natural.insert((kind, entity.natural_key.clone()), entity.id.clone());
        self.by_fallback
            .entry((kind, entity.fallback_key.clone()))
            .or_default()
            .push(entity.id.clone());
        self.entities.insert(entity.id.clone(), entity);
    }

    // External ids are only ever added; the natural key stays as created.
    fn enrich(&mut self, id: &EntityId, external_id: String, attributes: EntityAttributes) {
        if let Some(entity) = self.entities.get_mut(id) {
            if entity.external_id.is_some() {
                return;
            }
            log::debug!("Enriching {} {} with external id {}", entity.kind, entity.id, external_id);
            self.by_external.insert((entity.kind, external_id.clone()), id.clone());
            entity.external_id = Some(external_id);
            if entity.attributes == EntityAttributes::empty() {
                entity.attributes = attributes;
            }
            entity.updated_at = chrono::Utc::now().to_rfc3339();
            self.dirty.insert(id.clone());
        }
    }

    fn refresh_attributes(&mut self, id: &EntityId, attributes: EntityAttributes) {
        if attributes == EntityAttributes::empty() {
            return;
        }
        if let Some(entity) = self.entities.get_mut(id) {
            if entity.attributes != attributes {
                entity.attributes = attributes;
                entity.updated_at = chrono::Utc::now().to_rfc3339();
                self.dirty.insert(id.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_connection;
    use crate::model::{ArtistAttributes, ArtistType};

    fn artist(name: &str) -> RawIdentity {
        RawIdentity::new(EntityKind::Artist, name)
    }

    #[test]
    fn test_same_external_id_same_entity_despite_name_noise() {
        let mut resolver = EntityResolver::new();
        let a = resolver.resolve(artist("Sleater-Kinney").with_external_id("mb-sk")).unwrap();
        let b = resolver.resolve(artist("  sleater-KINNEY ").with_external_id("mb-sk")).unwrap();
        let c = resolver.resolve(artist("Sleater Kinney (band)").with_external_id(" mb-sk")).unwrap();
        assert!(a.created);
        assert_eq!(a.entity, b.entity);
        assert_eq!(a.entity, c.entity);
        assert_eq!(resolver.len(), 1);
    }

    #[test]
    fn test_name_only_records_dedupe() {
        let mut resolver = EntityResolver::new();
        let a = resolver.resolve(RawIdentity::new(EntityKind::Genre, "Shoegaze")).unwrap();
        let b = resolver.resolve(RawIdentity::new(EntityKind::Genre, "  SHOEGAZE")).unwrap();
        assert_eq!(a.entity, b.entity);
        assert!(!b.created);
        assert_eq!(resolver.count_by_kind().get(&EntityKind::Genre), Some(&1));
    }

    #[test]
    fn test_enriches_single_bare_candidate() {
        let mut resolver = EntityResolver::new();
        let bare = resolver.resolve(artist("Nirvana")).unwrap();
        let keyed = resolver.resolve(artist("Nirvana").with_external_id("mb-us")).unwrap();
        assert_eq!(bare.entity, keyed.entity);
        assert!(keyed.enriched);
        assert_eq!(resolver.lookup_external(EntityKind::Artist, "mb-us"), Some(bare.entity.clone()));
        let entity = resolver.get(&bare.entity.id).unwrap();
        assert_eq!(entity.external_id.as_deref(), Some("mb-us"));
    }

    #[test]
    fn test_homonyms_stay_distinct_and_bare_record_is_ambiguous() {
        let mut resolver = EntityResolver::new();
        let us = resolver.resolve(artist("Nirvana").with_external_id("mb-us")).unwrap();
        let uk = resolver.resolve(artist("Nirvana").with_external_id("mb-uk")).unwrap();
        assert_ne!(us.entity, uk.entity);
        assert!(uk.created);

        let err = resolver.resolve(artist("nirvana")).unwrap_err();
        match err {
            PlaygraphError::AmbiguousIdentity { candidates, .. } => assert_eq!(candidates.len(), 2),
            other => panic!("expected AmbiguousIdentity, got {:?}", other),
        }
        assert_eq!(resolver.len(), 2);
    }

    #[test]
    fn test_bare_record_links_to_single_keyed_entity() {
        let mut resolver = EntityResolver::new();
        let keyed = resolver.resolve(artist("Mudhoney").with_external_id("mb-m")).unwrap();
        let bare = resolver.resolve(artist("mudhoney")).unwrap();
        assert_eq!(keyed.entity, bare.entity);
        assert_eq!(resolver.len(), 1);
    }

    #[test]
    fn test_bridged_bare_record_survives_new_homonym() {
        let mut resolver = EntityResolver::new();
        let us = resolver.resolve(artist("Nirvana").with_external_id("mb-us")).unwrap();
        let linked = resolver.resolve(artist("nirvana")).unwrap();
        assert_eq!(linked.entity, us.entity);

        resolver.resolve(artist("Nirvana").with_external_id("mb-uk")).unwrap();

        // same record, same bridge: same answer as before
        let again = resolver
            .resolve(artist("nirvana").with_bridge(Some(linked.entity.id.clone())))
            .unwrap();
        assert_eq!(again.entity, us.entity);
        assert!(!again.created);

        // without a bridge the homonyms are indistinguishable
        assert!(matches!(
            resolver.resolve(artist("nirvana")),
            Err(PlaygraphError::AmbiguousIdentity { .. })
        ));
        assert_eq!(resolver.len(), 2);
    }

    #[test]
    fn test_bridge_ignored_after_rename() {
        let mut resolver = EntityResolver::new();
        let hole = resolver.resolve(artist("Hole").with_external_id("mb-hole")).unwrap();
        let renamed = resolver
            .resolve(artist("Babes in Toyland").with_bridge(Some(hole.entity.id.clone())))
            .unwrap();
        assert!(renamed.created);
        assert_ne!(renamed.entity, hole.entity);
    }

    #[test]
    fn test_enriched_entity_then_homonym() {
        let mut resolver = EntityResolver::new();
        let bare = resolver.resolve(artist("Low")).unwrap();
        let duluth = resolver.resolve(artist("Low").with_external_id("mb-duluth")).unwrap();
        let other = resolver.resolve(artist("Low").with_external_id("mb-other")).unwrap();
        assert_eq!(bare.entity, duluth.entity);
        assert!(other.created);
        assert_eq!(resolver.len(), 2);

        // the name-only record still hits its own natural key
        let again = resolver.resolve(artist("low")).unwrap();
        assert_eq!(again.entity, bare.entity);
    }

    #[test]
    fn test_mixed_candidates_are_ambiguous() {
        let (conn, _temp) = test_connection();
        let key = natural_key(EntityKind::Artist, None, "Low", None).unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        let stored = |id: &str, ext: Option<&str>| CanonicalEntity {
            id: EntityId::from(id),
            kind: EntityKind::Artist,
            external_id: ext.map(str::to_string),
            natural_key: ext.map(str::to_string).unwrap_or_else(|| key.fallback_key.clone()),
            fallback_key: key.fallback_key.clone(),
            name: "Low".to_string(),
            attributes: EntityAttributes::empty(),
            created_at: now.clone(),
            updated_at: now.clone(),
        };
        store::upsert_entity(&conn, &stored("bare", None)).unwrap();
        store::upsert_entity(&conn, &stored("keyed", Some("mb-duluth"))).unwrap();

        let mut resolver = EntityResolver::load(&conn).unwrap();
        let err = resolver.resolve(artist("Low").with_external_id("mb-new")).unwrap_err();
        assert!(matches!(err, PlaygraphError::AmbiguousIdentity { .. }));
        assert_eq!(resolver.len(), 2);
    }

    #[test]
    fn test_blank_name_rejected() {
        let mut resolver = EntityResolver::new();
        let err = resolver.resolve(artist("   ").with_external_id("mb-x")).unwrap_err();
        assert!(matches!(err, PlaygraphError::InvalidIdentity(_)));
        assert!(resolver.is_empty());
    }

    #[test]
    fn test_contains_checks_kind() {
        let mut resolver = EntityResolver::new();
        let r = resolver.resolve(artist("Built to Spill")).unwrap();
        assert!(resolver.contains(&r.entity));
        let wrong_kind = EntityRef::new(EntityKind::Song, r.entity.id.clone());
        assert!(!resolver.contains(&wrong_kind));
    }

    #[test]
    fn test_idempotent_across_reload() {
        let (conn, _temp) = test_connection();
        let records = vec![
            artist("Nirvana").with_external_id("mb-us"),
            artist("Nirvana").with_external_id("mb-uk"),
            artist("Modest Mouse"),
            RawIdentity::new(EntityKind::Genre, "Grunge"),
        ];

        let mut first = EntityResolver::load(&conn).unwrap();
        let ids_first: Vec<EntityRef> = records
            .iter()
            .map(|r| first.resolve(r.clone()).unwrap().entity)
            .collect();
        assert_eq!(first.flush(&conn).unwrap(), 4);
        assert_eq!(first.pending(), 0);

        let mut second = EntityResolver::load(&conn).unwrap();
        let ids_second: Vec<EntityRef> = records
            .iter()
            .map(|r| second.resolve(r.clone()).unwrap().entity)
            .collect();
        assert_eq!(ids_first, ids_second);
        assert_eq!(second.len(), 4);
        assert_eq!(second.flush(&conn).unwrap(), 0);
    }

    #[test]
    fn test_keyed_hit_refreshes_attributes() {
        let mut resolver = EntityResolver::new();
        let r = resolver.resolve(artist("Heart").with_external_id("mb-h")).unwrap();
        let (conn, _temp) = test_connection();
        resolver.flush(&conn).unwrap();

        let attrs = EntityAttributes::Artist(ArtistAttributes {
            artist_type: ArtistType::Group,
            ..Default::default()
        });
        resolver
            .resolve(artist("Heart").with_external_id("mb-h").with_attributes(attrs.clone()))
            .unwrap();
        assert_eq!(resolver.pending(), 1);
        assert_eq!(resolver.get(&r.entity.id).unwrap().attributes, attrs);
    }
}
