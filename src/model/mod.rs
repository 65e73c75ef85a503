//! Canonical graph vocabulary: entity kinds, identifiers, attributes and triples.

mod entity;
mod triple;

pub use entity::{
    normalize_partial_date, ArtistAttributes, ArtistType, CanonicalEntity, ContributionAttributes,
    EntityAttributes, InstrumentAttributes, InstrumentFamily, LocationAttributes, PlayAttributes,
    RawArtistFields, RawReleaseFields, RawShowFields, ReleaseAttributes, ShowAttributes,
    SongAttributes,
};
pub use triple::{
    CandidateTriple, Endpoint, Predicate, Provenance, RejectionReason, Triple, TripleRejection,
};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PlaygraphError;

/// Kind of a canonical entity. `natural_key` and `external_id` are unique within a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Artist,
    Person,
    Song,
    Album,
    Release,
    Label,
    Genre,
    Instrument,
    Role,
    Location,
    Venue,
    Event,
    Url,
    Contribution,
    Play,
    Show,
    Host,
    Program,
}

impl EntityKind {
    pub const ALL: [EntityKind; 18] = [
        EntityKind::Artist,
        EntityKind::Person,
        EntityKind::Song,
        EntityKind::Album,
        EntityKind::Release,
        EntityKind::Label,
        EntityKind::Genre,
        EntityKind::Instrument,
        EntityKind::Role,
        EntityKind::Location,
        EntityKind::Venue,
        EntityKind::Event,
        EntityKind::Url,
        EntityKind::Contribution,
        EntityKind::Play,
        EntityKind::Show,
        EntityKind::Host,
        EntityKind::Program,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Artist => "artist",
            EntityKind::Person => "person",
            EntityKind::Song => "song",
            EntityKind::Album => "album",
            EntityKind::Release => "release",
            EntityKind::Label => "label",
            EntityKind::Genre => "genre",
            EntityKind::Instrument => "instrument",
            EntityKind::Role => "role",
            EntityKind::Location => "location",
            EntityKind::Venue => "venue",
            EntityKind::Event => "event",
            EntityKind::Url => "url",
            EntityKind::Contribution => "contribution",
            EntityKind::Play => "play",
            EntityKind::Show => "show",
            EntityKind::Host => "host",
            EntityKind::Program => "program",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = PlaygraphError;

    /// Accepts canonical names plus the public dump's vocabulary
    /// (`recording`, `release_group`, `area`, `place`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        let kind = match normalized.as_str() {
            "artist" => EntityKind::Artist,
            "person" => EntityKind::Person,
            "song" | "recording" | "track" => EntityKind::Song,
            "album" | "release_group" => EntityKind::Album,
            "release" => EntityKind::Release,
            "label" | "record_label" => EntityKind::Label,
            "genre" => EntityKind::Genre,
            "instrument" => EntityKind::Instrument,
            "role" => EntityKind::Role,
            "location" | "area" | "place" => EntityKind::Location,
            "venue" => EntityKind::Venue,
            "event" => EntityKind::Event,
            "url" => EntityKind::Url,
            "contribution" => EntityKind::Contribution,
            "play" => EntityKind::Play,
            "show" => EntityKind::Show,
            "host" | "dj" => EntityKind::Host,
            "program" | "programme" => EntityKind::Program,
            other => {
                return Err(PlaygraphError::InvalidInput(format!("unknown entity kind: {}", other)))
            }
        };
        Ok(kind)
    }
}

/// Opaque, stable canonical identifier (UUID v4 once allocated).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Allocate a fresh identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A typed pointer at a canonical entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: EntityId,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: EntityId) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.as_str().parse::<EntityKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_kind_accepts_public_dump_vocabulary() {
        assert_eq!("recording".parse::<EntityKind>().unwrap(), EntityKind::Song);
        assert_eq!("release_group".parse::<EntityKind>().unwrap(), EntityKind::Album);
        assert_eq!("release-group".parse::<EntityKind>().unwrap(), EntityKind::Album);
        assert_eq!("Area".parse::<EntityKind>().unwrap(), EntityKind::Location);
        assert_eq!("DJ".parse::<EntityKind>().unwrap(), EntityKind::Host);
        assert!("spaceship".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_entity_id_generate_is_uuid() {
        let id = EntityId::generate();
        assert_eq!(id.as_str().len(), 36);
        assert_ne!(id, EntityId::generate());
    }

    #[test]
    fn test_entity_ref_display() {
        let r = EntityRef::new(EntityKind::Artist, EntityId::from("a-1"));
        assert_eq!(r.to_string(), "artist:a-1");
    }
}
