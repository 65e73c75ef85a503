use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::{EntityId, EntityKind, EntityRef};

/// The single deduplicated representation of a real-world thing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEntity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub external_id: Option<String>,
    pub natural_key: String,
    /// Name-derived composite key, kept even when the external id won.
    pub fallback_key: String,
    pub name: String,
    pub attributes: EntityAttributes,
    pub created_at: String,
    pub updated_at: String,
}

impl CanonicalEntity {
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.kind, self.id.clone())
    }
}

/// Kind-specific field set, tagged by `type` when serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntityAttributes {
    Artist(ArtistAttributes),
    Song(SongAttributes),
    Release(ReleaseAttributes),
    Location(LocationAttributes),
    Instrument(InstrumentAttributes),
    Contribution(ContributionAttributes),
    Play(PlayAttributes),
    Show(ShowAttributes),
    Basic { fields: BTreeMap<String, serde_json::Value> },
}

impl EntityAttributes {
    pub fn empty() -> Self {
        EntityAttributes::Basic { fields: BTreeMap::new() }
    }

    pub fn as_artist(&self) -> Option<&ArtistAttributes> {
        match self {
            EntityAttributes::Artist(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_contribution(&self) -> Option<&ContributionAttributes> {
        match self {
            EntityAttributes::Contribution(c) => Some(c),
            _ => None,
        }
    }

    /// Build the attribute set for kinds whose raw payload needs no cross-entity lookups.
    ///
    /// Artist, Release and Show payloads carry references and go through
    /// [`RawArtistFields`], [`RawReleaseFields`] or [`RawShowFields`] instead.
    pub fn from_raw(kind: EntityKind, raw: Option<&str>) -> serde_json::Result<Self> {
        let raw = match raw.map(str::trim) {
            Some(r) if !r.is_empty() => r,
            _ => "{}",
        };
        let attributes = match kind {
            EntityKind::Song => EntityAttributes::Song(serde_json::from_str(raw)?),
            EntityKind::Location => EntityAttributes::Location(serde_json::from_str(raw)?),
            EntityKind::Play => EntityAttributes::Play(serde_json::from_str(raw)?),
            _ => EntityAttributes::Basic { fields: serde_json::from_str(raw)? },
        };
        Ok(attributes)
    }
}

/// Artist polymorphism discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArtistType {
    Person,
    Group,
    Orchestra,
    #[default]
    Other,
}

impl ArtistType {
    /// Map the public dump's artist type; Choir, Character and unknowns become OTHER.
    pub fn from_source(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_lowercase()).as_deref() {
            Some("person") => ArtistType::Person,
            Some("group") => ArtistType::Group,
            Some("orchestra") => ArtistType::Orchestra,
            _ => ArtistType::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ArtistAttributes {
    pub artist_type: ArtistType,
    pub sort_name: Option<String>,
    pub disambiguation: Option<String>,
    pub begin_date: Option<String>,
    pub end_date: Option<String>,
    /// Underlying individual; only a PERSON artist holds one.
    pub person_id: Option<EntityId>,
}

/// Artist payload as the normalization stage writes it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawArtistFields {
    #[serde(default, alias = "type")]
    pub artist_type: Option<String>,
    #[serde(default)]
    pub sort_name: Option<String>,
    #[serde(default)]
    pub disambiguation: Option<String>,
    #[serde(default)]
    pub begin_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    /// External id of the Person behind this artist persona
    #[serde(default)]
    pub person_ref: Option<String>,
}

impl RawArtistFields {
    pub fn parse(raw: Option<&str>) -> serde_json::Result<Self> {
        match raw.map(str::trim) {
            Some(r) if !r.is_empty() => serde_json::from_str(r),
            _ => Ok(Self::default()),
        }
    }

    pub fn into_attributes(self, person_id: Option<EntityId>) -> ArtistAttributes {
        let artist_type = ArtistType::from_source(self.artist_type.as_deref());
        ArtistAttributes {
            artist_type,
            sort_name: self.sort_name,
            disambiguation: self.disambiguation,
            begin_date: self.begin_date.as_deref().and_then(normalize_partial_date),
            end_date: self.end_date.as_deref().and_then(normalize_partial_date),
            person_id: if artist_type == ArtistType::Person { person_id } else { None },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SongAttributes {
    #[serde(default)]
    pub length_ms: Option<i64>,
    #[serde(default)]
    pub disambiguation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReleaseAttributes {
    pub release_date: Option<String>,
    pub country: Option<String>,
    pub barcode: Option<String>,
    pub album_id: Option<EntityId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawReleaseFields {
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub barcode: Option<String>,
    /// External id of the release group (Album)
    #[serde(default)]
    pub album_ref: Option<String>,
}

impl RawReleaseFields {
    pub fn parse(raw: Option<&str>) -> serde_json::Result<Self> {
        match raw.map(str::trim) {
            Some(r) if !r.is_empty() => serde_json::from_str(r),
            _ => Ok(Self::default()),
        }
    }

    pub fn into_attributes(self, album_id: Option<EntityId>) -> ReleaseAttributes {
        ReleaseAttributes {
            release_date: self.release_date.as_deref().and_then(normalize_partial_date),
            country: self.country,
            barcode: self.barcode,
            album_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LocationAttributes {
    #[serde(default, alias = "type")]
    pub location_type: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentFamily {
    Vocals,
    Keys,
    Strings,
    Percussion,
    Woodwind,
    Brass,
    OrchestraStrings,
    Other,
}

impl fmt::Display for InstrumentFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstrumentFamily::Vocals => "vocals",
            InstrumentFamily::Keys => "keys",
            InstrumentFamily::Strings => "strings",
            InstrumentFamily::Percussion => "percussion",
            InstrumentFamily::Woodwind => "woodwind",
            InstrumentFamily::Brass => "brass",
            InstrumentFamily::OrchestraStrings => "orchestra_strings",
            InstrumentFamily::Other => "other",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentAttributes {
    pub family: InstrumentFamily,
}

/// Reified (person, role, work) fact. Contributor and role live here rather
/// than as top-level triples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributionAttributes {
    pub contributor: EntityRef,
    pub role: EntityRef,
    pub work: EntityRef,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlayAttributes {
    #[serde(default)]
    pub played_at: Option<String>,
}

/// One broadcast of a program, as aired.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ShowAttributes {
    pub started_at: Option<String>,
    pub tagline: Option<String>,
    pub program_id: Option<EntityId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawShowFields {
    #[serde(default, alias = "start_time")]
    pub started_at: Option<String>,
    #[serde(default)]
    pub tagline: Option<String>,
    /// External id of the program this show is an episode of
    #[serde(default)]
    pub program_ref: Option<String>,
}

impl RawShowFields {
    pub fn parse(raw: Option<&str>) -> serde_json::Result<Self> {
        match raw.map(str::trim) {
            Some(r) if !r.is_empty() => serde_json::from_str(r),
            _ => Ok(Self::default()),
        }
    }

    pub fn into_attributes(self, program_id: Option<EntityId>) -> ShowAttributes {
        ShowAttributes {
            started_at: self.started_at,
            tagline: self.tagline.filter(|t| !t.trim().is_empty()),
            program_id,
        }
    }
}

/// Normalize `YYYY`, `YYYY-MM` or `YYYY-MM-DD` (optionally followed by a time)
/// to a full ISO date. Anything else yields `None`.
pub fn normalize_partial_date(value: &str) -> Option<String> {
    let value = value.trim();
    let date_part = value.get(..10.min(value.len()))?;
    let candidate = match date_part.len() {
        4 => format!("{}-01-01", date_part),
        7 => format!("{}-01", date_part),
        10 => date_part.to_string(),
        _ => return None,
    };
    NaiveDate::parse_from_str(&candidate, "%Y-%m-%d")
        .ok()
        .map(|d| d.format("%Y-%m-%d").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artist_type_from_source() {
        assert_eq!(ArtistType::from_source(Some("Person")), ArtistType::Person);
        assert_eq!(ArtistType::from_source(Some("GROUP")), ArtistType::Group);
        assert_eq!(ArtistType::from_source(Some("Orchestra")), ArtistType::Orchestra);
        assert_eq!(ArtistType::from_source(Some("Choir")), ArtistType::Other);
        assert_eq!(ArtistType::from_source(None), ArtistType::Other);
    }

    #[test]
    fn test_person_back_reference_only_for_person_artists() {
        let raw = RawArtistFields::parse(Some(r#"{"type":"Group","person_ref":"p-1"}"#)).unwrap();
        let attrs = raw.into_attributes(Some(EntityId::from("person-1")));
        assert_eq!(attrs.artist_type, ArtistType::Group);
        assert!(attrs.person_id.is_none());

        let raw = RawArtistFields::parse(Some(r#"{"artist_type":"Person","begin_date":"1967"}"#)).unwrap();
        let attrs = raw.into_attributes(Some(EntityId::from("person-1")));
        assert_eq!(attrs.person_id, Some(EntityId::from("person-1")));
        assert_eq!(attrs.begin_date.as_deref(), Some("1967-01-01"));
    }

    #[test]
    fn test_show_fields_take_start_time_alias() {
        let raw = RawShowFields::parse(Some(r#"{"start_time":"2024-01-01T06:00:00Z","tagline":" ","program_ref":"prog-9"}"#)).unwrap();
        assert_eq!(raw.program_ref.as_deref(), Some("prog-9"));
        let attrs = raw.into_attributes(Some(EntityId::from("program-1")));
        assert_eq!(attrs.started_at.as_deref(), Some("2024-01-01T06:00:00Z"));
        assert!(attrs.tagline.is_none());
        assert_eq!(attrs.program_id, Some(EntityId::from("program-1")));
    }

    #[test]
    fn test_normalize_partial_date() {
        assert_eq!(normalize_partial_date("1991").as_deref(), Some("1991-01-01"));
        assert_eq!(normalize_partial_date("1991-09").as_deref(), Some("1991-09-01"));
        assert_eq!(normalize_partial_date("1991-09-24").as_deref(), Some("1991-09-24"));
        assert_eq!(normalize_partial_date("1991-09-24T10:00:00Z").as_deref(), Some("1991-09-24"));
        assert_eq!(normalize_partial_date("1991-13-01"), None);
        assert_eq!(normalize_partial_date("unknown"), None);
        assert_eq!(normalize_partial_date(""), None);
    }

    #[test]
    fn test_attributes_serialize_with_type_tag() {
        let attrs = EntityAttributes::Instrument(InstrumentAttributes { family: InstrumentFamily::Brass });
        let json = serde_json::to_string(&attrs).unwrap();
        assert!(json.contains("\"type\":\"instrument\""));
        assert!(json.contains("\"family\":\"brass\""));
        let back: EntityAttributes = serde_json::from_str(&json).unwrap();
        assert_eq!(back, attrs);
    }

    #[test]
    fn test_from_raw_basic_and_song() {
        let song = EntityAttributes::from_raw(EntityKind::Song, Some(r#"{"length_ms": 215000}"#)).unwrap();
        assert!(matches!(song, EntityAttributes::Song(SongAttributes { length_ms: Some(215000), .. })));

        let genre = EntityAttributes::from_raw(EntityKind::Genre, None).unwrap();
        assert_eq!(genre, EntityAttributes::empty());

        assert!(EntityAttributes::from_raw(EntityKind::Label, Some("[1,2]")).is_err());
    }
}
