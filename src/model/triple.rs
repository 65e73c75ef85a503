use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use super::{EntityKind, EntityRef};
use crate::error::PlaygraphError;

/// Enumerated relationship types of the canonical graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    HasMember,
    PlaysInstrumentOn,
    ProvidesVocalsOn,
    PerformsOn,
    Conducts,
    ContributedTo,
    HasGenre,
    OriginatesFrom,
    ReleasedOn,
    HasUrl,
    AppearsOn,
    PlayOfSong,
    PlayedArtist,
    PlayDuringShow,
    ShowHostedBy,
}

impl Predicate {
    pub const ALL: [Predicate; 15] = [
        Predicate::HasMember,
        Predicate::PlaysInstrumentOn,
        Predicate::ProvidesVocalsOn,
        Predicate::PerformsOn,
        Predicate::Conducts,
        Predicate::ContributedTo,
        Predicate::HasGenre,
        Predicate::OriginatesFrom,
        Predicate::ReleasedOn,
        Predicate::HasUrl,
        Predicate::AppearsOn,
        Predicate::PlayOfSong,
        Predicate::PlayedArtist,
        Predicate::PlayDuringShow,
        Predicate::ShowHostedBy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Predicate::HasMember => "has_member",
            Predicate::PlaysInstrumentOn => "plays_instrument_on",
            Predicate::ProvidesVocalsOn => "provides_vocals_on",
            Predicate::PerformsOn => "performs_on",
            Predicate::Conducts => "conducts",
            Predicate::ContributedTo => "contributed_to",
            Predicate::HasGenre => "has_genre",
            Predicate::OriginatesFrom => "originates_from",
            Predicate::ReleasedOn => "released_on",
            Predicate::HasUrl => "has_url",
            Predicate::AppearsOn => "appears_on",
            Predicate::PlayOfSong => "play_of_song",
            Predicate::PlayedArtist => "played_artist",
            Predicate::PlayDuringShow => "play_during_show",
            Predicate::ShowHostedBy => "show_hosted_by",
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Predicate {
    type Err = PlaygraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Predicate::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| PlaygraphError::InvalidInput(format!("unknown predicate: {}", s)))
    }
}

/// Where a fact came from. Audit only; never used to rank facts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub source_relation_type: String,
    pub source_record_id: String,
}

/// One side of a candidate triple before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Endpoint {
    Resolved { entity: EntityRef },
    Unresolved { kind: EntityKind, reference: String },
    /// Attribute value that could not be turned into an entity (blank, unusable).
    Malformed { kind: EntityKind, raw: String },
}

impl Endpoint {
    pub fn resolved(&self) -> Option<&EntityRef> {
        match self {
            Endpoint::Resolved { entity } => Some(entity),
            _ => None,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Resolved { entity } => write!(f, "{}", entity),
            Endpoint::Unresolved { kind, reference } => write!(f, "{}?{}", kind, reference),
            Endpoint::Malformed { kind, raw } => write!(f, "{}!{:?}", kind, raw),
        }
    }
}

/// A triple emitted by a mapping rule, not yet checked against the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateTriple {
    pub subject: Endpoint,
    pub predicate: Predicate,
    pub object: Endpoint,
    pub qualifier: Option<Endpoint>,
    pub provenance: Provenance,
    pub begin_date: Option<String>,
    pub end_date: Option<String>,
}

/// A validated fact. Both endpoints (and the qualifier) exist at commit time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Triple {
    pub triple_id: String,
    pub subject: EntityRef,
    pub predicate: Predicate,
    pub object: EntityRef,
    pub qualifier: Option<EntityRef>,
    pub provenance: Provenance,
    pub begin_date: Option<String>,
    pub end_date: Option<String>,
    pub created_at: String,
}

impl Triple {
    pub fn new(
        subject: EntityRef,
        predicate: Predicate,
        object: EntityRef,
        qualifier: Option<EntityRef>,
        provenance: Provenance,
    ) -> Self {
        let triple_id = Self::identity_hash(&subject, predicate, &object, qualifier.as_ref());
        Self {
            triple_id,
            subject,
            predicate,
            object,
            qualifier,
            provenance,
            begin_date: None,
            end_date: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// SHA-256 over the identity key (subject, predicate, object, qualifier).
    pub fn identity_hash(
        subject: &EntityRef,
        predicate: Predicate,
        object: &EntityRef,
        qualifier: Option<&EntityRef>,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(subject.kind.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(subject.id.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(predicate.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(object.kind.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(object.id.as_str().as_bytes());
        hasher.update(b"|");
        if let Some(q) = qualifier {
            hasher.update(q.id.as_str().as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Why a candidate did not become a triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RejectionReason {
    UnresolvedSubject,
    UnresolvedObject,
    MalformedAttribute,
    AmbiguousDirection,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::UnresolvedSubject => "UnresolvedSubject",
            RejectionReason::UnresolvedObject => "UnresolvedObject",
            RejectionReason::MalformedAttribute => "MalformedAttribute",
            RejectionReason::AmbiguousDirection => "AmbiguousDirection",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripleRejection {
    pub relation_type: String,
    pub reason: RejectionReason,
    pub source_record_id: String,
    pub detail: String,
}
