//! Relationship extraction: discovery, rule-based mapping, validation and
//! consolidation of typed triples.
//!
//! Raw relation rows flow through `discovery` (which types are worth mapping),
//! `mapper` + `rules` (candidate triples), `validator` (referential checks)
//! and `consolidator` (dedupe and full-refresh commit).

pub mod consolidator;
pub mod discovery;
pub mod instrument;
pub mod integrity;
pub mod mapper;
pub mod plays;
pub mod rules;
pub mod validator;

pub use consolidator::{commit, consolidate, CommitStats};
pub use discovery::{analyze, DiscoveryOutcome, DiscoveryReport, RelationTypeKey, Viability};
pub use instrument::classify_family;
pub use integrity::{find_orphan_triples, IntegrityReport, OrphanTriple};
pub use mapper::{map_relations, MappingOutcome, MappingStats};
pub use plays::{link_plays, link_show_hosts, PlayOutcome};
pub use rules::{default_registry, DirectionPolicy, Orientation, RelationRule, RuleKind, RuleRegistry};
pub use validator::{validate, RejectionSummary, ValidationOutcome};
