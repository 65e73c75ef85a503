//! Mapping rules: one handler per raw relation label.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::bridge::{BridgeRecord, RELATION_SOURCE_SYSTEM};
use crate::error::Result;
use crate::model::{
    normalize_partial_date, CandidateTriple, ContributionAttributes, EntityAttributes, EntityKind,
    Endpoint, InstrumentAttributes, Predicate, Provenance, RejectionReason, TripleRejection,
};
use crate::resolve::{EntityResolver, RawIdentity};
use crate::source::{Direction, RawRelation};

use super::discovery::normalize_label;
use super::instrument::classify_family;

/// Which endpoint of the raw row becomes the subject
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    SourceIsSubject,
    TargetIsSubject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionPolicy {
    Ignored,
    Oriented {
        forward: Orientation,
        backward: Orientation,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Direct,
    Directional,
    /// One triple per attribute value, qualified by an entity of this kind
    FanOut { qualifier_kind: EntityKind },
    /// Reify (contributor, role, work) as a Contribution entity
    Contribution,
}

/// A raw relation row whose kinds and target have been checked
#[derive(Debug, Clone, Copy)]
pub struct RuleInput<'a> {
    pub relation: &'a RawRelation,
    pub source_kind: EntityKind,
    pub target_kind: EntityKind,
    pub target_ref: &'a str,
}

#[derive(Debug, Default)]
pub struct RuleOutput {
    pub candidates: Vec<CandidateTriple>,
    pub rejections: Vec<TripleRejection>,
    pub bridges: Vec<BridgeRecord>,
    /// Fan-out row with an empty attribute list
    pub empty_attributes: bool,
}

pub type RuleHandler = fn(&RuleInput<'_>, &RelationRule, &mut EntityResolver) -> Result<RuleOutput>;

#[derive(Clone)]
pub struct RelationRule {
    pub predicate: Predicate,
    pub target_kinds: Vec<EntityKind>,
    pub kind: RuleKind,
    pub direction: DirectionPolicy,
    handler: RuleHandler,
}

impl fmt::Debug for RelationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationRule")
            .field("predicate", &self.predicate)
            .field("target_kinds", &self.target_kinds)
            .field("kind", &self.kind)
            .field("direction", &self.direction)
            .finish()
    }
}

impl RelationRule {
    pub fn direct(predicate: Predicate, target_kinds: &[EntityKind]) -> Self {
        Self {
            predicate,
            target_kinds: target_kinds.to_vec(),
            kind: RuleKind::Direct,
            direction: DirectionPolicy::Ignored,
            handler: map_direct,
        }
    }

    pub fn directional(
        predicate: Predicate,
        target_kinds: &[EntityKind],
        forward: Orientation,
        backward: Orientation,
    ) -> Self {
        Self {
            predicate,
            target_kinds: target_kinds.to_vec(),
            kind: RuleKind::Directional,
            direction: DirectionPolicy::Oriented { forward, backward },
            handler: map_directional,
        }
    }

    pub fn fan_out(predicate: Predicate, target_kinds: &[EntityKind], qualifier_kind: EntityKind) -> Self {
        Self {
            predicate,
            target_kinds: target_kinds.to_vec(),
            kind: RuleKind::FanOut { qualifier_kind },
            direction: DirectionPolicy::Ignored,
            handler: map_fan_out,
        }
    }

    pub fn contribution(target_kinds: &[EntityKind]) -> Self {
        Self {
            predicate: Predicate::ContributedTo,
            target_kinds: target_kinds.to_vec(),
            kind: RuleKind::Contribution,
            direction: DirectionPolicy::Ignored,
            handler: map_contribution,
        }
    }

    pub fn accepts(&self, target_kind: EntityKind) -> bool {
        self.target_kinds.contains(&target_kind)
    }

    pub fn apply(&self, input: &RuleInput<'_>, resolver: &mut EntityResolver) -> Result<RuleOutput> {
        (self.handler)(input, self, resolver)
    }
}

/// Rules keyed by normalized relation label
#[derive(Debug, Default)]
pub struct RuleRegistry {
    rules: BTreeMap<String, RelationRule>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, label: &str, rule: RelationRule) {
        self.rules.insert(normalize_label(label), rule);
    }

    pub fn find(&self, label: &str) -> Option<&RelationRule> {
        self.rules.get(&normalize_label(label))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RelationRule)> {
        self.rules.iter().map(|(label, rule)| (label.as_str(), rule))
    }

    pub fn predicates(&self) -> BTreeSet<Predicate> {
        self.rules.values().map(|r| r.predicate).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

const CONTRIBUTION_ROLES: &[&str] = &[
    "producer", "engineer", "mix", "composer", "lyricist", "writer", "arranger",
];

const URL_LABELS: &[&str] = &[
    "official homepage", "social network", "bandcamp", "streaming", "wikidata", "discogs",
];

/// Rules for the relation types the public dump carries in volume
pub fn default_registry() -> RuleRegistry {
    use EntityKind::*;

    let mut registry = RuleRegistry::new();
    // "backward" rows list the group as the source artist
    registry.register(
        "member of band",
        RelationRule::directional(
            Predicate::HasMember,
            &[Artist],
            Orientation::TargetIsSubject,
            Orientation::SourceIsSubject,
        ),
    );
    registry.register("instrument", RelationRule::fan_out(Predicate::PlaysInstrumentOn, &[Song], Instrument));
    registry.register("vocal", RelationRule::direct(Predicate::ProvidesVocalsOn, &[Song]));
    registry.register("performer", RelationRule::direct(Predicate::PerformsOn, &[Song]));
    registry.register("conductor", RelationRule::direct(Predicate::Conducts, &[Song]));
    for role in CONTRIBUTION_ROLES {
        registry.register(role, RelationRule::contribution(&[Song, Release]));
    }
    registry.register("genre", RelationRule::direct(Predicate::HasGenre, &[Genre]));
    registry.register("origin", RelationRule::direct(Predicate::OriginatesFrom, &[Location]));
    registry.register("label", RelationRule::direct(Predicate::ReleasedOn, &[Label]));
    for label in URL_LABELS {
        registry.register(label, RelationRule::direct(Predicate::HasUrl, &[Url]));
    }
    registry.register("tracklist", RelationRule::direct(Predicate::AppearsOn, &[Release]));
    registry
}

fn endpoint(resolver: &EntityResolver, kind: EntityKind, reference: &str) -> Endpoint {
    match resolver.lookup_external(kind, reference) {
        Some(entity) => Endpoint::Resolved { entity },
        None => Endpoint::Unresolved {
            kind,
            reference: reference.trim().to_string(),
        },
    }
}

fn candidate(
    input: &RuleInput<'_>,
    subject: Endpoint,
    predicate: Predicate,
    object: Endpoint,
    qualifier: Option<Endpoint>,
) -> CandidateTriple {
    let relation = input.relation;
    CandidateTriple {
        subject,
        predicate,
        object,
        qualifier,
        provenance: Provenance {
            source_relation_type: normalize_label(&relation.relation_type),
            source_record_id: relation.record_id.clone(),
        },
        begin_date: relation.begin_date.as_deref().and_then(normalize_partial_date),
        end_date: relation.end_date.as_deref().and_then(normalize_partial_date),
    }
}

fn rejection(input: &RuleInput<'_>, reason: RejectionReason, detail: String) -> TripleRejection {
    TripleRejection {
        relation_type: input.relation.relation_type.clone(),
        reason,
        source_record_id: input.relation.record_id.clone(),
        detail,
    }
}

fn map_direct(input: &RuleInput<'_>, rule: &RelationRule, resolver: &mut EntityResolver) -> Result<RuleOutput> {
    let subject = endpoint(resolver, input.source_kind, &input.relation.source_ref);
    let object = endpoint(resolver, input.target_kind, input.target_ref);
    Ok(RuleOutput {
        candidates: vec![candidate(input, subject, rule.predicate, object, None)],
        ..Default::default()
    })
}

fn map_directional(input: &RuleInput<'_>, rule: &RelationRule, resolver: &mut EntityResolver) -> Result<RuleOutput> {
    let (forward, backward) = match rule.direction {
        DirectionPolicy::Ignored => return map_direct(input, rule, resolver),
        DirectionPolicy::Oriented { forward, backward } => (forward, backward),
    };

    let orientation = match Direction::parse(input.relation.direction.as_deref()) {
        Ok(Some(Direction::Forward)) => forward,
        Ok(Some(Direction::Backward)) => backward,
        Ok(None) => {
            return Ok(RuleOutput {
                rejections: vec![rejection(input, RejectionReason::AmbiguousDirection, "missing direction".into())],
                ..Default::default()
            })
        }
        Err(raw) => {
            return Ok(RuleOutput {
                rejections: vec![rejection(
                    input,
                    RejectionReason::AmbiguousDirection,
                    format!("unknown direction {:?}", raw),
                )],
                ..Default::default()
            })
        }
    };

    let source = endpoint(resolver, input.source_kind, &input.relation.source_ref);
    let target = endpoint(resolver, input.target_kind, input.target_ref);
    let (subject, object) = match orientation {
        Orientation::SourceIsSubject => (source, target),
        Orientation::TargetIsSubject => (target, source),
    };
    Ok(RuleOutput {
        candidates: vec![candidate(input, subject, rule.predicate, object, None)],
        ..Default::default()
    })
}

fn map_fan_out(input: &RuleInput<'_>, rule: &RelationRule, resolver: &mut EntityResolver) -> Result<RuleOutput> {
    let RuleKind::FanOut { qualifier_kind } = rule.kind else {
        return map_direct(input, rule, resolver);
    };

    let values = match input.relation.attribute_values() {
        Ok(values) => values,
        Err(e) => {
            return Ok(RuleOutput {
                rejections: vec![rejection(
                    input,
                    RejectionReason::MalformedAttribute,
                    format!("unparseable attribute list: {}", e),
                )],
                ..Default::default()
            })
        }
    };

    let mut output = RuleOutput::default();
    if values.is_empty() {
        output.empty_attributes = true;
        return Ok(output);
    }

    let subject = endpoint(resolver, input.source_kind, &input.relation.source_ref);
    let object = endpoint(resolver, input.target_kind, input.target_ref);

    for value in values {
        let qualifier = if value.trim().is_empty() {
            Endpoint::Malformed { kind: qualifier_kind, raw: value }
        } else {
            let attributes = match qualifier_kind {
                EntityKind::Instrument => EntityAttributes::Instrument(InstrumentAttributes {
                    family: classify_family(&value),
                }),
                _ => EntityAttributes::empty(),
            };
            match resolver.resolve(RawIdentity::new(qualifier_kind, value.trim()).with_attributes(attributes)) {
                Ok(resolution) => Endpoint::Resolved { entity: resolution.entity },
                Err(e) if e.is_record_level() => {
                    log::debug!("Attribute {:?} on {} not resolvable: {}", value, input.relation.record_id, e);
                    Endpoint::Malformed { kind: qualifier_kind, raw: value }
                }
                Err(e) => return Err(e),
            }
        };
        output.candidates.push(candidate(
            input,
            subject.clone(),
            rule.predicate,
            object.clone(),
            Some(qualifier),
        ));
    }
    Ok(output)
}

fn map_contribution(input: &RuleInput<'_>, rule: &RelationRule, resolver: &mut EntityResolver) -> Result<RuleOutput> {
    let contributor = resolver.lookup_external(input.source_kind, &input.relation.source_ref);
    let work = resolver.lookup_external(input.target_kind, input.target_ref);

    let (contributor, work) = match (contributor, work) {
        (Some(c), Some(w)) => (c, w),
        (None, _) => {
            return Ok(RuleOutput {
                rejections: vec![rejection(
                    input,
                    RejectionReason::UnresolvedSubject,
                    format!("contributor {}:{}", input.source_kind, input.relation.source_ref),
                )],
                ..Default::default()
            })
        }
        (Some(_), None) => {
            return Ok(RuleOutput {
                rejections: vec![rejection(
                    input,
                    RejectionReason::UnresolvedObject,
                    format!("work {}:{}", input.target_kind, input.target_ref),
                )],
                ..Default::default()
            })
        }
    };

    let role_name = normalize_label(&input.relation.relation_type);
    let role = resolver.resolve(RawIdentity::new(EntityKind::Role, role_name.clone()))?.entity;
    let attributes = EntityAttributes::Contribution(ContributionAttributes {
        contributor: contributor.clone(),
        role,
        work: work.clone(),
    });
    let contribution = resolver
        .resolve(
            RawIdentity::new(EntityKind::Contribution, role_name)
                .with_context(format!("{}|{}", contributor.id, work.id))
                .with_attributes(attributes),
        )?
        .entity;

    Ok(RuleOutput {
        bridges: vec![BridgeRecord::new(&contribution, RELATION_SOURCE_SYSTEM, &input.relation.record_id)],
        candidates: vec![candidate(
            input,
            Endpoint::Resolved { entity: contribution },
            rule.predicate,
            Endpoint::Resolved { entity: work },
            None,
        )],
        ..Default::default()
    })
}
