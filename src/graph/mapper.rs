//! Apply registered rules to every row of a viable relation type.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::bridge::BridgeRecord;
use crate::config::MappingConfig;
use crate::error::Result;
use crate::model::{CandidateTriple, EntityKind, Predicate, RejectionReason, TripleRejection};
use crate::resolve::EntityResolver;
use crate::source::RawRelation;

use super::discovery::{normalize_label, DiscoveryReport, RelationTypeKey};
use super::rules::{RelationRule, RuleInput, RuleRegistry};

#[derive(Debug, Default, Clone, Serialize)]
pub struct MappingStats {
    pub rows_mapped: usize,
    /// Rows of types that were not viable, unmapped or disabled
    pub rows_skipped: usize,
    pub candidates: usize,
    pub empty_attributes: usize,
    pub contributions_bridged: usize,
    /// Viable types with no rule, or whose target kind the rule does not take
    pub unmapped: Vec<RelationTypeKey>,
    pub disabled: Vec<RelationTypeKey>,
}

#[derive(Debug, Default)]
pub struct MappingOutcome {
    pub candidates: Vec<CandidateTriple>,
    pub rejections: Vec<TripleRejection>,
    pub bridges: Vec<BridgeRecord>,
    /// Predicates of every enabled rule, whether or not it produced anything
    pub touched: BTreeSet<Predicate>,
    /// Disabled labels whose stored triples the commit must leave alone
    pub frozen: BTreeSet<String>,
    pub stats: MappingStats,
}

fn disabled_labels(config: &MappingConfig) -> BTreeSet<String> {
    config
        .disabled_relation_types
        .iter()
        .map(|label| normalize_label(label))
        .collect()
}

/// Predicates of every enabled rule. A rule whose relation type is no longer
/// viable still runs (with no rows), so its stale triples are cleared.
pub fn touched_predicates(registry: &RuleRegistry, config: &MappingConfig) -> BTreeSet<Predicate> {
    let disabled = disabled_labels(config);
    registry
        .iter()
        .filter(|(label, _)| !disabled.contains(*label))
        .map(|(_, rule)| rule.predicate)
        .collect()
}

/// Disabled labels that a rule would otherwise handle. Other labels can share
/// their predicate, so the commit refreshes a predicate without these rows.
pub fn frozen_relation_types(registry: &RuleRegistry, config: &MappingConfig) -> BTreeSet<String> {
    disabled_labels(config)
        .into_iter()
        .filter(|label| registry.find(label).is_some())
        .collect()
}

/// Pick the rule for each viable relation type; flag the ones nobody handles.
fn select_rules<'r>(
    reports: &BTreeMap<RelationTypeKey, DiscoveryReport>,
    registry: &'r RuleRegistry,
    config: &MappingConfig,
    stats: &mut MappingStats,
) -> BTreeMap<RelationTypeKey, &'r RelationRule> {
    let disabled = disabled_labels(config);

    let mut active = BTreeMap::new();
    for report in reports.values().filter(|r| r.is_viable()) {
        let key = &report.key;
        if disabled.contains(&key.label) {
            log::info!("Relation type {} disabled by configuration", key);
            stats.disabled.push(key.clone());
            continue;
        }

        let rule = registry.find(&key.label).filter(|rule| {
            key.target_kind
                .parse::<EntityKind>()
                .map(|kind| rule.accepts(kind))
                .unwrap_or(false)
        });
        match rule {
            Some(rule) => {
                active.insert(key.clone(), rule);
            }
            None => {
                log::warn!(
                    "Viable relation type {} ({} rows, coverage {:.3}) has no mapping rule; flagged for review",
                    key,
                    report.total_count,
                    report.coverage_ratio
                );
                stats.unmapped.push(key.clone());
            }
        }
    }
    active
}

/// Turn raw relation rows into candidate triples.
pub fn map_relations(
    relations: &[RawRelation],
    reports: &BTreeMap<RelationTypeKey, DiscoveryReport>,
    registry: &RuleRegistry,
    config: &MappingConfig,
    resolver: &mut EntityResolver,
) -> Result<MappingOutcome> {
    let mut outcome = MappingOutcome::default();
    let active = select_rules(reports, registry, config, &mut outcome.stats);
    outcome.touched = touched_predicates(registry, config);
    outcome.frozen = frozen_relation_types(registry, config);

    for relation in relations {
        let key = RelationTypeKey::of(relation);
        let Some(rule) = active.get(&key) else {
            outcome.stats.rows_skipped += 1;
            continue;
        };
        // counted by discovery
        let Some(target_ref) = relation.target() else {
            continue;
        };
        let (Some(source_kind), Some(target_kind)) =
            (relation.source_entity_kind(), relation.target_entity_kind())
        else {
            outcome.rejections.push(TripleRejection {
                relation_type: relation.relation_type.clone(),
                reason: RejectionReason::UnresolvedSubject,
                source_record_id: relation.record_id.clone(),
                detail: format!("unknown source kind {:?}", relation.source_kind),
            });
            continue;
        };

        let input = RuleInput {
            relation,
            source_kind,
            target_kind,
            target_ref,
        };
        let output = rule.apply(&input, resolver)?;

        outcome.stats.rows_mapped += 1;
        if output.empty_attributes {
            outcome.stats.empty_attributes += 1;
        }
        outcome.stats.candidates += output.candidates.len();
        outcome.stats.contributions_bridged += output.bridges.len();
        outcome.candidates.extend(output.candidates);
        outcome.rejections.extend(output.rejections);
        outcome.bridges.extend(output.bridges);
    }

    log::info!(
        "Mapped {} relation rows into {} candidates ({} rule rejections, {} unmapped types)",
        outcome.stats.rows_mapped,
        outcome.stats.candidates,
        outcome.rejections.len(),
        outcome.stats.unmapped.len()
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiscoveryConfig;
    use crate::graph::discovery::analyze;
    use crate::graph::rules::default_registry;
    use crate::resolve::RawIdentity;

    fn relation(id: &str, label: &str, source: &str, target: &str, target_kind: &str) -> RawRelation {
        RawRelation {
            record_id: id.into(),
            source_system: "musicbrainz".into(),
            source_ref: source.into(),
            source_kind: "artist".into(),
            relation_type: label.into(),
            target_ref: Some(target.into()),
            target_kind: target_kind.into(),
            direction: Some("backward".into()),
            ..Default::default()
        }
    }

    fn setup() -> (EntityResolver, Vec<RawRelation>) {
        let mut resolver = EntityResolver::new();
        for ext in ["a", "b"] {
            resolver
                .resolve(RawIdentity::new(EntityKind::Artist, ext).with_external_id(ext))
                .unwrap();
        }
        let relations = vec![
            relation("r1", "member of band", "a", "b", "artist"),
            relation("r2", "member of band", "a", "missing", "artist"),
            relation("r3", "tribute", "a", "b", "artist"),
            relation("r4", "genre", "a", "b", "artist"),
        ];
        (resolver, relations)
    }

    fn config() -> DiscoveryConfig {
        DiscoveryConfig { min_instances: 1, ..Default::default() }
    }

    #[test]
    fn test_maps_viable_types_and_flags_unmapped() {
        let (mut resolver, relations) = setup();
        let discovery = analyze(&relations, &resolver, &config());
        let outcome = map_relations(
            &relations,
            &discovery.reports,
            &default_registry(),
            &MappingConfig::default(),
            &mut resolver,
        )
        .unwrap();

        assert_eq!(outcome.stats.rows_mapped, 2);
        assert_eq!(outcome.candidates.len(), 2);
        assert!(outcome.touched.contains(&Predicate::HasMember));
        assert!(outcome.touched.contains(&Predicate::HasGenre));
        // "tribute" has no rule; "genre" rule does not accept artist targets
        let unmapped: Vec<String> = outcome.stats.unmapped.iter().map(|k| k.label.clone()).collect();
        assert_eq!(unmapped, vec!["genre".to_string(), "tribute".to_string()]);
        assert_eq!(outcome.stats.rows_skipped, 2);
    }

    #[test]
    fn test_disabled_types_are_skipped() {
        let (mut resolver, relations) = setup();
        let discovery = analyze(&relations, &resolver, &config());
        let mapping = MappingConfig {
            disabled_relation_types: vec!["Member of Band".into()],
        };
        let outcome = map_relations(&relations, &discovery.reports, &default_registry(), &mapping, &mut resolver).unwrap();
        assert!(outcome.candidates.is_empty());
        assert!(!outcome.touched.contains(&Predicate::HasMember));
        assert!(outcome.touched.contains(&Predicate::PlaysInstrumentOn));
        assert_eq!(outcome.stats.disabled.len(), 1);
        assert_eq!(outcome.frozen, BTreeSet::from(["member of band".to_string()]));
    }

    #[test]
    fn test_disabled_label_on_shared_predicate_is_frozen() {
        let mapping = MappingConfig {
            disabled_relation_types: vec!["Bandcamp".into(), "no such label".into()],
        };
        let registry = default_registry();
        // the other url labels keep has_url in the refresh
        assert!(touched_predicates(&registry, &mapping).contains(&Predicate::HasUrl));
        assert_eq!(
            frozen_relation_types(&registry, &mapping),
            BTreeSet::from(["bandcamp".to_string()])
        );
    }

    #[test]
    fn test_touched_even_without_output() {
        let (mut resolver, _) = setup();
        let mut rel = relation("r9", "instrument", "a", "song-1", "recording");
        rel.attributes_json = Some("[]".into());
        let relations = vec![rel];
        let discovery = analyze(&relations, &resolver, &DiscoveryConfig { min_instances: 1, min_coverage: -1.0, ..Default::default() });
        let outcome = map_relations(
            &relations,
            &discovery.reports,
            &default_registry(),
            &MappingConfig::default(),
            &mut resolver,
        )
        .unwrap();
        assert!(outcome.candidates.is_empty());
        assert_eq!(outcome.stats.empty_attributes, 1);
        assert!(outcome.touched.contains(&Predicate::PlaysInstrumentOn));
    }
}
