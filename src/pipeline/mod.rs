//! The batch pipeline: entities, discovery, mapping, validation, consolidation.
//!
//! Each phase runs in one transaction that also writes its checkpoint, so a
//! phase either commits fully or not at all. A resumed run skips the phases
//! its checkpoints already record and picks up their persisted output.

pub mod checkpoint;
pub mod report;
pub mod stage;

pub use checkpoint::{RunRecord, RunStatus};
pub use report::{Phase, PhaseSummary};

use rusqlite::Connection;

use crate::bridge::{self, BridgeRecord};
use crate::config::Config;
use crate::db::require_tables;
use crate::error::{PlaygraphError, Result};
use crate::graph::{self, discovery, plays, validator, RuleRegistry};
use crate::model::{
    EntityAttributes, EntityKind, InstrumentAttributes, RawArtistFields, RawReleaseFields,
    RawShowFields,
};
use crate::resolve::{store, EntityResolver, QuarantineRecord, RawIdentity};
use crate::source::{self, RawEntityRecord};

/// Persons before the artists that point at them, albums before releases,
/// programs before their shows.
const ENTITY_ORDER: [EntityKind; 6] = [
    EntityKind::Person,
    EntityKind::Artist,
    EntityKind::Album,
    EntityKind::Release,
    EntityKind::Program,
    EntityKind::Show,
];

#[derive(Debug)]
pub struct RunReport {
    pub run_id: String,
    pub resumed: bool,
    pub summaries: Vec<PhaseSummary>,
}

pub struct Pipeline {
    config: Config,
    registry: RuleRegistry,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        Self::with_registry(config, graph::default_registry())
    }

    pub fn with_registry(config: Config, registry: RuleRegistry) -> Self {
        Self { config, registry }
    }

    /// Run every phase, or with `resume` continue the latest unfinished run.
    pub fn run(&self, conn: &mut Connection, resume: bool) -> Result<RunReport> {
        require_tables(
            conn,
            &[source::RAW_ENTITIES, source::RAW_RELATIONS, source::RAW_PLAYS, source::RAW_SHOW_HOSTS],
        )?;

        let existing = if resume {
            checkpoint::latest_unfinished_run(conn)?
        } else {
            None
        };
        let (run_id, resumed) = match existing {
            Some(run) => {
                log::info!("Resuming run {} (started {})", run.run_id, run.started_at);
                (run.run_id, true)
            }
            None => {
                if resume {
                    log::info!("No unfinished run to resume; starting a new one");
                }
                (checkpoint::start_run(conn)?, false)
            }
        };

        match self.run_phases(conn, &run_id) {
            Ok(summaries) => {
                checkpoint::finish_run(conn, &run_id, RunStatus::Completed)?;
                log::info!("Run {} completed", run_id);
                Ok(RunReport { run_id, resumed, summaries })
            }
            Err(e) => {
                log::error!("Run {} failed: {}", run_id, e);
                if let Err(mark) = checkpoint::finish_run(conn, &run_id, RunStatus::Failed) {
                    log::error!("Could not mark run {} as failed: {}", run_id, mark);
                }
                Err(e)
            }
        }
    }

    fn run_phases(&self, conn: &mut Connection, run_id: &str) -> Result<Vec<PhaseSummary>> {
        let mut summaries = checkpoint::load_summaries(conn, run_id)?;
        let mut resolver = EntityResolver::load(conn)?;

        for phase in Phase::ALL {
            if summaries.iter().any(|s| s.phase == phase) {
                log::info!("Phase {} already complete for run {}, skipping", phase, run_id);
                continue;
            }

            log::info!("Starting phase {}", phase);
            let tx = conn.transaction()?;
            let summary = match phase {
                Phase::Entities => self.entities_phase(&tx, &mut resolver)?,
                Phase::Discovery => self.discovery_phase(&tx, &resolver)?,
                Phase::Mapping => self.mapping_phase(&tx, &mut resolver)?,
                Phase::Validation => validation_phase(&tx, &resolver)?,
                Phase::Consolidation => consolidation_phase(&tx)?,
            };
            checkpoint::record_phase(&tx, run_id, &summary)?;
            tx.commit()?;

            summary.log();
            summaries.push(summary);
        }

        summaries.sort_by_key(|s| s.phase);
        Ok(summaries)
    }

    fn entities_phase(&self, conn: &Connection, resolver: &mut EntityResolver) -> Result<PhaseSummary> {
        let mut summary = PhaseSummary::new(Phase::Entities);
        let batch = source::read_entities(conn)?;
        summary.set("raw_records", batch.records.len());
        summary.set("unknown_kind", batch.unknown_kind);
        store::clear_quarantine(conn)?;

        // Still resolved; bridges keep their own source system
        let known = [&self.config.sources.first_party_system, &self.config.sources.public_system];
        let foreign = batch.records.iter().filter(|r| !known.contains(&&r.source_system)).count();
        if foreign > 0 {
            log::warn!("{} raw entity records come from an unconfigured source system", foreign);
            summary.set("foreign_source_records", foreign);
        }

        let order = ENTITY_ORDER
            .iter()
            .copied()
            .chain(EntityKind::ALL.iter().copied().filter(|k| !ENTITY_ORDER.contains(k)));

        let mut bridges = Vec::new();
        for kind in order {
            for record in batch.of_kind(kind) {
                let attributes = match entity_attributes(record, resolver) {
                    Ok(attributes) => attributes,
                    Err(e) => {
                        log::warn!("Unreadable attributes on {}/{}: {}", record.source_system, record.record_id, e);
                        summary.add("malformed_attributes", 1);
                        EntityAttributes::empty()
                    }
                };
                let previous = bridge::lookup(conn, kind, &record.source_system, &record.record_id)?;
                let identity = RawIdentity {
                    kind,
                    name: record.name.clone(),
                    external_id: record.external_id.clone(),
                    context: record.context.clone(),
                    attributes,
                    bridged: previous.as_ref().map(|entity| entity.id.clone()),
                };

                match resolver.resolve(identity) {
                    Ok(resolution) => {
                        if resolution.created {
                            summary.add("created", 1);
                        } else if resolution.enriched {
                            summary.add("enriched", 1);
                        } else {
                            summary.add("matched", 1);
                        }
                        bridges.push(BridgeRecord::new(&resolution.entity, &record.source_system, &record.record_id));
                    }
                    Err(PlaygraphError::InvalidIdentity(reason)) => {
                        log::debug!("Skipping {}/{}: {}", record.source_system, record.record_id, reason);
                        summary.add("invalid_identity", 1);
                        if previous.is_some() {
                            bridge::remove(conn, kind, &record.source_system, &record.record_id)?;
                            summary.add("bridges_removed", 1);
                        }
                    }
                    Err(PlaygraphError::AmbiguousIdentity { key, candidates }) => {
                        log::warn!(
                            "Quarantining {} {:?} ({}/{}): {} candidates share key {}",
                            kind,
                            record.name,
                            record.source_system,
                            record.record_id,
                            candidates.len(),
                            key
                        );
                        store::write_quarantine(
                            conn,
                            &QuarantineRecord {
                                source_system: record.source_system.clone(),
                                record_id: record.record_id.clone(),
                                kind,
                                name: record.name.clone(),
                                external_id: record.external_id.clone(),
                                reason: "ambiguous_identity".to_string(),
                                candidates,
                            },
                        )?;
                        summary.add("quarantined", 1);
                        if previous.is_some() {
                            bridge::remove(conn, kind, &record.source_system, &record.record_id)?;
                            summary.add("bridges_removed", 1);
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        summary.set("entities_written", resolver.flush(conn)?);
        summary.set("bridges", bridge::write_bridges(conn, &bridges)?);
        summary.set("entities_total", resolver.len());
        Ok(summary)
    }

    fn discovery_phase(&self, conn: &Connection, resolver: &EntityResolver) -> Result<PhaseSummary> {
        let mut summary = PhaseSummary::new(Phase::Discovery);
        let relations = source::read_relations(conn)?;
        let outcome = graph::analyze(&relations, resolver, &self.config.discovery);
        discovery::persist_reports(conn, &outcome.reports)?;

        summary.set("relation_rows", relations.len());
        summary.set("skipped_missing_target", outcome.skipped_missing_target);
        summary.set("relation_types", outcome.reports.len());
        summary.set("viable_types", outcome.viable().count());
        summary.set("ViabilityRejected", outcome.reports.len() - outcome.viable().count());
        for report in outcome.viable() {
            summary.note(format!(
                "viable {}: {} rows, coverage {:.3}",
                report.key, report.total_count, report.coverage_ratio
            ));
        }
        Ok(summary)
    }

    fn mapping_phase(&self, conn: &Connection, resolver: &mut EntityResolver) -> Result<PhaseSummary> {
        let mut summary = PhaseSummary::new(Phase::Mapping);
        let reports = discovery::load_reports(conn)?;
        let relations = source::read_relations(conn)?;
        let mapping = graph::map_relations(&relations, &reports, &self.registry, &self.config.mapping, resolver)?;

        let raw_plays = source::read_plays(conn)?;
        let linked = graph::link_plays(conn, &raw_plays, resolver, &self.config.sources.first_party_system)?;
        let show_hosts = source::read_show_hosts(conn)?;
        let hosted = graph::link_show_hosts(conn, &show_hosts)?;

        let mut touched = mapping.touched.clone();
        touched.extend(plays::PLAY_PREDICATES);

        summary.set("entities_written", resolver.flush(conn)?);
        let mut bridges = mapping.bridges;
        bridges.extend(linked.bridges);
        summary.set("bridges", bridge::write_bridges(conn, &bridges)?);

        let mut candidates = mapping.candidates;
        candidates.extend(linked.candidates);
        candidates.extend(hosted);
        stage::replace_candidates(conn, &candidates)?;
        stage::replace_touched(conn, &touched)?;
        stage::replace_frozen(conn, &mapping.frozen)?;
        validator::persist_rejections(conn, Phase::Mapping.as_str(), &mapping.rejections)?;

        let stats = &mapping.stats;
        summary.set("rows_mapped", stats.rows_mapped);
        summary.set("rows_skipped", stats.rows_skipped);
        summary.set("empty_attributes", stats.empty_attributes);
        summary.set("contributions_bridged", stats.contributions_bridged);
        summary.set("plays", linked.stats.plays);
        summary.set("plays_created", linked.stats.plays_created);
        summary.set("invalid_plays", linked.stats.invalid_plays);
        summary.set("shows_linked", linked.stats.shows_linked);
        summary.set("plays_without_show", linked.stats.plays_without_show);
        summary.set("show_hosts", show_hosts.len());
        summary.set("candidates", candidates.len());
        summary.set("touched_predicates", touched.len());
        summary.add_rejections(&validator::summarize(&mapping.rejections));
        for key in &stats.unmapped {
            summary.note(format!("unmapped {}: needs a rule", key));
        }
        for key in &stats.disabled {
            summary.note(format!("disabled {}", key));
        }
        for label in &mapping.frozen {
            summary.note(format!("stored {} triples frozen", label));
        }
        Ok(summary)
    }
}

fn entity_attributes(record: &RawEntityRecord, resolver: &EntityResolver) -> Result<EntityAttributes> {
    let raw = record.attributes_json.as_deref();
    let attributes = match record.kind {
        EntityKind::Artist => {
            let fields = RawArtistFields::parse(raw)?;
            let person_id = fields
                .person_ref
                .as_deref()
                .and_then(|r| resolver.lookup_external(EntityKind::Person, r))
                .map(|r| r.id);
            EntityAttributes::Artist(fields.into_attributes(person_id))
        }
        EntityKind::Release => {
            let fields = RawReleaseFields::parse(raw)?;
            let album_id = fields
                .album_ref
                .as_deref()
                .and_then(|r| resolver.lookup_external(EntityKind::Album, r))
                .map(|r| r.id);
            EntityAttributes::Release(fields.into_attributes(album_id))
        }
        EntityKind::Show => {
            let fields = RawShowFields::parse(raw)?;
            let program_id = fields
                .program_ref
                .as_deref()
                .and_then(|r| resolver.lookup_external(EntityKind::Program, r))
                .map(|r| r.id);
            EntityAttributes::Show(fields.into_attributes(program_id))
        }
        EntityKind::Instrument => EntityAttributes::Instrument(InstrumentAttributes {
            family: graph::classify_family(&record.name),
        }),
        kind => EntityAttributes::from_raw(kind, raw)?,
    };
    Ok(attributes)
}

fn validation_phase(conn: &Connection, resolver: &EntityResolver) -> Result<PhaseSummary> {
    let mut summary = PhaseSummary::new(Phase::Validation);
    let candidates = stage::load_candidates(conn)?;
    let outcome = graph::validate(&candidates, resolver);
    stage::replace_accepted(conn, &outcome.accepted)?;
    validator::persist_rejections(conn, Phase::Validation.as_str(), &outcome.rejected)?;

    summary.set("candidates", candidates.len());
    summary.set("accepted", outcome.accepted.len());
    summary.set("rejected", outcome.rejected.len());
    summary.add_rejections(&outcome.summary);
    Ok(summary)
}

fn consolidation_phase(conn: &Connection) -> Result<PhaseSummary> {
    let mut summary = PhaseSummary::new(Phase::Consolidation);
    let accepted = stage::load_accepted(conn)?;
    let touched = stage::load_touched(conn)?;
    let frozen = stage::load_frozen(conn)?;
    let (triples, duplicates) = graph::consolidate(accepted);
    let stats = graph::commit(conn, &triples, &touched, &frozen)?;

    let orphans = graph::find_orphan_triples(conn)?;
    if !orphans.is_empty() {
        log::error!("{} orphan triple references after commit", orphans.len());
    }

    summary.set("duplicates", duplicates);
    summary.set("deleted", stats.deleted);
    summary.set("inserted", stats.inserted);
    summary.set("orphan_references", orphans.len());
    Ok(summary)
}
