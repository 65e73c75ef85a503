//! Relation-type discovery: volume and endpoint coverage per (label, target kind).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::config::DiscoveryConfig;
use crate::error::{PlaygraphError, Result};
use crate::resolve::EntityResolver;
use crate::source::RawRelation;

/// Grouping key for raw relation rows
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationTypeKey {
    pub label: String,
    pub target_kind: String,
}

impl RelationTypeKey {
    pub fn new(label: &str, target_kind: &str) -> Self {
        Self {
            label: normalize_label(label),
            target_kind: target_kind.trim().to_lowercase(),
        }
    }

    pub fn of(relation: &RawRelation) -> Self {
        Self::new(&relation.relation_type, &relation.target_kind)
    }
}

impl fmt::Display for RelationTypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.label, self.target_kind)
    }
}

/// Relation labels compare case- and whitespace-insensitively
pub fn normalize_label(label: &str) -> String {
    label.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Viability {
    Viable,
    TooFewInstances,
    NoCoverage,
}

impl Viability {
    pub fn assess(total_count: usize, coverage_ratio: f64, config: &DiscoveryConfig) -> Self {
        if total_count < config.min_instances {
            Viability::TooFewInstances
        } else if coverage_ratio <= config.min_coverage {
            Viability::NoCoverage
        } else {
            Viability::Viable
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Viability::Viable => "viable",
            Viability::TooFewInstances => "too_few_instances",
            Viability::NoCoverage => "no_coverage",
        }
    }
}

impl FromStr for Viability {
    type Err = PlaygraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "viable" => Ok(Viability::Viable),
            "too_few_instances" => Ok(Viability::TooFewInstances),
            "no_coverage" => Ok(Viability::NoCoverage),
            other => Err(PlaygraphError::InvalidInput(format!("unknown viability: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryReport {
    pub key: RelationTypeKey,
    pub total_count: usize,
    pub resolved_endpoint_count: usize,
    pub coverage_ratio: f64,
    pub viability: Viability,
}

impl DiscoveryReport {
    pub fn is_viable(&self) -> bool {
        self.viability == Viability::Viable
    }
}

#[derive(Debug, Default)]
pub struct DiscoveryOutcome {
    pub reports: BTreeMap<RelationTypeKey, DiscoveryReport>,
    /// Rows with no target reference, excluded from every total
    pub skipped_missing_target: usize,
}

impl DiscoveryOutcome {
    pub fn viable(&self) -> impl Iterator<Item = &DiscoveryReport> {
        self.reports.values().filter(|r| r.is_viable())
    }
}

/// Count rows and resolvable endpoints per relation type and apply the viability filter.
///
/// A row counts as resolved when both its source and its target are known to
/// the resolver by external id.
pub fn analyze(
    relations: &[RawRelation],
    resolver: &EntityResolver,
    config: &DiscoveryConfig,
) -> DiscoveryOutcome {
    let mut counts: BTreeMap<RelationTypeKey, (usize, usize)> = BTreeMap::new();
    let mut skipped_missing_target = 0;

    for relation in relations {
        let Some(target) = relation.target() else {
            skipped_missing_target += 1;
            continue;
        };
        let entry = counts.entry(RelationTypeKey::of(relation)).or_insert((0, 0));
        entry.0 += 1;

        let source_known = relation
            .source_entity_kind()
            .and_then(|kind| resolver.lookup_external(kind, &relation.source_ref))
            .is_some();
        let target_known = relation
            .target_entity_kind()
            .and_then(|kind| resolver.lookup_external(kind, target))
            .is_some();
        if source_known && target_known {
            entry.1 += 1;
        }
    }

    let mut reports = BTreeMap::new();
    for (key, (total_count, resolved_endpoint_count)) in counts {
        let coverage_ratio = if total_count == 0 {
            0.0
        } else {
            resolved_endpoint_count as f64 / total_count as f64
        };
        let viability = Viability::assess(total_count, coverage_ratio, config);
        if viability != Viability::Viable {
            log::info!(
                "Relation type {} not viable ({}): {} rows, coverage {:.3}. {}",
                key,
                viability.as_str(),
                total_count,
                coverage_ratio,
                config.rationale
            );
        }
        reports.insert(
            key.clone(),
            DiscoveryReport {
                key,
                total_count,
                resolved_endpoint_count,
                coverage_ratio,
                viability,
            },
        );
    }

    DiscoveryOutcome {
        reports,
        skipped_missing_target,
    }
}

/// Replace the stored reports with this run's
pub fn persist_reports(conn: &Connection, reports: &BTreeMap<RelationTypeKey, DiscoveryReport>) -> Result<()> {
    conn.execute("DELETE FROM relation_type_reports", [])?;
    let mut stmt = conn.prepare(
        "INSERT INTO relation_type_reports
            (relation_type, target_kind, total_count, resolved_endpoint_count, coverage_ratio, viable, viability)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for report in reports.values() {
        stmt.execute(params![
            report.key.label,
            report.key.target_kind,
            report.total_count as i64,
            report.resolved_endpoint_count as i64,
            report.coverage_ratio,
            report.is_viable(),
            report.viability.as_str(),
        ])?;
    }
    Ok(())
}

pub fn load_reports(conn: &Connection) -> Result<BTreeMap<RelationTypeKey, DiscoveryReport>> {
    let mut stmt = conn.prepare(
        "SELECT relation_type, target_kind, total_count, resolved_endpoint_count, coverage_ratio, viability
         FROM relation_type_reports",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, f64>(4)?,
            row.get::<_, String>(5)?,
        ))
    })?;

    let mut reports = BTreeMap::new();
    for row in rows {
        let (label, target_kind, total, resolved, coverage_ratio, viability) = row?;
        let key = RelationTypeKey { label, target_kind };
        reports.insert(
            key.clone(),
            DiscoveryReport {
                key,
                total_count: total as usize,
                resolved_endpoint_count: resolved as usize,
                coverage_ratio,
                viability: viability.parse()?,
            },
        );
    }
    Ok(reports)
}
