//! Referential validation: only candidates whose endpoints exist become triples.

use std::collections::BTreeMap;

use rusqlite::{params, Connection};

use crate::error::Result;
use crate::model::{CandidateTriple, Endpoint, EntityRef, RejectionReason, Triple, TripleRejection};
use crate::resolve::EntityResolver;

/// Rejection counts keyed by relation type, then reason
pub type RejectionSummary = BTreeMap<String, BTreeMap<String, usize>>;

#[derive(Debug, Default)]
pub struct ValidationOutcome {
    pub accepted: Vec<Triple>,
    pub rejected: Vec<TripleRejection>,
    pub summary: RejectionSummary,
}

pub fn summarize(rejections: &[TripleRejection]) -> RejectionSummary {
    let mut summary = RejectionSummary::new();
    for rejection in rejections {
        *summary
            .entry(rejection.relation_type.clone())
            .or_default()
            .entry(rejection.reason.as_str().to_string())
            .or_insert(0) += 1;
    }
    summary
}

enum Check {
    Present(EntityRef),
    Failed(RejectionReason, String),
}

fn check(endpoint: &Endpoint, resolver: &EntityResolver, missing: RejectionReason) -> Check {
    match endpoint {
        Endpoint::Resolved { entity } if resolver.contains(entity) => Check::Present(entity.clone()),
        Endpoint::Resolved { entity } => Check::Failed(missing, format!("{} not in index", entity)),
        Endpoint::Unresolved { .. } => Check::Failed(missing, endpoint.to_string()),
        Endpoint::Malformed { .. } => Check::Failed(RejectionReason::MalformedAttribute, endpoint.to_string()),
    }
}

fn accept(candidate: &CandidateTriple, resolver: &EntityResolver) -> std::result::Result<Triple, (RejectionReason, String)> {
    let subject = match check(&candidate.subject, resolver, RejectionReason::UnresolvedSubject) {
        Check::Present(entity) => entity,
        Check::Failed(reason, detail) => return Err((reason, detail)),
    };
    let object = match check(&candidate.object, resolver, RejectionReason::UnresolvedObject) {
        Check::Present(entity) => entity,
        Check::Failed(reason, detail) => return Err((reason, detail)),
    };
    // an attribute that never became an entity is a malformed attribute
    let qualifier = match &candidate.qualifier {
        None => None,
        Some(q) => match check(q, resolver, RejectionReason::MalformedAttribute) {
            Check::Present(entity) => Some(entity),
            Check::Failed(reason, detail) => return Err((reason, detail)),
        },
    };

    let mut triple = Triple::new(subject, candidate.predicate, object, qualifier, candidate.provenance.clone());
    triple.begin_date = candidate.begin_date.clone();
    triple.end_date = candidate.end_date.clone();
    Ok(triple)
}

/// Split candidates into accepted triples and counted rejections.
pub fn validate(candidates: &[CandidateTriple], resolver: &EntityResolver) -> ValidationOutcome {
    let mut outcome = ValidationOutcome::default();
    for candidate in candidates {
        match accept(candidate, resolver) {
            Ok(triple) => outcome.accepted.push(triple),
            Err((reason, detail)) => outcome.rejected.push(TripleRejection {
                relation_type: candidate.provenance.source_relation_type.clone(),
                reason,
                source_record_id: candidate.provenance.source_record_id.clone(),
                detail,
            }),
        }
    }
    outcome.summary = summarize(&outcome.rejected);

    for (relation_type, reasons) in &outcome.summary {
        for (reason, count) in reasons {
            log::info!("Rejected {} {} candidates: {}", count, relation_type, reason);
        }
    }
    outcome
}

/// Replace the rejections recorded by one phase
pub fn persist_rejections(conn: &Connection, phase: &str, rejections: &[TripleRejection]) -> Result<()> {
    conn.execute("DELETE FROM triple_rejections WHERE phase = ?1", [phase])?;
    let mut stmt = conn.prepare(
        "INSERT INTO triple_rejections (phase, relation_type, reason, source_record_id, detail)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for rejection in rejections {
        stmt.execute(params![
            phase,
            rejection.relation_type,
            rejection.reason.as_str(),
            rejection.source_record_id,
            rejection.detail,
        ])?;
    }
    Ok(())
}

/// Stored rejection counts per relation type and reason, across phases
pub fn load_rejection_summary(conn: &Connection) -> Result<RejectionSummary> {
    let mut stmt = conn.prepare(
        "SELECT relation_type, reason, COUNT(*) FROM triple_rejections
         GROUP BY relation_type, reason ORDER BY relation_type, reason",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)?))
    })?;
    let mut summary = RejectionSummary::new();
    for row in rows {
        let (relation_type, reason, count) = row?;
        summary.entry(relation_type).or_default().insert(reason, count as usize);
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_connection;
    use crate::model::{EntityId, EntityKind, Predicate, Provenance};
    use crate::resolve::RawIdentity;

    fn candidate(subject: Endpoint, object: Endpoint, qualifier: Option<Endpoint>) -> CandidateTriple {
        CandidateTriple {
            subject,
            predicate: Predicate::PlaysInstrumentOn,
            object,
            qualifier,
            provenance: Provenance {
                source_relation_type: "instrument".into(),
                source_record_id: "rel-1".into(),
            },
            begin_date: Some("1991-01-01".into()),
            end_date: None,
        }
    }

    fn resolved(entity: &EntityRef) -> Endpoint {
        Endpoint::Resolved { entity: entity.clone() }
    }

    #[test]
    fn test_validate_accepts_and_rejects() {
        let mut resolver = EntityResolver::new();
        let artist = resolver.resolve(RawIdentity::new(EntityKind::Artist, "Kim Deal")).unwrap().entity;
        let song = resolver.resolve(RawIdentity::new(EntityKind::Song, "Gigantic")).unwrap().entity;
        let bass = resolver.resolve(RawIdentity::new(EntityKind::Instrument, "bass")).unwrap().entity;
        let ghost = EntityRef::new(EntityKind::Song, EntityId::from("ghost"));

        let candidates = vec![
            candidate(resolved(&artist), resolved(&song), Some(resolved(&bass))),
            candidate(
                Endpoint::Unresolved { kind: EntityKind::Artist, reference: "mb-x".into() },
                resolved(&song),
                None,
            ),
            candidate(resolved(&artist), resolved(&ghost), None),
            candidate(
                resolved(&artist),
                resolved(&song),
                Some(Endpoint::Malformed { kind: EntityKind::Instrument, raw: " ".into() }),
            ),
        ];

        let outcome = validate(&candidates, &resolver);
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.accepted[0].qualifier, Some(bass));
        assert_eq!(outcome.accepted[0].begin_date.as_deref(), Some("1991-01-01"));

        let reasons: Vec<RejectionReason> = outcome.rejected.iter().map(|r| r.reason).collect();
        assert_eq!(
            reasons,
            vec![
                RejectionReason::UnresolvedSubject,
                RejectionReason::UnresolvedObject,
                RejectionReason::MalformedAttribute
            ]
        );
        assert_eq!(outcome.summary["instrument"]["UnresolvedObject"], 1);
    }

    #[test]
    fn test_persist_rejections_per_phase() {
        let (conn, _temp) = test_connection();
        let rejection = |reason| TripleRejection {
            relation_type: "member of band".into(),
            reason,
            source_record_id: "rel-1".into(),
            detail: String::new(),
        };
        persist_rejections(&conn, "mapping", &[rejection(RejectionReason::AmbiguousDirection)]).unwrap();
        persist_rejections(&conn, "validation", &[rejection(RejectionReason::UnresolvedObject)]).unwrap();
        persist_rejections(&conn, "validation", &[rejection(RejectionReason::UnresolvedObject)]).unwrap();

        let summary = load_rejection_summary(&conn).unwrap();
        assert_eq!(summary["member of band"]["AmbiguousDirection"], 1);
        assert_eq!(summary["member of band"]["UnresolvedObject"], 1);
    }
}
