//! First-party broadcast structure: one Play entity per play, linked to its
//! song, artist and show, plus the hosts of each show.

use rusqlite::Connection;
use serde::Serialize;

use crate::bridge::{self, BridgeRecord};
use crate::error::Result;
use crate::model::{
    CandidateTriple, EntityAttributes, EntityKind, Endpoint, PlayAttributes, Predicate, Provenance,
};
use crate::resolve::{EntityResolver, RawIdentity};
use crate::source::{RawPlay, RawShowHost};

pub const PLAY_RELATION_TYPE: &str = "play";
pub const SHOW_HOST_RELATION_TYPE: &str = "show_host";

/// Predicates owned by the play linker
pub const PLAY_PREDICATES: [Predicate; 4] = [
    Predicate::PlayOfSong,
    Predicate::PlayedArtist,
    Predicate::PlayDuringShow,
    Predicate::ShowHostedBy,
];

#[derive(Debug, Default, Clone, Serialize)]
pub struct PlayStats {
    pub plays: usize,
    pub plays_created: usize,
    pub songs_linked: usize,
    pub artists_linked: usize,
    pub shows_linked: usize,
    /// Plays logged outside any show
    pub plays_without_show: usize,
    pub invalid_plays: usize,
}

#[derive(Debug, Default)]
pub struct PlayOutcome {
    pub candidates: Vec<CandidateTriple>,
    pub bridges: Vec<BridgeRecord>,
    pub stats: PlayStats,
}

fn bridged(
    conn: &Connection,
    kind: EntityKind,
    source_system: &str,
    reference: Option<&str>,
) -> Result<Endpoint> {
    let reference = reference.map(str::trim).unwrap_or_default();
    if reference.is_empty() {
        return Ok(Endpoint::Unresolved { kind, reference: String::new() });
    }
    Ok(match bridge::lookup(conn, kind, source_system, reference)? {
        Some(entity) => Endpoint::Resolved { entity },
        None => Endpoint::Unresolved { kind, reference: reference.to_string() },
    })
}

fn candidate(
    subject: Endpoint,
    predicate: Predicate,
    object: Endpoint,
    relation_type: &str,
    record_id: String,
) -> CandidateTriple {
    CandidateTriple {
        subject,
        predicate,
        object,
        qualifier: None,
        provenance: Provenance {
            source_relation_type: relation_type.to_string(),
            source_record_id: record_id,
        },
        begin_date: None,
        end_date: None,
    }
}

/// Resolve play entities and link them to the song, artist and show bridged
/// from the same first-party system.
pub fn link_plays(
    conn: &Connection,
    plays: &[RawPlay],
    resolver: &mut EntityResolver,
    first_party_system: &str,
) -> Result<PlayOutcome> {
    let mut outcome = PlayOutcome::default();

    for play in plays {
        outcome.stats.plays += 1;
        let identity = RawIdentity::new(EntityKind::Play, play.record_id.clone())
            .with_external_id(play.record_id.clone())
            .with_attributes(EntityAttributes::Play(PlayAttributes {
                played_at: play.played_at.clone(),
            }));
        let resolution = match resolver.resolve(identity) {
            Ok(resolution) => resolution,
            Err(e) if e.is_record_level() => {
                log::warn!("Skipping play {}: {}", play.record_id, e);
                outcome.stats.invalid_plays += 1;
                continue;
            }
            Err(e) => return Err(e),
        };
        if resolution.created {
            outcome.stats.plays_created += 1;
        }
        let subject = resolution.entity;
        outcome
            .bridges
            .push(BridgeRecord::new(&subject, &play.source_system, &play.record_id));

        let song = bridged(conn, EntityKind::Song, first_party_system, play.track_ref.as_deref())?;
        let artist = bridged(conn, EntityKind::Artist, first_party_system, play.artist_ref.as_deref())?;
        if song.resolved().is_some() {
            outcome.stats.songs_linked += 1;
        }
        if artist.resolved().is_some() {
            outcome.stats.artists_linked += 1;
        }

        for (predicate, object) in [(Predicate::PlayOfSong, song), (Predicate::PlayedArtist, artist)] {
            let subject = Endpoint::Resolved { entity: subject.clone() };
            outcome
                .candidates
                .push(candidate(subject, predicate, object, PLAY_RELATION_TYPE, play.record_id.clone()));
        }

        if play.show_ref.as_deref().map(str::trim).unwrap_or_default().is_empty() {
            outcome.stats.plays_without_show += 1;
            continue;
        }
        let show = bridged(conn, EntityKind::Show, first_party_system, play.show_ref.as_deref())?;
        if show.resolved().is_some() {
            outcome.stats.shows_linked += 1;
        }
        outcome.candidates.push(candidate(
            Endpoint::Resolved { entity: subject },
            Predicate::PlayDuringShow,
            show,
            PLAY_RELATION_TYPE,
            play.record_id.clone(),
        ));
    }

    log::info!(
        "Linked {} plays ({} new): {} to songs, {} to artists, {} to shows",
        outcome.stats.plays,
        outcome.stats.plays_created,
        outcome.stats.songs_linked,
        outcome.stats.artists_linked,
        outcome.stats.shows_linked
    );
    Ok(outcome)
}

/// One `show_hosted_by` candidate per (show, host) row; both ends come from bridges.
pub fn link_show_hosts(conn: &Connection, show_hosts: &[RawShowHost]) -> Result<Vec<CandidateTriple>> {
    let mut candidates = Vec::with_capacity(show_hosts.len());
    for row in show_hosts {
        let show = bridged(conn, EntityKind::Show, &row.source_system, Some(row.show_ref.as_str()))?;
        let host = bridged(conn, EntityKind::Host, &row.source_system, Some(row.host_ref.as_str()))?;
        candidates.push(candidate(
            show,
            Predicate::ShowHostedBy,
            host,
            SHOW_HOST_RELATION_TYPE,
            format!("{}/{}", row.show_ref.trim(), row.host_ref.trim()),
        ));
    }
    log::debug!("{} show host rows", candidates.len());
    Ok(candidates)
}
