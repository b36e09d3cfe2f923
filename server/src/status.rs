//! Projection of registry and ledger into the wire snapshot
//!
//! Projection is read-only. The caller applies timeouts first (see
//! [`crate::deadline::apply_timeouts`]) and passes the missions that expired
//! since the last snapshot. Those report zero seconds left when they are
//! failed and nobody is still running them.

use crate::deadline::remaining;
use crate::gate::ExclusivityPolicy;
use crate::ledger::ParticipantLedger;
use crate::mission::{Mission, MissionRegistry};
use shared::{GlobalStatus, MissionId};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

pub fn project(
    registry: &MissionRegistry,
    ledger: &ParticipantLedger,
    policy: ExclusivityPolicy,
    now: Instant,
    expired: &BTreeSet<MissionId>,
) -> GlobalStatus {
    let (running, failed, completed) = match policy {
        ExclusivityPolicy::Global => (
            ids_where(registry, Mission::is_running),
            ids_where(registry, Mission::is_failed),
            ids_where(registry, Mission::is_completed),
        ),
        ExclusivityPolicy::PerParticipant => {
            let live = |ids: BTreeSet<MissionId>| -> Vec<MissionId> {
                ids.into_iter()
                    .filter(|id| registry.get(*id).map_or(false, |m| !m.is_resetting()))
                    .collect()
            };
            (
                live(ledger.running()),
                live(ledger.failed()),
                live(ledger.completed()),
            )
        }
    };

    let earliest_starts = earliest_starts(ledger);
    let mut durations = BTreeMap::new();
    let mut failure_triggers = BTreeMap::new();

    for mission in registry.iter() {
        let seconds = if expired.contains(&mission.id)
            && failed.contains(&mission.id)
            && !running.contains(&mission.id)
        {
            0
        } else if mission.is_resetting() {
            mission.duration.as_secs()
        } else {
            match policy {
                ExclusivityPolicy::Global => remaining(mission.duration, mission.started_at(), now),
                ExclusivityPolicy::PerParticipant => remaining(
                    mission.duration,
                    earliest_starts.get(&mission.id).copied(),
                    now,
                ),
            }
        };
        durations.insert(mission.id, seconds);
        failure_triggers.insert(mission.id, u8::from(mission.failure_trigger));
    }

    GlobalStatus {
        running,
        failed,
        completed,
        durations,
        failure_triggers,
    }
}

fn ids_where(registry: &MissionRegistry, predicate: fn(&Mission) -> bool) -> Vec<MissionId> {
    registry
        .iter()
        .filter(|mission| predicate(mission))
        .map(|mission| mission.id)
        .collect()
}

/// Earliest start per mission across participants, i.e. the participant
/// with the least time left
fn earliest_starts(ledger: &ParticipantLedger) -> BTreeMap<MissionId, Instant> {
    let mut starts: BTreeMap<MissionId, Instant> = BTreeMap::new();
    for (_, id, started_at) in ledger.active_entries() {
        starts
            .entry(id)
            .and_modify(|earliest| *earliest = (*earliest).min(started_at))
            .or_insert(started_at);
    }
    starts
}
