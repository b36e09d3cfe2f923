//! Per-connection mission attribution
//!
//! Tracks which missions each connected participant has started, failed and
//! completed. Under the per-participant policy this is the authoritative
//! mission state; under the global policy it records who did what.

use crate::client_manager::ConnectionId;
use log::info;
use shared::MissionId;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Instant;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParticipantRecord {
    /// Missions started and not yet finished, with their start instant
    pub active: BTreeMap<MissionId, Instant>,
    pub failed: BTreeSet<MissionId>,
    pub completed: BTreeSet<MissionId>,
}

#[derive(Debug, Default)]
pub struct ParticipantLedger {
    participants: HashMap<ConnectionId, ParticipantRecord>,
    /// Failures and completions of participants that have disconnected.
    /// Kept until the affected missions are reset.
    departed: ParticipantRecord,
}

impl ParticipantLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, conn: ConnectionId) -> Option<&ParticipantRecord> {
        self.participants.get(&conn)
    }

    pub fn record_start(&mut self, conn: ConnectionId, id: MissionId, now: Instant) {
        let record = self.participants.entry(conn).or_default();
        record.active.insert(id, now);
        record.failed.remove(&id);
    }

    /// Returns false if this participant had already completed the mission
    pub fn record_complete(&mut self, conn: ConnectionId, id: MissionId) -> bool {
        let record = self.participants.entry(conn).or_default();
        if !record.completed.insert(id) {
            return false;
        }
        record.active.remove(&id);
        record.failed.remove(&id);
        true
    }

    /// Returns false if the participant already completed the mission; a
    /// completion is never overwritten by a failure.
    pub fn record_failed(&mut self, conn: ConnectionId, id: MissionId) -> bool {
        let record = self.participants.entry(conn).or_default();
        if record.completed.contains(&id) {
            return false;
        }
        record.active.remove(&id);
        record.failed.insert(id);
        true
    }

    /// Drops the mission from every participant's active set
    pub fn finish_everywhere(&mut self, id: MissionId) {
        for record in self.participants.values_mut() {
            record.active.remove(&id);
        }
    }

    pub fn active_mission(&self, conn: ConnectionId) -> Option<MissionId> {
        self.participants
            .get(&conn)
            .and_then(|record| record.active.keys().next().copied())
    }

    pub fn is_active(&self, conn: ConnectionId, id: MissionId) -> bool {
        self.participants
            .get(&conn)
            .map_or(false, |record| record.active.contains_key(&id))
    }

    pub fn has_completed(&self, conn: ConnectionId, id: MissionId) -> bool {
        self.participants
            .get(&conn)
            .map_or(false, |record| record.completed.contains(&id))
    }

    pub fn has_failed(&self, conn: ConnectionId, id: MissionId) -> bool {
        self.participants
            .get(&conn)
            .map_or(false, |record| record.failed.contains(&id))
    }

    /// Discards a disconnected participant. Its running missions vanish; its
    /// failures and completions fold into the departed aggregate.
    pub fn remove(&mut self, conn: ConnectionId) -> Option<ParticipantRecord> {
        let record = self.participants.remove(&conn)?;
        if !record.active.is_empty() {
            info!(
                "Participant {} left with active missions {:?}",
                conn,
                record.active.keys().collect::<Vec<_>>()
            );
        }
        self.departed.failed.extend(record.failed.iter().copied());
        self.departed.completed.extend(record.completed.iter().copied());
        Some(record)
    }

    pub fn clear_mission(&mut self, id: MissionId) {
        for record in self
            .participants
            .values_mut()
            .chain(std::iter::once(&mut self.departed))
        {
            record.active.remove(&id);
            record.failed.remove(&id);
            record.completed.remove(&id);
        }
    }

    pub fn clear_all(&mut self) {
        for record in self.participants.values_mut() {
            *record = ParticipantRecord::default();
        }
        self.departed = ParticipantRecord::default();
    }

    /// Every (participant, mission, start) triple currently running
    pub fn active_entries(&self) -> Vec<(ConnectionId, MissionId, Instant)> {
        self.participants
            .iter()
            .flat_map(|(conn, record)| {
                record
                    .active
                    .iter()
                    .map(move |(id, started_at)| (*conn, *id, *started_at))
            })
            .collect()
    }

    pub fn running(&self) -> BTreeSet<MissionId> {
        self.participants
            .values()
            .flat_map(|record| record.active.keys().copied())
            .collect()
    }

    pub fn failed(&self) -> BTreeSet<MissionId> {
        self.participants
            .values()
            .chain(std::iter::once(&self.departed))
            .flat_map(|record| record.failed.iter().copied())
            .collect()
    }

    pub fn completed(&self) -> BTreeSet<MissionId> {
        self.participants
            .values()
            .chain(std::iter::once(&self.departed))
            .flat_map(|record| record.completed.iter().copied())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}
