//! Canonical per-mission records
//!
//! The registry owns one [`Mission`] per configured id. Every other component
//! refers to missions by id only and goes through the registry to read or
//! change them.

use log::info;
use shared::MissionId;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Lifecycle state of a mission.
///
/// The start instant lives inside `Running`, so a mission carries a start
/// time exactly while it is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissionState {
    Idle,
    Running { started_at: Instant },
    Failed,
    Completed,
    /// Between the reset signal and the settle; mutations are refused
    Resetting,
}

#[derive(Debug, Clone)]
pub struct Mission {
    pub id: MissionId,
    pub duration: Duration,
    pub state: MissionState,
    /// Set when the mission failed and an admin has not yet acknowledged it
    pub failure_trigger: bool,
}

impl Mission {
    pub fn new(id: MissionId, duration: Duration) -> Self {
        Self {
            id,
            duration,
            state: MissionState::Idle,
            failure_trigger: false,
        }
    }

    pub fn started_at(&self) -> Option<Instant> {
        match self.state {
            MissionState::Running { started_at } => Some(started_at),
            _ => None,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, MissionState::Running { .. })
    }

    pub fn is_failed(&self) -> bool {
        self.state == MissionState::Failed
    }

    pub fn is_completed(&self) -> bool {
        self.state == MissionState::Completed
    }

    pub fn is_resetting(&self) -> bool {
        self.state == MissionState::Resetting
    }
}

/// Owns every mission record for the session
#[derive(Debug, Clone)]
pub struct MissionRegistry {
    missions: BTreeMap<MissionId, Mission>,
}

impl MissionRegistry {
    /// Builds a registry from `(id, duration)` pairs; all missions start idle
    pub fn new<I>(table: I) -> Self
    where
        I: IntoIterator<Item = (MissionId, Duration)>,
    {
        Self {
            missions: table
                .into_iter()
                .map(|(id, duration)| (id, Mission::new(id, duration)))
                .collect(),
        }
    }

    pub fn get(&self, id: MissionId) -> Option<&Mission> {
        self.missions.get(&id)
    }

    pub fn get_mut(&mut self, id: MissionId) -> Option<&mut Mission> {
        self.missions.get_mut(&id)
    }

    pub fn contains(&self, id: MissionId) -> bool {
        self.missions.contains_key(&id)
    }

    /// Returns false when the id is unknown
    pub fn set_state(&mut self, id: MissionId, state: MissionState) -> bool {
        match self.missions.get_mut(&id) {
            Some(mission) => {
                mission.state = state;
                true
            }
            None => false,
        }
    }

    pub fn set_failure_trigger(&mut self, id: MissionId, raised: bool) -> bool {
        match self.missions.get_mut(&id) {
            Some(mission) => {
                mission.failure_trigger = raised;
                true
            }
            None => false,
        }
    }

    /// Phase one of a single-mission reset
    pub fn reset_one(&mut self, id: MissionId) -> bool {
        match self.missions.get_mut(&id) {
            Some(mission) => {
                mission.state = MissionState::Resetting;
                mission.failure_trigger = false;
                info!("Mission {} resetting", id);
                true
            }
            None => false,
        }
    }

    /// Phase one of a full reset
    pub fn reset_all(&mut self) {
        for mission in self.missions.values_mut() {
            mission.state = MissionState::Resetting;
            mission.failure_trigger = false;
        }
        info!("All {} missions resetting", self.missions.len());
    }

    /// Moves a resetting mission to idle. Returns false if the mission is
    /// unknown or no longer resetting.
    pub fn settle_one(&mut self, id: MissionId) -> bool {
        match self.missions.get_mut(&id) {
            Some(mission) if mission.is_resetting() => {
                mission.state = MissionState::Idle;
                true
            }
            _ => false,
        }
    }

    pub fn settle_all(&mut self) -> Vec<MissionId> {
        self.missions
            .values_mut()
            .filter(|mission| mission.is_resetting())
            .map(|mission| {
                mission.state = MissionState::Idle;
                mission.id
            })
            .collect()
    }

    /// First running mission other than `id`
    pub fn running_except(&self, id: MissionId) -> Option<MissionId> {
        self.missions
            .values()
            .find(|mission| mission.id != id && mission.is_running())
            .map(|mission| mission.id)
    }

    pub fn first_failed(&self) -> Option<MissionId> {
        self.missions
            .values()
            .find(|mission| mission.is_failed())
            .map(|mission| mission.id)
    }

    pub fn ids(&self) -> Vec<MissionId> {
        self.missions.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mission> {
        self.missions.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Mission> {
        self.missions.values_mut()
    }

    pub fn len(&self) -> usize {
        self.missions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.missions.is_empty()
    }
}
