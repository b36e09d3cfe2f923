//! Two-phase reset: signal now, settle after a fixed delay
//!
//! Phase one marks the targets `Resetting` so that completions or failures
//! still in flight from clients are refused. Phase two runs when the settle
//! delay has passed and returns the targets to `Idle`. Each reset gets a
//! generation number; a settle only finalises missions whose most recent
//! reset is the one being settled, so overlapping resets end at the latest
//! deadline.

use crate::ledger::ParticipantLedger;
use crate::mission::MissionRegistry;
use log::{debug, info};
use shared::{MissionId, RESET_ALL_MISSIONS};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetTarget {
    Mission(MissionId),
    All,
}

impl ResetTarget {
    /// Value carried by the `participant-reset` event
    pub fn wire_id(&self) -> i64 {
        match self {
            ResetTarget::Mission(id) => i64::from(*id),
            ResetTarget::All => RESET_ALL_MISSIONS,
        }
    }
}

/// Handed back to the coordinator when the settle delay elapses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetTicket {
    pub target: ResetTarget,
    pub generation: u64,
}

#[derive(Debug)]
pub struct ResetCoordinator {
    settle_delay: Duration,
    generation: u64,
    /// Latest reset generation per mission still waiting to settle
    pending: HashMap<MissionId, u64>,
}

impl ResetCoordinator {
    pub fn new(settle_delay: Duration) -> Self {
        Self {
            settle_delay,
            generation: 0,
            pending: HashMap::new(),
        }
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    pub fn is_pending(&self, id: MissionId) -> bool {
        self.pending.contains_key(&id)
    }

    /// Phase one. Returns `None` when the target mission does not exist.
    pub fn begin(
        &mut self,
        registry: &mut MissionRegistry,
        ledger: &mut ParticipantLedger,
        target: ResetTarget,
    ) -> Option<ResetTicket> {
        let generation = self.generation + 1;

        match target {
            ResetTarget::Mission(id) => {
                if !registry.reset_one(id) {
                    return None;
                }
                ledger.clear_mission(id);
                self.pending.insert(id, generation);
            }
            ResetTarget::All => {
                registry.reset_all();
                ledger.clear_all();
                for id in registry.ids() {
                    self.pending.insert(id, generation);
                }
            }
        }

        self.generation = generation;
        Some(ResetTicket { target, generation })
    }

    /// Phase two. Returns the missions that went back to idle.
    pub fn settle(&mut self, registry: &mut MissionRegistry, ticket: ResetTicket) -> Vec<MissionId> {
        let candidates = match ticket.target {
            ResetTarget::Mission(id) => vec![id],
            ResetTarget::All => registry.ids(),
        };

        let mut settled = Vec::new();
        for id in candidates {
            if self.pending.get(&id) != Some(&ticket.generation) {
                debug!(
                    "Mission {} superseded by a later reset, not settling generation {}",
                    id, ticket.generation
                );
                continue;
            }
            self.pending.remove(&id);
            if registry.settle_one(id) {
                settled.push(id);
            }
        }

        if !settled.is_empty() {
            info!("Reset settled for missions {:?}", settled);
        }
        settled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mission::MissionState;
    use std::time::Instant;

    fn test_registry() -> MissionRegistry {
        MissionRegistry::new((1..=3).map(|id| (id, Duration::from_secs(30))))
    }

    #[test]
    fn test_wire_ids() {
        assert_eq!(ResetTarget::Mission(3).wire_id(), 3);
        assert_eq!(ResetTarget::All.wire_id(), -1);
    }

    #[test]
    fn test_single_reset_two_phases() {
        let mut registry = test_registry();
        let mut ledger = ParticipantLedger::new();
        let mut resets = ResetCoordinator::new(Duration::from_millis(100));
        registry.set_state(3, MissionState::Failed);
        registry.set_failure_trigger(3, true);
        ledger.record_failed(1, 3);

        let ticket = resets
            .begin(&mut registry, &mut ledger, ResetTarget::Mission(3))
            .unwrap();
        assert!(registry.get(3).unwrap().is_resetting());
        assert!(resets.is_pending(3));
        assert!(ledger.failed().is_empty());

        assert_eq!(resets.settle(&mut registry, ticket), vec![3]);
        let mission = registry.get(3).unwrap();
        assert_eq!(mission.state, MissionState::Idle);
        assert!(!mission.failure_trigger);
        assert!(!resets.is_pending(3));
    }

    #[test]
    fn test_unknown_mission_not_reset() {
        let mut registry = test_registry();
        let mut ledger = ParticipantLedger::new();
        let mut resets = ResetCoordinator::new(Duration::from_millis(100));

        assert!(resets
            .begin(&mut registry, &mut ledger, ResetTarget::Mission(9))
            .is_none());
    }

    #[test]
    fn test_overlapping_reset_settles_at_latest() {
        let mut registry = test_registry();
        let mut ledger = ParticipantLedger::new();
        let mut resets = ResetCoordinator::new(Duration::from_millis(100));

        let first = resets
            .begin(&mut registry, &mut ledger, ResetTarget::Mission(2))
            .unwrap();
        let second = resets
            .begin(&mut registry, &mut ledger, ResetTarget::All)
            .unwrap();
        assert!(second.generation > first.generation);

        // First settle is stale for mission 2
        assert!(resets.settle(&mut registry, first).is_empty());
        assert!(registry.get(2).unwrap().is_resetting());

        assert_eq!(resets.settle(&mut registry, second), vec![1, 2, 3]);
        assert!(registry.iter().all(|m| m.state == MissionState::Idle));
    }

    #[test]
    fn test_reset_all_clears_running() {
        let mut registry = test_registry();
        let mut ledger = ParticipantLedger::new();
        let mut resets = ResetCoordinator::new(Duration::from_millis(100));
        let now = Instant::now();
        registry.set_state(1, MissionState::Running { started_at: now });
        ledger.record_start(5, 1, now);

        let ticket = resets
            .begin(&mut registry, &mut ledger, ResetTarget::All)
            .unwrap();
        assert!(registry.get(1).unwrap().started_at().is_none());
        assert!(ledger.running().is_empty());

        resets.settle(&mut registry, ticket);
        assert!(registry.iter().all(|m| m.state == MissionState::Idle));
    }
}
