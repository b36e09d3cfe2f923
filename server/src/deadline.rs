//! Remaining-time computation and lazy timeout application
//!
//! There is no timer per mission. Expiry is discovered when the session next
//! applies timeouts, which happens before every status computation and every
//! mutating event, so a mission that runs out while nobody is asking is only
//! reported failed on the next query.

use crate::gate::ExclusivityPolicy;
use crate::ledger::ParticipantLedger;
use crate::mission::{MissionRegistry, MissionState};
use log::info;
use shared::MissionId;
use std::time::{Duration, Instant};

/// Whole seconds left for a mission.
///
/// Elapsed time is truncated to whole seconds before subtracting, so a
/// 300 s mission reports 300 for its whole first second. A mission that is
/// not running reports its full duration.
pub fn remaining(duration: Duration, started_at: Option<Instant>, now: Instant) -> u64 {
    match started_at {
        Some(started_at) => {
            let elapsed = now.saturating_duration_since(started_at).as_secs();
            duration.as_secs().saturating_sub(elapsed)
        }
        None => duration.as_secs(),
    }
}

/// Moves every expired running scope to failed and raises the mission's
/// failure trigger. Returns the ids of missions that timed out.
pub fn apply_timeouts(
    registry: &mut MissionRegistry,
    ledger: &mut ParticipantLedger,
    policy: ExclusivityPolicy,
    now: Instant,
) -> Vec<MissionId> {
    let mut expired = Vec::new();

    match policy {
        ExclusivityPolicy::Global => {
            for mission in registry.iter_mut() {
                if mission.is_running()
                    && remaining(mission.duration, mission.started_at(), now) == 0
                {
                    mission.state = MissionState::Failed;
                    mission.failure_trigger = true;
                    expired.push(mission.id);
                }
            }
            for id in &expired {
                ledger.finish_everywhere(*id);
                info!("Mission {} timed out", id);
            }
        }
        ExclusivityPolicy::PerParticipant => {
            for (conn, id, started_at) in ledger.active_entries() {
                let duration = match registry.get(id) {
                    Some(mission) => mission.duration,
                    None => continue,
                };
                if remaining(duration, Some(started_at), now) == 0 {
                    ledger.record_failed(conn, id);
                    registry.set_failure_trigger(id, true);
                    info!("Mission {} timed out for participant {}", id, conn);
                    if !expired.contains(&id) {
                        expired.push(id);
                    }
                }
            }
        }
    }

    expired
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_registry() -> MissionRegistry {
        MissionRegistry::new(vec![(1, Duration::from_secs(8)), (3, Duration::from_secs(300))])
    }

    #[test]
    fn test_remaining_not_running() {
        let now = Instant::now();
        assert_eq!(remaining(Duration::from_secs(300), None, now), 300);
    }

    #[test]
    fn test_remaining_truncates_elapsed() {
        let start = Instant::now();
        let duration = Duration::from_secs(300);

        assert_eq!(remaining(duration, Some(start), start), 300);
        assert_eq!(
            remaining(duration, Some(start), start + Duration::from_millis(999)),
            300
        );
        assert_eq!(
            remaining(duration, Some(start), start + Duration::from_millis(1500)),
            299
        );
        assert_eq!(
            remaining(duration, Some(start), start + Duration::from_secs(301)),
            0
        );
    }

    #[test]
    fn test_remaining_is_non_increasing() {
        let start = Instant::now();
        let duration = Duration::from_secs(8);
        let mut previous = u64::MAX;

        for step in 0..40 {
            let now = start + Duration::from_millis(step * 250);
            let value = remaining(duration, Some(start), now);
            assert!(value <= previous);
            previous = value;
        }
        assert_eq!(previous, 0);
    }

    #[test]
    fn test_remaining_clock_before_start() {
        let start = Instant::now() + Duration::from_secs(5);
        assert_eq!(
            remaining(Duration::from_secs(8), Some(start), Instant::now()),
            8
        );
    }

    #[test]
    fn test_global_timeout_fails_mission() {
        let mut registry = test_registry();
        let mut ledger = ParticipantLedger::new();
        let start = Instant::now();
        registry.set_state(1, MissionState::Running { started_at: start });
        ledger.record_start(10, 1, start);

        let expired = apply_timeouts(
            &mut registry,
            &mut ledger,
            ExclusivityPolicy::Global,
            start + Duration::from_secs(7),
        );
        assert!(expired.is_empty());
        assert!(registry.get(1).unwrap().is_running());

        let expired = apply_timeouts(
            &mut registry,
            &mut ledger,
            ExclusivityPolicy::Global,
            start + Duration::from_secs(8),
        );
        assert_eq!(expired, vec![1]);

        let mission = registry.get(1).unwrap();
        assert!(mission.is_failed());
        assert!(mission.started_at().is_none());
        assert!(mission.failure_trigger);
        assert!(ledger.running().is_empty());

        // Already failed; nothing more to expire
        let expired = apply_timeouts(
            &mut registry,
            &mut ledger,
            ExclusivityPolicy::Global,
            start + Duration::from_secs(60),
        );
        assert!(expired.is_empty());
    }

    #[test]
    fn test_per_participant_timeout_is_scoped() {
        let mut registry = test_registry();
        let mut ledger = ParticipantLedger::new();
        let start = Instant::now();
        ledger.record_start(1, 1, start);
        ledger.record_start(2, 1, start + Duration::from_secs(5));

        let expired = apply_timeouts(
            &mut registry,
            &mut ledger,
            ExclusivityPolicy::PerParticipant,
            start + Duration::from_secs(9),
        );

        assert_eq!(expired, vec![1]);
        assert!(ledger.has_failed(1, 1));
        assert!(ledger.is_active(2, 1));
        assert!(registry.get(1).unwrap().failure_trigger);
        assert_eq!(registry.get(1).unwrap().state, MissionState::Idle);
    }
}
