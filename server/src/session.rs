//! The mission session: one owned state object driven by inbound events
//!
//! Every inbound event goes through [`MissionSession::handle`], which runs to
//! completion and returns an [`Outcome`]: whether the event was admitted,
//! what to send to whom, and whether a reset needs its settle scheduled. The
//! session performs no I/O; the network layer delivers the dispatches and
//! feeds settle tickets back after the delay.

use crate::broadcast::Dispatch;
use crate::client_manager::ConnectionId;
use crate::config::ServerConfig;
use crate::deadline::apply_timeouts;
use crate::gate::{Admission, ExclusivityGate, ExclusivityPolicy};
use crate::ledger::ParticipantLedger;
use crate::mission::{MissionRegistry, MissionState};
use crate::reset::{ResetCoordinator, ResetTarget, ResetTicket};
use crate::status;
use log::{debug, info};
use shared::{
    ClientEvent, Denial, DenyReason, FailureStatus, GlobalStatus, MissionId, ServerEvent,
};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

/// What handling one event produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub admission: Admission,
    pub dispatches: Vec<Dispatch>,
    /// Present when a reset's phase two must run after the settle delay
    pub reset: Option<ResetTicket>,
}

impl Outcome {
    fn allowed(dispatches: Vec<Dispatch>) -> Self {
        Self {
            admission: Admission::Allowed,
            dispatches,
            reset: None,
        }
    }

    fn announces_status(&self) -> bool {
        self.dispatches
            .iter()
            .any(|dispatch| matches!(dispatch, Dispatch::All(ServerEvent::GlobalStatus(_))))
    }
}

pub struct MissionSession {
    registry: MissionRegistry,
    ledger: ParticipantLedger,
    gate: ExclusivityGate,
    resets: ResetCoordinator,
    report_denials: bool,
    /// Missions that timed out since the last snapshot was built
    unreported_expiry: BTreeSet<MissionId>,
}

impl MissionSession {
    pub fn new<I>(
        table: I,
        policy: ExclusivityPolicy,
        settle_delay: Duration,
        report_denials: bool,
    ) -> Self
    where
        I: IntoIterator<Item = (MissionId, Duration)>,
    {
        Self {
            registry: MissionRegistry::new(table),
            ledger: ParticipantLedger::new(),
            gate: ExclusivityGate::new(policy),
            resets: ResetCoordinator::new(settle_delay),
            report_denials,
            unreported_expiry: BTreeSet::new(),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(
            config.missions.iter(),
            config.policy,
            config.settle_delay,
            config.report_denials,
        )
    }

    pub fn registry(&self) -> &MissionRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &ParticipantLedger {
        &self.ledger
    }

    pub fn policy(&self) -> ExclusivityPolicy {
        self.gate.policy()
    }

    pub fn settle_delay(&self) -> Duration {
        self.resets.settle_delay()
    }

    /// Applies pending timeouts and builds the current snapshot
    pub fn snapshot(&mut self, now: Instant) -> GlobalStatus {
        self.sweep(now);
        let expired = std::mem::take(&mut self.unreported_expiry);
        status::project(&self.registry, &self.ledger, self.policy(), now, &expired)
    }

    pub fn handle(&mut self, conn: ConnectionId, event: ClientEvent, now: Instant) -> Outcome {
        let expired = self.sweep(now);

        let mut outcome = match &event {
            ClientEvent::RequestGlobalStatus => {
                let snapshot = self.snapshot(now);
                return Outcome::allowed(vec![Dispatch::One(conn, ServerEvent::GlobalStatus(snapshot))]);
            }
            ClientEvent::CheckFailure(id) => return self.check_failure(conn, &event, *id),
            ClientEvent::MissionStart(id) => self.start(conn, &event, *id, now),
            ClientEvent::MissionComplete(id) => self.complete(conn, &event, *id, now),
            ClientEvent::MarkFailed(id) => self.mark_failed(conn, &event, *id, now),
            ClientEvent::ClearFailureTrigger(id) => self.clear_failure_trigger(conn, &event, *id, now),
            ClientEvent::AdminResetMission(id) => self.reset(conn, &event, ResetTarget::Mission(*id)),
            ClientEvent::AdminResetAll => self.reset(conn, &event, ResetTarget::All),
        };

        // A state-changing event that uncovered a timeout tells everyone
        if !expired.is_empty() && !outcome.announces_status() {
            let snapshot = self.snapshot(now);
            outcome
                .dispatches
                .push(Dispatch::All(ServerEvent::GlobalStatus(snapshot)));
        }
        outcome
    }

    /// Phase two of a reset, run once the settle delay has passed
    pub fn settle(&mut self, ticket: ResetTicket, now: Instant) -> Outcome {
        let settled = self.resets.settle(&mut self.registry, ticket);
        if settled.is_empty() {
            return Outcome::allowed(Vec::new());
        }
        let snapshot = self.snapshot(now);
        Outcome::allowed(vec![Dispatch::All(ServerEvent::GlobalStatus(snapshot))])
    }

    /// Forgets a closed connection.
    ///
    /// Its running missions stop counting; its failures and completions stay
    /// in the aggregate until reset. Under the global policy the registry is
    /// untouched, so a mission keeps running after its starter leaves.
    pub fn disconnect(&mut self, conn: ConnectionId, now: Instant) -> Outcome {
        let removed = match self.ledger.remove(conn) {
            Some(record) => record,
            None => return Outcome::allowed(Vec::new()),
        };

        if self.policy() == ExclusivityPolicy::PerParticipant && !removed.active.is_empty() {
            let snapshot = self.snapshot(now);
            return Outcome::allowed(vec![Dispatch::All(ServerEvent::GlobalStatus(snapshot))]);
        }
        Outcome::allowed(Vec::new())
    }

    fn sweep(&mut self, now: Instant) -> Vec<MissionId> {
        let policy = self.policy();
        let expired = apply_timeouts(&mut self.registry, &mut self.ledger, policy, now);
        self.unreported_expiry.extend(expired.iter().copied());
        expired
    }

    fn deny(&self, conn: ConnectionId, event: &ClientEvent, reason: DenyReason) -> Outcome {
        debug!(
            "Denied {} from client {} (mission {:?}): {}",
            event.name(),
            conn,
            event.mission_id(),
            reason
        );

        let dispatches = if self.report_denials {
            vec![Dispatch::One(
                conn,
                ServerEvent::ActionDenied(Denial {
                    event: event.name().to_string(),
                    mission_id: event.mission_id(),
                    reason: reason.clone(),
                }),
            )]
        } else {
            Vec::new()
        };

        Outcome {
            admission: Admission::Denied(reason),
            dispatches,
            reset: None,
        }
    }

    /// Rejects events for unknown or resetting missions
    fn check_mutable(&self, id: MissionId) -> Result<(), DenyReason> {
        match self.registry.get(id) {
            None => Err(DenyReason::UnknownMission),
            Some(mission) if mission.is_resetting() => Err(DenyReason::MissionResetting),
            Some(_) => Ok(()),
        }
    }

    fn start(&mut self, conn: ConnectionId, event: &ClientEvent, id: MissionId, now: Instant) -> Outcome {
        if let Admission::Denied(reason) = self.gate.try_start(&self.registry, &self.ledger, conn, id) {
            return self.deny(conn, event, reason);
        }

        if self.policy() == ExclusivityPolicy::Global {
            self.registry
                .set_state(id, MissionState::Running { started_at: now });
        }
        self.ledger.record_start(conn, id, now);
        info!("Mission {} started by client {}", id, conn);

        let snapshot = self.snapshot(now);
        Outcome::allowed(vec![
            Dispatch::All(ServerEvent::AdminMissionActivate(id)),
            Dispatch::All(ServerEvent::GlobalStatus(snapshot)),
        ])
    }

    fn complete(&mut self, conn: ConnectionId, event: &ClientEvent, id: MissionId, now: Instant) -> Outcome {
        if let Err(reason) = self.check_mutable(id) {
            return self.deny(conn, event, reason);
        }

        match self.policy() {
            ExclusivityPolicy::Global => {
                if self.registry.get(id).map_or(false, |m| m.is_completed()) {
                    return self.deny(conn, event, DenyReason::AlreadyCompleted);
                }
                self.registry.set_state(id, MissionState::Completed);
                self.registry.set_failure_trigger(id, false);
                self.ledger.finish_everywhere(id);
                self.ledger.record_complete(conn, id);
            }
            ExclusivityPolicy::PerParticipant => {
                if !self.ledger.record_complete(conn, id) {
                    return self.deny(conn, event, DenyReason::AlreadyCompleted);
                }
                if !self.ledger.failed().contains(&id) {
                    self.registry.set_failure_trigger(id, false);
                }
            }
        }
        info!("Mission {} completed by client {}", id, conn);

        let snapshot = self.snapshot(now);
        Outcome::allowed(vec![
            Dispatch::All(ServerEvent::MissionComplete(id)),
            Dispatch::All(ServerEvent::GlobalStatus(snapshot)),
        ])
    }

    fn mark_failed(&mut self, conn: ConnectionId, event: &ClientEvent, id: MissionId, now: Instant) -> Outcome {
        if let Err(reason) = self.check_mutable(id) {
            return self.deny(conn, event, reason);
        }

        match self.policy() {
            ExclusivityPolicy::Global => {
                if self.registry.get(id).map_or(false, |m| m.is_completed()) {
                    return self.deny(conn, event, DenyReason::AlreadyCompleted);
                }
                self.registry.set_state(id, MissionState::Failed);
                self.ledger.finish_everywhere(id);
                self.ledger.record_failed(conn, id);
            }
            ExclusivityPolicy::PerParticipant => {
                if !self.ledger.record_failed(conn, id) {
                    return self.deny(conn, event, DenyReason::AlreadyCompleted);
                }
            }
        }
        self.registry.set_failure_trigger(id, true);
        info!("Mission {} marked failed by client {}", id, conn);

        let snapshot = self.snapshot(now);
        Outcome::allowed(vec![Dispatch::All(ServerEvent::GlobalStatus(snapshot))])
    }

    fn check_failure(&self, conn: ConnectionId, event: &ClientEvent, id: MissionId) -> Outcome {
        let mission = match self.registry.get(id) {
            Some(mission) => mission,
            None => return self.deny(conn, event, DenyReason::UnknownMission),
        };

        let is_failed = match self.policy() {
            ExclusivityPolicy::Global => mission.is_failed(),
            ExclusivityPolicy::PerParticipant => self.ledger.has_failed(conn, id),
        };

        Outcome::allowed(vec![Dispatch::One(
            conn,
            ServerEvent::FailureStatus(FailureStatus {
                mission_id: id,
                is_failed,
            }),
        )])
    }

    fn clear_failure_trigger(
        &mut self,
        conn: ConnectionId,
        event: &ClientEvent,
        id: MissionId,
        now: Instant,
    ) -> Outcome {
        if let Err(reason) = self.check_mutable(id) {
            return self.deny(conn, event, reason);
        }

        self.registry.set_failure_trigger(id, false);
        debug!("Failure trigger for mission {} cleared by client {}", id, conn);

        let snapshot = self.snapshot(now);
        Outcome::allowed(vec![Dispatch::All(ServerEvent::GlobalStatus(snapshot))])
    }

    fn reset(&mut self, conn: ConnectionId, event: &ClientEvent, target: ResetTarget) -> Outcome {
        let ticket = match self.resets.begin(&mut self.registry, &mut self.ledger, target) {
            Some(ticket) => ticket,
            None => return self.deny(conn, event, DenyReason::UnknownMission),
        };

        match target {
            ResetTarget::Mission(id) => {
                self.unreported_expiry.remove(&id);
            }
            ResetTarget::All => self.unreported_expiry.clear(),
        }
        info!("Reset of {:?} requested by client {}", target, conn);

        Outcome {
            admission: Admission::Allowed,
            dispatches: vec![Dispatch::All(ServerEvent::ParticipantReset(target.wire_id()))],
            reset: Some(ticket),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn global_session() -> MissionSession {
        MissionSession::new(
            shared::DEFAULT_MISSION_DURATIONS
                .iter()
                .map(|(id, secs)| (*id, Duration::from_secs(*secs))),
            ExclusivityPolicy::Global,
            Duration::from_millis(100),
            true,
        )
    }

    fn per_participant_session() -> MissionSession {
        MissionSession::new(
            (1..=3).map(|id| (id, Duration::from_secs(60))),
            ExclusivityPolicy::PerParticipant,
            Duration::from_millis(100),
            true,
        )
    }

    fn broadcast_status(outcome: &Outcome) -> Option<&GlobalStatus> {
        outcome.dispatches.iter().rev().find_map(|dispatch| match dispatch {
            Dispatch::All(ServerEvent::GlobalStatus(status)) => Some(status),
            _ => None,
        })
    }

    #[test]
    fn test_start_broadcasts_activation_and_status() {
        let mut session = global_session();
        let now = Instant::now();

        let outcome = session.handle(1, ClientEvent::MissionStart(3), now);

        assert!(outcome.admission.is_allowed());
        assert_eq!(
            outcome.dispatches[0],
            Dispatch::All(ServerEvent::AdminMissionActivate(3))
        );
        let status = broadcast_status(&outcome).unwrap();
        assert_eq!(status.running, vec![3]);
        assert_eq!(status.durations.get(&3), Some(&300));
        assert_eq!(session.ledger().active_mission(1), Some(3));
    }

    #[test]
    fn test_denial_goes_to_requester_only() {
        let mut session = global_session();
        let now = Instant::now();
        session.handle(1, ClientEvent::MissionStart(3), now);

        let outcome = session.handle(2, ClientEvent::MissionStart(4), now);

        assert_eq!(
            outcome.admission,
            Admission::Denied(DenyReason::AnotherMissionRunning { running: 3 })
        );
        assert_eq!(outcome.dispatches.len(), 1);
        match &outcome.dispatches[0] {
            Dispatch::One(2, ServerEvent::ActionDenied(denial)) => {
                assert_eq!(denial.event, "mission-start");
                assert_eq!(denial.mission_id, Some(4));
            }
            other => panic!("Unexpected dispatch {:?}", other),
        }
    }

    #[test]
    fn test_silent_denials() {
        let mut session = MissionSession::new(
            vec![(1, Duration::from_secs(10))],
            ExclusivityPolicy::Global,
            Duration::from_millis(100),
            false,
        );

        let outcome = session.handle(1, ClientEvent::MissionComplete(9), Instant::now());
        assert_eq!(outcome.admission, Admission::Denied(DenyReason::UnknownMission));
        assert!(outcome.dispatches.is_empty());
    }

    #[test]
    fn test_request_status_is_private() {
        let mut session = global_session();
        let outcome = session.handle(5, ClientEvent::RequestGlobalStatus, Instant::now());

        assert_eq!(outcome.dispatches.len(), 1);
        assert!(matches!(
            outcome.dispatches[0],
            Dispatch::One(5, ServerEvent::GlobalStatus(_))
        ));
    }

    #[test]
    fn test_completion_clears_failure_and_trigger() {
        let mut session = global_session();
        let now = Instant::now();
        session.handle(1, ClientEvent::MarkFailed(2), now);
        assert!(session.registry().get(2).unwrap().failure_trigger);

        let outcome = session.handle(1, ClientEvent::MissionComplete(2), now);
        let status = broadcast_status(&outcome).unwrap();

        assert_eq!(status.completed, vec![2]);
        assert!(status.failed.is_empty());
        assert!(!status.trigger(2));
    }

    #[test]
    fn test_restart_is_guarded() {
        let mut session = global_session();
        let start = Instant::now();
        session.handle(1, ClientEvent::MissionStart(2), start);

        let later = start + Duration::from_secs(10);
        let outcome = session.handle(1, ClientEvent::MissionStart(2), later);
        assert_eq!(outcome.admission, Admission::Denied(DenyReason::AlreadyRunning));

        assert_eq!(session.snapshot(later).durations.get(&2), Some(&290));
    }

    #[test]
    fn test_check_failure_reports_to_requester() {
        let mut session = global_session();
        let now = Instant::now();
        session.handle(1, ClientEvent::MarkFailed(6), now);

        let outcome = session.handle(3, ClientEvent::CheckFailure(6), now);
        assert_eq!(
            outcome.dispatches,
            vec![Dispatch::One(
                3,
                ServerEvent::FailureStatus(FailureStatus {
                    mission_id: 6,
                    is_failed: true
                })
            )]
        );

        let outcome = session.handle(3, ClientEvent::CheckFailure(5), now);
        assert_eq!(
            outcome.dispatches,
            vec![Dispatch::One(
                3,
                ServerEvent::FailureStatus(FailureStatus {
                    mission_id: 5,
                    is_failed: false
                })
            )]
        );
    }

    #[test]
    fn test_check_failure_sees_timeout() {
        let mut session = global_session();
        let start = Instant::now();
        session.handle(1, ClientEvent::MissionStart(7), start);

        let outcome = session.handle(1, ClientEvent::CheckFailure(7), start + Duration::from_secs(6));
        assert!(matches!(
            outcome.dispatches[0],
            Dispatch::One(
                1,
                ServerEvent::FailureStatus(FailureStatus {
                    mission_id: 7,
                    is_failed: true
                })
            )
        ));
    }

    #[test]
    fn test_clear_failure_trigger() {
        let mut session = global_session();
        let now = Instant::now();
        session.handle(1, ClientEvent::MarkFailed(4), now);

        let outcome = session.handle(9, ClientEvent::ClearFailureTrigger(4), now);
        let status = broadcast_status(&outcome).unwrap();

        assert!(!status.trigger(4));
        assert_eq!(status.failed, vec![4]);
    }

    #[test]
    fn test_timeout_found_by_event_is_announced() {
        let mut session = global_session();
        let start = Instant::now();
        session.handle(1, ClientEvent::MissionStart(1), start);

        // Mission 1 lasts 8s; the late start attempt uncovers the timeout
        let outcome = session.handle(2, ClientEvent::MissionStart(2), start + Duration::from_secs(9));

        assert_eq!(
            outcome.admission,
            Admission::Denied(DenyReason::FailureOutstanding { failed: 1 })
        );
        let status = broadcast_status(&outcome).unwrap();
        assert_eq!(status.failed, vec![1]);
        assert_eq!(status.durations.get(&1), Some(&0));
        assert!(status.trigger(1));
    }

    #[test]
    fn test_reset_returns_ticket_and_signal() {
        let mut session = global_session();
        let now = Instant::now();

        let outcome = session.handle(1, ClientEvent::AdminResetMission(3), now);
        assert_eq!(
            outcome.dispatches,
            vec![Dispatch::All(ServerEvent::ParticipantReset(3))]
        );
        let ticket = outcome.reset.unwrap();
        assert_eq!(ticket.target, ResetTarget::Mission(3));

        let outcome = session.handle(1, ClientEvent::AdminResetMission(30), now);
        assert_eq!(outcome.admission, Admission::Denied(DenyReason::UnknownMission));
        assert!(outcome.reset.is_none());
    }

    #[test]
    fn test_superseded_settle_is_quiet() {
        let mut session = global_session();
        let now = Instant::now();
        let first = session
            .handle(1, ClientEvent::AdminResetMission(3), now)
            .reset
            .unwrap();
        let second = session
            .handle(1, ClientEvent::AdminResetAll, now)
            .reset
            .unwrap();

        assert!(session.settle(first, now).dispatches.is_empty());
        assert!(session.registry().get(3).unwrap().is_resetting());

        let outcome = session.settle(second, now);
        assert!(broadcast_status(&outcome).is_some());
        assert!(session.registry().iter().all(|m| m.state == MissionState::Idle));
    }

    #[test]
    fn test_global_disconnect_keeps_mission_running() {
        let mut session = global_session();
        let now = Instant::now();
        session.handle(1, ClientEvent::MissionStart(2), now);

        let outcome = session.disconnect(1, now);
        assert!(outcome.dispatches.is_empty());
        assert!(session.registry().get(2).unwrap().is_running());
        assert!(session.ledger().record(1).is_none());
    }

    #[test]
    fn test_per_participant_concurrent_starts() {
        let mut session = per_participant_session();
        let now = Instant::now();

        assert!(session.handle(1, ClientEvent::MissionStart(1), now).admission.is_allowed());
        assert!(session.handle(2, ClientEvent::MissionStart(1), now).admission.is_allowed());
        assert!(session.handle(3, ClientEvent::MissionStart(2), now).admission.is_allowed());

        let status = session.snapshot(now);
        assert_eq!(status.running, vec![1, 2]);
    }

    #[test]
    fn test_per_participant_failure_is_scoped() {
        let mut session = per_participant_session();
        let now = Instant::now();
        session.handle(1, ClientEvent::MissionStart(1), now);
        session.handle(2, ClientEvent::MissionStart(1), now);

        session.handle(1, ClientEvent::MarkFailed(1), now);

        // Participant 2 keeps going and a third may still start
        assert!(session.ledger().is_active(2, 1));
        assert!(session.handle(3, ClientEvent::MissionStart(2), now).admission.is_allowed());

        let outcome = session.handle(1, ClientEvent::CheckFailure(1), now);
        assert!(matches!(
            outcome.dispatches[0],
            Dispatch::One(1, ServerEvent::FailureStatus(FailureStatus { is_failed: true, .. }))
        ));
        let outcome = session.handle(2, ClientEvent::CheckFailure(1), now);
        assert!(matches!(
            outcome.dispatches[0],
            Dispatch::One(2, ServerEvent::FailureStatus(FailureStatus { is_failed: false, .. }))
        ));

        // Retry after failure is allowed
        assert!(session.handle(1, ClientEvent::MissionStart(1), now).admission.is_allowed());
    }

    #[test]
    fn test_per_participant_completion_per_scope() {
        let mut session = per_participant_session();
        let now = Instant::now();
        session.handle(1, ClientEvent::MissionStart(2), now);
        session.handle(2, ClientEvent::MissionStart(2), now);

        let first = session.handle(1, ClientEvent::MissionComplete(2), now);
        assert!(first
            .dispatches
            .contains(&Dispatch::All(ServerEvent::MissionComplete(2))));

        let duplicate = session.handle(1, ClientEvent::MissionComplete(2), now);
        assert_eq!(
            duplicate.admission,
            Admission::Denied(DenyReason::AlreadyCompleted)
        );

        // The other participant's completion is a separate scope
        let second = session.handle(2, ClientEvent::MissionComplete(2), now);
        assert!(second.admission.is_allowed());
    }

    #[test]
    fn test_per_participant_disconnect_drops_running_view() {
        let mut session = per_participant_session();
        let now = Instant::now();
        session.handle(1, ClientEvent::MissionStart(1), now);
        session.handle(2, ClientEvent::MarkFailed(3), now);

        let outcome = session.disconnect(1, now);
        let status = broadcast_status(&outcome).unwrap();
        assert!(status.running.is_empty());

        // Failure of a departed participant is still visible until reset
        session.disconnect(2, now);
        assert_eq!(session.snapshot(now).failed, vec![3]);
    }

    #[test]
    fn test_per_participant_timeout() {
        let mut session = per_participant_session();
        let start = Instant::now();
        session.handle(1, ClientEvent::MissionStart(3), start);

        let status = session.snapshot(start + Duration::from_secs(61));
        assert_eq!(status.failed, vec![3]);
        assert!(status.running.is_empty());
        assert_eq!(status.durations.get(&3), Some(&0));
        assert!(session.ledger().has_failed(1, 3));
    }

    #[test]
    fn test_per_participant_expiry_keeps_other_countdown() {
        let mut session = per_participant_session();
        let start = Instant::now();
        session.handle(1, ClientEvent::MissionStart(1), start);
        session.handle(2, ClientEvent::MissionStart(1), start + Duration::from_secs(30));

        let status = session.snapshot(start + Duration::from_secs(61));
        assert_eq!(status.running, vec![1]);
        assert_eq!(status.failed, vec![1]);
        assert_eq!(status.durations.get(&1), Some(&29));
        assert!(session.ledger().has_failed(1, 1));
        assert!(session.ledger().is_active(2, 1));
    }
}
