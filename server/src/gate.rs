//! Start admission under the configured exclusivity policy

use crate::client_manager::ConnectionId;
use crate::ledger::ParticipantLedger;
use crate::mission::{MissionRegistry, MissionState};
use clap::ValueEnum;
use shared::{DenyReason, MissionId};

/// Scope in which "only one running mission" is enforced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ExclusivityPolicy {
    /// One running mission in the whole session; any failure blocks new
    /// starts until it is reset
    #[default]
    Global,
    /// One running mission per connection; failures only affect the
    /// participant that failed
    PerParticipant,
}

/// Result of every mutating handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Denied(DenyReason),
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }

    pub fn reason(&self) -> Option<&DenyReason> {
        match self {
            Admission::Allowed => None,
            Admission::Denied(reason) => Some(reason),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExclusivityGate {
    policy: ExclusivityPolicy,
}

impl ExclusivityGate {
    pub fn new(policy: ExclusivityPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ExclusivityPolicy {
        self.policy
    }

    /// Decides whether `conn` may start mission `id` right now.
    ///
    /// Timeouts must already be applied so that an expired mission is seen
    /// as failed rather than running.
    pub fn try_start(
        &self,
        registry: &MissionRegistry,
        ledger: &ParticipantLedger,
        conn: ConnectionId,
        id: MissionId,
    ) -> Admission {
        let mission = match registry.get(id) {
            Some(mission) => mission,
            None => return Admission::Denied(DenyReason::UnknownMission),
        };
        if mission.is_resetting() {
            return Admission::Denied(DenyReason::MissionResetting);
        }

        match self.policy {
            ExclusivityPolicy::Global => {
                match mission.state {
                    MissionState::Running { .. } => {
                        return Admission::Denied(DenyReason::AlreadyRunning)
                    }
                    MissionState::Completed => {
                        return Admission::Denied(DenyReason::AlreadyCompleted)
                    }
                    _ => {}
                }
                if let Some(running) = registry.running_except(id) {
                    return Admission::Denied(DenyReason::AnotherMissionRunning { running });
                }
                if let Some(failed) = registry.first_failed() {
                    return Admission::Denied(DenyReason::FailureOutstanding { failed });
                }
                Admission::Allowed
            }
            ExclusivityPolicy::PerParticipant => {
                if ledger.is_active(conn, id) {
                    return Admission::Denied(DenyReason::AlreadyRunning);
                }
                if ledger.has_completed(conn, id) {
                    return Admission::Denied(DenyReason::AlreadyCompleted);
                }
                if let Some(running) = ledger.active_mission(conn) {
                    return Admission::Denied(DenyReason::AnotherMissionRunning { running });
                }
                Admission::Allowed
            }
        }
    }
}
