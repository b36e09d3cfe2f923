use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type MissionId = u32;

pub const DEFAULT_PORT: u16 = 4000;
pub const DEFAULT_RESET_SETTLE_MS: u64 = 100;
pub const DEFAULT_MISSION_DURATIONS: [(MissionId, u64); 7] =
    [(1, 8), (2, 300), (3, 300), (4, 300), (5, 300), (6, 30), (7, 5)];

/// Wire value of `participant-reset` when every mission is being reset
pub const RESET_ALL_MISSIONS: i64 = -1;

/// Events sent by participants and the admin console.
///
/// Encoded as `{"event": "<kebab-name>", "data": <payload>}`; unit events
/// carry no `data` field.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    RequestGlobalStatus,
    MissionStart(MissionId),
    MarkFailed(MissionId),
    MissionComplete(MissionId),
    CheckFailure(MissionId),
    ClearFailureTrigger(MissionId),
    AdminResetMission(MissionId),
    AdminResetAll,
}

impl ClientEvent {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Wire name of the event, as used in `action-denied` payloads
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::RequestGlobalStatus => "request-global-status",
            ClientEvent::MissionStart(_) => "mission-start",
            ClientEvent::MarkFailed(_) => "mark-failed",
            ClientEvent::MissionComplete(_) => "mission-complete",
            ClientEvent::CheckFailure(_) => "check-failure",
            ClientEvent::ClearFailureTrigger(_) => "clear-failure-trigger",
            ClientEvent::AdminResetMission(_) => "admin-reset-mission",
            ClientEvent::AdminResetAll => "admin-reset-all",
        }
    }

    pub fn mission_id(&self) -> Option<MissionId> {
        match self {
            ClientEvent::MissionStart(id)
            | ClientEvent::MarkFailed(id)
            | ClientEvent::MissionComplete(id)
            | ClientEvent::CheckFailure(id)
            | ClientEvent::ClearFailureTrigger(id)
            | ClientEvent::AdminResetMission(id) => Some(*id),
            ClientEvent::RequestGlobalStatus | ClientEvent::AdminResetAll => None,
        }
    }
}

/// Events pushed by the server, either to every connection or to one.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    GlobalStatus(GlobalStatus),
    AdminMissionActivate(MissionId),
    MissionComplete(MissionId),
    /// Mission id, or [`RESET_ALL_MISSIONS`]
    ParticipantReset(i64),
    FailureStatus(FailureStatus),
    ActionDenied(Denial),
}

impl ServerEvent {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Point-in-time view of every mission, recomputed on demand
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStatus {
    pub running: Vec<MissionId>,
    pub failed: Vec<MissionId>,
    pub completed: Vec<MissionId>,
    /// Seconds remaining per mission
    pub durations: BTreeMap<MissionId, u64>,
    /// 1 while a mission has a failure awaiting admin attention
    pub failure_triggers: BTreeMap<MissionId, u8>,
}

impl GlobalStatus {
    pub fn is_running(&self, id: MissionId) -> bool {
        self.running.contains(&id)
    }

    pub fn is_failed(&self, id: MissionId) -> bool {
        self.failed.contains(&id)
    }

    pub fn is_completed(&self, id: MissionId) -> bool {
        self.completed.contains(&id)
    }

    pub fn trigger(&self, id: MissionId) -> bool {
        self.failure_triggers.get(&id).copied().unwrap_or(0) == 1
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FailureStatus {
    pub mission_id: MissionId,
    pub is_failed: bool,
}

/// Payload of `action-denied`, sent only to the connection whose event was refused
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Denial {
    pub event: String,
    pub mission_id: Option<MissionId>,
    pub reason: DenyReason,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, thiserror::Error)]
#[serde(tag = "code", rename_all = "kebab-case")]
pub enum DenyReason {
    #[error("mission does not exist")]
    UnknownMission,
    #[error("mission {running} is already running")]
    AnotherMissionRunning { running: MissionId },
    #[error("mission {failed} has an outstanding failure")]
    FailureOutstanding { failed: MissionId },
    #[error("mission is already running")]
    AlreadyRunning,
    #[error("mission is already completed")]
    AlreadyCompleted,
    #[error("mission is being reset")]
    MissionResetting,
}
