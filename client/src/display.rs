//! Text rendering of server events for the console

use shared::{GlobalStatus, MissionId, ServerEvent, RESET_ALL_MISSIONS};

/// One-line (or table, for status) description of an event
pub fn describe(event: &ServerEvent) -> String {
    match event {
        ServerEvent::GlobalStatus(status) => render_status(status),
        ServerEvent::AdminMissionActivate(id) => format!("Mission {} activated", id),
        ServerEvent::MissionComplete(id) => format!("Mission {} complete", id),
        ServerEvent::ParticipantReset(target) if *target == RESET_ALL_MISSIONS => {
            "All missions are being reset".to_string()
        }
        ServerEvent::ParticipantReset(target) => format!("Mission {} is being reset", target),
        ServerEvent::FailureStatus(status) => format!(
            "Mission {} {}",
            status.mission_id,
            if status.is_failed { "has failed" } else { "has not failed" }
        ),
        ServerEvent::ActionDenied(denial) => match denial.mission_id {
            Some(id) => format!("Denied {} {}: {}", denial.event, id, denial.reason),
            None => format!("Denied {}: {}", denial.event, denial.reason),
        },
    }
}

pub fn mission_label(status: &GlobalStatus, id: MissionId) -> &'static str {
    if status.is_running(id) {
        "running"
    } else if status.is_completed(id) {
        "completed"
    } else if status.is_failed(id) {
        "failed"
    } else {
        "idle"
    }
}

pub fn format_remaining(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

pub fn render_status(status: &GlobalStatus) -> String {
    let mut lines = vec![format!("{:<8} {:<10} {:>6}  {}", "mission", "state", "left", "alert")];
    for (id, seconds) in &status.durations {
        lines.push(format!(
            "{:<8} {:<10} {:>6}  {}",
            id,
            mission_label(status, *id),
            format_remaining(*seconds),
            if status.trigger(*id) { "!" } else { "" }
        ));
    }
    lines.join("\n")
}
