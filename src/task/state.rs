//! Canonical task lifecycle and the per-vendor status interpretation.

use serde::{Deserialize, Serialize};

use crate::error::TaskError;

pub const QUEUED_PROGRESS: u8 = 10;
pub const RUNNING_PROGRESS: u8 = 50;
pub const UNKNOWN_PROGRESS: u8 = 30;
pub const TERMINAL_PROGRESS: u8 = 100;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    InProgress,
    Success,
    Failure,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }

    /// Lifecycle order: `Queued -> InProgress -> {Success | Failure}`.
    /// Terminal states accept nothing; non-terminal states never regress.
    pub fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.rank() >= self.rank()
    }

    fn rank(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::InProgress => 1,
            Self::Success | Self::Failure => 2,
        }
    }
}

/// Meaning of one vendor status string.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VendorState {
    Queued,
    Running,
    Succeeded,
    /// Terminal failure carrying the canonical reason.
    Failed(&'static str),
}

/// Fixed mapping from vendor status strings to canonical states.
pub struct StatusTable {
    entries: &'static [(&'static str, VendorState)],
}

impl StatusTable {
    pub const fn new(entries: &'static [(&'static str, VendorState)]) -> Self {
        Self { entries }
    }

    pub fn lookup(&self, status: &str) -> Option<VendorState> {
        let status = status.trim();
        self.entries
            .iter()
            .find(|(known, _)| known.eq_ignore_ascii_case(status))
            .map(|(_, state)| *state)
    }

    /// Turns a parsed vendor poll into the canonical outcome.
    ///
    /// An embedded vendor error always wins over the status field. A success
    /// without a result URL is a parse error, never a silent success.
    pub fn interpret(&self, poll: VendorPoll) -> Result<TaskInfo, TaskError> {
        if let Some(error) = poll.error {
            return Ok(TaskInfo::failure(error.describe()));
        }

        let info = match self.lookup(&poll.status) {
            Some(VendorState::Queued) => TaskInfo::pending(TaskStatus::Queued, QUEUED_PROGRESS),
            Some(VendorState::Running) => {
                let progress = poll
                    .progress
                    .map(|progress| progress.min(TERMINAL_PROGRESS - 1))
                    .unwrap_or(RUNNING_PROGRESS);
                TaskInfo::pending(TaskStatus::InProgress, progress)
            }
            Some(VendorState::Succeeded) => {
                let url = poll
                    .result_url
                    .filter(|url| !url.trim().is_empty())
                    .ok_or_else(|| {
                        TaskError::parse(
                            "missing_result_url",
                            format!("task reported '{}' without a result url", poll.status),
                        )
                    })?;
                TaskInfo {
                    status: TaskStatus::Success,
                    progress: TERMINAL_PROGRESS,
                    url: Some(url),
                    secondary_url: poll.secondary_url.filter(|url| !url.trim().is_empty()),
                    reason: None,
                    usage: poll.usage,
                }
            }
            Some(VendorState::Failed(reason)) => TaskInfo::failure(reason.to_string()),
            None => TaskInfo::pending(TaskStatus::InProgress, UNKNOWN_PROGRESS),
        };

        Ok(info)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VendorError {
    pub code: String,
    pub message: String,
}

impl VendorError {
    /// `None` when the vendor sent an error object without a message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Option<Self> {
        let message = message.into();
        if message.trim().is_empty() {
            return None;
        }
        Some(Self {
            code: code.into(),
            message,
        })
    }

    pub fn describe(&self) -> String {
        if self.code.is_empty() {
            self.message.clone()
        } else {
            format!("[{}] {}", self.code, self.message)
        }
    }
}

/// Vendor-neutral view of one poll response, filled in by an adaptor.
#[derive(Clone, Debug, Default)]
pub struct VendorPoll {
    pub status: String,
    pub error: Option<VendorError>,
    pub result_url: Option<String>,
    pub secondary_url: Option<String>,
    pub progress: Option<u8>,
    pub usage: Option<TaskUsage>,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TaskUsage {
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TaskInfo {
    pub status: TaskStatus,
    pub progress: u8,
    pub url: Option<String>,
    pub secondary_url: Option<String>,
    pub reason: Option<String>,
    pub usage: Option<TaskUsage>,
}

impl TaskInfo {
    fn pending(status: TaskStatus, progress: u8) -> Self {
        Self {
            status,
            progress,
            url: None,
            secondary_url: None,
            reason: None,
            usage: None,
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Failure,
            progress: TERMINAL_PROGRESS,
            url: None,
            secondary_url: None,
            reason: Some(reason.into()),
            usage: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskErrorKind;

    static TABLE: StatusTable = StatusTable::new(&[
        ("queued", VendorState::Queued),
        ("running", VendorState::Running),
        ("succeeded", VendorState::Succeeded),
        ("failed", VendorState::Failed("task failed")),
        ("cancelled", VendorState::Failed("task cancelled")),
    ]);

    fn poll(status: &str) -> VendorPoll {
        VendorPoll {
            status: status.to_string(),
            ..VendorPoll::default()
        }
    }

    #[test]
    fn terminal_states_never_transition() {
        assert!(TaskStatus::Queued.can_transition_to(TaskStatus::InProgress));
        assert!(TaskStatus::Queued.can_transition_to(TaskStatus::Failure));
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::InProgress));
        assert!(!TaskStatus::InProgress.can_transition_to(TaskStatus::Queued));
        assert!(!TaskStatus::Success.can_transition_to(TaskStatus::Failure));
        assert!(!TaskStatus::Failure.can_transition_to(TaskStatus::Failure));
    }

    #[test]
    fn embedded_error_fails_even_when_status_succeeded() {
        let mut succeeded = poll("succeeded");
        succeeded.result_url = Some("https://cdn/video.mp4".to_string());
        succeeded.error = VendorError::new("OutputVideoSensitive", "blocked by review");

        let info = TABLE.interpret(succeeded).expect("interpretable");
        assert_eq!(info.status, TaskStatus::Failure);
        assert_eq!(info.progress, 100);
        assert_eq!(info.reason.as_deref(), Some("[OutputVideoSensitive] blocked by review"));
    }

    #[test]
    fn error_objects_without_message_are_ignored() {
        assert_eq!(VendorError::new("Code", ""), None);
        let error = VendorError::new("", "plain").expect("has message");
        assert_eq!(error.describe(), "plain");
    }

    #[test]
    fn unknown_status_is_in_progress() {
        let info = TABLE.interpret(poll("warming_up")).expect("interpretable");
        assert_eq!(info.status, TaskStatus::InProgress);
        assert_eq!(info.progress, UNKNOWN_PROGRESS);
    }

    #[test]
    fn cancelled_is_terminal_failure() {
        let info = TABLE.interpret(poll("Cancelled")).expect("interpretable");
        assert_eq!(info.status, TaskStatus::Failure);
        assert_eq!(info.progress, 100);
        assert!(info.reason.unwrap_or_default().contains("cancelled"));
    }

    #[test]
    fn progress_follows_vendor_state() {
        assert_eq!(TABLE.interpret(poll("queued")).map(|info| info.progress).ok(), Some(10));
        assert_eq!(TABLE.interpret(poll("running")).map(|info| info.progress).ok(), Some(50));

        let mut reported = poll("running");
        reported.progress = Some(100);
        let info = TABLE.interpret(reported).expect("interpretable");
        assert_eq!(info.progress, 99, "only terminal states report 100");
    }

    #[test]
    fn success_without_url_is_a_parse_error() {
        let error = TABLE.interpret(poll("succeeded")).expect_err("no url");
        assert_eq!(error.kind, TaskErrorKind::Parse);

        let mut done = poll("succeeded");
        done.result_url = Some("https://cdn/video.mp4".to_string());
        done.secondary_url = Some("https://cdn/audio.mp3".to_string());
        done.usage = Some(TaskUsage {
            completion_tokens: 10,
            total_tokens: 10,
        });
        let info = TABLE.interpret(done).expect("interpretable");
        assert_eq!(info.status, TaskStatus::Success);
        assert_eq!(info.secondary_url.as_deref(), Some("https://cdn/audio.mp3"));
        assert_eq!(info.usage.map(|usage| usage.total_tokens), Some(10));
    }
}
