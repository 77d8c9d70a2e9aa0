//! Signal delivery to individual processes.
//!
//! Every call resolves to an [`ActionOutcome`]; OS failures are classified
//! into [`ControlError`] variants and rendered into the outcome message.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const AUDIT_TARGET: &str = "procsentry_audit";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessAction {
    Kill,
    Terminate,
    Suspend,
    Resume,
}

impl ProcessAction {
    pub const ALL: [ProcessAction; 4] = [
        ProcessAction::Kill,
        ProcessAction::Terminate,
        ProcessAction::Suspend,
        ProcessAction::Resume,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessAction::Kill => "kill",
            ProcessAction::Terminate => "terminate",
            ProcessAction::Suspend => "suspend",
            ProcessAction::Resume => "resume",
        }
    }

    pub fn past_tense(self) -> &'static str {
        match self {
            ProcessAction::Kill => "killed",
            ProcessAction::Terminate => "terminated",
            ProcessAction::Suspend => "suspended",
            ProcessAction::Resume => "resumed",
        }
    }

    #[cfg(unix)]
    fn signal(self) -> libc::c_int {
        match self {
            ProcessAction::Kill => libc::SIGKILL,
            ProcessAction::Terminate => libc::SIGTERM,
            ProcessAction::Suspend => libc::SIGSTOP,
            ProcessAction::Resume => libc::SIGCONT,
        }
    }
}

impl fmt::Display for ProcessAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessAction {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        ProcessAction::ALL
            .into_iter()
            .find(|action| action.as_str() == lowered)
            .ok_or_else(|| ControlError::UnknownAction(s.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("process {0} not found")]
    NotFound(u32),
    #[error("access denied for process {0}")]
    AccessDenied(u32),
    #[error("refusing to signal pid {pid}: {reason}")]
    Protected { pid: u32, reason: &'static str },
    #[error("unknown action '{0}'")]
    UnknownAction(String),
    #[error("failed to signal pid {pid}: {source}")]
    Os {
        pid: u32,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub message: String,
    /// The action that was dispatched; `None` when the name did not parse.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ProcessAction>,
}

impl ActionOutcome {
    pub fn failed(err: &ControlError) -> Self {
        Self {
            success: false,
            message: err.to_string(),
            action: None,
        }
    }
}

pub trait ProcessControl: Send + Sync {
    /// Deliver `action` to `pid`, returning the success message.
    fn try_act(&self, pid: u32, action: ProcessAction) -> Result<String, ControlError>;

    fn act(&self, pid: u32, action: ProcessAction) -> ActionOutcome {
        match self.try_act(pid, action) {
            Ok(message) => {
                warn!(target: AUDIT_TARGET, "{action} pid={pid} ok");
                ActionOutcome {
                    success: true,
                    message,
                    action: Some(action),
                }
            }
            Err(err) => {
                warn!(target: AUDIT_TARGET, "{action} pid={pid} failed: {err}");
                ActionOutcome {
                    action: Some(action),
                    ..ActionOutcome::failed(&err)
                }
            }
        }
    }
}

/// Parse `action` and dispatch it; an unparseable action is a failed
/// outcome and reaches no process.
pub fn act_by_name(control: &dyn ProcessControl, pid: u32, action: &str) -> ActionOutcome {
    match action.parse::<ProcessAction>() {
        Ok(action) => control.act(pid, action),
        Err(err) => ActionOutcome::failed(&err),
    }
}

/// Delivers real signals. Refuses pid 0 (process group), init and the
/// daemon itself.
pub struct SignalController {
    own_pid: u32,
}

impl SignalController {
    pub fn new() -> Self {
        Self {
            own_pid: std::process::id(),
        }
    }

    fn guard(&self, pid: u32) -> Result<(), ControlError> {
        let reason = match pid {
            0 => "pid 0 addresses the whole process group",
            1 => "init must not be signalled",
            p if p == self.own_pid => "refusing to signal the monitor itself",
            _ => return Ok(()),
        };
        Err(ControlError::Protected { pid, reason })
    }
}

impl Default for SignalController {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessControl for SignalController {
    #[cfg(unix)]
    fn try_act(&self, pid: u32, action: ProcessAction) -> Result<String, ControlError> {
        self.guard(pid)?;
        // pids above i32::MAX would turn into negative group ids
        let raw = libc::pid_t::try_from(pid).map_err(|_| ControlError::NotFound(pid))?;

        let rc = unsafe { libc::kill(raw, action.signal()) };
        if rc == 0 {
            info!("[control] {action} delivered to pid {pid}");
            return Ok(format!("PID {pid} {}", action.past_tense()));
        }

        let err = std::io::Error::last_os_error();
        Err(match err.raw_os_error() {
            Some(libc::ESRCH) => ControlError::NotFound(pid),
            Some(libc::EPERM) => ControlError::AccessDenied(pid),
            _ => ControlError::Os { pid, source: err },
        })
    }

    #[cfg(not(unix))]
    fn try_act(&self, pid: u32, _action: ProcessAction) -> Result<String, ControlError> {
        self.guard(pid)?;
        Err(ControlError::Os {
            pid,
            source: std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "process signals are only supported on unix",
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_actions_case_insensitively() {
        assert_eq!("KILL".parse::<ProcessAction>().unwrap(), ProcessAction::Kill);
        assert_eq!(" resume ".parse::<ProcessAction>().unwrap(), ProcessAction::Resume);
        assert!(matches!(
            "nuke".parse::<ProcessAction>(),
            Err(ControlError::UnknownAction(_))
        ));
    }

    #[test]
    fn missing_pid_reports_not_found() {
        let controller = SignalController::new();
        // above the kernel's pid_max ceiling
        let outcome = controller.act(4_194_305, ProcessAction::Terminate);
        assert!(!outcome.success);
        assert!(outcome.message.contains("not found"), "{}", outcome.message);
        assert_eq!(outcome.action, Some(ProcessAction::Terminate));
    }

    #[test]
    fn protected_pids_are_refused() {
        let controller = SignalController::new();
        for pid in [0, 1, std::process::id()] {
            assert!(matches!(
                controller.try_act(pid, ProcessAction::Kill),
                Err(ControlError::Protected { .. })
            ));
        }
    }

    #[test]
    fn unknown_action_is_a_failed_outcome() {
        let controller = SignalController::new();
        let outcome = act_by_name(&controller, 4_194_305, "explode");
        assert!(!outcome.success);
        assert_eq!(outcome.message, "unknown action 'explode'");
        assert_eq!(outcome.action, None);
    }

    #[cfg(unix)]
    #[test]
    fn signals_a_child_process() {
        use std::os::unix::process::ExitStatusExt;

        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("spawn sleep");
        let controller = SignalController::new();

        let suspended = controller.act(child.id(), ProcessAction::Suspend);
        assert!(suspended.success);
        assert_eq!(suspended.message, format!("PID {} suspended", child.id()));
        assert!(controller.act(child.id(), ProcessAction::Resume).success);

        let killed = act_by_name(&controller, child.id(), "kill");
        assert!(killed.success);
        let status = child.wait().unwrap();
        assert_eq!(status.signal(), Some(libc::SIGKILL));
    }
}
