//! Structured record of what a run did.
//!
//! Every observable executor decision becomes a [`RunEvent`]. Events are
//! kept in a bounded buffer that callers drain, and each one is mirrored to
//! the `log` facade. Mirroring is capped per update so a runaway loop cannot
//! flood the log.

use std::collections::VecDeque;

use serde::Serialize;

use crate::sync_policy::{Role, SyncMode};

/// Maximum number of mirrored log lines per update.
const MAX_LOGS_PER_UPDATE: u32 = 100;

/// Maximum number of buffered events. The oldest are dropped first.
const MAX_EVENTS: usize = 4096;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted { mode: SyncMode, role: Role, commands: usize },
    /// `run` was called while a run was already active.
    RunRejected,
    /// One elementary tick was executed.
    Tick { index: usize, command: String, wait: bool },
    /// A leaf command reached an avatar.
    Dispatched { command: String, remote: bool },
    /// The target avatar is dead; the command was dropped.
    DeadAvatar { command: String, remote: bool },
    /// The avatar did not understand the command.
    Unrecognized { command: String, remote: bool },
    WaitingForPeer { index: usize },
    UnlockSent,
    UnlockReceived,
    LockTimeout { held: f32 },
    Completed,
    Interrupted,
    FinishSent,
    PeerFinished,
    /// Completed locally, waiting for the peer before cleaning up.
    CleanupDeferred,
    Cleanup,
    Reset,
}

impl RunEvent {
    pub fn level(&self) -> log::Level {
        match self {
            RunEvent::RunRejected
            | RunEvent::DeadAvatar { .. }
            | RunEvent::Unrecognized { .. }
            | RunEvent::LockTimeout { .. } => log::Level::Warn,
            RunEvent::RunStarted { .. }
            | RunEvent::Completed
            | RunEvent::Interrupted
            | RunEvent::Cleanup
            | RunEvent::Reset => log::Level::Info,
            _ => log::Level::Debug,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            RunEvent::RunStarted { mode, role, commands } => {
                format!("Run started as {} in {} mode ({} commands)", role.name(), mode.name(), commands)
            }
            RunEvent::RunRejected => "Run requested while already running, ignored".to_string(),
            RunEvent::Tick { index, command, wait } => {
                format!("L{} {}{}", index + 1, command, if *wait { " (wait tick)" } else { "" })
            }
            RunEvent::Dispatched { command, remote } => {
                format!("Dispatched {} to {} avatar", command, if *remote { "rival" } else { "local" })
            }
            RunEvent::DeadAvatar { command, remote } => format!(
                "{} avatar is dead, dropped {}",
                if *remote { "Rival" } else { "Local" },
                command
            ),
            RunEvent::Unrecognized { command, remote } => format!(
                "{} avatar did not understand {}",
                if *remote { "Rival" } else { "Local" },
                command
            ),
            RunEvent::WaitingForPeer { index } => format!("L{} waiting for peer", index + 1),
            RunEvent::UnlockSent => "Sent UNLOCK".to_string(),
            RunEvent::UnlockReceived => "Received UNLOCK".to_string(),
            RunEvent::LockTimeout { held } => {
                format!("Peer lock held for {:.2}, force-released", held)
            }
            RunEvent::Completed => "Run completed".to_string(),
            RunEvent::Interrupted => "Run interrupted".to_string(),
            RunEvent::FinishSent => "Sent FINISH".to_string(),
            RunEvent::PeerFinished => "Peer finished".to_string(),
            RunEvent::CleanupDeferred => "Waiting for peer to finish before cleanup".to_string(),
            RunEvent::Cleanup => "Run cleaned up".to_string(),
            RunEvent::Reset => "Reset and cleared".to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct RunLog {
    source: String,
    events: VecDeque<RunEvent>,
    logged_this_update: u32,
    warned_limit: bool,
}

impl RunLog {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Default::default()
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Reset the per-update log counter. Call at the start of each update.
    pub fn begin_update(&mut self) {
        self.logged_this_update = 0;
        self.warned_limit = false;
    }

    pub fn record(&mut self, event: RunEvent) {
        if self.can_log() {
            log::log!(event.level(), "[{}] {}", self.source, event.describe());
        }
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    fn can_log(&mut self) -> bool {
        self.logged_this_update += 1;
        if self.logged_this_update > MAX_LOGS_PER_UPDATE {
            if !self.warned_limit {
                self.warned_limit = true;
                log::warn!(
                    "[{}] Run log limit exceeded ({} messages/update). Further logs dropped.",
                    self.source,
                    MAX_LOGS_PER_UPDATE
                );
            }
            return false;
        }
        true
    }

    pub fn events(&self) -> &VecDeque<RunEvent> {
        &self.events
    }

    /// Take all buffered events, leaving the buffer empty.
    pub fn take_events(&mut self) -> Vec<RunEvent> {
        self.events.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_events_drains() {
        let mut log = RunLog::new("master");
        log.record(RunEvent::UnlockSent);
        log.record(RunEvent::Completed);
        assert_eq!(log.take_events(), vec![RunEvent::UnlockSent, RunEvent::Completed]);
        assert!(log.events().is_empty());
    }

    #[test]
    fn test_buffer_is_bounded() {
        let mut log = RunLog::new("slave");
        log.record(RunEvent::UnlockSent);
        for _ in 0..MAX_EVENTS {
            log.record(RunEvent::UnlockReceived);
        }
        assert_eq!(log.events().len(), MAX_EVENTS);
        assert!(log.events().iter().all(|e| *e == RunEvent::UnlockReceived));

        log.record(RunEvent::Completed);
        assert_eq!(log.events().len(), MAX_EVENTS);
        assert_eq!(log.events().back(), Some(&RunEvent::Completed));
    }

    #[test]
    fn test_update_log_limit() {
        let mut log = RunLog::new("master");
        log.begin_update();
        for _ in 0..MAX_LOGS_PER_UPDATE {
            assert!(log.can_log());
        }
        assert!(!log.can_log());

        log.begin_update();
        assert!(log.can_log());
    }

    #[test]
    fn test_events_serialize_tagged() {
        let json = serde_json::to_string(&RunEvent::LockTimeout { held: 3.0 }).unwrap();
        assert_eq!(json, r#"{"event":"lock_timeout","held":3.0}"#);
        let started = serde_json::to_value(RunEvent::RunStarted {
            mode: SyncMode::CmdSwitching,
            role: Role::Slave,
            commands: 2,
        })
        .unwrap();
        assert_eq!(started["mode"], "cmd_switching");
        assert_eq!(started["role"], "slave");
    }
}
