//! Peer synchronization policy.
//!
//! Pure decision logic, evaluated once before and once after every
//! elementary command (a tick). The policy never waits by itself: it tells
//! the executor whether to proceed (possibly after a pacing delay) or to
//! block until the peer releases the lock, and it accounts blocked time so
//! a silent peer can never stall a run forever.
//!
//! | Mode            | Before a tick                                   | After a tick                        |
//! |-----------------|-------------------------------------------------|-------------------------------------|
//! | Async           | proceed after the fixed command delay           | nothing                             |
//! | StepSwitching   | block while locked, else smooth to the delay    | lock and send UNLOCK unless peer done |
//! | CmdSwitching    | locked: send UNLOCK once, then block            | lock, arm the next UNLOCK           |

use serde::{Deserialize, Serialize};

/// Slack used when comparing accumulated frame time against thresholds.
pub const TIME_EPSILON: f32 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    Async,
    StepSwitching,
    CmdSwitching,
}

impl SyncMode {
    pub fn name(&self) -> &'static str {
        match self {
            SyncMode::Async => "async",
            SyncMode::StepSwitching => "step_switching",
            SyncMode::CmdSwitching => "cmd_switching",
        }
    }
}

/// Which side of the pair this device is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Master,
    Slave,
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Slave => "slave",
        }
    }
}

fn default_command_delay() -> f32 {
    0.5
}

fn default_smoothing_delay() -> f32 {
    0.5
}

fn default_wait_quantum() -> f32 {
    0.5
}

fn default_step_timeout() -> f32 {
    3.0
}

fn default_command_timeout() -> f32 {
    100.0
}

/// Timing constants, in the scheduler's time units. Both peers must use the
/// same values for the drift bounds to hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncTimings {
    /// Pause between consecutive commands (Async and CmdSwitching).
    #[serde(default = "default_command_delay")]
    pub command_delay: f32,

    /// Minimum spacing between commands while step switching.
    #[serde(default = "default_smoothing_delay")]
    pub smoothing_delay: f32,

    /// Length of one synthetic wait tick. A wait of N seconds expands into
    /// N / quantum ticks.
    #[serde(default = "default_wait_quantum")]
    pub wait_quantum: f32,

    /// Forced lock release under StepSwitching.
    #[serde(default = "default_step_timeout")]
    pub step_timeout: f32,

    /// Forced lock release under CmdSwitching.
    #[serde(default = "default_command_timeout")]
    pub command_timeout: f32,
}

impl Default for SyncTimings {
    fn default() -> Self {
        Self {
            command_delay: default_command_delay(),
            smoothing_delay: default_smoothing_delay(),
            wait_quantum: default_wait_quantum(),
            step_timeout: default_step_timeout(),
            command_timeout: default_command_timeout(),
        }
    }
}

impl SyncTimings {
    pub fn validate(&self) -> Result<(), String> {
        let fields = [
            ("commandDelay", self.command_delay, true),
            ("smoothingDelay", self.smoothing_delay, true),
            ("waitQuantum", self.wait_quantum, false),
            ("stepTimeout", self.step_timeout, false),
            ("commandTimeout", self.command_timeout, false),
        ];
        for (name, value, zero_ok) in fields {
            if !value.is_finite() || value < 0.0 || (!zero_ok && value == 0.0) {
                return Err(format!("{} must be positive, got {}", name, value));
            }
        }
        Ok(())
    }

    /// Wait ticks per second of a wait command.
    pub fn ticks_per_second(&self) -> u32 {
        (1.0 / self.wait_quantum).round().max(1.0) as u32
    }

    pub fn timeout_for(&self, mode: SyncMode) -> f32 {
        match mode {
            SyncMode::Async => f32::INFINITY,
            SyncMode::StepSwitching => self.step_timeout,
            SyncMode::CmdSwitching => self.command_timeout,
        }
    }
}

/// Per-session synchronization state. Owned by the policy, reset at every
/// run start and explicit reset.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncState {
    pub mode: SyncMode,
    pub local_lock_engaged: bool,
    pub remote_finished: bool,
    pub running: bool,
    pub elapsed_wait_time: f32,
    pub max_wait_timeout: f32,
    /// CmdSwitching: the next locked tick hands the floor to the peer.
    pub unlock_armed: bool,
}

/// What the executor may do with the next tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gate {
    /// Dispatch after `delay` more time units.
    Proceed { delay: f32 },
    /// Wait for the peer (or the timeout).
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreTick {
    pub gate: Gate,
    /// Send an UNLOCK signal to the peer now.
    pub send_unlock: bool,
}

impl PreTick {
    fn proceed(delay: f32) -> Self {
        Self {
            gate: Gate::Proceed { delay: delay.max(0.0) },
            send_unlock: false,
        }
    }
}

/// Result of accounting blocked time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BlockPoll {
    /// Still waiting for the peer.
    Blocked,
    /// The peer released the lock.
    Released,
    /// The lock was held too long and has been force-released.
    TimedOut { held: f32 },
}

/// Describes the tick being gated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickKind {
    /// The command is peer-synchronized.
    pub lock: bool,
    /// A synthetic wait tick.
    pub wait: bool,
}

#[derive(Debug, Clone)]
pub struct SyncPolicy {
    role: Role,
    timings: SyncTimings,
    state: SyncState,
}

impl SyncPolicy {
    pub fn new(mode: SyncMode, role: Role, timings: SyncTimings) -> Self {
        let state = Self::initial_state(mode, role, &timings);
        Self { role, timings, state }
    }

    fn initial_state(mode: SyncMode, role: Role, timings: &SyncTimings) -> SyncState {
        SyncState {
            mode,
            // The slave holds the floor first under command switching.
            local_lock_engaged: mode == SyncMode::CmdSwitching && role == Role::Master,
            remote_finished: false,
            running: false,
            elapsed_wait_time: 0.0,
            max_wait_timeout: timings.timeout_for(mode),
            unlock_armed: false,
        }
    }

    pub fn mode(&self) -> SyncMode {
        self.state.mode
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn timings(&self) -> &SyncTimings {
        &self.timings
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn remote_finished(&self) -> bool {
        self.state.remote_finished
    }

    pub fn reset(&mut self) {
        self.state = Self::initial_state(self.state.mode, self.role, &self.timings);
    }

    /// Reset for a new run and mark it running.
    pub fn start(&mut self) {
        self.reset();
        self.state.running = true;
    }

    pub fn stop(&mut self) {
        self.state.running = false;
    }

    /// Decide whether the next tick may go ahead. `since_dispatch` is the time
    /// since the previous dispatch of this run, `None` before the first.
    pub fn pre_tick(&mut self, kind: TickKind, since_dispatch: Option<f32>) -> PreTick {
        let remainder = |spacing: f32| since_dispatch.map_or(0.0, |age| spacing - age);
        let fixed = |delay: f32| since_dispatch.map_or(0.0, |_| delay);

        if !kind.lock {
            // Local-only commands bypass synchronization; wait ticks keep
            // their quantum.
            return PreTick::proceed(if kind.wait { remainder(self.timings.wait_quantum) } else { 0.0 });
        }

        match self.state.mode {
            SyncMode::Async => PreTick::proceed(fixed(self.timings.command_delay)),
            SyncMode::StepSwitching => {
                if self.state.local_lock_engaged {
                    PreTick {
                        gate: Gate::Block,
                        send_unlock: false,
                    }
                } else {
                    PreTick::proceed(remainder(self.timings.smoothing_delay))
                }
            }
            SyncMode::CmdSwitching => {
                if self.state.local_lock_engaged {
                    let send_unlock = std::mem::take(&mut self.state.unlock_armed);
                    PreTick {
                        gate: Gate::Block,
                        send_unlock,
                    }
                } else {
                    PreTick::proceed(fixed(self.timings.command_delay))
                }
            }
        }
    }

    /// Bookkeeping after a dispatched tick. Returns true when an UNLOCK
    /// signal must be sent to the peer now.
    pub fn post_tick(&mut self, kind: TickKind) -> bool {
        if !kind.lock || self.state.remote_finished {
            return false;
        }
        match self.state.mode {
            SyncMode::Async => false,
            SyncMode::StepSwitching => {
                self.engage();
                true
            }
            SyncMode::CmdSwitching => {
                self.engage();
                self.state.unlock_armed = true;
                false
            }
        }
    }

    fn engage(&mut self) {
        self.state.local_lock_engaged = true;
        self.state.elapsed_wait_time = 0.0;
    }

    /// Account `dt` of blocked time.
    pub fn poll_block(&mut self, dt: f32) -> BlockPoll {
        if !self.state.local_lock_engaged {
            self.state.elapsed_wait_time = 0.0;
            return BlockPoll::Released;
        }
        self.state.elapsed_wait_time += dt;
        if self.state.elapsed_wait_time + TIME_EPSILON >= self.state.max_wait_timeout {
            let held = self.state.elapsed_wait_time;
            self.state.local_lock_engaged = false;
            self.state.elapsed_wait_time = 0.0;
            return BlockPoll::TimedOut { held };
        }
        BlockPoll::Blocked
    }

    /// The peer released this side's lock.
    pub fn on_peer_unlock(&mut self) {
        self.state.local_lock_engaged = false;
        self.state.elapsed_wait_time = 0.0;
    }

    /// The peer finished its run; nobody is left to unlock us.
    pub fn on_peer_finished(&mut self) {
        self.state.remote_finished = true;
        self.state.local_lock_engaged = false;
        self.state.elapsed_wait_time = 0.0;
    }
}
