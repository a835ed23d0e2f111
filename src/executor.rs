//! Script executor.
//!
//! Walks a script tick by tick, one elementary command per tick, and
//! consults the [`SyncPolicy`] before and after each one. The walk is an
//! explicit state machine advanced by [`ScriptExecutor::update`] from the
//! host's frame loop, so a run can be suspended on a pacing delay or on the
//! peer lock and resumed on a later frame.
//!
//! Loops expand depth-first: a loop of `N` repetitions over children
//! `[a, b]` yields `a b a b ...`. A wait command of `s` seconds expands into
//! `ceil(s / quantum)` synthetic wait ticks. Disabled commands (and whole
//! disabled loops) produce no ticks.

use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::avatar::Avatar;
use crate::command::{wait_ticks, Command, CommandBase};
use crate::run_log::{RunEvent, RunLog};
use crate::script::Script;
use crate::sync_policy::{
    BlockPoll, Gate, Role, SyncMode, SyncPolicy, SyncState, SyncTimings, TickKind, TIME_EPSILON,
};
use crate::transport::{PeerMessage, Transport};
use crate::viewer::Viewer;

/// Shared "keep running" flag. Clearing it stops the run at the next tick
/// boundary; avatars hold a clone so a fatal event can stop their own run.
#[derive(Debug, Clone, Default)]
pub struct RunFlag(Rc<Cell<bool>>);

impl RunFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.set(true);
    }

    pub fn clear(&self) {
        self.0.set(false);
    }

    pub fn is_set(&self) -> bool {
        self.0.get()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Idle,
    Running,
    WaitingForPeer,
    /// Finished locally; cleanup waits for the peer's FINISH.
    Completed,
    /// Stopped early; cleanup waits for the peer's FINISH.
    Interrupted,
}

/// Static parameters of an executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub role: Role,
    pub mode: SyncMode,
    pub timings: SyncTimings,
    /// Name of the command expanded into wait ticks.
    pub wait_command: String,
}

/// Everything the executor talks to.
pub struct Collaborators {
    pub local: Box<dyn Avatar>,
    pub rival: Box<dyn Avatar>,
    pub transport: Box<dyn Transport>,
    pub viewer: Box<dyn Viewer>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Pending {
    None,
    /// Pacing delay left before the next tick.
    Pacing(f32),
    /// Blocked on the peer lock.
    Peer,
    /// The gate has been passed; dispatch without asking again.
    Ready,
}

#[derive(Debug, Clone, Copy, Default)]
struct LoopFrame {
    repetition: u32,
    child: usize,
}

/// Position of the walk. `frames[d]` belongs to the loop at nesting depth
/// `d` on the current path; `leaf_ticks` counts ticks already spent on the
/// current leaf.
#[derive(Debug, Clone, Default)]
struct Cursor {
    top: usize,
    frames: Vec<LoopFrame>,
    leaf_ticks: u32,
}

/// One elementary tick, resolved from the cursor.
#[derive(Debug, Clone)]
struct Step {
    path: Vec<usize>,
    command: CommandBase,
    wait: bool,
}

struct WaitRule<'a> {
    command: &'a str,
    ticks_per_second: u32,
}

impl Cursor {
    /// Move to the next tick to execute, without consuming it. Returns
    /// `None` once the script is exhausted.
    fn settle(&mut self, commands: &[Command], wait: &WaitRule) -> Option<Step> {
        while let Some(node) = commands.get(self.top) {
            let mut path = vec![self.top];
            if let Some(step) = self.settle_in(node, 0, &mut path, wait) {
                return Some(step);
            }
            self.top += 1;
            self.frames.clear();
            self.leaf_ticks = 0;
        }
        None
    }

    fn settle_in(
        &mut self,
        node: &Command,
        depth: usize,
        path: &mut Vec<usize>,
        wait: &WaitRule,
    ) -> Option<Step> {
        if node.is_disabled() {
            return None;
        }
        match node {
            Command::Leaf(base) => {
                let is_wait = base.name == wait.command;
                let needed = if is_wait {
                    wait_ticks(&base.args, wait.ticks_per_second)
                } else {
                    1
                };
                (self.leaf_ticks < needed).then(|| Step {
                    path: path.clone(),
                    command: CommandBase::new(base.name.clone(), base.args.clone()),
                    wait: is_wait,
                })
            }
            Command::Loop(repeat) => {
                if self.frames.len() <= depth {
                    if !node.has_ticks(wait.command, wait.ticks_per_second) {
                        return None;
                    }
                    self.frames.truncate(depth);
                    self.frames.push(LoopFrame::default());
                }
                loop {
                    let frame = self.frames[depth];
                    if frame.repetition >= repeat.repeat_count() {
                        return None;
                    }
                    match repeat.children().get(frame.child) {
                        Some(child) => {
                            path.push(frame.child);
                            let found = self.settle_in(child, depth + 1, path, wait);
                            path.pop();
                            if found.is_some() {
                                return found;
                            }
                            self.frames.truncate(depth + 1);
                            self.frames[depth].child += 1;
                            self.leaf_ticks = 0;
                        }
                        None => {
                            self.frames[depth].child = 0;
                            self.frames[depth].repetition += 1;
                        }
                    }
                }
            }
        }
    }

    fn consume_tick(&mut self) {
        self.leaf_ticks += 1;
    }
}

pub struct ScriptExecutor {
    state: ExecutorState,
    policy: SyncPolicy,
    wait_command: String,
    cursor: Cursor,
    pending: Pending,
    since_dispatch: Option<f32>,
    active_top: Option<usize>,
    active_child: Option<Vec<usize>>,
    cleanup_pending: bool,
    run_flag: RunFlag,
    local: Box<dyn Avatar>,
    rival: Box<dyn Avatar>,
    transport: Box<dyn Transport>,
    viewer: Box<dyn Viewer>,
    log: RunLog,
}

impl ScriptExecutor {
    pub fn new(config: ExecutorConfig, collaborators: Collaborators) -> Self {
        Self::with_run_flag(config, collaborators, RunFlag::new())
    }

    /// Build an executor around an existing run flag, typically one already
    /// handed to the local avatar.
    pub fn with_run_flag(config: ExecutorConfig, collaborators: Collaborators, run_flag: RunFlag) -> Self {
        run_flag.clear();
        Self {
            state: ExecutorState::Idle,
            policy: SyncPolicy::new(config.mode, config.role, config.timings),
            wait_command: config.wait_command,
            cursor: Cursor::default(),
            pending: Pending::None,
            since_dispatch: None,
            active_top: None,
            active_child: None,
            cleanup_pending: false,
            run_flag,
            local: collaborators.local,
            rival: collaborators.rival,
            transport: collaborators.transport,
            viewer: collaborators.viewer,
            log: RunLog::new(config.role.name()),
        }
    }

    pub fn state(&self) -> ExecutorState {
        self.state
    }

    /// A run is in progress (possibly waiting for the peer).
    pub fn is_running(&self) -> bool {
        matches!(self.state, ExecutorState::Running | ExecutorState::WaitingForPeer)
    }

    pub fn run_flag(&self) -> RunFlag {
        self.run_flag.clone()
    }

    pub fn sync_state(&self) -> &SyncState {
        self.policy.state()
    }

    pub fn mode(&self) -> SyncMode {
        self.policy.mode()
    }

    pub fn role(&self) -> Role {
        self.policy.role()
    }

    pub fn events(&self) -> &VecDeque<RunEvent> {
        self.log.events()
    }

    pub fn take_events(&mut self) -> Vec<RunEvent> {
        self.log.take_events()
    }

    /// Start executing `script` from the top. Ignored (with a warning) while
    /// a run is in progress. Returns whether a run was started.
    pub fn run(&mut self, script: &mut Script) -> bool {
        if self.is_running() {
            self.log.record(RunEvent::RunRejected);
            return false;
        }
        self.log.begin_update();
        if self.cleanup_pending {
            self.cleanup(script);
        }
        self.policy.start();
        self.cursor = Cursor::default();
        self.pending = Pending::None;
        self.since_dispatch = None;
        script.clear_running_flags();
        self.state = ExecutorState::Running;
        self.run_flag.set();
        self.viewer.notify_run_state_changed(true);
        self.log.record(RunEvent::RunStarted {
            mode: self.policy.mode(),
            role: self.policy.role(),
            commands: script.len(),
        });
        self.advance(script);
        true
    }

    /// Ask the peer to start too, then start locally.
    pub fn request_run(&mut self, script: &mut Script) -> bool {
        if self.is_running() {
            self.log.record(RunEvent::RunRejected);
            return false;
        }
        self.send(PeerMessage::Run);
        self.run(script)
    }

    /// Advance the run by `dt` time units.
    pub fn update(&mut self, dt: f32, script: &mut Script) {
        if !self.is_running() {
            return;
        }
        self.log.begin_update();
        if !self.run_flag.is_set() {
            self.finish(script, ExecutorState::Interrupted);
            return;
        }
        if let Some(age) = self.since_dispatch.as_mut() {
            *age += dt;
        }
        match self.pending {
            Pending::Pacing(remaining) => {
                let remaining = remaining - dt;
                if remaining > TIME_EPSILON {
                    self.pending = Pending::Pacing(remaining);
                    return;
                }
                self.pending = Pending::Ready;
            }
            Pending::Peer => match self.policy.poll_block(dt) {
                BlockPoll::Blocked => return,
                BlockPoll::Released => {
                    self.pending = Pending::Ready;
                    self.state = ExecutorState::Running;
                }
                BlockPoll::TimedOut { held } => {
                    self.log.record(RunEvent::LockTimeout { held });
                    self.pending = Pending::Ready;
                    self.state = ExecutorState::Running;
                }
            },
            Pending::None | Pending::Ready => {}
        }
        self.advance(script);
    }

    /// Execute as many ticks as the policy allows right now.
    fn advance(&mut self, script: &mut Script) {
        loop {
            if !self.run_flag.is_set() {
                self.finish(script, ExecutorState::Interrupted);
                return;
            }
            let rule = WaitRule {
                command: &self.wait_command,
                ticks_per_second: self.policy.timings().ticks_per_second(),
            };
            let Some(step) = self.cursor.settle(script.commands(), &rule) else {
                self.finish(script, ExecutorState::Completed);
                return;
            };
            let kind = TickKind {
                lock: self.local.is_lock_command(&step.command.name),
                wait: step.wait,
            };
            if self.pending != Pending::Ready {
                let pre = self.policy.pre_tick(kind, self.since_dispatch);
                if pre.send_unlock {
                    self.send(PeerMessage::Unlock);
                    self.log.record(RunEvent::UnlockSent);
                }
                match pre.gate {
                    Gate::Block => {
                        self.pending = Pending::Peer;
                        self.state = ExecutorState::WaitingForPeer;
                        self.log.record(RunEvent::WaitingForPeer { index: step.path[0] });
                        return;
                    }
                    Gate::Proceed { delay } if delay > TIME_EPSILON => {
                        self.pending = Pending::Pacing(delay);
                        return;
                    }
                    Gate::Proceed { .. } => {}
                }
            }
            self.pending = Pending::None;

            self.highlight(script, &step.path);
            self.log.record(RunEvent::Tick {
                index: step.path[0],
                command: step.command.name.clone(),
                wait: step.wait,
            });
            if !step.wait {
                self.dispatch(&step.command, false);
            }
            if self.policy.post_tick(kind) {
                self.send(PeerMessage::Unlock);
                self.log.record(RunEvent::UnlockSent);
            }
            self.since_dispatch = Some(0.0);
            self.cursor.consume_tick();
            self.viewer.notify_step_changed(step.path[0]);
        }
    }

    /// Keep the running flag on the active top-level command and, inside a
    /// loop, on the active child.
    fn highlight(&mut self, script: &mut Script, path: &[usize]) {
        let top = path[0];
        if self.active_top != Some(top) {
            self.unhighlight(script);
            if let Some(command) = script.get_mut(&[top]) {
                command.set_running(true);
            }
            self.active_top = Some(top);
        }
        let child = (path.len() > 1).then(|| path.to_vec());
        if self.active_child != child {
            if let Some(old) = self.active_child.take() {
                if let Some(command) = script.get_mut(&old) {
                    command.set_running(false);
                }
            }
            if let Some(new) = &child {
                if let Some(command) = script.get_mut(new) {
                    command.set_running(true);
                }
            }
            self.active_child = child;
        }
    }

    fn unhighlight(&mut self, script: &mut Script) {
        if let Some(old) = self.active_child.take() {
            if let Some(command) = script.get_mut(&old) {
                command.set_running(false);
            }
        }
        if let Some(top) = self.active_top.take() {
            if let Some(command) = script.get_mut(&[top]) {
                command.set_running(false);
            }
        }
    }

    /// Route one primitive command to the avatars. Local commands go to the
    /// local avatar and are broadcast; remote ones go to the rival avatar
    /// and are never echoed. Static commands always reach both avatars.
    pub fn dispatch(&mut self, command: &CommandBase, from_remote: bool) -> bool {
        let name = command.name.as_str();
        let label = describe_command(command);
        let primary_dead = if from_remote {
            self.rival.is_dead()
        } else {
            self.local.is_dead()
        };
        if primary_dead {
            self.log.record(RunEvent::DeadAvatar {
                command: label,
                remote: from_remote,
            });
            return false;
        }

        let understood = if self.local.is_static_command(name) {
            let local = self.local.parse_command(name, &command.args);
            let rival = self.rival.parse_command(name, &command.args);
            local && rival
        } else if from_remote {
            self.rival.parse_command(name, &command.args)
        } else {
            self.local.parse_command(name, &command.args)
        };

        if understood {
            self.log.record(RunEvent::Dispatched {
                command: label,
                remote: from_remote,
            });
        } else {
            self.log.record(RunEvent::Unrecognized {
                command: label,
                remote: from_remote,
            });
        }

        if !from_remote {
            self.send(PeerMessage::Command(CommandBase::new(
                command.name.clone(),
                command.args.clone(),
            )));
        }
        understood
    }

    fn send(&mut self, message: PeerMessage) {
        self.transport.broadcast(&message);
    }

    /// The peer released our lock.
    pub fn on_peer_unlock(&mut self) {
        self.log.record(RunEvent::UnlockReceived);
        self.policy.on_peer_unlock();
    }

    /// The peer finished its run. Completes a deferred cleanup.
    pub fn on_peer_finished(&mut self, script: &mut Script) {
        self.log.record(RunEvent::PeerFinished);
        self.policy.on_peer_finished();
        if self.cleanup_pending {
            self.cleanup(script);
        }
    }

    /// Stop the current run at once. Cleanup still waits for the peer's
    /// FINISH unless it already arrived. No-op when no run is active.
    pub fn interrupt(&mut self, script: &mut Script) {
        if !self.is_running() {
            return;
        }
        self.finish(script, ExecutorState::Interrupted);
    }

    /// Abandon any run and return to idle immediately, without telling the
    /// peer. Safe to call repeatedly.
    pub fn reset_and_clear(&mut self, script: &mut Script) {
        self.run_flag.clear();
        self.log.record(RunEvent::Reset);
        self.cleanup(script);
    }

    fn finish(&mut self, script: &mut Script, outcome: ExecutorState) {
        self.unhighlight(script);
        self.run_flag.clear();
        self.pending = Pending::None;
        self.policy.stop();
        self.state = outcome;
        self.log.record(if outcome == ExecutorState::Completed {
            RunEvent::Completed
        } else {
            RunEvent::Interrupted
        });
        self.send(PeerMessage::Finish);
        self.log.record(RunEvent::FinishSent);

        if self.policy.remote_finished() {
            self.cleanup(script);
        } else {
            self.cleanup_pending = true;
            self.log.record(RunEvent::CleanupDeferred);
        }
    }

    fn cleanup(&mut self, script: &mut Script) {
        self.unhighlight(script);
        script.clear_running_flags();
        self.cursor = Cursor::default();
        self.pending = Pending::None;
        self.since_dispatch = None;
        self.cleanup_pending = false;
        self.policy.reset();
        self.state = ExecutorState::Idle;
        self.viewer.notify_run_state_changed(false);
        self.log.record(RunEvent::Cleanup);
    }
}

fn describe_command(command: &CommandBase) -> String {
    if command.args.is_empty() {
        command.name.clone()
    } else {
        format!("{}({})", command.name, command.args.join(","))
    }
}
