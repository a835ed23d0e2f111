//! Headless paired simulation.
//!
//! Runs a master and a slave session against each other over an in-memory
//! transport, stepping both with a fixed time step. Nothing is rendered;
//! the result carries each device's timed events and final avatar state.

use std::cell::RefCell;
use std::rc::Rc;

use crate::avatar::{Avatar, GridAvatar, GridCell};
use crate::executor::{Collaborators, ExecutorConfig, ExecutorState, RunFlag, ScriptExecutor};
use crate::run_log::RunEvent;
use crate::script_diagnostics::SkippedLine;
use crate::session::Session;
use crate::sync_policy::{Role, SyncMode, SyncTimings};
use crate::transport::LoopbackTransport;
use crate::viewer::LogViewer;
use crate::vocabulary::CommandVocabulary;

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub mode: SyncMode,
    pub timings: SyncTimings,
    pub vocabulary: CommandVocabulary,
    pub grid_size: i32,
    pub traps: Vec<GridCell>,
    /// Give up after this much simulated time.
    pub max_time: f32,
    /// Time step between updates.
    pub time_step: f32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            mode: SyncMode::StepSwitching,
            timings: SyncTimings::default(),
            vocabulary: CommandVocabulary::default(),
            grid_size: 6,
            traps: Vec::new(),
            max_time: 300.0,
            time_step: 0.1,
        }
    }
}

impl SimulationConfig {
    pub fn with_mode(mode: SyncMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }
}

/// A run event stamped with simulated time.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedEvent {
    pub time: f32,
    pub event: RunEvent,
}

/// What one device did.
#[derive(Debug, Clone)]
pub struct DeviceReport {
    pub role: Role,
    pub events: Vec<TimedEvent>,
    pub skipped: Vec<SkippedLine>,
    pub final_state: ExecutorState,
    pub local_position: GridCell,
    pub rival_position: GridCell,
    pub local_dead: bool,
}

impl DeviceReport {
    /// Commands this device dispatched to its own avatar, in order.
    pub fn trace(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match &e.event {
                RunEvent::Dispatched { command, remote: false } => Some(command.clone()),
                _ => None,
            })
            .collect()
    }

    /// Simulated times of the executed ticks (commands and waits).
    pub fn tick_times(&self) -> Vec<f32> {
        self.events
            .iter()
            .filter(|e| matches!(e.event, RunEvent::Tick { .. }))
            .map(|e| e.time)
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&RunEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(&e.event)).count()
    }
}

#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub master: DeviceReport,
    pub slave: DeviceReport,
    /// Number of time steps executed.
    pub step_count: usize,
    /// Simulated time when both devices went idle (or the limit).
    pub elapsed: f32,
    /// Both devices finished and cleaned up before `max_time`.
    pub finished: bool,
}

struct Device {
    session: Session,
    inbox: LoopbackTransport,
    local: Rc<RefCell<GridAvatar>>,
    rival: Rc<RefCell<GridAvatar>>,
    events: Vec<TimedEvent>,
}

impl Device {
    fn new(role: Role, transport: LoopbackTransport, config: &SimulationConfig) -> Result<Self, String> {
        let flag = RunFlag::new();
        let local = Rc::new(RefCell::new(
            GridAvatar::local(config.vocabulary.clone(), config.grid_size)
                .with_traps(config.traps.iter().copied())
                .with_run_flag(flag.clone()),
        ));
        let rival = Rc::new(RefCell::new(
            GridAvatar::rival(config.vocabulary.clone(), config.grid_size)
                .with_traps(mirror_cells(&config.traps, config.grid_size)),
        ));
        let executor = ScriptExecutor::with_run_flag(
            ExecutorConfig {
                role,
                mode: config.mode,
                timings: config.timings.clone(),
                wait_command: config.vocabulary.wait_command.clone(),
            },
            Collaborators {
                local: Box::new(local.clone()),
                rival: Box::new(rival.clone()),
                transport: Box::new(transport.clone()),
                viewer: Box::new(LogViewer::new(role.name())),
            },
            flag,
        );
        Ok(Self {
            session: Session::new(config.vocabulary.clone(), executor)?,
            inbox: transport,
            local,
            rival,
            events: Vec::new(),
        })
    }

    fn deliver(&mut self) {
        for message in self.inbox.drain_inbound() {
            self.session.receive(message);
        }
    }

    fn collect(&mut self, time: f32) {
        self.events.extend(
            self.session
                .take_events()
                .into_iter()
                .map(|event| TimedEvent { time, event }),
        );
    }

    fn settled(&self) -> bool {
        self.session.is_idle() && self.inbox.pending_inbound() == 0
    }

    fn report(self) -> DeviceReport {
        let local = self.local.borrow();
        let rival = self.rival.borrow();
        DeviceReport {
            role: self.session.role(),
            skipped: self.session.skipped_lines().to_vec(),
            final_state: self.session.executor().state(),
            local_position: local.position(),
            rival_position: rival.position(),
            local_dead: local.is_dead(),
            events: self.events,
        }
    }
}

/// Trap cells as seen from the other side of the board.
fn mirror_cells(cells: &[GridCell], size: i32) -> Vec<GridCell> {
    cells.iter().map(|(x, z)| (size - 1 - x, size - 1 - z)).collect()
}

/// Run a master and a slave script against each other until both devices
/// are idle or `max_time` elapses.
///
/// The master requests the run, so the slave starts when the RUN signal
/// reaches it on the first step.
pub fn run_simulation(
    master_script: &str,
    slave_script: &str,
    config: SimulationConfig,
) -> Result<SimulationResult, String> {
    if config.max_time <= 0.0 {
        return Err("Max time must be positive".to_string());
    }
    if config.time_step <= 0.0 {
        return Err("Time step must be positive".to_string());
    }
    config.timings.validate()?;
    config.vocabulary.validate()?;

    let (master_end, slave_end) = LoopbackTransport::pair();
    let mut master = Device::new(Role::Master, master_end, &config)?;
    let mut slave = Device::new(Role::Slave, slave_end, &config)?;
    master.session.load_script_text(master_script);
    slave.session.load_script_text(slave_script);
    master.collect(0.0);
    slave.collect(0.0);

    if !master.session.request_run() {
        return Err("Master could not start a run".to_string());
    }
    master.collect(0.0);

    let max_steps = ((config.max_time / config.time_step).ceil() as usize).max(1);
    let dt = config.time_step;
    let mut step_count = 0;
    let mut finished = false;

    for step in 0..max_steps {
        let now = step as f32 * dt;
        master.deliver();
        slave.deliver();
        master.collect(now);
        slave.collect(now);
        if master.settled() && slave.settled() {
            finished = true;
            break;
        }

        let next = (step + 1) as f32 * dt;
        master.session.update(dt);
        slave.session.update(dt);
        master.collect(next);
        slave.collect(next);
        step_count += 1;
    }

    if !finished {
        log::warn!("Simulation stopped at max time {:.1} before both devices finished", config.max_time);
    }

    Ok(SimulationResult {
        master: master.report(),
        slave: slave.report(),
        step_count,
        elapsed: step_count as f32 * dt,
        finished,
    })
}
