use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use crate::codec::{load_script_file, RenderOptions, ScriptCodec};
use crate::config::SessionConfig;
use crate::data_log::{DataLogger, LogTag};
use crate::simulation::{run_simulation, DeviceReport, SimulationConfig};
use crate::sync_policy::{Role, SyncMode};
use crate::vocabulary::CommandVocabulary;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Async,
    Step,
    Cmd,
}

impl From<ModeArg> for SyncMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Async => SyncMode::Async,
            ModeArg::Step => SyncMode::StepSwitching,
            ModeArg::Cmd => SyncMode::CmdSwitching,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a script and report lines that would be dropped
    Check {
        /// Script text file
        #[arg(long)]
        script: PathBuf,
    },
    /// Run a master and a slave script against each other headlessly
    Simulate {
        /// Master script file
        #[arg(long, requires = "slave", conflicts_with = "config")]
        master: Option<PathBuf>,

        /// Slave script file
        #[arg(long, requires = "master")]
        slave: Option<PathBuf>,

        /// Session config JSON
        #[arg(long, requires = "stage")]
        config: Option<PathBuf>,

        /// Stage name within the config
        #[arg(long)]
        stage: Option<String>,

        /// Synchronization mode (defaults to the config's, else step)
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// Time step per update
        #[arg(long, default_value_t = 0.1)]
        dt: f32,

        /// Simulated time limit
        #[arg(long, default_value_t = 300.0)]
        max_time: f32,

        /// Append a tagged event log to this file
        #[arg(long)]
        log: Option<PathBuf>,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { script } => check(&script),
        Commands::Simulate {
            master,
            slave,
            config,
            stage,
            mode,
            dt,
            max_time,
            log,
        } => {
            let (master_text, slave_text, mut sim) = match (master, slave, config, stage) {
                (Some(master), Some(slave), None, _) => {
                    (read(&master)?, read(&slave)?, SimulationConfig::default())
                }
                (None, None, Some(config), Some(stage)) => load_stage_scripts(&config, &stage)?,
                _ => return Err(anyhow!("Pass either --master and --slave, or --config and --stage")),
            };
            if let Some(mode) = mode {
                sim.mode = mode.into();
            }
            sim.time_step = dt;
            sim.max_time = max_time;
            simulate(&master_text, &slave_text, sim, log.as_deref())
        }
    }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read script {:?}", path))
}

fn check(path: &Path) -> Result<()> {
    let codec = ScriptCodec::new(CommandVocabulary::default()).map_err(|e| anyhow!(e))?;
    let outcome = load_script_file(&codec, path).ok_or_else(|| anyhow!("Script file not found: {:?}", path))?;

    let rendered = codec.render(&outcome.script, RenderOptions::default());
    println!("{}", rendered.trim_end());
    if outcome.skipped.is_empty() {
        println!("OK: {} top-level commands, no skipped lines", outcome.script.len());
    } else {
        println!("{} skipped line(s):", outcome.skipped.len());
        for line in &outcome.skipped {
            println!("  {}", line);
        }
    }
    Ok(())
}

fn load_stage_scripts(config_path: &Path, stage_name: &str) -> Result<(String, String, SimulationConfig)> {
    let config = SessionConfig::from_file(config_path).map_err(|e| anyhow!(e))?;
    config.validate().map_err(|e| anyhow!(e))?;
    let stage = config
        .stage(stage_name)
        .ok_or_else(|| anyhow!("Stage {:?} not found in {:?}", stage_name, config_path))?;

    let script = |role: Role| -> Result<String> {
        match stage.script_for(role) {
            Some(path) => read(&config.resolve(path)),
            None => Ok(String::new()),
        }
    };
    let sim = SimulationConfig {
        mode: config.mode,
        timings: config.timings.clone(),
        vocabulary: config.vocabulary.clone(),
        grid_size: config.grid_size,
        traps: stage.trap_cells(),
        ..Default::default()
    };
    Ok((script(Role::Master)?, script(Role::Slave)?, sim))
}

fn simulate(master: &str, slave: &str, config: SimulationConfig, log_path: Option<&Path>) -> Result<()> {
    let mode = config.mode;
    let result = run_simulation(master, slave, config).map_err(|e| anyhow!(e))?;

    println!(
        "{} mode: {} after {:.2} ({} steps)",
        mode.name(),
        if result.finished { "finished" } else { "stopped" },
        result.elapsed,
        result.step_count
    );
    for device in [&result.master, &result.slave] {
        print_device(device);
    }

    if let Some(path) = log_path {
        let mut logger = DataLogger::create(path, "simulate").map_err(|e| anyhow!(e))?;
        logger
            .log(LogTag::System, &format!("Simulation in {} mode", mode.name()))
            .map_err(|e| anyhow!(e))?;
        for device in [&result.master, &result.slave] {
            for line in &device.skipped {
                logger
                    .log(LogTag::ScriptWarning, &format!("{} {}", device.role.name(), line))
                    .map_err(|e| anyhow!(e))?;
            }
            for timed in &device.events {
                logger.log_event(device.role.name(), &timed.event).map_err(|e| anyhow!(e))?;
            }
        }
        logger.flush().map_err(|e| anyhow!(e))?;
        println!("Event log appended to {:?}", path);
    }
    Ok(())
}

fn print_device(device: &DeviceReport) {
    println!("[{}] {:?}", device.role.name(), device.final_state);
    for line in &device.skipped {
        println!("  skipped {}", line);
    }
    for (i, command) in device.trace().iter().enumerate() {
        println!("  {:>3}. {}", i + 1, command);
    }
    println!(
        "  local at {:?}{}, rival at {:?}",
        device.local_position,
        if device.local_dead { " (dead)" } else { "" },
        device.rival_position
    );
}
