//! Per-device session: the script store, the codec and the executor, plus
//! routing of inbound peer messages.

use std::path::Path;

use rand::Rng;

use crate::codec::{load_script_file, ParseOutcome, RenderOptions, ScriptCodec};
use crate::config::StageConfig;
use crate::executor::{ExecutorState, ScriptExecutor};
use crate::run_log::RunEvent;
use crate::script::{Script, ScriptStore};
use crate::script_diagnostics::SkippedLine;
use crate::sync_policy::Role;
use crate::transport::PeerMessage;
use crate::vocabulary::CommandVocabulary;

pub struct Session {
    codec: ScriptCodec,
    store: ScriptStore,
    executor: ScriptExecutor,
    stage: Option<String>,
    skipped: Vec<SkippedLine>,
    // Stand-in while no script is loaded, so peer signals are still handled.
    idle_script: Script,
}

impl Session {
    pub fn new(vocabulary: CommandVocabulary, executor: ScriptExecutor) -> Result<Self, String> {
        Ok(Self {
            codec: ScriptCodec::new(vocabulary)?,
            store: ScriptStore::new(),
            executor,
            stage: None,
            skipped: Vec::new(),
            idle_script: Script::default(),
        })
    }

    pub fn role(&self) -> Role {
        self.executor.role()
    }

    pub fn codec(&self) -> &ScriptCodec {
        &self.codec
    }

    pub fn store(&self) -> &ScriptStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ScriptStore {
        &mut self.store
    }

    pub fn executor(&self) -> &ScriptExecutor {
        &self.executor
    }

    pub fn stage(&self) -> Option<&str> {
        self.stage.as_deref()
    }

    /// Lines dropped by the most recent load.
    pub fn skipped_lines(&self) -> &[SkippedLine] {
        &self.skipped
    }

    pub fn take_events(&mut self) -> Vec<RunEvent> {
        self.executor.take_events()
    }

    fn parts(&mut self) -> (&mut ScriptExecutor, &mut Script) {
        let script = match self.store.working_mut() {
            Some(script) => script,
            None => &mut self.idle_script,
        };
        (&mut self.executor, script)
    }

    fn install(&mut self, outcome: ParseOutcome) -> usize {
        for line in &outcome.skipped {
            log::warn!("[{}] Skipped {}", self.role().name(), line);
        }
        self.skipped = outcome.skipped;
        self.store.load(outcome.script);
        self.skipped.len()
    }

    /// Parse and load a script from text. Returns the number of skipped
    /// lines.
    pub fn load_script_text(&mut self, text: &str) -> usize {
        self.reset_and_clear();
        let outcome = self.codec.parse_text(text);
        self.install(outcome)
    }

    /// Load this role's script for `stage` and return the number of skipped
    /// lines. A stage without a script for the role leaves the session empty.
    /// A missing script file also leaves it empty and returns `None`.
    pub fn load_stage(&mut self, stage: &StageConfig, base_dir: &Path) -> Option<usize> {
        self.reset_and_clear();
        self.stage = Some(stage.name.clone());
        self.skipped.clear();
        let Some(relative) = stage.script_for(self.role()) else {
            log::info!("Stage {} has no {} script", stage.name, self.role().name());
            self.store.unload();
            return Some(0);
        };
        let path = if relative.is_absolute() {
            relative.to_path_buf()
        } else {
            base_dir.join(relative)
        };
        let Some(outcome) = load_script_file(&self.codec, &path) else {
            log::warn!("Stage {}: script {:?} not found, nothing loaded", stage.name, path);
            self.store.unload();
            return None;
        };
        log::info!("Stage {}: loaded {:?}", stage.name, path);
        Some(self.install(outcome))
    }

    pub fn render(&self, options: RenderOptions) -> String {
        self.store
            .working()
            .map(|script| self.codec.render(script, options))
            .unwrap_or_default()
    }

    /// Start a synchronized run: tell the peer, then run locally.
    pub fn request_run(&mut self) -> bool {
        let Some(script) = self.store.working_mut() else {
            log::warn!("[{}] Run requested with no script loaded", self.role().name());
            return false;
        };
        self.executor.request_run(script)
    }

    /// Route one message from the peer.
    pub fn receive(&mut self, message: PeerMessage) {
        match message {
            PeerMessage::Command(command) => {
                self.executor.dispatch(&command, true);
            }
            PeerMessage::Unlock => self.executor.on_peer_unlock(),
            PeerMessage::Finish => {
                let (executor, script) = self.parts();
                executor.on_peer_finished(script);
            }
            PeerMessage::Run => match self.store.working_mut() {
                Some(script) => {
                    self.executor.run(script);
                }
                None => log::warn!("[{}] Peer started a run but no script is loaded", self.role().name()),
            },
        }
    }

    pub fn update(&mut self, dt: f32) {
        if let Some(script) = self.store.working_mut() {
            self.executor.update(dt, script);
        }
    }

    pub fn interrupt(&mut self) {
        let (executor, script) = self.parts();
        executor.interrupt(script);
    }

    pub fn reset_and_clear(&mut self) {
        let (executor, script) = self.parts();
        executor.reset_and_clear(script);
    }

    /// Re-roll direction arguments of the working script. The reference
    /// copy is untouched. Returns the number of arguments rerolled.
    pub fn randomize<R: Rng + ?Sized>(&mut self, rng: &mut R) -> usize {
        self.reset_and_clear();
        self.store.randomize(self.codec.vocabulary(), rng)
    }

    /// Discard edits and randomization, back to the script as loaded.
    pub fn restore_reference(&mut self) {
        self.reset_and_clear();
        self.store.restore_reference();
    }

    pub fn is_running(&self) -> bool {
        self.executor.is_running()
    }

    pub fn is_idle(&self) -> bool {
        self.executor.state() == ExecutorState::Idle
    }
}
