//! Viewer capability: whatever displays the script and highlights the
//! active line. The executor only depends on this trait.

pub trait Viewer {
    /// The top-level command at `active_index` is executing.
    fn notify_step_changed(&mut self, active_index: usize);
    /// A run started (`true`) or was fully cleaned up (`false`).
    fn notify_run_state_changed(&mut self, running: bool);
}

/// Viewer that only writes to the log. Used by headless runs.
#[derive(Debug, Default)]
pub struct LogViewer {
    label: String,
}

impl LogViewer {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into() }
    }
}

impl Viewer for LogViewer {
    fn notify_step_changed(&mut self, active_index: usize) {
        log::debug!("[{}] active line L{}", self.label, active_index + 1);
    }

    fn notify_run_state_changed(&mut self, running: bool) {
        log::debug!("[{}] run affordance {}", self.label, if running { "disabled" } else { "enabled" });
    }
}
