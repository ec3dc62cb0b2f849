use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::param::ResultRecord;
use crate::settings::SweepConfig;

/// Receives status text produced while blocks execute. Must not block.
pub trait LogSink: Debug + Send + Sync {
    fn log(&self, text: &str);
}

/// Receives the displayable results of a block after each completed iteration.
pub trait PanelSink: Debug + Send + Sync {
    fn publish(&self, panel_id: &str, iteration: usize, rows: &[ResultRecord]);
}

/// Forwards status text to `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogSink;

#[derive(Clone, Copy, Debug, Default)]
pub struct NullPanelSink;

/// Keeps every line in memory.
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    lines: Mutex<Vec<String>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PanelUpdate {
    pub panel_id: String,
    pub iteration: usize,
    pub rows: Vec<ResultRecord>,
}

#[derive(Debug, Default)]
pub struct MemoryPanelSink {
    updates: Mutex<Vec<PanelUpdate>>,
}

/// Shared flag checked by the iteration controller between iterations.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

/// Everything a sweep needs besides the graph, created once per sweep.
#[derive(Clone, Debug)]
pub struct SimulationContext {
    pub config: SweepConfig,
    pub log: Arc<dyn LogSink>,
    pub panel: Arc<dyn PanelSink>,
    pub cancel: CancelToken,
}

impl LogSink for TracingLogSink {
    fn log(&self, text: &str) {
        info!(target: "commsim::block", "{text}");
    }
}

impl PanelSink for NullPanelSink {
    fn publish(&self, _panel_id: &str, _iteration: usize, _rows: &[ResultRecord]) {}
}

impl LogSink for MemoryLogSink {
    fn log(&self, text: &str) {
        self.lines.lock().push(text.to_string());
    }
}

impl MemoryLogSink {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

impl PanelSink for MemoryPanelSink {
    fn publish(&self, panel_id: &str, iteration: usize, rows: &[ResultRecord]) {
        self.updates.lock().push(PanelUpdate {
            panel_id: panel_id.to_string(),
            iteration,
            rows: rows.to_vec(),
        });
    }
}

impl MemoryPanelSink {
    pub fn updates(&self) -> Vec<PanelUpdate> {
        self.updates.lock().clone()
    }
}

impl CancelToken {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// `true` when both handles control the same flag.
    pub fn same(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.cancelled, &other.cancelled)
    }
}

impl Default for SimulationContext {
    fn default() -> Self {
        SimulationContext::new(SweepConfig::default())
    }
}

impl SimulationContext {
    pub fn new(config: SweepConfig) -> Self {
        SimulationContext {
            config,
            log: Arc::new(TracingLogSink),
            panel: Arc::new(NullPanelSink),
            cancel: CancelToken::default(),
        }
    }

    pub fn with_log(mut self, log: Arc<dyn LogSink>) -> Self {
        self.log = log;
        self
    }

    pub fn with_panel(mut self, panel: Arc<dyn PanelSink>) -> Self {
        self.panel = panel;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}
