use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::context::{CancelToken, SimulationContext};
use crate::graph::Graph;
use crate::simulation::{run_simulation, Result};
use crate::sweep::SweepReport;
use crate::transform::TransformLib;

#[derive(Debug)]
pub enum WorkerMessage {
    Exit,
    Run {
        graph: Graph,
        lib: TransformLib,
        ctx: SimulationContext,
    },
}

/// A finished sweep, with the graph as the sweep left it.
#[derive(Debug)]
pub struct SweepOutcome {
    pub graph: Graph,
    pub report: SweepReport,
}

/// Runs sweeps one at a time on the tokio blocking pool.
///
/// Queued runs collapse into the most recent one. The callback receives every finished run.
#[derive(Debug)]
pub struct SweepWorker {
    thread_handle: Option<JoinHandle<()>>,
    tx: UnboundedSender<WorkerMessage>,
    // queued and running sweeps
    pending: Arc<Mutex<Vec<CancelToken>>>,
}

impl SweepWorker {
    pub fn new<Callback>(callback: Callback) -> Self
    where
        Callback: Fn(Result<SweepOutcome>) + Send + 'static,
    {
        let (tx, rx) = unbounded_channel::<WorkerMessage>();
        let pending: Arc<Mutex<Vec<CancelToken>>> = Arc::default();
        let thread_handle: JoinHandle<()> = tokio::spawn({
            let pending = pending.clone();
            async move {
                worker_loop(rx, pending, callback).await;
            }
        });

        Self {
            thread_handle: Some(thread_handle),
            tx,
            pending,
        }
    }

    pub fn send(&self, msg: WorkerMessage) {
        if let WorkerMessage::Run { ctx, .. } = &msg {
            self.pending.lock().push(ctx.cancel.clone());
        }
        if self.tx.send(msg).is_err() {
            error!("Sweep worker is no longer running");
        }
    }

    pub fn run(&self, graph: Graph, lib: TransformLib, ctx: SimulationContext) {
        self.send(WorkerMessage::Run { graph, lib, ctx });
    }

    /// Stops the running sweep after its current iteration. Queued sweeps finish without running
    /// any iteration.
    pub fn cancel(&self) {
        for cancel in self.pending.lock().iter() {
            cancel.cancel();
        }
    }

    pub async fn exit(&mut self) {
        self.cancel();
        self.send(WorkerMessage::Exit);

        if let Some(thread_handle) = self.thread_handle.take() {
            if let Err(err) = thread_handle.await {
                error!(%err, "Sweep worker failed to join");
            }
        }
    }
}

impl Drop for SweepWorker {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            error!("SweepWorker dropped while still running; call SweepWorker::exit() first");
        }
    }
}

/// Runs a single sweep on the blocking pool and waits for it, without a long-lived worker.
pub async fn run_blocking(
    mut graph: Graph,
    lib: TransformLib,
    ctx: SimulationContext,
) -> anyhow::Result<SweepOutcome> {
    let outcome = tokio::task::spawn_blocking(move || {
        run_simulation(&mut graph, &lib, &ctx).map(|report| SweepOutcome { graph, report })
    })
    .await??;

    Ok(outcome)
}

async fn worker_loop<Callback>(
    mut rx: UnboundedReceiver<WorkerMessage>,
    pending: Arc<Mutex<Vec<CancelToken>>>,
    callback: Callback,
) where
    Callback: Fn(Result<SweepOutcome>) + Send + 'static,
{
    let mut msgs: VecDeque<WorkerMessage> = VecDeque::default();

    'worker: loop {
        let Some(msg) = rx.recv().await else { break };
        msgs.push_back(msg);

        loop {
            match rx.try_recv() {
                Ok(msg) => msgs.push_back(msg),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break 'worker,
            }
        }

        let mut next_run: Option<(Graph, TransformLib, SimulationContext)> = None;
        while let Some(msg) = msgs.pop_front() {
            match msg {
                WorkerMessage::Exit => break 'worker,
                WorkerMessage::Run { graph, lib, ctx } => {
                    if let Some((_, _, superseded)) = next_run.replace((graph, lib, ctx)) {
                        debug!("Dropping superseded sweep request");
                        release(&pending, &superseded.cancel);
                    }
                }
            }
        }

        let Some((mut graph, lib, ctx)) = next_run else {
            continue;
        };

        let cancel = ctx.cancel.clone();
        let joined = tokio::task::spawn_blocking(move || {
            run_simulation(&mut graph, &lib, &ctx).map(|report| SweepOutcome { graph, report })
        })
        .await;
        release(&pending, &cancel);

        match joined {
            Ok(result) => callback(result),
            Err(err) => error!(%err, "Sweep task panicked"),
        }
    }
}

fn release(pending: &Mutex<Vec<CancelToken>>, cancel: &CancelToken) {
    pending.lock().retain(|token| !token.same(cancel));
}
