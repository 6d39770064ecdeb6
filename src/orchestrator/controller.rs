//! Batch lifecycle controller.
//!
//! Owns start/cancel orchestration and the tracking store between batches;
//! emits events for presentation layers.

use super::post_process::process_batch_completion;
use crate::job::Job;
use crate::model::{BatchEvent, BatchReport, Entry, InfoEvent};
use crate::tracking::TrackingStore;
use anyhow::Result;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::Duration;

/// Commands emitted by UI layers to control batches.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    /// Run a batch over these tracking ids.
    Start { ids: Vec<String> },
    Cancel,
    Quit,
}

type BatchOutput = (Result<BatchReport>, TrackingStore);

/// Internal handle for a running batch.
struct RunCtx {
    cancel: Arc<AtomicBool>,
    handle: Option<tokio::task::JoinHandle<BatchOutput>>,
}

/// Entries whose id is in `ids`, in input order.
fn pick(entries: &[Entry], ids: &[String]) -> Vec<Entry> {
    let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
    entries
        .iter()
        .filter(|e| wanted.contains(e.id.as_str()))
        .cloned()
        .collect()
}

/// Spawn a batch on a blocking worker. The store travels with it and comes back with the report.
fn start_run(
    job: &Arc<Job>,
    items: Vec<Entry>,
    mut store: TrackingStore,
    event_tx: UnboundedSender<BatchEvent>,
) -> RunCtx {
    let cancel = Arc::new(AtomicBool::new(false));
    let driver = job.driver(event_tx, cancel.clone());
    let job = job.clone();
    let handle = tokio::task::spawn_blocking(move || {
        let report = job.execute(&driver, &items, &mut store);
        (report, store)
    });
    RunCtx {
        cancel,
        handle: Some(handle),
    }
}

/// Orchestrate batches based on UI commands and emit events back to presentation layers.
pub(crate) async fn run_controller(
    job: Arc<Job>,
    entries: Arc<Vec<Entry>>,
    store: TrackingStore,
    report_json: Option<PathBuf>,
    event_tx: UnboundedSender<BatchEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    let mut store = Some(store);
    let mut run_ctx: Option<RunCtx> = None;
    let mut quit_pending = false;
    // Cancel watchdog: an external program can keep the current item busy for a while.
    let mut cancel_deadline: Option<tokio::time::Instant> = None;
    let mut watchdog = tokio::time::interval(Duration::from_millis(500));

    let info = |msg: String| {
        let _ = event_tx.send(BatchEvent::Info(InfoEvent::Message(msg)));
    };

    let res = loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UiCommand::Start { ids }) => {
                        if run_ctx.is_some() {
                            info("A batch is already running.".into());
                            continue;
                        }
                        let items = pick(&entries, &ids);
                        if items.is_empty() {
                            info("Nothing selected.".into());
                            continue;
                        }
                        match store.take() {
                            Some(s) => {
                                run_ctx = Some(start_run(&job, items, s, event_tx.clone()));
                            }
                            None => info("Tracking store unavailable.".into()),
                        }
                    }
                    Some(UiCommand::Cancel) => {
                        if let Some(ctx) = &run_ctx {
                            ctx.cancel.store(true, Ordering::Relaxed);
                            let _ = event_tx.send(BatchEvent::Info(InfoEvent::Cancelling));
                            cancel_deadline = Some(tokio::time::Instant::now() + Duration::from_secs(3));
                        }
                    }
                    Some(UiCommand::Quit) | None => {
                        // Quit waits for the item in flight so its tracking record is written.
                        quit_pending = true;
                        match &run_ctx {
                            Some(ctx) => {
                                ctx.cancel.store(true, Ordering::Relaxed);
                                let _ = event_tx.send(BatchEvent::Info(InfoEvent::Cancelling));
                            }
                            None => break Ok(()),
                        }
                    }
                }
            }
            // Do not take the JoinHandle before this branch wins; otherwise it can be dropped
            // if another select branch is chosen, and we'll never observe completion.
            maybe_done = async {
                if let Some(ctx) = &mut run_ctx {
                    if let Some(h) = ctx.handle.as_mut() {
                        return Some(h.await);
                    }
                }
                futures::future::pending().await
            } => {
                if let Some(join_res) = maybe_done {
                    if let Some(ctx) = &mut run_ctx {
                        ctx.handle.take();
                    }
                    match join_res {
                        Ok((Ok(report), s)) => {
                            store = Some(s);
                            for msg in process_batch_completion(&report, report_json.as_deref()) {
                                info(msg);
                            }
                        }
                        Ok((Err(e), s)) => {
                            store = Some(s);
                            info(format!("Batch failed: {e:#}"));
                        }
                        Err(e) => {
                            // The worker panicked with the store; reread what it persisted.
                            store = Some(TrackingStore::load(&job.tracking_path));
                            info(format!("Batch worker failed: {e}"));
                        }
                    }
                    run_ctx = None;
                    cancel_deadline = None;
                    if quit_pending {
                        break Ok(());
                    }
                }
            }
            // If cancel stalls on a slow external program, keep the user informed.
            _ = watchdog.tick() => {
                if let Some(deadline) = cancel_deadline {
                    if tokio::time::Instant::now() >= deadline && run_ctx.is_some() {
                        info("Still cancelling… waiting for the current item to finish".into());
                        cancel_deadline = None;
                    }
                }
            }
        }
    };

    res
}
