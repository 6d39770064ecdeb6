//! Batch driver: applies an action to each selected entry, one at a time,
//! with per-item failure isolation and cooperative cancellation.

pub mod generate;
pub mod send;

use crate::model::{BatchEvent, BatchReport, Entry, InfoEvent, Mode, TrackingRecord};
use crate::tracking::TrackingStore;
use anyhow::Result;
use std::collections::HashSet;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Result of one stage for one item.
#[derive(Debug)]
pub enum StageOutcome {
    Done,
    Failed(anyhow::Error),
    /// Not attempted because the batch was cancelled.
    NotRun,
}

/// One bulk step in staged mode, applied to every surviving item before the
/// next stage begins.
pub trait Stage: Send {
    fn name(&self) -> &str;
    /// Return exactly one outcome per item, in order.
    fn run(&mut self, items: &[&Entry], cancel: &AtomicBool) -> Vec<StageOutcome>;
}

pub struct BatchDriver {
    mode: Mode,
    event_tx: mpsc::UnboundedSender<BatchEvent>,
    cancel: Arc<AtomicBool>,
    pause: Duration,
}

impl BatchDriver {
    pub fn new(
        mode: Mode,
        event_tx: mpsc::UnboundedSender<BatchEvent>,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            mode,
            event_tx,
            cancel,
            pause: Duration::ZERO,
        }
    }

    /// Wait this long between items.
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub(crate) fn emit(&self, ev: BatchEvent) {
        let _ = self.event_tx.send(ev);
    }

    pub(crate) fn info(&self, info: InfoEvent) {
        self.emit(BatchEvent::Info(info));
    }

    /// Process `items` in order. Already-processed ids are skipped; a failing
    /// action is recorded and the batch moves on.
    pub fn run<F>(&self, items: &[Entry], store: &mut TrackingStore, mut action: F) -> BatchReport
    where
        F: FnMut(&Entry) -> Result<TrackingRecord>,
    {
        let start = Instant::now();
        let total = items.len();
        let mut report = BatchReport::new(self.mode);
        self.emit(BatchEvent::BatchStarted {
            mode: self.mode,
            total,
        });

        let mut ran_any = false;
        for (index, entry) in items.iter().enumerate() {
            if self.is_cancelled() {
                report.cancelled = true;
                break;
            }

            if store.was_processed(&entry.id) {
                report.skipped += 1;
                self.emit(BatchEvent::ItemSkipped {
                    id: entry.id.clone(),
                });
                continue;
            }

            if ran_any && !self.pause.is_zero() && !self.sleep_unless_cancelled() {
                report.cancelled = true;
                break;
            }
            ran_any = true;

            self.emit(BatchEvent::ItemStarted {
                index,
                total,
                id: entry.id.clone(),
            });
            match action(entry) {
                Ok(record) => self.complete(store, entry, record, &mut report),
                Err(e) => {
                    let error = format!("{e:#}");
                    log::debug!("[{}] failed: {error}", entry.id);
                    report.record_failure(&entry.id, error.clone());
                    self.emit(BatchEvent::ItemFailed {
                        id: entry.id.clone(),
                        error,
                    });
                }
            }
        }

        self.finish(report, start)
    }

    /// Bulk-stage mode: every pending item passes stage N before any item
    /// enters stage N+1. Items surviving all stages are marked processed with
    /// the record `record_for` builds; on cancellation, items that did not
    /// reach the end of the last stage stay untracked.
    pub fn run_staged<R>(
        &self,
        items: &[Entry],
        store: &mut TrackingStore,
        stages: &mut [Box<dyn Stage>],
        record_for: R,
    ) -> BatchReport
    where
        R: Fn(&Entry) -> TrackingRecord,
    {
        let start = Instant::now();
        let mut report = BatchReport::new(self.mode);
        self.emit(BatchEvent::BatchStarted {
            mode: self.mode,
            total: items.len(),
        });

        let mut seen = HashSet::new();
        let mut pending: Vec<&Entry> = Vec::new();
        for entry in items {
            if store.was_processed(&entry.id) || !seen.insert(entry.id.as_str()) {
                report.skipped += 1;
                self.emit(BatchEvent::ItemSkipped {
                    id: entry.id.clone(),
                });
            } else {
                pending.push(entry);
            }
        }

        let last_stage = stages.len();
        let mut stages_run = 0;
        for stage in stages.iter_mut() {
            if pending.is_empty() {
                break;
            }
            if self.is_cancelled() {
                report.cancelled = true;
                break;
            }
            self.emit(BatchEvent::StageStarted {
                stage: stage.name().to_string(),
                items: pending.len(),
            });

            let outcomes = stage.run(&pending, &self.cancel);
            let mut survivors = Vec::with_capacity(pending.len());
            for (i, entry) in pending.iter().enumerate() {
                match outcomes.get(i) {
                    Some(StageOutcome::Done) => survivors.push(*entry),
                    Some(StageOutcome::NotRun) => report.cancelled = true,
                    Some(StageOutcome::Failed(e)) => {
                        let error = format!("{} failed: {e:#}", stage.name());
                        report.record_failure(&entry.id, error.clone());
                        self.emit(BatchEvent::ItemFailed {
                            id: entry.id.clone(),
                            error,
                        });
                    }
                    None => {
                        let error = format!("{} returned no result", stage.name());
                        report.record_failure(&entry.id, error.clone());
                        self.emit(BatchEvent::ItemFailed {
                            id: entry.id.clone(),
                            error,
                        });
                    }
                }
            }
            pending = survivors;
            stages_run += 1;
            if report.cancelled {
                break;
            }
        }

        // Items that finished the last stage are tracked even when others were cut off.
        if stages_run == last_stage {
            for entry in pending {
                self.complete(store, entry, record_for(entry), &mut report);
            }
        }

        self.finish(report, start)
    }

    fn complete(
        &self,
        store: &mut TrackingStore,
        entry: &Entry,
        record: TrackingRecord,
        report: &mut BatchReport,
    ) {
        let destination = record.destination().to_string();
        if let Err(e) = store.mark_processed(entry.id.clone(), record) {
            log::warn!("tracking update for {} failed: {e}", entry.id);
            self.info(InfoEvent::TrackingWriteFailed {
                path: store.path().to_path_buf(),
                error: e.to_string(),
            });
        }
        report.succeeded += 1;
        self.emit(BatchEvent::ItemSucceeded {
            id: entry.id.clone(),
            destination,
        });
    }

    fn finish(&self, mut report: BatchReport, start: Instant) -> BatchReport {
        report.elapsed = start.elapsed();
        self.emit(BatchEvent::BatchFinished {
            report: Box::new(report.clone()),
        });
        report
    }

    /// Sleep for the configured pause; returns false if cancelled meanwhile.
    fn sleep_unless_cancelled(&self) -> bool {
        let deadline = Instant::now() + self.pause;
        while Instant::now() < deadline {
            if self.is_cancelled() {
                return false;
            }
            let left = deadline.saturating_duration_since(Instant::now());
            std::thread::sleep(left.min(Duration::from_millis(50)));
        }
        !self.is_cancelled()
    }
}
