mod common;

use anyhow::anyhow;
use common::named_entries;
use invite_merge::engine::{BatchDriver, Stage, StageOutcome};
use invite_merge::model::{BatchEvent, Entry, Mode, TrackingRecord};
use invite_merge::tracking::TrackingStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

fn driver() -> (
    BatchDriver,
    mpsc::UnboundedReceiver<BatchEvent>,
    Arc<AtomicBool>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = Arc::new(AtomicBool::new(false));
    (BatchDriver::new(Mode::Generate, tx, cancel.clone()), rx, cancel)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<BatchEvent>) -> Vec<BatchEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}

#[test]
fn one_failure_does_not_stop_the_batch() {
    let temp = tempfile::tempdir().expect("failed creating tempdir");
    let mut store = TrackingStore::load(temp.path().join("tracking.json"));
    let items = named_entries(&["Anna", "Ben", "Cara", "Dan"]);
    let (driver, mut rx, _) = driver();

    let report = driver.run(&items, &mut store, |e| {
        if e.id == "Cara" {
            Err(anyhow!("soffice exited with status 1"))
        } else {
            Ok(TrackingRecord::output(format!("out/{}.png", e.key)))
        }
    });

    assert_eq!(report.succeeded, 3);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failures[0].id, "Cara");
    assert!(!report.cancelled);
    assert!(!store.was_processed("Cara"));

    let reloaded = TrackingStore::load(temp.path().join("tracking.json"));
    assert_eq!(reloaded.len(), 3);
    assert!(reloaded.was_processed("Dan"));

    let events = drain(&mut rx);
    assert!(matches!(events.first(), Some(BatchEvent::BatchStarted { total: 4, .. })));
    assert!(matches!(events.last(), Some(BatchEvent::BatchFinished { .. })));
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, BatchEvent::ItemFailed { .. }))
            .count(),
        1
    );
}

#[test]
fn second_run_skips_everything_already_tracked() {
    let temp = tempfile::tempdir().expect("failed creating tempdir");
    let path = temp.path().join("tracking.json");
    let items = named_entries(&["Anna", "Ben"]);
    let (driver, _rx, _) = driver();

    let mut store = TrackingStore::load(&path);
    driver.run(&items, &mut store, |e| Ok(TrackingRecord::output(e.id.clone())));

    let mut store = TrackingStore::load(&path);
    let mut calls = 0;
    let report = driver.run(&items, &mut store, |e| {
        calls += 1;
        Ok(TrackingRecord::output(e.id.clone()))
    });
    assert_eq!(calls, 0);
    assert_eq!(report.skipped, 2);
    assert_eq!(report.succeeded, 0);
}

#[test]
fn names_differing_only_by_periods_are_one_recipient() {
    let temp = tempfile::tempdir().expect("failed creating tempdir");
    let mut store = TrackingStore::load(temp.path().join("tracking.json"));
    let items = named_entries(&["Anna B. Lee", "Anna B Lee"]);
    assert_eq!(items[0].id, items[1].id);
    let (driver, _rx, _) = driver();

    let mut calls = 0;
    let report = driver.run(&items, &mut store, |_| {
        calls += 1;
        Ok(TrackingRecord::output("out/Invitation - Anna B Lee.png"))
    });
    assert_eq!(calls, 1);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(store.len(), 1);
}

#[test]
fn cancellation_stops_before_the_next_item() {
    let temp = tempfile::tempdir().expect("failed creating tempdir");
    let mut store = TrackingStore::load(temp.path().join("tracking.json"));
    let items = named_entries(&["Anna", "Ben", "Cara"]);
    let (driver, _rx, cancel) = driver();

    let report = driver.run(&items, &mut store, |e| {
        if e.id == "Anna" {
            cancel.store(true, Ordering::Relaxed);
        }
        Ok(TrackingRecord::output(e.id.clone()))
    });

    assert!(report.cancelled);
    assert_eq!(report.succeeded, 1);
    assert!(store.was_processed("Anna"));
    assert!(!store.was_processed("Ben"));
}

#[test]
fn pause_is_cut_short_by_cancellation() {
    let temp = tempfile::tempdir().expect("failed creating tempdir");
    let mut store = TrackingStore::load(temp.path().join("tracking.json"));
    let items = named_entries(&["Anna", "Ben"]);
    let (driver, _rx, cancel) = driver();
    let driver = driver.with_pause(Duration::from_secs(30));

    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(200));
        cancel.store(true, Ordering::Relaxed);
    });
    let started = Instant::now();
    let report = driver.run(&items, &mut store, |e| Ok(TrackingRecord::output(e.id.clone())));
    canceller.join().expect("canceller thread");

    assert!(report.cancelled);
    assert_eq!(report.succeeded, 1);
    assert!(!store.was_processed("Ben"));
    assert!(started.elapsed() < Duration::from_secs(10));
}

/// Fails the listed ids, records every id it sees.
struct ScriptedStage {
    name: &'static str,
    fail: Vec<&'static str>,
    seen: Vec<String>,
}

impl Stage for ScriptedStage {
    fn name(&self) -> &str {
        self.name
    }

    fn run(&mut self, items: &[&Entry], _cancel: &AtomicBool) -> Vec<StageOutcome> {
        items
            .iter()
            .map(|e| {
                self.seen.push(e.id.clone());
                if self.fail.contains(&e.id.as_str()) {
                    StageOutcome::Failed(anyhow!("boom"))
                } else {
                    StageOutcome::Done
                }
            })
            .collect()
    }
}

#[test]
fn staged_failure_drops_item_from_later_stages() {
    let temp = tempfile::tempdir().expect("failed creating tempdir");
    let mut store = TrackingStore::load(temp.path().join("tracking.json"));
    store
        .mark_processed("Dan", TrackingRecord::output("out/Dan.png"))
        .expect("seed tracking");
    let items = named_entries(&["Anna", "Ben", "Cara", "Dan"]);
    let (driver, _rx, _) = driver();

    let mut stages: Vec<Box<dyn Stage>> = vec![
        Box::new(ScriptedStage {
            name: "render",
            fail: vec!["Ben"],
            seen: Vec::new(),
        }),
        Box::new(ScriptedStage {
            name: "PDF conversion",
            fail: vec!["Cara"],
            seen: Vec::new(),
        }),
    ];
    let report = driver.run_staged(&items, &mut store, &mut stages, |e| {
        TrackingRecord::output(format!("out/{}.pdf", e.key))
    });

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 2);
    assert_eq!(report.skipped, 1);
    let failed: Vec<&str> = report.failures.iter().map(|f| f.id.as_str()).collect();
    assert_eq!(failed, vec!["Ben", "Cara"]);
    assert!(report.failures[1].error.starts_with("PDF conversion failed"));
    assert!(store.was_processed("Anna"));
    assert!(!store.was_processed("Ben"));
    assert!(!store.was_processed("Cara"));
}

/// Completes the first `finish` items, then raises the cancel flag and leaves
/// the rest untouched, the way the real stages check the flag between items.
struct CancellingStage {
    name: &'static str,
    finish: usize,
    cancel: Arc<AtomicBool>,
    seen: Arc<std::sync::Mutex<Vec<String>>>,
}

impl Stage for CancellingStage {
    fn name(&self) -> &str {
        self.name
    }

    fn run(&mut self, items: &[&Entry], cancel: &AtomicBool) -> Vec<StageOutcome> {
        items
            .iter()
            .enumerate()
            .map(|(i, e)| {
                if cancel.load(Ordering::Relaxed) {
                    return StageOutcome::NotRun;
                }
                self.seen.lock().expect("seen lock").push(e.id.clone());
                if i + 1 == self.finish {
                    self.cancel.store(true, Ordering::Relaxed);
                }
                StageOutcome::Done
            })
            .collect()
    }
}

#[test]
fn staged_cancel_in_last_stage_tracks_finished_items() {
    let temp = tempfile::tempdir().expect("failed creating tempdir");
    let mut store = TrackingStore::load(temp.path().join("tracking.json"));
    let items = named_entries(&["Anna", "Ben", "Cara", "Dan"]);
    let (driver, _rx, cancel) = driver();
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

    let mut stages: Vec<Box<dyn Stage>> = vec![
        Box::new(ScriptedStage {
            name: "render",
            fail: vec![],
            seen: Vec::new(),
        }),
        Box::new(CancellingStage {
            name: "PNG conversion",
            finish: 2,
            cancel,
            seen: seen.clone(),
        }),
    ];
    let report = driver.run_staged(&items, &mut store, &mut stages, |e| {
        TrackingRecord::output(format!("out/{}.png", e.key))
    });

    assert!(report.cancelled);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(*seen.lock().expect("seen lock"), vec!["Anna", "Ben"]);
    assert!(store.was_processed("Anna"));
    assert!(store.was_processed("Ben"));
    assert!(!store.was_processed("Cara"));
    assert!(!store.was_processed("Dan"));
}

#[test]
fn staged_cancel_between_stages_tracks_nothing() {
    let temp = tempfile::tempdir().expect("failed creating tempdir");
    let mut store = TrackingStore::load(temp.path().join("tracking.json"));
    let items = named_entries(&["Anna", "Ben"]);
    let (driver, mut rx, cancel) = driver();
    let seen_last = Arc::new(std::sync::Mutex::new(Vec::new()));

    let mut stages: Vec<Box<dyn Stage>> = vec![
        Box::new(CancellingStage {
            name: "render",
            finish: 2,
            cancel: cancel.clone(),
            seen: Arc::new(std::sync::Mutex::new(Vec::new())),
        }),
        Box::new(CancellingStage {
            name: "PDF conversion",
            finish: usize::MAX,
            cancel,
            seen: seen_last.clone(),
        }),
    ];
    let report = driver.run_staged(&items, &mut store, &mut stages, |e| {
        TrackingRecord::output(format!("out/{}.pdf", e.key))
    });

    assert!(report.cancelled);
    assert_eq!(report.succeeded, 0);
    assert!(seen_last.lock().expect("seen lock").is_empty());
    assert!(store.is_empty());
    let stages_started = drain(&mut rx)
        .iter()
        .filter(|e| matches!(e, BatchEvent::StageStarted { .. }))
        .count();
    assert_eq!(stages_started, 1);
}
