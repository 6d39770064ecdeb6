use crate::destination::is_valid_destination;
use crate::model::{BatchEvent, BatchReport, Entry, Mode};
use crate::selection::SelectionController;
use ratatui::style::Color;
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::Arc;

const MAX_LOG_LINES: usize = 500;

#[derive(Debug, Clone, Default)]
pub struct Progress {
    pub done: usize,
    pub total: usize,
    pub current: String,
    pub stage: Option<String>,
}

pub struct UiState {
    pub mode: Mode,
    pub tab: usize,
    pub title: String,
    pub info: String,

    pub entries: Arc<Vec<Entry>>,
    pub selection: SelectionController,
    // Snapshot of processed ids; the store itself lives with the controller.
    pub processed: HashSet<String>,
    pub failed: HashMap<String, String>,

    pub cursor: usize,
    pub page_size: usize,

    pub running: bool,
    pub progress: Option<Progress>,
    pub last_report: Option<BatchReport>,
    pub log: Vec<String>,
}

impl UiState {
    pub fn new(
        mode: Mode,
        title: String,
        entries: Arc<Vec<Entry>>,
        selection: SelectionController,
        processed: HashSet<String>,
    ) -> Self {
        Self {
            mode,
            tab: 0,
            title,
            info: String::new(),
            entries,
            selection,
            processed,
            failed: HashMap::new(),
            cursor: 0,
            page_size: 20,
            running: false,
            progress: None,
            last_report: None,
            log: Vec::new(),
        }
    }

    pub fn page(&self) -> usize {
        self.cursor / self.page_size.max(1)
    }

    pub fn page_count(&self) -> usize {
        self.entries.len().div_ceil(self.page_size.max(1)).max(1)
    }

    /// Entry indices shown on the current page.
    pub fn visible_range(&self) -> Range<usize> {
        let size = self.page_size.max(1);
        let start = self.page() * size;
        start.min(self.entries.len())..(start + size).min(self.entries.len())
    }

    pub fn move_cursor(&mut self, delta: isize) {
        if self.entries.is_empty() {
            return;
        }
        let last = self.entries.len() - 1;
        self.cursor = self.cursor.saturating_add_signed(delta).min(last);
    }

    pub fn next_page(&mut self) {
        self.move_cursor(self.page_size.max(1) as isize);
    }

    pub fn prev_page(&mut self) {
        self.move_cursor(-(self.page_size.max(1) as isize));
    }

    pub fn current(&self) -> Option<&Entry> {
        self.entries.get(self.cursor)
    }

    pub fn toggle_current(&mut self) {
        if let Some(id) = self.current().map(|e| e.id.clone()) {
            self.selection.toggle(&id);
        }
    }

    pub fn select_all(&mut self) {
        self.selection.select_all(&self.entries);
        self.info = format!("Selected {}", self.selection.selected_count());
    }

    pub fn select_none(&mut self) {
        self.selection.select_none();
        self.info = "Selection cleared".into();
    }

    pub fn select_unprocessed(&mut self) {
        self.selection
            .select_unprocessed(&self.entries, &self.processed);
        self.info = format!("Selected {} not yet {}", self.selection.selected_count(), self.mode.verb());
    }

    pub fn selected_ids(&self) -> Vec<String> {
        self.selection.selected_ids(&self.entries)
    }

    pub fn push_log(&mut self, line: String) {
        self.log.push(line);
        if self.log.len() > MAX_LOG_LINES {
            let excess = self.log.len() - MAX_LOG_LINES;
            self.log.drain(..excess);
        }
    }

    /// Status label and color for one row.
    pub fn status_of(&self, e: &Entry) -> (String, Color) {
        if self.processed.contains(&e.id) {
            return (self.mode.verb().to_string(), Color::Green);
        }
        if let Some(err) = self.failed.get(&e.id) {
            return (format!("failed: {err}"), Color::Red);
        }
        if self.mode == Mode::Send
            && !e.destination.as_deref().map(is_valid_destination).unwrap_or(false)
        {
            return ("invalid address".to_string(), Color::Yellow);
        }
        ("pending".to_string(), Color::Gray)
    }

    fn advance(&mut self) {
        if let Some(p) = self.progress.as_mut() {
            p.done = (p.done + 1).min(p.total);
        }
    }

    pub fn apply_event(&mut self, ev: BatchEvent) {
        match ev {
            BatchEvent::BatchStarted { mode, total } => {
                self.running = true;
                self.progress = Some(Progress {
                    total,
                    ..Default::default()
                });
                self.info = format!("Running: {total} selected");
                self.push_log(format!("== {mode:?}: {total} selected =="));
            }
            BatchEvent::StageStarted { stage, items } => {
                self.push_log(format!("== {stage} ({items} items) =="));
                if let Some(p) = self.progress.as_mut() {
                    p.stage = Some(stage);
                }
            }
            BatchEvent::ItemStarted { index, total, id } => {
                self.push_log(format!("[{}/{total}] {id}", index + 1));
                if let Some(p) = self.progress.as_mut() {
                    p.current = id;
                }
            }
            BatchEvent::ItemSucceeded { id, destination } => {
                self.push_log(format!("  ok {id}: {destination}"));
                self.failed.remove(&id);
                self.selection.set(&id, false);
                self.processed.insert(id);
                self.advance();
            }
            BatchEvent::ItemSkipped { id } => {
                // Repeated ids in one batch are skipped too; only store hits count as processed.
                if self.processed.contains(&id) {
                    self.push_log(format!("  skipped {id} (already {})", self.mode.verb()));
                    self.selection.set(&id, false);
                } else {
                    self.push_log(format!("  skipped {id} (listed twice)"));
                }
                self.advance();
            }
            BatchEvent::ItemFailed { id, error } => {
                self.push_log(format!("  FAILED {id}: {error}"));
                self.failed.insert(id, error);
                self.advance();
            }
            BatchEvent::Info(info) => {
                let msg = info.to_message();
                self.push_log(msg.clone());
                self.info = msg;
            }
            BatchEvent::BatchFinished { report } => {
                self.running = false;
                self.info = format!(
                    "{}: {} {}, {} skipped, {} failed",
                    if report.cancelled { "Cancelled" } else { "Done" },
                    report.succeeded,
                    self.mode.verb(),
                    report.skipped,
                    report.failed
                );
                let line = self.info.clone();
                self.push_log(line);
                if let Some(p) = self.progress.as_mut() {
                    p.current.clear();
                    p.stage = None;
                }
                self.last_report = Some(*report);
            }
        }
    }
}
