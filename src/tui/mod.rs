mod help;
mod state;

use crate::job::Session;
use crate::model::BatchEvent;
use crate::orchestrator::{self, UiCommand};
use crate::selection::SelectionController;
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, Paragraph, Tabs},
    Terminal,
};
use state::UiState;
use std::path::PathBuf;
use std::sync::Arc;
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

// Rows taken by tabs, gauge, status and list borders.
const CHROME_ROWS: u16 = 3 + 3 + 3 + 2;

pub async fn run(
    session: Session,
    selection: SelectionController,
    report_json: Option<PathBuf>,
) -> Result<()> {
    // Unbounded channels avoid backpressure between the worker and the UI.
    let (event_tx, event_rx) = mpsc::unbounded_channel::<BatchEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    let Session {
        job, entries, store, ..
    } = session;
    let entries = Arc::new(entries);
    let title = job
        .source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| job.source.display().to_string());
    let state = UiState::new(
        job.mode(),
        title,
        entries.clone(),
        selection,
        store.processed_ids(),
    );

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_handle = std::thread::spawn(move || run_threaded(state, event_rx, cmd_tx));

    let res = orchestrator::run_controller(
        Arc::new(job),
        entries,
        store,
        report_json,
        event_tx,
        cmd_rx,
    )
    .await;

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    if let Ok(joined) = join_res {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
        }
    }

    res
}

/// Run the TUI loop on a dedicated thread.
fn run_threaded(
    mut state: UiState,
    mut event_rx: UnboundedReceiver<BatchEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    let res = loop {
        // Drain events without blocking to keep the UI responsive.
        while let Ok(ev) = event_rx.try_recv() {
            state.apply_event(ev);
        }

        if last_tick.elapsed() >= tick_rate {
            if let Ok(size) = terminal.size() {
                state.page_size = size.height.saturating_sub(CHROME_ROWS).max(1) as usize;
            }
            terminal.draw(|f| draw(f.area(), f, &state)).ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                match (k.modifiers, k.code) {
                    (_, KeyCode::Char('q')) | (KeyModifiers::CONTROL, KeyCode::Char('c')) => {
                        let _ = cmd_tx.send(UiCommand::Quit);
                        break Ok(());
                    }
                    (_, KeyCode::Enter) | (_, KeyCode::Char('g')) => {
                        if state.running {
                            state.info = "A batch is already running (c to cancel)".into();
                        } else {
                            let ids = state.selected_ids();
                            if ids.is_empty() {
                                state.info = "Nothing selected".into();
                            } else {
                                state.info = format!("Starting {} item(s)…", ids.len());
                                state.failed.clear();
                                let _ = cmd_tx.send(UiCommand::Start { ids });
                            }
                        }
                    }
                    (_, KeyCode::Char('c')) => {
                        if state.running {
                            let _ = cmd_tx.send(UiCommand::Cancel);
                        }
                    }
                    (_, KeyCode::Char(' ')) => state.toggle_current(),
                    (_, KeyCode::Char('a')) => state.select_all(),
                    (_, KeyCode::Char('n')) => state.select_none(),
                    (_, KeyCode::Char('u')) => state.select_unprocessed(),
                    (_, KeyCode::Up) | (_, KeyCode::Char('k')) => state.move_cursor(-1),
                    (_, KeyCode::Down) | (_, KeyCode::Char('j')) => state.move_cursor(1),
                    (_, KeyCode::PageUp) => state.prev_page(),
                    (_, KeyCode::PageDown) => state.next_page(),
                    (_, KeyCode::Home) => state.cursor = 0,
                    (_, KeyCode::End) => state.cursor = state.entries.len().saturating_sub(1),
                    (_, KeyCode::Tab) => state.tab = (state.tab + 1) % 3,
                    (_, KeyCode::Char('?')) => state.tab = 2,
                    _ => {}
                }
            }
        }
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
    res
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)].as_ref())
        .split(area);

    let tabs = Tabs::new(vec![
        Line::from("Recipients"),
        Line::from("Log"),
        Line::from("Help"),
    ])
    .select(state.tab)
    .block(Block::default().borders(Borders::ALL).title(format!(
        "invite-merge · {:?} · {}",
        state.mode, state.title
    )))
    .highlight_style(Style::default().fg(Color::Yellow));
    f.render_widget(tabs, chunks[0]);

    match state.tab {
        0 => draw_recipients(chunks[1], f, state),
        1 => draw_log(chunks[1], f, state),
        _ => help::draw_help(chunks[1], f),
    }
}

fn draw_recipients(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let main = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Min(0),    // Recipient list
                Constraint::Length(3), // Progress gauge
                Constraint::Length(3), // Status row
            ]
            .as_ref(),
        )
        .split(area);

    let range = state.visible_range();
    let id_width = state.entries[range.clone()]
        .iter()
        .map(|e| e.id.chars().count())
        .max()
        .unwrap_or(0)
        .min(60);
    let lines: Vec<Line> = range
        .map(|i| {
            let e = &state.entries[i];
            let (status, color) = state.status_of(e);
            let mark = if state.selection.is_selected(&e.id) { "[x]" } else { "[ ]" };
            let row_style = if i == state.cursor {
                Style::default().add_modifier(Modifier::REVERSED)
            } else {
                Style::default()
            };
            Line::from(vec![
                Span::styled(format!("{mark} {:<id_width$}  ", e.id), row_style),
                Span::styled(status, Style::default().fg(color)),
            ])
        })
        .collect();

    let list = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(format!(
        "Recipients: {} selected of {} · page {}/{}",
        state.selection.selected_count(),
        state.entries.len(),
        state.page() + 1,
        state.page_count()
    )));
    f.render_widget(list, main[0]);

    let (ratio, label) = match &state.progress {
        Some(p) if p.total > 0 => {
            let stage = p.stage.as_deref().map(|s| format!("{s}: ")).unwrap_or_default();
            (
                p.done as f64 / p.total as f64,
                format!("{}/{} {stage}{}", p.done, p.total, p.current),
            )
        }
        _ => (0.0, "idle".to_string()),
    };
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Progress"))
        .gauge_style(Style::default().fg(if state.running {
            Color::Cyan
        } else {
            Color::Green
        }))
        .ratio(ratio.clamp(0.0, 1.0))
        .label(label);
    f.render_widget(gauge, main[1]);

    let hint = Span::styled(
        "  space toggle · a all · n none · u unprocessed · enter run · c cancel · ? help",
        Style::default().fg(Color::Gray),
    );
    let status = Paragraph::new(Line::from(vec![Span::raw(state.info.clone()), hint]))
        .block(Block::default().borders(Borders::ALL).title("Status"));
    f.render_widget(status, main[2]);
}

fn draw_log(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let visible = area.height.saturating_sub(2) as usize;
    let start = state.log.len().saturating_sub(visible);
    let lines: Vec<Line> = state.log[start..]
        .iter()
        .map(|l| {
            let style = if l.trim_start().starts_with("FAILED") || l.starts_with("Warning") {
                Style::default().fg(Color::Red)
            } else {
                Style::default()
            };
            Line::from(Span::styled(l.clone(), style))
        })
        .collect();
    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Log"));
    f.render_widget(p, area);
}
