use crate::error::ConfigError;
use crate::job::{resolve_columns, GenerateSettings, Job, JobKind, SendSettings, Session};
use crate::key::{name_source, normalize};
use crate::model::{BatchEvent, Entry, Mode};
use crate::selection::SelectionController;
use crate::source::{guess_column, load_csv};
use crate::tracking::{default_generated_path, default_sent_path, TrackingStore};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "invite-merge",
    version,
    about = "Merge recipient rows into invitation documents and mail them, with optional TUI"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Render one invitation per recipient (document, PDF, PNG)
    Generate(GenerateArgs),
    /// Mail each recipient their invitation image
    Send(SendArgs),
    /// List the source's columns and the guessed name/email columns
    Columns(ColumnsArgs),
    /// List the placeholders a template uses (text, .docx or .odt)
    Placeholders {
        /// Template file
        template: PathBuf,
    },
    /// Show per-recipient tracking and artifact status
    Status(StatusArgs),
}

impl Cli {
    /// True when the command runs without the TUI.
    pub fn is_non_tui(&self) -> bool {
        match &self.command {
            Command::Generate(a) => a.batch.json || a.batch.text,
            Command::Send(a) => a.batch.json || a.batch.text,
            _ => true,
        }
    }
}

/// Flags shared by the batch tools.
#[derive(Debug, Args, Clone)]
pub struct BatchArgs {
    /// Recipient source (CSV with a header row)
    pub source: PathBuf,

    /// Column holding the recipient's name (guessed when omitted)
    #[arg(long)]
    pub name_column: Option<String>,

    /// Field delimiter of the source
    #[arg(long, default_value_t = ',')]
    pub delimiter: char,

    /// Tracking file (defaults depend on the tool)
    #[arg(long)]
    pub tracking_file: Option<PathBuf>,

    /// Print the JSON report and exit (no TUI)
    #[arg(long)]
    pub json: bool,

    /// Print progress and a text summary and exit (no TUI)
    #[arg(long)]
    pub text: bool,

    /// Select every eligible recipient instead of only unprocessed ones
    #[arg(long)]
    pub all: bool,

    /// Only process these names or ids (repeatable)
    #[arg(long, value_name = "NAME")]
    pub only: Vec<String>,

    /// Wait between items, e.g. "2s" to respect mail provider limits
    #[arg(long, default_value = "0s")]
    pub pause: humantime::Duration,

    /// Write the batch report as JSON to this path
    #[arg(long)]
    pub report_json: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct GenerateArgs {
    #[command(flatten)]
    pub batch: BatchArgs,

    /// Document template (.fodt, .html, .svg, .txt, or anything --render-command handles)
    #[arg(long, short)]
    pub template: Option<PathBuf>,

    /// Directory for generated files
    #[arg(long, default_value = "output")]
    pub output_dir: PathBuf,

    /// Map a placeholder to a column: --map name="Full Name" (repeatable)
    #[arg(long = "map", value_name = "PLACEHOLDER=COLUMN")]
    pub map: Vec<String>,

    /// External renderer; {template} and {output} are substituted, the values arrive as JSON on stdin
    #[arg(long)]
    pub render_command: Option<String>,

    /// LibreOffice executable for PDF conversion
    #[arg(long, default_value = "soffice")]
    pub soffice: String,

    /// Poppler pdftoppm executable for PNG conversion
    #[arg(long, default_value = "pdftoppm")]
    pub pdftoppm: String,

    /// PNG resolution
    #[arg(long, default_value_t = 200)]
    pub dpi: u32,

    /// Skip PDF conversion (implies --no-png)
    #[arg(long)]
    pub no_pdf: bool,

    /// Skip PNG conversion
    #[arg(long)]
    pub no_png: bool,

    /// Bulk-stage mode: render everything, then convert everything in one go
    #[arg(long)]
    pub fast: bool,
}

#[derive(Debug, Args, Clone)]
pub struct SendArgs {
    #[command(flatten)]
    pub batch: BatchArgs,

    /// Column holding the address (guessed when omitted)
    #[arg(long)]
    pub email_column: Option<String>,

    /// Sender address
    #[arg(long)]
    pub from: Option<String>,

    /// Mail subject
    #[arg(long, default_value = "Invitation")]
    pub subject: String,

    /// Directory containing the generated PNG invitations
    #[arg(long, default_value = ".")]
    pub images_dir: PathBuf,

    /// sendmail-compatible command that reads the message on stdin
    #[arg(long, default_value = "sendmail -t -i")]
    pub mailer_command: String,

    /// Write .eml files to this directory instead of sending
    #[arg(long)]
    pub outbox: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct ColumnsArgs {
    /// Recipient source (CSV with a header row)
    pub source: PathBuf,

    #[arg(long, default_value_t = ',')]
    pub delimiter: char,
}

#[derive(Debug, Args, Clone)]
pub struct StatusArgs {
    /// Recipient source (CSV with a header row)
    pub source: PathBuf,

    /// Show sending status instead of generation status
    #[arg(long)]
    pub send: bool,

    #[arg(long)]
    pub name_column: Option<String>,

    #[arg(long)]
    pub email_column: Option<String>,

    #[arg(long, default_value_t = ',')]
    pub delimiter: char,

    #[arg(long)]
    pub tracking_file: Option<PathBuf>,

    /// Where artifacts live (generated files, or the images to send)
    #[arg(long, default_value = "output")]
    pub dir: PathBuf,

    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: Cli) -> Result<()> {
    match args.command {
        Command::Generate(a) => {
            let job = build_generate_job(&a)?;
            run_batch(job, a.batch).await
        }
        Command::Send(a) => {
            let job = build_send_job(&a)?;
            run_batch(job, a.batch).await
        }
        Command::Columns(a) => run_columns(&a),
        Command::Placeholders { template } => run_placeholders(&template),
        Command::Status(a) => run_status(&a),
    }
}

fn delimiter_byte(c: char) -> Result<u8, ConfigError> {
    if c.is_ascii() {
        Ok(c as u8)
    } else {
        Err(ConfigError::InvalidDelimiter(c))
    }
}

/// Build a generation `Job` from CLI arguments.
pub fn build_generate_job(args: &GenerateArgs) -> Result<Job, ConfigError> {
    let template = args.template.clone().ok_or(ConfigError::MissingTemplate)?;
    if !template.is_file() {
        return Err(ConfigError::TemplateNotFound(template));
    }
    if matches!(&args.render_command, Some(c) if c.trim().is_empty()) {
        return Err(ConfigError::EmptyCommand);
    }
    let mapping = args
        .map
        .iter()
        .map(|m| crate::template::parse_mapping(m))
        .collect::<Result<Vec<_>, _>>()?;

    let pdf = !args.no_pdf;
    Ok(Job {
        kind: JobKind::Generate(GenerateSettings {
            template,
            output_dir: args.output_dir.clone(),
            mapping,
            render_command: args.render_command.clone(),
            soffice: args.soffice.clone(),
            pdftoppm: args.pdftoppm.clone(),
            dpi: args.dpi,
            pdf,
            png: pdf && !args.no_png,
            fast: args.fast,
        }),
        source: args.batch.source.clone(),
        name_column: args.batch.name_column.clone(),
        email_column: None,
        tracking_path: args
            .batch
            .tracking_file
            .clone()
            .unwrap_or_else(|| default_generated_path(&args.output_dir)),
        pause: Duration::from(args.batch.pause),
        delimiter: delimiter_byte(args.batch.delimiter)?,
    })
}

/// Build a sending `Job` from CLI arguments.
pub fn build_send_job(args: &SendArgs) -> Result<Job, ConfigError> {
    let from = args
        .from
        .as_deref()
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .ok_or(ConfigError::MissingSender)?;
    Ok(Job {
        kind: JobKind::Send(SendSettings {
            from: from.to_string(),
            subject: args.subject.clone(),
            images_dir: args.images_dir.clone(),
            mailer_command: args.mailer_command.clone(),
            outbox: args.outbox.clone(),
        }),
        source: args.batch.source.clone(),
        name_column: args.batch.name_column.clone(),
        email_column: args.email_column.clone(),
        tracking_path: args
            .batch
            .tracking_file
            .clone()
            .unwrap_or_else(default_sent_path),
        pause: Duration::from(args.batch.pause),
        delimiter: delimiter_byte(args.batch.delimiter)?,
    })
}

/// Initial selection: unprocessed entries, widened by `--all` or narrowed by `--only`.
pub fn initial_selection(
    mode: Mode,
    entries: &[Entry],
    store: &TrackingStore,
    args: &BatchArgs,
) -> SelectionController {
    let mut sel = SelectionController::with_defaults(mode, entries, store);
    if args.all {
        sel.select_all(entries);
    }
    if !args.only.is_empty() {
        let wanted: Vec<String> = args.only.iter().map(|o| normalize(o)).collect();
        sel.select_none();
        for e in entries {
            if args.only.contains(&e.id) || wanted.iter().any(|w| w == e.key.as_str()) {
                sel.set(&e.id, true);
            }
        }
    }
    sel
}

async fn run_batch(job: Job, args: BatchArgs) -> Result<()> {
    let session = Session::open(job)?;
    let selection = initial_selection(session.job.mode(), &session.entries, &session.store, &args);

    if !args.json && !args.text {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(session, selection, args.report_json).await;
        }
        #[cfg(not(feature = "tui"))]
        {
            // Fallback when built without TUI support.
            return run_text(session, selection, args).await;
        }
    }

    run_text(session, selection, args).await
}

fn event_line(ev: BatchEvent) -> Option<String> {
    Some(match ev {
        BatchEvent::BatchStarted { mode, total } => format!("== {mode:?}: {total} selected =="),
        BatchEvent::StageStarted { stage, items } => format!("== {stage} ({items} items) =="),
        BatchEvent::ItemStarted { index, total, id } => format!("[{}/{total}] {id}", index + 1),
        BatchEvent::ItemSucceeded { destination, .. } => format!("  ok: {destination}"),
        BatchEvent::ItemSkipped { id } => format!("  skipped {id} (already processed or listed twice)"),
        BatchEvent::ItemFailed { id, error } => format!("  FAILED {id}: {error}"),
        BatchEvent::Info(info) => info.to_message(),
        BatchEvent::BatchFinished { .. } => return None,
    })
}

/// Non-interactive batch: progress on stderr, summary (or JSON report) on stdout.
async fn run_text(session: Session, selection: SelectionController, args: BatchArgs) -> Result<()> {
    let (out_tx, out_handle) = spawn_output_writer();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<BatchEvent>();
    let cancel = Arc::new(AtomicBool::new(false));

    let Session {
        job,
        entries,
        mut store,
        ..
    } = session;
    let items: Vec<Entry> = selection.selected(&entries).into_iter().cloned().collect();
    let driver = job.driver(evt_tx, cancel.clone());
    let handle = tokio::task::spawn_blocking(move || {
        let report = job.execute(&driver, &items, &mut store);
        (report, store)
    });

    // Ctrl-C stops after the item in flight.
    let signal_cancel = cancel.clone();
    let signal_tx = out_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_cancel.store(true, Ordering::Relaxed);
            let _ = signal_tx.send(OutputLine::Stderr(
                crate::model::InfoEvent::Cancelling.to_message(),
            ));
        }
    });

    while let Some(ev) = evt_rx.recv().await {
        if args.json {
            continue;
        }
        if let Some(line) = event_line(ev) {
            let _ = out_tx.send(OutputLine::Stderr(line));
        }
    }

    let (report, store) = handle.await.context("batch worker failed")?;
    let report = report?;

    if args.json {
        let out = serde_json::to_string_pretty(&report)?;
        let _ = out_tx.send(OutputLine::Stdout(out));
    } else {
        let summary = crate::text_summary::build_text_summary(&report, store.len());
        for line in summary.lines {
            let _ = out_tx.send(OutputLine::Stdout(line));
        }
    }
    for msg in crate::orchestrator::process_batch_completion(&report, args.report_json.as_deref())
    {
        let _ = out_tx.send(OutputLine::Stderr(msg));
    }

    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}

fn run_columns(args: &ColumnsArgs) -> Result<()> {
    let table = load_csv(&args.source, delimiter_byte(args.delimiter)?)?;
    for (i, col) in table.columns.iter().enumerate() {
        println!("{:>3}  {col}", i + 1);
    }
    println!(
        "Name column (guessed):  {}",
        guess_column(&table.columns, "name").unwrap_or("-")
    );
    let email = guess_column(&table.columns, "mail").filter(|c| c.to_lowercase().contains("mail"));
    println!("Email column (guessed): {}", email.unwrap_or("-"));
    println!("Rows: {}", table.rows.len());
    Ok(())
}

fn run_placeholders(template: &std::path::Path) -> Result<()> {
    if !template.is_file() {
        return Err(ConfigError::TemplateNotFound(template.to_path_buf()).into());
    }
    let found = crate::template::placeholders_in_file(template)?;
    if found.is_empty() {
        eprintln!("No {{{{ placeholder }}}} found in {}", template.display());
    }
    for ph in found {
        println!("{ph}");
    }
    Ok(())
}

fn run_status(args: &StatusArgs) -> Result<()> {
    let mode = if args.send { Mode::Send } else { Mode::Generate };
    let table = load_csv(&args.source, delimiter_byte(args.delimiter)?)?;
    let (name_column, email_column) = resolve_columns(
        &table,
        mode,
        args.name_column.as_deref(),
        args.email_column.as_deref(),
    )?;
    let entries =
        crate::source::build_entries(&table, mode, &name_column, email_column.as_deref());
    let tracking_path = args.tracking_file.clone().unwrap_or_else(|| match mode {
        Mode::Generate => default_generated_path(&args.dir),
        Mode::Send => default_sent_path(),
    });
    let store = TrackingStore::load(&tracking_path);

    let rows: Vec<serde_json::Value> = entries
        .iter()
        .map(|e| {
            let raw = name_source(&e.recipient, &name_column);
            let artifact = ["png", "pdf"]
                .iter()
                .find_map(|ext| crate::artifacts::find_existing(&args.dir, raw, ext));
            serde_json::json!({
                "id": e.id,
                "key": e.key.as_str(),
                "tracked": store.was_processed(&e.id),
                "timestamp": store.get(&e.id).map(|r| r.timestamp.clone()),
                "artifact": artifact.map(|p| p.display().to_string()),
            })
        })
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("Tracking file: {}", tracking_path.display());
    for (e, row) in entries.iter().zip(&rows) {
        let mark = if store.was_processed(&e.id) { "x" } else { " " };
        let artifact = row["artifact"].as_str().unwrap_or("-");
        println!("[{mark}] {}  {artifact}", e.id);
    }
    println!(
        "{} of {} {}",
        entries.iter().filter(|e| store.was_processed(&e.id)).count(),
        entries.len(),
        mode.verb()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("invite-merge").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn generate_requires_existing_template() {
        let cli = parse(&["generate", "guests.csv"]);
        let Command::Generate(a) = cli.command else {
            panic!("generate expected");
        };
        assert!(matches!(
            build_generate_job(&a),
            Err(ConfigError::MissingTemplate)
        ));

        let cli = parse(&["generate", "guests.csv", "--template", "/no/such/card.fodt"]);
        let Command::Generate(a) = cli.command else {
            panic!("generate expected");
        };
        assert!(matches!(
            build_generate_job(&a),
            Err(ConfigError::TemplateNotFound(_))
        ));
    }

    #[test]
    fn no_pdf_implies_no_png() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("card.txt");
        std::fs::write(&template, "{{Name}}").unwrap();
        let template = template.to_string_lossy().into_owned();
        let cli = parse(&[
            "generate",
            "guests.csv",
            "-t",
            &template,
            "--no-pdf",
            "--map",
            "seat=Table",
            "--pause",
            "1s",
        ]);
        let Command::Generate(a) = cli.command else {
            panic!("generate expected");
        };
        let job = build_generate_job(&a).unwrap();
        let JobKind::Generate(s) = &job.kind else {
            panic!("generate job expected");
        };
        assert!(!s.pdf && !s.png);
        assert_eq!(s.mapping, vec![("seat".to_string(), "Table".to_string())]);
        assert_eq!(job.pause, Duration::from_secs(1));
        assert_eq!(job.tracking_path, PathBuf::from("output/.invite-merge-generated.json"));
    }

    #[test]
    fn send_requires_sender() {
        let cli = parse(&["send", "guests.csv", "--from", "  "]);
        let Command::Send(a) = cli.command else {
            panic!("send expected");
        };
        assert!(matches!(build_send_job(&a), Err(ConfigError::MissingSender)));
        assert!(cli_is_non_tui(&["send", "guests.csv", "--text"]));
        assert!(!cli_is_non_tui(&["send", "guests.csv"]));
    }

    fn cli_is_non_tui(args: &[&str]) -> bool {
        parse(args).is_non_tui()
    }

    #[test]
    fn only_narrows_selection_by_name() {
        use crate::model::Recipient;
        use crate::source::{build_entries, RecipientTable};

        let dir = tempfile::tempdir().unwrap();
        let table = RecipientTable {
            columns: vec!["Name".into()],
            rows: vec![
                Recipient::new(2, vec![("Name".into(), "Anna B. Lee".into())]),
                Recipient::new(3, vec![("Name".into(), "Ben Ode".into())]),
            ],
        };
        let entries = build_entries(&table, Mode::Generate, "Name", None);
        let store = TrackingStore::load(dir.path().join("t.json"));
        let cli = parse(&["generate", "guests.csv", "--only", "Anna B. Lee"]);
        let Command::Generate(a) = cli.command else {
            panic!("generate expected");
        };
        let sel = initial_selection(Mode::Generate, &entries, &store, &a.batch);
        assert_eq!(sel.selected_ids(&entries), vec!["Anna B Lee".to_string()]);
    }
}
