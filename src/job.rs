//! Validated batch configuration and the loaded session it runs against.

use crate::engine::generate::GeneratePipeline;
use crate::engine::send::SendPipeline;
use crate::engine::BatchDriver;
use crate::error::ConfigError;
use crate::mail::{Mailer, OutboxMailer, SendmailMailer};
use crate::model::{BatchEvent, BatchReport, Entry, Mode};
use crate::render::{
    CommandRenderer, PdftoppmRasterizer, SofficeConverter, TemplateRenderer, TextTemplateRenderer,
};
use crate::source::{build_entries, guess_column, load_csv, RecipientTable};
use crate::template::{placeholders_in_file, resolve_mapping, Mapping};
use crate::tracking::TrackingStore;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::{atomic::AtomicBool, Arc};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct GenerateSettings {
    pub template: PathBuf,
    pub output_dir: PathBuf,
    /// Explicit `placeholder=Column` pairs; completed when the session opens.
    pub mapping: Mapping,
    pub render_command: Option<String>,
    pub soffice: String,
    pub pdftoppm: String,
    pub dpi: u32,
    pub pdf: bool,
    pub png: bool,
    /// Bulk-stage mode.
    pub fast: bool,
}

impl GenerateSettings {
    fn renderer(&self) -> Result<Box<dyn TemplateRenderer>> {
        Ok(match self.render_command.as_deref() {
            Some(cmd) => Box::new(CommandRenderer::parse(cmd, &self.template)?),
            None => Box::new(TextTemplateRenderer::load(&self.template)?),
        })
    }

    pub fn pipeline(&self) -> Result<GeneratePipeline> {
        let mut pipeline =
            GeneratePipeline::new(self.renderer()?, self.output_dir.clone(), self.mapping.clone());
        if self.pdf {
            pipeline = pipeline.with_converter(Box::new(SofficeConverter::new(&self.soffice)));
            if self.png {
                pipeline = pipeline
                    .with_rasterizer(Box::new(PdftoppmRasterizer::new(&self.pdftoppm, self.dpi)));
            }
        }
        Ok(pipeline)
    }

    /// Fill in a column for every placeholder the template uses. With an
    /// external renderer, unmapped columns are passed through as well.
    fn resolve_mapping(&mut self, columns: &[String]) -> Result<()> {
        if self.render_command.is_none() {
            // Binary templates need an external renderer; refuse before any batch starts.
            self.renderer()?;
        }
        let placeholders = match (&self.render_command, placeholders_in_file(&self.template)) {
            (_, Ok(found)) => found,
            (Some(_), Err(e)) => {
                log::debug!("template not scanned for placeholders: {e:#}");
                Vec::new()
            }
            (None, Err(e)) => return Err(e),
        };
        let mut mapping = resolve_mapping(&placeholders, columns, &self.mapping)?;
        if self.render_command.is_some() {
            for col in columns {
                if !mapping.iter().any(|(ph, _)| ph == col) {
                    mapping.push((col.clone(), col.clone()));
                }
            }
        }
        self.mapping = mapping;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SendSettings {
    pub from: String,
    pub subject: String,
    pub images_dir: PathBuf,
    pub mailer_command: String,
    pub outbox: Option<PathBuf>,
}

impl SendSettings {
    fn mailer(&self) -> Result<Box<dyn Mailer>> {
        if let Some(dir) = &self.outbox {
            return Ok(Box::new(OutboxMailer::new(dir)));
        }
        let mailer = SendmailMailer::parse(&self.mailer_command)
            .context("--mailer-command is empty")?;
        Ok(Box::new(mailer))
    }

    pub fn pipeline(&self, name_column: &str) -> Result<SendPipeline> {
        Ok(SendPipeline::new(
            self.mailer()?,
            &self.from,
            &self.subject,
            &self.images_dir,
            name_column,
        ))
    }
}

#[derive(Debug, Clone)]
pub enum JobKind {
    Generate(GenerateSettings),
    Send(SendSettings),
}

#[derive(Debug, Clone)]
pub struct Job {
    pub kind: JobKind,
    pub source: PathBuf,
    /// Explicit name column; guessed from the headers when absent.
    pub name_column: Option<String>,
    /// Explicit address column (sending only); guessed when absent.
    pub email_column: Option<String>,
    pub tracking_path: PathBuf,
    pub pause: Duration,
    pub delimiter: u8,
}

impl Job {
    pub fn mode(&self) -> Mode {
        match self.kind {
            JobKind::Generate(_) => Mode::Generate,
            JobKind::Send(_) => Mode::Send,
        }
    }

    pub fn name_column(&self) -> &str {
        self.name_column
            .as_deref()
            .unwrap_or(crate::key::DEFAULT_NAME_COLUMN)
    }

    pub fn driver(
        &self,
        event_tx: mpsc::UnboundedSender<BatchEvent>,
        cancel: Arc<AtomicBool>,
    ) -> BatchDriver {
        BatchDriver::new(self.mode(), event_tx, cancel).with_pause(self.pause)
    }

    /// Run one batch over `items`. Errors only when the pipeline cannot be
    /// set up; per-item failures end up in the report.
    pub fn execute(
        &self,
        driver: &BatchDriver,
        items: &[Entry],
        store: &mut TrackingStore,
    ) -> Result<BatchReport> {
        match &self.kind {
            JobKind::Generate(settings) => {
                std::fs::create_dir_all(&settings.output_dir).with_context(|| {
                    format!("create output directory {}", settings.output_dir.display())
                })?;
                let pipeline = settings.pipeline()?;
                if settings.fast {
                    let (mut stages, layout) = pipeline.into_stages();
                    Ok(driver.run_staged(items, store, &mut stages, |e| layout.record_for(e)))
                } else {
                    Ok(driver.run(items, store, |e| pipeline.process(e, driver)))
                }
            }
            JobKind::Send(settings) => {
                let pipeline = settings.pipeline(self.name_column())?;
                Ok(driver.run(items, store, |e| pipeline.process(e)))
            }
        }
    }

    /// Settle column choices and the placeholder mapping against the loaded headers.
    fn resolve(&mut self, table: &RecipientTable) -> Result<()> {
        let (name, email) = resolve_columns(
            table,
            self.mode(),
            self.name_column.as_deref(),
            self.email_column.as_deref(),
        )?;
        log::debug!("name column {name:?}, email column {email:?}");
        self.name_column = Some(name);
        self.email_column = email;
        if let JobKind::Generate(settings) = &mut self.kind {
            settings.resolve_mapping(&table.columns)?;
        }
        Ok(())
    }
}

/// Pick the name column (and, for sending, the address column): explicit
/// choices must exist; otherwise guess from the headers.
pub fn resolve_columns(
    table: &RecipientTable,
    mode: Mode,
    name_column: Option<&str>,
    email_column: Option<&str>,
) -> Result<(String, Option<String>), ConfigError> {
    let name = match name_column {
        Some(col) => {
            table.require_column(col)?;
            col.to_string()
        }
        None => guess_column(&table.columns, "name")
            .unwrap_or(crate::key::DEFAULT_NAME_COLUMN)
            .to_string(),
    };

    let email = match (mode, email_column) {
        (Mode::Generate, _) => None,
        (Mode::Send, Some(col)) => {
            table.require_column(col)?;
            Some(col.to_string())
        }
        (Mode::Send, None) => Some(
            guess_column(&table.columns, "mail")
                .filter(|c| c.to_lowercase().contains("mail"))
                .ok_or_else(|| ConfigError::MissingColumn {
                    column: "email".into(),
                    available: table.columns.join(", "),
                })?
                .to_string(),
        ),
    };
    Ok((name, email))
}

/// A job bound to its loaded recipients and tracking store.
pub struct Session {
    pub job: Job,
    pub columns: Vec<String>,
    pub entries: Vec<Entry>,
    pub store: TrackingStore,
}

impl Session {
    pub fn open(mut job: Job) -> Result<Self> {
        let table = load_csv(&job.source, job.delimiter)?;
        if table.rows.is_empty() {
            return Err(ConfigError::EmptySource(job.source.clone()).into());
        }
        job.resolve(&table)?;
        let entries = build_entries(
            &table,
            job.mode(),
            job.name_column(),
            job.email_column.as_deref(),
        );
        let store = TrackingStore::load(&job.tracking_path);
        Ok(Self {
            job,
            columns: table.columns,
            entries,
            store,
        })
    }
}
