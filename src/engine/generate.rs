//! Generation pipeline: render the document, convert it to PDF, rasterize
//! the first page to PNG.

use super::{BatchDriver, Stage, StageOutcome};
use crate::artifacts::artifact_path;
use crate::error::StepError;
use crate::model::{Entry, InfoEvent, TrackingRecord};
use crate::render::{pdf_path_for, DocumentConverter, PageRasterizer, TemplateRenderer};
use crate::template::{build_context, Mapping};
use anyhow::{anyhow, bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Where each artifact of an entry lives.
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    pub output_dir: PathBuf,
    pub document_ext: String,
    pub pdf: bool,
    pub png: bool,
}

impl ArtifactLayout {
    pub fn document(&self, entry: &Entry) -> PathBuf {
        artifact_path(&self.output_dir, &entry.key, &self.document_ext)
    }

    pub fn pdf(&self, entry: &Entry) -> PathBuf {
        pdf_path_for(&self.document(entry), &self.output_dir)
    }

    pub fn png(&self, entry: &Entry) -> PathBuf {
        artifact_path(&self.output_dir, &entry.key, "png")
    }

    /// The last artifact the enabled steps produce.
    pub fn final_artifact(&self, entry: &Entry) -> PathBuf {
        if self.pdf && self.png {
            self.png(entry)
        } else if self.pdf {
            self.pdf(entry)
        } else {
            self.document(entry)
        }
    }

    pub fn record_for(&self, entry: &Entry) -> TrackingRecord {
        TrackingRecord::output(self.final_artifact(entry).display().to_string())
    }
}

pub struct GeneratePipeline {
    renderer: Box<dyn TemplateRenderer>,
    converter: Option<Box<dyn DocumentConverter>>,
    rasterizer: Option<Box<dyn PageRasterizer>>,
    output_dir: PathBuf,
    mapping: Mapping,
}

impl GeneratePipeline {
    pub fn new(renderer: Box<dyn TemplateRenderer>, output_dir: PathBuf, mapping: Mapping) -> Self {
        Self {
            renderer,
            converter: None,
            rasterizer: None,
            output_dir,
            mapping,
        }
    }

    pub fn with_converter(mut self, converter: Box<dyn DocumentConverter>) -> Self {
        self.converter = Some(converter);
        self
    }

    /// Only used when a converter is configured; the PNG is made from the PDF.
    pub fn with_rasterizer(mut self, rasterizer: Box<dyn PageRasterizer>) -> Self {
        self.rasterizer = Some(rasterizer);
        self
    }

    pub fn layout(&self) -> ArtifactLayout {
        ArtifactLayout {
            output_dir: self.output_dir.clone(),
            document_ext: self.renderer.extension().to_string(),
            pdf: self.converter.is_some(),
            png: self.converter.is_some() && self.rasterizer.is_some(),
        }
    }

    /// Per-item action for `BatchDriver::run`.
    ///
    /// A failing conversion step does not undo earlier artifacts, but the item
    /// only succeeds when every configured step did.
    pub fn process(&self, entry: &Entry, driver: &BatchDriver) -> Result<TrackingRecord> {
        let layout = self.layout();
        let doc = render_one(self.renderer.as_ref(), &self.mapping, &layout, entry)?;
        driver.info(InfoEvent::Saved { path: doc.clone() });

        let Some(converter) = self.converter.as_deref() else {
            return Ok(layout.record_for(entry));
        };

        let mut failed: Vec<String> = Vec::new();
        let pdf = layout.pdf(entry);
        let _ = std::fs::remove_file(&pdf);
        match converter
            .to_pdf(&[doc.as_path()], &self.output_dir)
            .and_then(|_| ensure_exists(&pdf))
        {
            Ok(()) => {
                driver.info(InfoEvent::Saved { path: pdf.clone() });
                if let Some(rasterizer) = self.rasterizer.as_deref() {
                    let png = layout.png(entry);
                    match rasterize_one(rasterizer, &pdf, &png) {
                        Ok(()) => driver.info(InfoEvent::Saved { path: png }),
                        Err(e) => {
                            failed.push(format!("PNG conversion failed: {e}"));
                            driver.info(step_failed(entry, "PNG conversion", &e));
                        }
                    }
                }
            }
            Err(e) => {
                failed.push(format!("PDF conversion failed: {e}"));
                driver.info(step_failed(entry, "PDF conversion", &e));
                if self.rasterizer.is_some() {
                    failed.push("PNG conversion skipped (no PDF)".to_string());
                }
            }
        }

        if failed.is_empty() {
            Ok(layout.record_for(entry))
        } else {
            Err(anyhow!(failed.join("; ")))
        }
    }

    /// Split into bulk stages for `BatchDriver::run_staged`.
    pub fn into_stages(self) -> (Vec<Box<dyn Stage>>, ArtifactLayout) {
        let layout = self.layout();
        let mut stages: Vec<Box<dyn Stage>> = vec![Box::new(RenderStage {
            renderer: self.renderer,
            mapping: self.mapping,
            layout: layout.clone(),
        })];
        if let Some(converter) = self.converter {
            stages.push(Box::new(PdfStage {
                converter,
                layout: layout.clone(),
            }));
            if let Some(rasterizer) = self.rasterizer {
                stages.push(Box::new(PngStage {
                    rasterizer,
                    layout: layout.clone(),
                }));
            }
        }
        (stages, layout)
    }
}

fn step_failed(entry: &Entry, step: &str, e: &StepError) -> InfoEvent {
    InfoEvent::StepFailed {
        id: entry.id.clone(),
        step: step.to_string(),
        error: e.to_string(),
    }
}

fn ensure_exists(path: &Path) -> Result<(), StepError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(StepError::MissingOutput(path.to_path_buf()))
    }
}

fn render_one(
    renderer: &dyn TemplateRenderer,
    mapping: &Mapping,
    layout: &ArtifactLayout,
    entry: &Entry,
) -> Result<PathBuf> {
    if entry.key.is_empty() {
        bail!("row {} has no usable name", entry.recipient.row);
    }
    let doc = layout.document(entry);
    let ctx = build_context(&entry.recipient, mapping);
    renderer
        .render(&ctx, &doc)
        .with_context(|| format!("render {}", doc.display()))?;
    Ok(doc)
}

fn rasterize_one(rasterizer: &dyn PageRasterizer, pdf: &Path, png: &Path) -> Result<(), StepError> {
    let _ = std::fs::remove_file(png);
    rasterizer.first_page_png(pdf, png)
}

struct RenderStage {
    renderer: Box<dyn TemplateRenderer>,
    mapping: Mapping,
    layout: ArtifactLayout,
}

impl Stage for RenderStage {
    fn name(&self) -> &str {
        "render"
    }

    fn run(&mut self, items: &[&Entry], cancel: &AtomicBool) -> Vec<StageOutcome> {
        items
            .iter()
            .map(|entry| {
                if cancel.load(Ordering::Relaxed) {
                    return StageOutcome::NotRun;
                }
                match render_one(self.renderer.as_ref(), &self.mapping, &self.layout, entry) {
                    Ok(_) => StageOutcome::Done,
                    Err(e) => StageOutcome::Failed(e),
                }
            })
            .collect()
    }
}

struct PdfStage {
    converter: Box<dyn DocumentConverter>,
    layout: ArtifactLayout,
}

impl Stage for PdfStage {
    fn name(&self) -> &str {
        "PDF conversion"
    }

    fn run(&mut self, items: &[&Entry], _cancel: &AtomicBool) -> Vec<StageOutcome> {
        let docs: Vec<PathBuf> = items.iter().map(|e| self.layout.document(e)).collect();
        for e in items {
            let _ = std::fs::remove_file(self.layout.pdf(e));
        }
        let refs: Vec<&Path> = docs.iter().map(PathBuf::as_path).collect();
        // One invocation for the whole batch; per-item results come from the files it left.
        let batch_error = self
            .converter
            .to_pdf(&refs, &self.layout.output_dir)
            .err()
            .map(|e| e.to_string());

        items
            .iter()
            .map(|e| {
                let pdf = self.layout.pdf(e);
                if pdf.is_file() {
                    StageOutcome::Done
                } else {
                    match &batch_error {
                        Some(msg) => StageOutcome::Failed(anyhow!("{msg}")),
                        None => StageOutcome::Failed(StepError::MissingOutput(pdf).into()),
                    }
                }
            })
            .collect()
    }
}

struct PngStage {
    rasterizer: Box<dyn PageRasterizer>,
    layout: ArtifactLayout,
}

impl Stage for PngStage {
    fn name(&self) -> &str {
        "PNG conversion"
    }

    fn run(&mut self, items: &[&Entry], cancel: &AtomicBool) -> Vec<StageOutcome> {
        items
            .iter()
            .map(|e| {
                if cancel.load(Ordering::Relaxed) {
                    return StageOutcome::NotRun;
                }
                match rasterize_one(
                    self.rasterizer.as_ref(),
                    &self.layout.pdf(e),
                    &self.layout.png(e),
                ) {
                    Ok(()) => StageOutcome::Done,
                    Err(err) => StageOutcome::Failed(err.into()),
                }
            })
            .collect()
    }
}
