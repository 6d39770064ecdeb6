//! External collaborators for the generation tool: template rendering, PDF
//! conversion and first-page rasterization.
//!
//! The defaults shell out to well-known programs (LibreOffice `soffice`,
//! poppler `pdftoppm`); each is behind a trait so the pipeline can be driven
//! with other implementations.

use crate::error::{ConfigError, StepError};
use crate::template::{render_text, Escape, RenderContext};
use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

pub trait TemplateRenderer: Send {
    /// Extension (without dot) of the rendered document.
    fn extension(&self) -> &str;
    fn render(&self, ctx: &RenderContext, output: &Path) -> Result<(), StepError>;
}

pub trait DocumentConverter: Send {
    /// Convert documents to PDF into `outdir`, named after each document's stem.
    /// One call may handle many documents.
    fn to_pdf(&self, documents: &[&Path], outdir: &Path) -> Result<(), StepError>;
}

pub trait PageRasterizer: Send {
    /// Render the first page of `pdf` as a PNG at `png`.
    fn first_page_png(&self, pdf: &Path, png: &Path) -> Result<(), StepError>;
}

/// PDF path `DocumentConverter::to_pdf` produces for `document`.
pub fn pdf_path_for(document: &Path, outdir: &Path) -> PathBuf {
    let stem = document.file_stem().unwrap_or_default();
    let mut name = stem.to_os_string();
    name.push(".pdf");
    outdir.join(name)
}

/// Renders text-based templates (Flat ODF, HTML, SVG, plain text) in-process.
pub struct TextTemplateRenderer {
    source: String,
    escape: Escape,
    extension: String,
}

impl TextTemplateRenderer {
    pub fn load(template: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(template).with_context(|| {
            format!(
                "read template {} (binary formats such as .docx need --render-command)",
                template.display()
            )
        })?;
        Ok(Self {
            source,
            escape: Escape::for_path(template),
            extension: extension_of(template),
        })
    }
}

impl TemplateRenderer for TextTemplateRenderer {
    fn extension(&self) -> &str {
        &self.extension
    }

    fn render(&self, ctx: &RenderContext, output: &Path) -> Result<(), StepError> {
        let rendered = render_text(&self.source, ctx, self.escape);
        std::fs::write(output, rendered)
            .map_err(|e| StepError::io(format!("write {}", output.display()), e))
    }
}

/// Delegates rendering to an external program.
///
/// `{template}` and `{output}` in the argument list are substituted; the
/// render context is written to the program's stdin as a JSON object.
pub struct CommandRenderer {
    program: String,
    args: Vec<String>,
    template: PathBuf,
    extension: String,
}

impl CommandRenderer {
    pub fn parse(command_line: &str, template: &Path) -> Result<Self, ConfigError> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or(ConfigError::EmptyCommand)?;
        Ok(Self {
            program,
            args: parts.collect(),
            template: template.to_path_buf(),
            extension: extension_of(template),
        })
    }
}

impl TemplateRenderer for CommandRenderer {
    fn extension(&self) -> &str {
        &self.extension
    }

    fn render(&self, ctx: &RenderContext, output: &Path) -> Result<(), StepError> {
        let mut cmd = Command::new(&self.program);
        for arg in &self.args {
            cmd.arg(
                arg.replace("{template}", &self.template.to_string_lossy())
                    .replace("{output}", &output.to_string_lossy()),
            );
        }
        let json = serde_json::to_vec(ctx)
            .map_err(|e| StepError::io("encode render context", e.into()))?;
        run_program(&self.program, &mut cmd, Some(&json))?;
        if !output.is_file() {
            return Err(StepError::MissingOutput(output.to_path_buf()));
        }
        Ok(())
    }
}

/// LibreOffice headless conversion.
pub struct SofficeConverter {
    program: String,
}

impl SofficeConverter {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl DocumentConverter for SofficeConverter {
    fn to_pdf(&self, documents: &[&Path], outdir: &Path) -> Result<(), StepError> {
        if documents.is_empty() {
            return Ok(());
        }
        let mut cmd = Command::new(&self.program);
        cmd.arg("--headless")
            .arg("--convert-to")
            .arg("pdf")
            .arg("--outdir")
            .arg(outdir)
            .args(documents);
        run_program(&self.program, &mut cmd, None)
    }
}

/// Poppler `pdftoppm`, first page only.
pub struct PdftoppmRasterizer {
    program: String,
    dpi: u32,
}

impl PdftoppmRasterizer {
    pub fn new(program: impl Into<String>, dpi: u32) -> Self {
        Self {
            program: program.into(),
            dpi,
        }
    }
}

impl PageRasterizer for PdftoppmRasterizer {
    fn first_page_png(&self, pdf: &Path, png: &Path) -> Result<(), StepError> {
        // pdftoppm appends ".png" to the output root itself.
        let root = png.with_extension("");
        let mut cmd = Command::new(&self.program);
        cmd.arg("-png")
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg("-f")
            .arg("1")
            .arg("-singlefile")
            .arg(pdf)
            .arg(&root);
        run_program(&self.program, &mut cmd, None)?;
        if !png.is_file() {
            return Err(StepError::MissingOutput(png.to_path_buf()));
        }
        Ok(())
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("txt")
        .to_string()
}

/// Run an external program to completion, optionally feeding `stdin`.
pub(crate) fn run_program(
    program: &str,
    cmd: &mut Command,
    stdin: Option<&[u8]>,
) -> Result<(), StepError> {
    cmd.stdout(Stdio::null()).stderr(Stdio::piped());
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });

    let mut child = cmd.spawn().map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            StepError::Unavailable {
                program: program.to_string(),
            }
        } else {
            StepError::Spawn {
                program: program.to_string(),
                source,
            }
        }
    })?;

    if let (Some(bytes), Some(mut pipe)) = (stdin, child.stdin.take()) {
        if let Err(e) = pipe.write_all(bytes) {
            // The program may legitimately exit without reading its input.
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(StepError::io(format!("write to {program}"), e));
            }
        }
    }

    let output = child.wait_with_output().map_err(|source| StepError::Spawn {
        program: program.to_string(),
        source,
    })?;
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let detail = stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .map(|l| format!(": {}", l.trim()))
        .unwrap_or_default();
    Err(StepError::Exited {
        program: program.to_string(),
        code: output.status.code().unwrap_or(-1),
        detail,
    })
}
