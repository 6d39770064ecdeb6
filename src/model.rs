use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Which of the two tools a batch belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Generate,
    Send,
}

impl Mode {
    pub fn verb(self) -> &'static str {
        match self {
            Mode::Generate => "generated",
            Mode::Send => "sent",
        }
    }
}

/// One row of the recipient source, as ordered `(column, value)` pairs.
/// Blank cells are kept as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recipient {
    /// Line number in the source file (1-based, header is line 1).
    pub row: u64,
    pub fields: Vec<(String, String)>,
}

impl Recipient {
    pub fn new(row: u64, fields: Vec<(String, String)>) -> Self {
        Self { row, fields }
    }

    /// Look up a column by exact name, then case-insensitively.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(c, _)| c == column)
            .or_else(|| {
                self.fields
                    .iter()
                    .find(|(c, _)| c.eq_ignore_ascii_case(column))
            })
            .map(|(_, v)| v.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(_, v)| v.as_str())
    }

    pub fn is_blank(&self) -> bool {
        self.values().all(|v| v.trim().is_empty())
    }
}

/// Normalized recipient identifier, used as tracking key and filename stem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(String);

impl Key {
    pub(crate) fn new(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A recipient prepared for one tool.
#[derive(Debug, Clone)]
pub struct Entry {
    pub recipient: Recipient,
    pub key: Key,
    /// Tracking and selection id: the key for generation, key plus address for sending.
    pub id: String,
    /// Destination address (sending tool only).
    pub destination: Option<String>,
}

/// Persisted metadata for one processed id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingRecord {
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl TrackingRecord {
    pub fn output(path: impl Into<String>) -> Self {
        Self {
            timestamp: now_timestamp(),
            output: Some(path.into()),
            email: None,
        }
    }

    pub fn email(address: impl Into<String>) -> Self {
        Self {
            timestamp: now_timestamp(),
            output: None,
            email: Some(address.into()),
        }
    }

    pub fn destination(&self) -> &str {
        self.output
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or("-")
    }
}

/// Local wall-clock time as `YYYY-MM-DD HH:MM:SS`, UTC when the offset is unknown.
pub fn now_timestamp() -> String {
    let format = time::macros::format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    time::OffsetDateTime::now_local()
        .unwrap_or_else(|_| time::OffsetDateTime::now_utc())
        .format(&format)
        .unwrap_or_else(|_| "now".into())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BatchEvent {
    BatchStarted {
        mode: Mode,
        total: usize,
    },
    StageStarted {
        stage: String,
        items: usize,
    },
    ItemStarted {
        index: usize,
        total: usize,
        id: String,
    },
    ItemSucceeded {
        id: String,
        destination: String,
    },
    ItemSkipped {
        id: String,
    },
    ItemFailed {
        id: String,
        error: String,
    },
    Info(InfoEvent),
    BatchFinished {
        // Boxed to keep the event small; the failure list can be long.
        report: Box<BatchReport>,
    },
}

/// Structured info events emitted by the engine and consumed by UI/CLI layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InfoEvent {
    Message(String),
    Saved { path: PathBuf },
    StepFailed { id: String, step: String, error: String },
    TrackingWriteFailed { path: PathBuf, error: String },
    Cancelling,
}

impl InfoEvent {
    /// Render a human-readable message for UI/CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Message(msg) => msg.clone(),
            InfoEvent::Saved { path } => format!("Saved: {}", path.display()),
            InfoEvent::StepFailed { id, step, error } => {
                format!("[{id}] {step} failed: {error}")
            }
            InfoEvent::TrackingWriteFailed { path, error } => format!(
                "Warning: could not update tracking file {}: {}",
                path.display(),
                error
            ),
            InfoEvent::Cancelling => "Cancelling after the current item…".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub mode: Mode,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<Failure>,
    pub cancelled: bool,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            succeeded: 0,
            skipped: 0,
            failed: 0,
            failures: Vec::new(),
            cancelled: false,
            elapsed: Duration::ZERO,
        }
    }

    pub fn record_failure(&mut self, id: &str, error: String) {
        self.failed += 1;
        self.failures.push(Failure {
            id: id.to_string(),
            error,
        });
    }

    pub fn processed(&self) -> usize {
        self.succeeded + self.skipped + self.failed
    }
}
