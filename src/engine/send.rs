//! Sending pipeline: find the recipient's generated image and mail it.

use crate::artifacts::find_existing;
use crate::destination::is_valid_destination;
use crate::key::name_source;
use crate::mail::{compose_invitation, Mailer};
use crate::model::{Entry, TrackingRecord};
use anyhow::{bail, Context, Result};
use std::path::PathBuf;

pub struct SendPipeline {
    mailer: Box<dyn Mailer>,
    from: String,
    subject: String,
    images_dir: PathBuf,
    name_column: String,
}

impl SendPipeline {
    pub fn new(
        mailer: Box<dyn Mailer>,
        from: impl Into<String>,
        subject: impl Into<String>,
        images_dir: impl Into<PathBuf>,
        name_column: impl Into<String>,
    ) -> Self {
        Self {
            mailer,
            from: from.into(),
            subject: subject.into(),
            images_dir: images_dir.into(),
            name_column: name_column.into(),
        }
    }

    /// Per-item action for `BatchDriver::run`.
    pub fn process(&self, entry: &Entry) -> Result<TrackingRecord> {
        let address = entry.destination.as_deref().unwrap_or("").trim();
        if !is_valid_destination(address) {
            bail!("invalid email address {address:?}");
        }

        let raw_name = name_source(&entry.recipient, &self.name_column);
        let Some(image) = find_existing(&self.images_dir, raw_name, "png") else {
            bail!(
                "invitation image not found for {:?} in {}",
                raw_name.trim(),
                self.images_dir.display()
            );
        };

        let message = compose_invitation(&self.from, address, &self.subject, &image)?;
        self.mailer
            .deliver(address, &message)
            .with_context(|| format!("deliver to {address}"))?;
        log::debug!("[{}] sent {} to {address}", entry.id, image.display());
        Ok(TrackingRecord::email(address))
    }
}
