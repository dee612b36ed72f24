//! Retry orchestrator
//!
//! Drives readiness -> image gate -> rasterize -> assemble as one attempt, and
//! repeats failed attempts with exponential backoff. Attempts are strictly
//! sequential: two captures racing on the same live target would read each
//! other's half-applied visual state.

use std::time::Duration;

use log::{debug, error, info, warn};

use crate::image_gate::await_images;
use crate::pdf::{PageAssembler, PageDocument, PageOptions};
use crate::readiness::ensure_renderable;
use crate::rendering::raster::Rasterizer;
use crate::{Error, PipelinePolicy, RenderTarget, Result};

/// What happened on one failed attempt. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    /// 0-indexed attempt number
    pub index: u32,
    /// Backoff slept before the attempt started
    pub delay: Duration,
    /// Display form of the error the attempt failed with
    pub failure: String,
}

pub struct Pipeline {
    policy: PipelinePolicy,
    rasterizer: Rasterizer,
    assembler: PageAssembler,
}

impl Pipeline {
    pub fn new(policy: PipelinePolicy) -> Result<Self> {
        Self::with_page_options(policy, PageOptions::default())
    }

    /// Like `new`, with explicit page options. The policy's JPEG quality wins
    /// over `page.jpeg_quality`.
    pub fn with_page_options(policy: PipelinePolicy, page: PageOptions) -> Result<Self> {
        policy.validate()?;
        let rasterizer = Rasterizer::new(policy.capture_options()?, policy.settle());
        let assembler = PageAssembler::new(PageOptions { jpeg_quality: policy.jpeg_quality, ..page });
        Ok(Self { policy, rasterizer, assembler })
    }

    pub fn policy(&self) -> &PipelinePolicy {
        &self.policy
    }

    /// Produce a document, making at most `max_attempts` attempts.
    ///
    /// Returns on the first successful attempt. Any error an attempt returns is
    /// recorded and the next attempt is made. When every attempt fails, waits
    /// the final grace delay and returns `Error::PipelineExhaustedError` with the
    /// last underlying error. A `max_attempts` of 0 is treated as 1.
    pub async fn produce_document<T: RenderTarget + ?Sized>(
        &self,
        target: &T,
        max_attempts: u32,
    ) -> Result<PageDocument> {
        if max_attempts == 0 {
            warn!("max_attempts of 0 requested, making a single attempt");
        }
        let max_attempts = max_attempts.max(1);
        let mut records: Vec<AttemptRecord> = Vec::with_capacity(max_attempts as usize);
        let mut last_error = None;

        for index in 0..max_attempts {
            let delay = self.policy.backoff_delay(index);
            if !delay.is_zero() {
                debug!("Backing off {}ms before attempt {}", delay.as_millis(), index + 1);
                tokio::time::sleep(delay).await;
            }

            match self.attempt(target, index).await {
                Ok(document) => {
                    info!(
                        "Document produced on attempt {}/{} ({} bytes)",
                        index + 1,
                        max_attempts,
                        document.len()
                    );
                    return Ok(document);
                }
                Err(err) => {
                    warn!("Attempt {}/{} failed: {}", index + 1, max_attempts, err);
                    records.push(AttemptRecord { index, delay, failure: err.to_string() });
                    last_error = Some(err);
                }
            }
        }

        let grace = self.policy.final_grace();
        if !grace.is_zero() {
            debug!("Final attempt failed, waiting {}ms grace", grace.as_millis());
            tokio::time::sleep(grace).await;
        }

        let last = last_error.unwrap_or_else(|| Error::RasterizationError("no attempt was made".into()));
        error!("Giving up after {} attempt(s): {}", records.len(), last);
        Err(Error::PipelineExhaustedError { attempts: records, last: Box::new(last) })
    }

    /// One full pass. Every step reads the target afresh; nothing carries over
    /// from a previous attempt.
    async fn attempt<T: RenderTarget + ?Sized>(&self, target: &T, index: u32) -> Result<PageDocument> {
        ensure_renderable(target)?;

        if index > 0 {
            // the target may have just been re-rendered
            target.flush_layout();
            let settle = self.policy.retry_settle();
            if !settle.is_zero() {
                tokio::time::sleep(settle).await;
            }
        }

        let report = await_images(target, self.policy.image_timeout()).await;
        if report.failed() + report.timed_out() > 0 {
            warn!(
                "Capturing with {} failed and {} timed out image(s)",
                report.failed(),
                report.timed_out()
            );
        }

        let raster = self.rasterizer.rasterize(target).await?;
        self.assembler.assemble(&raster)
    }
}
