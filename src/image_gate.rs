//! Image loader gate
//!
//! Waits for every raster image under a target to settle (load, fail, or time
//! out) before capture. A bad image never fails the batch: it is logged and
//! counted as settled.

use std::time::Duration;

use futures::future::join_all;
use log::{debug, warn};
use tokio::sync::watch;

use crate::RenderTarget;

/// Load state of a single embedded image
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Pending,
    Loaded,
    Failed(String),
}

impl LoadState {
    /// Loaded or failed; either way no further signal will arrive.
    pub fn is_settled(&self) -> bool {
        !matches!(self, LoadState::Pending)
    }
}

/// Read side of an embedded image's load signal.
#[derive(Debug, Clone)]
pub struct ImageRef {
    src: String,
    state: watch::Receiver<LoadState>,
}

/// Write side of an embedded image's load signal, held by whatever loads it.
#[derive(Debug)]
pub struct ImageSignal {
    tx: watch::Sender<LoadState>,
}

/// Create a pending image and the signal used to settle it.
pub fn image_channel(src: impl Into<String>) -> (ImageSignal, ImageRef) {
    let (tx, rx) = watch::channel(LoadState::Pending);
    (ImageSignal { tx }, ImageRef { src: src.into(), state: rx })
}

impl ImageRef {
    /// An image that has already settled with `state`.
    pub fn settled(src: impl Into<String>, state: LoadState) -> Self {
        let (_tx, rx) = watch::channel(state);
        ImageRef { src: src.into(), state: rx }
    }

    pub fn src(&self) -> &str {
        &self.src
    }

    pub fn state(&self) -> LoadState {
        self.state.borrow().clone()
    }

    pub fn is_settled(&self) -> bool {
        self.state.borrow().is_settled()
    }
}

impl ImageSignal {
    pub fn loaded(&self) {
        self.tx.send_replace(LoadState::Loaded);
    }

    pub fn failed(&self, reason: impl Into<String>) {
        self.tx.send_replace(LoadState::Failed(reason.into()));
    }
}

/// How one image settled while the gate waited on it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOutcome {
    Loaded,
    Failed(String),
    TimedOut,
}

/// Per-image outcomes of one gate pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GateReport {
    pub outcomes: Vec<(String, ImageOutcome)>,
}

impl GateReport {
    pub fn loaded(&self) -> usize {
        self.count(|o| matches!(o, ImageOutcome::Loaded))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ImageOutcome::Failed(_)))
    }

    pub fn timed_out(&self) -> usize {
        self.count(|o| matches!(o, ImageOutcome::TimedOut))
    }

    fn count(&self, pred: impl Fn(&ImageOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

/// Wait until every image under `target` has settled. Never fails.
///
/// Already settled images resolve immediately. Pending images are waited on
/// concurrently, each bounded by `per_image_timeout`, so the whole gate takes
/// at most one timeout period.
pub async fn await_images<T: RenderTarget + ?Sized>(
    target: &T,
    per_image_timeout: Duration,
) -> GateReport {
    let images = target.images();
    if images.is_empty() {
        return GateReport::default();
    }

    debug!("Waiting on {} image(s)", images.len());
    let waits = images
        .into_iter()
        .map(|image| settle_one(image, per_image_timeout));
    let outcomes = join_all(waits).await;

    GateReport { outcomes }
}

async fn settle_one(image: ImageRef, timeout: Duration) -> (String, ImageOutcome) {
    let ImageRef { src, mut state } = image;
    let waited = tokio::time::timeout(timeout, async {
        state
            .wait_for(LoadState::is_settled)
            .await
            .map(|s| (*s).clone())
    })
    .await;

    let outcome = match waited {
        Ok(Ok(LoadState::Failed(reason))) => {
            warn!("Image '{}' failed to load: {}", src, reason);
            ImageOutcome::Failed(reason)
        }
        Ok(Ok(_)) => ImageOutcome::Loaded,
        Ok(Err(_)) => {
            warn!("Image '{}' was dropped before it settled", src);
            ImageOutcome::Failed("loader dropped".to_string())
        }
        Err(_) => {
            warn!("Image '{}' did not settle within {}ms", src, timeout.as_millis());
            ImageOutcome::TimedOut
        }
    };
    (src, outcome)
}
