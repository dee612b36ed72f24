//! Readiness probe: is a target safe to rasterize right now?

use crate::{BoundingBox, Error, RenderTarget, Result};

/// A side-effect free reading of a target's state.
#[derive(Debug, Clone, PartialEq)]
pub struct Probe {
    pub attached: bool,
    pub bounds: BoundingBox,
    pub pending_images: usize,
}

impl Probe {
    pub fn is_ready(&self) -> bool {
        self.is_renderable() && self.pending_images == 0
    }

    /// Attached and non-empty, regardless of image state.
    pub fn is_renderable(&self) -> bool {
        self.attached && self.bounds.is_non_empty()
    }
}

pub fn probe<T: RenderTarget + ?Sized>(target: &T) -> Probe {
    let attached = target.is_attached();
    Probe {
        attached,
        bounds: target.bounding_box(),
        pending_images: target.images().iter().filter(|i| !i.is_settled()).count(),
    }
}

/// Attached, sized, and every embedded image settled. Safe to poll.
pub fn is_ready<T: RenderTarget + ?Sized>(target: &T) -> bool {
    probe(target).is_ready()
}

/// Structural check used at the start of each attempt and right before capture.
///
/// Image state is left to the image gate, which bounds how long a pending image
/// may hold things up.
pub fn ensure_renderable<T: RenderTarget + ?Sized>(target: &T) -> Result<BoundingBox> {
    if !target.is_attached() {
        return Err(Error::InvalidTargetError("target is not attached to the document".into()));
    }
    let bounds = target.bounding_box();
    if !bounds.is_non_empty() {
        return Err(Error::InvalidTargetError(format!(
            "target has an empty bounding box ({}x{})",
            bounds.width, bounds.height
        )));
    }
    Ok(bounds)
}
