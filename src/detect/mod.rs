mod backend;
mod backends;
mod result;

use anyhow::{anyhow, Result};

use crate::config::{DetectorKind, DetectorSettings};

pub use backend::DetectorBackend;
pub use backends::{ReplayBackend, ScriptedBackend};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use result::{BoundingBox, Detection, ObjectClass};

/// Build the detector configured for a run.
///
/// Every call creates a fresh backend; concurrent runs never share a model instance.
pub fn open_backend(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    match settings.kind {
        DetectorKind::Scripted => Ok(Box::new(ScriptedBackend::new())),
        DetectorKind::Replay => {
            let path = settings
                .detections_path
                .as_ref()
                .ok_or_else(|| anyhow!("replay detector requires detections_path"))?;
            Ok(Box::new(ReplayBackend::open(path)?))
        }
        DetectorKind::Tract => open_tract(settings),
    }
}

#[cfg(feature = "backend-tract")]
fn open_tract(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    let path = settings
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow!("tract detector requires model_path"))?;
    let backend = TractBackend::new(path, settings.model_input)?
        .with_helmet_class(settings.helmet_class);
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn open_tract(_settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow!("tract detector requires the backend-tract feature"))
}
