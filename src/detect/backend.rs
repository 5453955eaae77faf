use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Detector backend trait.
///
/// # Capability Boundary
///
/// The model is a black box behind this trait. The pipeline only relies on:
/// - `detect` receives the frame read-only and cannot mutate it
/// - identical model + frame gives identical detections (modulo runtime nondeterminism)
/// - any `Err` is an inference failure and ends the run (no per-frame retry)
///
/// Backends are injected per run. Do not share one global model instance between
/// categories; build one backend per pipeline instead.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// True for backends that can never report anything, such as an empty
    /// scripted backend. Only synthetic `stub://` inputs may run with one.
    fn is_dry_run(&self) -> bool {
        false
    }

    /// Optional warm-up hook, called once during `Opening`.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
