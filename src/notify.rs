//! Hook invoked once a violation has been persisted.
//!
//! Alerting (mail, push, dashboards) lives outside this crate; it plugs in
//! by implementing [`ViolationNotifier`].

use anyhow::Result;

use crate::storage::ViolationEvent;

pub trait ViolationNotifier: Send + Sync {
    /// Called after the evidence image and the store record both exist.
    /// Errors are logged by the caller and never fail the run.
    fn notify(&self, event: &ViolationEvent) -> Result<()>;
}

/// Default notifier: one `info` line per event.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl ViolationNotifier for LogNotifier {
    fn notify(&self, event: &ViolationEvent) -> Result<()> {
        log::info!(
            "violation #{} {} at {} (evidence: {})",
            event.id,
            event.record_type,
            event.timestamp,
            event.image_path.as_deref().unwrap_or("-")
        );
        Ok(())
    }
}
