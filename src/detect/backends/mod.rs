pub mod replay;
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use replay::ReplayBackend;
pub use stub::ScriptedBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
