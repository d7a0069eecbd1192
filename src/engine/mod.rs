//! Remote dispatch and the drain/acknowledge state machine.

/// Synchronous drain and acknowledgement processing.
pub mod drain;
/// Remote channel trait and outcome model.
pub mod traits;
