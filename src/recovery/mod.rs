//! Auto-recovery
//!
//! Classifies connection-layer errors into known patterns and runs a bounded
//! number of remediation strategies per pattern:
//! - reconnect the named connection
//! - replace the raw pool
//! - reset the pool's circuit breaker
//! - cache clear / restart hooks (inert)

pub mod event;
pub mod manager;
pub mod patterns;

pub use event::{RecoveryAttempt, RecoveryContext, RecoveryStats, RecoveryStrategy};
pub use manager::AutoRecoveryManager;
pub use patterns::{classify, ErrorPattern};
