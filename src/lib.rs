pub mod breaker;
pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod health;
pub mod pool;
pub mod recovery;
pub mod scheduler;
pub mod server;
pub mod shutdown;
pub mod tools;
pub mod watchdog;

#[cfg(test)]
mod test_support;

pub use breaker::{BreakerStatus, CircuitBreaker, CircuitState};
pub use config::GuardConfig;
pub use connection::{ConnectionManager, TcpConnectionManager, TcpPoolOptions};
pub use context::{ContextOptions, GuardContext};
pub use error::{GuardError, GuardResult};
pub use health::{HealthCheckResult, HealthMonitor, HealthStatus};
pub use pool::SmartConnectionPool;
pub use recovery::{AutoRecoveryManager, ErrorPattern, RecoveryStrategy};
pub use server::create_router;
pub use shutdown::{GracefulShutdown, ShutdownOutcome};
pub use tools::GuardTool;
pub use watchdog::ConnectionWatchdog;
