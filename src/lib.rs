//! Taskgate Library
//!
//! Per-identity rate-limited task admission in front of a durable task
//! queue drained by a pool of worker units.
//!
//! Submission path: [`admission::Admission`] validates the identity, asks the
//! [`rate_limit::RateLimiter`] for a decision and enqueues admitted tasks on a
//! [`queue::TaskQueue`]. Execution path: [`worker::WorkerPool`] units claim
//! tasks, run the [`worker::TaskHandler`] and acknowledge them.

pub mod admission;
pub mod audit;
pub mod clock;
pub mod config;
pub mod identity;
pub mod metrics;
pub mod queue;
pub mod rate_limit;
pub mod server;
pub mod worker;
