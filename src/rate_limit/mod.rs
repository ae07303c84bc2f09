//! Rate Limiting Module
//!
//! Per-identity admission control over two independent fixed windows.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 RateLimiter                   │
//! │        decide(identity, now) -> Decision      │
//! ├──────────────────────────────────────────────┤
//! │   WindowStore (injected, shared by clones)    │
//! │   identity -> Mutex<WindowState{short,long}>  │
//! └──────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod limiter;
pub mod store;
pub mod window;

pub use config::RateLimitConfig;
pub use limiter::RateLimiter;
pub use store::{InMemoryWindowStore, WindowStore};
pub use window::{BlockedBy, Decision, LimiterPolicy, WindowPolicy, WindowState, WindowUsage};
