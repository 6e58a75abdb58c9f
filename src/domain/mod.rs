//! Domain Layer
//!
//! The contracts every cache tier is written against.
//!
//! - **Ports** (`ports.rs`) - [`Cache`], [`MetricsSink`] and [`Clock`]
//! - **Context** (`context.rs`) - cancellation and deadlines for each call
//!
//! # Usage
//!
//! ```ignore
//! use reportcache::domain::{Cache, CallContext};
//!
//! async fn cached_report(cache: &dyn Cache, key: &str) -> Result<Option<Bytes>> {
//!     let ctx = CallContext::with_timeout(Duration::from_secs(30));
//!     cache.get(&ctx, key, Duration::from_secs(8 * 3600)).await
//! }
//! ```

pub mod context;
pub mod ports;

pub use context::CallContext;
pub use ports::{
    add_duration, remaining_until, sub_duration, Cache, Clock, ManualClock, MetricsSink,
    SystemClock,
};
