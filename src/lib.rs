//! # Property Monitor
//!
//! Many observers, one owner: file-backed state properties delivered to
//! subscribers on any thread.
//!
//! ## Core Concepts
//!
//! - **Registry**: a dedicated thread owning every watched property; all
//!   requests reach it as messages with one-shot replies
//! - **Handlers**: one per key, holding the open file, cached value, reopen
//!   backoff and readiness rate limiting
//! - **Clients**: per-observer handles with a cached value, updated only when
//!   their owner pumps events
//!
//! ## Example
//!
//! ```ignore
//! use property_monitor::{ClientHandle, Value};
//!
//! let mut charge = ClientHandle::new("Battery.ChargePercentage")?;
//! charge.subscribe();
//! charge.wait_for_subscription(true);
//! println!("{}", charge.get_value(Value::Int(0)));
//!
//! // Write a writable property
//! let ok = charge.write(Value::Int(80)).wait(Duration::from_secs(1))?;
//!
//! // At exit
//! property_monitor::shutdown_global();
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod monitor;
mod poll;
mod property;
pub mod resolver;
pub mod types;

// Re-exports
pub use client::{ClientHandle, SubscriptionState};
pub use codec::{TextCodec, ValueCodec};
pub use config::{BackoffConfig, ClientTimeouts, MonitorConfig, RateConfig, ReadConfig};
pub use error::{PropertyError, Result};
pub use monitor::{
    global, init_global, shutdown_global, ClientEvent, ClientRef, HandlerSnapshot, HandlerState,
    Registry, RegistryHandle, RegistrySnapshot, Reply,
};
pub use resolver::{LocationResolver, StateDirResolver};
pub use types::{ClientId, Location, Locations, Value};
