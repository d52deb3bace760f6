//! The subscription registry and its request protocol.
//!
//! One registry thread owns every property handler. Callers on any thread
//! talk to it through a [`RegistryHandle`]: each request is a message with a
//! one-shot [`Reply`]. Change notifications go to each subscriber's own
//! channel as [`ClientEvent`]s.
//!
//! # Example
//!
//! ```ignore
//! let registry = Registry::start(MonitorConfig::from_env()?)?;
//!
//! let mut battery = registry.client("Battery.ChargePercentage");
//! battery.subscribe();
//! battery.wait_for_subscription(true);
//! println!("charge: {}", battery.get_value(Value::Int(0)));
//!
//! loop {
//!     if let Some(v) = battery.wait_for_change(Duration::from_secs(60)) {
//!         println!("charge: {}", v);
//!     }
//! }
//! ```

mod global;
mod handle;
mod registry;
mod types;
mod waker;

pub use global::{global, init_global, shutdown_global};
pub use handle::RegistryHandle;
pub use registry::Registry;
pub use types::{
    ClientEvent, ClientRef, HandlerSnapshot, HandlerState, RegistrySnapshot, Reply,
};
