//! Per-key property handling: the open file, its cache and subscribers.
//!
//! A handler watches one file with readiness notification, re-reads it when
//! notified, and pushes changed values to its subscribers. Files that cannot
//! be opened are retried on a growing schedule.

mod backoff;
mod handler;
mod rate;
mod resource;

pub(crate) use handler::PropertyHandler;
