//! # Plugin Module
//!
//! Onion-ordered wrappers around a bound handler.
//!
//! ## Overview
//!
//! A route carries two chains:
//!
//! - **pre plugins** (`BindConfig::plugin`) wrap argument resolution and the
//!   handler. They see the raw call only.
//! - **post plugins** (`BindConfig::post_plugin`) wrap the handler call alone
//!   and see the resolved [`Arguments`](crate::callable::Arguments).
//!
//! For `[P1, P2]` a call observes
//! `P1.before, P2.before, handler, P2.after, P1.after`. A plugin that returns
//! without running `next` short-circuits everything inside it.
//!
//! Synchronous handlers run [`Plugin`]s, asynchronous ones [`AsyncPlugin`]s.
//! [`PluginEntry::dual`] registers a type implementing both so it fits either
//! mode; binding a route with an entry that lacks the required mode is a
//! configuration error.
//!
//! ## Built-in plugins
//!
//! - [`TracingPlugin`] - span per call, outcome and latency logs
//! - [`MetricsPlugin`] - atomic call, error and latency counters
//! - [`RequiredPlugin`] - companions required when a parameter is provided
//! - [`AtMostOneOfPlugin`] - mutually exclusive parameters
//! - [`CachePlugin`] - in-memory TTL cache of handler results

mod cache;
mod core;
mod metrics;
mod required;
mod tracing;

pub use self::cache::CachePlugin;
pub use self::core::*;
pub use self::metrics::{CallStats, MetricsPlugin};
pub use self::required::{AtMostOneOfPlugin, RequiredPlugin};
pub use self::tracing::TracingPlugin;
