//! `turingos-middleware` – kernel event routing.
//!
//! Carries scheduler, trap, routing and journal events from the runtime to
//! any observer (dashboards, audit sinks, tests) without the runtime knowing
//! who is listening.
//!
//! # Modules
//!
//! - [`bus`] – topic-partitioned publish/subscribe [`EventBus`] built on
//!   Tokio broadcast channels, plus a firehose channel that sees everything.

pub mod bus;

pub use bus::{EventBus, Topic, TopicReceiver, TopicSubscriber};
