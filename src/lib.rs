//! Driving a DNS resolver engine from async code.
//!
//! Resolver engines in the style of c-ares do no I/O scheduling of their
//! own. The engine owns its sockets, composes queries and applies its retry
//! policy, but it relies on its host to watch those sockets for readiness,
//! to sweep it for timed out queries, and to call it whenever there is work
//! to do. This crate is such a host for the [Tokio](https://tokio.rs/)
//! runtime.
//!
//! The two sides meet in the [engine] module: an engine implements the
//! [`Engine`][engine::Engine] trait and reports socket and completion
//! events through [`EngineNotify`][engine::EngineNotify]. Everything else
//! builds on that boundary. A [`Channel`][channel::Channel] is a cloneable
//! handle on which async tasks submit lookups; the
//! [`Driver`][channel::Driver] created with it owns the engine, runs it on
//! a single task, and delivers results back through the channel. Raw
//! answers are turned into caller visible results by a
//! [`ResultDecoder`][decode::ResultDecoder] supplied when the channel is
//! created.
//!
//! # Modules
//!
//! * [engine] defines the engine interface and the value types crossing
//!   it,
//! * [channel] provides the query channel and the driver running the
//!   engine,
//! * [decode] declares the decoder that shapes caller results,
//! * [poll] abstracts socket readiness and implements it for Tokio, and
//! * [error] collects the errors the crate reports.
//!
//! # Usage
//!
//! Create a channel with [`Channel::new`][channel::Channel::new], handing
//! it a poller, usually [`TokioPoller`][poll::TokioPoller], and a decoder
//! for the result type the application wants to see. Spawn the returned
//! driver into the runtime, then clone the channel freely and submit
//! lookups from any task. The driver terminates once the last channel has
//! been dropped.

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

pub mod channel;
pub mod decode;
pub mod engine;
pub mod error;
pub mod poll;

mod bridge;
mod library;
mod query;
mod timer;
