//! Serial link engine for nooLite adapters.
//!
//! Frames are fixed 17-byte packets ([`frame`]); commands are built by
//! [`command::CommandBuilder`] and sent through a [`link::Link`], which keeps
//! at most one command waiting for confirmation and streams everything else
//! the adapter hears as typed [`event::Event`]s.

pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod frame;
pub mod jitter;
pub mod link;
pub mod port;
pub mod stats;

pub use error::{Error, Result};
pub use link::{Events, Link, SendOutcome};
