//! # Mission Console Library
//!
//! A line-oriented terminal client for the mission server. It is used both
//! by participants and by the admin: every command maps to one event on the
//! wire, and everything the server sends back is printed as it arrives.
//!
//! ## Architecture Overview
//!
//! The console holds no mission state of its own. Global status snapshots
//! from the server are rendered as they arrive, so two consoles attached to
//! the same server always print the same view.
//!
//! ## Module Organization
//!
//! ### Commands Module (`commands`)
//! Turns a typed line such as `start 3` or `reset all` into a
//! [`shared::ClientEvent`].
//!
//! ### Display Module (`display`)
//! Formats server events, including the status table with remaining time
//! and failure alerts.
//!
//! ### Network Module (`network`)
//! Owns the WebSocket connection and multiplexes stdin, incoming frames and
//! the optional status polling interval.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::Console;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut console = Console::new("ws://127.0.0.1:4000", None).await?;
//!     console.run().await?;
//!     Ok(())
//! }
//! ```

pub mod commands;
pub mod display;
pub mod network;
