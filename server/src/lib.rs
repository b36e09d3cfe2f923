//! # Mission Server Library
//!
//! This library provides the authoritative server for a shared, timed mission
//! session: many participants and an admin console connect over WebSockets,
//! start and finish missions, and all watch one global status view.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Mission State
//! The server owns the definitive state of every mission. Clients send
//! intents (start, complete, fail, reset) and receive the resulting global
//! status; they never decide mission state themselves.
//!
//! ### Arbitration
//! Concurrent starts are arbitrated by an exclusivity policy chosen at
//! startup. The first start to reach the session loop wins; losers are
//! refused with an `action-denied` event.
//!
//! ### Status Broadcasting
//! Every state change is followed by a fresh snapshot broadcast to all
//! connections. Snapshots are computed on demand and never stored.
//!
//! ## Architecture Design
//!
//! ### Single Session Loop
//! One task owns the [`session::MissionSession`] and processes messages
//! sequentially. Connection tasks only parse frames and forward them, so no
//! event ever observes a half-applied mutation and no locks guard mission
//! state.
//!
//! ### Lazy Deadlines
//! Mission timeouts are detected when the session next handles an event or
//! builds a snapshot. There is no timer per mission.
//!
//! ### Two-Phase Reset
//! Resets mark missions `Resetting`, signal clients, and settle to `Idle`
//! after a short delay. Events for a resetting mission are refused, so a
//! completion sent just before a reset cannot undo it.
//!
//! ## Module Organization
//!
//! - `mission`: mission records and the registry that owns them
//! - `ledger`: per-connection started / failed / completed attribution
//! - `gate`: start admission under the exclusivity policy
//! - `deadline`: remaining time and timeout application
//! - `reset`: two-phase reset bookkeeping
//! - `status`: snapshot projection
//! - `session`: event handlers tying the above together
//! - `broadcast`: to-all and to-one delivery
//! - `client_manager`: connection roster
//! - `network`: WebSocket accept loop and the session loop
//! - `config`: command line and mission table
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let config = ServerConfig::default();
//!     let mut server = Server::bind(&config).await?;
//!
//!     // Accepts connections, applies events to the session and broadcasts
//!     // status until a Shutdown message arrives
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod broadcast;
pub mod client_manager;
pub mod config;
pub mod deadline;
pub mod gate;
pub mod ledger;
pub mod mission;
pub mod network;
pub mod reset;
pub mod session;
pub mod status;
