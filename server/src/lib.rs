//! # Signaling Relay Library
//!
//! Peers in the snake game talk to each other directly, but before a direct
//! channel exists they need some way to swap session descriptions and
//! connection candidates. This relay is that way. It never sees game state.
//!
//! ## Protocol
//!
//! UDP datagrams carrying bincode-encoded [`shared::Packet`]s:
//! - `Register` binds a player name to the sender's address; the relay answers
//!   `Registered` or `Rejected`
//! - `Heartbeat` keeps the binding alive
//! - `Forward` carries an opaque JSON signaling message to another name
//! - `Unregister` drops the binding
//!
//! A `Forward` is only relayed when its source address is the one registered
//! for its `from` name. Anything else is answered with `Rejected`.
//!
//! ## Module Organization
//!
//! ### Client Manager Module (`client_manager`)
//! The registry: name to address bindings, capacity limits, routing decisions
//! and heartbeat timeouts.
//!
//! ### Network Module (`network`)
//! The UDP socket and the tasks around it: a receiver feeding the main loop,
//! a sender draining the outgoing queue and a timeout checker.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     // Forget peers after 10 silent seconds; accept at most 64
//!     let mut server = Server::new("127.0.0.1:9000", Duration::from_secs(10), 64).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod network;
