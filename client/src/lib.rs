//! # Snake Peer Library
//!
//! Everything one participant of a peer-to-peer snake game runs. There is no
//! authoritative server: each peer simulates only its own snake and pushes a
//! full snapshot of it to every connected peer on each tick.
//!
//! ## Architecture Overview
//!
//! ### Sessions
//! [`session::PeerSessionManager`] owns one connection record per remote
//! player. It creates offers and answers, relays candidates through a
//! [`signaling::SignalingTransport`] and only writes to channels that are open.
//! The connections themselves come from a [`transport::PeerTransport`];
//! [`direct::DirectTransport`] is the TCP implementation used by the binary.
//!
//! ### Reconciliation
//! [`reconciler::PlayerMap`] holds the latest known state of every player.
//! A snapshot from a peer replaces that peer's entry outright. Snapshots that
//! fail to parse are dropped without touching the map.
//!
//! ### Simulation
//! [`game::LocalGame`] moves the local snake once per tick, grows it on food
//! and ends the game on leaving the grid or hitting its own body.
//!
//! ### Event Loop
//! [`network::GameSession`] is the single owner of all of the above. Transport
//! callbacks, signaling messages, timer ticks and steering all arrive as
//! events on channels; frames for the window leave on a watch channel.
//!
//! ## Module Organization
//!
//! - `config`: runtime settings built from the command line
//! - `direct`: length-prefixed TCP peer channels
//! - `error`: error types for every fallible layer
//! - `game`: the local simulation tick
//! - `input`: keyboard steering
//! - `network`: the event loop
//! - `profile`: player name stored between runs
//! - `reconciler`: the shared player map
//! - `rendering`: frame composition and drawing
//! - `session`: per-peer connection lifecycle
//! - `signaling`: relay and in-process signaling transports
//! - `transport`: the seams between sessions and concrete connections

pub mod config;
pub mod direct;
pub mod error;
pub mod game;
pub mod input;
pub mod network;
pub mod profile;
pub mod reconciler;
pub mod rendering;
pub mod session;
pub mod signaling;
pub mod transport;
