//! # Chess Server Library
//!
//! The server half of a multi-user online chess service: a long-running
//! daemon that speaks a JSON protocol over hand-framed WebSocket
//! connections, authenticates users against Postgres, keeps identities
//! alive across reconnects via opaque session tokens, arbitrates
//! challenges and live games, and settles finished games back into the
//! store.
//!
//! ## Module Organization
//!
//! - [`websocket`] — upgrade handshake and frame codec over raw byte
//!   streams (fragmentation, control frames, masking, size caps).
//! - [`db`] — narrow repositories over the relational store for users,
//!   finished games and active sessions; failures become logged sentinels.
//! - [`session`] — process-wide session registry: a write-through cache of
//!   session tokens with a socket↔session↔user index and a timeout sweep.
//! - [`matches`] — process-wide match registry: pending challenges, live
//!   games with their rule engines, broadcast fan-out and settlement.
//! - [`ai`] — the optional adversary, an alpha-beta search over the rule
//!   engine.
//! - [`dispatcher`] — per-connection stateless router from decoded
//!   requests to the registries and repositories.
//! - [`net`] — the acceptor and per-client worker gluing it all together.
//! - [`config`] — `.env` database configuration.
//!
//! ## Concurrency Model
//!
//! One tokio task per connection plus an acceptor and a session-cleanup
//! worker. The two registries each guard their maps with a single coarse
//! mutex; a task holds at most one of them at a time, and never across a
//! socket write, a database call, or the broadcast callback.

pub mod ai;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod matches;
pub mod net;
pub mod session;
pub mod websocket;
