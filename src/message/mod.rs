//! This module exports a minimal message-passing API, which is encapsulated
//! by a `Communicator` trait. Implementors only need to write `send` and
//! `recv` operations for a given transport layer; an in-process transport
//! (ranks as threads) and a pure-Rust TCP transport are included. The
//! `Mailbox` sits on top of any transport: it adds message tags, matched
//! receives, and the broadcast, reduce, and all-reduce collectives.
//!

mod backoff;
pub mod channel;
pub mod comm;
pub mod mailbox;
pub mod tcp;
pub mod util;
