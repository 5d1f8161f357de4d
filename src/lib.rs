//! voxnote: self-hosted voice dictation.
//!
//! The crate has two halves. The server side (`server`, `stt`,
//! `correction`, `merge`, `store`, `auth`) exposes an HTTP API that
//! transcribes chunked audio uploads, applies per-user dictionary
//! corrections, merges partial transcripts, and persists the final
//! text. The client side (`capture`, `session`) records from the
//! microphone, slices the stream into five-second segments, and
//! drives the incremental transcribe protocol against the server.

pub mod auth;
pub mod capture;
pub mod config;
pub mod correction;
pub mod error;
pub mod merge;
pub mod server;
pub mod session;
pub mod store;
pub mod stt;
