//! Stateless gRPC-to-legacy-broker message proxy.
//!
//! This crate is the host binary's library half: it turns the engines in
//! `proxy-core` and the wire shapes in `proxy-proto` into two runnable gRPC
//! services (protocol revisions 1 and 2). `proxy-core` never depends on
//! `tonic` or any proto type; everything that bridges the two lives here,
//! under [`activities`].

pub mod activities;
pub mod bootstrap;
pub mod seams;
