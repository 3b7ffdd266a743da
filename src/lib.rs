//! # crypto-socket - a non-blocking TLS framing adapter
//!
//! This crate bridges a byte-oriented full-duplex transport (typically a
//! connected, non-blocking socket) to an event-loop consumer that reads
//! and writes cleartext.  It owns the intermediate wrap/unwrap buffers
//! and the hand-off protocol by which a single-threaded reactor drives
//! handshake progress, cleartext reads, cleartext writes and flushes
//! without ever blocking on IO.
//!
//! ## crypto-socket does not implement TLS
//!
//! The protocol state machine lives behind the [`TlsEngine`] trait:
//! an engine converts cleartext to ciphertext (`wrap`) and back
//! (`unwrap`), and reports what it needs next through its handshake
//! status.  Engine construction -- certificate loading, trust stores,
//! cipher selection -- happens before an engine reaches this crate.
//!
//! ```text
//!       Transport                                  Cleartext
//!       =========                                  =========
//!                      +----------------------+
//!       socket ------->|                      |------> read() / drain()
//!                      |    TlsCryptoSocket   |
//!       socket <-------|                      |<------ write() / flush()
//!                      +----------------------+
//!                          handshake() drives
//!                          the TlsEngine inside
//! ```
//!
//! ## Driving a connection
//!
//! Every operation is one non-blocking step.  [`TlsCryptoSocket::handshake`]
//! returns what the reactor must wait for (`NeedRead`, `NeedWrite`,
//! `NeedWork`) before calling it again; once it returns `Done` the data
//! path opens.  Zero bytes from [`TlsCryptoSocket::read`] or
//! [`TlsCryptoSocket::write`] means would-block: retry when the
//! transport readiness changes.  Callers with a blocking transport and
//! no reactor can use [`Stream`] instead.
//!
//! An instance is single-threaded: all methods take `&mut self` and
//! assume exclusive access.  Only [`TlsCryptoSocket::do_handshake_work`]
//! is intended to be handed to a worker thread, and even that must not
//! overlap other calls on the same instance.
//!
//! ## Non-goals
//!
//! No renegotiation after the initial handshake (session creation is
//! disabled at completion), no TLS 1.3 in server mode, and no internal
//! retry of blocked IO -- the reactor decides when to call again.

// Require docs for public APIs, deny unsafe code, etc.
#![forbid(unsafe_code, unused_must_use)]
#![warn(
    elided_lifetimes_in_paths,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unused_import_braces,
    unused_extern_crates,
    unused_qualifications
)]
// single_component_path_imports: our top-level `use log` import causes
// a false positive, https://github.com/rust-lang/rust-clippy/issues/5210
#![allow(clippy::single_component_path_imports)]

// log for logging (optional).
#[cfg(feature = "logging")]
use log;

#[cfg(not(feature = "logging"))]
mod log {
    macro_rules! debug    ( ($($tt:tt)*) => {{}} );
    macro_rules! _warn    ( ($($tt:tt)*) => {{}} );
    pub(crate) use {_warn as warn, debug};
}

mod buffer;
mod conn;
mod engine;
mod error;
mod metrics;
mod stream;

pub use crate::conn::{FlushResult, HandshakeResult, SecurityContext, TlsCryptoSocket};
pub use crate::engine::{
    AuthorizationVerdict, DelegatedTask, EngineError, EngineResult, EngineStatus, HandshakeStatus,
    ProtocolVersion, SessionInfo, TlsEngine,
};
pub use crate::error::Error;
pub use crate::metrics::{MetricsSnapshot, TransportMetrics};
pub use crate::stream::Stream;

// Re-export the certificate types used by `SecurityContext`.
pub use pki_types;
