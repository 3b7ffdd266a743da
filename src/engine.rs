use std::fmt;

use pki_types::CertificateDer;

/// The engine seam: everything [`TlsCryptoSocket`] needs from a concrete
/// TLS implementation.
///
/// Implementations hold the whole protocol state machine -- record
/// protection, handshake message handling, certificate processing -- and
/// never touch the transport.  The adapter moves ciphertext between the
/// engine and the transport and drives the handshake by inspecting
/// [`TlsEngine::handshake_status`] after every call.
///
/// Engine construction (certificate loading, trust stores, cipher
/// selection) happens before an engine reaches this trait.
///
/// [`TlsCryptoSocket`]: crate::TlsCryptoSocket
pub trait TlsEngine {
    /// Initiate the protocol.  Called once, on the first
    /// [`TlsCryptoSocket::handshake`] invocation.
    ///
    /// [`TlsCryptoSocket::handshake`]: crate::TlsCryptoSocket::handshake
    fn begin_handshake(&mut self) -> Result<(), EngineError>;

    /// Encrypt cleartext from `src` into `dst`, returning how many bytes
    /// were consumed and produced.  `src` is empty during the handshake.
    ///
    /// Wrap never reports [`EngineStatus::BufferUnderflow`].
    fn wrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, EngineError>;

    /// Decrypt ciphertext from `src` into `dst`, returning how many bytes
    /// were consumed and produced.
    fn unwrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, EngineError>;

    /// What the engine needs next to make handshake progress.
    fn handshake_status(&self) -> HandshakeStatus;

    /// Take one pending CPU-bound task, if any.  The caller chooses the
    /// thread it runs on; a failed task surfaces as an [`EngineError`]
    /// from a later engine call.
    fn delegated_task(&mut self) -> Option<DelegatedTask>;

    /// Current session parameters.  Before the handshake completes this
    /// returns the engine's provisional estimate, which is good enough
    /// for buffer sizing and is re-queried on handshake buffer overflow.
    fn session(&self) -> SessionInfo;

    /// Forbid the engine from creating or reusing sessions from now on.
    /// Called once at handshake completion to reject renegotiation.
    fn disable_session_creation(&mut self);

    /// Whether this engine was configured as the connecting side.
    fn is_client(&self) -> bool;

    /// The peer authorizer's result, if it has produced one.  Only
    /// meaningful during the handshake; the verdict must be observable
    /// before the engine fails the handshake over a rejection.
    fn authorization_verdict(&mut self) -> Option<AuthorizationVerdict>;

    /// The protocol versions the engine will negotiate.
    fn enabled_protocols(&self) -> Vec<ProtocolVersion>;

    /// Restrict the engine to `protocols`.  Used by server-mode
    /// construction to remove TLS 1.3.
    fn set_enabled_protocols(&mut self, protocols: &[ProtocolVersion]);
}

/// An error raised inside the engine, carrying its diagnostic.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EngineError(String);

impl EngineError {
    /// Wrap an engine diagnostic.
    pub fn new(diagnostic: impl Into<String>) -> Self {
        Self(diagnostic.into())
    }

    /// The diagnostic text.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for EngineError {}

/// Outcome of a single wrap or unwrap call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EngineResult {
    /// Whether the operation ran, and if not, which buffer stopped it.
    pub status: EngineStatus,
    /// Bytes taken from `src`.
    pub bytes_consumed: usize,
    /// Bytes placed into `dst`.
    pub bytes_produced: usize,
}

impl EngineResult {
    /// An `Ok`-status result with the given byte counts.
    pub fn ok(bytes_consumed: usize, bytes_produced: usize) -> Self {
        Self {
            status: EngineStatus::Ok,
            bytes_consumed,
            bytes_produced,
        }
    }

    /// A result that consumed and produced nothing.
    pub fn empty(status: EngineStatus) -> Self {
        Self {
            status,
            bytes_consumed: 0,
            bytes_produced: 0,
        }
    }
}

/// Buffer-pressure outcome of a wrap or unwrap.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EngineStatus {
    /// The operation completed.
    Ok,
    /// `dst` is too small for the record the engine wants to emit.
    BufferOverflow,
    /// `src` does not hold a complete record yet.
    BufferUnderflow,
    /// The engine is closed; no further records will flow.
    Closed,
}

/// What the engine needs next during the handshake.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HandshakeStatus {
    /// No handshake in progress (not yet begun, or already finished).
    NotHandshaking,
    /// A delegated task must run before the handshake can continue.
    NeedTask,
    /// The engine has handshake bytes to emit via wrap.
    NeedWrap,
    /// The engine needs peer handshake bytes via unwrap.
    NeedUnwrap,
    /// The handshake just finished with this engine call.
    Finished,
}

/// A CPU-bound unit of engine work, such as certificate chain
/// validation, that the caller may run off the reactor thread.
pub struct DelegatedTask(Box<dyn FnOnce() + Send>);

impl DelegatedTask {
    /// Package `work` for later execution.
    pub fn new(work: impl FnOnce() + Send + 'static) -> Self {
        Self(Box::new(work))
    }

    /// Execute the task on the current thread.
    pub fn run(self) {
        (self.0)()
    }
}

impl fmt::Debug for DelegatedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DelegatedTask")
    }
}

/// The peer authorizer's decision, produced mid-handshake.
///
/// Captured at most once per session and never mutated afterwards; read
/// again only when classifying a handshake failure.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AuthorizationVerdict {
    /// Whether the peer was authorized.
    pub succeeded: bool,
    /// Authorizer-specific detail, for diagnostics only.
    pub details: String,
}

/// Session parameters and metadata reported by the engine.
#[derive(Clone, Debug)]
pub struct SessionInfo {
    /// Largest cleartext one record can decrypt to.  Callers must offer
    /// read buffers at least this large.
    pub application_buffer_size: usize,
    /// Largest ciphertext the engine may emit for one record.
    pub packet_buffer_size: usize,
    /// Negotiated protocol version, once known.
    pub protocol: Option<ProtocolVersion>,
    /// Negotiated cipher suite, once known.
    pub cipher_suite: Option<String>,
    /// The peer's certificate chain, leaf first.  `None` when the peer
    /// is unverified (anonymous cipher, or optional client auth with no
    /// certificate presented).
    pub peer_certificates: Option<Vec<CertificateDer<'static>>>,
}

#[allow(non_camel_case_types)]
/// TLS protocol versions the adapter knows about.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProtocolVersion {
    /// TLS 1.2
    TLSv1_2,
    /// TLS 1.3
    TLSv1_3,
}

impl ProtocolVersion {
    /// The conventional protocol name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TLSv1_2 => "TLSv1.2",
            Self::TLSv1_3 => "TLSv1.3",
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
