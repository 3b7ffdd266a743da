use crate::buffer::ByteBuffer;
use crate::engine::{
    AuthorizationVerdict, EngineResult, EngineStatus, HandshakeStatus, ProtocolVersion, TlsEngine,
};
use crate::error::Error;
use crate::log::{debug, warn};
use crate::metrics::TransportMetrics;

use std::cmp;
use std::io;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};

use pki_types::CertificateDer;

/// Floor for the wrap/unwrap buffer allocations; the engine's record size
/// estimate raises it but never lowers it.
const INITIAL_BUFFER_SIZE: usize = 0x8000;

/// Stable per-instance tag used in log events.
static NEXT_SOCKET_ID: AtomicU64 = AtomicU64::new(1);

/// What the reactor must wait for before calling
/// [`TlsCryptoSocket::handshake`] again.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HandshakeResult {
    /// Wait for the transport to become readable.
    NeedRead,
    /// Wait for the transport to become writable.
    NeedWrite,
    /// Run [`TlsCryptoSocket::do_handshake_work`] (on any thread), then
    /// call [`TlsCryptoSocket::handshake`] again.
    NeedWork,
    /// The handshake is complete; the data path is open.
    Done,
}

/// Outcome of [`TlsCryptoSocket::flush`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FlushResult {
    /// All staged ciphertext reached the transport.
    Done,
    /// Ciphertext remains; retry when the transport is writable.
    NeedWrite,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum HandshakeState {
    NotStarted,
    NeedRead,
    NeedWrite,
    NeedWork,
    Completed,
}

/// Peer identity established by a completed handshake.
///
/// An empty certificate list means the session is valid but the peer is
/// unverified: a non-certificate cipher, or optional client authentication
/// the peer declined.
#[derive(Clone, Debug)]
pub struct SecurityContext {
    peer_certificates: Vec<CertificateDer<'static>>,
}

impl SecurityContext {
    fn new(peer_certificates: Vec<CertificateDer<'static>>) -> Self {
        Self { peer_certificates }
    }

    /// The peer's certificate chain, leaf first.  May be empty.
    pub fn peer_certificates(&self) -> &[CertificateDer<'static>] {
        &self.peer_certificates
    }
}

/// A non-blocking TLS adapter between a byte transport and a reactor.
///
/// The reactor drives the handshake by calling
/// [`handshake`](Self::handshake) whenever the transport readiness it was
/// told to wait for arrives, and afterwards moves cleartext with
/// [`read`](Self::read), [`write`](Self::write) and
/// [`flush`](Self::flush).  Every call performs at most one non-blocking
/// transport operation plus bounded engine work; zero-byte progress means
/// would-block and the reactor decides when to call again.
///
/// The adapter owns the engine and the staging buffers.  It treats the
/// transport as borrowed: it never shuts it down, and lends it out via
/// [`channel`](Self::channel) so the reactor can register it with its
/// poller.
pub struct TlsCryptoSocket<S, E> {
    channel: S,
    engine: E,
    id: u64,
    wrap_buffer: ByteBuffer,
    unwrap_buffer: ByteBuffer,
    packet_buffer_size: usize,
    application_buffer_size: usize,
    handshake_scratch: Option<Vec<u8>>,
    handshake_state: HandshakeState,
    authorization_verdict: Option<AuthorizationVerdict>,
}

impl<S, E> TlsCryptoSocket<S, E>
where
    S: Read + Write,
    E: TlsEngine,
{
    /// Wrap `channel` and `engine` into an adapter ready for its first
    /// [`handshake`](Self::handshake) call.
    ///
    /// In server mode TLS 1.3 is removed from the engine's enabled
    /// protocols; if nothing remains, construction fails with
    /// [`Error::InvalidConfiguration`].
    pub fn new(channel: S, mut engine: E) -> Result<Self, Error> {
        if !engine.is_client() {
            let filtered: Vec<ProtocolVersion> = engine
                .enabled_protocols()
                .into_iter()
                .filter(|protocol| *protocol != ProtocolVersion::TLSv1_3)
                .collect();
            if filtered.is_empty() {
                return Err(Error::InvalidConfiguration(
                    "TLSv1.3 is not supported in server mode".to_string(),
                ));
            }
            engine.set_enabled_protocols(&filtered);
        }

        let estimate = engine.session();
        let buffer_size = cmp::max(INITIAL_BUFFER_SIZE, estimate.packet_buffer_size);
        let id = NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed);
        debug!(
            "socket {}: initialized (client={}, wrap_buffer={}B, unwrap_buffer={}B)",
            id,
            engine.is_client(),
            buffer_size,
            buffer_size
        );

        Ok(Self {
            channel,
            id,
            wrap_buffer: ByteBuffer::with_capacity(buffer_size),
            unwrap_buffer: ByteBuffer::with_capacity(buffer_size),
            packet_buffer_size: estimate.packet_buffer_size,
            // handshake unwrap demands a full-size cleartext target even
            // though it must produce nothing
            handshake_scratch: Some(vec![0u8; estimate.application_buffer_size]),
            application_buffer_size: estimate.application_buffer_size,
            handshake_state: HandshakeState::NotStarted,
            authorization_verdict: None,
            engine,
        })
    }

    /// The underlying transport, for poller registration.
    pub fn channel(&self) -> &S {
        &self.channel
    }

    /// Mutable access to the underlying transport.
    pub fn channel_mut(&mut self) -> &mut S {
        &mut self.channel
    }

    /// Append externally pre-read bytes to the unwrap input, ahead of
    /// anything read from the transport afterwards.  Protocol-detection
    /// wrappers call this before the first [`handshake`](Self::handshake).
    pub fn inject_read_data(&mut self, data: &[u8]) {
        self.unwrap_buffer.inject(data);
    }

    /// Whether the handshake has completed and the data path is open.
    pub fn is_handshake_completed(&self) -> bool {
        self.handshake_state == HandshakeState::Completed
    }

    /// Advance the handshake by one non-blocking step.
    ///
    /// Returns what the reactor must wait for before calling again.
    /// Once [`HandshakeResult::Done`] has been returned, further calls
    /// return `Done` without side effects.
    pub fn handshake(&mut self) -> Result<HandshakeResult, Error> {
        let new_state = self.process_handshake_state()?;
        debug!(
            "socket {}: handshake state {:?} => {:?}",
            self.id, self.handshake_state, new_state
        );
        self.handshake_state = new_state;
        match new_state {
            HandshakeState::NeedRead => Ok(HandshakeResult::NeedRead),
            HandshakeState::NeedWrite => Ok(HandshakeResult::NeedWrite),
            HandshakeState::NeedWork => Ok(HandshakeResult::NeedWork),
            HandshakeState::Completed => Ok(HandshakeResult::Done),
            HandshakeState::NotStarted => Err(self.log_error(Error::InvariantViolation(
                "handshake step ended in the initial state".to_string(),
            ))),
        }
    }

    /// Run every pending delegated task on the current thread.
    ///
    /// Called after [`HandshakeResult::NeedWork`]; the caller picks the
    /// thread, but must not call anything else on this instance
    /// concurrently.
    pub fn do_handshake_work(&mut self) {
        while let Some(task) = self.engine.delegated_task() {
            task.run();
        }
    }

    fn process_handshake_state(&mut self) -> Result<HandshakeState, Error> {
        match self.advance_handshake() {
            Err(Error::HandshakeFailed(why)) => {
                // Peer-authorization rejections have their own counter.
                if self
                    .authorization_verdict
                    .as_ref()
                    .map_or(true, |verdict| verdict.succeeded)
                {
                    TransportMetrics::global().increment_tls_certificate_verification_failures();
                }
                Err(self.log_error(Error::HandshakeFailed(why)))
            }
            other => other,
        }
    }

    fn advance_handshake(&mut self) -> Result<HandshakeState, Error> {
        match self.handshake_state {
            HandshakeState::NotStarted => {
                debug!("socket {}: initiating handshake", self.id);
                self.engine.begin_handshake()?;
            }
            HandshakeState::NeedWrite => {
                self.channel_write()?;
            }
            HandshakeState::NeedRead => {
                self.channel_read()?;
            }
            HandshakeState::NeedWork => {
                if self.authorization_verdict.is_none() {
                    // only available during the handshake
                    if let Some(verdict) = self.engine.authorization_verdict() {
                        if !verdict.succeeded {
                            TransportMetrics::global().increment_peer_authorization_failures();
                        }
                        self.authorization_verdict = Some(verdict);
                    }
                }
            }
            HandshakeState::Completed => return Ok(HandshakeState::Completed),
        }

        loop {
            let handshake_status = self.engine.handshake_status();
            debug!(
                "socket {}: engine handshake status {:?}",
                self.id, handshake_status
            );
            match handshake_status {
                HandshakeStatus::NotHandshaking => {
                    if self.wrap_buffer.bytes() > 0 {
                        // trailing handshake bytes must reach the peer first
                        return Ok(HandshakeState::NeedWrite);
                    }
                    return Ok(self.commit_completion());
                }
                HandshakeStatus::NeedTask => return Ok(HandshakeState::NeedWork),
                HandshakeStatus::NeedUnwrap => {
                    if self.wrap_buffer.bytes() > 0 {
                        // the peer may be waiting for these bytes
                        return Ok(HandshakeState::NeedWrite);
                    }
                    if !self.handshake_unwrap()? {
                        return Ok(HandshakeState::NeedRead);
                    }
                }
                HandshakeStatus::NeedWrap => {
                    if !self.handshake_wrap()? {
                        return Ok(HandshakeState::NeedWrite);
                    }
                }
                status => {
                    return Err(self.log_error(Error::InvariantViolation(format!(
                        "unexpected handshake status: {:?}",
                        status
                    ))));
                }
            }
        }
    }

    fn commit_completion(&mut self) -> HandshakeState {
        self.engine.disable_session_creation(); // reject renegotiation
        self.handshake_scratch = None;
        let session = self.engine.session();
        self.application_buffer_size = session.application_buffer_size;
        self.packet_buffer_size = session.packet_buffer_size;
        debug!(
            "socket {}: handshake complete: protocol={:?}, cipher_suite={:?}",
            self.id, session.protocol, session.cipher_suite
        );
        if self.engine.is_client() {
            TransportMetrics::global().increment_client_tls_connections_established();
        } else {
            TransportMetrics::global().increment_server_tls_connections_established();
        }
        HandshakeState::Completed
    }

    /// Returns false when the wrap buffer must drain before the engine
    /// can emit the next flight.
    fn handshake_wrap(&mut self) -> Result<bool, Error> {
        let result = self.engine_wrap(&[])?;
        match result.status {
            EngineStatus::Ok => Ok(true),
            EngineStatus::BufferOverflow => {
                // the engine revised its record size estimate mid-handshake
                self.packet_buffer_size = self.engine.session().packet_buffer_size;
                Ok(false)
            }
            status => Err(self.unexpected_status(status)),
        }
    }

    /// Returns false when more ciphertext must arrive before the engine
    /// can make progress.
    fn handshake_unwrap(&mut self) -> Result<bool, Error> {
        let mut scratch = match self.handshake_scratch.take() {
            Some(scratch) => scratch,
            None => {
                return Err(self.log_error(Error::InvariantViolation(
                    "handshake scratch buffer already released".to_string(),
                )));
            }
        };
        let result = self.engine_unwrap(&mut scratch);
        self.handshake_scratch = Some(scratch);

        let result = result?;
        match result.status {
            EngineStatus::Ok => {
                if result.bytes_produced > 0 {
                    return Err(self.log_error(Error::UnexpectedProtocolData));
                }
                Ok(true)
            }
            EngineStatus::BufferUnderflow => Ok(false),
            status => Err(self.unexpected_status(status)),
        }
    }

    /// Smallest cleartext buffer [`read`](Self::read) accepts while still
    /// guaranteeing progress: one record may decrypt to this many bytes.
    pub fn min_read_buffer(&self) -> usize {
        self.application_buffer_size
    }

    /// Read decrypted cleartext into `dst`.
    ///
    /// Drains already-buffered ciphertext first; performs at most one
    /// transport read.  Returns 0 when the transport would block or a
    /// full record has not arrived yet.
    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize, Error> {
        self.verify_handshake_completed()?;
        let unwrapped = self.drain(dst)?;
        if unwrapped > 0 {
            return Ok(unwrapped);
        }

        if self.channel_read()? == 0 {
            return Ok(0);
        }
        self.drain(dst)
    }

    /// Decrypt as much already-received ciphertext into `dst` as fits,
    /// without touching the transport.
    pub fn drain(&mut self, dst: &mut [u8]) -> Result<usize, Error> {
        self.verify_handshake_completed()?;
        let mut total = 0;
        loop {
            let unwrapped = self.application_data_unwrap(&mut dst[total..])?;
            total += unwrapped;
            if unwrapped == 0 {
                return Ok(total);
            }
        }
    }

    /// Encrypt a prefix of `src`, returning how many cleartext bytes were
    /// consumed.
    ///
    /// Returns 0 without consuming anything while previously staged
    /// ciphertext is still waiting for the transport: the caller must
    /// wait for writability and retry.  Staged ciphertext is bounded to
    /// roughly one record beyond the engine's packet size per call so the
    /// reactor gets a chance to drain between calls.
    pub fn write(&mut self, src: &[u8]) -> Result<usize, Error> {
        self.verify_handshake_completed()?;
        if self.flush()? == FlushResult::NeedWrite {
            return Ok(0);
        }

        let mut total = 0;
        loop {
            let wrapped = self.application_data_wrap(&src[total..])?;
            total += wrapped;
            if wrapped == 0 || self.wrap_buffer.bytes() >= self.packet_buffer_size {
                return Ok(total);
            }
        }
    }

    /// Push staged ciphertext to the transport with one non-blocking
    /// write.  [`FlushResult::Done`] means nothing remains staged.
    pub fn flush(&mut self) -> Result<FlushResult, Error> {
        self.verify_handshake_completed()?;
        self.channel_write()?;
        Ok(match self.wrap_buffer.bytes() {
            0 => FlushResult::Done,
            _ => FlushResult::NeedWrite,
        })
    }

    /// The peer identity, once the handshake has completed.
    ///
    /// `None` before completion.  After completion the context's
    /// certificate list is empty when the peer is unverified.
    pub fn security_context(&self) -> Option<SecurityContext> {
        if self.handshake_state != HandshakeState::Completed {
            return None;
        }
        let peer_certificates = self
            .engine
            .session()
            .peer_certificates
            .unwrap_or_default();
        Some(SecurityContext::new(peer_certificates))
    }

    fn application_data_wrap(&mut self, src: &[u8]) -> Result<usize, Error> {
        let result = self.engine_wrap(src)?;
        match result.status {
            EngineStatus::Ok => Ok(result.bytes_consumed),
            EngineStatus::BufferOverflow => Ok(0),
            status => Err(self.unexpected_status(status)),
        }
    }

    fn application_data_unwrap(&mut self, dst: &mut [u8]) -> Result<usize, Error> {
        let result = self.engine_unwrap(dst)?;
        match result.status {
            EngineStatus::Ok => Ok(result.bytes_produced),
            EngineStatus::BufferOverflow | EngineStatus::BufferUnderflow => Ok(0),
            status => Err(self.unexpected_status(status)),
        }
    }

    fn engine_wrap(&mut self, src: &[u8]) -> Result<EngineResult, Error> {
        let min = self.packet_buffer_size;
        let result = {
            let dst = self.wrap_buffer.writable(min);
            self.engine.wrap(src, dst)
        };
        let result = match result {
            Ok(result) => result,
            Err(err) => return Err(self.log_error(Error::from(err))),
        };
        debug!(
            "socket {}: engine wrap: status={:?}, consumed={}, produced={}",
            self.id, result.status, result.bytes_consumed, result.bytes_produced
        );
        if result.status == EngineStatus::Closed {
            return Err(self.log_error(Error::ClosedChannel));
        }
        self.wrap_buffer.advance_write(result.bytes_produced);
        Ok(result)
    }

    fn engine_unwrap(&mut self, dst: &mut [u8]) -> Result<EngineResult, Error> {
        let result = self
            .engine
            .unwrap(self.unwrap_buffer.readable(), dst);
        let result = match result {
            Ok(result) => result,
            Err(err) => return Err(self.log_error(Error::from(err))),
        };
        debug!(
            "socket {}: engine unwrap: status={:?}, consumed={}, produced={}",
            self.id, result.status, result.bytes_consumed, result.bytes_produced
        );
        if result.status == EngineStatus::Closed {
            return Err(self.log_error(Error::ClosedChannel));
        }
        self.unwrap_buffer
            .advance_read(result.bytes_consumed);
        Ok(result)
    }

    /// One non-blocking transport read into the unwrap buffer.  0 means
    /// would-block; EOF is a closed channel.
    fn channel_read(&mut self) -> Result<usize, Error> {
        let min = self.packet_buffer_size;
        let read = {
            let writable = self.unwrap_buffer.writable(min);
            match self.channel.read(writable) {
                Ok(0) => None,
                Ok(read) => Some(read),
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => Some(0),
                Err(err) => return Err(self.log_error(Error::Io(err))),
            }
        };
        let read = match read {
            Some(read) => read,
            None => return Err(self.log_error(Error::ClosedChannel)),
        };
        debug!("socket {}: channel read {}B", self.id, read);
        self.unwrap_buffer.advance_write(read);
        Ok(read)
    }

    /// One non-blocking transport write from the wrap buffer.  0 means
    /// would-block.
    fn channel_write(&mut self) -> Result<usize, Error> {
        let written = match self.channel.write(self.wrap_buffer.readable()) {
            Ok(written) => written,
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => 0,
            Err(err) => return Err(self.log_error(Error::Io(err))),
        };
        debug!("socket {}: channel write {}B", self.id, written);
        self.wrap_buffer.advance_read(written);
        Ok(written)
    }

    fn verify_handshake_completed(&self) -> Result<(), Error> {
        match self.handshake_state {
            HandshakeState::Completed => Ok(()),
            _ => Err(self.log_error(Error::HandshakeIncomplete)),
        }
    }

    fn unexpected_status(&self, status: EngineStatus) -> Error {
        self.log_error(Error::InvariantViolation(format!(
            "unexpected engine status: {:?}",
            status
        )))
    }

    fn log_error(&self, err: Error) -> Error {
        warn!("socket {}: {}", self.id, err);
        err
    }
}
