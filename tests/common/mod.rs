#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::cmp;
use std::collections::VecDeque;
use std::io;
use std::io::{Read, Write};
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use crypto_socket::pki_types::CertificateDer;
use crypto_socket::{
    AuthorizationVerdict, DelegatedTask, EngineError, EngineResult, EngineStatus, HandshakeResult,
    HandshakeStatus, ProtocolVersion, SessionInfo, TlsCryptoSocket, TlsEngine,
};

pub fn init_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .try_init();
}

/// Framing overhead of the fake record codec: type byte plus a 16-bit
/// length.
pub const FRAME_HEADER: usize = 3;

/// Largest cleartext one fake record carries.
pub const MAX_PLAIN: usize = 256;

const DEFAULT_APPLICATION_BUFFER_SIZE: usize = MAX_PLAIN;
const DEFAULT_PACKET_BUFFER_SIZE: usize = 300;

/// One step of a scripted handshake, in engine order.
#[derive(Clone, Debug)]
pub enum ScriptStep {
    /// Report `NeedWrap`; the next wrap emits this many bytes.
    Wrap(usize),
    /// Report `NeedWrap`; the next wrap reports a too-small target and
    /// revises the packet size estimate.
    WrapOverflow { packet_buffer_size: usize },
    /// Report `NeedWrap`; the next wrap fails with this diagnostic.
    WrapFails(&'static str),
    /// Report `NeedWrap`; the next wrap reports the engine closed.
    WrapClosed,
    /// Report `NeedUnwrap`; the next unwrap consumes this many bytes
    /// (underflowing until they have arrived).
    Unwrap(usize),
    /// Report `NeedUnwrap`; the next unwrap misbehaves by producing
    /// cleartext during the handshake.
    UnwrapProducing { consume: usize, produce: usize },
    /// Report `NeedTask` until the dispensed task has been run.
    Task,
}

struct EngineState {
    client: bool,
    script: VecDeque<ScriptStep>,
    began: bool,
    task_dispensed: bool,
    session_creation_disabled: bool,
    enabled_protocols: Vec<ProtocolVersion>,
    verdict: Option<AuthorizationVerdict>,
    peer_certificates: Option<Vec<CertificateDer<'static>>>,
    application_buffer_size: usize,
    packet_buffer_size: usize,
    /// Every byte the engine consumed through unwrap, in arrival order.
    unwrap_input: Vec<u8>,
}

impl EngineState {
    fn handshaking(&self) -> bool {
        !self.script.is_empty()
    }
}

/// A `TlsEngine` that follows a fixed handshake script, then protects
/// traffic with a toy frame codec (header plus cleartext, no actual
/// cryptography).  Clones share state, so tests can keep one as an
/// inspection handle after moving the other into an adapter.
#[derive(Clone)]
pub struct ScriptedEngine {
    state: Arc<Mutex<EngineState>>,
}

impl ScriptedEngine {
    pub fn new(client: bool, script: Vec<ScriptStep>) -> Self {
        Self {
            state: Arc::new(Mutex::new(EngineState {
                client,
                script: script.into(),
                began: false,
                task_dispensed: false,
                session_creation_disabled: false,
                enabled_protocols: vec![ProtocolVersion::TLSv1_2, ProtocolVersion::TLSv1_3],
                verdict: None,
                peer_certificates: None,
                application_buffer_size: DEFAULT_APPLICATION_BUFFER_SIZE,
                packet_buffer_size: DEFAULT_PACKET_BUFFER_SIZE,
                unwrap_input: Vec::new(),
            })),
        }
    }

    /// An engine whose handshake completes on the first call, for tests
    /// that only exercise the data path.
    pub fn completed(client: bool) -> Self {
        Self::new(client, vec![])
    }

    pub fn with_enabled_protocols(self, protocols: &[ProtocolVersion]) -> Self {
        self.state.lock().unwrap().enabled_protocols = protocols.to_vec();
        self
    }

    pub fn with_verdict(self, verdict: AuthorizationVerdict) -> Self {
        self.state.lock().unwrap().verdict = Some(verdict);
        self
    }

    pub fn with_peer_certificates(self, certificates: Vec<CertificateDer<'static>>) -> Self {
        self.state.lock().unwrap().peer_certificates = Some(certificates);
        self
    }

    pub fn with_buffer_sizes(self, application: usize, packet: usize) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.application_buffer_size = application;
            state.packet_buffer_size = packet;
        }
        self
    }

    // --- inspection, for use through a retained clone ---

    pub fn session_creation_disabled(&self) -> bool {
        self.state
            .lock()
            .unwrap()
            .session_creation_disabled
    }

    pub fn enabled_protocol_list(&self) -> Vec<ProtocolVersion> {
        self.state
            .lock()
            .unwrap()
            .enabled_protocols
            .clone()
    }

    pub fn unwrap_input(&self) -> Vec<u8> {
        self.state.lock().unwrap().unwrap_input.clone()
    }

    pub fn steps_remaining(&self) -> usize {
        self.state.lock().unwrap().script.len()
    }
}

impl TlsEngine for ScriptedEngine {
    fn begin_handshake(&mut self) -> Result<(), EngineError> {
        self.state.lock().unwrap().began = true;
        Ok(())
    }

    fn wrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, EngineError> {
        let mut state = self.state.lock().unwrap();
        if state.handshaking() {
            let step = state.script.front().cloned();
            return match step {
                Some(ScriptStep::Wrap(emit)) => {
                    assert!(dst.len() >= emit, "wrap target too small for script");
                    dst[..emit].fill(0u8);
                    state.script.pop_front();
                    Ok(EngineResult::ok(0, emit))
                }
                Some(ScriptStep::WrapOverflow { packet_buffer_size }) => {
                    state.packet_buffer_size = packet_buffer_size;
                    state.script.pop_front();
                    Ok(EngineResult::empty(EngineStatus::BufferOverflow))
                }
                Some(ScriptStep::WrapFails(why)) => {
                    state.script.pop_front();
                    Err(EngineError::new(why))
                }
                Some(ScriptStep::WrapClosed) => Ok(EngineResult::empty(EngineStatus::Closed)),
                step => panic!("unexpected wrap call during script step {:?}", step),
            };
        }

        // traffic: frame up to MAX_PLAIN cleartext bytes per record
        if src.is_empty() {
            return Ok(EngineResult::ok(0, 0));
        }
        let chunk = cmp::min(src.len(), MAX_PLAIN);
        let need = chunk + FRAME_HEADER;
        if dst.len() < need {
            return Ok(EngineResult::empty(EngineStatus::BufferOverflow));
        }
        dst[0] = 0x17;
        dst[1..FRAME_HEADER].copy_from_slice(&(chunk as u16).to_be_bytes());
        dst[FRAME_HEADER..need].copy_from_slice(&src[..chunk]);
        Ok(EngineResult::ok(chunk, need))
    }

    fn unwrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, EngineError> {
        let mut state = self.state.lock().unwrap();
        if state.handshaking() {
            let step = state.script.front().cloned();
            return match step {
                Some(ScriptStep::Unwrap(expect)) => {
                    if src.len() < expect {
                        return Ok(EngineResult::empty(EngineStatus::BufferUnderflow));
                    }
                    state
                        .unwrap_input
                        .extend_from_slice(&src[..expect]);
                    state.script.pop_front();
                    Ok(EngineResult::ok(expect, 0))
                }
                Some(ScriptStep::UnwrapProducing { consume, produce }) => {
                    if src.len() < consume {
                        return Ok(EngineResult::empty(EngineStatus::BufferUnderflow));
                    }
                    assert!(dst.len() >= produce);
                    dst[..produce].fill(0u8);
                    state.script.pop_front();
                    Ok(EngineResult {
                        status: EngineStatus::Ok,
                        bytes_consumed: consume,
                        bytes_produced: produce,
                    })
                }
                step => panic!("unexpected unwrap call during script step {:?}", step),
            };
        }

        // traffic: decode one frame
        if src.len() < FRAME_HEADER {
            return Ok(EngineResult::empty(EngineStatus::BufferUnderflow));
        }
        assert_eq!(src[0], 0x17, "corrupt frame header");
        let len = u16::from_be_bytes([src[1], src[2]]) as usize;
        if src.len() < FRAME_HEADER + len {
            return Ok(EngineResult::empty(EngineStatus::BufferUnderflow));
        }
        if dst.len() < len {
            return Ok(EngineResult::empty(EngineStatus::BufferOverflow));
        }
        dst[..len].copy_from_slice(&src[FRAME_HEADER..FRAME_HEADER + len]);
        state
            .unwrap_input
            .extend_from_slice(&src[..FRAME_HEADER + len]);
        Ok(EngineResult::ok(FRAME_HEADER + len, len))
    }

    fn handshake_status(&self) -> HandshakeStatus {
        let state = self.state.lock().unwrap();
        match state.script.front() {
            None => HandshakeStatus::NotHandshaking,
            Some(ScriptStep::Task) => HandshakeStatus::NeedTask,
            Some(ScriptStep::Wrap(_))
            | Some(ScriptStep::WrapOverflow { .. })
            | Some(ScriptStep::WrapFails(_))
            | Some(ScriptStep::WrapClosed) => HandshakeStatus::NeedWrap,
            Some(ScriptStep::Unwrap(_)) | Some(ScriptStep::UnwrapProducing { .. }) => {
                HandshakeStatus::NeedUnwrap
            }
        }
    }

    fn delegated_task(&mut self) -> Option<DelegatedTask> {
        let mut state = self.state.lock().unwrap();
        match state.script.front() {
            Some(ScriptStep::Task) if !state.task_dispensed => {
                state.task_dispensed = true;
                let shared = Arc::clone(&self.state);
                Some(DelegatedTask::new(move || {
                    let mut state = shared.lock().unwrap();
                    assert!(matches!(state.script.front(), Some(ScriptStep::Task)));
                    state.script.pop_front();
                    state.task_dispensed = false;
                }))
            }
            _ => None,
        }
    }

    fn session(&self) -> SessionInfo {
        let state = self.state.lock().unwrap();
        let completed = state.began && !state.handshaking();
        SessionInfo {
            application_buffer_size: state.application_buffer_size,
            packet_buffer_size: state.packet_buffer_size,
            protocol: completed.then_some(ProtocolVersion::TLSv1_2),
            cipher_suite: completed.then(|| "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256".to_string()),
            peer_certificates: state.peer_certificates.clone(),
        }
    }

    fn disable_session_creation(&mut self) {
        self.state
            .lock()
            .unwrap()
            .session_creation_disabled = true;
    }

    fn is_client(&self) -> bool {
        self.state.lock().unwrap().client
    }

    fn authorization_verdict(&mut self) -> Option<AuthorizationVerdict> {
        self.state.lock().unwrap().verdict.clone()
    }

    fn enabled_protocols(&self) -> Vec<ProtocolVersion> {
        self.state
            .lock()
            .unwrap()
            .enabled_protocols
            .clone()
    }

    fn set_enabled_protocols(&mut self, protocols: &[ProtocolVersion]) {
        self.state.lock().unwrap().enabled_protocols = protocols.to_vec();
    }
}

struct Pipe {
    queue: VecDeque<u8>,
    closed: bool,
}

/// One end of an in-memory, non-blocking duplex byte channel.
///
/// Reads report would-block while the peer's queue is empty and EOF once
/// the peer has shut down.  Writes can be suspended to simulate a full
/// kernel send buffer.
pub struct LoopbackChannel {
    rx: Rc<RefCell<Pipe>>,
    tx: Rc<RefCell<Pipe>>,
    writable: Rc<Cell<bool>>,
}

impl LoopbackChannel {
    pub fn pair() -> (Self, Self) {
        let here = Rc::new(RefCell::new(Pipe {
            queue: VecDeque::new(),
            closed: false,
        }));
        let there = Rc::new(RefCell::new(Pipe {
            queue: VecDeque::new(),
            closed: false,
        }));
        let left = Self {
            rx: Rc::clone(&here),
            tx: Rc::clone(&there),
            writable: Rc::new(Cell::new(true)),
        };
        let right = Self {
            rx: there,
            tx: here,
            writable: Rc::new(Cell::new(true)),
        };
        (left, right)
    }

    /// A handle that suspends and resumes this end's writes.
    pub fn writability(&self) -> Rc<Cell<bool>> {
        Rc::clone(&self.writable)
    }

    /// Bytes queued towards the peer but not yet read by it.
    pub fn pending_to_peer(&self) -> usize {
        self.tx.borrow().queue.len()
    }

    /// Orderly shutdown: the peer drains what is queued, then sees EOF.
    pub fn shutdown(&self) {
        self.tx.borrow_mut().closed = true;
    }

    /// Push raw bytes towards this end, as if the peer had written them.
    pub fn feed(&self, bytes: &[u8]) {
        self.rx
            .borrow_mut()
            .queue
            .extend(bytes.iter().copied());
    }
}

impl Read for LoopbackChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut pipe = self.rx.borrow_mut();
        if pipe.queue.is_empty() {
            if pipe.closed {
                return Ok(0);
            }
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let mut read = 0;
        while read < buf.len() {
            match pipe.queue.pop_front() {
                Some(byte) => {
                    buf[read] = byte;
                    read += 1;
                }
                None => break,
            }
        }
        Ok(read)
    }
}

impl Write for LoopbackChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.writable.get() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        self.tx
            .borrow_mut()
            .queue
            .extend(buf.iter().copied());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub type TestSocket = TlsCryptoSocket<LoopbackChannel, ScriptedEngine>;

/// Drive two adapters' handshakes against each other until both report
/// `Done`, running delegated work inline.  Panics if the pair stops
/// making progress.
pub fn complete_handshakes(left: &mut TestSocket, right: &mut TestSocket) {
    for _ in 0..100 {
        let mut done = true;
        for sock in [&mut *left, &mut *right] {
            if sock.is_handshake_completed() {
                continue;
            }
            match sock.handshake().expect("handshake failed") {
                HandshakeResult::NeedWork => sock.do_handshake_work(),
                HandshakeResult::Done => {}
                HandshakeResult::NeedRead | HandshakeResult::NeedWrite => done = false,
            }
        }
        if done && left.is_handshake_completed() && right.is_handshake_completed() {
            return;
        }
    }
    panic!("handshake pair made no progress");
}
