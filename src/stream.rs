use crate::conn::{FlushResult, HandshakeResult, TlsCryptoSocket};
use crate::engine::TlsEngine;
use crate::error::Error;

use std::io;
use std::io::{Read, Write};

/// This type implements [`io::Read`] and [`io::Write`] over a
/// [`TlsCryptoSocket`] whose transport blocks, for callers that have no
/// reactor.
///
/// The first read, write or flush drives the handshake to completion.
/// With a blocking transport every `NeedRead`/`NeedWrite` step makes
/// progress inside [`TlsCryptoSocket::handshake`] itself, so driving it
/// is a plain loop; delegated tasks are run inline.
///
/// Read buffers must be at least [`TlsCryptoSocket::min_read_buffer`]
/// bytes, or reads may never make progress.
pub struct Stream<S, E> {
    conn: TlsCryptoSocket<S, E>,
}

impl<S, E> Stream<S, E>
where
    S: Read + Write,
    E: TlsEngine,
{
    /// Wrap `conn`.  This does no IO.
    pub fn new(conn: TlsCryptoSocket<S, E>) -> Self {
        Self { conn }
    }

    /// The wrapped adapter.
    pub fn get_ref(&self) -> &TlsCryptoSocket<S, E> {
        &self.conn
    }

    /// Recover the wrapped adapter.
    pub fn into_inner(self) -> TlsCryptoSocket<S, E> {
        self.conn
    }

    fn complete_handshake(&mut self) -> io::Result<()> {
        while !self.conn.is_handshake_completed() {
            match self.conn.handshake()? {
                HandshakeResult::Done => break,
                HandshakeResult::NeedWork => self.conn.do_handshake_work(),
                HandshakeResult::NeedRead | HandshakeResult::NeedWrite => {}
            }
        }
        Ok(())
    }
}

impl<S, E> Read for Stream<S, E>
where
    S: Read + Write,
    E: TlsEngine,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.complete_handshake()?;

        // A single adapter read may consume only a partial record from
        // the transport; keep going until a full record decrypts.  A
        // clean peer close surfaces as EOF here.
        loop {
            match self.conn.read(buf) {
                Ok(0) if !buf.is_empty() => continue,
                Ok(read) => return Ok(read),
                Err(Error::ClosedChannel) => return Ok(0),
                Err(err) => return Err(err.into()),
            }
        }
    }
}

impl<S, E> Write for Stream<S, E>
where
    S: Read + Write,
    E: TlsEngine,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.complete_handshake()?;
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            let written = self.conn.write(buf)?;
            if written > 0 {
                return Ok(written);
            }
            // staged ciphertext is holding the wrap buffer hostage
            self.conn.flush()?;
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.complete_handshake()?;
        while self.conn.flush()? == FlushResult::NeedWrite {}
        Ok(())
    }
}
