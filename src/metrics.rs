use std::sync::atomic::{AtomicU64, Ordering};

static METRICS: TransportMetrics = TransportMetrics::new();

/// Process-wide transport counters.
///
/// One instance exists per process; adapters on any thread increment it
/// through [`TransportMetrics::global`].  Counters only ever go up.
#[derive(Debug)]
pub struct TransportMetrics {
    client_tls_connections_established: AtomicU64,
    server_tls_connections_established: AtomicU64,
    tls_certificate_verification_failures: AtomicU64,
    peer_authorization_failures: AtomicU64,
}

impl TransportMetrics {
    const fn new() -> Self {
        Self {
            client_tls_connections_established: AtomicU64::new(0),
            server_tls_connections_established: AtomicU64::new(0),
            tls_certificate_verification_failures: AtomicU64::new(0),
            peer_authorization_failures: AtomicU64::new(0),
        }
    }

    /// The process-wide instance.
    pub fn global() -> &'static Self {
        &METRICS
    }

    pub(crate) fn increment_client_tls_connections_established(&self) {
        self.client_tls_connections_established
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_server_tls_connections_established(&self) {
        self.server_tls_connections_established
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_tls_certificate_verification_failures(&self) {
        self.tls_certificate_verification_failures
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_peer_authorization_failures(&self) {
        self.peer_authorization_failures
            .fetch_add(1, Ordering::Relaxed);
    }

    /// A point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            client_tls_connections_established: self
                .client_tls_connections_established
                .load(Ordering::Relaxed),
            server_tls_connections_established: self
                .server_tls_connections_established
                .load(Ordering::Relaxed),
            tls_certificate_verification_failures: self
                .tls_certificate_verification_failures
                .load(Ordering::Relaxed),
            peer_authorization_failures: self
                .peer_authorization_failures
                .load(Ordering::Relaxed),
        }
    }
}

/// Counter values captured by [`TransportMetrics::snapshot`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MetricsSnapshot {
    /// Client-mode handshakes brought to completion.
    pub client_tls_connections_established: u64,
    /// Server-mode handshakes brought to completion.
    pub server_tls_connections_established: u64,
    /// Handshake failures other than peer-authorization rejections.
    pub tls_certificate_verification_failures: u64,
    /// Handshakes rejected by the peer authorizer.
    pub peer_authorization_failures: u64,
}
