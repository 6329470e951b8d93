use anyhow::{Context, Result, anyhow};
use parking_lot::Mutex;
use socket2::Socket;
use std::collections::HashMap;
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::config::{AddressFamily, SessionConfig};
use crate::engine::pending::{PendingMap, PendingProbe, new_pending_map, register};
use crate::engine::receiver::spawn_receiver;
use crate::probe::{ReplyKind, build_echo_request, create_icmp_socket, process_identifier, send_icmp};
use crate::state::ProbeOutcome;

/// Sends one echo request and classifies how it resolved
///
/// Implementations never retry and never return an error: every failure
/// mode is a [`ProbeOutcome`]. The returned future must resolve within
/// roughly `timeout`.
pub trait ProbeTransport: Send + Sync + 'static {
    fn send(&self, target: &str, timeout: Duration) -> impl Future<Output = ProbeOutcome> + Send;
}

/// Distinguishes transports created within one process
static INSTANCE: AtomicU16 = AtomicU16::new(0);

/// Socket plus receiver thread for one address family
struct Channel {
    socket: Socket,
    pending: PendingMap,
    cancel: CancellationToken,
    receiver: std::thread::JoinHandle<Result<()>>,
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// ICMP echo transport over raw (or unprivileged DGRAM) sockets
///
/// Sockets are opened lazily on first use per address family, so a
/// permission problem surfaces as a `TransportError` sample and is retried
/// on the next send. Host names are resolved once and cached.
pub struct IcmpTransport {
    family: AddressFamily,
    payload_size: usize,
    identifier: u16,
    sequence: AtomicU16,
    resolved: Mutex<HashMap<String, IpAddr>>,
    v4: Mutex<Option<Arc<Channel>>>,
    v6: Mutex<Option<Arc<Channel>>>,
}

impl IcmpTransport {
    pub fn new(family: AddressFamily, payload_size: usize) -> Self {
        let instance = INSTANCE.fetch_add(1, Ordering::Relaxed);
        Self {
            family,
            payload_size,
            identifier: process_identifier() ^ instance.rotate_left(8),
            sequence: AtomicU16::new(0),
            resolved: Mutex::new(HashMap::new()),
            v4: Mutex::new(None),
            v6: Mutex::new(None),
        }
    }

    /// Transport using the family and payload size of a session config
    pub fn for_config(config: &SessionConfig) -> Self {
        Self::new(config.family, config.payload_size)
    }

    pub fn identifier(&self) -> u16 {
        self.identifier
    }

    /// Resolve a host name or literal address, honoring the family preference
    pub async fn resolve(&self, host: &str) -> Result<IpAddr> {
        let cached = self.resolved.lock().get(host).copied();
        if let Some(addr) = cached {
            return Ok(addr);
        }

        let addr = match host.parse::<IpAddr>() {
            Ok(addr) => {
                if !self.family.accepts(addr) {
                    return Err(anyhow!("{} does not match the requested address family", addr));
                }
                addr
            }
            Err(_) => {
                let addrs: Vec<IpAddr> = tokio::net::lookup_host((host, 0))
                    .await
                    .with_context(|| format!("failed to resolve {}", host))?
                    .map(|sa| sa.ip())
                    .collect();
                self.family
                    .pick(&addrs)
                    .ok_or_else(|| anyhow!("no usable address for {}", host))?
            }
        };

        tracing::debug!(host, %addr, "resolved target");
        self.resolved.lock().insert(host.to_string(), addr);
        Ok(addr)
    }

    /// Get the live channel for this family, opening it if needed
    fn channel(&self, ipv6: bool) -> Result<Arc<Channel>> {
        let slot = if ipv6 { &self.v6 } else { &self.v4 };
        let mut slot = slot.lock();

        if let Some(channel) = slot.as_ref()
            && !channel.receiver.is_finished()
        {
            return Ok(channel.clone());
        }

        let info = create_icmp_socket(ipv6).context("failed to open ICMP socket")?;
        let recv_socket = info.socket.try_clone().context("failed to clone ICMP socket")?;
        let pending = new_pending_map();
        let cancel = CancellationToken::new();
        let receiver = spawn_receiver(recv_socket, info.is_dgram, self.identifier, pending.clone(), cancel.clone());

        tracing::debug!(ipv6, dgram = info.is_dgram, "opened ICMP channel");
        let channel = Arc::new(Channel {
            socket: info.socket,
            pending,
            cancel,
            receiver,
        });
        *slot = Some(channel.clone());
        Ok(channel)
    }

    async fn probe(&self, target: &str, timeout: Duration) -> Result<ProbeOutcome> {
        let addr = self.resolve(target).await?;
        let ipv6 = addr.is_ipv6();
        let channel = self.channel(ipv6)?;

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let packet = build_echo_request(self.identifier, sequence, self.payload_size, ipv6);
        let (tx, rx) = oneshot::channel();
        let sent_at = Instant::now();

        // Register pending BEFORE sending to prevent race with fast responses.
        // The guard clears the entry however this future ends.
        let _entry = register(
            &channel.pending,
            sequence,
            PendingProbe {
                target: addr,
                sent_at,
                reply: tx,
            },
        );

        send_icmp(&channel.socket, &packet, addr).with_context(|| format!("failed to send to {}", addr))?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(match reply.kind {
                ReplyKind::EchoReply => {
                    let rtt = reply.received_at.saturating_duration_since(sent_at);
                    ProbeOutcome::success(rtt.as_secs_f64() * 1000.0)
                }
                ReplyKind::Unreachable(code) => {
                    tracing::debug!(code, responder = %reply.responder, "destination unreachable");
                    ProbeOutcome::Unreachable
                }
            }),
            Ok(Err(_)) => Err(anyhow!("ICMP receiver stopped")),
            Err(_) => Ok(ProbeOutcome::Timeout),
        }
    }
}

impl ProbeTransport for IcmpTransport {
    async fn send(&self, target: &str, timeout: Duration) -> ProbeOutcome {
        match self.probe(target, timeout).await {
            Ok(outcome) => outcome,
            Err(e) => ProbeOutcome::transport_error(format!("{:#}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_literal_address_resolves_without_lookup() {
        let transport = IcmpTransport::new(AddressFamily::Any, 56);
        let addr = transport.resolve("192.0.2.7").await.unwrap();
        assert_eq!(addr, "192.0.2.7".parse::<IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn test_family_mismatch_is_transport_error() {
        let transport = IcmpTransport::new(AddressFamily::Ipv6, 56);
        let outcome = transport.send("192.0.2.7", Duration::from_millis(10)).await;
        assert!(matches!(outcome, ProbeOutcome::TransportError { .. }));
    }

    #[test]
    fn test_identifiers_differ_between_instances() {
        let a = IcmpTransport::new(AddressFamily::Any, 56);
        let b = IcmpTransport::new(AddressFamily::Any, 56);
        assert_ne!(a.identifier(), b.identifier());
    }
}
