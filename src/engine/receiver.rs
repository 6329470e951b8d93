use anyhow::Result;
use socket2::Socket;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::engine::pending::{PendingMap, Reply, take_matching};
use crate::probe::{ParsedReply, ReplyKind, is_timeout, parse_reply, recv_icmp};

/// Maximum consecutive errors before stopping the receiver
const MAX_CONSECUTIVE_ERRORS: u32 = 50;

/// Maximum packets to drain per iteration before rechecking cancellation
const MAX_DRAIN_BATCH: usize = 100;

/// Poll timeout so cancellation is noticed promptly
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Listens for ICMP replies on one socket and resolves pending probes
pub struct Receiver {
    socket: Socket,
    is_dgram: bool,
    identifier: u16,
    pending: PendingMap,
    cancel: CancellationToken,
    consecutive_errors: u32,
}

impl Receiver {
    pub fn new(
        socket: Socket,
        is_dgram: bool,
        identifier: u16,
        pending: PendingMap,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            socket,
            is_dgram,
            identifier,
            pending,
            cancel,
            consecutive_errors: 0,
        }
    }

    /// Run the receiver on a dedicated thread (blocking I/O)
    pub fn run_blocking(mut self) -> Result<()> {
        self.socket.set_read_timeout(Some(POLL_TIMEOUT))?;
        let mut buffer = [0u8; 1500];

        let result = loop {
            if self.cancel.is_cancelled() {
                break Ok(());
            }

            if let Err(e) = self.drain(&mut buffer) {
                break Err(e);
            }
        };

        // Waiting probes learn the receiver is gone instead of sitting out
        // their full timeout
        self.pending.lock().clear();
        result
    }

    /// Read until the socket is quiet or the batch limit is hit
    fn drain(&mut self, buffer: &mut [u8]) -> Result<()> {
        for _ in 0..MAX_DRAIN_BATCH {
            match recv_icmp(&self.socket, buffer) {
                Ok((len, source)) => {
                    self.consecutive_errors = 0;
                    let received_at = Instant::now();
                    if let Some(parsed) = parse_reply(&buffer[..len], source, self.identifier, self.is_dgram) {
                        self.resolve(parsed, received_at);
                    }
                }
                Err(e) if is_timeout(&e) => {
                    self.consecutive_errors = 0;
                    return Ok(());
                }
                Err(e) => {
                    self.consecutive_errors += 1;
                    tracing::warn!(
                        errors = self.consecutive_errors,
                        max = MAX_CONSECUTIVE_ERRORS,
                        "receive error: {}",
                        e
                    );

                    if self.consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        return Err(anyhow::anyhow!(
                            "Receiver stopped: {} consecutive errors (last: {})",
                            self.consecutive_errors,
                            e
                        ));
                    }
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn resolve(&self, parsed: ParsedReply, received_at: Instant) {
        // Echo replies come from the target itself; errors quote it
        let target = match parsed.kind {
            ReplyKind::EchoReply => parsed.responder,
            ReplyKind::Unreachable(_) => parsed.original_dest,
        };

        let Some(probe) = take_matching(&self.pending, parsed.sequence, target) else {
            tracing::debug!(sequence = parsed.sequence, %target, "late or stray reply ignored");
            return;
        };

        let reply = Reply {
            kind: parsed.kind,
            responder: parsed.responder,
            received_at,
        };
        if probe.reply.send(reply).is_err() {
            tracing::debug!(
                sequence = parsed.sequence,
                age_ms = received_at.duration_since(probe.sent_at).as_millis() as u64,
                "reply arrived after probe gave up"
            );
        }
    }
}

/// Spawn the receiver on a dedicated OS thread
pub fn spawn_receiver(
    socket: Socket,
    is_dgram: bool,
    identifier: u16,
    pending: PendingMap,
    cancel: CancellationToken,
) -> std::thread::JoinHandle<Result<()>> {
    std::thread::spawn(move || {
        let receiver = Receiver::new(socket, is_dgram, identifier, pending, cancel);

        // Catch panics and convert to error with details
        let result = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| receiver.run_blocking())) {
            Ok(result) => result,
            Err(panic_payload) => {
                let msg = if let Some(s) = panic_payload.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_payload.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic".to_string()
                };
                Err(anyhow::anyhow!("Receiver panicked: {}", msg))
            }
        };

        if let Err(e) = &result {
            tracing::warn!("ICMP receiver exited: {:#}", e);
        }
        result
    })
}
