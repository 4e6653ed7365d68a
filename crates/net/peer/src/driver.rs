//! Per-connection driver task.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use overlay_net_codec::{FrameDecoder, FrameError, Packet};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::address::PeerAddress;
use crate::channel::{Channel, Dialer};
use crate::error::DialError;
use crate::events::{FaultCause, PeerEvent, PeerFault};
use crate::peer::PeerShared;

const READ_BUFFER_SIZE: usize = 8 * 1024;
const SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

/// Commands from the [`Peer`](crate::Peer) handle to its driver.
#[derive(Debug)]
pub(crate) enum PeerCommand {
    /// Write an encoded frame.
    Send(Bytes),
    /// Release the channel and close.
    Destroy,
}

/// Progress of the outbound dial, observed by `Peer::open`.
#[derive(Debug, Clone)]
pub(crate) enum DialStatus {
    Idle,
    Connecting,
    Connected,
    Failed(DialError),
    Aborted,
}

enum Step {
    Command(Option<PeerCommand>),
    Read(io::Result<usize>),
    Written(io::Result<usize>),
}

/// Owns the channel and the frame decoder for one bound peer.
pub(crate) struct PeerDriver {
    shared: Arc<PeerShared>,
    commands: mpsc::UnboundedReceiver<PeerCommand>,
    decoder: FrameDecoder,
    address: PeerAddress,
}

impl PeerDriver {
    pub(crate) fn new(
        shared: Arc<PeerShared>,
        commands: mpsc::UnboundedReceiver<PeerCommand>,
        address: PeerAddress,
    ) -> Self {
        let decoder = FrameDecoder::with_max_line_length(shared.config.max_line_length);
        Self {
            shared,
            commands,
            decoder,
            address,
        }
    }

    pub(crate) async fn run_outbound<D: Dialer>(mut self, dialer: D) {
        if let Some((channel, pending)) = self.dial(&dialer).await {
            self.run(channel, pending).await;
        }
        self.finish();
    }

    pub(crate) async fn run_inbound<C: Channel>(mut self, channel: C) {
        self.run(channel, BytesMut::new()).await;
        self.finish();
    }

    /// Race the dial against the connect timeout and incoming commands.
    ///
    /// Frames sent while connecting are collected and returned with the channel.
    async fn dial<D: Dialer>(&mut self, dialer: &D) -> Option<(D::Channel, BytesMut)> {
        let timeout = self.shared.config.connect_timeout();
        let dial = tokio::time::timeout(timeout, dialer.dial(&self.address));
        tokio::pin!(dial);

        let mut pending = BytesMut::new();
        let result = loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(PeerCommand::Send(frame)) => pending.extend_from_slice(&frame),
                    Some(PeerCommand::Destroy) | None => {
                        debug!("Dial aborted");
                        return None;
                    }
                },
                result = &mut dial => break result,
            }
        };

        let error = match result {
            Ok(Ok(channel)) => {
                if !self.shared.mark_connected() {
                    debug!("Peer destroyed while dialing");
                    return None;
                }
                if let Err(error) = channel.configure() {
                    warn!(%error, "Failed to configure channel");
                }
                debug!("Dial succeeded");
                return Some((channel, pending));
            }
            Ok(Err(error)) => DialError::from(error),
            Err(_) => DialError::Timeout(timeout),
        };

        debug!(%error, "Dial failed");
        metrics::counter!("peer.dial_failures_total").increment(1);
        let _ = self.shared.begin_destroy();
        self.shared.resolve_dial(DialStatus::Failed(error));
        None
    }

    /// Pump the channel until it fails or the peer is destroyed.
    ///
    /// Writes are polled from `outgoing` alongside reads and commands, so a
    /// remote that stops reading never delays a `Destroy`.
    async fn run<C: Channel>(&mut self, channel: C, mut outgoing: BytesMut) {
        let (mut reader, mut writer) = tokio::io::split(channel);

        if !outgoing.is_empty() {
            trace!(bytes = outgoing.len(), "Flushing frames queued while connecting");
        }

        let mut scratch = BytesMut::with_capacity(READ_BUFFER_SIZE);
        loop {
            let step = tokio::select! {
                biased;
                command = self.commands.recv() => Step::Command(command),
                read = reader.read_buf(&mut scratch) => Step::Read(read),
                written = writer.write_buf(&mut outgoing), if !outgoing.is_empty() => {
                    Step::Written(written)
                }
            };

            match step {
                Step::Command(Some(PeerCommand::Send(frame))) => outgoing.extend_from_slice(&frame),
                Step::Command(Some(PeerCommand::Destroy) | None) => break,
                Step::Written(Ok(0)) => {
                    self.transport_error(io::ErrorKind::WriteZero.into());
                    break;
                }
                Step::Written(Ok(n)) => trace!(bytes = n, "Wrote data"),
                Step::Written(Err(error)) => {
                    self.transport_error(error);
                    break;
                }
                Step::Read(Ok(0)) => {
                    debug!("Remote closed the connection");
                    self.fault("Socket hangup", FaultCause::Hangup);
                    break;
                }
                Step::Read(Ok(n)) => {
                    trace!(bytes = n, "Received data");
                    self.shared.timestamps.mark_recv();
                    let frames = self.decoder.feed(&scratch);
                    scratch.clear();
                    for frame in frames {
                        self.on_frame(frame);
                    }
                }
                Step::Read(Err(error)) => {
                    self.transport_error(error);
                    break;
                }
            }
        }

        if !outgoing.is_empty() {
            debug!(bytes = outgoing.len(), "Discarding unsent data");
        }
        close(reader, writer).await;
    }

    fn on_frame(&self, frame: Result<Packet, FrameError>) {
        if self.shared.is_destroyed() {
            return;
        }

        match frame {
            Ok(packet) => {
                trace!(%packet, "Packet received");
                metrics::counter!("peer.packets_received_total").increment(1);
                self.shared.emit(PeerEvent::Packet(packet));
            }
            Err(error) => {
                warn!(%error, "Malformed frame from peer");
                metrics::counter!("peer.decode_errors_total", "kind" => error.kind()).increment(1);

                let penalty = self.shared.config.penalties.penalty_for(&error);
                self.fault(error.to_string(), FaultCause::Decode(error));
                if let Some(penalty) = penalty {
                    self.shared.increase_ban(penalty);
                }
            }
        }
    }

    fn transport_error(&self, error: io::Error) {
        debug!(%error, "Channel error");
        self.fault(error.to_string(), FaultCause::Transport(Arc::new(error)));
    }

    fn fault(&self, description: impl Into<String>, cause: FaultCause) {
        self.shared
            .emit(PeerEvent::Error(PeerFault::new(description, cause)));
    }

    /// Single exit point of the driver.
    fn finish(self) {
        let _ = self.shared.begin_destroy();
        self.shared.resolve_dial(DialStatus::Aborted);

        metrics::counter!("peer.teardowns_total").increment(1);
        debug!(peer = %self.address, "Peer closed");
        self.shared.emit(PeerEvent::Close);
    }
}

/// Release both halves of the channel.
///
/// The remote may have stopped reading, so shutdown gets a bounded grace period.
async fn close<C: Channel>(reader: ReadHalf<C>, mut writer: WriteHalf<C>) {
    match tokio::time::timeout(SHUTDOWN_GRACE, writer.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => trace!(%error, "Channel shutdown failed"),
        Err(_) => trace!("Channel shutdown timed out"),
    }
    drop(reader);
}
