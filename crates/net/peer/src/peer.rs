//! The connection controller handle.
//!
//! A [`Peer`] starts unbound. Binding it to an outbound dial or an accepted
//! channel spawns a driver task that owns the channel; the handle talks to the
//! driver over a command channel and observes it through shared atomics and a
//! watch on the dial outcome.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use bytes::BytesMut;
use overlay_net_codec::{LineCodec, Packet};
use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{Instrument, debug, debug_span, trace, warn};

use crate::address::PeerAddress;
use crate::channel::{Channel, Dialer, TcpDialer};
use crate::config::PeerConfig;
use crate::driver::{DialStatus, PeerCommand, PeerDriver};
use crate::error::PeerError;
use crate::events::{EventEmitter, PeerEvent};
use crate::handshake::HandshakeState;
use crate::identity::NodeIdentity;
use crate::registry::PeerRegistry;
use crate::score::BanScore;
use crate::state::{ConnectionDirection, ConnectionState, PeerSnapshot, Timestamps};

struct Binding {
    address: PeerAddress,
    direction: ConnectionDirection,
    commands: mpsc::UnboundedSender<PeerCommand>,
}

#[derive(Default)]
struct Lifecycle {
    binding: Option<Binding>,
    destroyed: bool,
}

/// Outcome of starting teardown.
pub(crate) enum Teardown {
    AlreadyDestroyed,
    Unbound,
    Driver(mpsc::UnboundedSender<PeerCommand>),
}

/// State shared between a [`Peer`] handle and its driver task.
pub(crate) struct PeerShared {
    pub(crate) config: Arc<PeerConfig>,
    pub(crate) timestamps: Timestamps,
    state: AtomicU8,
    opened: AtomicBool,
    ban: BanScore,
    events: EventEmitter,
    lifecycle: RwLock<Lifecycle>,
    registry: RwLock<Option<Weak<PeerRegistry>>>,
    dial: watch::Sender<DialStatus>,
}

impl PeerShared {
    fn new(config: Arc<PeerConfig>) -> Self {
        let (dial, _) = watch::channel(DialStatus::Idle);
        Self {
            ban: BanScore::new(config.ban_threshold),
            events: EventEmitter::new(config.event_channel_capacity),
            config,
            timestamps: Timestamps::default(),
            state: AtomicU8::new(ConnectionState::Unbound as u8),
            opened: AtomicBool::new(false),
            lifecycle: RwLock::new(Lifecycle::default()),
            registry: RwLock::new(None),
            dial,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.state().is_destroyed()
    }

    /// Attach a channel binding. Fails if one exists or teardown has started.
    fn bind(
        &self,
        address: PeerAddress,
        direction: ConnectionDirection,
    ) -> Result<mpsc::UnboundedReceiver<PeerCommand>, PeerError> {
        let mut lifecycle = self.lifecycle.write();
        if lifecycle.destroyed {
            return Err(PeerError::Destroyed);
        }
        if lifecycle.binding.is_some() {
            return Err(PeerError::AlreadyBound);
        }

        let (commands, command_rx) = mpsc::unbounded_channel();
        metrics::counter!("peer.connections_total", "direction" => direction.to_string())
            .increment(1);

        match direction {
            ConnectionDirection::Outbound => {
                self.state
                    .store(ConnectionState::Connecting as u8, Ordering::Release);
                self.dial.send_replace(DialStatus::Connecting);
            }
            ConnectionDirection::Inbound => {
                self.state
                    .store(ConnectionState::Connected as u8, Ordering::Release);
                self.timestamps.mark_connected();
                self.dial.send_replace(DialStatus::Connected);
            }
        }

        lifecycle.binding = Some(Binding {
            address,
            direction,
            commands,
        });
        Ok(command_rx)
    }

    /// CONNECTING -> CONNECTED. Returns `false` if teardown won the race.
    pub(crate) fn mark_connected(&self) -> bool {
        let connected = self
            .state
            .compare_exchange(
                ConnectionState::Connecting as u8,
                ConnectionState::Connected as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if connected {
            self.timestamps.mark_connected();
            self.emit(PeerEvent::Connect);
            self.dial.send_replace(DialStatus::Connected);
        }
        connected
    }

    /// Mark the peer destroyed. Only the first call gets anything other than
    /// [`Teardown::AlreadyDestroyed`].
    pub(crate) fn begin_destroy(&self) -> Teardown {
        let mut lifecycle = self.lifecycle.write();
        if lifecycle.destroyed {
            return Teardown::AlreadyDestroyed;
        }
        lifecycle.destroyed = true;
        self.state
            .store(ConnectionState::Destroyed as u8, Ordering::Release);

        match &lifecycle.binding {
            Some(binding) => Teardown::Driver(binding.commands.clone()),
            None => Teardown::Unbound,
        }
    }

    /// Resolve a pending dial. No-op once the dial has an outcome.
    pub(crate) fn resolve_dial(&self, outcome: DialStatus) {
        self.dial.send_if_modified(|status| {
            if matches!(status, DialStatus::Connecting) {
                *status = outcome;
                true
            } else {
                false
            }
        });
    }

    /// Emit an event to subscribers. Everything but `Close` is dropped once
    /// teardown has started.
    pub(crate) fn emit(&self, event: PeerEvent) {
        if event.is_close() {
            self.events.emit(event);
            return;
        }
        let lifecycle = self.lifecycle.read();
        if !lifecycle.destroyed {
            self.events.emit(event);
        }
    }

    pub(crate) fn increase_ban(&self, delta: u32) -> bool {
        if self.is_destroyed() || !self.ban.increase(delta) {
            return false;
        }
        warn!(
            score = self.ban.score(),
            threshold = self.ban.threshold(),
            "Ban threshold crossed"
        );
        metrics::counter!("peer.bans_total").increment(1);
        self.emit(PeerEvent::Ban);
        true
    }

    fn address(&self) -> Option<PeerAddress> {
        self.lifecycle
            .read()
            .binding
            .as_ref()
            .map(|binding| binding.address.clone())
    }

    fn direction(&self) -> Option<ConnectionDirection> {
        self.lifecycle
            .read()
            .binding
            .as_ref()
            .map(|binding| binding.direction)
    }

    fn commands(&self) -> Result<mpsc::UnboundedSender<PeerCommand>, PeerError> {
        let lifecycle = self.lifecycle.read();
        if lifecycle.destroyed {
            return Err(PeerError::Destroyed);
        }
        lifecycle
            .binding
            .as_ref()
            .map(|binding| binding.commands.clone())
            .ok_or(PeerError::NotBound)
    }
}

/// A single connection to a remote node.
///
/// Dropping the handle destroys the peer.
pub struct Peer {
    shared: Arc<PeerShared>,
    local: NodeIdentity,
    codec: LineCodec,
}

impl Peer {
    /// Create an unbound peer.
    pub fn new(config: Arc<PeerConfig>, local: NodeIdentity) -> Self {
        let codec = LineCodec::new(config.max_line_length);
        Self {
            shared: Arc::new(PeerShared::new(config)),
            local,
            codec,
        }
    }

    /// Create a peer dialing `address` over TCP.
    ///
    /// Must be called within a tokio runtime.
    pub fn from_outbound(config: Arc<PeerConfig>, local: NodeIdentity, address: PeerAddress) -> Self {
        Self::from_outbound_with(config, local, address, TcpDialer)
    }

    /// Create a peer dialing `address` with a custom [`Dialer`].
    pub fn from_outbound_with<D: Dialer>(
        config: Arc<PeerConfig>,
        local: NodeIdentity,
        address: PeerAddress,
        dialer: D,
    ) -> Self {
        let peer = Self::new(config, local);
        if let Err(error) = peer.connect_with(address, dialer) {
            // A fresh peer is neither bound nor destroyed.
            debug!(%error, "Bind of a fresh outbound peer failed");
        }
        peer
    }

    /// Create a peer over an accepted channel, keyed by its remote address.
    pub fn from_inbound<C: Channel>(
        config: Arc<PeerConfig>,
        local: NodeIdentity,
        channel: C,
    ) -> Result<Self, PeerError> {
        let peer = Self::new(config, local);
        peer.accept(channel)?;
        Ok(peer)
    }

    /// Create a peer over an accepted channel with an explicit identity.
    pub fn from_inbound_at<C: Channel>(
        config: Arc<PeerConfig>,
        local: NodeIdentity,
        channel: C,
        address: PeerAddress,
    ) -> Self {
        let peer = Self::new(config, local);
        if let Err(error) = peer.accept_at(channel, address) {
            debug!(%error, "Bind of a fresh inbound peer failed");
        }
        peer
    }

    /// Bind this peer to an outbound TCP dial.
    pub fn connect(&self, address: PeerAddress) -> Result<(), PeerError> {
        self.connect_with(address, TcpDialer)
    }

    /// Bind this peer to an outbound dial through `dialer`.
    ///
    /// The connect timeout starts now, not at [`open`](Self::open).
    pub fn connect_with<D: Dialer>(&self, address: PeerAddress, dialer: D) -> Result<(), PeerError> {
        let commands = self
            .shared
            .bind(address.clone(), ConnectionDirection::Outbound)?;
        debug!(peer = %address, "Dialing peer");

        let span = debug_span!("peer", peer = %address, direction = "outbound");
        let driver = PeerDriver::new(self.shared.clone(), commands, address);
        tokio::spawn(driver.run_outbound(dialer).instrument(span));
        Ok(())
    }

    /// Bind this peer to an accepted channel, keyed by its remote address.
    pub fn accept<C: Channel>(&self, channel: C) -> Result<(), PeerError> {
        let address = channel.remote_address()?;
        self.accept_at(channel, address)
    }

    /// Bind this peer to an accepted channel with an explicit identity.
    pub fn accept_at<C: Channel>(&self, channel: C, address: PeerAddress) -> Result<(), PeerError> {
        let commands = self
            .shared
            .bind(address.clone(), ConnectionDirection::Inbound)?;
        debug!(peer = %address, "Accepted peer");

        if let Err(error) = channel.configure() {
            warn!(peer = %address, %error, "Failed to configure channel");
        }

        let span = debug_span!("peer", peer = %address, direction = "inbound");
        let driver = PeerDriver::new(self.shared.clone(), commands, address);
        tokio::spawn(driver.run_inbound(channel).instrument(span));
        Ok(())
    }

    /// Wait for the connection to be established and signal `Open`.
    ///
    /// May be called once. A failed or timed-out dial destroys the peer and
    /// is returned here.
    pub async fn open(&self) -> Result<HandshakeState, PeerError> {
        if self.shared.direction().is_none() {
            return Err(PeerError::NotBound);
        }
        if self.shared.opened.swap(true, Ordering::AcqRel) {
            return Err(PeerError::AlreadyOpened);
        }

        let mut dial = self.shared.dial.subscribe();
        let status = dial
            .wait_for(|status| !matches!(status, DialStatus::Connecting))
            .await
            .map_err(|_| PeerError::Destroyed)?
            .clone();

        match status {
            DialStatus::Connected if !self.shared.is_destroyed() => {
                let handshake = HandshakeState::default();
                self.shared.emit(PeerEvent::Open(handshake.clone()));
                debug!(peer = ?self.shared.address(), "Peer opened");
                Ok(handshake)
            }
            DialStatus::Failed(error) => Err(PeerError::Dial(error)),
            DialStatus::Idle => Err(PeerError::NotBound),
            DialStatus::Connected | DialStatus::Connecting | DialStatus::Aborted => {
                Err(PeerError::Destroyed)
            }
        }
    }

    /// Tear the peer down. Idempotent; `Close` is emitted exactly once.
    pub fn destroy(&self) {
        match self.shared.begin_destroy() {
            Teardown::AlreadyDestroyed => {}
            Teardown::Unbound => {
                debug!("Destroyed unbound peer");
                self.shared.emit(PeerEvent::Close);
            }
            Teardown::Driver(commands) => {
                // The driver emits `Close` once it has released the channel.
                let _ = commands.send(PeerCommand::Destroy);
            }
        }
    }

    /// Frame `packet` and queue it for writing.
    ///
    /// Write failures surface later as an `Error` event.
    pub fn send(&self, packet: &Packet) -> Result<(), PeerError> {
        let commands = self.shared.commands()?;

        let mut frame = BytesMut::new();
        self.codec.encode_packet(packet, &mut frame)?;
        commands
            .send(PeerCommand::Send(frame.freeze()))
            .map_err(|_| PeerError::Destroyed)?;

        self.shared.timestamps.mark_send();
        trace!(peer = ?self.shared.address(), %packet, "Queued packet");
        Ok(())
    }

    /// Human-readable connectivity description.
    pub fn status(&self) -> String {
        match self.shared.address() {
            Some(id) if self.shared.state().is_connected() => format!("Connected to peer ({id})"),
            _ => "Not connected".to_string(),
        }
    }

    /// The connection identity. Only available once bound.
    pub fn id(&self) -> Result<PeerAddress, PeerError> {
        self.shared.address().ok_or(PeerError::NotBound)
    }

    pub fn direction(&self) -> Option<ConnectionDirection> {
        self.shared.direction()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_opened(&self) -> bool {
        self.shared.opened.load(Ordering::Acquire)
    }

    /// Add `delta` to the ban score. Returns `true` only on the call that
    /// crosses the threshold; that call also emits `Ban`.
    pub fn increase_ban(&self, delta: u32) -> bool {
        self.shared.increase_ban(delta)
    }

    pub fn ban_score(&self) -> u32 {
        self.shared.ban.score()
    }

    pub fn is_banned(&self) -> bool {
        self.shared.ban.is_banned()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.shared.events.subscribe()
    }

    pub fn local_identity(&self) -> &NodeIdentity {
        &self.local
    }

    /// Associate the owning registry. Holds a weak reference only.
    pub fn set_registry(&self, registry: &Arc<PeerRegistry>) {
        *self.shared.registry.write() = Some(Arc::downgrade(registry));
    }

    pub fn registry(&self) -> Option<Arc<PeerRegistry>> {
        self.shared.registry.read().as_ref().and_then(Weak::upgrade)
    }

    pub fn snapshot(&self) -> PeerSnapshot {
        let timestamps = &self.shared.timestamps;
        PeerSnapshot {
            id: self.shared.address(),
            direction: self.shared.direction(),
            state: self.shared.state(),
            ban_score: self.shared.ban.score(),
            banned: self.shared.ban.is_banned(),
            connect_time: timestamps.connect_time(),
            last_send: timestamps.last_send(),
            last_recv: timestamps.last_recv(),
        }
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.shared.address())
            .field("direction", &self.shared.direction())
            .field("state", &self.shared.state())
            .field("ban_score", &self.shared.ban.score())
            .finish()
    }
}
