//! Exchange session
//!
//! One session per exchange connection. It exclusively owns the channel
//! registry, the order-book cache and the liveness supervisor, and turns
//! inbound frames and timer ticks into [`SessionEvent`]s. The session is
//! synchronous: the driver serializes frames, ticks and caller commands onto
//! one task, and tests drive it directly with a [`MemoryTransport`].
//!
//! [`MemoryTransport`]: crate::transport::MemoryTransport

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tracing::{debug, info, info_span, trace, warn, Span};
use types::ids::{ExchangeId, Symbol};
use types::market::{NormalizedTicker, NormalizedTrade, OrderBookDelta};
use uuid::Uuid;

use crate::decoder::{decode_frame, Inbound};
use crate::error::FeedError;
use crate::exchanges::{AckRef, Control, ExchangeProfile, SubscriptionScope};
use crate::liveness::{LivenessPolicy, LivenessSupervisor, LivenessVerdict};
use crate::normalize::{normalize, CanonicalEvent};
use crate::reconcile::OrderBookReconciler;
use crate::registry::{ChannelKind, ChannelParams, ChannelRegistry};
use crate::transport::{Frame, Transport};

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Everything a session reports to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Open,
    Close,
    Error(FeedError),
    OrderBook(Symbol, OrderBookDelta),
    Trade(Symbol, Vec<NormalizedTrade>),
    Ticker(Symbol, NormalizedTicker),
    /// Every decoded non-heartbeat message, before normalization.
    Message(Value),
}

impl From<CanonicalEvent> for SessionEvent {
    fn from(event: CanonicalEvent) -> Self {
        match event {
            CanonicalEvent::OrderBook(symbol, delta) => SessionEvent::OrderBook(symbol, delta),
            CanonicalEvent::Trades(symbol, trades) => SessionEvent::Trade(symbol, trades),
            CanonicalEvent::Ticker(symbol, ticker) => SessionEvent::Ticker(symbol, ticker),
        }
    }
}

/// Per-session settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionConfig {
    /// Replaces the exchange's liveness defaults when set.
    pub liveness: Option<LivenessPolicy>,
}

pub struct Session<T: Transport> {
    profile: Box<dyn ExchangeProfile>,
    transport: T,
    state: ConnectionState,
    registry: ChannelRegistry,
    books: OrderBookReconciler,
    supervisor: LivenessSupervisor,
    events: UnboundedSender<SessionEvent>,
    session_id: Uuid,
    next_request_id: u64,
    span: Span,
}

impl<T: Transport> Session<T> {
    pub fn new(
        profile: Box<dyn ExchangeProfile>,
        transport: T,
        config: SessionConfig,
        events: UnboundedSender<SessionEvent>,
    ) -> Self {
        let policy = config.liveness.unwrap_or_else(|| profile.liveness());
        let session_id = Uuid::now_v7();
        let exchange = profile.exchange();
        let span = info_span!("session", exchange = %exchange, session_id = %session_id);
        Self {
            profile,
            transport,
            state: ConnectionState::Connecting,
            registry: ChannelRegistry::new(),
            books: OrderBookReconciler::new(),
            supervisor: LivenessSupervisor::new(policy),
            events,
            session_id,
            next_request_id: 1,
            span,
        }
    }

    pub fn exchange(&self) -> ExchangeId {
        self.profile.exchange()
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Span the driver runs this session's work in.
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn liveness_policy(&self) -> &LivenessPolicy {
        self.supervisor.policy()
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn books(&self) -> &OrderBookReconciler {
        &self.books
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// The transport is connected. Resets per-connection state and arms the
    /// liveness timers.
    pub fn open(&mut self, now: Instant) {
        if self.state != ConnectionState::Connecting {
            debug!(state = ?self.state, "open ignored");
            return;
        }
        self.registry.clear();
        self.books.clear();
        self.supervisor.start(now);
        self.state = ConnectionState::Open;
        info!(exchange = %self.exchange(), "session open");
        self.emit(SessionEvent::Open);
    }

    /// Close the connection. Idempotent: `Close` is emitted once.
    pub fn close(&mut self) {
        if matches!(self.state, ConnectionState::Closing | ConnectionState::Closed) {
            return;
        }
        self.state = ConnectionState::Closing;
        self.transport.close();
        self.finish_close();
    }

    pub fn subscribe_order_book(&mut self, symbol: Symbol, params: ChannelParams) -> String {
        self.subscribe(ChannelKind::OrderBook, symbol, params)
    }

    pub fn subscribe_trades(&mut self, symbol: Symbol) -> String {
        self.subscribe(ChannelKind::Trade, symbol, ChannelParams::default())
    }

    pub fn subscribe_ticker(&mut self, symbol: Symbol) -> String {
        self.subscribe(ChannelKind::Ticker, symbol, ChannelParams::default())
    }

    /// Register a subscription and send the request when open.
    ///
    /// Returns the registry key to pass to [`Session::unsubscribe`].
    pub fn subscribe(&mut self, kind: ChannelKind, symbol: Symbol, params: ChannelParams) -> String {
        let key = self.profile.channel_key(kind, &symbol, &params);
        let per_channel = self.profile.subscription_scope() == SubscriptionScope::Channel;
        let channel_live = self.registry.iter().any(|sub| sub.kind == kind);
        if let Some(stale) = self.registry.unregister(&key) {
            debug!(key = %key, "replacing existing subscription");
            self.books.forget(&stale.key);
            if self.is_open() && !per_channel {
                let request_id = self.request_id();
                if let Some(frame) = self.profile.unsubscribe_request(&stale, request_id) {
                    self.send(frame);
                }
            }
        }

        self.registry.register(key.clone(), kind, symbol, params);
        if !self.is_open() {
            debug!(key = %key, state = ?self.state, "subscription registered while not open");
            return key;
        }

        if per_channel {
            if channel_live {
                // the exchange only accepts a new market set after dropping the old one
                self.send_channel_unsubscribe(&key);
            }
            self.subscribe_channel(kind);
            return key;
        }

        let request_id = self.request_id();
        let frame = self
            .registry
            .get(&key)
            .and_then(|sub| self.profile.subscribe_request(sub, request_id));
        if let Some(frame) = frame {
            self.registry.track_request(request_id, key.clone());
            info!(key = %key, kind = %kind, request_id, "subscribing");
            self.send(frame);
        }
        key
    }

    /// Drop a subscription. Returns false for unknown keys.
    ///
    /// On exchanges that unsubscribe a whole channel kind at once, the
    /// remaining markets of that kind are subscribed again.
    pub fn unsubscribe(&mut self, key: &str) -> bool {
        let Some(sub) = self.registry.unregister(key) else {
            debug!(key = %key, "unsubscribe for unknown key");
            return false;
        };
        self.books.forget(&sub.key);
        if !self.is_open() {
            return true;
        }
        let request_id = self.request_id();
        match self.profile.unsubscribe_request(&sub, request_id) {
            Some(frame) => {
                info!(key = %key, request_id, "unsubscribing");
                self.send(frame);
            }
            None => debug!(key = %key, "exchange has no unsubscribe for this channel"),
        }
        if self.profile.subscription_scope() == SubscriptionScope::Channel {
            self.subscribe_channel(sub.kind);
        }
        true
    }

    /// Unsubscribe the channel kind that `key` belongs to, for every market.
    fn send_channel_unsubscribe(&mut self, key: &str) {
        let request_id = self.request_id();
        let frame = self
            .registry
            .get(key)
            .and_then(|sub| self.profile.unsubscribe_request(sub, request_id));
        if let Some(frame) = frame {
            debug!(key = %key, request_id, "dropping current channel set");
            self.send(frame);
        }
    }

    /// Subscribe every registered market of `kind` in one request.
    fn subscribe_channel(&mut self, kind: ChannelKind) {
        let request_id = self.request_id();
        let (keys, frame) = {
            let subs: Vec<_> = self.registry.iter().filter(|sub| sub.kind == kind).collect();
            if subs.is_empty() {
                return;
            }
            let keys: Vec<String> = subs.iter().map(|sub| sub.key.clone()).collect();
            (keys, self.profile.channel_subscribe_request(&subs, request_id))
        };
        let Some(frame) = frame else {
            return;
        };
        for key in &keys {
            self.registry.rearm(key);
            self.registry.track_request(request_id, key.clone());
        }
        info!(kind = %kind, markets = keys.len(), request_id, "subscribing channel");
        self.send(frame);
    }

    /// Process one inbound frame.
    pub fn handle_frame(&mut self, frame: Frame, now: Instant) {
        if !self.is_open() {
            trace!(state = ?self.state, "frame ignored");
            return;
        }
        match decode_frame(self.profile.as_ref(), &frame) {
            Ok(Inbound::Heartbeat { reply }) => {
                self.supervisor.touch(now);
                if let Some(reply) = reply {
                    self.send(reply);
                }
            }
            Ok(Inbound::Message(msg)) => self.handle_message(msg),
            Err(err) => {
                warn!(error = %err, "dropping undecodable frame");
                self.emit(SessionEvent::Error(err.into()));
            }
        }
    }

    fn handle_message(&mut self, msg: Value) {
        self.emit(SessionEvent::Message(msg.clone()));
        match self.profile.classify(&msg) {
            Control::Data => self.handle_data(&msg),
            Control::Subscribed(ack) => self.acknowledge(ack),
            Control::Unsubscribed => debug!("unsubscribe confirmed"),
            Control::Rejected(payload) => {
                warn!(payload = %payload, "exchange rejected request");
                self.emit(SessionEvent::Error(FeedError::SubscriptionRejected(payload)));
            }
            Control::Other => trace!("informational message"),
        }
    }

    fn handle_data(&mut self, msg: &Value) {
        match normalize(self.profile.as_ref(), msg, &mut self.registry, &mut self.books) {
            Ok(events) => {
                for event in events {
                    self.emit(event.into());
                }
            }
            Err(FeedError::UnroutableMessage(route)) => {
                trace!(route = %route, "no subscription for message");
            }
            Err(err) => {
                warn!(error = %err, "dropping message");
                self.emit(SessionEvent::Error(err));
            }
        }
    }

    fn acknowledge(&mut self, ack: AckRef) {
        let keys: Vec<String> = match ack {
            AckRef::Key(key) => self.registry.acknowledge(&key).then_some(key).into_iter().collect(),
            AckRef::Request(request_id) => self.registry.acknowledge_request(request_id),
            AckRef::Bound { alias, key } => {
                let bound = self.registry.bind_alias(alias, &key);
                (bound && self.registry.acknowledge(&key))
                    .then_some(key)
                    .into_iter()
                    .collect()
            }
        };
        if keys.is_empty() {
            debug!("confirmation for unknown subscription");
        }
        for key in keys {
            info!(key = %key, "subscription confirmed");
        }
    }

    /// Heartbeat timer tick: send the exchange's ping.
    pub fn on_heartbeat_tick(&mut self, _now: Instant) {
        if !self.is_open() || !self.supervisor.heartbeat_due() {
            return;
        }
        let request_id = self.request_id();
        if let Some(ping) = self.profile.ping_frame(request_id) {
            trace!("sending ping");
            self.send(ping);
        }
    }

    /// Watchdog timer tick: force-close a connection that went silent.
    pub fn on_watchdog_tick(&mut self, now: Instant) {
        if !self.is_open() {
            return;
        }
        if let LivenessVerdict::TimedOut { elapsed } = self.supervisor.check(now) {
            let timeout = FeedError::LivenessTimeout {
                elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            };
            warn!(error = %timeout, "closing silent connection");
            self.close();
        }
    }

    /// The transport reported a failure.
    pub fn on_transport_error(&mut self, message: impl Into<String>) {
        let err = FeedError::Transport(message.into());
        warn!(error = %err, "transport error");
        self.emit(SessionEvent::Error(err));
    }

    /// The transport closed underneath the session.
    pub fn on_transport_closed(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.finish_close();
    }

    fn finish_close(&mut self) {
        self.supervisor.stop();
        self.state = ConnectionState::Closed;
        info!(exchange = %self.exchange(), "session closed");
        self.emit(SessionEvent::Close);
    }

    fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    fn request_id(&mut self) -> u64 {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }

    fn send(&mut self, frame: Frame) {
        if let Err(err) = self.transport.send(frame) {
            warn!(error = %err, "send failed");
            self.emit(SessionEvent::Error(err));
        }
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            trace!("event receiver dropped");
        }
    }
}
