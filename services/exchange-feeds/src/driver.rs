//! Async session driver
//!
//! Runs one [`Session`] on its own task. Inbound WebSocket messages, caller
//! commands and the heartbeat/watchdog intervals are multiplexed with
//! `tokio::select!`, so the session itself stays lock-free. The intervals
//! live on the task and are dropped with it on every close path.

use futures_util::{Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, Instrument};
use types::ids::{ExchangeId, Symbol};
use uuid::Uuid;

use crate::config::ExchangeSettings;
use crate::error::FeedError;
use crate::exchanges::ExchangeProfile;
use crate::registry::{ChannelKind, ChannelParams};
use crate::session::{ConnectionState, Session, SessionEvent};
use crate::transport::{connect, Frame, Transport};

enum Command {
    Subscribe {
        kind: ChannelKind,
        symbol: Symbol,
        params: ChannelParams,
        reply: oneshot::Sender<String>,
    },
    Unsubscribe {
        key: String,
        reply: oneshot::Sender<bool>,
    },
    Close,
}

/// Caller side of a running session.
pub struct SessionHandle {
    exchange: ExchangeId,
    session_id: Uuid,
    commands: mpsc::UnboundedSender<Command>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn exchange(&self) -> ExchangeId {
        self.exchange
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Next session event. `None` once the session task has finished.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    pub async fn subscribe_order_book(
        &self,
        symbol: Symbol,
        params: ChannelParams,
    ) -> Result<String, FeedError> {
        self.subscribe(ChannelKind::OrderBook, symbol, params).await
    }

    pub async fn subscribe_trades(&self, symbol: Symbol) -> Result<String, FeedError> {
        self.subscribe(ChannelKind::Trade, symbol, ChannelParams::default())
            .await
    }

    pub async fn subscribe_ticker(&self, symbol: Symbol) -> Result<String, FeedError> {
        self.subscribe(ChannelKind::Ticker, symbol, ChannelParams::default())
            .await
    }

    async fn subscribe(
        &self,
        kind: ChannelKind,
        symbol: Symbol,
        params: ChannelParams,
    ) -> Result<String, FeedError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Subscribe {
            kind,
            symbol,
            params,
            reply,
        })?;
        rx.await.map_err(|_| FeedError::SessionStopped)
    }

    /// Drop a subscription by key. `Ok(false)` for unknown keys.
    pub async fn unsubscribe(&self, key: impl Into<String>) -> Result<bool, FeedError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Unsubscribe {
            key: key.into(),
            reply,
        })?;
        rx.await.map_err(|_| FeedError::SessionStopped)
    }

    /// Ask the session to close. The `Close` event follows on the stream.
    pub fn close(&self) -> Result<(), FeedError> {
        self.command(Command::Close)
    }

    /// Wait for the session task to finish.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            debug!(error = %e, "session task ended abnormally");
        }
    }

    fn command(&self, command: Command) -> Result<(), FeedError> {
        self.commands
            .send(command)
            .map_err(|_| FeedError::SessionStopped)
    }
}

/// Connect to the configured exchange and start its session task.
pub async fn spawn_session(
    profile: Box<dyn ExchangeProfile>,
    settings: &ExchangeSettings,
) -> Result<SessionHandle, FeedError> {
    let url = settings.url(profile.as_ref());
    let config = settings.session_config(profile.as_ref());
    info!(exchange = %profile.exchange(), url = %url, "connecting");
    let (transport, stream, _writer) = connect(&url).await?;
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let session = Session::new(profile, transport, config, events_tx);
    Ok(spawn_with(session, stream, events_rx))
}

/// Start the task for an already-connected session.
///
/// `events` must be the receiver paired with the session's event sender.
pub fn spawn_with<T, S>(
    session: Session<T>,
    stream: S,
    events: mpsc::UnboundedReceiver<SessionEvent>,
) -> SessionHandle
where
    T: Transport + 'static,
    S: Stream<Item = Result<Message, WsError>> + Send + Unpin + 'static,
{
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let exchange = session.exchange();
    let session_id = session.session_id();
    let span = session.span().clone();
    let task = tokio::spawn(run(session, stream, commands_rx).instrument(span));
    SessionHandle {
        exchange,
        session_id,
        commands: commands_tx,
        events,
        task,
    }
}

fn timer(period: Option<std::time::Duration>) -> Option<Interval> {
    period.map(|period| {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    })
}

/// Tick of an optional interval. A disabled timer never fires.
async fn tick(interval: &mut Option<Interval>) -> Instant {
    match interval {
        Some(interval) => interval.tick().await,
        None => std::future::pending().await,
    }
}

async fn run<T, S>(
    mut session: Session<T>,
    mut stream: S,
    mut commands: mpsc::UnboundedReceiver<Command>,
) where
    T: Transport,
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    session.open(Instant::now());
    let policy = *session.liveness_policy();
    let mut heartbeat = timer(policy.ping_interval);
    let mut watchdog = timer(policy.watchdog_interval);

    loop {
        tokio::select! {
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Close(frame))) => {
                    debug!(frame = ?frame, "close frame received");
                    session.on_transport_closed();
                }
                Some(Ok(message)) => {
                    if let Some(frame) = Frame::from_message(message) {
                        session.handle_frame(frame, Instant::now());
                    }
                }
                Some(Err(e)) => {
                    session.on_transport_error(e.to_string());
                    session.on_transport_closed();
                }
                None => session.on_transport_closed(),
            },
            command = commands.recv() => match command {
                Some(Command::Subscribe { kind, symbol, params, reply }) => {
                    let key = session.subscribe(kind, symbol, params);
                    let _ = reply.send(key);
                }
                Some(Command::Unsubscribe { key, reply }) => {
                    let _ = reply.send(session.unsubscribe(&key));
                }
                Some(Command::Close) | None => session.close(),
            },
            now = tick(&mut heartbeat) => session.on_heartbeat_tick(now),
            now = tick(&mut watchdog) => session.on_watchdog_tick(now),
        }

        if session.state() == ConnectionState::Closed {
            break;
        }
    }
    info!(exchange = %session.exchange(), "session task finished");
}
