use anyhow::Context;
use exchange_feeds::config::{ExchangeSettings, FeedsConfig};
use exchange_feeds::driver::{spawn_session, SessionHandle};
use exchange_feeds::exchanges::profile_for;
use exchange_feeds::logging::init_tracing;
use exchange_feeds::session::SessionEvent;
use exchange_feeds::SERVICE_VERSION;
use tokio::task::JoinSet;
use tracing::{error, info, trace, warn};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("FEEDS_CONFIG").ok());
    let cfg = FeedsConfig::load(path.as_deref()).context("failed to load configuration")?;
    init_tracing(cfg.log.json).context("failed to initialize tracing")?;

    info!(
        version = SERVICE_VERSION,
        exchanges = cfg.exchanges.len(),
        "Starting exchange feeds"
    );

    let mut feeds = JoinSet::new();
    for settings in cfg.exchanges {
        feeds.spawn(run_feed(settings));
    }

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            info!("Shutdown requested");
        }
        _ = wait_all(&mut feeds) => info!("All feeds stopped"),
    }

    // Dropping the handles closes every session
    feeds.shutdown().await;
    Ok(())
}

async fn wait_all(feeds: &mut JoinSet<anyhow::Result<()>>) {
    while let Some(joined) = feeds.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %format!("{e:#}"), "feed failed"),
            Err(e) => error!(error = %e, "feed task panicked"),
        }
    }
}

async fn run_feed(settings: ExchangeSettings) -> anyhow::Result<()> {
    let exchange = settings.exchange;
    let mut handle = spawn_session(profile_for(exchange), &settings)
        .await
        .with_context(|| format!("{exchange}: connection failed"))?;

    while let Some(event) = handle.recv().await {
        match event {
            SessionEvent::Open => subscribe_all(&handle, &settings).await?,
            SessionEvent::Close => info!(exchange = %exchange, "feed closed"),
            SessionEvent::Error(err) => warn!(exchange = %exchange, error = %err, "feed error"),
            SessionEvent::OrderBook(symbol, delta) => info!(
                exchange = %exchange,
                symbol = %symbol,
                asks = delta.asks.len(),
                bids = delta.bids.len(),
                "order book delta"
            ),
            SessionEvent::Trade(symbol, trades) => {
                for trade in trades {
                    info!(
                        exchange = %exchange,
                        symbol = %symbol,
                        id = %trade.id,
                        price = %trade.price,
                        amount = %trade.amount,
                        side = ?trade.side,
                        timestamp = trade.timestamp,
                        "trade"
                    );
                }
            }
            SessionEvent::Ticker(symbol, ticker) => info!(
                exchange = %exchange,
                symbol = %symbol,
                bid = ?ticker.bid,
                ask = ?ticker.ask,
                last = ?ticker.last,
                "ticker"
            ),
            SessionEvent::Message(msg) => trace!(exchange = %exchange, message = %msg, "raw message"),
        }
    }
    Ok(())
}

async fn subscribe_all(handle: &SessionHandle, settings: &ExchangeSettings) -> anyhow::Result<()> {
    for symbol in &settings.order_books {
        handle
            .subscribe_order_book(symbol.clone(), settings.book_params())
            .await?;
    }
    for symbol in &settings.trades {
        handle.subscribe_trades(symbol.clone()).await?;
    }
    for symbol in &settings.tickers {
        handle.subscribe_ticker(symbol.clone()).await?;
    }
    Ok(())
}
