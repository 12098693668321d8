//! Per-session channel registry
//!
//! Maps exchange-specific subscription keys to what the consumer asked for.
//! Keys are computed by the exchange profile from the subscribe request and
//! recomputed from each inbound message, so both sides agree without the
//! registry knowing any wire format.
//!
//! Some exchanges identify a channel by an id they assign in the
//! confirmation (aliases), and some confirm by echoing only the request id
//! (tracked requests). Both resolve back to the canonical key. One tracked
//! request may cover several keys when the exchange subscribes a whole
//! channel in one call.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;
use types::ids::Symbol;

/// What a subscription delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    OrderBook,
    Trade,
    Ticker,
    /// Private channel. Registered for pass-through but never normalized.
    Auth,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelKind::OrderBook => "order_book",
            ChannelKind::Trade => "trade",
            ChannelKind::Ticker => "ticker",
            ChannelKind::Auth => "auth",
        };
        f.write_str(s)
    }
}

/// Optional order book parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelParams {
    /// Number of price levels requested.
    pub depth: Option<u32>,
    /// Price aggregation bucket (e.g. `P0`, `R0`, `step0`).
    pub precision: Option<String>,
}

impl ChannelParams {
    pub fn with_depth(depth: u32) -> Self {
        Self {
            depth: Some(depth),
            precision: None,
        }
    }

    pub fn precision(mut self, precision: impl Into<String>) -> Self {
        self.precision = Some(precision.into());
        self
    }
}

/// One registered subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSubscription {
    pub key: String,
    pub kind: ChannelKind,
    pub symbol: Symbol,
    pub params: ChannelParams,
    /// Set once the exchange confirms the subscription.
    pub acknowledged: bool,
    /// Set once the first trade batch has been seen on this channel.
    pub primed: bool,
    /// Exchange-assigned channel id bound to this key, if any.
    pub alias: Option<String>,
}

/// Subscription table owned by one session.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    entries: BTreeMap<String, ChannelSubscription>,
    aliases: BTreeMap<String, String>,
    pending_requests: BTreeMap<u64, Vec<String>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a subscription, replacing any entry under the same key.
    ///
    /// The new entry starts unacknowledged. Returns the replaced entry.
    pub fn register(
        &mut self,
        key: impl Into<String>,
        kind: ChannelKind,
        symbol: Symbol,
        params: ChannelParams,
    ) -> Option<ChannelSubscription> {
        let key = key.into();
        let replaced = self.unregister(&key);
        debug!(key = %key, kind = %kind, symbol = %symbol, "channel registered");
        self.entries.insert(
            key.clone(),
            ChannelSubscription {
                key,
                kind,
                symbol,
                params,
                acknowledged: false,
                primed: false,
                alias: None,
            },
        );
        replaced
    }

    /// Mark a subscription as confirmed. Returns false for unknown keys.
    pub fn acknowledge(&mut self, key: &str) -> bool {
        match self.entries.get_mut(key) {
            Some(sub) => {
                sub.acknowledged = true;
                true
            }
            None => false,
        }
    }

    /// Remove a subscription along with its alias and pending requests.
    pub fn unregister(&mut self, key: &str) -> Option<ChannelSubscription> {
        let removed = self.entries.remove(key)?;
        if let Some(alias) = &removed.alias {
            self.aliases.remove(alias);
        }
        self.pending_requests.retain(|_, keys| {
            keys.retain(|k| k != key);
            !keys.is_empty()
        });
        Some(removed)
    }

    /// Bind an exchange-assigned channel id to an existing key.
    pub fn bind_alias(&mut self, alias: impl Into<String>, key: &str) -> bool {
        let alias = alias.into();
        let Some(sub) = self.entries.get_mut(key) else {
            return false;
        };
        if let Some(previous) = sub.alias.replace(alias.clone()) {
            self.aliases.remove(&previous);
        }
        self.aliases.insert(alias, key.to_string());
        true
    }

    /// Remember that an outgoing request id covers `key`.
    pub fn track_request(&mut self, request_id: u64, key: impl Into<String>) {
        self.pending_requests
            .entry(request_id)
            .or_default()
            .push(key.into());
    }

    /// Acknowledge every subscription a request id was tracked for.
    ///
    /// Returns the acknowledged keys.
    pub fn acknowledge_request(&mut self, request_id: u64) -> Vec<String> {
        let keys = self.pending_requests.remove(&request_id).unwrap_or_default();
        keys.into_iter().filter(|key| self.acknowledge(key)).collect()
    }

    /// Reset a subscription that is being requested again: unconfirmed, and
    /// waiting for its first trade batch. Returns false for unknown keys.
    pub fn rearm(&mut self, key: &str) -> bool {
        match self.entries.get_mut(key) {
            Some(sub) => {
                sub.acknowledged = false;
                sub.primed = false;
                true
            }
            None => false,
        }
    }

    /// Look up a subscription by key, then by alias.
    pub fn resolve(&self, route: &str) -> Option<&ChannelSubscription> {
        self.entries.get(route).or_else(|| {
            self.aliases
                .get(route)
                .and_then(|key| self.entries.get(key))
        })
    }

    pub fn resolve_mut(&mut self, route: &str) -> Option<&mut ChannelSubscription> {
        let key = if self.entries.contains_key(route) {
            route.to_string()
        } else {
            self.aliases.get(route)?.clone()
        };
        self.entries.get_mut(&key)
    }

    pub fn get(&self, key: &str) -> Option<&ChannelSubscription> {
        self.entries.get(key)
    }

    /// Drop every subscription, alias and pending request.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.aliases.clear();
        self.pending_requests.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Subscriptions in key order.
    pub fn iter(&self) -> impl Iterator<Item = &ChannelSubscription> {
        self.entries.values()
    }
}
