//! Subscription tracking and candle routing.

use super::MessageOut;
use crate::datafeed::{CandleSink, StreamParams};
use crate::domain::bar::CandleUpdate;
use crate::shared::SubscriptionId;

use indexmap::IndexMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Open subscriptions, in the order they were made, for resubscribe after a reconnect.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionBook {
    active: IndexMap<SubscriptionId, StreamParams>,
}

impl SubscriptionBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Follow an outbound message: subscribe adds, unsubscribe removes.
    pub fn track(&mut self, msg: &MessageOut) {
        match msg {
            MessageOut::Ohlcv { payload, .. } => {
                if self
                    .active
                    .insert(payload.subscription_id.clone(), payload.params.clone())
                    .is_none()
                {
                    tracing::debug!(id = %payload.subscription_id, "tracking subscription");
                }
            }
            MessageOut::Unsubscribe { payload, .. } => {
                if self.active.shift_remove(&payload.subscription_id).is_some() {
                    tracing::debug!(id = %payload.subscription_id, "stopped tracking subscription");
                }
            }
            MessageOut::Ping => {}
        }
    }

    /// Messages that restore every tracked subscription.
    pub fn resubscribe_messages(&self, authorization: Option<&str>) -> Vec<MessageOut> {
        self.active
            .iter()
            .map(|(id, params)| {
                MessageOut::ohlcv(authorization.map(str::to_string), id.clone(), params.clone())
            })
            .collect()
    }

    pub fn contains(&self, id: &SubscriptionId) -> bool {
        self.active.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

impl FromIterator<(SubscriptionId, StreamParams)> for SubscriptionBook {
    fn from_iter<I: IntoIterator<Item = (SubscriptionId, StreamParams)>>(iter: I) -> Self {
        Self {
            active: iter.into_iter().collect(),
        }
    }
}

struct SinkEntry {
    params: StreamParams,
    sink: CandleSink,
}

/// Sinks by subscription id, shared between the public client and its
/// background task.
///
/// Each sink keeps the params it was opened with, so a fresh connection task
/// can restore every stream that is still listened to.
#[derive(Clone, Default)]
pub struct SinkRegistry {
    sinks: Arc<Mutex<IndexMap<SubscriptionId, SinkEntry>>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: SubscriptionId, params: StreamParams, sink: CandleSink) {
        self.lock().insert(id, SinkEntry { params, sink });
    }

    pub fn remove(&self, id: &SubscriptionId) -> bool {
        self.lock().shift_remove(id).is_some()
    }

    /// Every live stream with its params, oldest first.
    pub fn streams(&self) -> Vec<(SubscriptionId, StreamParams)> {
        self.lock()
            .iter()
            .map(|(id, entry)| (id.clone(), entry.params.clone()))
            .collect()
    }

    /// Hand `candle` to the sink for `id`. Returns `false` if nobody listens.
    ///
    /// The sink runs outside the lock.
    pub fn dispatch(&self, id: &SubscriptionId, candle: CandleUpdate) -> bool {
        let sink = self.lock().get(id).map(|entry| Arc::clone(&entry.sink));
        match sink {
            Some(sink) => {
                sink(candle);
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, IndexMap<SubscriptionId, SinkEntry>> {
        self.sinks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::asset::AssetTarget;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn params(address: &str) -> StreamParams {
        StreamParams {
            period: "1m".into(),
            chain_id: "evm:1".into(),
            target: AssetTarget::Pool {
                address: address.into(),
            },
        }
    }

    #[test]
    fn test_track_subscribe_and_unsubscribe() {
        let mut book = SubscriptionBook::new();
        let id = SubscriptionId::new("sub-1");
        let sub = MessageOut::ohlcv(None, id.clone(), params("0xa"));

        book.track(&sub);
        book.track(&sub);
        assert_eq!(book.len(), 1);
        assert!(book.contains(&id));

        book.track(&MessageOut::unsubscribe(None, id.clone()));
        assert!(book.is_empty());
    }

    #[test]
    fn test_ping_is_not_tracked() {
        let mut book = SubscriptionBook::new();
        book.track(&MessageOut::Ping);
        assert!(book.is_empty());
    }

    #[test]
    fn test_resubscribe_preserves_order_and_key() {
        let mut book = SubscriptionBook::new();
        book.track(&MessageOut::ohlcv(None, SubscriptionId::new("b"), params("0xb")));
        book.track(&MessageOut::ohlcv(None, SubscriptionId::new("a"), params("0xa")));

        let msgs = book.resubscribe_messages(Some("key"));
        let ids: Vec<_> = msgs
            .iter()
            .map(|m| match m {
                MessageOut::Ohlcv {
                    authorization,
                    payload,
                } => {
                    assert_eq!(authorization.as_deref(), Some("key"));
                    payload.subscription_id.to_string()
                }
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn test_dispatch_routes_by_id() {
        let sinks = SinkRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        sinks.insert(
            SubscriptionId::new("sub-1"),
            params("0xa"),
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert!(sinks.dispatch(&SubscriptionId::new("sub-1"), CandleUpdate::default()));
        assert!(!sinks.dispatch(&SubscriptionId::new("sub-2"), CandleUpdate::default()));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(sinks.remove(&SubscriptionId::new("sub-1")));
        assert!(sinks.is_empty());
    }

    #[test]
    fn test_book_seeded_from_live_sinks() {
        let sinks = SinkRegistry::new();
        sinks.insert(SubscriptionId::new("b"), params("0xb"), Arc::new(|_| {}));
        sinks.insert(SubscriptionId::new("a"), params("0xa"), Arc::new(|_| {}));
        sinks.insert(SubscriptionId::new("c"), params("0xc"), Arc::new(|_| {}));
        assert!(sinks.remove(&SubscriptionId::new("c")));

        let book: SubscriptionBook = sinks.streams().into_iter().collect();
        assert_eq!(book.len(), 2);
        assert!(!book.contains(&SubscriptionId::new("c")));

        let restored: Vec<_> = book
            .resubscribe_messages(None)
            .into_iter()
            .map(|m| match m {
                MessageOut::Ohlcv { payload, .. } => (payload.subscription_id.to_string(), payload.params),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(
            restored,
            vec![("b".to_string(), params("0xb")), ("a".to_string(), params("0xa"))]
        );
    }
}
