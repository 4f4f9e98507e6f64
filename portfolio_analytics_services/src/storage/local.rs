use portfolio_analytics_lib::visitor_event::VisitorEvent;

use crate::{AnalyticsError, VISITOR_EVENTS_KEY, kv_store::KvStore};

/// Fallback event storage over the durable key-value store. All events live
/// as one JSON array under a fixed key; appends are read-modify-write and
/// not atomic across concurrent writers.
#[derive(Clone)]
pub struct LocalEventStore {
    kv: KvStore,
}

impl LocalEventStore {
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }

    /// An unreadable or malformed stored list reads as empty rather than
    /// failing the caller.
    pub async fn load_events(&self) -> Vec<VisitorEvent> {
        match self.kv.get(VISITOR_EVENTS_KEY).await {
            Ok(events) => events.unwrap_or_default(),
            Err(err) => {
                tracing::warn!("Failed to load visitor events from local storage: {err:?}");
                Vec::new()
            }
        }
    }

    pub async fn append_event(&self, event: &VisitorEvent) -> Result<(), AnalyticsError> {
        let mut events = self.load_events().await;
        events.push(event.clone());
        self.kv.set(VISITOR_EVENTS_KEY, &events).await
    }
}

#[cfg(test)]
use crate::storage::database::sample_event;

#[tokio::test]
async fn append_and_reload_preserves_events() {
    let kv = KvStore::open(crate::test_data_dir("local_store")).await.unwrap();
    let store = LocalEventStore::new(kv.clone());

    let events = vec![
        sample_event("1.1.1.1", "/", Some("LK")),
        sample_event("2.2.2.2", "/projects", None),
        sample_event("1.1.1.1", "/contact", Some("DK")),
    ];
    for event in &events {
        store.append_event(event).await.unwrap();
    }

    // A fresh store over the same directory sees the identical list.
    let reloaded = LocalEventStore::new(kv).load_events().await;
    assert_eq!(reloaded, events);
}

#[tokio::test]
async fn empty_store_reads_as_empty_list() {
    let kv = KvStore::open(crate::test_data_dir("local_empty")).await.unwrap();
    assert!(LocalEventStore::new(kv).load_events().await.is_empty());
}

#[tokio::test]
async fn malformed_stored_list_reads_as_empty() {
    let dir = crate::test_data_dir("local_malformed");
    let kv = KvStore::open(&dir).await.unwrap();

    tokio::fs::write(dir.join(format!("{VISITOR_EVENTS_KEY}.json")), b"[{broken")
        .await
        .unwrap();

    let store = LocalEventStore::new(kv);
    assert!(store.load_events().await.is_empty());

    // The next append starts a fresh list over the broken value.
    store.append_event(&sample_event("1.1.1.1", "/", None)).await.unwrap();
    assert_eq!(store.load_events().await.len(), 1);
}
