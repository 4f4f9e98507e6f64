use std::collections::HashSet;

use portfolio_analytics_lib::visitor_event::VisitorEvent;

use crate::{AnalyticsError, kv_store::KvStore};

pub mod constants;
pub mod database;
pub mod local;

use database::AnalyticsDatabase;
use local::LocalEventStore;

/// Event persistence behind one interface. Operations go to the database
/// when one is connected and fall back to the local store when it is
/// absent or a call fails; a single call is always served entirely by one
/// backend. Callers never learn which backend answered.
#[derive(Clone)]
pub struct EventStore {
    database: Option<AnalyticsDatabase>,
    local: LocalEventStore,
}

impl EventStore {
    /// Connects the database backend, dropping to local-only operation when
    /// the connection fails.
    pub async fn start(kv: KvStore) -> Self {
        let database = match AnalyticsDatabase::connect().await {
            Ok(database) => Some(database),
            Err(err) => {
                tracing::warn!("Analytics database unavailable, using local storage: {err:?}");
                None
            }
        };

        Self::new(database, kv)
    }

    pub fn new(database: Option<AnalyticsDatabase>, kv: KvStore) -> Self {
        Self {
            database,
            local: LocalEventStore::new(kv),
        }
    }

    pub async fn append(&self, event: &VisitorEvent) -> Result<(), AnalyticsError> {
        if let Some(database) = &self.database {
            match database.insert_event(event).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    tracing::error!("Failed to store visitor event in database: {err:?}")
                }
            }
        }

        self.local.append_event(event).await
    }

    pub async fn all_events(&self) -> Vec<VisitorEvent> {
        if let Some(database) = &self.database {
            match database.get_events().await {
                Ok(events) => return events,
                Err(err) => {
                    tracing::error!("Failed to fetch visitor events from database: {err:?}")
                }
            }
        }

        self.local.load_events().await
    }

    pub async fn event_count(&self) -> usize {
        if let Some(database) = &self.database {
            match database.count_events().await {
                Ok(count) => return count,
                Err(err) => {
                    tracing::error!("Failed to count visitor events in database: {err:?}")
                }
            }
        }

        self.local.load_events().await.len()
    }

    pub async fn distinct_ip_count(&self) -> usize {
        if let Some(database) = &self.database {
            match database.distinct_ip_count().await {
                Ok(count) => return count,
                Err(err) => {
                    tracing::error!("Failed to count distinct visitors in database: {err:?}")
                }
            }
        }

        let events = self.local.load_events().await;
        let unique: HashSet<&str> = events.iter().map(|event| event.ip_address.as_str()).collect();
        unique.len()
    }
}

#[cfg(test)]
use database::sample_event;

#[tokio::test]
async fn local_only_store_serves_all_reads() {
    let kv = KvStore::open(crate::test_data_dir("event_store_local")).await.unwrap();
    let store = EventStore::new(None, kv);

    store.append(&sample_event("1.1.1.1", "/", Some("LK"))).await.unwrap();
    store.append(&sample_event("1.1.1.1", "/about", Some("LK"))).await.unwrap();
    store.append(&sample_event("2.2.2.2", "/", None)).await.unwrap();

    assert_eq!(store.event_count().await, 3);
    assert_eq!(store.distinct_ip_count().await, 2);
    assert_eq!(store.all_events().await.len(), 3);
}

#[tokio::test]
async fn database_store_agrees_with_local_counts() {
    let dir = crate::test_data_dir("event_store_db");
    tokio::fs::create_dir_all(&dir).await.unwrap();
    let database = AnalyticsDatabase::connect_to(dir.join("analytics.db")).await.unwrap();
    let kv = KvStore::open(&dir).await.unwrap();

    let store = EventStore::new(Some(database), kv);

    store.append(&sample_event("1.1.1.1", "/", Some("LK"))).await.unwrap();
    store.append(&sample_event("2.2.2.2", "/", None)).await.unwrap();

    assert_eq!(store.event_count().await, 2);
    assert_eq!(store.distinct_ip_count().await, 2);
    assert_eq!(store.all_events().await.len(), 2);

    // Nothing leaked into the fallback path.
    assert!(store.local.load_events().await.is_empty());
}
