use std::collections::HashMap;

use portfolio_analytics_lib::visitor_event::{CountryCount, VisitorEvent};

use crate::storage::EventStore;

// Gate for the public analytics view. Demonstration value, not a credential.
const ANALYTICS_ADMIN_PASSWORD: &str = "portfolio-admin";

/// Read-only views over the stored visitor events. All getters follow the
/// store's database-first fallback rule.
#[derive(Clone)]
pub struct AnalyticsAggregator {
    store: EventStore,
}

impl AnalyticsAggregator {
    pub fn new(store: EventStore) -> Self {
        Self { store }
    }

    pub async fn count(&self) -> usize {
        self.store.event_count().await
    }

    /// Distinct IP addresses across all events.
    pub async fn unique_visitor_count(&self) -> usize {
        self.store.distinct_ip_count().await
    }

    pub async fn list_all(&self) -> Vec<VisitorEvent> {
        self.store.all_events().await
    }

    /// Visits per country, most visited first (ties alphabetical). Events
    /// without a resolved country are grouped under "Unknown".
    pub async fn country_breakdown(&self) -> Vec<CountryCount> {
        let mut groups: HashMap<String, usize> = HashMap::new();
        for event in self.store.all_events().await {
            let country = event
                .country
                .as_deref()
                .filter(|country| !country.is_empty())
                .unwrap_or("Unknown");
            *groups.entry(country.to_string()).or_insert(0) += 1;
        }

        let mut breakdown: Vec<CountryCount> = groups
            .into_iter()
            .map(|(country, visits)| CountryCount { country, visits })
            .collect();
        breakdown.sort_by(|a, b| b.visits.cmp(&a.visits).then_with(|| a.country.cmp(&b.country)));

        breakdown
    }

    /// The truncated breakdown the admin dashboard charts (top 6 there).
    pub async fn top_countries(&self, limit: usize) -> Vec<CountryCount> {
        let mut breakdown = self.country_breakdown().await;
        breakdown.truncate(limit);
        breakdown
    }

    /// Mock password check guarding the analytics modal.
    pub fn verify_admin(&self, password: &str) -> bool {
        password == ANALYTICS_ADMIN_PASSWORD
    }
}

#[cfg(test)]
use crate::{kv_store::KvStore, storage::database::sample_event};

#[cfg(test)]
async fn aggregator_over(name: &str, events: &[VisitorEvent]) -> AnalyticsAggregator {
    let kv = KvStore::open(crate::test_data_dir(name)).await.unwrap();
    let store = EventStore::new(None, kv);
    for event in events {
        store.append(event).await.unwrap();
    }
    AnalyticsAggregator::new(store)
}

#[tokio::test]
async fn counts_and_listing() {
    let events = vec![
        sample_event("1.1.1.1", "/", Some("LK")),
        sample_event("1.1.1.1", "/about", Some("LK")),
        sample_event("2.2.2.2", "/", None),
    ];
    let aggregator = aggregator_over("aggregator_counts", &events).await;

    assert_eq!(aggregator.count().await, 3);
    assert_eq!(aggregator.unique_visitor_count().await, 2);
    assert!(aggregator.unique_visitor_count().await <= aggregator.count().await);
    assert_eq!(aggregator.list_all().await, events);
}

#[tokio::test]
async fn unique_count_equals_total_when_all_ips_distinct() {
    let events = vec![
        sample_event("1.1.1.1", "/", None),
        sample_event("2.2.2.2", "/", None),
        sample_event("3.3.3.3", "/", None),
    ];
    let aggregator = aggregator_over("aggregator_distinct", &events).await;

    assert_eq!(aggregator.unique_visitor_count().await, aggregator.count().await);
}

#[tokio::test]
async fn breakdown_groups_missing_country_as_unknown() {
    let events = vec![
        sample_event("1.1.1.1", "/", Some("LK")),
        sample_event("2.2.2.2", "/", Some("LK")),
        sample_event("3.3.3.3", "/", None),
    ];
    let aggregator = aggregator_over("aggregator_breakdown", &events).await;

    let breakdown = aggregator.country_breakdown().await;
    assert_eq!(
        breakdown,
        vec![
            CountryCount { country: "LK".to_string(), visits: 2 },
            CountryCount { country: "Unknown".to_string(), visits: 1 },
        ]
    );

    let top = aggregator.top_countries(1).await;
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].country, "LK");
}

#[tokio::test]
async fn verify_admin_accepts_only_the_mock_password() {
    let aggregator = aggregator_over("aggregator_admin", &[]).await;

    assert!(aggregator.verify_admin("portfolio-admin"));
    assert!(!aggregator.verify_admin("wrong"));
}
