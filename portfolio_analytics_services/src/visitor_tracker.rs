use portfolio_analytics_lib::visitor_event::{VisitContext, VisitorEvent};
use serde::Deserialize;

use crate::{AnalyticsError, GEO_LOOKUP_ENDPOINT, IP_LOOKUP_ENDPOINT, storage::EventStore};

/// Lookup endpoints, overridable so tests can point at a local stub.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub ip_lookup_endpoint: String,
    pub geo_lookup_endpoint: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            ip_lookup_endpoint: IP_LOOKUP_ENDPOINT.to_string(),
            geo_lookup_endpoint: GEO_LOOKUP_ENDPOINT.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct IpLookupResponse {
    ip: String,
}

#[derive(Deserialize)]
struct GeoLookupResponse {
    country_name: Option<String>,
    country_code: Option<String>,
    #[serde(default)]
    error: bool,
}

/// Records one visitor event per page view.
#[derive(Clone)]
pub struct VisitorTracker {
    client: reqwest::Client,
    config: TrackerConfig,
    context: VisitContext,
    store: EventStore,
}

impl VisitorTracker {
    pub fn new(store: EventStore, context: VisitContext, config: TrackerConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            context,
            store,
        }
    }

    /// Records the current page view. The IP lookup must succeed for an
    /// event to exist at all; a failed geolocation lookup leaves both
    /// country fields unset, and a failed persistence write is logged
    /// without failing the call. Concurrent calls are not deduplicated.
    pub async fn track(&self) -> Result<VisitorEvent, AnalyticsError> {
        let ip_address = self.lookup_ip().await?;

        let (country, country_code) = match self.lookup_geolocation(&ip_address).await {
            Ok(geo) => geo,
            Err(err) => {
                tracing::warn!("Failed to fetch geolocation data: {err:?}");
                (None, None)
            }
        };

        let event = VisitorEvent::new(ip_address, &self.context, country, country_code);

        if let Err(err) = self.store.append(&event).await {
            tracing::error!("Failed to store visitor event: {err:?}");
        }

        Ok(event)
    }

    async fn lookup_ip(&self) -> Result<String, AnalyticsError> {
        let response = self
            .client
            .get(&self.config.ip_lookup_endpoint)
            .send()
            .await
            .map_err(|_| AnalyticsError::IpLookup("IP lookup request failed".to_string()))?
            .json::<IpLookupResponse>()
            .await
            .map_err(|_| AnalyticsError::IpLookup("Malformed IP lookup response".to_string()))?;

        if response.ip.is_empty() {
            return Err(AnalyticsError::IpLookup("IP lookup returned an empty address".to_string()));
        }

        Ok(response.ip)
    }

    async fn lookup_geolocation(
        &self,
        ip_address: &str,
    ) -> Result<(Option<String>, Option<String>), AnalyticsError> {
        let url = format!("{}/{}/json/", self.config.geo_lookup_endpoint, ip_address);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|_| AnalyticsError::Geolocation("Geolocation request failed".to_string()))?
            .json::<GeoLookupResponse>()
            .await
            .map_err(|_| AnalyticsError::Geolocation("Malformed geolocation response".to_string()))?;

        // The lookup service reports failures in-band with an error flag.
        if response.error {
            return Ok((None, None));
        }

        let country = response.country_name.filter(|name| !name.is_empty());
        let country_code = response.country_code.filter(|code| !code.is_empty());

        Ok((country, country_code))
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::kv_store::KvStore;

    // Minimal one-endpoint HTTP stub; answers every request with the same
    // JSON body.
    async fn spawn_json_endpoint(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
            }
        });

        format!("http://{addr}")
    }

    // A port nothing listens on; connections are refused immediately.
    async fn unreachable_endpoint() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}")
    }

    fn page_context() -> VisitContext {
        VisitContext {
            page: "/".to_string(),
            user_agent: "test-agent".to_string(),
            referrer: String::new(),
        }
    }

    async fn local_store(name: &str) -> EventStore {
        let kv = KvStore::open(crate::test_data_dir(name)).await.unwrap();
        EventStore::new(None, kv)
    }

    #[tokio::test]
    async fn track_records_event_with_geolocation() {
        crate::init_test_tracing();

        let config = TrackerConfig {
            ip_lookup_endpoint: spawn_json_endpoint(r#"{"ip":"93.184.216.34"}"#).await,
            geo_lookup_endpoint: spawn_json_endpoint(
                r#"{"country_name":"Sri Lanka","country_code":"LK"}"#,
            )
            .await,
        };
        let store = local_store("tracker_ok").await;
        let tracker = VisitorTracker::new(store.clone(), page_context(), config);

        let event = tracker.track().await.unwrap();
        assert_eq!(event.ip_address, "93.184.216.34");
        assert_eq!(event.country.as_deref(), Some("Sri Lanka"));
        assert_eq!(event.country_code.as_deref(), Some("LK"));
        assert_eq!(event.referrer, "direct");

        let stored = store.all_events().await;
        assert_eq!(stored, vec![event]);
    }

    #[tokio::test]
    async fn count_matches_successful_tracks() {
        let config = TrackerConfig {
            ip_lookup_endpoint: spawn_json_endpoint(r#"{"ip":"93.184.216.34"}"#).await,
            geo_lookup_endpoint: spawn_json_endpoint(
                r#"{"country_name":"Sri Lanka","country_code":"LK"}"#,
            )
            .await,
        };
        let store = local_store("tracker_counts").await;
        let tracker = VisitorTracker::new(store.clone(), page_context(), config);

        for _ in 0..3 {
            tracker.track().await.unwrap();
        }

        // Same IP every time: three views, one unique visitor.
        assert_eq!(store.event_count().await, 3);
        assert_eq!(store.distinct_ip_count().await, 1);
    }

    #[tokio::test]
    async fn geolocation_failure_still_records_event() {
        let config = TrackerConfig {
            ip_lookup_endpoint: spawn_json_endpoint(r#"{"ip":"93.184.216.34"}"#).await,
            geo_lookup_endpoint: unreachable_endpoint().await,
        };
        let store = local_store("tracker_geo_down").await;
        let tracker = VisitorTracker::new(store.clone(), page_context(), config);

        let event = tracker.track().await.unwrap();
        assert_eq!(event.country, None);
        assert_eq!(event.country_code, None);
        assert_eq!(store.all_events().await.len(), 1);
    }

    #[tokio::test]
    async fn geolocation_error_flag_leaves_country_unset() {
        let config = TrackerConfig {
            ip_lookup_endpoint: spawn_json_endpoint(r#"{"ip":"93.184.216.34"}"#).await,
            geo_lookup_endpoint: spawn_json_endpoint(r#"{"error":true,"reason":"Reserved IP"}"#)
                .await,
        };
        let store = local_store("tracker_geo_error").await;
        let tracker = VisitorTracker::new(store.clone(), page_context(), config);

        let event = tracker.track().await.unwrap();
        assert_eq!(event.country, None);
        assert_eq!(event.country_code, None);
    }

    #[tokio::test]
    async fn ip_lookup_failure_aborts_track() {
        let config = TrackerConfig {
            ip_lookup_endpoint: unreachable_endpoint().await,
            geo_lookup_endpoint: spawn_json_endpoint(
                r#"{"country_name":"Sri Lanka","country_code":"LK"}"#,
            )
            .await,
        };
        let store = local_store("tracker_ip_down").await;
        let tracker = VisitorTracker::new(store.clone(), page_context(), config);

        assert!(matches!(tracker.track().await, Err(AnalyticsError::IpLookup(_))));
        // No event is recorded without a resolvable IP.
        assert_eq!(store.event_count().await, 0);
    }
}
