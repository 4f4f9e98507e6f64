use const_format::concatcp;
use portfolio_analytics_lib::visitor_event::VisitContext;

pub mod analytics_aggregator;
pub mod auth_store;
pub mod kv_store;
pub mod storage;
pub mod visitor_tracker;

pub use analytics_aggregator::AnalyticsAggregator;
pub use auth_store::AuthStore;
pub use kv_store::KvStore;
pub use storage::EventStore;
pub use visitor_tracker::{TrackerConfig, VisitorTracker};

pub const DATA_DIR: &str = "data/";
pub const DATABASE_PATH: &str = concatcp!(DATA_DIR, "analytics.db");

// Fixed keys in the durable fallback store.
pub const VISITOR_EVENTS_KEY: &str = "visitor_analytics";
pub const TOKEN_KEY: &str = "auth_token";
pub const USER_KEY: &str = "current_user";

pub const IP_LOOKUP_ENDPOINT: &str = "https://api.ipify.org?format=json";
pub const GEO_LOOKUP_ENDPOINT: &str = "https://ipapi.co";

#[derive(Debug)]
pub enum AnalyticsError {
    IpLookup(String),
    Geolocation(String),
    Database(String),
    Storage(String),
}

/// The three services over shared storage, constructed once at application
/// start and handed to consumers by reference.
pub struct Services {
    pub tracker: VisitorTracker,
    pub aggregator: AnalyticsAggregator,
    pub auth: AuthStore,
}

impl Services {
    pub async fn start(context: VisitContext) -> Result<Self, AnalyticsError> {
        let kv = KvStore::open_default().await?;
        let store = EventStore::start(kv.clone()).await;

        Ok(Services {
            tracker: VisitorTracker::new(store.clone(), context, TrackerConfig::default()),
            aggregator: AnalyticsAggregator::new(store),
            auth: AuthStore::start(kv).await,
        })
    }
}

#[cfg(test)]
pub(crate) fn test_data_dir(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!(
        "portfolio_analytics_{name}_{}",
        hex::encode(rand::random::<[u8; 8]>())
    ))
}

#[cfg(test)]
pub(crate) fn init_test_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=debug", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

#[tokio::test]
async fn start_services() {
    init_test_tracing();

    let context = VisitContext {
        page: "/".to_string(),
        user_agent: "test-agent".to_string(),
        referrer: String::new(),
    };

    let services = Services::start(context).await.unwrap();
    let _ = services.aggregator.count().await;
}
