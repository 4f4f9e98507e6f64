use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One recorded page view with resolved IP and geolocation metadata.
/// Events are append-only; there is no update or delete path.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VisitorEvent {
    pub timestamp: DateTime<Utc>,
    pub ip_address: String,
    pub user_agent: String,
    pub page: String,
    pub referrer: String,
    pub country: Option<String>,
    pub country_code: Option<String>,
}

impl VisitorEvent {
    /// An empty referrer is recorded as the literal "direct".
    pub fn new(
        ip_address: String,
        context: &VisitContext,
        country: Option<String>,
        country_code: Option<String>,
    ) -> Self {
        let referrer = if context.referrer.is_empty() {
            "direct".to_string()
        } else {
            context.referrer.clone()
        };

        Self {
            timestamp: Utc::now(),
            ip_address,
            user_agent: context.user_agent.clone(),
            page: context.page.clone(),
            referrer,
            country,
            country_code,
        }
    }
}

/// Ambient request context a page view is recorded from: the path component
/// of the current URL, the client's user agent and the referrer (may be
/// empty).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VisitContext {
    pub page: String,
    pub user_agent: String,
    pub referrer: String,
}

/// One row of the per-country visit breakdown shown on the admin dashboard.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CountryCount {
    pub country: String,
    pub visits: usize,
}

#[test]
fn empty_referrer_becomes_direct() {
    let context = VisitContext {
        page: "/".to_string(),
        user_agent: "test-agent".to_string(),
        referrer: String::new(),
    };

    let event = VisitorEvent::new("93.184.216.34".to_string(), &context, None, None);
    assert_eq!(event.referrer, "direct");

    let context = VisitContext {
        referrer: "https://example.com".to_string(),
        ..context
    };
    let event = VisitorEvent::new("93.184.216.34".to_string(), &context, None, None);
    assert_eq!(event.referrer, "https://example.com");
}
