#![allow(dead_code)]

pub const VISITORS_TABLE_NAME: &str = "Visitors";
pub const TIMESTAMP: &str = "timestamp";
pub const IP_ADDRESS: &str = "ip_address";
pub const USER_AGENT: &str = "user_agent";
pub const PAGE: &str = "page";
pub const REFERRER: &str = "referrer";
pub const COUNTRY: &str = "country";
pub const COUNTRY_CODE: &str = "country_code";
