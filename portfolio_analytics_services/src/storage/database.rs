use std::path::{Path, PathBuf};

use const_format::concatcp;
use portfolio_analytics_lib::visitor_event::VisitorEvent;
use sqlx::{Executor, Pool, Sqlite, SqlitePool, query, query_as, sqlite::SqliteConnectOptions};

use crate::{AnalyticsError, DATABASE_PATH};

use super::constants::*;

/// The primary event backend. Holds one append-only table of visitor
/// events; connection failure at startup selects the local fallback
/// instead.
#[derive(Clone)]
pub struct AnalyticsDatabase {
    pool: Pool<Sqlite>,
}

impl AnalyticsDatabase {
    /// Connects to the database under the project data directory.
    pub async fn connect() -> Result<Self, AnalyticsError> {
        let root: PathBuf = project_root::get_project_root()
            .map_err(|_| AnalyticsError::Database("Failed to locate project root".to_string()))?;
        Self::connect_to(root.join(DATABASE_PATH)).await
    }

    pub async fn connect_to(path: impl AsRef<Path>) -> Result<Self, AnalyticsError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|_| AnalyticsError::Database("Failed to connect to database".to_string()))?;

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    pub async fn init(&self) -> Result<(), AnalyticsError> {
        self.pool
            .execute(concatcp!(
                "
            CREATE TABLE IF NOT EXISTS ", VISITORS_TABLE_NAME, "(",
                TIMESTAMP,    " TIMESTAMP NOT NULL,",
                IP_ADDRESS,   " TEXT NOT NULL,",
                USER_AGENT,   " TEXT NOT NULL,",
                PAGE,         " TEXT NOT NULL,",
                REFERRER,     " TEXT NOT NULL,",
                COUNTRY,      " TEXT,",
                COUNTRY_CODE, " TEXT)"
            ))
            .await
            .map_err(|_| AnalyticsError::Database("Failed to create visitors table".to_string()))
            .map(|_| ())
    }

    pub async fn insert_event(&self, event: &VisitorEvent) -> Result<(), AnalyticsError> {
        query(concatcp!(
            "
            INSERT INTO ", VISITORS_TABLE_NAME, "(",
            TIMESTAMP, ", ", IP_ADDRESS, ", ", USER_AGENT, ", ", PAGE, ", ", REFERRER, ", ", COUNTRY, ", ", COUNTRY_CODE, ")
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
        ))
        .bind(event.timestamp)
        .bind(&event.ip_address)
        .bind(&event.user_agent)
        .bind(&event.page)
        .bind(&event.referrer)
        .bind(&event.country)
        .bind(&event.country_code)
        .execute(&self.pool)
        .await
        .map_err(|_| AnalyticsError::Database("Failed to insert visitor event".to_string()))
        .map(|_| ())
    }

    pub async fn get_events(&self) -> Result<Vec<VisitorEvent>, AnalyticsError> {
        query_as::<_, VisitorEvent>(concatcp!("SELECT * FROM ", VISITORS_TABLE_NAME))
            .fetch_all(&self.pool)
            .await
            .map_err(|_| AnalyticsError::Database("Failed to get visitor events".to_string()))
    }

    pub async fn count_events(&self) -> Result<usize, AnalyticsError> {
        query_as::<_, (i64,)>(concatcp!("SELECT COUNT(*) FROM ", VISITORS_TABLE_NAME))
            .fetch_one(&self.pool)
            .await
            .map_err(|_| AnalyticsError::Database("Failed to count visitor events".to_string()))
            .map(|row| row.0 as usize)
    }

    pub async fn distinct_ip_count(&self) -> Result<usize, AnalyticsError> {
        query_as::<_, (i64,)>(concatcp!(
            "SELECT COUNT(DISTINCT ", IP_ADDRESS, ") FROM ", VISITORS_TABLE_NAME
        ))
        .fetch_one(&self.pool)
        .await
        .map_err(|_| AnalyticsError::Database("Failed to count distinct visitors".to_string()))
        .map(|row| row.0 as usize)
    }
}

#[cfg(test)]
use portfolio_analytics_lib::visitor_event::VisitContext;

#[cfg(test)]
pub(crate) fn sample_event(ip: &str, page: &str, country: Option<&str>) -> VisitorEvent {
    let context = VisitContext {
        page: page.to_string(),
        user_agent: "test-agent".to_string(),
        referrer: String::new(),
    };

    VisitorEvent::new(
        ip.to_string(),
        &context,
        country.map(str::to_string),
        country.map(str::to_string),
    )
}

#[tokio::test]
async fn insert_scan_count_distinct() {
    let dir = crate::test_data_dir("database");
    tokio::fs::create_dir_all(&dir).await.unwrap();
    let db = AnalyticsDatabase::connect_to(dir.join("analytics.db")).await.unwrap();

    db.insert_event(&sample_event("1.1.1.1", "/", Some("LK"))).await.unwrap();
    db.insert_event(&sample_event("1.1.1.1", "/about", None)).await.unwrap();
    db.insert_event(&sample_event("2.2.2.2", "/", Some("DK"))).await.unwrap();

    assert_eq!(db.count_events().await.unwrap(), 3);
    assert_eq!(db.distinct_ip_count().await.unwrap(), 2);

    let events = db.get_events().await.unwrap();
    assert_eq!(events.len(), 3);
    assert_eq!(events[0].ip_address, "1.1.1.1");
    assert_eq!(events[0].country.as_deref(), Some("LK"));
    assert_eq!(events[0].referrer, "direct");
    assert_eq!(events[1].page, "/about");
    assert_eq!(events[1].country, None);
    assert_eq!(events[1].country_code, None);
}
