//! Service settings shared by every subcommand.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cadence_bluesky::DEFAULT_PDS_URL;
use cadence_scheduler::{
    AccountRegistry, ContentStore, DEFAULT_BUDGET, DEFAULT_MAX_RETRIES, Publisher, PublisherConfig,
};
use cadence_store::SqliteStore;
use clap::Args;
use tracing::debug;

use crate::CadenceError;
use crate::live::{CardSource, DEFAULT_SCRYFALL_URL};
use crate::sink::{BlueskySink, DEFAULT_MEDIA_SETTLE_SECS};

/// User agent sent to PDSes, media hosts, and the card API.
pub const USER_AGENT: &str = concat!("cadence/", env!("CARGO_PKG_VERSION"));

#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// SQLite database path
    #[arg(long, global = true, env = "CADENCE_DB", default_value = "cadence.db")]
    pub db: PathBuf,

    /// PDS for accounts that do not name their own
    #[arg(long, global = true, env = "CADENCE_PDS_URL", default_value = DEFAULT_PDS_URL)]
    pub pds_url: String,

    /// Base URL of the Scryfall-compatible card API
    #[arg(long, global = true, env = "CADENCE_SCRYFALL_URL", default_value = DEFAULT_SCRYFALL_URL)]
    pub scryfall_url: String,

    /// Wall-clock budget per invocation, in seconds
    #[arg(long, global = true, env = "CADENCE_BUDGET_SECS", default_value_t = DEFAULT_BUDGET.as_secs())]
    pub budget_secs: u64,

    /// Candidate items tried per account before giving up
    #[arg(
        long,
        global = true,
        env = "CADENCE_MAX_RETRIES",
        default_value_t = DEFAULT_MAX_RETRIES,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub max_retries: u32,

    /// Delay between uploading an image and creating its post, in seconds
    #[arg(long, global = true, env = "CADENCE_MEDIA_SETTLE_SECS", default_value_t = DEFAULT_MEDIA_SETTLE_SECS)]
    pub media_settle_secs: u64,
}

impl Settings {
    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            max_retries: self.max_retries,
            budget: Duration::from_secs(self.budget_secs),
            ..PublisherConfig::default()
        }
    }

    pub fn open_store(&self) -> Result<SqliteStore, CadenceError> {
        Ok(SqliteStore::open(&self.db)?)
    }

    /// Wire a publisher over `store` with the Bluesky sink and card source.
    pub fn build_publisher(&self, store: Arc<SqliteStore>) -> Result<Publisher, CadenceError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()?;

        let sink = BlueskySink::new(
            http.clone(),
            &self.pds_url,
            Duration::from_secs(self.media_settle_secs),
        );
        let cards = CardSource::with_http_client(http, &self.scryfall_url);

        debug!(config = ?self.publisher_config(), "building publisher");

        let registry: Arc<dyn AccountRegistry> = store.clone();
        let content: Arc<dyn ContentStore> = store;

        Ok(Publisher::new(registry, content, Arc::new(sink))
            .with_live_source(Arc::new(cards))
            .with_config(self.publisher_config()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        settings: Settings,
    }

    #[test]
    fn test_defaults() {
        let cli = TestCli::try_parse_from(["cadence"]).unwrap();
        let config = cli.settings.publisher_config();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.budget, Duration::from_secs(50));
        assert_eq!(config.max_accounts_ceiling, 50);
        assert_eq!(cli.settings.media_settle_secs, 5);
        assert_eq!(cli.settings.pds_url, "https://bsky.social");
    }

    #[test]
    fn test_zero_retries_rejected() {
        assert!(TestCli::try_parse_from(["cadence", "--max-retries", "0"]).is_err());
    }

    #[test]
    fn test_overrides() {
        let cli = TestCli::try_parse_from([
            "cadence",
            "--budget-secs",
            "20",
            "--max-retries",
            "2",
            "--db",
            "/tmp/feeds.db",
        ])
        .unwrap();
        let config = cli.settings.publisher_config();
        assert_eq!(config.budget, Duration::from_secs(20));
        assert_eq!(config.max_retries, 2);
        assert_eq!(cli.settings.db, PathBuf::from("/tmp/feeds.db"));
    }

    #[tokio::test]
    async fn test_build_publisher_over_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("cadence.db");
        let cli = TestCli::try_parse_from([
            "cadence",
            "--db",
            db.to_str().unwrap(),
            "--max-retries",
            "3",
            "--budget-secs",
            "10",
        ])
        .unwrap();

        let store = Arc::new(cli.settings.open_store().unwrap());
        let publisher = cli.settings.build_publisher(store).unwrap();
        assert_eq!(publisher.config().max_retries, 3);
        assert_eq!(publisher.config().budget, Duration::from_secs(10));

        // Empty database: nothing is due, nothing is published
        let report = publisher
            .run_invocation(cadence_scheduler::InvocationRequest::new(chrono::Utc::now()))
            .await
            .unwrap();
        assert_eq!(report.processed, 0);
        assert!(report.failures.is_empty());
    }
}
