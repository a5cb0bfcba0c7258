//! Publisher: one invocation of the posting scheduler.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::{
    Account, AccountFailure, AccountRegistry, ContentStore, Deadline, InvocationReport,
    InvocationRequest, LiveSource, Pick, PublishError, PublishOutcome, PublishSink,
    SchedulerError, SourceKey, pick_next, reset_all, select_due,
};

/// Default minimum spacing between an account's publishes.
pub const DEFAULT_INTERVAL_HOURS: u32 = 6;

/// Default cap on due accounts per invocation.
pub const DEFAULT_MAX_ACCOUNTS: usize = 10;

/// Hard ceiling on accounts per invocation, whatever the request asks for.
pub const MAX_ACCOUNTS_CEILING: usize = 50;

/// Default number of candidate items tried per account before giving up.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default wall-clock budget per invocation.
pub const DEFAULT_BUDGET: Duration = Duration::from_secs(50);

/// An account that published less than this long ago is skipped.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Tunables for the publisher.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Requests asking for more accounts are clamped to this.
    pub max_accounts_ceiling: usize,
    /// Candidate items tried per account when content is undeliverable.
    pub max_retries: u32,
    /// Wall-clock budget, checked before each account.
    pub budget: Duration,
    /// Minimum time since an account's last publish before it may publish again.
    pub debounce: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_accounts_ceiling: MAX_ACCOUNTS_CEILING,
            max_retries: DEFAULT_MAX_RETRIES,
            budget: DEFAULT_BUDGET,
            debounce: DEBOUNCE_WINDOW,
        }
    }
}

/// Terminal state of one account within one invocation.
#[derive(Debug)]
enum AccountOutcome {
    Committed(PublishOutcome),
    Debounced,
    Failed(String),
}

/// Runs invocations against a registry, a content store, and a publish sink.
pub struct Publisher {
    registry: Arc<dyn AccountRegistry>,
    content: Arc<dyn ContentStore>,
    sink: Arc<dyn PublishSink>,
    live: Option<Arc<dyn LiveSource>>,
    config: PublisherConfig,
}

impl Publisher {
    /// Create a publisher with default configuration and no live source.
    pub fn new(
        registry: Arc<dyn AccountRegistry>,
        content: Arc<dyn ContentStore>,
        sink: Arc<dyn PublishSink>,
    ) -> Self {
        Self {
            registry,
            content,
            sink,
            live: None,
            config: PublisherConfig::default(),
        }
    }

    /// Use `live` for categories with no stored content.
    pub fn with_live_source(mut self, live: Arc<dyn LiveSource>) -> Self {
        self.live = Some(live);
        self
    }

    pub fn with_config(mut self, config: PublisherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// Run one invocation.
    ///
    /// Fails only if nothing could be processed: bad parameters, an unknown
    /// forced account, or an unreachable registry during selection. Every
    /// per-account problem is reported in the returned report instead.
    #[tracing::instrument(skip(self, request), fields(forced = ?request.account))]
    pub async fn run_invocation(
        &self,
        request: InvocationRequest,
    ) -> Result<InvocationReport, SchedulerError> {
        let deadline = Deadline::after(self.config.budget);

        if request.interval_hours == 0 {
            return Err(SchedulerError::InvalidRequest(
                "interval_hours must be positive".to_string(),
            ));
        }
        if request.max_accounts == 0 {
            return Err(SchedulerError::InvalidRequest(
                "max_accounts must be positive".to_string(),
            ));
        }

        let max_accounts = if request.max_accounts > self.config.max_accounts_ceiling {
            warn!(
                requested = request.max_accounts,
                ceiling = self.config.max_accounts_ceiling,
                "clamping max_accounts to ceiling"
            );
            self.config.max_accounts_ceiling
        } else {
            request.max_accounts
        };

        let accounts = match &request.account {
            Some(id) => {
                let account = self
                    .registry
                    .get_account(id)
                    .await?
                    .ok_or_else(|| SchedulerError::AccountNotFound(id.clone()))?;
                vec![account]
            }
            None => {
                select_due(
                    self.registry.as_ref(),
                    request.now,
                    request.interval_hours,
                    max_accounts,
                )
                .await?
            }
        };

        info!(count = accounts.len(), "starting invocation");

        let mut report = InvocationReport::default();
        for (index, account) in accounts.iter().enumerate() {
            if deadline.expired() {
                warn!(
                    remaining = accounts.len() - index,
                    elapsed_ms = deadline.elapsed().as_millis() as u64,
                    "invocation budget exhausted, deferring remaining accounts"
                );
                report.stopped_early = true;
                break;
            }

            match self.process_account(account, request.now).await {
                AccountOutcome::Committed(outcome) => {
                    report.processed += 1;
                    report.published.push(outcome);
                }
                AccountOutcome::Debounced => report.skipped += 1,
                AccountOutcome::Failed(error) => {
                    report.failures.push(AccountFailure {
                        account: account.id.clone(),
                        error,
                    });
                }
            }
        }

        info!(
            processed = report.processed,
            skipped = report.skipped,
            failed = report.failures.len(),
            elapsed_ms = deadline.elapsed().as_millis() as u64,
            "invocation finished"
        );
        Ok(report)
    }

    /// Drive one account from due to a terminal state.
    #[tracing::instrument(skip(self, account, now), fields(account = %account.id, category = %account.kind.category()))]
    async fn process_account(&self, account: &Account, now: DateTime<Utc>) -> AccountOutcome {
        // Re-read so a commit by an overlapping invocation is seen
        let current = match self.registry.get_account(&account.id).await {
            Ok(Some(current)) => current,
            Ok(None) => return AccountOutcome::Failed("account no longer exists".to_string()),
            Err(e) => return AccountOutcome::Failed(format!("failed to load account: {}", e)),
        };

        if !current.active {
            return AccountOutcome::Failed("account is inactive".to_string());
        }

        if let Some(last) = current.last_published {
            if within_debounce(last, now, self.config.debounce) {
                debug!(last_published = %last, "published moments ago, skipping");
                return AccountOutcome::Debounced;
            }
        }

        let result = match current.kind.source_key() {
            Some(source) => self.publish_stored(&current, source, now).await,
            None => self.publish_live(&current, now).await,
        };

        match result {
            Ok(outcome) => AccountOutcome::Committed(outcome),
            Err(reason) => {
                warn!(error = %reason, "account failed this round");
                AccountOutcome::Failed(reason)
            }
        }
    }

    /// Publish the next stored item, skipping-and-marking undeliverable ones.
    async fn publish_stored(
        &self,
        account: &Account,
        source: SourceKey,
        now: DateTime<Utc>,
    ) -> Result<PublishOutcome, String> {
        let mut last_content_error = None;
        let mut tried = HashSet::new();

        for attempt in 1..=self.config.max_retries {
            let Pick { item, exhausted } = pick_next(self.content.as_ref(), &source)
                .await
                .map_err(|e| format!("failed to pick content: {}", e))?
                .ok_or_else(|| format!("no content stored for {}", source))?;

            if !tried.insert(item.id) {
                // The set has cycled back to an item already rejected this round
                return Err(format!(
                    "no deliverable content for {} after {} items: {}",
                    source,
                    tried.len(),
                    last_content_error.unwrap_or_else(|| "no attempts made".to_string())
                ));
            }

            if exhausted {
                // A failed or partial reset is healed by the next exhaustion
                if let Err(e) = reset_all(self.content.as_ref(), &source).await {
                    warn!(error = %e, "failed to reset exhausted content cycle");
                }
            }

            debug!(item_id = item.id, attempt, payload = %item.payload.describe(), "publishing item");

            match self.sink.publish(&account.credentials, &item.payload).await {
                Ok(external_id) => {
                    return Ok(self.commit(account, Some(item.id), external_id, now).await);
                }
                Err(PublishError::Content(reason)) => {
                    warn!(
                        item_id = item.id,
                        attempt,
                        error = %reason,
                        "content undeliverable, marking as published"
                    );
                    self.content
                        .mark_item_published(item.id, now)
                        .await
                        .map_err(|e| format!("failed to skip item {}: {}", item.id, e))?;
                    last_content_error = Some(reason);
                }
                Err(PublishError::Sink(reason)) => {
                    return Err(format!("publish failed: {}", reason));
                }
            }
        }

        Err(format!(
            "gave up after {} undeliverable items: {}",
            self.config.max_retries,
            last_content_error.unwrap_or_else(|| "no attempts made".to_string())
        ))
    }

    /// Publish a freshly fetched item for a live-fetch account.
    async fn publish_live(
        &self,
        account: &Account,
        now: DateTime<Utc>,
    ) -> Result<PublishOutcome, String> {
        let live = self.live.as_ref().ok_or_else(|| {
            format!(
                "no live source configured for category {}",
                account.kind.category()
            )
        })?;

        let mut last_content_error = None;

        for attempt in 1..=self.config.max_retries {
            let payload = live.fetch_one(account).await.map_err(|e| e.to_string())?;

            debug!(attempt, payload = %payload.describe(), "publishing live item");

            match self.sink.publish(&account.credentials, &payload).await {
                Ok(external_id) => return Ok(self.commit(account, None, external_id, now).await),
                Err(PublishError::Content(reason)) => {
                    warn!(attempt, error = %reason, "live item undeliverable, fetching another");
                    last_content_error = Some(reason);
                }
                Err(PublishError::Sink(reason)) => {
                    return Err(format!("publish failed: {}", reason));
                }
            }
        }

        Err(format!(
            "gave up after {} undeliverable live items: {}",
            self.config.max_retries,
            last_content_error.unwrap_or_else(|| "no attempts made".to_string())
        ))
    }

    /// Record a successful publish on the item, the account, and the log.
    ///
    /// The writes are independent; a failed write is logged and left for the
    /// next invocation to absorb.
    async fn commit(
        &self,
        account: &Account,
        item_id: Option<i64>,
        external_id: String,
        now: DateTime<Utc>,
    ) -> PublishOutcome {
        if let Some(item_id) = item_id {
            if let Err(e) = self.content.mark_item_published(item_id, now).await {
                error!(item_id, error = %e, "published but failed to mark item");
            }
        }

        if let Err(e) = self.registry.mark_account_published(&account.id, now).await {
            error!(error = %e, "published but failed to mark account");
        }

        let outcome = PublishOutcome {
            account_id: account.id.clone(),
            item_id,
            external_id,
            published_at: now,
        };

        if let Err(e) = self.content.record_outcome(&outcome).await {
            error!(error = %e, "published but failed to record outcome");
        }

        info!(item_id = ?item_id, external_id = %outcome.external_id, "published");
        outcome
    }
}

/// Returns true if `last` is less than `window` before `now`.
///
/// A `last` later than `now` counts as within the window.
fn within_debounce(last: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    match (now - last).to_std() {
        Ok(since) => since < window,
        Err(_) => true,
    }
}
