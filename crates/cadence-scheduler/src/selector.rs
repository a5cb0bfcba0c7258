//! Due-account selection.

use std::cmp::Ordering;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::{Account, AccountRegistry, SchedulerError};

/// Check if an account is due relative to `cutoff`.
///
/// Inactive accounts are never due. A never-published account is always due.
pub fn is_due(account: &Account, cutoff: DateTime<Utc>) -> bool {
    account.active && account.last_published.is_none_or(|at| at < cutoff)
}

/// Ordering for due accounts: never-published first, then oldest publish
/// first, ties broken by id.
pub fn due_order(a: &Account, b: &Account) -> Ordering {
    let by_time = match (a.last_published, b.last_published) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => x.cmp(&y),
    };
    by_time.then_with(|| a.id.cmp(&b.id))
}

/// Select up to `max_accounts` due accounts, longest-waiting first.
///
/// Read-only. Any registry failure is fatal for the invocation.
#[tracing::instrument(skip(registry))]
pub async fn select_due(
    registry: &dyn AccountRegistry,
    now: DateTime<Utc>,
    interval_hours: u32,
    max_accounts: usize,
) -> Result<Vec<Account>, SchedulerError> {
    if interval_hours == 0 {
        return Err(SchedulerError::InvalidRequest(
            "interval_hours must be positive".to_string(),
        ));
    }
    if max_accounts == 0 {
        return Err(SchedulerError::InvalidRequest(
            "max_accounts must be positive".to_string(),
        ));
    }

    let cutoff = now - Duration::hours(i64::from(interval_hours));
    let mut accounts = registry.due_accounts(cutoff, max_accounts).await?;

    // Registries are trusted to filter and order, but not to be exact.
    accounts.retain(|a| is_due(a, cutoff));
    accounts.sort_by(due_order);
    accounts.truncate(max_accounts);

    debug!(count = accounts.len(), cutoff = %cutoff, "selected due accounts");
    Ok(accounts)
}
