//! Provisioning subcommands.

use cadence::CadenceError;
use cadence::config::Settings;
use cadence_scheduler::{Account, AccountKind, Category, Credentials, Payload, SourceKey, SourceKind};
use miette::Result;
use tracing::info;

fn report(e: CadenceError) -> miette::Report {
    miette::miette!("{}", e)
}

pub fn add_account(
    settings: &Settings,
    id: String,
    category: Category,
    source_id: Option<i64>,
    identifier: String,
    app_password: String,
    pds_url: Option<String>,
) -> Result<()> {
    let kind = AccountKind::from_parts(category, source_id)
        .map_err(|e| report(CadenceError::Invalid(e)))?;
    let account = Account::new(
        id,
        kind,
        Credentials {
            identifier,
            app_password,
            pds_url,
        },
    );

    let store = settings.open_store().map_err(report)?;
    store
        .upsert_account(&account)
        .map_err(|e| report(e.into()))?;

    info!(account = %account.id, category = %category, "account saved");
    println!("saved account {} ({})", account.id, category);
    Ok(())
}

pub fn set_active(settings: &Settings, id: &str, active: bool) -> Result<()> {
    let store = settings.open_store().map_err(report)?;
    let found = store.set_active(id, active).map_err(|e| report(e.into()))?;
    if !found {
        return Err(miette::miette!("account not found: {}", id));
    }

    let state = if active { "activated" } else { "deactivated" };
    info!(account = %id, state, "account updated");
    println!("{} {}", state, id);
    Ok(())
}

pub fn list_accounts(settings: &Settings) -> Result<()> {
    let store = settings.open_store().map_err(report)?;
    let accounts = store.list_accounts().map_err(|e| report(e.into()))?;

    if accounts.is_empty() {
        println!("no accounts");
        return Ok(());
    }

    for account in accounts {
        let source = account
            .kind
            .source_key()
            .map(|k| k.to_string())
            .unwrap_or_else(|| "live".to_string());
        let last = account
            .last_published
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{}\t{}\t{}\t{}\t{}\tlast published {}",
            account.id,
            account.kind.category(),
            source,
            account.credentials.identifier,
            if account.active { "active" } else { "inactive" },
            last
        );
    }
    Ok(())
}

pub fn add_content(
    settings: &Settings,
    kind: SourceKind,
    source_id: i64,
    image: Option<String>,
    caption: Option<String>,
    alt: Option<String>,
    text: Option<String>,
) -> Result<()> {
    let payload = match (image, text) {
        (Some(location), None) => Payload::Image {
            location,
            caption,
            alt_text: alt,
        },
        (None, Some(body)) => Payload::Text { body },
        _ => {
            return Err(report(CadenceError::Invalid(
                "exactly one of --image or --text is required".to_string(),
            )));
        }
    };

    let source = SourceKey::new(kind, source_id);
    let store = settings.open_store().map_err(report)?;
    let id = store
        .insert_content_item(source, &payload)
        .map_err(|e| report(e.into()))?;

    info!(item_id = id, source = %source, "content added");
    println!("added item {} to {}", id, source);
    Ok(())
}
