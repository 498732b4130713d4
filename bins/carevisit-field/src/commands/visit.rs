//! Show a visit's check-in target from the backend

use anyhow::Result;
use carevisit_api_client::{CareVisitClient, ClientConfig};
use carevisit_checkin::{RemoteVisitStore, VisitStore};
use carevisit_core::config::Config;
use carevisit_core::Error;
use owo_colors::OwoColorize;

/// Run the `visit` command
pub async fn run(visit_id: &str, config: &Config, format: &str) -> Result<()> {
    let client_config = ClientConfig::from_settings(&config.schema.api).map_err(Error::from)?;
    let client = CareVisitClient::with_config(client_config).map_err(Error::from)?;
    let store = RemoteVisitStore::new(client);

    let target = store
        .load(visit_id)
        .await
        .map_err(|e| Error::from(e).with_context(format!("loading visit {visit_id}")))?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&target)?);
        return Ok(());
    }

    println!();
    println!("  {} {}", "Visit".blue().bold(), target.visit_id.bold());
    println!("  Status:     {:?}", target.status);
    if !target.recipient_name.is_empty() {
        println!("  Recipient:  {}", target.recipient_name);
    }
    if let Some(address) = &target.address_line {
        println!("  Address:    {address}");
    }
    println!("  Target:     {}", target.location.cyan());
    if let (Some(start), Some(end)) = (target.scheduled_start, target.scheduled_end) {
        println!(
            "  Window:     {} → {}",
            start.format("%Y-%m-%d %H:%M"),
            end.format("%H:%M UTC")
        );
    }
    if let Err(err) = target.ensure_scheduled() {
        println!("  {} {}", "⚠".yellow(), err);
    }
    println!();
    Ok(())
}
