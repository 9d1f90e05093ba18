use anyhow::Result;
use colored::Colorize;
use resumer_core::ResumerClient;
use serde_json::json;

use crate::cli::OutputFormat;
use crate::output::{print_json, print_table};

pub async fn cancel(client: &ResumerClient, conversation_id: &str, format: OutputFormat) -> Result<()> {
    let accepted = client.cancel(conversation_id).await?;

    if format.is_json() {
        return print_json(&json!({ "conversation_id": conversation_id, "accepted": accepted }));
    }

    if accepted {
        println!("{} Cancel requested for {}", "✓".green().bold(), conversation_id);
    } else {
        println!("{} No response in progress for {}", "-".dimmed(), conversation_id);
    }
    Ok(())
}

pub async fn check(client: &ResumerClient, conversation_ids: &[String], format: OutputFormat) -> Result<()> {
    let active = client.check(conversation_ids).await?;

    if format.is_json() {
        return print_json(&json!({ "conversation_ids": active }));
    }

    let rows = conversation_ids
        .iter()
        .map(|id| {
            let state = if active.contains(id) { "active".green() } else { "idle".dimmed() };
            vec![id.clone(), state.to_string()]
        })
        .collect();
    print_table(&["Conversation", "Response"], rows);
    Ok(())
}

pub async fn status(client: &ResumerClient, conversation_id: &str, format: OutputFormat) -> Result<()> {
    let in_progress = client.has_response_in_progress(conversation_id).await?;

    if format.is_json() {
        return print_json(&json!({ "conversation_id": conversation_id, "in_progress": in_progress }));
    }

    let state = if in_progress { "active".green() } else { "idle".dimmed() };
    println!("{conversation_id}: {state}");
    Ok(())
}

pub async fn enabled(client: &ResumerClient, format: OutputFormat) -> Result<()> {
    let enabled = client.is_enabled().await?;

    if format.is_json() {
        return print_json(&json!({ "enabled": enabled }));
    }

    let state = if enabled { "enabled".green() } else { "disabled".yellow() };
    println!("Response resumer {state} on {}", client.address());
    Ok(())
}
