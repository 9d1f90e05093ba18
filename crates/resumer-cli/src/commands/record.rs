use anyhow::{Context, Result};
use colored::Colorize;
use resumer_core::{RecordSession, ResumerClient};
use serde_json::json;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use uuid::Uuid;

use crate::cli::{OutputFormat, RecordArgs};
use crate::output::print_json;

pub async fn run(client: &ResumerClient, args: RecordArgs, format: OutputFormat) -> Result<()> {
    let conversation_id = args
        .conversation_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let delay = Duration::from_millis(args.delay_ms);

    let mut session = client
        .record(&conversation_id)
        .await
        .with_context(|| format!("Failed to start recording {conversation_id}"))?;

    let mut chunks = 0usize;
    let mut cancelled = false;

    match args.text {
        Some(text) => {
            for token in split_tokens(&text) {
                chunks += 1;
                if send(&mut session, token, delay).await? {
                    cancelled = true;
                    break;
                }
            }
        }
        None => {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
                chunks += 1;
                if send(&mut session, format!("{line}\n"), delay).await? {
                    cancelled = true;
                    break;
                }
            }
        }
    }

    let ack = session
        .complete()
        .await
        .with_context(|| format!("Failed to complete recording {conversation_id}"))?;

    if format.is_json() {
        return print_json(&json!({
            "conversation_id": conversation_id,
            "chunks": chunks,
            "position": ack.position,
            "cancelled": cancelled,
        }));
    }

    if cancelled {
        println!(
            "{} Recording {} stopped after {} chunks (cancel requested)",
            "!".yellow().bold(),
            conversation_id,
            chunks
        );
    } else {
        println!(
            "{} Recorded {} chunks to {}",
            "✓".green().bold(),
            chunks,
            conversation_id
        );
    }
    Ok(())
}

/// Sends one chunk; returns true when a cancel was requested.
async fn send(session: &mut RecordSession, token: String, delay: Duration) -> Result<bool> {
    let ack = session.send(token).await?;
    if ack.cancel_requested {
        return Ok(true);
    }
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    Ok(false)
}

/// Splits text into chunks that each keep their trailing whitespace.
fn split_tokens(text: &str) -> Vec<String> {
    text.split_inclusive(char::is_whitespace)
        .map(str::to_string)
        .collect()
}
