use anyhow::{Context, Result};
use resumer_core::ResumerClient;
use serde_json::json;
use std::io::Write;

use crate::cli::{OutputFormat, ReplayArgs};

pub async fn run(client: &ResumerClient, args: ReplayArgs, format: OutputFormat) -> Result<()> {
    let mut stream = client
        .replay(&args.conversation_id, args.from)
        .await
        .with_context(|| format!("Failed to replay {}", args.conversation_id))?;

    let mut stdout = std::io::stdout().lock();
    let mut retries_left = args.retries;

    loop {
        match stream.next().await {
            Ok(Some(token)) => {
                if format.is_json() {
                    let line = json!({ "token": token, "position": stream.position() });
                    writeln!(stdout, "{line}")?;
                } else {
                    write!(stdout, "{token}")?;
                }
                stdout.flush()?;
            }
            Ok(None) => break,
            Err(err) if !err.is_terminal() && retries_left > 0 => {
                retries_left -= 1;
                tracing::warn!(
                    conversation_id = %args.conversation_id,
                    position = stream.position(),
                    error = %err,
                    "Replay interrupted, resuming"
                );
                stream.resume().await.context("Failed to resume replay")?;
            }
            Err(err) => return Err(err.into()),
        }
    }

    if !format.is_json() {
        writeln!(stdout)?;
    }
    Ok(())
}
