use colored::Colorize;

pub fn handle_error(err: anyhow::Error) -> ! {
    eprintln!("{} {:#}", "Error:".red().bold(), err);

    let msg = format!("{err:#}").to_lowercase();

    if msg.contains("connection refused") || msg.contains("failed to connect") {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  Start a replica with:");
        eprintln!("  {} resumer-server serve", "$".dimmed());
        eprintln!("  or point at one with --server <host:port>.");
    }

    if msg.contains("too many redirects") {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  Replicas keep redirecting to each other. Check that every replica");
        eprintln!("  advertises a reachable address (server.advertised_address).");
    }

    if msg.contains("missing authorization") || msg.contains("access denied") {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  Pass --api-key or --token, or set them in:");
        eprintln!("  {}", "~/.config/resumer/config.toml".dimmed());
    }

    if msg.contains("already being recorded") {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  Another replica owns this conversation. Cancel it first with:");
        eprintln!("  {} resumer cancel <conversation-id>", "$".dimmed());
    }

    std::process::exit(1);
}
