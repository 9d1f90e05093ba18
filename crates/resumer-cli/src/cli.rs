use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

/// Output format for CLI commands
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl OutputFormat {
    pub fn is_json(self) -> bool {
        matches!(self, OutputFormat::Json)
    }
}

#[derive(Parser)]
#[command(name = "resumer")]
#[command(version, about = "Resumer - record, replay and cancel in-flight agent responses")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Replica address (host:port)
    #[arg(long, global = true, env = "RESUMER_SERVER")]
    pub server: Option<String>,

    /// Agent API key
    #[arg(long, global = true, env = "RESUMER_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// User bearer token
    #[arg(long, global = true, env = "RESUMER_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Record a response from --text or stdin (one chunk per line)
    Record(RecordArgs),

    /// Replay a response, following it live until it completes
    Replay(ReplayArgs),

    /// Ask the producer of a response to stop
    Cancel {
        conversation_id: String,
    },

    /// List which of the given conversations have a response in progress
    Check {
        #[arg(required = true)]
        conversation_ids: Vec<String>,
    },

    /// Show whether one conversation has a response in progress
    Status {
        conversation_id: String,
    },

    /// Show whether the response resumer is enabled
    Enabled,
}

#[derive(Args)]
pub struct RecordArgs {
    /// Conversation id (a new one is generated when omitted)
    pub conversation_id: Option<String>,

    /// Record this text, chunked at whitespace, instead of reading stdin
    #[arg(long)]
    pub text: Option<String>,

    /// Pause between chunks
    #[arg(long, default_value_t = 0)]
    pub delay_ms: u64,
}

#[derive(Args)]
pub struct ReplayArgs {
    pub conversation_id: String,

    /// Number of chunks already received
    #[arg(long, default_value_t = 0)]
    pub from: u64,

    /// Reconnect attempts after a dropped connection
    #[arg(long, default_value_t = 3)]
    pub retries: u32,
}
