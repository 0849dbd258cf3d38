use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "kiln",
    version,
    about = "Operator CLI for the kiln orchestration kernel",
    long_about = "kiln talks to a running kiln-server over HTTP to submit, inspect, and \
manage work items, and to read worker/queue status."
)]
pub struct Cli {
    /// Base URL of the kiln-server HTTP surface
    #[arg(long, env = "KILN_SERVER_URL", default_value = "http://127.0.0.1:8080")]
    pub server: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Submit a new work item
    Submit {
        /// Repository in owner/repo format
        repo: String,

        /// Inline spec markdown; mutually exclusive with --description
        #[arg(long, conflicts_with = "description")]
        spec: Option<String>,

        /// Natural-language description to synthesize a spec from
        #[arg(long, conflicts_with = "spec")]
        description: Option<String>,

        #[arg(long)]
        priority: Option<String>,
    },

    /// Fetch a work item by id
    Get {
        id: Uuid,
    },

    /// List work items, optionally filtered by type
    List {
        #[arg(long = "type")]
        item_type: Option<String>,
    },

    /// Cancel a work item (only while generating/queued)
    Cancel {
        id: Uuid,
    },

    /// Requeue a failed or cancelled work item
    Requeue {
        id: Uuid,
    },

    /// List workers
    Workers,

    /// Kill a worker's container and resolve its work item
    Kill {
        worker_id: Uuid,

        #[arg(long, default_value = "operator requested")]
        reason: String,
    },

    /// Print rate-limiter and worker status
    Status,

    /// Print the metrics summary
    Metrics,
}
