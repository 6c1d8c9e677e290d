use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::message::{ChatMessage, Delivery};

/// Command line interface for the chat client.
#[derive(Parser, Debug, Default)]
#[command(author, version, about)]
pub struct Cli {
    /// Base URL of the relay (http://host:port).
    #[arg(long)]
    pub server: Option<String>,
    /// Our own user id.
    #[arg(long)]
    pub user: Option<String>,
    /// Timeout for persistence requests in seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,
    /// Path to configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Default)]
pub enum Command {
    /// Stay connected and print presence and incoming messages.
    #[default]
    Watch,
    /// List the other users.
    Users,
    /// Print the conversation with a peer.
    History { peer: String },
    /// Send a message to a peer.
    Send { peer: String, text: String },
    /// Publish an activity label.
    Activity { label: String },
}

/// One line of conversation output.
pub fn render_message(message: &ChatMessage) -> String {
    let marker = match &message.delivery {
        Delivery::Pending { .. } => " (sending)".to_string(),
        Delivery::Confirmed { .. } => String::new(),
        Delivery::Failed { reason, .. } => format!(" (failed: {reason})"),
    };
    format!(
        "{} {}: {}{}",
        message.created_at, message.sender_id, message.content, marker
    )
}
