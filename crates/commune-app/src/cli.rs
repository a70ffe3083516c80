use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Commune: identity, notifications, messages, follows and presence from the terminal.
#[derive(Parser, Debug)]
#[command(name = "commune", version, about)]
pub struct Args {
    /// Config file path override.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level override (e.g. `debug`, `commune_social=trace`).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the identity resolved from the stored session.
    Whoami,

    /// Identify with an email and display name.
    Identify {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
        /// Keep the profile anonymous.
        #[arg(long)]
        anonymous: bool,
    },

    /// Forget the stored session.
    SignOut,

    /// List notifications.
    Notifications {
        /// Keep running and print new notifications as they arrive.
        #[arg(long)]
        watch: bool,
        /// Mark everything read.
        #[arg(long)]
        mark_all: bool,
    },

    /// List conversations.
    Inbox,

    /// Open a conversation with a user and send messages typed on stdin.
    Chat {
        /// Profile id of the other participant.
        user: String,
        /// Send one message and exit.
        #[arg(long, short)]
        message: Option<String>,
        /// Image URL to attach to `--message`.
        #[arg(long)]
        image: Option<String>,
    },

    /// Follow or unfollow a user.
    Follow {
        /// Profile id to toggle.
        user: String,
        /// Only show the current state.
        #[arg(long)]
        status: bool,
    },

    /// Announce this session as an active visitor and print the visitor count.
    Presence {
        /// Page path to report.
        #[arg(long, default_value = "/")]
        path: String,
    },

    /// Print the effective configuration.
    Config,
}

pub fn parse() -> Args {
    Args::parse()
}
