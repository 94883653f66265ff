use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

use missive_types::MessageStatus;

#[derive(Parser, Debug)]
#[command(name = "missive", version, about = "Users, conversations and messages in a SQLite store")]
pub struct Cli {
    /// Database file (overrides MISSIVE_DB_PATH)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Acting user
    #[arg(long = "as", value_name = "USER_ID", global = true)]
    pub actor: Option<Uuid>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(subcommand)]
    User(UserCommand),

    /// Check a password and print the account
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },

    /// List the registered lifecycle hooks
    Hooks,

    #[command(subcommand)]
    Conversation(ConversationCommand),

    #[command(subcommand)]
    Message(MessageCommand),

    #[command(subcommand)]
    Notification(NotificationCommand),
}

#[derive(Subcommand, Debug)]
pub enum UserCommand {
    /// Register a new account
    Create(NewUserArgs),
    /// Show an account (defaults to the acting user)
    Show { id: Option<Uuid> },
    Deactivate { id: Uuid },
    /// Delete an account and everything that references it
    Delete { id: Uuid },
}

#[derive(Args, Debug)]
pub struct NewUserArgs {
    #[arg(long)]
    pub email: String,
    #[arg(long)]
    pub password: String,
    #[arg(long)]
    pub first_name: String,
    #[arg(long)]
    pub last_name: String,
    #[arg(long)]
    pub phone: Option<String>,
    /// Create a staff account (requires a staff actor once one exists)
    #[arg(long)]
    pub staff: bool,
}

#[derive(Subcommand, Debug)]
pub enum ConversationCommand {
    /// Start a conversation between the acting user and others
    Create {
        #[arg(long = "with", value_name = "USER_ID", required = true, num_args = 1..)]
        participants: Vec<Uuid>,
    },
    /// Add a participant
    Add {
        id: Uuid,
        #[arg(long)]
        user: Uuid,
    },
    /// Show one conversation and its participants
    Show { id: Uuid },
    /// Conversations of the acting user
    List,
    /// Messages in a conversation, newest first
    Messages(ListArgs),
}

#[derive(Args, Debug)]
pub struct ListArgs {
    pub id: Uuid,
    #[arg(long)]
    pub status: Option<MessageStatus>,
    /// RFC 3339 lower bound on the send time
    #[arg(long)]
    pub after: Option<DateTime<Utc>>,
    /// RFC 3339 upper bound on the send time
    #[arg(long)]
    pub before: Option<DateTime<Utc>>,
    #[arg(long, default_value_t = 1)]
    pub page: u32,
    /// Defaults to MISSIVE_PAGE_SIZE
    #[arg(long)]
    pub page_size: Option<u32>,
}

#[derive(Subcommand, Debug)]
pub enum MessageCommand {
    Send {
        #[arg(long)]
        to: Option<Uuid>,
        #[arg(long)]
        conversation: Option<Uuid>,
        #[arg(long, value_name = "MESSAGE_ID")]
        reply_to: Option<Uuid>,
        content: String,
    },
    Edit {
        id: Uuid,
        content: String,
    },
    Status {
        id: Uuid,
        status: MessageStatus,
    },
    Delete {
        id: Uuid,
    },
    Show {
        id: Uuid,
    },
    /// A message with all replies beneath it
    Thread {
        id: Uuid,
    },
    /// Earlier contents of an edited message
    History {
        id: Uuid,
    },
    /// Received messages not yet read
    Unread,
}

#[derive(Subcommand, Debug)]
pub enum NotificationCommand {
    List {
        /// Only read (true) or unread (false) notifications
        #[arg(long)]
        read: Option<bool>,
    },
    Read {
        id: Uuid,
    },
    ReadAll,
    /// Number of unread notifications
    Count,
}
