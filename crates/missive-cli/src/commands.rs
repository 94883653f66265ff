use anyhow::{Context, Result, anyhow, bail, ensure};
use serde_json::{Value, json};
use tracing::debug;
use uuid::Uuid;

use missive_db::Database;
use missive_db::accounts::NewUser;
use missive_db::messages::NewMessage;
use missive_db::models::{MessageRow, UserRow};
use missive_db::permissions;
use missive_types::api::MessageFilter;

use crate::cli::{
    Command, ConversationCommand, ListArgs, MessageCommand, NewUserArgs, NotificationCommand, UserCommand,
};
use crate::config::Config;

/// Execute one command and return what should be printed.
pub fn run(db: &Database, config: &Config, actor: Option<Uuid>, command: Command) -> Result<Value> {
    debug!(actor = ?actor, "Running command");
    let actor = match actor {
        Some(id) => Some(
            db.get_user_by_id(&id.to_string())?
                .ok_or_else(|| anyhow!("acting user {} does not exist", id))?,
        ),
        None => None,
    };

    match command {
        Command::User(cmd) => user(db, actor, cmd),
        Command::Login { email, password } => {
            let user = db
                .authenticate(&email, &password)?
                .ok_or_else(|| anyhow!("invalid credentials"))?;
            Ok(json!(user.into_api()))
        }
        Command::Hooks => Ok(json!(db.hooks().names())),
        Command::Conversation(cmd) => conversation(db, config, require(actor)?, cmd),
        Command::Message(cmd) => message(db, require(actor)?, cmd),
        Command::Notification(cmd) => notification(db, require(actor)?, cmd),
    }
}

fn require(actor: Option<UserRow>) -> Result<UserRow> {
    let actor = actor.ok_or_else(|| anyhow!("this command needs --as <USER_ID>"))?;
    ensure!(actor.is_active, "acting user {} is deactivated", actor.id);
    Ok(actor)
}

fn user(db: &Database, actor: Option<UserRow>, cmd: UserCommand) -> Result<Value> {
    match cmd {
        UserCommand::Create(args) => {
            // The first staff account bootstraps without an actor.
            if args.staff && db.has_staff()? {
                let actor = require(actor)?;
                ensure!(actor.is_staff, "only staff can create staff accounts");
            }
            let NewUserArgs {
                email,
                password,
                first_name,
                last_name,
                phone,
                staff,
            } = args;
            let mut new = NewUser::new(&email, &password, &first_name, &last_name);
            new.phone_number = phone;
            let created = if staff {
                db.create_staff_user(new)?
            } else {
                db.create_user(&new)?
            };
            Ok(json!(created.into_api()))
        }
        UserCommand::Show { id } => {
            let actor = require(actor)?;
            let target = match id {
                Some(id) => load_user(db, id)?,
                None => return Ok(json!(actor.into_api())),
            };
            ensure!(permissions::can_manage_user(&actor, &target), "not allowed to view this account");
            Ok(json!(target.into_api()))
        }
        UserCommand::Deactivate { id } => {
            let actor = require(actor)?;
            let target = load_user(db, id)?;
            ensure!(permissions::can_manage_user(&actor, &target), "not allowed to deactivate this account");
            db.deactivate_user(&target.id)?;
            Ok(json!({ "deactivated": id }))
        }
        UserCommand::Delete { id } => {
            let actor = require(actor)?;
            let target = load_user(db, id)?;
            ensure!(permissions::can_manage_user(&actor, &target), "not allowed to delete this account");
            db.delete_user(&target.id)?;
            Ok(json!({ "deleted": id }))
        }
    }
}

fn conversation(db: &Database, config: &Config, actor: UserRow, cmd: ConversationCommand) -> Result<Value> {
    match cmd {
        ConversationCommand::Create { participants } => {
            let mut ids = vec![actor.id.clone()];
            ids.extend(participants.iter().map(Uuid::to_string));
            ids.sort_unstable();
            ids.dedup();
            let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
            Ok(json!(db.create_conversation(&refs)?.into_api()))
        }
        ConversationCommand::Add { id, user } => {
            let id = id.to_string();
            ensure!(db.can_view_conversation(&actor, &id)?, "only participants can add people");
            Ok(json!(db.add_participant(&id, &user.to_string())?.into_api()))
        }
        ConversationCommand::Show { id } => {
            let id = id.to_string();
            ensure!(db.can_view_conversation(&actor, &id)?, "not a participant of this conversation");
            let conversation = db
                .get_conversation(&id)?
                .ok_or_else(|| anyhow!("conversation {} not found", id))?;
            Ok(json!(conversation.into_api()))
        }
        ConversationCommand::List => {
            let conversations: Vec<_> = db
                .conversations_for_user(&actor.id)?
                .into_iter()
                .map(|c| c.into_api())
                .collect();
            Ok(json!(conversations))
        }
        ConversationCommand::Messages(args) => list_messages(db, config, &actor, args),
    }
}

fn list_messages(db: &Database, config: &Config, actor: &UserRow, args: ListArgs) -> Result<Value> {
    let id = args.id.to_string();
    ensure!(db.can_view_conversation(actor, &id)?, "not a participant of this conversation");

    let filter = MessageFilter {
        status: args.status,
        created_after: args.after,
        created_before: args.before,
    };
    let page = db
        .list_conversation_messages(&id, &filter, args.page, args.page_size.unwrap_or(config.page_size))?
        .map(MessageRow::into_api);
    Ok(json!(page))
}

fn message(db: &Database, actor: UserRow, cmd: MessageCommand) -> Result<Value> {
    match cmd {
        MessageCommand::Send {
            to,
            conversation,
            reply_to,
            content,
        } => {
            if let Some(parent) = reply_to {
                let parent = load_message(db, parent)?;
                ensure!(db.can_view_message(&actor, &parent)?, "cannot reply to a message you cannot see");
            }
            let sent = db.send_message(NewMessage {
                sender_id: actor.id.clone(),
                receiver_id: to.map(|id| id.to_string()),
                conversation_id: conversation.map(|id| id.to_string()),
                parent_id: reply_to.map(|id| id.to_string()),
                content,
            })?;
            Ok(json!(sent.into_api()))
        }
        MessageCommand::Edit { id, content } => {
            let message = load_message(db, id)?;
            ensure!(permissions::can_edit_message(&actor, &message), "only the sender can edit a message");
            Ok(json!(db.edit_message(&id.to_string(), &actor.id, &content)?.into_api()))
        }
        MessageCommand::Status { id, status } => {
            let message = load_message(db, id)?;
            ensure!(permissions::can_update_status(&actor, &message), "not a party to this message");
            Ok(json!(db.set_message_status(&id.to_string(), status)?.into_api()))
        }
        MessageCommand::Delete { id } => {
            let message = load_message(db, id)?;
            ensure!(permissions::can_delete_message(&actor, &message), "only the sender can delete a message");
            Ok(json!(db.delete_message(&id.to_string())?))
        }
        MessageCommand::Show { id } => {
            let message = visible_message(db, &actor, id)?;
            Ok(json!(message.into_api()))
        }
        MessageCommand::Thread { id } => {
            visible_message(db, &actor, id)?;
            let thread = db
                .message_thread(&id.to_string())?
                .ok_or_else(|| anyhow!("message {} not found", id))?;
            Ok(json!(thread.into_api()))
        }
        MessageCommand::History { id } => {
            visible_message(db, &actor, id)?;
            let history: Vec<_> = db
                .message_history(&id.to_string())?
                .into_iter()
                .map(|h| h.into_api())
                .collect();
            Ok(json!(history))
        }
        MessageCommand::Unread => {
            let unread: Vec<_> = db
                .unread_messages(&actor.id)?
                .into_iter()
                .map(MessageRow::into_api)
                .collect();
            Ok(json!(unread))
        }
    }
}

fn notification(db: &Database, actor: UserRow, cmd: NotificationCommand) -> Result<Value> {
    match cmd {
        NotificationCommand::List { read } => {
            let notifications: Vec<_> = db
                .list_notifications(&actor.id, read)?
                .into_iter()
                .map(|n| n.into_api())
                .collect();
            Ok(json!(notifications))
        }
        NotificationCommand::Read { id } => {
            let id = id.to_string();
            let notification = db
                .get_notification(&id)?
                .ok_or_else(|| anyhow!("notification {} not found", id))?;
            ensure!(
                permissions::can_read_notification(&actor, &notification),
                "notification belongs to another user"
            );
            Ok(json!(db.mark_notification_read(&id, &actor.id)?.into_api()))
        }
        NotificationCommand::ReadAll => {
            let changed = db.mark_all_notifications_read(&actor.id)?;
            Ok(json!({ "marked_read": changed }))
        }
        NotificationCommand::Count => Ok(json!({ "unread": db.unread_notification_count(&actor.id)? })),
    }
}

fn load_user(db: &Database, id: Uuid) -> Result<UserRow> {
    db.get_user_by_id(&id.to_string())?
        .ok_or_else(|| anyhow!("user {} not found", id))
}

fn load_message(db: &Database, id: Uuid) -> Result<MessageRow> {
    db.get_message(&id.to_string())
        .with_context(|| format!("loading message {}", id))?
        .ok_or_else(|| anyhow!("message {} not found", id))
}

fn visible_message(db: &Database, actor: &UserRow, id: Uuid) -> Result<MessageRow> {
    let message = load_message(db, id)?;
    if !db.can_view_message(actor, &message)? {
        bail!("not allowed to view message {}", id);
    }
    Ok(message)
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::cli::Cli;

    struct Harness {
        db: Database,
        config: Config,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                db: Database::open_in_memory().unwrap(),
                config: Config {
                    db_path: ":memory:".into(),
                    page_size: 20,
                },
            }
        }

        fn run(&self, args: &[&str]) -> Result<Value> {
            let cli = Cli::try_parse_from(std::iter::once("missive").chain(args.iter().copied()))?;
            run(&self.db, &self.config, cli.actor, cli.command)
        }

        fn register(&self, email: &str) -> String {
            let out = self
                .run(&[
                    "user",
                    "create",
                    "--email",
                    email,
                    "--password",
                    "long enough",
                    "--first-name",
                    "Test",
                    "--last-name",
                    "User",
                ])
                .unwrap();
            out["id"].as_str().unwrap().to_string()
        }
    }

    #[test]
    fn send_edit_and_read_back() {
        let h = Harness::new();
        let s = h.register("s@example.com");
        let r = h.register("r@example.com");

        let sent = h.run(&["message", "send", "--as", &s, "--to", &r, "hi"]).unwrap();
        let id = sent["id"].as_str().unwrap().to_string();
        assert_eq!(sent["status"], "sent");

        let notes = h.run(&["notification", "list", "--as", &r, "--read", "false"]).unwrap();
        assert_eq!(notes.as_array().unwrap().len(), 1);
        assert_eq!(h.run(&["notification", "count", "--as", &r]).unwrap()["unread"], 1);

        assert!(h.run(&["message", "edit", &id, "hijacked", "--as", &r]).is_err());
        let edited = h.run(&["message", "edit", &id, "hello", "--as", &s]).unwrap();
        assert_eq!(edited["edited"], true);

        let history = h.run(&["message", "history", &id, "--as", &r]).unwrap();
        assert_eq!(history[0]["old_content"], "hi");
    }

    #[test]
    fn strangers_cannot_see_messages() {
        let h = Harness::new();
        let s = h.register("s@example.com");
        let r = h.register("r@example.com");
        let x = h.register("x@example.com");

        let sent = h.run(&["message", "send", "--as", &s, "--to", &r, "private"]).unwrap();
        let id = sent["id"].as_str().unwrap();

        assert!(h.run(&["message", "show", id, "--as", &x]).is_err());
        assert!(h.run(&["message", "thread", id, "--as", &x]).is_err());
        assert!(h.run(&["message", "show", id, "--as", &r]).is_ok());
    }

    #[test]
    fn deleting_account_cleans_up() {
        let h = Harness::new();
        let s = h.register("s@example.com");
        let r = h.register("r@example.com");
        h.run(&["message", "send", "--as", &s, "--to", &r, "bye"]).unwrap();

        assert!(h.run(&["user", "delete", &s, "--as", &r]).is_err());
        h.run(&["user", "delete", &s, "--as", &s]).unwrap();

        let notes = h.run(&["notification", "list", "--as", &r]).unwrap();
        assert!(notes.as_array().unwrap().is_empty());
        assert!(h.run(&["message", "unread", "--as", &s]).is_err());
    }

    #[test]
    fn conversation_listing_uses_configured_page_size() {
        let mut h = Harness::new();
        h.config.page_size = 2;
        let a = h.register("a@example.com");
        let b = h.register("b@example.com");

        let conv = h.run(&["conversation", "create", "--with", &b, "--as", &a]).unwrap();
        let conv_id = conv["id"].as_str().unwrap().to_string();
        assert_eq!(conv["participants"].as_array().unwrap().len(), 2);

        for text in ["one", "two", "three"] {
            h.run(&["message", "send", "--conversation", &conv_id, "--to", &b, text, "--as", &a])
                .unwrap();
        }

        let page = h.run(&["conversation", "messages", &conv_id, "--as", &b]).unwrap();
        assert_eq!(page["count"], 3);
        assert_eq!(page["results"].as_array().unwrap().len(), 2);
        assert_eq!(page["has_next"], true);
    }

    fn create_staff(h: &Harness, email: &str, actor: Option<&str>) -> Result<Value> {
        let mut args = vec![
            "user",
            "create",
            "--email",
            email,
            "--password",
            "long enough",
            "--first-name",
            "Big",
            "--last-name",
            "Boss",
            "--staff",
        ];
        if let Some(actor) = actor {
            args.extend(["--as", actor]);
        }
        h.run(&args)
    }

    #[test]
    fn first_staff_account_needs_no_actor() {
        let h = Harness::new();
        let plain = h.register("plain@example.com");

        let boss = create_staff(&h, "boss@example.com", None).unwrap();
        assert_eq!(boss["is_staff"], true);
        let boss_id = boss["id"].as_str().unwrap().to_string();

        assert!(create_staff(&h, "second@example.com", None).is_err());
        assert!(create_staff(&h, "third@example.com", Some(plain.as_str())).is_err());
        let deputy = create_staff(&h, "deputy@example.com", Some(boss_id.as_str())).unwrap();
        assert_eq!(deputy["is_staff"], true);
    }

    #[test]
    fn conversation_show_requires_participation() {
        let h = Harness::new();
        let a = h.register("a@example.com");
        let b = h.register("b@example.com");
        let x = h.register("x@example.com");

        let conv = h.run(&["conversation", "create", "--with", &b, "--as", &a]).unwrap();
        let conv_id = conv["id"].as_str().unwrap();

        let shown = h.run(&["conversation", "show", conv_id, "--as", &b]).unwrap();
        assert_eq!(shown["participants"].as_array().unwrap().len(), 2);
        assert!(h.run(&["conversation", "show", conv_id, "--as", &x]).is_err());
    }

    #[test]
    fn hooks_are_listed() {
        let h = Harness::new();
        let hooks = h.run(&["hooks"]).unwrap();
        assert_eq!(hooks.as_array().unwrap().len(), 3);
    }
}
