use super::truncate;
use crate::chat::{ChatSummary, ChatView, ConversationStore, Role};
use crate::cli::ChatsCommand;
use crate::error::{ParleyError, Result};
use colored::Colorize;
use prettytable::{format, Table};

/// Handle chat management commands
pub async fn handle_chats(store: &ConversationStore, command: ChatsCommand) -> Result<()> {
    match command {
        ChatsCommand::List { user, json } => {
            let chats = store.list_chats(&user).await?;
            if json {
                println!("{}", to_json(&chats)?);
            } else {
                print_chat_table(&chats);
            }
        }
        ChatsCommand::New { user, title } => {
            let chat = store.new_chat(&user, &title).await?;
            println!("{} {}", "Created chat".green(), chat.id.cyan());
        }
        ChatsCommand::Ensure { user } => {
            let chat = store.ensure_chat(&user).await?;
            println!("{}\t{}", chat.id, chat.title);
        }
        ChatsCommand::Show { user, id, json } => {
            let view = store.get_chat(&user, &id).await?;
            if json {
                println!("{}", to_json(&view)?);
            } else {
                print_chat_view(&view);
            }
        }
    }

    Ok(())
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value).map_err(ParleyError::from)?)
}

fn print_chat_table(chats: &[ChatSummary]) {
    if chats.is_empty() {
        println!("{}", "No chats found.".yellow());
        return;
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(prettytable::row![
        "ID".bold(),
        "Title".bold(),
        "Last Updated".bold()
    ]);

    for chat in chats {
        table.add_row(prettytable::row![
            chat.id.cyan(),
            truncate(&chat.title, 40),
            chat.updated_at.format("%Y-%m-%d %H:%M").to_string()
        ]);
    }

    println!("\nChats:");
    table.printstd();
    println!();
}

fn print_chat_view(view: &ChatView) {
    println!(
        "{} {}",
        view.summary.title.bold(),
        format!("({})", view.summary.id).dimmed()
    );
    if view.messages.is_empty() {
        println!("{}", "No messages yet.".yellow());
        return;
    }

    for message in &view.messages {
        let label = match message.role {
            Role::User => message.role.as_str().blue().bold(),
            Role::Assistant => message.role.as_str().green().bold(),
        };
        println!(
            "\n{} {}",
            label,
            message.created_at.format("%H:%M:%S").to_string().dimmed()
        );
        println!("{}", message.content);
    }
    println!();
}
