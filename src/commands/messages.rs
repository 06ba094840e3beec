use super::chats::to_json;
use crate::chat::{ConversationStore, Role};
use crate::error::Result;
use crate::orchestrator::CompletionOrchestrator;
use crate::preferences::SessionPreferences;
use colored::Colorize;
use tokio_util::sync::CancellationToken;

/// Append a message as-is
pub async fn append(
    store: &ConversationStore,
    user: &str,
    chat_id: &str,
    role: &str,
    content: &str,
) -> Result<()> {
    let role: Role = role.parse()?;
    let message = store.append_message(user, chat_id, role, content).await?;
    println!(
        "{} {} message at {}",
        "Stored".green(),
        message.role,
        message.created_at.to_rfc3339()
    );
    Ok(())
}

/// Arguments of the `send` command
#[derive(Debug, Clone)]
pub struct SendArgs {
    pub user: String,
    pub chat_id: String,
    pub content: String,
    pub model: Option<String>,
    pub temperature: Option<String>,
    pub json: bool,
}

/// Store a user turn, run the completion and print the reply
///
/// Cancelling `cancel` (Ctrl-C in the binary) abandons the backend call;
/// the user turn stays stored.
pub async fn send(
    orchestrator: &CompletionOrchestrator,
    args: SendArgs,
    cancel: &CancellationToken,
) -> Result<()> {
    let preferences =
        SessionPreferences::from_raw(args.model.as_deref(), args.temperature.as_deref());
    let exchange = orchestrator
        .send_message(&args.user, &args.chat_id, &args.content, &preferences, cancel)
        .await?;

    if args.json {
        println!("{}", to_json(&exchange)?);
        return Ok(());
    }

    println!("{}", "assistant".green().bold());
    println!("{}", exchange.assistant.content);
    println!();
    println!(
        "{}",
        format!(
            "tokens: prompt {} / completion {} / total {}",
            exchange.usage.prompt_tokens,
            exchange.usage.completion_tokens,
            exchange.usage.total_tokens
        )
        .dimmed()
    );
    Ok(())
}
