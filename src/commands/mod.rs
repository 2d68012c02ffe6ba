mod registry;

pub use registry::{all_commands, find_command, Command, CommandInvocation};

use tracing::info;

use crate::core::config::ModelsConfig;
use crate::core::history::HistoryStore;
use crate::core::message::Message;
use crate::core::session::{ConversationKey, ModelChoice, SessionState, SessionStore};
use crate::transport::CommandCall;

pub const PROMPT_REQUEST_TEXT: &str = "Send the system prompt you want to use.";
pub const PROMPT_SET_TEXT: &str = "System prompt set.";
pub const PIC_USAGE_TEXT: &str =
    "Image mode on. Send a description, or use: /pic a grey sky full of crows";
pub const NOTHING_TO_STOP_TEXT: &str = "Nothing is being generated.";

/// What the caller has to do after a command ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// State is updated; send this text back.
    Reply(String),
    /// State is updated and nothing needs to be said.
    Done,
    /// Generate an image for this prompt. The caller gates and runs it.
    GenerateImage(String),
}

/// State a command handler may touch.
pub struct CommandContext<'a> {
    pub key: ConversationKey,
    pub sessions: &'a SessionStore,
    pub history: &'a HistoryStore,
    pub models: &'a ModelsConfig,
}

pub fn dispatch(context: &CommandContext<'_>, call: &CommandCall) -> CommandResult {
    let invocation = CommandInvocation {
        name: &call.name,
        args: &call.args,
    };
    match registry::find_command(&call.name) {
        Some(command) => {
            info!(
                user = context.key.user_id,
                chat = context.key.chat_id,
                command = command.name,
                "running command"
            );
            (command.handler)(context, invocation)
        }
        None => CommandResult::Reply(format!("Invalid command: /{}", call.name)),
    }
}

pub fn help_text() -> String {
    let mut text = String::from("Commands:\n");
    for command in all_commands() {
        text.push_str(&format!("/{} - {}\n", command.name, command.help));
    }
    text.trim_end().to_string()
}

pub(super) fn handle_start(context: &CommandContext<'_>, _: CommandInvocation<'_>) -> CommandResult {
    context.sessions.reset(context.key);
    context
        .history
        .reset_to_system(context.key, context.sessions.default_system_prompt());
    CommandResult::Reply(format!("Welcome!\n\n{}", help_text()))
}

pub(super) fn handle_help(_: &CommandContext<'_>, _: CommandInvocation<'_>) -> CommandResult {
    CommandResult::Reply(help_text())
}

pub(super) fn handle_new(context: &CommandContext<'_>, _: CommandInvocation<'_>) -> CommandResult {
    context.sessions.cancel_generation(context.key);
    let prompt = context.sessions.get(context.key).system_prompt;
    context.history.reset_to_system(context.key, &prompt);
    CommandResult::Reply("Started a new conversation.".to_string())
}

fn switch_model(context: &CommandContext<'_>, choice: ModelChoice) -> CommandResult {
    context
        .sessions
        .update(context.key, |session| session.model = choice);
    CommandResult::Reply(format!(
        "Switched to {}.",
        context.models.id_for(choice)
    ))
}

pub(super) fn handle_default_model(
    context: &CommandContext<'_>,
    _: CommandInvocation<'_>,
) -> CommandResult {
    switch_model(context, ModelChoice::Default)
}

pub(super) fn handle_alternate_model(
    context: &CommandContext<'_>,
    _: CommandInvocation<'_>,
) -> CommandResult {
    switch_model(context, ModelChoice::Alternate)
}

pub(super) fn handle_pic(
    context: &CommandContext<'_>,
    invocation: CommandInvocation<'_>,
) -> CommandResult {
    if invocation.args.is_empty() {
        context
            .sessions
            .update(context.key, |session| session.model = ModelChoice::Image);
        return CommandResult::Reply(PIC_USAGE_TEXT.to_string());
    }
    CommandResult::GenerateImage(invocation.args.to_string())
}

/// Cancel the running generation and keep what it produced so far.
pub(super) fn handle_stop(context: &CommandContext<'_>, _: CommandInvocation<'_>) -> CommandResult {
    let outcome = context.sessions.abort_generation(context.key);
    if !outcome.cancelled {
        return CommandResult::Reply(NOTHING_TO_STOP_TEXT.to_string());
    }
    if !outcome.partial.is_empty() {
        context
            .history
            .append(context.key, Message::assistant(outcome.partial));
    }
    CommandResult::Done
}

pub(super) fn handle_prompt(
    context: &CommandContext<'_>,
    invocation: CommandInvocation<'_>,
) -> CommandResult {
    if invocation.args.is_empty() {
        context.sessions.update(context.key, |session| {
            session.state = SessionState::AwaitingSystemPrompt
        });
        return CommandResult::Reply(PROMPT_REQUEST_TEXT.to_string());
    }
    set_system_prompt(context.sessions, context.history, context.key, invocation.args);
    CommandResult::Reply(format!("System prompt set: {}", invocation.args))
}

/// Install `prompt` for the conversation and restart history from it. A
/// running answer belongs to the old history and is cancelled.
pub fn set_system_prompt(
    sessions: &SessionStore,
    history: &HistoryStore,
    key: ConversationKey,
    prompt: &str,
) {
    sessions.cancel_generation(key);
    sessions.update(key, |session| {
        session.system_prompt = prompt.to_string();
        session.state = SessionState::Default;
    });
    history.reset_to_system(key, prompt);
}
