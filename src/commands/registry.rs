use super::{CommandContext, CommandResult};

pub type CommandHandler = fn(&CommandContext<'_>, CommandInvocation<'_>) -> CommandResult;

pub struct Command {
    pub name: &'static str,
    pub help: &'static str,
    pub handler: CommandHandler,
}

#[derive(Clone, Copy)]
pub struct CommandInvocation<'a> {
    pub name: &'a str,
    pub args: &'a str,
}

pub fn all_commands() -> &'static [Command] {
    COMMANDS
}

pub fn find_command(name: &str) -> Option<&'static Command> {
    all_commands()
        .iter()
        .find(|command| command.name.eq_ignore_ascii_case(name))
}

const COMMANDS: &[Command] = &[
    Command {
        name: "start",
        help: "Clear the prompt and the conversation.",
        handler: super::handle_start,
    },
    Command {
        name: "help",
        help: "List the available commands.",
        handler: super::handle_help,
    },
    Command {
        name: "new",
        help: "Clear the conversation but keep the prompt.",
        handler: super::handle_new,
    },
    Command {
        name: "gpt3",
        help: "Switch to the default model.",
        handler: super::handle_default_model,
    },
    Command {
        name: "gpt4",
        help: "Switch to the alternate model.",
        handler: super::handle_alternate_model,
    },
    Command {
        name: "pic",
        help: "Generate an image, or switch to image mode without a prompt.",
        handler: super::handle_pic,
    },
    Command {
        name: "stop",
        help: "Stop the answer being generated.",
        handler: super::handle_stop,
    },
    Command {
        name: "prompt",
        help: "Set the system prompt.",
        handler: super::handle_prompt,
    },
];
