use super::{ChatId, MessageId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

impl ChatKind {
    pub fn parse(kind: &str) -> Self {
        match kind {
            "group" => ChatKind::Group,
            "supergroup" => ChatKind::Supergroup,
            "channel" => ChatKind::Channel,
            _ => ChatKind::Private,
        }
    }

    pub fn is_group(self) -> bool {
        matches!(self, ChatKind::Group | ChatKind::Supergroup)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub id: UserId,
    pub username: Option<String>,
}

/// A slash command at the very start of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandCall {
    /// Lowercased command name without the slash or `@bot` suffix.
    pub name: String,
    /// Bot named in `/cmd@bot`, if any.
    pub addressed_to: Option<String>,
    /// Everything after the command, trimmed.
    pub args: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub chat_id: ChatId,
    pub chat_kind: ChatKind,
    pub message_id: MessageId,
    pub sender: Sender,
    pub text: String,
    pub command: Option<CommandCall>,
    /// `@username` mentions, including the `@`.
    pub mentions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Mention,
    BotCommand,
    Other,
}

/// Entity span in UTF-16 code units, as the front end reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entity {
    pub kind: EntityKind,
    pub offset: usize,
    pub length: usize,
}

pub fn entity_text(text: &str, entity: &Entity) -> Option<String> {
    let units: Vec<u16> = text.encode_utf16().collect();
    let end = entity.offset.checked_add(entity.length)?;
    let slice = units.get(entity.offset..end)?;
    String::from_utf16(slice).ok()
}

fn utf16_to_byte_index(text: &str, utf16_index: usize) -> usize {
    let mut units = 0;
    for (byte_index, ch) in text.char_indices() {
        if units >= utf16_index {
            return byte_index;
        }
        units += ch.len_utf16();
    }
    text.len()
}

pub fn parse_command(text: &str, entities: &[Entity]) -> Option<CommandCall> {
    let first = entities.first()?;
    if first.kind != EntityKind::BotCommand || first.offset != 0 {
        return None;
    }
    let raw = entity_text(text, first)?;
    let raw = raw.strip_prefix('/')?;
    let (name, addressed_to) = match raw.split_once('@') {
        Some((name, bot)) => (name, Some(bot.to_string())),
        None => (raw, None),
    };
    let rest_start = utf16_to_byte_index(text, first.length);
    Some(CommandCall {
        name: name.to_ascii_lowercase(),
        addressed_to,
        args: text[rest_start..].trim().to_string(),
    })
}

impl InboundEvent {
    pub fn is_command(&self) -> bool {
        self.command.is_some()
    }

    pub fn mentions_user(&self, username: &str) -> bool {
        let wanted = username.trim_start_matches('@');
        self.mentions
            .iter()
            .any(|mention| mention.trim_start_matches('@').eq_ignore_ascii_case(wanted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command_entity(length: usize) -> Entity {
        Entity {
            kind: EntityKind::BotCommand,
            offset: 0,
            length,
        }
    }

    #[test]
    fn parses_command_with_arguments() {
        let text = "/prompt  You are a pirate ";
        let call = parse_command(text, &[command_entity(7)]).expect("command");
        assert_eq!(call.name, "prompt");
        assert_eq!(call.addressed_to, None);
        assert_eq!(call.args, "You are a pirate");
    }

    #[test]
    fn parses_addressed_command() {
        let text = "/STOP@relay_bot";
        let call = parse_command(text, &[command_entity(15)]).expect("command");
        assert_eq!(call.name, "stop");
        assert_eq!(call.addressed_to.as_deref(), Some("relay_bot"));
        assert_eq!(call.args, "");
    }

    #[test]
    fn command_must_lead_the_message() {
        let entities = [Entity {
            kind: EntityKind::BotCommand,
            offset: 4,
            length: 4,
        }];
        assert!(parse_command("try /new", &entities).is_none());
        assert!(parse_command("hello", &[]).is_none());
    }

    #[test]
    fn entity_offsets_are_utf16() {
        let text = "😀 @relay_bot hi";
        let mention = Entity {
            kind: EntityKind::Mention,
            offset: 3,
            length: 10,
        };
        assert_eq!(entity_text(text, &mention).as_deref(), Some("@relay_bot"));

        let text = "/pic 猫 😀";
        let call = parse_command(text, &[command_entity(4)]).expect("command");
        assert_eq!(call.args, "猫 😀");
    }

    #[test]
    fn group_kinds() {
        assert!(ChatKind::parse("supergroup").is_group());
        assert!(ChatKind::parse("group").is_group());
        assert!(!ChatKind::parse("private").is_group());
    }
}
