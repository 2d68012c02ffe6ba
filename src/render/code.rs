//! Code detection and MarkdownV2 escaping for rendered answers.
//!
//! Detection is a plain substring heuristic. Prose that happens to contain a
//! listed word (`for`, `if`, `go`) is classified as code, and code written
//! without any listed marker is classified as prose. Both mistakes only change
//! how a message is displayed, so no attempt is made to parse anything.
//!
//! Escaping covers a fixed character set that does not include `\`. Telegram
//! expects backslashes inside MarkdownV2 code blocks to be escaped as well, so
//! code containing sequences like `\n` can display differently from its source.

/// Language keywords that mark text as code.
const CODE_KEYWORDS: &[&str] = &[
    "class", "public", "private", "protected", "import", "package", "func", "interface", "struct",
    "chan", "go", "select", "def", "from", "self", "lambda", "int", "char", "float", "double",
    "printf", "scanf", "cout", "cin", "namespace", "std", "nullptr", "if", "else", "while", "for",
    "switch", "case", "echo", "function", "[", "]",
];

/// Syntax fragments that mark text as code.
const CODE_PATTERNS: &[&str] = &[
    "{",
    "}",
    "(",
    ")",
    ";",
    "[]",
    "#include",
    "//",
    "/*",
    "*/",
    "=>",
    "public static void main",
    "fmt.",
    "go func",
    "def __init__",
    "using namespace",
    "#!/bin/bash",
    "#!/usr/bin/env",
];

/// Characters MarkdownV2 treats as markup.
pub const MARKDOWN_SPECIAL_CHARS: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
];

const FENCE: &str = "```";

pub fn is_code(text: &str) -> bool {
    CODE_KEYWORDS
        .iter()
        .chain(CODE_PATTERNS)
        .any(|marker| text.contains(marker))
}

pub fn is_markdown_special(ch: char) -> bool {
    MARKDOWN_SPECIAL_CHARS.contains(&ch)
}

/// Prefix every MarkdownV2 special character with a backslash.
///
/// ```
/// use chatrelay::render::code::escape_markdown_code;
///
/// assert_eq!(escape_markdown_code("f(x) = 1;"), "f\\(x\\) \\= 1;");
/// ```
pub fn escape_markdown_code(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() + text.len() / 4);
    for ch in text.chars() {
        if is_markdown_special(ch) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Inverse of [`escape_markdown_code`]: drop the backslash in front of each
/// special character.
pub fn unescape_markdown_code(text: &str) -> String {
    let mut unescaped = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(&next) = chars.peek() {
                if is_markdown_special(next) {
                    unescaped.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        unescaped.push(ch);
    }
    unescaped
}

/// Fenced, escaped form of `text` as sent with MarkdownV2.
pub fn fence_code(text: &str) -> String {
    format!("{FENCE}{}{FENCE}", escape_markdown_code(text))
}

/// Character count of [`fence_code`] output without building it.
pub fn fenced_char_len(text: &str) -> usize {
    FENCE.len() * 2
        + text
            .chars()
            .map(|ch| if is_markdown_special(ch) { 2 } else { 1 })
            .sum::<usize>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_keywords_and_patterns() {
        assert!(is_code("def main():\n    pass"));
        assert!(is_code("#include <stdio.h>"));
        assert!(is_code("x => x + 1"));
        assert!(is_code("let v = vec![];"));
        assert!(!is_code("Hello there"));
        assert!(!is_code("hello"));
    }

    #[test]
    fn prose_with_common_words_counts_as_code() {
        // Accepted false positive: "for" appears inside ordinary prose.
        assert!(is_code("Thanks for asking"));
    }

    #[test]
    fn escapes_every_special_character() {
        let all: String = MARKDOWN_SPECIAL_CHARS.iter().collect();
        let escaped = escape_markdown_code(&all);
        assert_eq!(escaped.chars().count(), all.chars().count() * 2);
        for pair in escaped.chars().collect::<Vec<_>>().chunks(2) {
            assert_eq!(pair[0], '\\');
            assert!(is_markdown_special(pair[1]));
        }
    }

    #[test]
    fn unescape_reverses_escape() {
        let samples = [
            "fn main() { println!(\"hi\"); }",
            "a_b*c [link](url) ~x~ `tick` > quote #1 + - = | {} . !",
            "path\\to\\file (with \\ backslashes)",
            "\\(already\\) escaped looking",
            "trailing backslash \\",
            "plain words only",
            "",
        ];
        for sample in samples {
            assert_eq!(unescape_markdown_code(&escape_markdown_code(sample)), sample);
        }
    }

    #[test]
    fn fenced_length_matches_built_payload() {
        let text = "if (a.b) { c-- }";
        assert_eq!(fenced_char_len(text), fence_code(text).chars().count());
        assert!(fence_code(text).starts_with("```") && fence_code(text).ends_with("```"));
    }
}
