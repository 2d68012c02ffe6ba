use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Model identifiers sent to the backend for each session model choice.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ModelsConfig {
    pub default: String,
    pub alternate: String,
    pub image: String,
}

/// Google Custom Search credentials and trigger words.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SearchConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub engine_id: String,
    /// Lowercase substrings that switch augmentation on for a message
    #[serde(default)]
    pub trigger_keywords: Vec<String>,
    #[serde(default = "default_search_results")]
    pub max_results: u32,
    /// Restricts results to a language, e.g. `lang_en`
    #[serde(default)]
    pub language: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Config {
    pub proxy_url: Option<String>,
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub telegram_token: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Usernames that bypass the free-tier quota
    #[serde(default)]
    pub allowed_usernames: Vec<String>,
    #[serde(default)]
    pub free_chat_count: u64,
    #[serde(default)]
    pub models: ModelsConfig,
    pub search: Option<SearchConfig>,
    #[serde(default = "default_system_prompt")]
    pub default_system_prompt: String,
}

fn default_temperature() -> f32 {
    1.0
}

fn default_search_results() -> u32 {
    3
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            default: "gpt-3.5-turbo-1106".to_string(),
            alternate: "gpt-4-1106-preview".to_string(),
            image: "dall-e-3".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proxy_url: None,
            base_url: None,
            api_key: String::new(),
            telegram_token: String::new(),
            temperature: default_temperature(),
            allowed_usernames: Vec::new(),
            free_chat_count: 0,
            models: ModelsConfig::default(),
            search: None,
            default_system_prompt: default_system_prompt(),
        }
    }
}

pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
