use crate::core::config::data::{Config, ModelsConfig, SearchConfig, DEFAULT_BASE_URL};
use crate::core::session::ModelChoice;

impl Config {
    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .unwrap_or(DEFAULT_BASE_URL)
    }

    pub fn proxy_url(&self) -> Option<&str> {
        self.proxy_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// Allow-list membership, ignoring case and a leading `@`.
    pub fn is_allowed_username(&self, username: &str) -> bool {
        let wanted = username.trim_start_matches('@');
        if wanted.is_empty() {
            return false;
        }
        self.allowed_usernames
            .iter()
            .any(|allowed| allowed.trim_start_matches('@').eq_ignore_ascii_case(wanted))
    }

    /// Search settings, present only when both credentials are filled in.
    pub fn search_settings(&self) -> Option<&SearchConfig> {
        self.search
            .as_ref()
            .filter(|search| !search.api_key.trim().is_empty() && !search.engine_id.trim().is_empty())
    }
}

impl SearchConfig {
    pub fn is_triggered_by(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.trigger_keywords
            .iter()
            .map(|keyword| keyword.trim().to_lowercase())
            .any(|keyword| !keyword.is_empty() && lowered.contains(&keyword))
    }
}

impl ModelsConfig {
    /// Backend model id for a session's model choice.
    pub fn id_for(&self, choice: ModelChoice) -> &str {
        match choice {
            ModelChoice::Default => &self.default,
            ModelChoice::Alternate => &self.alternate,
            ModelChoice::Image => &self.image,
        }
    }
}
