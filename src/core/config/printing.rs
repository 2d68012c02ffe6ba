use crate::core::config::data::Config;

fn redact(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    if secret.chars().count() <= 8 {
        "****".to_string()
    } else {
        format!("{visible}****")
    }
}

impl Config {
    pub fn print_all(&self) {
        println!("Current configuration:");
        println!("  base-url: {}", self.base_url());
        match self.proxy_url() {
            Some(proxy) => println!("  proxy-url: {proxy}"),
            None => println!("  proxy-url: (unset)"),
        }
        println!("  api-key: {}", redact(&self.api_key));
        println!("  telegram-token: {}", redact(&self.telegram_token));
        println!("  temperature: {}", self.temperature);
        println!("  free-chat-count: {}", self.free_chat_count);
        if self.allowed_usernames.is_empty() {
            println!("  allowed-usernames: (none)");
        } else {
            println!("  allowed-usernames: {}", self.allowed_usernames.join(", "));
        }
        println!(
            "  models: default={} alternate={} image={}",
            self.models.default, self.models.alternate, self.models.image
        );
        match self.search_settings() {
            Some(search) => println!(
                "  search: on (engine {}, triggers: {})",
                search.engine_id,
                search.trigger_keywords.join(", ")
            ),
            None => println!("  search: off"),
        }
    }
}
