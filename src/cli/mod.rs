//! Command-line interface parsing and startup wiring.

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::backend::OpenAiBackend;
use crate::core::config::Config;
use crate::relay::{run_polling, Relay};
use crate::search::{GoogleSearch, WebSearch};
use crate::transport::telegram::TelegramTransport;
use crate::utils::http::build_client;
use crate::utils::logging::init_tracing;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("VERGEN_GIT_DESCRIBE"),
    ", built ",
    env!("VERGEN_BUILD_DATE"),
    ")"
);

#[derive(Parser)]
#[command(name = "chatrelay")]
#[command(version, long_version = LONG_VERSION)]
#[command(about = "Relay Telegram conversations to a streaming chat-completion backend")]
#[command(
    long_about = "Chatrelay long-polls the Telegram Bot API and answers each message by \
streaming a chat completion into an edited reply.\n\n\
Configuration is read from a TOML file (see --config).\n\n\
Environment Variables:\n\
  CHATRELAY_CONFIG     Path to the config file\n\
  OPENAI_API_KEY       Overrides api_key from the config file\n\
  TELEGRAM_BOT_TOKEN   Overrides telegram_token from the config file\n\
  RUST_LOG             Full tracing filter, overrides --log-level"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config file to use instead of the default location
    #[arg(short = 'c', long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log level for this crate (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Append logs to this file instead of stderr
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Start relaying messages (default)
    Run,
    /// Load and validate the config, then print it with secrets redacted
    CheckConfig,
}

pub fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing(args.log_level.as_deref(), args.log_file.as_deref())?;
    tokio::runtime::Runtime::new()?.block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<(), Box<dyn Error>> {
    let config = match Config::load_for_startup(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {e}");
            std::process::exit(1);
        }
    };

    match args.command.unwrap_or(Commands::Run) {
        Commands::CheckConfig => {
            config.print_all();
            Ok(())
        }
        Commands::Run => run(config).await,
    }
}

async fn run(config: Config) -> Result<(), Box<dyn Error>> {
    let config = Arc::new(config);
    let client = build_client(config.proxy_url())?;

    let telegram = Arc::new(TelegramTransport::new(
        client.clone(),
        config.telegram_token.clone(),
    ));
    let me = match telegram.get_me().await {
        Ok(me) => me,
        Err(e) => {
            eprintln!("❌ Could not reach the Telegram Bot API: {e}");
            std::process::exit(1);
        }
    };

    let backend = Arc::new(OpenAiBackend::new(
        client.clone(),
        config.base_url(),
        config.api_key.clone(),
    ));
    let search = config.search_settings().map(|settings| {
        Arc::new(GoogleSearch::new(client.clone(), settings.clone())) as Arc<dyn WebSearch>
    });

    let mut relay = Relay::new(Arc::clone(&config), telegram.clone(), backend, search);
    match me.username {
        Some(username) => {
            info!(bot = %username, "connected to Telegram");
            relay = relay.with_bot_username(username);
        }
        None => warn!(bot = me.id, "bot has no username; group mentions are ignored"),
    }

    let shutdown = CancellationToken::new();
    let poller = tokio::spawn(run_polling(
        Arc::new(relay),
        telegram,
        shutdown.clone(),
    ));

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    shutdown.cancel();
    poller.await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_is_the_default_command() {
        let args = Args::try_parse_from(["chatrelay"]).expect("parse");
        assert_eq!(args.command, None);
        assert!(args.config.is_none());
    }

    #[test]
    fn global_flags_apply_after_subcommand() {
        let args = Args::try_parse_from([
            "chatrelay",
            "check-config",
            "--config",
            "/tmp/relay.toml",
            "--log-level",
            "debug",
        ])
        .expect("parse");
        assert_eq!(args.command, Some(Commands::CheckConfig));
        assert_eq!(args.config, Some(PathBuf::from("/tmp/relay.toml")));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
    }
}
