//! Outbound HTTP client construction.

use crate::core::config::ConfigError;

/// Build the shared client, routing every request through `proxy_url` when set.
pub fn build_client(proxy_url: Option<&str>) -> Result<reqwest::Client, ConfigError> {
    let mut builder = reqwest::Client::builder().user_agent(concat!(
        env!("CARGO_PKG_NAME"),
        "/",
        env!("CARGO_PKG_VERSION")
    ));
    if let Some(proxy_url) = proxy_url {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|err| ConfigError::Invalid(format!("proxy_url {proxy_url:?}: {err}")))?;
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|err| ConfigError::Invalid(format!("http client: {err}")))
}
