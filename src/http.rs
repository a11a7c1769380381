use crate::config::HttpSettings;
use reqwest::Client;
use std::time::Duration;

/// Shared client for feed downloads and outbound API calls.
///
/// Every request is bounded by `timeout_secs`; a timed-out request surfaces as
/// an error like any other transport failure.
pub fn build_client(settings: &HttpSettings) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(Duration::from_secs(settings.timeout_secs.max(1)))
        .connect_timeout(Duration::from_secs(settings.connect_timeout_secs.max(1)))
        .user_agent(settings.user_agent.clone())
        .build()
}
