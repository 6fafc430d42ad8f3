use std::time::Duration;

use reqwest::Client;

use crate::{api::get_models, config::Config};

const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// Picks the first configured base endpoint that answers at all.
///
/// Any HTTP response counts as reachable; only connection level failures
/// rule an endpoint out. The model listing is queried first as a liveness
/// hint and only logged.
pub async fn check_base_url(config: &Config) -> eyre::Result<(String, String)> {
    let http = Client::builder().timeout(PROBE_TIMEOUT).build()?;

    match get_models(&http, &config.models_url).await {
        Ok(count) => tracing::info!("Render network online, {count} models listed"),
        Err(e) => tracing::warn!("Model listing unavailable: {e}"),
    }

    for endpoint in &config.api_endpoints {
        match http.get(endpoint).send().await {
            Ok(response) => {
                let message = format!(
                    "Using API endpoint {endpoint} (status {})",
                    response.status().as_u16()
                );
                return Ok((endpoint.trim_end_matches('/').to_string(), message));
            }
            Err(e) => tracing::warn!("Endpoint {endpoint} unreachable: {e}"),
        }
    }

    eyre::bail!("No reachable API endpoint, try again later")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_api::MockApi;

    #[tokio::test]
    async fn skips_unreachable_endpoints() {
        let mock = MockApi::start().await;
        let config = Config {
            api_endpoints: vec!["http://127.0.0.1:1".into(), format!("{}/", mock.url())],
            models_url: format!("{}/api/v1/models/list", mock.url()),
            ..Config::default()
        };

        let (endpoint, message) = check_base_url(&config).await.unwrap();

        assert_eq!(endpoint, mock.url());
        assert!(message.contains("404"));
    }

    #[tokio::test]
    async fn fails_when_nothing_answers() {
        let config = Config {
            api_endpoints: vec!["http://127.0.0.1:1".into()],
            models_url: "http://127.0.0.1:1/models".into(),
            ..Config::default()
        };

        assert!(check_base_url(&config).await.is_err());
    }
}
