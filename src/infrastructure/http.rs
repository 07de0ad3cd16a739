use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use std::time::Duration;

pub struct HttpClientFactory;

impl HttpClientFactory {
    /// HTTP client with transient-error retry middleware. Every external call
    /// made through this client carries a bounded timeout.
    pub fn create_client() -> ClientWithMiddleware {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);

        let client = Client::builder()
            .pool_max_idle_per_host(5)
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build()
    }
}

/// Builds a URL with query parameters. reqwest-middleware does not expose
/// `.query()`, so the query string is assembled manually.
pub fn build_url_with_query<K, V>(base_url: &str, params: &[(K, V)]) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    if params.is_empty() {
        return base_url.to_string();
    }

    let query_string: String = params
        .iter()
        .map(|(k, v)| format!("{}={}", encode(k.as_ref()), encode(v.as_ref())))
        .collect::<Vec<_>>()
        .join("&");

    if base_url.contains('?') {
        format!("{}&{}", base_url, query_string)
    } else {
        format!("{}?{}", base_url, query_string)
    }
}

fn encode(s: &str) -> String {
    let mut encoded = String::new();
    for c in s.chars() {
        match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '_' | '.' | '~' => encoded.push(c),
            _ => {
                for byte in c.to_string().as_bytes() {
                    encoded.push_str(&format!("%{:02X}", byte));
                }
            }
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_url_with_query() {
        let url = build_url_with_query(
            "https://www.okx.com/api/v5/market/candles",
            &[("instId", "BTC-USDT-SWAP"), ("bar", "15m")],
        );
        assert_eq!(
            url,
            "https://www.okx.com/api/v5/market/candles?instId=BTC-USDT-SWAP&bar=15m"
        );
    }

    #[test]
    fn test_build_url_appends_to_existing_query() {
        let url = build_url_with_query("https://x.test/a?b=1", &[("c", "2")]);
        assert_eq!(url, "https://x.test/a?b=1&c=2");
    }
}
