//! Network and file transport for upstream sources.
use crate::dataset::Dataset;
use crate::error::{FeedError, Result};
use crate::sources::{Address, SourceConfig};
use log::{info, warn};
use reqwest::{Client, StatusCode};
use std::time::Duration;

const INITIAL_BACKOFF: Duration = Duration::from_millis(1000);

/// Fetches raw payloads with retry and exponential backoff.
#[derive(Debug, Clone)]
pub struct FeedClient {
    client: Client,
    initial_backoff: Duration,
}

impl Default for FeedClient {
    fn default() -> Self {
        FeedClient::new(Client::new())
    }
}

impl FeedClient {
    pub fn new(client: Client) -> Self {
        FeedClient {
            client,
            initial_backoff: INITIAL_BACKOFF,
        }
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    async fn get_once(&self, url: &str) -> Result<Vec<u8>> {
        let transport = |message: String| FeedError::Transport {
            address: url.to_string(),
            message,
        };
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport(format!("request failed: {}", e)))?;
        if response.status() != StatusCode::OK {
            return Err(transport(format!("bad response status {}", response.status())));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| transport(format!("failed to read response body: {}", e)))?;
        if body.is_empty() {
            return Err(transport("empty response".to_string()));
        }
        Ok(body.to_vec())
    }

    /// Fetch one address. URLs are retried up to `max_tries` times with
    /// doubling sleeps between attempts; files are read once.
    pub async fn fetch(&self, address: &Address, max_tries: u32) -> Result<Vec<u8>> {
        let url = match address {
            Address::Path(path) => {
                return tokio::fs::read(path).await.map_err(|e| FeedError::Transport {
                    address: address.to_string(),
                    message: e.to_string(),
                });
            }
            Address::Url(url) => url,
        };

        let max_tries = max_tries.max(1);
        let mut sleep_for = self.initial_backoff;
        let mut last_error = None;
        for attempt in 1..=max_tries {
            match self.get_once(url).await {
                Ok(body) => return Ok(body),
                Err(e) => {
                    warn!("Attempt {}/{}: {}", attempt, max_tries, e);
                    last_error = Some(e);
                }
            }
            if attempt < max_tries {
                info!("Sleeping for {} milliseconds before retry for {}", sleep_for.as_millis(), url);
                tokio::time::sleep(sleep_for).await;
                sleep_for *= 2;
            }
        }
        Err(last_error.unwrap_or_else(|| FeedError::Transport {
            address: url.clone(),
            message: "no attempts made".to_string(),
        }))
    }

    /// Fetch every payload of a source and decode it, bounded by the
    /// source's timeout.
    ///
    /// # Errors
    ///
    /// `FeedError::Timeout` when the whole load exceeds the timeout,
    /// otherwise whatever transport or decode error occurred first.
    pub async fn load(&self, source: &SourceConfig) -> Result<Dataset> {
        let fetch_all = async {
            let mut payloads = Vec::with_capacity(source.addresses.len());
            for address in &source.addresses {
                payloads.push(self.fetch(address, source.max_tries).await?);
            }
            Ok::<_, FeedError>(payloads)
        };
        let payloads = tokio::time::timeout(source.timeout, fetch_all)
            .await
            .map_err(|_| FeedError::Timeout {
                address: source
                    .addresses
                    .first()
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| source.name.clone()),
                seconds: source.timeout.as_secs(),
            })??;
        source.decode(&payloads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::find;
    use std::path::PathBuf;

    fn temp_file(name: &str, contents: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("aqm-feeds-{}-{}", std::process::id(), name));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[tokio::test]
    async fn test_load_from_local_file() {
        let path = temp_file(
            "pas.csv",
            b"sensor_index,latitude,longitude,epa_pm25,utc_ts\n1,45.0,-110.0,3.5,2024-07-18 00:00:00+0000\n",
        );
        let source = find("purpleair").unwrap().with_file_override(&[path.clone()]).unwrap();
        let ds = FeedClient::default().load(&source).await.unwrap();
        assert_eq!(ds.len(), 1);
        std::fs::remove_file(path).ok();
    }

    #[tokio::test]
    async fn test_missing_file_is_transport_error() {
        let source = find("calfire")
            .unwrap()
            .with_file_override(&[PathBuf::from("/nonexistent/aqm/calfire.geojson")])
            .unwrap();
        let err = FeedClient::default().load(&source).await.unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_unreachable_url_retries_then_fails() {
        let source = find("calfire")
            .unwrap()
            .with_base_url("http://127.0.0.1:9");
        let client = FeedClient::default().with_initial_backoff(Duration::from_millis(1));
        let err = client.load(&source).await.unwrap_err();
        assert!(err.is_transport());
    }
}
