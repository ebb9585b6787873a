use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use url::Url;

use crate::errors::MediaServerError;

/// Authenticated client bound to one server base url.
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    header: HeaderMap,
    timeout: Duration,
}

impl ApiClient {
    pub fn new(
        base_url: &str,
        auth_header: &'static str,
        credential: &str,
        timeout: Duration,
    ) -> Result<Self, MediaServerError> {
        // validate once so every later join is a plain concat
        Url::parse(base_url)?;

        let mut header = HeaderMap::new();
        let value: HeaderValue = credential
            .parse()
            .map_err(|_| MediaServerError::InvalidCredential)?;
        header.insert(HeaderName::from_static(auth_header), value);

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            header,
            timeout,
        })
    }

    pub fn with_header(mut self, name: &'static str, value: &'static str) -> Self {
        self.header
            .insert(HeaderName::from_static(name), HeaderValue::from_static(value));
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> Result<Url, MediaServerError> {
        Ok(Url::parse(&format!("{}{}", self.base_url, path))?)
    }

    pub async fn get(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response, MediaServerError> {
        let url = self.url(path)?;
        let resp = self
            .client
            .get(url.clone())
            .query(query)
            .headers(self.header.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    MediaServerError::Timeout {
                        url: url.to_string(),
                    }
                } else {
                    MediaServerError::Connectivity(e)
                }
            })?;

        let status = resp.status();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(MediaServerError::Unauthorized { status })
            }
            StatusCode::NOT_FOUND => Err(MediaServerError::NotFound {
                what: path.to_string(),
            }),
            s if !s.is_success() => Err(MediaServerError::InvalidResponseStatus { status }),
            _ => Ok(resp),
        }
    }

    pub async fn get_text(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<String, MediaServerError> {
        Ok(self.get(path, query).await?.text().await?)
    }
}
