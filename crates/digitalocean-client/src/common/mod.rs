//! Common utilities for the DigitalOcean API client
//!
//! Authenticated request helpers, status mapping and pagination.

use crate::error::CloudError;
use crate::models::Links;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

/// HTTP client wrapper with bearer authentication
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpClient {
    /// Create a new HTTP client wrapper
    pub fn new(client: Client, base_url: String, token: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a full URL from a path
    pub fn build_url(&self, path: &str) -> String {
        if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = self.build_url(path);
        debug!("{} {}", method, url);
        self.client
            .request(method, &url)
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
    }

    /// Turns a non-success response into a classified error
    async fn check(method: &str, path: &str, response: Response) -> Result<Response, CloudError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(CloudError::from_status(
            status,
            format!("{} {} failed: {} - {}", method, path, status, body),
        ))
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, CloudError> {
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            CloudError::Api(format!(
                "error decoding response body: {} - Response (first 500 chars): {}",
                e,
                text.chars().take(500).collect::<String>()
            ))
        })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, CloudError> {
        let response = self.request(Method::GET, path).send().await?;
        let response = Self::check("GET", path, response).await?;
        Self::decode(response).await
    }

    /// Make a POST request and decode the response body
    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, CloudError> {
        let response = self.request(Method::POST, path).json(body).send().await?;
        let response = Self::check("POST", path, response).await?;
        Self::decode(response).await
    }

    /// Make a POST request whose response has no body (204)
    pub async fn post_no_content(&self, path: &str, body: &serde_json::Value) -> Result<(), CloudError> {
        let response = self.request(Method::POST, path).json(body).send().await?;
        Self::check("POST", path, response).await?;
        Ok(())
    }

    /// Make a DELETE request, optionally with a JSON body
    pub async fn delete(&self, path: &str, body: Option<&serde_json::Value>) -> Result<(), CloudError> {
        let mut request = self.request(Method::DELETE, path);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        Self::check("DELETE", path, response).await?;
        Ok(())
    }

    /// Fetch every page of a collection, reading items from `key`
    /// and following `links.pages.next`
    pub async fn fetch_all_pages<T: DeserializeOwned>(
        &self,
        path: &str,
        key: &str,
    ) -> Result<Vec<T>, CloudError> {
        let mut all_results = Vec::new();
        let mut next = Some(path.to_string());

        while let Some(url) = next.take() {
            debug!("Fetching page: {}", url);
            let mut page: serde_json::Value = self.get(&url).await?;

            let items = page
                .get_mut(key)
                .map(serde_json::Value::take)
                .unwrap_or_else(|| serde_json::Value::Array(Vec::new()));
            let items: Vec<T> = serde_json::from_value(items)?;
            all_results.extend(items);

            let links: Links = page
                .get_mut("links")
                .map(serde_json::Value::take)
                .map(serde_json::from_value)
                .transpose()?
                .unwrap_or_default();
            next = links.pages.and_then(|p| p.next);
        }

        Ok(all_results)
    }

    /// Build query string from filters
    pub fn build_query_string(&self, filters: &[(&str, &str)]) -> String {
        filters
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_url() {
        let http = HttpClient::new(
            Client::new(),
            "https://api.digitalocean.com/".to_string(),
            "token".to_string(),
        );
        assert_eq!(http.base_url(), "https://api.digitalocean.com");
        assert_eq!(
            http.build_url("/v2/droplets"),
            "https://api.digitalocean.com/v2/droplets"
        );
        assert_eq!(
            http.build_url("https://api.digitalocean.com/v2/droplets?page=2"),
            "https://api.digitalocean.com/v2/droplets?page=2"
        );
    }

    #[test]
    fn test_query_string_is_encoded() {
        let http = HttpClient::new(Client::new(), "http://x".to_string(), "t".to_string());
        assert_eq!(
            http.build_query_string(&[("name", "default demo"), ("per_page", "200")]),
            "name=default%20demo&per_page=200"
        );
    }
}
