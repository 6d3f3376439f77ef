use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::types::{
    Article, Feed, FeedsResponse, Folder, FoldersResponse, ItemQuery, ItemsResponse,
    MarkItemsReadRequest,
};
use crate::core::config::NewsApiConfig;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("authentication rejected with status {0}")]
    Auth(u16),
    #[error("rate limited by server")]
    RateLimited,
    #[error("server error: {0}")]
    Server(u16),
    #[error("unexpected status code: {0}")]
    HttpStatus(u16),
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("invalid response payload: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Server(_) | Self::RateLimited)
    }
}

/// Remote Items, Folders and Feeds endpoints the queue depends on.
#[async_trait]
pub trait NewsApi: Send + Sync {
    async fn get_items(&self, query: &ItemQuery) -> Result<Vec<Article>, ApiError>;
    async fn mark_items_read(&self, ids: &[i64]) -> Result<(), ApiError>;
    async fn get_folders(&self) -> Result<Vec<Folder>, ApiError>;
    async fn get_feeds(&self) -> Result<Vec<Feed>, ApiError>;
}

#[derive(Debug, Clone)]
pub struct NewsClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    max_retries: usize,
}

impl NewsClient {
    pub fn new(config: &NewsApiConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self::with_client(http, config))
    }

    pub fn with_client(http: reqwest::Client, config: &NewsApiConfig) -> Self {
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            max_retries: config.max_retries,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/{path}", self.base_url))
            .basic_auth(&self.username, Some(&self.password))
    }

    async fn execute<F>(&self, build: F) -> Result<Response, ApiError>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let mut attempt = 0_usize;
        loop {
            let outcome = match build().send().await {
                Ok(response) => check_status(response),
                Err(error) => Err(ApiError::Network(error)),
            };
            match outcome {
                Ok(response) => return Ok(response),
                Err(error) => {
                    if !error.is_retryable() || attempt >= self.max_retries {
                        return Err(error);
                    }
                    attempt += 1;
                    warn!("news api request failed, retrying (attempt {attempt}): {error}");
                    tokio::time::sleep(Duration::from_millis(40 * attempt as u64)).await;
                }
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&'static str, String)],
    ) -> Result<T, ApiError> {
        let response = self
            .execute(|| self.request(Method::GET, path).query(query))
            .await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl NewsApi for NewsClient {
    async fn get_items(&self, query: &ItemQuery) -> Result<Vec<Article>, ApiError> {
        let pairs = query.to_query_pairs();
        let response: ItemsResponse = self.get_json("items", &pairs).await?;
        Ok(response.items)
    }

    async fn mark_items_read(&self, ids: &[i64]) -> Result<(), ApiError> {
        if ids.is_empty() {
            return Ok(());
        }
        let payload = MarkItemsReadRequest { item_ids: ids };
        self.execute(|| self.request(Method::PUT, "items/read/multiple").json(&payload))
            .await?;
        Ok(())
    }

    async fn get_folders(&self) -> Result<Vec<Folder>, ApiError> {
        let response: FoldersResponse = self.get_json("folders", &[]).await?;
        Ok(response.folders)
    }

    async fn get_feeds(&self) -> Result<Vec<Feed>, ApiError> {
        let response: FeedsResponse = self.get_json("feeds", &[]).await?;
        Ok(response.feeds)
    }
}

/// Pages through every unread item, newest first. A non-positive `page_size`
/// fetches everything in one request.
pub async fn fetch_unread_articles<A>(api: &A, page_size: i64) -> Result<Vec<Article>, ApiError>
where
    A: NewsApi + ?Sized,
{
    if page_size <= 0 {
        return api.get_items(&ItemQuery::unread_page(-1, 0)).await;
    }

    let mut articles = Vec::new();
    let mut offset = 0_i64;
    loop {
        let page = api.get_items(&ItemQuery::unread_page(page_size, offset)).await?;
        let page_len = page.len();
        let lowest_id = page.iter().map(|article| article.id).min();
        articles.extend(page);

        let Some(lowest_id) = lowest_id else {
            break;
        };
        if (page_len as i64) < page_size || (offset != 0 && lowest_id >= offset) {
            break;
        }
        offset = lowest_id;
    }
    debug!("fetched {} unread articles", articles.len());
    Ok(articles)
}

fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiError::Auth(status.as_u16()),
        StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited,
        status if status.is_server_error() => ApiError::Server(status.as_u16()),
        status => ApiError::HttpStatus(status.as_u16()),
    })
}
