//! Douyin web API client
//!
//! REST-style endpoints under `/aweme/`, authenticated by a browser
//! cookie string. Listing endpoints paginate with an opaque `cursor`
//! string; the empty string starts a listing and also marks its end.
//! Profile responses carry a `status_code`/`status_msg` envelope; a
//! non-zero code is surfaced as [`ScrapeError::Api`].

use async_trait::async_trait;
use reqwest::header::{COOKIE, REFERER};
use serde::Deserialize;

use crate::error::{ScrapeError, ScrapeResult};
use crate::models::{Comment, Page, Platform, Post, Product, Profile};

use super::{check_landing_page, read_body, transport_error, Scraper};

const DEFAULT_BASE_URL: &str = "https://www.douyin.com";
const PAGE_SIZE: u32 = 20;

pub struct DouyinScraper {
    client: reqwest::Client,
    cookies: String,
    base_url: String,
}

impl DouyinScraper {
    pub fn new(client: reqwest::Client, cookies: String) -> Self {
        Self {
            client,
            cookies,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Point the client at a mock server; used by tests
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> ScrapeResult<String> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(query)
            .header(COOKIE, &self.cookies)
            .header(REFERER, format!("{}/", self.base_url))
            .send()
            .await
            .map_err(transport_error)?;

        read_body(response).await
    }
}

#[derive(Deserialize)]
struct ProfileEnvelope {
    #[serde(default)]
    user_info: Profile,
    #[serde(default)]
    status_code: i64,
    #[serde(default)]
    status_msg: String,
}

#[derive(Deserialize)]
struct PostListEnvelope {
    #[serde(default)]
    aweme_list: Vec<Post>,
    #[serde(default)]
    cursor: String,
}

#[derive(Deserialize)]
struct CommentListEnvelope {
    #[serde(default)]
    comments: Vec<Comment>,
    #[serde(default)]
    cursor: String,
}

#[derive(Deserialize)]
struct ProductEnvelope {
    #[serde(default)]
    product_info: Product,
}

#[async_trait]
impl Scraper for DouyinScraper {
    fn platform(&self) -> Platform {
        Platform::Douyin
    }

    async fn initialize(&self) -> ScrapeResult<()> {
        check_landing_page(&self.client, &format!("{}/", self.base_url), &self.cookies).await
    }

    async fn get_profile(&self, account_id: &str) -> ScrapeResult<Profile> {
        let body = self
            .get_json(
                "/aweme/v1/web/user/profile/other/",
                &[("user_id", account_id)],
            )
            .await?;

        let envelope: ProfileEnvelope = serde_json::from_str(&body)?;
        if envelope.status_code != 0 {
            return Err(ScrapeError::Api {
                code: envelope.status_code,
                message: envelope.status_msg,
            });
        }
        Ok(envelope.user_info)
    }

    async fn get_posts(&self, account_id: &str, cursor: &str) -> ScrapeResult<Page<Post>> {
        let count = PAGE_SIZE.to_string();
        let body = self
            .get_json(
                "/aweme/v1/web/aweme/post/",
                &[
                    ("user_id", account_id),
                    ("count", count.as_str()),
                    ("cursor", cursor),
                ],
            )
            .await?;

        let envelope: PostListEnvelope = serde_json::from_str(&body)?;
        let mut posts = envelope.aweme_list;
        for post in &mut posts {
            if post.user_id.is_empty() {
                post.user_id = account_id.to_string();
            }
        }
        Ok(Page::new(posts, envelope.cursor))
    }

    async fn get_comments(&self, post_id: &str, cursor: &str) -> ScrapeResult<Page<Comment>> {
        let count = PAGE_SIZE.to_string();
        let body = self
            .get_json(
                "/aweme/v2/web/comment/list/",
                &[
                    ("aweme_id", post_id),
                    ("cursor", cursor),
                    ("count", count.as_str()),
                ],
            )
            .await?;

        let envelope: CommentListEnvelope = serde_json::from_str(&body)?;
        let mut comments = envelope.comments;
        for comment in &mut comments {
            if comment.post_id.is_empty() {
                comment.post_id = post_id.to_string();
            }
        }
        Ok(Page::new(comments, envelope.cursor))
    }

    async fn get_product(&self, product_id: &str) -> ScrapeResult<Product> {
        let body = self
            .get_json(
                "/aweme/v1/web/promotion/product/detail/",
                &[("product_id", product_id)],
            )
            .await?;

        let envelope: ProductEnvelope = serde_json::from_str(&body)?;
        Ok(envelope.product_info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn scraper_for(server: &MockServer) -> DouyinScraper {
        let client = reqwest::Client::builder().build().unwrap();
        DouyinScraper::new(client, "sessionid=abc".into()).with_base_url(server.uri())
    }

    #[tokio::test]
    async fn test_get_posts_parses_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/aweme/v1/web/aweme/post/"))
            .and(query_param("user_id", "u1"))
            .and(query_param("cursor", ""))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{
                    "aweme_list": [
                        {"video_id": "v1", "title": "first", "likes": 5},
                        {"video_id": "v2", "product_info": {"product_id": "p9"}}
                    ],
                    "has_more": 1,
                    "cursor": "c1"
                }"#,
                "application/json",
            ))
            .mount(&server)
            .await;

        let page = scraper_for(&server).get_posts("u1", "").await.unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.next_cursor, "c1");
        // user_id backfilled from the requested account
        assert_eq!(page.items[0].user_id, "u1");
        assert_eq!(page.items[1].product_id(), Some("p9"));
    }

    #[tokio::test]
    async fn test_profile_api_error_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/aweme/v1/web/user/profile/other/"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{"status_code": 8, "status_msg": "need login"}"#,
                "application/json",
            ))
            .mount(&server)
            .await;

        let err = scraper_for(&server).get_profile("u1").await.unwrap_err();
        match err {
            ScrapeError::Api { code, message } => {
                assert_eq!(code, 8);
                assert_eq!(message, "need login");
            }
            other => panic!("expected Api error, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_garbled_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/aweme/v2/web/comment/list/"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("<!doctype html>", "text/html"))
            .mount(&server)
            .await;

        let err = scraper_for(&server).get_comments("v1", "").await.unwrap_err();
        assert!(matches!(err, ScrapeError::Decode(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_server_error_status_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = scraper_for(&server).get_posts("u1", "").await.unwrap_err();
        assert!(matches!(err, ScrapeError::Status(503)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_initialize_rejects_non_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let err = scraper_for(&server).initialize().await.unwrap_err();
        assert!(matches!(err, ScrapeError::Auth(_)));
        assert!(!err.is_transient());
    }
}
