//! Kuaishou web API client
//!
//! Single GraphQL endpoint; every call POSTs a query document and
//! unwraps the nested `data` object. Listings paginate with the
//! platform's `pcursor` token, surfaced to the rest of the crawler as
//! the generic opaque cursor (empty string at both the start and the
//! end of a listing).

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, COOKIE, REFERER};
use serde::Deserialize;
use serde_json::json;

use crate::error::ScrapeResult;
use crate::models::{Comment, Page, Platform, Post, Product, Profile};

use super::{check_landing_page, read_body, transport_error, Scraper};

const DEFAULT_BASE_URL: &str = "https://www.kuaishou.com";

pub struct KuaishouScraper {
    client: reqwest::Client,
    cookies: String,
    base_url: String,
}

impl KuaishouScraper {
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

    async fn graphql(&self, query: String) -> ScrapeResult<String> {
        let url = format!("{}/graphql", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "query": query }))
            .header(CONTENT_TYPE, "application/json")
            .header(COOKIE, &self.cookies)
            .header(REFERER, format!("{}/", self.base_url))
            .send()
            .await
            .map_err(transport_error)?;

        read_body(response).await
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ProfileData {
    #[serde(rename = "visionProfile")]
    vision_profile: VisionProfile,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct VisionProfile {
    user: Profile,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct PostListData {
    #[serde(rename = "visionProfilePhotoList")]
    photo_list: PhotoList,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct PhotoList {
    pcursor: String,
    feeds: Vec<Post>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct CommentListData {
    #[serde(rename = "photoCommentList")]
    comment_list: CommentList,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct CommentList {
    pcursor: String,
    comments: Vec<Comment>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ProductData {
    #[serde(rename = "productInfo")]
    product_info: Product,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Envelope<T: Default> {
    data: T,
}

fn parse<T: Default + for<'de> Deserialize<'de>>(body: &str) -> ScrapeResult<T> {
    let envelope: Envelope<T> = serde_json::from_str(body)?;
    Ok(envelope.data)
}

#[async_trait]
impl Scraper for KuaishouScraper {
    fn platform(&self) -> Platform {
        Platform::Kuaishou
    }

    async fn initialize(&self) -> ScrapeResult<()> {
        check_landing_page(&self.client, &format!("{}/", self.base_url), &self.cookies).await
    }

    async fn get_profile(&self, account_id: &str) -> ScrapeResult<Profile> {
        let query = format!(
            r#"{{
  visionProfile(userId: "{account_id}") {{
    user {{ id name followersCount followingCount description tags }}
  }}
}}"#
        );
        let body = self.graphql(query).await?;
        let data: ProfileData = parse(&body)?;

        let mut profile = data.vision_profile.user;
        if profile.account_id.is_empty() {
            profile.account_id = account_id.to_string();
        }
        Ok(profile)
    }

    async fn get_posts(&self, account_id: &str, cursor: &str) -> ScrapeResult<Page<Post>> {
        let query = format!(
            r#"{{
  visionProfilePhotoList(userId: "{account_id}", pcursor: "{cursor}", page: "profile") {{
    pcursor
    feeds {{
      photoId caption likeCount commentCount viewCount tags
      productInfo {{ id name price category description sales }}
    }}
  }}
}}"#
        );
        let body = self.graphql(query).await?;
        let data: PostListData = parse(&body)?;

        let mut posts = data.photo_list.feeds;
        for post in &mut posts {
            if post.user_id.is_empty() {
                post.user_id = account_id.to_string();
            }
        }
        Ok(Page::new(posts, data.photo_list.pcursor))
    }

    async fn get_comments(&self, post_id: &str, cursor: &str) -> ScrapeResult<Page<Comment>> {
        let query = format!(
            r#"{{
  photoCommentList(photoId: "{post_id}", pcursor: "{cursor}") {{
    pcursor
    comments {{ id photoId authorId content likeCount replyCount createTime }}
  }}
}}"#
        );
        let body = self.graphql(query).await?;
        let data: CommentListData = parse(&body)?;

        let mut comments = data.comment_list.comments;
        for comment in &mut comments {
            if comment.post_id.is_empty() {
                comment.post_id = post_id.to_string();
            }
        }
        Ok(Page::new(comments, data.comment_list.pcursor))
    }

    async fn get_product(&self, product_id: &str) -> ScrapeResult<Product> {
        let query = format!(
            r#"{{
  productInfo(productId: "{product_id}") {{
    id name price category description sales
  }}
}}"#
        );
        let body = self.graphql(query).await?;
        let data: ProductData = parse(&body)?;
        Ok(data.product_info)
    }
}
