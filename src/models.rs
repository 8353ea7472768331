//! Core data structures shared across the crawler
//!
//! Record types mirror the JSON payloads returned by the platform APIs,
//! so they double as deserialization targets for the scrapers and as
//! the wire format written by the sinks.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Douyin (REST-style web API)
    Douyin,
    /// Kuaishou (GraphQL web API)
    Kuaishou,
}

impl Platform {
    /// Platform tag as stored in checkpoints and sinks
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Douyin => "douyin",
            Self::Kuaishou => "kuaishou",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "douyin" => Ok(Self::Douyin),
            "kuaishou" => Ok(Self::Kuaishou),
            other => Err(format!("unsupported platform: {other}")),
        }
    }
}

/// Account profile
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profile {
    #[serde(rename = "user_id", alias = "id")]
    pub account_id: String,

    #[serde(default, alias = "name")]
    pub nickname: String,

    #[serde(default, alias = "followersCount")]
    pub followers: i64,

    #[serde(default, alias = "followingCount")]
    pub following: i64,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub tags: Vec<String>,
}

/// A single published post (short video)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Post {
    #[serde(rename = "video_id", alias = "photoId")]
    pub post_id: String,

    #[serde(default)]
    pub user_id: String,

    #[serde(default, alias = "caption")]
    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default, alias = "likeCount")]
    pub likes: i64,

    #[serde(default, alias = "commentCount")]
    pub comments: i64,

    #[serde(default, alias = "shareCount")]
    pub shares: i64,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Attached shop item, when the post carries one
    #[serde(default, rename = "product_info", alias = "productInfo")]
    pub product: Option<ProductRef>,
}

impl Post {
    /// Product ID attached to this post, if any
    pub fn product_id(&self) -> Option<&str> {
        self.product
            .as_ref()
            .map(|p| p.product_id.as_str())
            .filter(|id| !id.is_empty())
    }
}

/// Reference to a product embedded in a post payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductRef {
    #[serde(rename = "product_id", alias = "id")]
    pub product_id: String,

    #[serde(default)]
    pub name: String,
}

/// A comment on a post
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Comment {
    #[serde(rename = "comment_id", alias = "id")]
    pub comment_id: String,

    #[serde(default, rename = "video_id", alias = "photoId")]
    pub post_id: String,

    #[serde(default, alias = "authorId")]
    pub user_id: String,

    #[serde(default)]
    pub content: String,

    #[serde(default, alias = "likeCount")]
    pub likes: i64,

    #[serde(default, alias = "replyCount")]
    pub replies: i64,

    #[serde(default, alias = "createTime")]
    pub timestamp: i64,
}

/// Shop product details
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Product {
    #[serde(rename = "product_id", alias = "id")]
    pub product_id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub price: f64,

    #[serde(default)]
    pub category: String,

    #[serde(default)]
    pub description: String,

    #[serde(default, alias = "salesCount")]
    pub sales: i64,
}

/// One page of a cursor-paginated listing
///
/// An empty `next_cursor` means "no more data"; a `next_cursor` equal to
/// the cursor that produced the page means the same thing. The empty
/// string is also the start cursor for the first request.
#[derive(Debug, Clone, Default)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: String,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, next_cursor: impl Into<String>) -> Self {
        Self {
            items,
            next_cursor: next_cursor.into(),
        }
    }

    /// Whether `next_cursor` terminates pagination relative to the
    /// cursor this page was fetched with
    pub fn is_last(&self, current_cursor: &str) -> bool {
        self.next_cursor.is_empty() || self.next_cursor == current_cursor
    }
}

/// Kind tag for finished records handed to a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Profile,
    Post,
    Comment,
    Product,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::Post => "post",
            Self::Comment => "comment",
            Self::Product => "product",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A finished record on its way to a sink
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Record {
    Profile(Profile),
    Post(Post),
    Comment(Comment),
    Product(Product),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Profile(_) => RecordKind::Profile,
            Self::Post(_) => RecordKind::Post,
            Self::Comment(_) => RecordKind::Comment,
            Self::Product(_) => RecordKind::Product,
        }
    }

    /// Identifier the record is keyed by in storage
    pub fn id(&self) -> &str {
        match self {
            Self::Profile(p) => &p.account_id,
            Self::Post(p) => &p.post_id,
            Self::Comment(c) => &c.comment_id,
            Self::Product(p) => &p.product_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_roundtrip() {
        assert_eq!("douyin".parse::<Platform>().unwrap(), Platform::Douyin);
        assert_eq!("Kuaishou".parse::<Platform>().unwrap(), Platform::Kuaishou);
        assert!("weibo".parse::<Platform>().is_err());
        assert_eq!(Platform::Douyin.to_string(), "douyin");
    }

    #[test]
    fn test_page_termination() {
        let page: Page<u32> = Page::new(vec![1, 2], "c1");
        assert!(!page.is_last(""));
        assert!(page.is_last("c1"));

        let last: Page<u32> = Page::new(vec![], "");
        assert!(last.is_last("c9"));
    }

    #[test]
    fn test_post_product_id_empty_is_none() {
        let mut post = Post {
            post_id: "v1".into(),
            ..Default::default()
        };
        assert_eq!(post.product_id(), None);

        post.product = Some(ProductRef {
            product_id: String::new(),
            name: "x".into(),
        });
        assert_eq!(post.product_id(), None);

        post.product = Some(ProductRef {
            product_id: "p1".into(),
            name: "x".into(),
        });
        assert_eq!(post.product_id(), Some("p1"));
    }

    #[test]
    fn test_record_kind_and_id() {
        let rec = Record::Comment(Comment {
            comment_id: "c42".into(),
            ..Default::default()
        });
        assert_eq!(rec.kind(), RecordKind::Comment);
        assert_eq!(rec.id(), "c42");
        assert_eq!(rec.kind().to_string(), "comment");
    }

    #[test]
    fn test_post_deserializes_douyin_shape() {
        let json = r#"{
            "video_id": "v1",
            "user_id": "u1",
            "title": "t",
            "likes": 3,
            "product_info": {"product_id": "p1", "name": "lamp"}
        }"#;
        let post: Post = serde_json::from_str(json).unwrap();
        assert_eq!(post.post_id, "v1");
        assert_eq!(post.product_id(), Some("p1"));
    }
}
