//! Feed retrieval and parsing.
//!
//! - [`parser`] - shape-aware RSS 2.0 / Atom / RSS 1.0 parsing into [`FeedItem`]s
//! - [`fetcher`] - disguised, bounded HTTP download of feed documents
//!
//! # Example
//!
//! ```ignore
//! use meridian_ingest::feed::{fetch_feed, parse_feed};
//!
//! let bytes = fetch_feed(&client, "https://example.com/rss").await?;
//! for item in parse_feed(&bytes)? {
//!     println!("{} -> {}", item.title, item.link);
//! }
//! ```

mod fetcher;
mod parser;

pub use fetcher::fetch_feed;
pub use parser::{parse_feed, FeedItem, ParseError, UNKNOWN};
