//! Utility functions for common operations.
//!
//! - **Text processing**: whitespace normalization, tracking-parameter removal
//!   and lenient feed date parsing
//! - **Charset handling**: decoding fetched HTML by its declared or sniffed encoding
//! - **URL handling**: http(s) validation, domain extraction and domain matching
//!
//! # Examples
//!
//! ```
//! use meridian_ingest::util::{clean_text, clean_url, domain_of};
//!
//! assert_eq!(clean_text("  Breaking:   news  "), "Breaking: news");
//! assert_eq!(clean_url("https://example.com/a?utm_source=x"), "https://example.com/a");
//! assert_eq!(domain_of("https://example.com/a").as_deref(), Some("example.com"));
//! ```

mod charset;
mod text;
mod url_validator;

pub use charset::decode_html;
pub use text::{clean_text, clean_url, parse_date};
pub use url_validator::{domain_of, host_matches, validate_url, UrlValidationError};
