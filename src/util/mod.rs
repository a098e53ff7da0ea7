//! Utility functions shared by the feed pipeline.
//!
//! - **Text**: lenient HTML entity decoding and title cleanup
//! - **HTML**: a small tag scanner used for content rewriting and icon discovery
//! - **URLs**: absolute-URL checks and origin resolution

pub mod html;
mod text;
mod urls;

pub use text::{clean_title, decode_entities};
pub use urls::{origin_of, parse_http_url, resolve_against};
