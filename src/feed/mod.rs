pub mod model;
pub mod parse;
pub mod write;

pub use model::{Attribute, Element, Feed, Offer, Param, Shop};
pub use parse::parse_feed;
pub use write::write_feed;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("xml error at byte {position}: {message}")]
    Xml { position: u64, message: String },
    #[error("malformed feed: {0}")]
    Malformed(String),
    #[error("xml write failed: {0}")]
    Write(String),
}
