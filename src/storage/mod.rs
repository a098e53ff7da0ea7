mod articles;
mod feeds;
mod logs;
mod schema;
mod store;
mod types;

pub use feeds::NewFeed;
pub use schema::Database;
pub use store::FeedStore;
pub use types::{Article, DatabaseError, Feed, FeedLog};
