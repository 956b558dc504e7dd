pub mod article;
pub mod feed;
pub mod node;

pub use article::Article;
pub use feed::{observed_cadence, FeedSnapshot};
pub use node::{Category, CheckFrequency, Entry, SubscriptionNode};
