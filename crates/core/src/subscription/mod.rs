//! Movie and TV subscriptions fed from tracker RSS feeds.
//!
//! - [`SubscriptionMatcher`] binds a resolved feed item to the first
//!   subscription it names and runs the filters on it
//! - [`EpisodeGapTracker`] keeps the missing-episode set of TV subscriptions
//! - [`SubscriptionFeedLoop`] drives one polling cycle end to end

mod feed_loop;
mod gap;
mod matcher;
mod types;

pub use feed_loop::{SubscriptionFeedLoop, SubscriptionReport};
pub use gap::EpisodeGapTracker;
pub use matcher::SubscriptionMatcher;
pub use types::*;
