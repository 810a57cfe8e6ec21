pub mod db;
pub mod engagement;
pub mod error;
pub mod feed;
pub mod listing;
mod schema;
pub mod settings;
pub mod trending;
pub mod utils;

pub use engagement::{BumpOutcome, EngagementGate, VoteOutcome};
pub use error::{Error, Result};
pub use feed::{ActivityFeed, ActivityRecord, ActivityType, NewActivity, FEED_CAPACITY};
pub use listing::{ListingKind, NewListing, Tier};
pub use trending::{RecomputeSummary, TrendingMetric, TrendingScorer};
