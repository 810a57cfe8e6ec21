pub mod score;
pub mod scorer;

pub use score::{calculate_trending, TrendingBreakdown, TrendingInputs};
pub use scorer::{ListingSnapshot, RecomputeSummary, TrendingMetric, TrendingScorer};
