use crate::settings::Trending;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrendingInputs {
    pub member_count: i64,
    pub member_growth: i64,
    pub vote_growth: i64,
    pub view_growth: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrendingBreakdown {
    pub growth_velocity: f64,
    pub engagement_score: f64,
    pub trending_score: f64,
    pub boost_reasons: Vec<String>,
}

impl TrendingBreakdown {
    pub fn is_finite(&self) -> bool {
        self.growth_velocity.is_finite()
            && self.engagement_score.is_finite()
            && self.trending_score.is_finite()
    }
}

pub fn growth_velocity(inputs: &TrendingInputs, weights: &Trending) -> f64 {
    inputs.member_growth as f64 * weights.growth.member
        + inputs.vote_growth as f64 * weights.growth.vote
        + inputs.view_growth as f64 * weights.growth.view
}

/// Engagement relative to listing size: the same number of votes counts for
/// more on a small listing than on a large one.
pub fn engagement_score(inputs: &TrendingInputs, weights: &Trending) -> f64 {
    let w = &weights.engagement;
    let raw = inputs.vote_growth as f64 * w.vote + inputs.view_growth as f64 * w.view;
    let size = (1.0 + inputs.member_count.max(0) as f64).powf(w.size_exponent);
    w.scale * raw / size
}

pub fn calculate_trending(inputs: &TrendingInputs, weights: &Trending) -> TrendingBreakdown {
    let mut boosts = Vec::new();

    let growth_velocity = growth_velocity(inputs, weights);
    let engagement_score = engagement_score(inputs, weights);

    let velocity_part = growth_velocity * weights.velocity_weight;
    let engagement_part = engagement_score * weights.engagement_weight;

    if inputs.member_growth > 0 {
        boosts.push(format!("+{} members", inputs.member_growth));
    }
    if inputs.vote_growth > 0 {
        boosts.push(format!("+{} votes", inputs.vote_growth));
    }
    if inputs.view_growth > 0 {
        boosts.push(format!("+{} views", inputs.view_growth));
    }

    TrendingBreakdown {
        growth_velocity,
        engagement_score,
        trending_score: velocity_part + engagement_part,
        boost_reasons: boosts,
    }
}
