use super::score::{calculate_trending, TrendingInputs};
use crate::db::{day_bounds, format_day, DbPool};
use crate::error::{retry_once, Error, Result};
use crate::listing::Listing;
use crate::schema::{listing_snapshots, listings, trending_metrics, votes};
use crate::settings::{settings, Trending};
use crate::utils::logs;
use chrono::{NaiveDate, Utc};
use diesel::prelude::*;
use std::collections::{HashMap, HashSet};

#[derive(Queryable, Selectable, Insertable, AsChangeset, Debug, Clone, PartialEq)]
#[diesel(table_name = listing_snapshots)]
pub struct ListingSnapshot {
    pub listing_id: String,
    pub date: String,
    pub member_count: i64,
    pub vote_count: i64,
    pub view_count: i64,
}

#[derive(Queryable, Selectable, Insertable, AsChangeset, Debug, Clone, PartialEq)]
#[diesel(table_name = trending_metrics)]
pub struct TrendingMetric {
    pub listing_id: String,
    pub date: String,
    pub growth_velocity: f64,
    pub engagement_score: f64,
    pub member_growth: i64,
    pub vote_growth: i64,
    pub view_growth: i64,
    pub trending_score: f64,
    pub computed_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecomputeSummary {
    pub date: NaiveDate,
    pub scored: usize,
    pub skipped: usize,
    /// Listings left untouched because `date` is a closed day that was
    /// already snapshotted.
    pub frozen: usize,
    pub errors: usize,
    pub failed: Vec<String>,
}

impl RecomputeSummary {
    fn new(date: NaiveDate) -> Self {
        Self {
            date,
            scored: 0,
            skipped: 0,
            frozen: 0,
            errors: 0,
            failed: Vec::new(),
        }
    }
}

struct Batch {
    listings: Vec<Listing>,
    baselines: HashMap<String, ListingSnapshot>,
    snapshotted: HashSet<String>,
    votes_on_day: HashMap<String, i64>,
}

#[derive(Clone)]
pub struct TrendingScorer {
    pool: DbPool,
    weights: Option<Trending>,
}

impl TrendingScorer {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            weights: None,
        }
    }

    /// Scorer pinned to fixed weights instead of following the live settings.
    pub fn with_weights(pool: DbPool, weights: Trending) -> Self {
        Self {
            pool,
            weights: Some(weights),
        }
    }

    fn weights(&self) -> Trending {
        self.weights
            .clone()
            .unwrap_or_else(|| settings().trending.clone())
    }

    /// Rewrites the trending rows for `as_of`. Safe to rerun: with no data
    /// change in between, a second run writes the same rows. Once `as_of`
    /// is over (before today, UTC) a listing already snapshotted for it
    /// keeps its snapshot and metric as they are.
    pub fn recompute_all(&self, as_of: NaiveDate) -> Result<RecomputeSummary> {
        self.recompute(as_of, Utc::now().date_naive())
    }

    fn recompute(&self, as_of: NaiveDate, today: NaiveDate) -> Result<RecomputeSummary> {
        let closed = as_of < today;
        let weights = self.weights();
        let previous = as_of
            .pred_opt()
            .ok_or_else(|| Error::Validation(format!("no day precedes {as_of}")))?;
        let date = format_day(as_of);
        let (day_start, day_end) = day_bounds(as_of);

        logs::log_recompute_start(as_of);

        let backoff = settings().engagement.retry_backoff_ms;
        let batch = retry_once("trending load", backoff, || {
            self.load_batch(&date, &format_day(previous))
        })
        .inspect_err(logs::log_recompute_failed)?;

        let mut conn = self.pool.get()?;
        let computed_at = Utc::now().timestamp();
        let mut summary = RecomputeSummary::new(as_of);
        let mut transient_failures = 0;

        for listing in &batch.listings {
            if closed && batch.snapshotted.contains(&listing.id) {
                summary.frozen += 1;
                continue;
            }

            let bumped_on_day = listing
                .last_bumped_at
                .is_some_and(|at| at >= day_start && at < day_end);
            let votes_on_day = batch.votes_on_day.get(&listing.id).copied().unwrap_or(0);

            let result = score_listing(
                &mut conn,
                listing,
                &date,
                batch.baselines.get(&listing.id),
                votes_on_day,
                bumped_on_day,
                &weights,
                computed_at,
            );

            match result {
                Ok(Some(_)) => summary.scored += 1,
                Ok(None) => summary.skipped += 1,
                Err(e) => {
                    if e.is_transient() {
                        transient_failures += 1;
                    }
                    logs::log_listing_score_failed(&listing.id, &e);
                    summary.errors += 1;
                    summary.failed.push(listing.id.clone());
                }
            }
        }

        let attempted = batch.listings.len() - summary.frozen;
        if attempted > 0 && transient_failures == attempted {
            let err = Error::TransientStore(format!("every listing failed to score for {date}"));
            logs::log_recompute_failed(&err);
            return Err(err);
        }

        logs::log_recompute_done(&summary);
        Ok(summary)
    }

    fn load_batch(&self, date: &str, previous: &str) -> Result<Batch> {
        let mut conn = self.pool.get()?;

        let listings = listings::table
            .order(listings::id.asc())
            .select(Listing::as_select())
            .load(&mut conn)?;

        let baselines = listing_snapshots::table
            .filter(listing_snapshots::date.eq(previous))
            .select(ListingSnapshot::as_select())
            .load(&mut conn)?
            .into_iter()
            .map(|s| (s.listing_id.clone(), s))
            .collect();

        let snapshotted = listing_snapshots::table
            .filter(listing_snapshots::date.eq(date))
            .select(listing_snapshots::listing_id)
            .load::<String>(&mut conn)?
            .into_iter()
            .collect();

        let votes_on_day = votes::table
            .filter(votes::day.eq(date))
            .group_by(votes::listing_id)
            .select((votes::listing_id, diesel::dsl::count_star()))
            .load::<(String, i64)>(&mut conn)?
            .into_iter()
            .collect();

        Ok(Batch {
            listings,
            baselines,
            snapshotted,
            votes_on_day,
        })
    }

    /// Rows for `date`, highest score first, ties by listing id.
    pub fn top_trending(&self, date: NaiveDate, limit: usize) -> Result<Vec<TrendingMetric>> {
        let mut conn = self.pool.get()?;
        let rows = trending_metrics::table
            .filter(trending_metrics::date.eq(format_day(date)))
            .order((
                trending_metrics::trending_score.desc(),
                trending_metrics::listing_id.asc(),
            ))
            .limit(limit as i64)
            .select(TrendingMetric::as_select())
            .load(&mut conn)?;
        Ok(rows)
    }

    pub fn metric_for(&self, listing_id: &str, date: NaiveDate) -> Result<Option<TrendingMetric>> {
        let mut conn = self.pool.get()?;
        let row = trending_metrics::table
            .find((listing_id, format_day(date)))
            .select(TrendingMetric::as_select())
            .first(&mut conn)
            .optional()?;
        Ok(row)
    }
}

#[allow(clippy::too_many_arguments)]
fn score_listing(
    conn: &mut SqliteConnection,
    listing: &Listing,
    date: &str,
    baseline: Option<&ListingSnapshot>,
    votes_on_day: i64,
    bumped_on_day: bool,
    weights: &Trending,
    computed_at: i64,
) -> Result<Option<TrendingMetric>> {
    conn.immediate_transaction(|conn| {
        let snapshot = ListingSnapshot {
            listing_id: listing.id.clone(),
            date: date.to_string(),
            member_count: listing.member_count,
            vote_count: listing.vote_count,
            view_count: listing.view_count,
        };
        diesel::insert_into(listing_snapshots::table)
            .values(&snapshot)
            .on_conflict((listing_snapshots::listing_id, listing_snapshots::date))
            .do_update()
            .set(&snapshot)
            .execute(conn)?;

        let inputs = TrendingInputs {
            member_count: listing.member_count,
            member_growth: baseline.map_or(0, |b| listing.member_count - b.member_count),
            vote_growth: votes_on_day,
            view_growth: baseline.map_or(0, |b| listing.view_count - b.view_count),
        };

        let active = inputs.member_growth != 0
            || inputs.vote_growth != 0
            || inputs.view_growth != 0
            || bumped_on_day;
        if !active {
            diesel::delete(trending_metrics::table.find((listing.id.as_str(), date)))
                .execute(conn)?;
            return Ok(None);
        }

        let breakdown = calculate_trending(&inputs, weights);
        if !breakdown.is_finite() {
            return Err(Error::Validation(format!(
                "trending score for listing {} is not finite",
                listing.id
            )));
        }

        let metric = TrendingMetric {
            listing_id: listing.id.clone(),
            date: date.to_string(),
            growth_velocity: breakdown.growth_velocity,
            engagement_score: breakdown.engagement_score,
            member_growth: inputs.member_growth,
            vote_growth: inputs.vote_growth,
            view_growth: inputs.view_growth,
            trending_score: breakdown.trending_score,
            computed_at,
        };
        diesel::insert_into(trending_metrics::table)
            .values(&metric)
            .on_conflict((trending_metrics::listing_id, trending_metrics::date))
            .do_update()
            .set(&metric)
            .execute(conn)?;

        Ok(Some(metric))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{seed_listing, test_pool};
    use crate::engagement::EngagementGate;
    use crate::listing::{set_member_count, Tier};
    use crate::settings::Settings;
    use chrono::{Duration, TimeZone};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
    }

    fn without_timestamps(rows: Vec<TrendingMetric>) -> Vec<TrendingMetric> {
        rows.into_iter()
            .map(|mut r| {
                r.computed_at = 0;
                r
            })
            .collect()
    }

    #[test]
    fn test_only_active_listings_are_scored() {
        let (_dir, pool) = test_pool();
        seed_listing(&pool, "a", Tier::Free);
        seed_listing(&pool, "b", Tier::Free);
        let gate = EngagementGate::new(pool.clone());
        gate.try_vote("u1", "a", day(2)).unwrap();

        let scorer = TrendingScorer::new(pool);
        let summary = scorer.recompute_all(day(2)).unwrap();

        assert_eq!(summary.scored, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.errors, 0);
        let row = scorer.metric_for("a", day(2)).unwrap().unwrap();
        assert_eq!(row.vote_growth, 1);
        assert!(row.trending_score > 0.0);
        assert!(scorer.metric_for("b", day(2)).unwrap().is_none());
    }

    #[test]
    fn test_growth_is_measured_against_previous_snapshot() {
        let (_dir, pool) = test_pool();
        seed_listing(&pool, "a", Tier::Free);
        {
            let mut conn = pool.get().unwrap();
            set_member_count(&mut conn, "a", 100).unwrap();
        }
        let scorer = TrendingScorer::new(pool.clone());
        scorer.recompute_all(day(1)).unwrap();

        let gate = EngagementGate::new(pool.clone());
        {
            let mut conn = pool.get().unwrap();
            set_member_count(&mut conn, "a", 150).unwrap();
        }
        for _ in 0..7 {
            gate.record_view("a").unwrap();
        }
        gate.try_vote("u1", "a", day(2)).unwrap();
        gate.try_vote("u2", "a", day(2)).unwrap();

        scorer.recompute_all(day(2)).unwrap();
        let row = scorer.metric_for("a", day(2)).unwrap().unwrap();
        assert_eq!(row.member_growth, 50);
        assert_eq!(row.view_growth, 7);
        assert_eq!(row.vote_growth, 2);
    }

    #[test]
    fn test_recompute_is_idempotent() {
        let (_dir, pool) = test_pool();
        seed_listing(&pool, "a", Tier::Free);
        seed_listing(&pool, "b", Tier::Gold);
        let gate = EngagementGate::new(pool.clone());
        gate.try_vote("u1", "a", day(3)).unwrap();
        gate.try_vote("u2", "a", day(3)).unwrap();
        gate.try_vote("u1", "b", day(3)).unwrap();

        let scorer = TrendingScorer::new(pool);
        let first = scorer.recompute(day(3), day(3)).unwrap();
        let rows_first = without_timestamps(scorer.top_trending(day(3), 10).unwrap());
        let second = scorer.recompute(day(3), day(3)).unwrap();
        let rows_second = without_timestamps(scorer.top_trending(day(3), 10).unwrap());

        assert_eq!(first, second);
        assert_eq!(rows_first, rows_second);
        assert_eq!(rows_first.len(), 2);
    }

    #[test]
    fn test_top_trending_orders_by_score_then_id() {
        let (_dir, pool) = test_pool();
        for id in ["c", "a", "b"] {
            seed_listing(&pool, id, Tier::Free);
        }
        let gate = EngagementGate::new(pool.clone());
        gate.try_vote("u1", "c", day(4)).unwrap();
        gate.try_vote("u1", "a", day(4)).unwrap();
        gate.try_vote("u1", "b", day(4)).unwrap();
        gate.try_vote("u2", "b", day(4)).unwrap();

        let scorer = TrendingScorer::new(pool);
        scorer.recompute_all(day(4)).unwrap();

        let ids: Vec<String> = scorer
            .top_trending(day(4), 10)
            .unwrap()
            .into_iter()
            .map(|r| r.listing_id)
            .collect();
        assert_eq!(ids, vec!["b", "a", "c"]);

        assert_eq!(scorer.top_trending(day(4), 1).unwrap().len(), 1);
        assert!(scorer.top_trending(day(5), 10).unwrap().is_empty());
    }

    #[test]
    fn test_failing_listing_does_not_abort_batch() {
        let (_dir, pool) = test_pool();
        seed_listing(&pool, "a", Tier::Free);
        seed_listing(&pool, "b", Tier::Free);

        let mut weights = Settings::default().trending;
        weights.growth.vote = f64::MAX;
        let scorer = TrendingScorer::with_weights(pool.clone(), weights);

        scorer.recompute_all(day(1)).unwrap();
        {
            let mut conn = pool.get().unwrap();
            set_member_count(&mut conn, "b", 40).unwrap();
        }
        let gate = EngagementGate::new(pool.clone());
        gate.try_vote("u1", "a", day(2)).unwrap();
        gate.try_vote("u2", "a", day(2)).unwrap();

        let summary = scorer.recompute_all(day(2)).unwrap();
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.failed, vec!["a".to_string()]);
        assert_eq!(summary.scored, 1);
        assert!(scorer.metric_for("a", day(2)).unwrap().is_none());
        assert_eq!(
            scorer.metric_for("b", day(2)).unwrap().unwrap().member_growth,
            40
        );
    }

    #[test]
    fn test_bump_alone_marks_listing_active() {
        let (_dir, pool) = test_pool();
        seed_listing(&pool, "a", Tier::Platinum);
        let gate = EngagementGate::new(pool.clone());
        let noon = Utc.with_ymd_and_hms(2025, 1, 6, 12, 0, 0).unwrap();
        assert!(gate.try_bump("a", Tier::Platinum, noon).unwrap().accepted);

        let scorer = TrendingScorer::new(pool);
        let summary = scorer.recompute_all(day(6)).unwrap();
        assert_eq!(summary.scored, 1);
        assert!(scorer.metric_for("a", day(6)).unwrap().is_some());

        let summary = scorer.recompute_all(day(6) + Duration::days(1)).unwrap();
        assert_eq!(summary.scored, 0);
    }

    #[test]
    fn test_rerun_drops_row_when_activity_reverts() {
        let (_dir, pool) = test_pool();
        seed_listing(&pool, "a", Tier::Free);
        let scorer = TrendingScorer::new(pool.clone());
        scorer.recompute_all(day(1)).unwrap();

        {
            let mut conn = pool.get().unwrap();
            set_member_count(&mut conn, "a", 30).unwrap();
        }
        scorer.recompute(day(2), day(2)).unwrap();
        assert!(scorer.metric_for("a", day(2)).unwrap().is_some());

        {
            let mut conn = pool.get().unwrap();
            set_member_count(&mut conn, "a", 0).unwrap();
        }
        let summary = scorer.recompute(day(2), day(2)).unwrap();
        assert_eq!(summary.skipped, 1);
        assert!(scorer.metric_for("a", day(2)).unwrap().is_none());
    }

    #[test]
    fn test_closed_days_are_not_rewritten() {
        let (_dir, pool) = test_pool();
        seed_listing(&pool, "a", Tier::Free);
        let scorer = TrendingScorer::new(pool.clone());
        let set_members = |count| {
            let mut conn = pool.get().unwrap();
            set_member_count(&mut conn, "a", count).unwrap();
        };

        scorer.recompute(day(1), day(1)).unwrap();
        set_members(100);
        scorer.recompute(day(2), day(2)).unwrap();
        set_members(500);
        scorer.recompute(day(3), day(3)).unwrap();

        let day2 = scorer.metric_for("a", day(2)).unwrap().unwrap();
        let day3 = scorer.metric_for("a", day(3)).unwrap().unwrap();
        assert_eq!(day2.member_growth, 100);
        assert_eq!(day3.member_growth, 400);

        let rerun = scorer.recompute(day(2), day(4)).unwrap();
        assert_eq!(rerun.frozen, 1);
        assert_eq!(rerun.scored, 0);
        scorer.recompute(day(3), day(4)).unwrap();

        assert_eq!(scorer.metric_for("a", day(2)).unwrap(), Some(day2));
        assert_eq!(scorer.metric_for("a", day(3)).unwrap(), Some(day3));

        let mut conn = pool.get().unwrap();
        let members: i64 = listing_snapshots::table
            .find(("a", format_day(day(2))))
            .select(listing_snapshots::member_count)
            .first(&mut conn)
            .unwrap();
        assert_eq!(members, 100);
    }

    #[test]
    fn test_closed_day_without_snapshot_is_backfilled() {
        let (_dir, pool) = test_pool();
        seed_listing(&pool, "a", Tier::Free);
        let gate = EngagementGate::new(pool.clone());
        gate.try_vote("u1", "a", day(2)).unwrap();

        let scorer = TrendingScorer::new(pool);
        let summary = scorer.recompute(day(2), day(5)).unwrap();
        assert_eq!(summary.scored, 1);
        assert_eq!(summary.frozen, 0);
    }

    #[test]
    fn test_unreadable_store_fails_whole_batch() {
        let (_dir, pool) = test_pool();
        seed_listing(&pool, "a", Tier::Free);
        {
            let mut conn = pool.get().unwrap();
            diesel::sql_query("DROP TABLE votes").execute(&mut conn).unwrap();
        }

        let result = TrendingScorer::new(pool).recompute_all(day(1));
        assert!(matches!(result, Err(Error::TransientStore(_))));
    }

    #[test]
    fn test_every_listing_failing_fails_whole_batch() {
        let (_dir, pool) = test_pool();
        seed_listing(&pool, "a", Tier::Free);
        seed_listing(&pool, "b", Tier::Gold);
        {
            let mut conn = pool.get().unwrap();
            diesel::sql_query(
                "CREATE TRIGGER reject_snapshot BEFORE INSERT ON listing_snapshots \
                 BEGIN SELECT RAISE(ABORT, 'store unavailable'); END;",
            )
            .execute(&mut conn)
            .unwrap();
        }

        let scorer = TrendingScorer::new(pool);
        let result = scorer.recompute_all(day(1));
        assert!(matches!(result, Err(Error::TransientStore(_))));
        assert!(scorer.top_trending(day(1), 10).unwrap().is_empty());
    }

    #[test]
    fn test_empty_store_scores_nothing() {
        let (_dir, pool) = test_pool();
        let summary = TrendingScorer::new(pool).recompute_all(day(1)).unwrap();
        assert_eq!(summary.scored, 0);
        assert_eq!(summary.errors, 0);
    }
}
