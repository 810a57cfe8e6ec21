use crate::db::{format_day, to_datetime, DbPool};
use crate::error::{ensure_id, retry_once, Error, Result};
use crate::feed::{ActivityFeed, ActivityType, NewActivity};
use crate::listing::Tier;
use crate::schema::{listings, votes};
use crate::settings::{settings, Settings};
use crate::utils::logs;
use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use serde_json::json;
use std::sync::Arc;

#[derive(Insertable, Debug)]
#[diesel(table_name = votes)]
struct NewVote<'a> {
    user_id: &'a str,
    listing_id: &'a str,
    day: &'a str,
    created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteOutcome {
    pub accepted: bool,
    pub vote_count: i64,
}

impl VoteOutcome {
    /// Turns a rejected vote into `Error::Conflict`.
    pub fn into_result(self) -> Result<Self> {
        if self.accepted {
            Ok(self)
        } else {
            Err(Error::Conflict {
                reason: "already voted today".into(),
                next_eligible_at: None,
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BumpOutcome {
    pub accepted: bool,
    pub next_eligible_at: DateTime<Utc>,
}

impl BumpOutcome {
    /// Turns a bump still on cooldown into `Error::Conflict`.
    pub fn into_result(self) -> Result<Self> {
        if self.accepted {
            Ok(self)
        } else {
            Err(Error::Conflict {
                reason: "bump cooldown has not elapsed".into(),
                next_eligible_at: Some(self.next_eligible_at),
            })
        }
    }
}

/// Enforces one vote per user per listing per day and the per-tier bump
/// cooldown. Every check-then-act runs as a single statement or a single
/// write transaction in the store.
#[derive(Clone)]
pub struct EngagementGate {
    pool: DbPool,
    feed: ActivityFeed,
    settings: Option<Arc<Settings>>,
}

impl EngagementGate {
    pub fn new(pool: DbPool) -> Self {
        let feed = ActivityFeed::new(pool.clone());
        Self {
            pool,
            feed,
            settings: None,
        }
    }

    /// Gate pinned to fixed settings. The gate's feed validates against the
    /// same settings.
    pub fn with_settings(pool: DbPool, settings: Settings) -> Self {
        let settings = Arc::new(settings);
        Self {
            feed: ActivityFeed::with_settings(pool.clone(), settings.clone()),
            pool,
            settings: Some(settings),
        }
    }

    fn settings(&self) -> Arc<Settings> {
        self.settings.clone().unwrap_or_else(settings)
    }

    pub fn feed(&self) -> &ActivityFeed {
        &self.feed
    }

    pub fn try_vote(&self, user_id: &str, listing_id: &str, today: NaiveDate) -> Result<VoteOutcome> {
        let s = self.settings();
        ensure_id("user_id", user_id, s.engagement.max_id_length)?;
        ensure_id("listing_id", listing_id, s.engagement.max_id_length)?;

        let day = format_day(today);
        let now = Utc::now();
        let (outcome, kind) = retry_once("vote", s.engagement.retry_backoff_ms, || {
            self.cast_vote(user_id, listing_id, &day, now)
        })?;

        if !outcome.accepted {
            logs::log_vote_rejected(user_id, listing_id, &day);
            return Ok(outcome);
        }

        logs::log_vote_accepted(user_id, listing_id, outcome.vote_count);
        self.record_activity(
            NewActivity::new(user_id, ActivityType::Vote, kind, listing_id, now)
                .with_metadata(json!({ "day": day, "vote_count": outcome.vote_count })),
        );
        Ok(outcome)
    }

    fn cast_vote(
        &self,
        user_id: &str,
        listing_id: &str,
        day: &str,
        now: DateTime<Utc>,
    ) -> Result<(VoteOutcome, String)> {
        let mut conn = self.pool.get()?;
        conn.immediate_transaction(|conn| {
            let (kind, current) = listings::table
                .find(listing_id)
                .select((listings::kind, listings::vote_count))
                .first::<(String, i64)>(conn)
                .optional()?
                .ok_or_else(|| Error::NotFound(format!("listing {listing_id}")))?;

            let inserted = diesel::insert_or_ignore_into(votes::table)
                .values(&NewVote {
                    user_id,
                    listing_id,
                    day,
                    created_at: now.timestamp(),
                })
                .execute(conn)?;

            if inserted == 0 {
                let outcome = VoteOutcome {
                    accepted: false,
                    vote_count: current,
                };
                return Ok((outcome, kind));
            }

            let vote_count = diesel::update(listings::table.find(listing_id))
                .set(listings::vote_count.eq(listings::vote_count + 1))
                .returning(listings::vote_count)
                .get_result::<i64>(conn)?;

            let outcome = VoteOutcome {
                accepted: true,
                vote_count,
            };
            Ok((outcome, kind))
        })
    }

    pub fn try_bump(&self, listing_id: &str, tier: Tier, now: DateTime<Utc>) -> Result<BumpOutcome> {
        self.bump(None, listing_id, tier, now)
    }

    /// Like [`try_bump`](Self::try_bump), attributing the activity record to
    /// the member who pressed bump.
    pub fn try_bump_as(
        &self,
        user_id: &str,
        listing_id: &str,
        tier: Tier,
        now: DateTime<Utc>,
    ) -> Result<BumpOutcome> {
        self.bump(Some(user_id), listing_id, tier, now)
    }

    fn bump(
        &self,
        actor: Option<&str>,
        listing_id: &str,
        tier: Tier,
        now: DateTime<Utc>,
    ) -> Result<BumpOutcome> {
        let s = self.settings();
        if let Some(user_id) = actor {
            ensure_id("user_id", user_id, s.engagement.max_id_length)?;
        }
        ensure_id("listing_id", listing_id, s.engagement.max_id_length)?;

        let (outcome, kind) = retry_once("bump", s.engagement.retry_backoff_ms, || {
            self.apply_bump(listing_id, tier, now, &s)
        })?;

        if !outcome.accepted {
            logs::log_bump_rejected(listing_id, outcome.next_eligible_at);
            return Ok(outcome);
        }

        logs::log_bump_accepted(listing_id, tier, outcome.next_eligible_at);
        let user_id = actor.unwrap_or("system");
        self.record_activity(
            NewActivity::new(user_id, ActivityType::Bump, kind, listing_id, now).with_metadata(
                json!({ "tier": tier.to_string(), "weight": tier.bump_weight(&s.engagement) }),
            ),
        );
        Ok(outcome)
    }

    fn apply_bump(
        &self,
        listing_id: &str,
        tier: Tier,
        now: DateTime<Utc>,
        s: &Settings,
    ) -> Result<(BumpOutcome, String)> {
        let cooldown = tier.cooldown(&s.engagement);
        let eligible_before = now.timestamp() - cooldown.num_seconds();
        let weight = tier.bump_weight(&s.engagement);

        let mut conn = self.pool.get()?;

        let bumped = diesel::update(
            listings::table.find(listing_id).filter(
                listings::last_bumped_at
                    .is_null()
                    .or(listings::last_bumped_at.le(eligible_before)),
            ),
        )
        .set((
            listings::last_bumped_at.eq(now.timestamp()),
            listings::bump_count.eq(listings::bump_count + weight),
        ))
        .returning(listings::kind)
        .get_result::<String>(&mut conn)
        .optional()?;

        if let Some(kind) = bumped {
            let outcome = BumpOutcome {
                accepted: true,
                next_eligible_at: now + cooldown,
            };
            return Ok((outcome, kind));
        }

        let (kind, last_bumped_at) = listings::table
            .find(listing_id)
            .select((listings::kind, listings::last_bumped_at))
            .first::<(String, Option<i64>)>(&mut conn)
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("listing {listing_id}")))?;

        let next_eligible_at = last_bumped_at
            .map(|at| to_datetime(at) + cooldown)
            .unwrap_or(now);
        let outcome = BumpOutcome {
            accepted: false,
            next_eligible_at,
        };
        Ok((outcome, kind))
    }

    /// Counts a listing page view. Views only feed trending growth and are
    /// not written to the activity feed.
    pub fn record_view(&self, listing_id: &str) -> Result<i64> {
        let s = self.settings();
        ensure_id("listing_id", listing_id, s.engagement.max_id_length)?;

        retry_once("view", s.engagement.retry_backoff_ms, || {
            let mut conn = self.pool.get()?;
            diesel::update(listings::table.find(listing_id))
                .set(listings::view_count.eq(listings::view_count + 1))
                .returning(listings::view_count)
                .get_result::<i64>(&mut conn)
                .optional()?
                .ok_or_else(|| Error::NotFound(format!("listing {listing_id}")))
        })
    }

    fn record_activity(&self, activity: NewActivity) {
        if let Err(e) = self.feed.append(&activity) {
            logs::log_activity_append_failed(&activity.activity_type, &activity.target_id, &e);
        }
    }
}
