use crate::db::{to_datetime, DbPool};
use crate::error::{ensure_id, Result};
use crate::schema::activities;
use crate::settings::{settings, Settings};
use crate::utils::logs;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use diesel::prelude::*;
use strum::{Display, EnumString};

/// Maximum number of activity records kept in the public feed.
pub const FEED_CAPACITY: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ActivityType {
    Vote,
    Bump,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq)]
#[diesel(table_name = activities)]
pub struct ActivityRecord {
    pub id: i64,
    pub user_id: String,
    pub activity_type: String,
    pub target_type: String,
    pub target_id: String,
    pub metadata: String,
    pub created_at: i64,
    pub is_public: bool,
}

impl ActivityRecord {
    pub fn created(&self) -> DateTime<Utc> {
        to_datetime(self.created_at)
    }

    pub fn metadata_json(&self) -> serde_json::Value {
        serde_json::from_str(&self.metadata).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = activities)]
pub struct NewActivity {
    pub user_id: String,
    pub activity_type: String,
    pub target_type: String,
    pub target_id: String,
    pub metadata: String,
    pub created_at: i64,
    pub is_public: bool,
}

impl NewActivity {
    pub fn new(
        user_id: &str,
        activity_type: impl ToString,
        target_type: impl ToString,
        target_id: &str,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            activity_type: activity_type.to_string(),
            target_type: target_type.to_string(),
            target_id: target_id.to_string(),
            metadata: "{}".to_string(),
            created_at: at.timestamp(),
            is_public: true,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata.to_string();
        self
    }

    pub fn private(mut self) -> Self {
        self.is_public = false;
        self
    }
}

#[derive(Clone)]
pub struct ActivityFeed {
    pool: DbPool,
    settings: Option<Arc<Settings>>,
}

impl ActivityFeed {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            settings: None,
        }
    }

    pub fn with_settings(pool: DbPool, settings: Arc<Settings>) -> Self {
        Self {
            pool,
            settings: Some(settings),
        }
    }

    fn max_id_length(&self) -> usize {
        self.settings
            .clone()
            .unwrap_or_else(settings)
            .engagement
            .max_id_length
    }

    /// Inserts the record and trims the feed back to [`FEED_CAPACITY`] inside
    /// one write transaction, so the prune sees the count that includes
    /// this insert and nothing newer.
    pub fn append(&self, activity: &NewActivity) -> Result<ActivityRecord> {
        let max_len = self.max_id_length();
        ensure_id("user_id", &activity.user_id, max_len)?;
        ensure_id("target_id", &activity.target_id, max_len)?;

        let mut conn = self.pool.get()?;
        let (record, pruned) = conn.immediate_transaction(|conn| {
            let record = diesel::insert_into(activities::table)
                .values(activity)
                .returning(ActivityRecord::as_returning())
                .get_result(conn)?;
            let pruned = prune_excess(conn, FEED_CAPACITY)?;
            Ok::<_, crate::error::Error>((record, pruned))
        })?;

        logs::log_feed_pruned(pruned);
        Ok(record)
    }

    /// Most recent records first. Every call is an independent query.
    pub fn recent(&self, limit: usize) -> Result<Vec<ActivityRecord>> {
        let mut conn = self.pool.get()?;
        let records = activities::table
            .order((activities::created_at.desc(), activities::id.desc()))
            .limit(clamp_limit(limit))
            .select(ActivityRecord::as_select())
            .load(&mut conn)?;
        Ok(records)
    }

    pub fn recent_public(&self, limit: usize) -> Result<Vec<ActivityRecord>> {
        let mut conn = self.pool.get()?;
        let records = activities::table
            .filter(activities::is_public.eq(true))
            .order((activities::created_at.desc(), activities::id.desc()))
            .limit(clamp_limit(limit))
            .select(ActivityRecord::as_select())
            .load(&mut conn)?;
        Ok(records)
    }

    pub fn count(&self) -> Result<i64> {
        let mut conn = self.pool.get()?;
        Ok(activities::table.count().get_result(&mut conn)?)
    }
}

fn clamp_limit(limit: usize) -> i64 {
    limit.min(FEED_CAPACITY as usize) as i64
}

fn prune_excess(conn: &mut SqliteConnection, capacity: i64) -> QueryResult<usize> {
    let count: i64 = activities::table.count().get_result(conn)?;
    if count <= capacity {
        return Ok(0);
    }

    let excess = count - capacity;
    let ids_to_delete: Vec<i64> = activities::table
        .order((activities::created_at.asc(), activities::id.asc()))
        .limit(excess)
        .select(activities::id)
        .load(conn)?;

    diesel::delete(activities::table.filter(activities::id.eq_any(ids_to_delete))).execute(conn)
}
