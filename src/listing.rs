use crate::db::to_datetime;
use crate::error::{Error, Result};
use crate::schema::listings;
use crate::settings::Engagement;
use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Gold,
    Platinum,
}

impl Tier {
    pub fn cooldown(self, s: &Engagement) -> Duration {
        let hours = match self {
            Tier::Free => s.cooldown_hours.free,
            Tier::Gold => s.cooldown_hours.gold,
            Tier::Platinum => s.cooldown_hours.platinum,
        };
        Duration::hours(hours)
    }

    pub fn bump_weight(self, s: &Engagement) -> f64 {
        match self {
            Tier::Free => s.bump_weights.free,
            Tier::Gold => s.bump_weights.gold,
            Tier::Platinum => s.bump_weights.platinum,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ListingKind {
    Server,
    Bot,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq)]
#[diesel(table_name = listings)]
pub struct Listing {
    pub id: String,
    pub kind: String,
    pub name: String,
    pub owner_id: String,
    pub tier: String,
    pub member_count: i64,
    pub vote_count: i64,
    pub view_count: i64,
    pub bump_count: f64,
    pub last_bumped_at: Option<i64>,
    pub created_at: i64,
}

impl Listing {
    pub fn tier(&self) -> Result<Tier> {
        Tier::from_str(&self.tier)
            .map_err(|_| Error::Validation(format!("unknown tier '{}'", self.tier)))
    }

    pub fn kind(&self) -> Result<ListingKind> {
        ListingKind::from_str(&self.kind)
            .map_err(|_| Error::Validation(format!("unknown listing kind '{}'", self.kind)))
    }

    pub fn last_bumped(&self) -> Option<DateTime<Utc>> {
        self.last_bumped_at.map(to_datetime)
    }
}

#[derive(Debug, Clone)]
pub struct NewListing {
    pub id: String,
    pub kind: ListingKind,
    pub name: String,
    pub owner_id: String,
    pub tier: Tier,
}

#[derive(Insertable)]
#[diesel(table_name = listings)]
struct ListingRow<'a> {
    id: &'a str,
    kind: String,
    name: &'a str,
    owner_id: &'a str,
    tier: String,
    created_at: i64,
}

pub fn register_listing(
    conn: &mut SqliteConnection,
    listing: &NewListing,
    now: DateTime<Utc>,
) -> Result<Listing> {
    if listing.id.trim().is_empty() {
        return Err(Error::Validation("listing id must not be empty".into()));
    }

    let row = ListingRow {
        id: &listing.id,
        kind: listing.kind.to_string(),
        name: &listing.name,
        owner_id: &listing.owner_id,
        tier: listing.tier.to_string(),
        created_at: now.timestamp(),
    };

    let inserted = diesel::insert_or_ignore_into(listings::table)
        .values(&row)
        .execute(conn)?;
    if inserted == 0 {
        return Err(Error::Conflict {
            reason: format!("listing {} already registered", listing.id),
            next_eligible_at: None,
        });
    }

    get_listing(conn, &listing.id)
}

pub fn get_listing(conn: &mut SqliteConnection, listing_id: &str) -> Result<Listing> {
    listings::table
        .find(listing_id)
        .select(Listing::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| Error::NotFound(format!("listing {listing_id}")))
}

/// Applies a member count observed by the Discord sync.
pub fn set_member_count(
    conn: &mut SqliteConnection,
    listing_id: &str,
    member_count: i64,
) -> Result<()> {
    if member_count < 0 {
        return Err(Error::Validation("member_count must not be negative".into()));
    }
    let updated = diesel::update(listings::table.find(listing_id))
        .set(listings::member_count.eq(member_count))
        .execute(conn)?;
    if updated == 0 {
        return Err(Error::NotFound(format!("listing {listing_id}")));
    }
    Ok(())
}

pub fn set_tier(conn: &mut SqliteConnection, listing_id: &str, tier: Tier) -> Result<()> {
    let updated = diesel::update(listings::table.find(listing_id))
        .set(listings::tier.eq(tier.to_string()))
        .execute(conn)?;
    if updated == 0 {
        return Err(Error::NotFound(format!("listing {listing_id}")));
    }
    Ok(())
}
