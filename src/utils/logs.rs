use chrono::{DateTime, NaiveDate, Utc};
use console::{measure_text_width, Style};

use crate::error::Error;
use crate::listing::Tier;
use crate::trending::{RecomputeSummary, TrendingMetric};

pub const TREE_BRANCH: char = '\u{251C}';
pub const TREE_END: char = '\u{2514}';
pub const TREE_HORIZ: char = '\u{2500}';
pub const TREE_VERT: char = '\u{2502}';

const TREE_PREFIX_WIDTH: usize = 4;
const VALUE_COLUMN: usize = 25;

fn tree_branch() -> String {
    dim()
        .apply_to(format!("{}{}{} ", TREE_BRANCH, TREE_HORIZ, TREE_HORIZ))
        .to_string()
}

fn tree_end() -> String {
    dim()
        .apply_to(format!("{}{}{} ", TREE_END, TREE_HORIZ, TREE_HORIZ))
        .to_string()
}

fn tree_indent() -> String {
    dim().apply_to(format!("{}   ", TREE_VERT)).to_string()
}

pub fn dim() -> Style {
    Style::new().dim()
}

fn blue() -> Style {
    Style::new().blue()
}

fn magenta() -> Style {
    Style::new().magenta()
}

fn cyan() -> Style {
    Style::new().cyan()
}

fn green() -> Style {
    Style::new().green()
}

fn red() -> Style {
    Style::new().red()
}

fn yellow() -> Style {
    Style::new().yellow()
}

fn bold() -> Style {
    Style::new().bold()
}

fn init_prefix() -> String {
    blue().apply_to("[INIT]").to_string()
}

fn trending_prefix() -> String {
    magenta().apply_to("[TRENDING]").to_string()
}

fn settings_prefix() -> String {
    yellow().apply_to("[SETTINGS]").to_string()
}

pub fn pad_label(label: &str, depth: usize) -> String {
    let prefix_width = depth * TREE_PREFIX_WIDTH;
    let target_width = VALUE_COLUMN.saturating_sub(prefix_width);
    let current_width = measure_text_width(label);
    if current_width < target_width {
        format!("{}{}", label, " ".repeat(target_width - current_width))
    } else {
        format!("{} ", label)
    }
}

pub fn format_signed(value: f64) -> String {
    let sign = if value >= 0.0 { "+" } else { "-" };
    format!("{}{:.2}", dim().apply_to(sign), value.abs())
}

pub fn log_init(database_url: &str, interval_secs: u64) {
    println!(
        "{} starting listing-promo on {}...",
        init_prefix(),
        cyan().apply_to(database_url),
    );
    println!(
        "{} trending recompute every {}s.",
        init_prefix(),
        bold().apply_to(interval_secs)
    );
}

pub fn log_db_ready(migrations: usize) {
    println!(
        "{} database ready ({} migrations applied).",
        init_prefix(),
        bold().apply_to(migrations)
    );
}

pub fn log_settings_reloaded() {
    println!("{} reloaded.", settings_prefix());
}

pub fn log_settings_rejected(error: &Error) {
    println!(
        "{} {} {}",
        settings_prefix(),
        red().apply_to("rejected:"),
        dim().apply_to(error)
    );
}

pub fn log_settings_watch_error(error: &str) {
    tracing::warn!("settings watcher error: {error}");
}

pub fn log_retry(operation: &str, error: &Error) {
    tracing::warn!("{operation} hit a transient store error, retrying once: {error}");
}

pub fn log_vote_accepted(user_id: &str, listing_id: &str, vote_count: i64) {
    tracing::debug!("vote from {user_id} on {listing_id} accepted ({vote_count} total)");
}

pub fn log_vote_rejected(user_id: &str, listing_id: &str, day: &str) {
    tracing::debug!("vote from {user_id} on {listing_id} rejected: already voted on {day}");
}

pub fn log_bump_accepted(listing_id: &str, tier: Tier, next_eligible_at: DateTime<Utc>) {
    tracing::debug!("{tier} bump on {listing_id} accepted, next at {next_eligible_at}");
}

pub fn log_bump_rejected(listing_id: &str, next_eligible_at: DateTime<Utc>) {
    tracing::debug!("bump on {listing_id} rejected until {next_eligible_at}");
}

pub fn log_activity_append_failed(activity_type: &str, target_id: &str, error: &Error) {
    tracing::warn!("could not record {activity_type} activity for {target_id}: {error}");
}

pub fn log_feed_pruned(pruned: usize) {
    if pruned > 0 {
        tracing::debug!("feed pruned {pruned} old entries");
    }
}

pub fn log_recompute_start(date: NaiveDate) {
    println!(
        "{} recomputing {}...",
        trending_prefix(),
        cyan().apply_to(date)
    );
}

pub fn log_listing_score_failed(listing_id: &str, error: &Error) {
    println!(
        "{}{} {}",
        tree_branch(),
        red().apply_to(format!("failed {listing_id}:")),
        dim().apply_to(error)
    );
}

pub fn log_recompute_failed(error: &Error) {
    println!(
        "{} {} {}",
        trending_prefix(),
        red().apply_to("failed:"),
        dim().apply_to(error)
    );
}

pub fn log_recompute_done(summary: &RecomputeSummary) {
    println!("{} done.", trending_prefix());
    println!(
        "{}{} {}",
        tree_branch(),
        pad_label("scored", 1),
        bold().apply_to(summary.scored)
    );
    println!(
        "{}{} {}",
        tree_branch(),
        pad_label("skipped", 1),
        dim().apply_to(summary.skipped)
    );
    if summary.frozen > 0 {
        println!(
            "{}{} {}",
            tree_branch(),
            pad_label("frozen", 1),
            dim().apply_to(summary.frozen)
        );
    }
    let error_style = if summary.errors > 0 { red() } else { dim() };
    println!(
        "{}{} {}",
        tree_end(),
        pad_label("errors", 1),
        error_style.apply_to(summary.errors)
    );
}

pub fn print_trending_report(date: NaiveDate, metrics: &[TrendingMetric]) {
    let mut lines: Vec<String> = Vec::new();

    lines.push(format!(
        "{} {}",
        magenta().apply_to(bold().apply_to("[TRENDING REPORT]")),
        dim().apply_to(date)
    ));

    if metrics.is_empty() {
        lines.push(format!("{}{}", tree_end(), dim().apply_to("no trending listings")));
        println!("{}\n", lines.join("\n"));
        return;
    }

    let count = metrics.len();
    for (rank, metric) in metrics.iter().enumerate() {
        let last = rank == count - 1;
        let (branch, indent) = if last {
            (tree_end(), "    ".to_string())
        } else {
            (tree_branch(), tree_indent())
        };

        lines.push(format!(
            "{}{} {}",
            branch,
            pad_label(&format!("#{} {}", rank + 1, metric.listing_id), 1),
            green().apply_to(format_signed(metric.trending_score))
        ));
        lines.push(format!(
            "{}{}{}{}",
            indent,
            tree_branch(),
            pad_label("velocity", 2),
            format_signed(metric.growth_velocity)
        ));
        lines.push(format!(
            "{}{}{}{}",
            indent,
            tree_branch(),
            pad_label("engagement", 2),
            format_signed(metric.engagement_score)
        ));
        lines.push(format!(
            "{}{}{}{}",
            indent,
            tree_end(),
            pad_label("growth", 2),
            dim().apply_to(format!(
                "{} members, {} votes, {} views",
                metric.member_growth, metric.vote_growth, metric.view_growth
            ))
        ));
    }

    println!("{}\n", lines.join("\n"));
}

pub fn log_generic_error(prefix: &str, error: &str) {
    eprintln!("{} {}", red().apply_to(prefix), error);
}
