use chrono::{NaiveDate, Utc};
use listing_promo::db::{establish_pool, run_migrations, DAY_FORMAT};
use listing_promo::utils::{log_generic_error, print_trending_report};
use listing_promo::TrendingScorer;
use std::env;
use std::process;

const DEFAULT_LIMIT: usize = 10;

fn print_usage() {
    eprintln!("Usage: trending-report [date] [--limit|-n <count>] [--recompute|-r]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  [date]       UTC day to report, YYYY-MM-DD (default: today)");
    eprintln!("  --limit      Number of listings to show (default: {DEFAULT_LIMIT})");
    eprintln!("  --recompute  Recompute trending rows for the day before reporting");
}

struct Args {
    date: NaiveDate,
    limit: usize,
    recompute: bool,
}

fn parse_args(args: &[String]) -> Option<Args> {
    let mut date = None;
    let mut limit = DEFAULT_LIMIT;
    let mut recompute = false;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--recompute" | "-r" => recompute = true,
            "--limit" | "-n" => limit = iter.next()?.parse().ok()?,
            "--help" | "-h" => return None,
            other => date = Some(NaiveDate::parse_from_str(other, DAY_FORMAT).ok()?),
        }
    }

    Some(Args {
        date: date.unwrap_or_else(|| Utc::now().date_naive()),
        limit,
        recompute,
    })
}

fn main() {
    dotenvy::dotenv().ok();

    let raw: Vec<String> = env::args().skip(1).collect();
    let Some(args) = parse_args(&raw) else {
        print_usage();
        process::exit(1);
    };

    let database_url = env::var("DATABASE_URL").unwrap_or_else(|_| "promo.db".to_string());
    let pool = match establish_pool(&database_url) {
        Ok(pool) => pool,
        Err(e) => {
            log_generic_error("[ERROR]", &format!("could not open {database_url}: {e}"));
            process::exit(1);
        }
    };
    if let Err(e) = run_migrations(&pool) {
        log_generic_error("[ERROR]", &e.to_string());
        process::exit(1);
    }

    let scorer = TrendingScorer::new(pool);

    if args.recompute {
        if let Err(e) = scorer.recompute_all(args.date) {
            log_generic_error("[ERROR]", &format!("recompute failed: {e}"));
            process::exit(1);
        }
    }

    match scorer.top_trending(args.date, args.limit) {
        Ok(metrics) => print_trending_report(args.date, &metrics),
        Err(e) => {
            log_generic_error("[ERROR]", &e.to_string());
            process::exit(1);
        }
    }
}
