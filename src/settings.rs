use crate::error::{Error, Result};
use crate::utils::logs;
use arc_swap::ArcSwap;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::{mpsc, Arc, OnceLock};
use std::thread;

const DEFAULT_PATH: &str = "settings.default.ron";
const OVERRIDE_PATH: &str = "settings.ron";

static SETTINGS: OnceLock<ArcSwap<Settings>> = OnceLock::new();

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub engagement: Engagement,
    pub trending: Trending,
    pub scheduler: Scheduler,
    pub store: Store,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Engagement {
    pub cooldown_hours: TierCooldowns,
    pub bump_weights: BumpWeights,
    pub retry_backoff_ms: u64,
    pub max_id_length: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierCooldowns {
    pub free: i64,
    pub gold: i64,
    pub platinum: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BumpWeights {
    pub free: f64,
    pub gold: f64,
    pub platinum: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trending {
    pub growth: GrowthWeights,
    pub engagement: EngagementWeights,
    pub velocity_weight: f64,
    pub engagement_weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowthWeights {
    pub member: f64,
    pub vote: f64,
    pub view: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementWeights {
    pub vote: f64,
    pub view: f64,
    pub scale: f64,
    pub size_exponent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scheduler {
    pub interval_secs: u64,
    pub run_on_startup: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Store {
    pub pool_size: u32,
    pub busy_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            engagement: Engagement {
                cooldown_hours: TierCooldowns {
                    free: 6,
                    gold: 3,
                    platinum: 2,
                },
                bump_weights: BumpWeights {
                    free: 1.0,
                    gold: 1.5,
                    platinum: 2.0,
                },
                retry_backoff_ms: 50,
                max_id_length: 64,
            },
            trending: Trending {
                growth: GrowthWeights {
                    member: 0.4,
                    vote: 0.35,
                    view: 0.25,
                },
                engagement: EngagementWeights {
                    vote: 3.0,
                    view: 1.0,
                    scale: 100.0,
                    size_exponent: 0.5,
                },
                velocity_weight: 0.6,
                engagement_weight: 0.4,
            },
            scheduler: Scheduler {
                interval_secs: 3600,
                run_on_startup: true,
            },
            store: Store {
                pool_size: 5,
                busy_timeout_ms: 2000,
            },
        }
    }
}

impl Settings {
    pub fn load() -> Arc<Settings> {
        cell().load_full()
    }

    fn load_from_files() -> Result<Settings> {
        let mut settings = read_file(Path::new(DEFAULT_PATH))?.unwrap_or_default();

        if let Some(overrides) = read_file(Path::new(OVERRIDE_PATH))? {
            settings = overrides;
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let cooldowns = &self.engagement.cooldown_hours;
        for (tier, hours) in [
            ("free", cooldowns.free),
            ("gold", cooldowns.gold),
            ("platinum", cooldowns.platinum),
        ] {
            if hours <= 0 {
                return Err(Error::Validation(format!(
                    "cooldown for {tier} must be positive"
                )));
            }
        }

        let bumps = &self.engagement.bump_weights;
        let t = &self.trending;
        let non_negative = [
            ("bump_weights.free", bumps.free),
            ("bump_weights.gold", bumps.gold),
            ("bump_weights.platinum", bumps.platinum),
            ("growth.member", t.growth.member),
            ("growth.vote", t.growth.vote),
            ("growth.view", t.growth.view),
            ("engagement.vote", t.engagement.vote),
            ("engagement.view", t.engagement.view),
            ("engagement.scale", t.engagement.scale),
            ("engagement.size_exponent", t.engagement.size_exponent),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::Validation(format!(
                    "{name} must be a non-negative number"
                )));
            }
        }

        for (name, value) in [
            ("velocity_weight", t.velocity_weight),
            ("engagement_weight", t.engagement_weight),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(Error::Validation(format!("{name} must be positive")));
            }
        }

        if self.store.pool_size == 0 {
            return Err(Error::Validation("pool_size must be positive".into()));
        }

        Ok(())
    }
}

fn read_file(path: &Path) -> Result<Option<Settings>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)
        .map_err(|e| Error::Validation(format!("{}: {e}", path.display())))?;
    ron::from_str(&content)
        .map(Some)
        .map_err(|e| Error::Validation(format!("{}: {e}", path.display())))
}

fn cell() -> &'static ArcSwap<Settings> {
    SETTINGS.get_or_init(|| {
        let settings = Settings::load_from_files().unwrap_or_else(|e| {
            logs::log_settings_rejected(&e);
            Settings::default()
        });
        ArcSwap::from_pointee(settings)
    })
}

pub fn settings() -> Arc<Settings> {
    Settings::load()
}

/// Re-reads the settings files. An invalid file leaves the current settings
/// in place.
pub fn reload() -> Result<()> {
    let settings = Settings::load_from_files()?;
    cell().store(Arc::new(settings));
    Ok(())
}

/// Watches the working directory and reloads settings whenever one of the
/// settings files changes. The returned watcher must be kept alive.
pub fn watch_settings() -> notify::Result<RecommendedWatcher> {
    let (tx, rx) = mpsc::channel::<notify::Result<notify::Event>>();
    let mut watcher = notify::recommended_watcher(tx)?;
    watcher.watch(Path::new("."), RecursiveMode::NonRecursive)?;

    thread::spawn(move || {
        for event in rx {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    logs::log_settings_watch_error(&e.to_string());
                    continue;
                }
            };

            if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                continue;
            }
            let touches_settings = event.paths.iter().any(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n == DEFAULT_PATH || n == OVERRIDE_PATH)
            });
            if !touches_settings {
                continue;
            }

            match reload() {
                Ok(()) => logs::log_settings_reloaded(),
                Err(e) => logs::log_settings_rejected(&e),
            }
        }
    });

    Ok(watcher)
}
