//! Application-level configuration loading: engine timings, storage backend and quiz fixtures.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{DurationMilliSeconds, serde_as};
use tracing::{info, warn};
use uuid::Uuid;

use crate::dao::models::{QuestionEntity, QuestionOptionEntity};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "QUIZ_LIVE_CONFIG_PATH";
const DEFAULT_BASE_POINTS: i64 = 100;

/// Immutable runtime configuration shared across the application.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Durations of the timed phases.
    pub timing: TimingConfig,
    /// Storage backend selection.
    pub store: StoreConfig,
    /// Shuffle the question order when a session starts.
    pub shuffle_questions: bool,
    /// Quizzes seeded into the store at startup.
    pub quizzes: Vec<QuizFixture>,
}

/// Durations driving the session timers, expressed in abstract time units.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Length of one time unit. Question time limits are counted in units too.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "time_unit_ms")]
    pub time_unit: Duration,
    /// Pre-quiz countdown.
    pub countdown_units: u32,
    /// Team-mode thinking time before answers open.
    pub thinking_units: u32,
    /// Pause between "everyone answered" and the results.
    pub grace_units: u32,
    /// Poll fallback interval of the sync layer.
    pub poll_units: u32,
    /// Upper bound for one transition, store round-trips included.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "transition_timeout_ms")]
    pub transition_timeout: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            time_unit: Duration::from_millis(1000),
            countdown_units: 5,
            thinking_units: 5,
            grace_units: 2,
            poll_units: 2,
            transition_timeout: Duration::from_millis(5000),
        }
    }
}

impl TimingConfig {
    /// Convert a number of time units into a duration.
    pub fn units(&self, units: u32) -> Duration {
        self.time_unit * units
    }

    /// Convert a number of time units into milliseconds.
    pub fn units_ms(&self, units: u32) -> u64 {
        u64::try_from(self.units(units).as_millis()).unwrap_or(u64::MAX)
    }

    /// Pre-quiz countdown duration.
    pub fn countdown(&self) -> Duration {
        self.units(self.countdown_units)
    }

    /// Team-mode thinking time.
    pub fn thinking(&self) -> Duration {
        self.units(self.thinking_units)
    }

    /// Pause before results once everyone answered.
    pub fn grace(&self) -> Duration {
        self.units(self.grace_units)
    }

    /// Interval of the sync layer's fallback poll.
    pub fn poll_interval(&self) -> Duration {
        self.units(self.poll_units)
    }
}

/// Storage backend selected at startup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Rows kept in process memory.
    #[default]
    Memory,
    /// MongoDB backend.
    Mongo {
        /// Connection string.
        uri: String,
        /// Database name, defaults to `quiz_live`.
        #[serde(default)]
        database: Option<String>,
    },
}

/// Quiz content fed to the read-only question catalogue.
#[derive(Debug, Clone, Deserialize)]
pub struct QuizFixture {
    /// Quiz identifier referenced by new sessions.
    pub id: Uuid,
    /// Questions in play order.
    pub questions: Vec<QuestionFixture>,
}

/// One question of a [`QuizFixture`].
#[derive(Debug, Clone, Deserialize)]
pub struct QuestionFixture {
    /// Stable identifier, generated when omitted.
    #[serde(default)]
    pub id: Option<Uuid>,
    /// Question text.
    pub text: String,
    /// Optional image or audio shown with the question.
    #[serde(default)]
    pub media_url: Option<String>,
    /// Options in display order.
    pub options: Vec<OptionFixture>,
    /// Answer window in time units.
    pub time_limit: u32,
    /// Points for an instant correct answer.
    #[serde(default = "default_base_points")]
    pub base_points: i64,
}

/// One option of a [`QuestionFixture`].
#[derive(Debug, Clone, Deserialize)]
pub struct OptionFixture {
    /// Option text.
    pub text: String,
    /// Whether picking this option scores.
    #[serde(default)]
    pub correct: bool,
}

fn default_base_points() -> i64 {
    DEFAULT_BASE_POINTS
}

impl QuizFixture {
    /// Materialise the fixture into question rows ordered by position.
    pub fn to_questions(&self) -> Vec<QuestionEntity> {
        self.questions
            .iter()
            .enumerate()
            .map(|(position, question)| QuestionEntity {
                id: question.id.unwrap_or_else(Uuid::new_v4),
                quiz_id: self.id,
                position: u32::try_from(position).unwrap_or(u32::MAX),
                text: question.text.clone(),
                media_url: question.media_url.clone(),
                options: question
                    .options
                    .iter()
                    .map(|option| QuestionOptionEntity {
                        text: option.text.clone(),
                        is_correct: option.correct,
                    })
                    .collect(),
                time_limit_secs: question.time_limit,
                base_points: question.base_points,
            })
            .collect()
    }
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let config = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<AppConfig>(&contents) {
                Ok(config) => {
                    info!(
                        path = %path.display(),
                        quizzes = config.quizzes.len(),
                        "loaded configuration"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        };

        config.with_env_overrides()
    }

    /// `MONGO_URI` (and optionally `MONGO_DB`) switch the backend to MongoDB.
    fn with_env_overrides(mut self) -> Self {
        if let Some(uri) = env::var("MONGO_URI").ok().filter(|uri| !uri.is_empty()) {
            let database = env::var("MONGO_DB").ok().filter(|db| !db.is_empty());
            self.store = StoreConfig::Mongo { uri, database };
        }
        self
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
