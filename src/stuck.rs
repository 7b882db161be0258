//! Online productivity analyzer for the running agent.
//!
//! Keeps a sliding window of recent action outcomes and evaluates a fixed
//! trigger ladder every few steps. The first trigger that fires produces a
//! [`StuckReport`], which pauses the agent and solicits human guidance.

use crate::protocol::StuckReason;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::VecDeque;
use std::time::Duration;

/// Thresholds for the trigger ladder. All of them are configuration.
#[derive(Debug, Clone)]
pub struct StuckConfig {
    /// Sliding window size, in records.
    pub window: usize,
    /// How many trailing records the repetition/failure triggers examine.
    pub repeat_n: usize,
    /// Evaluate every this-many steps.
    pub check_every: u32,
    /// A single step longer than this trips `STEP_TIMEOUT`.
    pub step_timeout: Duration,
    /// No success within this long trips `NO_PROGRESS`.
    pub no_progress_timeout: Duration,
    /// Minimum gap between two reports.
    pub cooldown: Duration,
    /// Normalized-name similarity at or above this counts as the same action.
    pub similarity_threshold: f64,
}

impl Default for StuckConfig {
    fn default() -> Self {
        Self {
            window: 10,
            repeat_n: 3,
            check_every: 3,
            step_timeout: Duration::from_secs(120),
            no_progress_timeout: Duration::from_secs(300),
            cooldown: Duration::from_secs(60),
            similarity_threshold: 0.7,
        }
    }
}

impl StuckConfig {
    /// Defaults overridden by `TASKPILOT_STUCK_*` environment variables.
    pub fn from_env() -> Self {
        fn var<T: std::str::FromStr>(name: &str) -> Option<T> {
            std::env::var(name).ok().and_then(|v| v.parse().ok())
        }

        let defaults = Self::default();
        Self {
            window: var("TASKPILOT_STUCK_WINDOW").unwrap_or(defaults.window),
            repeat_n: var("TASKPILOT_STUCK_REPEAT_N").unwrap_or(defaults.repeat_n),
            check_every: var("TASKPILOT_STUCK_CHECK_EVERY").unwrap_or(defaults.check_every),
            step_timeout: var("TASKPILOT_STUCK_STEP_TIMEOUT_SECS")
                .map_or(defaults.step_timeout, Duration::from_secs),
            no_progress_timeout: var("TASKPILOT_STUCK_NO_PROGRESS_SECS")
                .map_or(defaults.no_progress_timeout, Duration::from_secs),
            cooldown: var("TASKPILOT_STUCK_COOLDOWN_SECS")
                .map_or(defaults.cooldown, Duration::from_secs),
            similarity_threshold: var("TASKPILOT_STUCK_SIMILARITY")
                .unwrap_or(defaults.similarity_threshold),
        }
    }
}

/// One observation: the outcome of a single agent step.
#[derive(Debug, Clone)]
pub struct ActionRecord {
    pub action_name: String,
    pub timestamp: DateTime<Utc>,
    pub duration: Duration,
    pub success: bool,
    pub error_message: Option<String>,
    pub step_number: u32,
}

/// The detector's verdict, ready for both machine and human consumption.
#[derive(Debug, Clone)]
pub struct StuckReport {
    pub reason: StuckReason,
    pub attempted_actions: Vec<String>,
    pub duration_seconds: f64,
    pub suggestion: String,
    pub summary: String,
}

pub struct StuckDetector {
    config: StuckConfig,
    window: VecDeque<ActionRecord>,
    steps_seen: u32,
    task_started_at: DateTime<Utc>,
    last_success_at: Option<DateTime<Utc>>,
    last_report_at: Option<DateTime<Utc>>,
}

impl StuckDetector {
    pub fn new(config: StuckConfig) -> Self {
        Self {
            config,
            window: VecDeque::new(),
            steps_seen: 0,
            task_started_at: Utc::now(),
            last_success_at: None,
            last_report_at: None,
        }
    }

    /// Clear the window, timers and cooldown for a fresh task.
    pub fn reset(&mut self) {
        self.reset_at(Utc::now());
    }

    pub fn reset_at(&mut self, now: DateTime<Utc>) {
        self.window.clear();
        self.steps_seen = 0;
        self.task_started_at = now;
        self.last_success_at = None;
        self.last_report_at = None;
    }

    /// Record one step outcome; every `check_every` steps, evaluate.
    pub fn record(&mut self, record: ActionRecord) -> Option<StuckReport> {
        self.record_at(record, Utc::now())
    }

    pub fn record_at(
        &mut self,
        record: ActionRecord,
        now: DateTime<Utc>,
    ) -> Option<StuckReport> {
        if record.success {
            self.last_success_at = Some(record.timestamp);
        }
        if self.window.len() == self.config.window {
            self.window.pop_front();
        }
        self.window.push_back(record);
        self.steps_seen += 1;

        if self.steps_seen % self.config.check_every == 0 {
            self.evaluate_at(now)
        } else {
            None
        }
    }

    /// Timer-driven evaluation, used to catch stalls with no step traffic.
    pub fn evaluate(&mut self) -> Option<StuckReport> {
        self.evaluate_at(Utc::now())
    }

    pub fn evaluate_at(&mut self, now: DateTime<Utc>) -> Option<StuckReport> {
        if let Some(at) = self.last_report_at {
            let elapsed = now.signed_duration_since(at);
            if elapsed < chrono_duration(self.config.cooldown) {
                return None;
            }
        }
        let reason = self.diagnose(now)?;
        self.last_report_at = Some(now);
        Some(self.compose(reason, now))
    }

    fn diagnose(&self, now: DateTime<Utc>) -> Option<StuckReason> {
        let tail: Vec<&ActionRecord> = self
            .window
            .iter()
            .rev()
            .take(self.config.repeat_n)
            .collect();

        if tail.len() >= self.config.repeat_n && tail.iter().all(|r| !r.success) {
            let first = normalize_name(&tail[0].action_name);
            let repeating = tail.iter().all(|r| {
                name_similarity(&first, &normalize_name(&r.action_name))
                    >= self.config.similarity_threshold
            });
            if repeating {
                return Some(StuckReason::Repeating);
            }
            return Some(StuckReason::ConsecutiveFailures);
        }

        if let Some(last) = self.window.back() {
            if last.duration > self.config.step_timeout {
                return Some(StuckReason::StepTimeout);
            }
        }

        let anchor = self
            .last_success_at
            .map_or(self.task_started_at, |t| t.max(self.task_started_at));
        if now.signed_duration_since(anchor) > chrono_duration(self.config.no_progress_timeout) {
            return Some(StuckReason::NoProgress);
        }

        None
    }

    fn compose(&self, reason: StuckReason, now: DateTime<Utc>) -> StuckReport {
        let attempted_actions: Vec<String> = self
            .window
            .iter()
            .rev()
            .take(5)
            .rev()
            .map(|r| {
                let mark = if r.success { '\u{2713}' } else { '\u{2717}' };
                format!("{} {mark}", r.action_name)
            })
            .collect();

        let duration_seconds =
            now.signed_duration_since(self.task_started_at).num_milliseconds() as f64 / 1000.0;
        let suggestion = "What should it try differently?".to_string();

        let mut summary = String::new();
        summary.push_str("### Agent needs help\n\n");
        summary.push_str(&format!("**Reason:** {}\n", reason_phrase(reason)));
        summary.push_str(&format!("**Working for:** {duration_seconds:.0}s\n\n"));
        if !attempted_actions.is_empty() {
            summary.push_str("Recent actions:\n");
            for (i, action) in attempted_actions.iter().enumerate() {
                summary.push_str(&format!("{}. {action}\n", i + 1));
            }
            summary.push('\n');
        }
        summary.push_str(&suggestion);

        StuckReport {
            reason,
            attempted_actions,
            duration_seconds,
            suggestion,
            summary,
        }
    }
}

fn reason_phrase(reason: StuckReason) -> &'static str {
    match reason {
        StuckReason::Repeating => "repeating the same action without success",
        StuckReason::StepTimeout => "the current step is taking too long",
        StuckReason::NoProgress => "no successful step for a while",
        StuckReason::ConsecutiveFailures => "several consecutive actions failed",
        StuckReason::None => "not stuck",
    }
}

fn chrono_duration(d: Duration) -> ChronoDuration {
    ChronoDuration::from_std(d).unwrap_or_else(|_| ChronoDuration::seconds(i64::MAX / 1_000))
}

fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Dice coefficient over character bigrams; exact matches short-circuit to 1.
fn name_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let bigrams = |s: &str| -> Vec<(char, char)> {
        let chars: Vec<char> = s.chars().collect();
        chars.windows(2).map(|w| (w[0], w[1])).collect()
    };
    let (ba, bb) = (bigrams(a), bigrams(b));
    if ba.is_empty() || bb.is_empty() {
        return 0.0;
    }
    let mut remaining = bb.clone();
    let mut overlap = 0usize;
    for bg in &ba {
        if let Some(pos) = remaining.iter().position(|other| other == bg) {
            remaining.swap_remove(pos);
            overlap += 1;
        }
    }
    2.0 * overlap as f64 / (ba.len() + bb.len()) as f64
}
