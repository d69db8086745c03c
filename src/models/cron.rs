//! Cron job types (`cron.list`, `cron.runs`).
//!
//! Every field is optional and everything unmodelled lands in `extra`, so a
//! payload deserialized here serializes back to the same JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// When a job fires.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CronSchedule {
    /// Schedule kind (`cron`, `every`, `at`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Cron expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<String>,
    /// IANA time zone the expression is evaluated in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tz: Option<String>,
    /// Interval for `every` schedules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub every_ms: Option<Number>,
    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CronSchedule {
    /// Short human form: `"<expr> (<tz>)"`, `"every 5m"`, or the kind.
    #[must_use]
    pub fn describe(&self) -> String {
        match (&self.expr, &self.tz, &self.every_ms) {
            (Some(expr), Some(tz), _) if !tz.is_empty() => format!("{expr} ({tz})"),
            (Some(expr), _, _) => expr.clone(),
            (None, _, Some(every)) => every
                .as_u64()
                .map_or_else(|| format!("every {every}ms"), describe_interval),
            _ => self.kind.clone().unwrap_or_else(|| "-".to_owned()),
        }
    }
}

fn describe_interval(ms: u64) -> String {
    const MINUTE: u64 = 60_000;
    const HOUR: u64 = 60 * MINUTE;
    if ms >= HOUR && ms % HOUR == 0 {
        format!("every {}h", ms / HOUR)
    } else if ms >= MINUTE && ms % MINUTE == 0 {
        format!("every {}m", ms / MINUTE)
    } else if ms % 1000 == 0 {
        format!("every {}s", ms / 1000)
    } else {
        format!("every {ms}ms")
    }
}

/// What a job sends to its agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CronPayload {
    /// Payload kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Fields not modelled above (`message`, `text`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Where a job's output goes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CronDelivery {
    /// Delivery mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Target channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Runtime state the gateway tracks per job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CronJobState {
    /// Next scheduled run (epoch ms).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at_ms: Option<Number>,
    /// Last run start (epoch ms).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at_ms: Option<Number>,
    /// `ok`, `error` or `timeout`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_status: Option<String>,
    /// Fields not modelled above (durations, error text, counters).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CronJobState {
    /// Next scheduled run as a timestamp.
    #[must_use]
    pub fn next_run_at(&self) -> Option<DateTime<Utc>> {
        self.next_run_at_ms.as_ref().and_then(epoch_ms)
    }

    /// Last run start as a timestamp.
    #[must_use]
    pub fn last_run_at(&self) -> Option<DateTime<Utc>> {
        self.last_run_at_ms.as_ref().and_then(epoch_ms)
    }
}

fn epoch_ms(ms: &Number) -> Option<DateTime<Utc>> {
    ms.as_i64().and_then(DateTime::from_timestamp_millis)
}

/// A scheduled job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CronJob {
    /// Job id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Whether the job is scheduled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Schedule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<CronSchedule>,
    /// Message payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<CronPayload>,
    /// Output delivery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery: Option<CronDelivery>,
    /// Runtime state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<CronJobState>,
    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CronJob {
    /// Name, falling back to the id.
    #[must_use]
    pub fn label(&self) -> &str {
        self.name
            .as_deref()
            .or(self.id.as_deref())
            .unwrap_or("(unnamed)")
    }
}

/// `cron.list` payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CronListResponse {
    /// All jobs.
    #[serde(default)]
    pub jobs: Vec<CronJob>,
    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One historical run of a job (`cron.runs`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CronRunEntry {
    /// Run id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Start time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    /// Outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Duration in ms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<Number>,
    /// Error text, if failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Coarse human distance between `then` and `now`: `just now`, `5m ago`,
/// `in 3h`, `2d ago`; a calendar date past a week.
#[must_use]
pub fn relative_time(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = now.signed_duration_since(then);
    let future = delta.num_milliseconds() < 0;
    let abs = delta.abs();

    let (amount, unit) = if abs.num_minutes() < 1 {
        return if future { "soon".into() } else { "just now".into() };
    } else if abs.num_minutes() < 60 {
        (abs.num_minutes(), "m")
    } else if abs.num_hours() < 24 {
        (abs.num_hours(), "h")
    } else if abs.num_days() < 7 {
        (abs.num_days(), "d")
    } else {
        return then.format("%b %-d").to_string();
    };

    if future {
        format!("in {amount}{unit}")
    } else {
        format!("{amount}{unit} ago")
    }
}
