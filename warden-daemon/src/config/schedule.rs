//! Cron schedules.
//!
//! The grammar itself belongs to the `cron` crate; this wrapper only exposes
//! parsing and "next instant after".

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A parsed cron expression.
#[derive(Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: ::cron::Schedule,
}

impl CronSchedule {
    /// Parse a 5-field (`min hour dom month dow`) or 6/7-field (with seconds,
    /// optionally year) expression. 5-field expressions fire at second zero.
    pub fn parse(expression: &str) -> std::result::Result<Self, String> {
        let expression = expression.trim();
        let fields = expression.split_whitespace().count();
        let normalized = match fields {
            5 => format!("0 {}", expression),
            6 | 7 => expression.to_string(),
            n => {
                return Err(format!(
                    "invalid cron expression `{}`: expected 5 to 7 fields, got {}",
                    expression, n
                ));
            }
        };
        let schedule = ::cron::Schedule::from_str(&normalized)
            .map_err(|e| format!("invalid cron expression `{}`: {}", expression, e))?;
        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }

    /// The first scheduled instant strictly after `from`.
    pub fn next_after(&self, from: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(from).next()
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }
}

impl fmt::Debug for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronSchedule").field(&self.expression).finish()
    }
}

impl PartialEq for CronSchedule {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression
    }
}

impl Serialize for CronSchedule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.expression)
    }
}

impl<'de> Deserialize<'de> for CronSchedule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        CronSchedule::parse(&s).map_err(serde::de::Error::custom)
    }
}
