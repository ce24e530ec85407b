//! Five-field cron expressions: minute, hour, day of month, month, day of week.
//!
//! Parsing and fire-time search are done by `croner`. Expressions are
//! evaluated in UTC. Day of week runs 0-6 from Sunday, 7 is also Sunday.
//! When both day fields are restricted a day matching either one fires.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use croner::Cron;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    cron: Cron,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self> {
        let fields = expression.split_whitespace().count();
        if fields != 5 {
            return Err(anyhow!(
                "Cron expression '{}' must have 5 fields, found {}",
                expression,
                fields
            ));
        }
        let cron = Cron::new(expression)
            .parse()
            .map_err(|e| anyhow!("Invalid cron expression '{}': {}", expression, e))?;
        Ok(Self {
            expression: expression.to_string(),
            cron,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `after`. `None` when the expression
    /// never fires, e.g. February 30th.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.cron.find_next_occurrence(&after, false).ok()
    }
}

impl FromStr for CronSchedule {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.expression)
    }
}
