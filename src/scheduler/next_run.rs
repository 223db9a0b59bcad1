use std::str::FromStr;
use std::sync::Arc;

use cron::Schedule;
use log::debug;
use sqlx::types::chrono::{DateTime, Utc};

use crate::catalog::Catalog;
use crate::database::ScheduleDescriptor;
use crate::error::{Error, Result};

const DAY_NAMES: [&str; 8] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

fn day_name(field: &str, expression: &str) -> Result<&'static str> {
    if let Ok(day) = field.parse::<usize>() {
        return DAY_NAMES
            .get(day)
            .copied()
            .ok_or_else(|| Error::validation(expression, format!("day of week {} is out of range 0-7", day)));
    }
    Err(Error::validation(expression, format!("invalid day of week '{}'", field)))
}

/// Rewrites numeric days (0-7, Sunday = 0 or 7) as names, since the `cron`
/// crate counts Sunday as 1.
fn translate_day_of_week(field: &str, expression: &str) -> Result<String> {
    let mut items = Vec::new();

    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (item, None),
        };
        let step_suffix = step.map(|s| format!("/{}", s)).unwrap_or_default();

        if range == "*" || range.chars().all(|c| c.is_ascii_alphabetic() || c == '-') {
            items.push(item.to_string());
            continue;
        }

        match range.split_once('-') {
            None => items.push(format!("{}{}", day_name(range, expression)?, step_suffix)),
            Some((start, "7")) => {
                // Sunday closes the week; keep the range inside Sun..Sat.
                let first = day_name(start, expression)?;
                let span = 7 - start.parse::<u32>().unwrap_or(0);
                let every = match step {
                    Some(step) => step
                        .parse::<u32>()
                        .map_err(|_| Error::validation(expression, format!("invalid step '{}'", step)))?,
                    None => 1,
                };
                items.push(format!("{}-Sat{}", first, step_suffix));
                if every > 0 && span % every == 0 && first != "Sun" {
                    items.push("Sun".to_string());
                }
            }
            Some((start, end)) => items.push(format!(
                "{}-{}{}",
                day_name(start, expression)?,
                day_name(end, expression)?,
                step_suffix
            )),
        }
    }

    Ok(items.join(","))
}

/// A compiled five-field expression.
///
/// When both day-of-month and day-of-week are restricted, a day matching
/// either field fires, as in standard cron. The `cron` crate requires both
/// to match, so that case is held as two schedules whose fire times are merged.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    schedules: Vec<Schedule>,
}

impl CronSchedule {
    /// Earliest fire time strictly after `now`.
    pub fn after(&self, now: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedules
            .iter()
            .filter_map(|schedule| schedule.after(now).next())
            .min()
    }

    pub fn schedules(&self) -> &[Schedule] {
        &self.schedules
    }
}

impl From<Schedule> for CronSchedule {
    fn from(schedule: Schedule) -> CronSchedule {
        CronSchedule {
            schedules: vec![schedule],
        }
    }
}

fn is_unrestricted(field: &str) -> bool {
    matches!(field, "*" | "?" | "*/1")
}

fn compile(expression: &str, fields: [&str; 5]) -> Result<Schedule> {
    let normalized = format!(
        "0 {} {} {} {} {}",
        fields[0], fields[1], fields[2], fields[3], fields[4]
    );
    debug!("Cron expression '{}' normalized to '{}'", expression, normalized);
    Schedule::from_str(&normalized).map_err(|e| Error::validation(expression, e.to_string()))
}

/// Parses a five-field expression (minute hour day-of-month month day-of-week).
pub fn parse(expression: &str) -> Result<CronSchedule> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    let [minute, hour, day_of_month, month, day_of_week] = fields[..] else {
        return Err(Error::validation(
            expression,
            format!("expected 5 fields, found {}", fields.len()),
        ));
    };

    let day_of_week = translate_day_of_week(day_of_week, expression)?;
    let day_of_week = day_of_week.as_str();

    if is_unrestricted(day_of_month) || is_unrestricted(day_of_week) {
        let schedule = compile(expression, [minute, hour, day_of_month, month, day_of_week])?;
        return Ok(schedule.into());
    }

    Ok(CronSchedule {
        schedules: vec![
            compile(expression, [minute, hour, day_of_month, month, "*"])?,
            compile(expression, [minute, hour, "*", month, day_of_week])?,
        ],
    })
}

/// Earliest fire time strictly after `now`.
pub fn next_after(expression: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    parse(expression)?
        .after(&now)
        .ok_or_else(|| Error::validation(expression, "expression never fires"))
}

#[derive(Clone)]
pub struct NextRunCalculator {
    catalog: Arc<dyn Catalog>,
}

impl NextRunCalculator {
    pub fn new(catalog: Arc<dyn Catalog>) -> NextRunCalculator {
        NextRunCalculator { catalog }
    }

    /// Computes the next run after `now` and persists it on the schedule.
    pub async fn refresh(&self, schedule: &ScheduleDescriptor, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let next_run = next_after(&schedule.cron_expression, now)?;
        self.catalog.set_next_run(schedule.id, next_run).await?;
        debug!("Next run of schedule {} is {}", schedule.id, next_run);
        Ok(next_run)
    }
}
