use chrono::{NaiveDate, Utc};
use clap::Subcommand;

use remindd_core::{NewReminder, ReminderService, ScheduleSpec, ScheduleType};

use super::Context;

#[derive(Subcommand)]
pub enum ReminderAction {
    /// Create a reminder
    Add {
        /// Owner identity
        #[arg(long)]
        owner: String,
        /// Recipient identity
        #[arg(long)]
        recipient: String,
        /// Title
        #[arg(long)]
        title: String,
        /// Body text
        #[arg(long, default_value = "")]
        body: String,
        /// Schedule type: once, daily, weekly, monthly, yearly, interval
        #[arg(long)]
        schedule: String,
        /// Wall-clock time "HH:mm"
        #[arg(long)]
        time: Option<String>,
        /// Weekdays for weekly schedules, e.g. "0,2" (0 = Monday)
        #[arg(long)]
        weekdays: Option<String>,
        /// Day of month for monthly schedules
        #[arg(long)]
        day_of_month: Option<u32>,
        /// Day interval for interval schedules
        #[arg(long)]
        interval_days: Option<u32>,
        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start_date: Option<NaiveDate>,
        /// End date (YYYY-MM-DD)
        #[arg(long)]
        end_date: Option<NaiveDate>,
        /// Maximum number of occurrences
        #[arg(long)]
        max_occurrences: Option<u32>,
        /// IANA timezone; defaults to the configured default
        #[arg(long)]
        timezone: Option<String>,
    },
    /// List reminders for an owner
    List {
        #[arg(long)]
        owner: String,
    },
    /// Print one reminder as JSON
    Show { id: String },
    /// Pause an active reminder
    Pause {
        id: String,
        #[arg(long)]
        actor: String,
    },
    /// Resume a paused reminder
    Resume {
        id: String,
        #[arg(long)]
        actor: String,
    },
    /// Cancel a reminder
    Cancel {
        id: String,
        #[arg(long)]
        actor: String,
    },
    /// Delete a reminder and its deliveries
    Delete { id: String },
}

fn schedule_type(name: &str) -> Result<ScheduleType, String> {
    match name {
        "once" => Ok(ScheduleType::Once),
        "daily" => Ok(ScheduleType::Daily),
        "weekly" => Ok(ScheduleType::Weekly),
        "monthly" => Ok(ScheduleType::Monthly),
        "yearly" => Ok(ScheduleType::Yearly),
        "interval" => Ok(ScheduleType::Interval),
        "custom" => Ok(ScheduleType::Custom),
        other => Err(format!("unknown schedule type '{other}'")),
    }
}

fn parse_weekdays(s: &str) -> Result<Vec<u8>, String> {
    s.split(',')
        .map(|part| {
            part.trim()
                .parse::<u8>()
                .map_err(|_| format!("'{part}' is not a weekday index"))
        })
        .collect()
}

pub fn run(action: ReminderAction) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = Context::open()?;
    let service = ReminderService::new(
        ctx.store.clone(),
        ctx.events.clone(),
        ctx.config.default_timezone.clone(),
    );
    let now = Utc::now();

    match action {
        ReminderAction::Add {
            owner,
            recipient,
            title,
            body,
            schedule,
            time,
            weekdays,
            day_of_month,
            interval_days,
            start_date,
            end_date,
            max_occurrences,
            timezone,
        } => {
            let spec = ScheduleSpec {
                schedule_type: schedule_type(&schedule)?,
                time_of_day: time,
                weekdays: weekdays.as_deref().map(parse_weekdays).transpose()?.unwrap_or_default(),
                day_of_month,
                interval_days,
                start_date,
                end_date,
                max_occurrences,
                excluded_dates: Vec::new(),
                expression: None,
            };
            let reminder = service.create(
                NewReminder {
                    owner,
                    recipient,
                    title,
                    body,
                    schedule: spec,
                    timezone,
                    escalation: Default::default(),
                },
                now,
            )?;
            println!("{}", serde_json::to_string_pretty(&reminder)?);
        }
        ReminderAction::List { owner } => {
            let reminders = service.list_for_owner(&owner)?;
            println!("{}", serde_json::to_string_pretty(&reminders)?);
        }
        ReminderAction::Show { id } => {
            let reminder = service.get(&id)?;
            println!("{}", serde_json::to_string_pretty(&reminder)?);
        }
        ReminderAction::Pause { id, actor } => {
            let reminder = service.pause(&id, &actor, now)?;
            println!("{}", serde_json::to_string_pretty(&reminder)?);
        }
        ReminderAction::Resume { id, actor } => {
            let reminder = service.resume(&id, &actor, now)?;
            println!("{}", serde_json::to_string_pretty(&reminder)?);
        }
        ReminderAction::Cancel { id, actor } => {
            let reminder = service.cancel(&id, &actor, now)?;
            println!("{}", serde_json::to_string_pretty(&reminder)?);
        }
        ReminderAction::Delete { id } => {
            service.delete(&id)?;
            println!("deleted {id}");
        }
    }
    Ok(())
}
