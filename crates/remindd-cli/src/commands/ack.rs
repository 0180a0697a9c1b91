use std::sync::Arc;

use chrono::Utc;
use clap::Args;

use remindd_core::{
    AckAction, AckMethod, AckRequest, AcknowledgmentTracker, DirectResolver, EscalationEngine,
};

use super::Context;

#[derive(Args)]
pub struct AckArgs {
    /// Delivery to acknowledge
    pub delivery_id: String,
    /// Acting identity (delivery recipient or reminder owner)
    #[arg(long)]
    pub actor: String,
    /// Action: complete, dismiss, snooze, escalate, react
    #[arg(long, default_value = "react")]
    pub action: String,
    /// Snooze duration in minutes (snooze action only)
    #[arg(long)]
    pub minutes: Option<i64>,
    /// Method: web, email, chat, api
    #[arg(long, default_value = "api")]
    pub method: String,
}

fn parse_action(name: &str, minutes: Option<i64>) -> Result<AckAction, String> {
    match name {
        "complete" => Ok(AckAction::Complete),
        "dismiss" => Ok(AckAction::Dismiss),
        "snooze" => Ok(AckAction::Snooze {
            minutes: minutes.ok_or("snooze requires --minutes")?,
        }),
        "escalate" => Ok(AckAction::Escalate),
        "react" => Ok(AckAction::React),
        other => Err(format!("unknown action '{other}'")),
    }
}

fn parse_method(name: &str) -> Result<AckMethod, String> {
    match name {
        "web" => Ok(AckMethod::Web),
        "email" => Ok(AckMethod::Email),
        "chat" => Ok(AckMethod::Chat),
        "api" => Ok(AckMethod::Api),
        other => Err(format!("unknown method '{other}'")),
    }
}

pub async fn run(args: AckArgs) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = Context::open()?;
    let tracker = AcknowledgmentTracker::new(ctx.store.clone(), ctx.events.clone());
    let now = Utc::now();

    let result = tracker.process(
        AckRequest {
            delivery_id: args.delivery_id.clone(),
            actor: args.actor,
            action: parse_action(&args.action, args.minutes)?,
            method: parse_method(&args.method)?,
            metadata: serde_json::Value::Null,
        },
        now,
    )?;

    // The escalate action asks for an out-of-band manual run.
    if result.escalation_requested {
        let escalation = EscalationEngine::new(
            ctx.store.clone(),
            ctx.notifier(),
            Arc::new(DirectResolver),
            ctx.events.clone(),
        );
        match escalation.escalate_now(&args.delivery_id, now).await? {
            Some(level) => eprintln!("escalated to level {level}"),
            None => eprintln!("no escalation level available"),
        }
    }

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
