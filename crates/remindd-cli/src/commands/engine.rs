use std::sync::Arc;

use chrono::Utc;
use clap::Subcommand;

use remindd_core::{
    DeliveryScheduler, DirectResolver, EngineRunner, EscalationEngine,
};

use super::Context;

#[derive(Subcommand)]
pub enum EngineAction {
    /// Run one scheduler cycle plus one escalation check
    Tick,
    /// Run the self-timed polling service until interrupted
    Serve,
    /// Print the scheduler health report as JSON
    Health,
}

fn build(ctx: &Context) -> (Arc<DeliveryScheduler>, Arc<EscalationEngine>) {
    let notifier = ctx.notifier();
    let scheduler = Arc::new(DeliveryScheduler::new(
        ctx.store.clone(),
        notifier.clone(),
        ctx.events.clone(),
        ctx.config.scheduler.clone(),
        ctx.config.health.clone(),
    ));
    let escalation = Arc::new(EscalationEngine::new(
        ctx.store.clone(),
        notifier,
        Arc::new(DirectResolver),
        ctx.events.clone(),
    ));
    (scheduler, escalation)
}

pub async fn run(action: EngineAction) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = Context::open()?;
    let (scheduler, escalation) = build(&ctx);

    match action {
        EngineAction::Tick => {
            let runner = EngineRunner::new(scheduler, escalation, &ctx.config);
            let report = runner.tick(Utc::now()).await?;
            let summary = serde_json::json!({
                "cycle": report.cycle,
                "escalation": report.escalation,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        EngineAction::Serve => {
            let runner = Arc::new(EngineRunner::new(scheduler, escalation, &ctx.config));
            let loop_runner = Arc::clone(&runner);
            let handle = tokio::spawn(async move { loop_runner.run().await });

            tokio::signal::ctrl_c().await?;
            // Stop accepting ticks; an in-flight cycle finishes.
            runner.stop();
            handle.await?;
        }
        EngineAction::Health => {
            let report = scheduler.health(Utc::now())?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}
