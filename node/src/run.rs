//! The run loop and its workers.
//!
//! Wall-clock batches are driven by a single ticker that sleeps until the
//! next scheduled time and then calls `process_batch`; the `(batch_date,
//! schedule)` unique row is what actually serializes runs across
//! instances, so a second node ticking at the same moment loses the insert
//! and moves on.

use std::time::Duration;

use chrono::{FixedOffset, NaiveDate, TimeZone, Utc};
use common::constants::BATCH_TIMES;
use common::enums::BatchSchedule;
use common::shutdown::ShutdownChannel;
use common::task::BimaTask;
use common::time::TimestampMs;
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::context::NodeContext;

const NOTIFY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const POLICY_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);

pub async fn run(config: NodeConfig) -> anyhow::Result<()> {
    info!(env = %config.deploy_env.as_str(), "bima node starting");
    let context = NodeContext::init(config)?;
    let shutdown = ShutdownChannel::new();

    let mut tasks: Vec<BimaTask<()>> = Vec::with_capacity(4);

    tasks.push(BimaTask::spawn_named("batch-ticker", {
        let processor = context.batch_processor.clone();
        let dispatcher = context.dispatcher.clone();
        let offset_hours = context.config.batch.utc_offset_hours;
        let shutdown = shutdown.clone();
        async move {
            loop {
                let (schedule, fire_at) = next_batch_fire(offset_hours);
                let wait = fire_at
                    .duration_since(TimestampMs::now());
                debug!(?schedule, %fire_at, "batch ticker sleeping");
                tokio::select! {
                    biased;
                    () = shutdown.recv() => break,
                    () = tokio::time::sleep(wait) => {}
                }

                let now = TimestampMs::now();
                match processor.process_batch(schedule, now) {
                    Ok((batch, events)) => {
                        info!(
                            batch_number = %batch.batch_number,
                            issued = batch.issued_count,
                            failed = batch.failed_count,
                            "scheduled batch complete",
                        );
                        dispatcher.dispatch(events).await;
                    }
                    Err(e) if !e.is_retryable() => {
                        // Most commonly: another instance won the
                        // (batch_date, schedule) insert.
                        debug!("batch run skipped: {e:#}");
                    }
                    Err(e) => warn!("batch run failed: {e:#}"),
                }
            }
        }
    }));

    tasks.push(BimaTask::spawn_named("reconciler", {
        let reconciler = context.reconciler;
        let shutdown = shutdown.clone();
        async move {
            reconciler.run(shutdown).await;
        }
    }));

    tasks.push(BimaTask::spawn_named("notify-sweeper", {
        let orchestrator = context.orchestrator.clone();
        let shutdown = shutdown.clone();
        async move {
            loop {
                tokio::select! {
                    biased;
                    () = shutdown.recv() => break,
                    () = tokio::time::sleep(NOTIFY_SWEEP_INTERVAL) => {}
                }
                match orchestrator.sweep_due(TimestampMs::now()).await {
                    Ok(0) => (),
                    Ok(attempted) =>
                        info!(attempted, "notification sweep"),
                    Err(e) => warn!("notification sweep failed: {e:#}"),
                }
            }
        }
    }));

    tasks.push(BimaTask::spawn_named("policy-expiry-sweeper", {
        let policy_service = context.policy_service.clone();
        let shutdown = shutdown.clone();
        async move {
            loop {
                tokio::select! {
                    biased;
                    () = shutdown.recv() => break,
                    () = tokio::time::sleep(POLICY_SWEEP_INTERVAL) => {}
                }
                match policy_service.expire_due(TimestampMs::now()) {
                    Ok(0) => (),
                    Ok(changed) => info!(changed, "policy expiry sweep"),
                    Err(e) => warn!("policy expiry sweep failed: {e:#}"),
                }
            }
        }
    }));

    // Ctrl-C initiates a graceful shutdown.
    {
        let shutdown = shutdown.clone();
        BimaTask::spawn_named("ctrl-c", async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received ctrl-c, shutting down");
            }
            shutdown.send();
        })
        .detach();
    }

    // Wait for the shutdown signal, then give every worker a bounded
    // window to finish.
    shutdown.recv().await;
    let mut joins = tasks
        .into_iter()
        .map(BimaTask::logged)
        .collect::<FuturesUnordered<_>>();
    let deadline = tokio::time::sleep(SHUTDOWN_TIMEOUT);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            maybe_name = joins.next() => match maybe_name {
                Some(_) => continue,
                None => break,
            },
            () = &mut deadline => {
                let hung = joins.len();
                anyhow::bail!("{hung} tasks failed to finish on time");
            }
        }
    }

    info!("bima node stopped");
    Ok(())
}

/// The next scheduled batch fire time strictly after now, in the
/// deployment offset.
fn next_batch_fire(offset_hours: i32) -> (BatchSchedule, TimestampMs) {
    let offset = FixedOffset::east_opt(offset_hours * 3600)
        .expect("offset hours are sane");
    let now_local = Utc::now().with_timezone(&offset);

    let schedules = [
        (BatchSchedule::Batch1, BATCH_TIMES[0]),
        (BatchSchedule::Batch2, BATCH_TIMES[1]),
        (BatchSchedule::Batch3, BATCH_TIMES[2]),
    ];

    for day_offset in 0..2 {
        let date: NaiveDate = now_local.date_naive()
            + chrono::Duration::days(day_offset);
        for (schedule, (hour, minute)) in schedules {
            let fire_local = date
                .and_hms_opt(hour, minute, 0)
                .expect("batch times are valid");
            let fire = offset
                .from_local_datetime(&fire_local)
                .single()
                .expect("fixed offsets have no ambiguous local times");
            if fire > now_local {
                let fire_utc = fire.with_timezone(&Utc);
                return (
                    schedule,
                    TimestampMs::from_datetime(fire_utc),
                );
            }
        }
    }
    unreachable!("tomorrow always has a batch")
}
