//! Per-job status polling loop

use std::sync::Arc;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::{deregister, JobCell, PollContext};
use crate::cache::CollectionKey;
use crate::error::ClientError;
use crate::models::{RemoteJobStatus, TaskId};

/// Poll one job until it finishes or its token is cancelled
///
/// Ticks are strictly sequential: the next status request is issued only
/// after the previous response (or its timeout) has been handled.
pub(super) async fn run(ctx: PollContext, cell: Arc<JobCell>, task_id: TaskId) {
    let scope = cell.scope;
    let recording_id = scope.recording_id;
    let started = Instant::now();

    let mut ticker = interval(ctx.settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // First tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = cell.token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if let Some(limit) = ctx.settings.job_timeout {
            if started.elapsed() >= limit {
                let message = format!("Feature extraction timed out after {:?}", limit);
                fail_job(&ctx, &cell, message.clone(), ClientError::Timeout(message));
                break;
            }
        }

        let polled = tokio::select! {
            biased;
            _ = cell.token.cancelled() => break,
            result = timeout(ctx.settings.poll_timeout, ctx.service.job_status(scope, &task_id)) => result,
        };

        let status = match polled {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                warn!(
                    recording_id,
                    task_id = %task_id,
                    transient = e.is_transient(),
                    "Status poll failed, retrying next tick: {}",
                    e
                );
                continue;
            }
            Err(_) => {
                warn!(
                    recording_id,
                    task_id = %task_id,
                    timeout_ms = ctx.settings.poll_timeout.as_millis() as u64,
                    "Status poll timed out, retrying next tick"
                );
                continue;
            }
        };

        match status.status {
            RemoteJobStatus::Pending | RemoteJobStatus::Running => {
                cell.apply(&ctx.bus, |job| job.advance(status.clamped_progress()));
            }
            RemoteJobStatus::Completed => {
                let fetched = tokio::select! {
                    biased;
                    _ = cell.token.cancelled() => break,
                    result = ctx.service.list_features(scope) => result,
                };

                let mut features = match fetched {
                    Ok(features) => features,
                    Err(e) => {
                        warn!(
                            recording_id,
                            task_id = %task_id,
                            "Feature fetch after completion failed, retrying next tick: {}",
                            e
                        );
                        continue;
                    }
                };
                for feature in &mut features {
                    feature.recording_id = recording_id;
                }

                let count = features.len();
                let Some(claimed) = cell.claim(|job| job.complete(count)) else {
                    break;
                };

                match ctx.cache.put_features(scope, features).await {
                    Some(snapshot) => ctx
                        .bus
                        .emit_lossy(CollectionKey::Features(recording_id).refreshed_event(snapshot.len())),
                    None => debug!(
                        recording_id,
                        patient_id = scope.patient_id,
                        "Patient deleted, features not cached"
                    ),
                }
                ctx.bus.success(format!(
                    "Feature extraction completed: {} features extracted",
                    count
                ));
                cell.publish(&ctx.bus, claimed);
                break;
            }
            RemoteJobStatus::Failed => {
                let message = status
                    .error
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(|| "Feature extraction failed".to_string());
                let err = ClientError::JobFailed(format!("Feature extraction failed: {}", message));
                fail_job(&ctx, &cell, message, err);
                break;
            }
        }
    }

    deregister(&ctx.registry, &cell);
    debug!(recording_id, task_id = %task_id, "Poll loop exited");
}

/// Move the job to `Failed`, publishing `err` before watchers see the state
fn fail_job(ctx: &PollContext, cell: &JobCell, reason: String, err: ClientError) {
    if let Some(claimed) = cell.claim(|job| job.fail(reason)) {
        ctx.bus.error(err.kind(), err.user_message());
        cell.publish(&ctx.bus, claimed);
    }
}
