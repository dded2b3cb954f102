//! Estimate worker loop.
//!
//! Each iteration blocks on `JobQueue::dequeue` for up to 10s, racing it
//! against a shutdown watch via `tokio::select!`. A queue error drives an
//! exponential backoff instead of a fixed retry tick.

use std::sync::Arc;
use std::time::Duration;

use calorie_analytics::{EventOutcome, InlineAnalyticsAggregator, InlineEvent};
use calorie_core::logging::{CorrelationFields, InlineStage};
use calorie_core::types::EstimateJob;
use calorie_core::FailureReason;
use calorie_estimator::{CalorieEstimator, EstimatorError};
use calorie_queue::JobQueue;
use calorie_telemetry::InlineTelemetry;
use tokio::sync::watch;

use crate::delivery::{requires_failure_dm, ChatDelivery};
use crate::meal_store::MealStore;
use crate::uploader::PresignedUploader;

/// Dequeue blocks for up to this long before returning `None`.
const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(10);
const BACKOFF_INITIAL: Duration = Duration::from_millis(100);
const BACKOFF_MAX: Duration = Duration::from_secs(10);
/// Consecutive dequeue failures tolerated before giving up as unrecoverable.
const RETRY_BUDGET: u32 = 20;

/// How the worker loop ended, so `main` can choose the matching exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Graceful,
    Unrecoverable,
}

/// The worker's external collaborators, gathered so `run_worker`
/// takes a single handle rather than five.
pub struct WorkerDeps {
    pub queue: Arc<dyn JobQueue>,
    pub uploader: Arc<dyn PresignedUploader>,
    pub estimator: Arc<dyn CalorieEstimator>,
    pub meal_store: Arc<dyn MealStore>,
    pub chat_delivery: Arc<dyn ChatDelivery>,
    pub telemetry: InlineTelemetry,
    pub analytics: InlineAnalyticsAggregator,
}

impl WorkerDeps {
    fn record_event(&self, job: &EstimateJob, outcome: EventOutcome, result_latency_ms: Option<u64>, permission_block: bool) {
        let event = InlineEvent {
            date: chrono::Utc::now().date_naive(),
            chat_type: job.chat_type,
            trigger_type: job.trigger_type,
            outcome,
            permission_block,
            ack_latency_ms: None,
            result_latency_ms,
            accuracy_delta_pct: None,
        };
        if let Err(e) = self.analytics.record_event(&event) {
            tracing::error!(job_id = %job.job_id, error = %e, "failed to record analytics event");
        }
    }
}

/// Long-lived dequeue loop. Runs until `shutdown` broadcasts
/// `true`; a queue error backs off exponentially rather than busy-looping
/// against an unavailable store.
pub async fn run_worker(deps: Arc<WorkerDeps>, mut shutdown: watch::Receiver<bool>) -> WorkerExit {
    tracing::info!("estimate worker started");
    let mut backoff = BACKOFF_INITIAL;
    let mut consecutive_failures: u32 = 0;

    let exit = loop {
        if *shutdown.borrow() {
            break WorkerExit::Graceful;
        }

        tokio::select! {
            result = deps.queue.dequeue(DEQUEUE_TIMEOUT) => {
                match result {
                    Ok(Some(job)) => {
                        backoff = BACKOFF_INITIAL;
                        consecutive_failures = 0;
                        process_job(&deps, job).await;
                    }
                    Ok(None) => {
                        consecutive_failures = 0;
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        tracing::error!(
                            error = %e,
                            backoff_ms = backoff.as_millis() as u64,
                            consecutive_failures,
                            "queue dequeue failed, backing off"
                        );
                        if consecutive_failures >= RETRY_BUDGET {
                            tracing::error!(consecutive_failures, "retry budget exhausted, giving up");
                            break WorkerExit::Unrecoverable;
                        }
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(BACKOFF_MAX);
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break WorkerExit::Graceful;
                }
            }
        }
    };

    tracing::info!(?exit, "estimate worker shut down");
    exit
}

/// Runs one job end to end: resolve photo URLs,
/// estimate, persist, deliver, and record telemetry/analytics — never lets
/// a single job's failure propagate out and take down the loop.
async fn process_job(deps: &WorkerDeps, job: EstimateJob) {
    let fields = CorrelationFields::from_job_id(job.job_id)
        .with_trigger(job.trigger_type)
        .with_chat_type(job.chat_type)
        .with_user_hash(job.source_user_hash.clone())
        .with_stage(InlineStage::Dequeued);
    fields.log_info("dequeued estimate job");

    let enqueued_at = job.enqueued_at;

    let mut urls = Vec::with_capacity(job.photo_file_ids.len());
    for file_id in &job.photo_file_ids {
        match deps.uploader.get(file_id).await {
            Ok(url) => urls.push(url),
            Err(e) => {
                fields.clone().with_stage(InlineStage::Failed).log_warn(&format!("photo URL resolution failed: {e}"));
                handle_failure(deps, &job, FailureReason::ProcessingError, None).await;
                return;
            }
        }
    }

    fields.clone().with_stage(InlineStage::AnalysisStarted).log_info("starting vision estimate");

    let estimate = deps.estimator.estimate_from_photos(&urls, job.caption.as_deref()).await;
    let result_latency_ms = (chrono::Utc::now() - enqueued_at).num_milliseconds().max(0) as u64;

    match estimate {
        Ok(result) => {
            fields.clone().with_stage(InlineStage::AnalysisCompleted).log_info("vision estimate completed");

            if let Err(e) = deps.meal_store.persist(&job, &result).await {
                tracing::error!(job_id = %job.job_id, error = %e, "failed to persist meal, continuing to delivery");
            }

            match deps.chat_delivery.deliver_result(&job, &result).await {
                Ok(()) => {
                    fields.clone().with_stage(InlineStage::DeliveryCompleted).log_info("result delivered");
                }
                Err(e) => {
                    fields.clone().with_stage(InlineStage::Failed).log_warn(&format!("result delivery failed: {e}"));
                }
            }

            deps.telemetry.record_result_latency(job.trigger_type, result_latency_ms);
            deps.record_event(&job, EventOutcome::Success, Some(result_latency_ms), false);
        }
        Err(e) => {
            let reason = estimator_failure_reason(&e);
            fields.clone().with_stage(InlineStage::Failed).log_warn(&format!("estimate failed: {e}"));
            handle_failure(deps, &job, reason, Some(result_latency_ms)).await;
        }
    }
}

fn estimator_failure_reason(e: &EstimatorError) -> FailureReason {
    e.failure_reason()
}

/// Failure delivery branch: a redacted DM when
/// `metadata.failure_dm_required` and `consent_scope=inline_group`, a
/// generic in-place reply otherwise. On a permission error in the DM path,
/// records the block and stops — no fallback in-place reply is sent, since
/// that would leak the group context the DM was meant to avoid.
async fn handle_failure(deps: &WorkerDeps, job: &EstimateJob, reason: FailureReason, result_latency_ms: Option<u64>) {
    deps.telemetry.record_failure(job.trigger_type, reason);

    let mut permission_block = false;
    if requires_failure_dm(job) {
        if deps.chat_delivery.deliver_failure_dm(job, reason).await.is_err() {
            deps.telemetry.record_permission_block(job.trigger_type, job.chat_type);
            permission_block = true;
        }
    } else {
        let _ = deps.chat_delivery.deliver_generic_error(job, reason).await;
    }

    deps.record_event(job, EventOutcome::Failure(reason), result_latency_ms, permission_block);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::test_support::RecordingChatDelivery;
    use crate::meal_store::InMemoryMealStore;
    use crate::uploader::FakePresignedUploader;
    use calorie_core::types::{ChatType, ConsentScope, JobMetadata, Macronutrients, TriggerType};
    use calorie_estimator::FakeCalorieEstimator;
    use calorie_queue::InMemoryJobQueue;
    use chrono::Utc;
    use std::time::Duration as StdDuration;
    use uuid::Uuid;

    fn sample_job(consent: ConsentScope, failure_dm_required: bool) -> EstimateJob {
        EstimateJob {
            job_id: Uuid::new_v4(),
            trigger_type: TriggerType::ReplyMention,
            chat_type: ChatType::Supergroup,
            raw_chat_id: -100555,
            thread_id: Some(9),
            reply_to_message_id: Some(42),
            photo_file_ids: vec!["file-1".into()],
            caption: Some("lunch".into()),
            source_user_id: 7,
            source_user_hash: "h".into(),
            chat_id_hash: "c".into(),
            consent_scope: consent,
            metadata: JobMetadata {
                failure_dm_required,
                ..Default::default()
            },
            enqueued_at: Utc::now(),
        }
    }

    fn sample_result() -> calorie_core::types::EstimateResult {
        calorie_core::types::EstimateResult::new(
            450.0,
            400.0,
            500.0,
            Macronutrients {
                protein_g: 20.0,
                carbs_g: 30.0,
                fats_g: 10.0,
            },
            vec![],
            0.8,
            1200,
        )
        .unwrap()
    }

    fn test_deps(
        estimator: FakeCalorieEstimator,
        chat_delivery: RecordingChatDelivery,
    ) -> (Arc<WorkerDeps>, Arc<InMemoryMealStore>, Arc<RecordingChatDelivery>) {
        let meal_store = Arc::new(InMemoryMealStore::new());
        let chat_delivery = Arc::new(chat_delivery);
        let deps = Arc::new(WorkerDeps {
            queue: Arc::new(InMemoryJobQueue::new()),
            uploader: Arc::new(FakePresignedUploader),
            estimator: Arc::new(estimator),
            meal_store: meal_store.clone(),
            chat_delivery: chat_delivery.clone(),
            telemetry: InlineTelemetry::new(50),
            analytics: InlineAnalyticsAggregator::open_in_memory().unwrap(),
        });
        (deps, meal_store, chat_delivery)
    }

    #[tokio::test]
    async fn successful_job_persists_and_delivers() {
        let (deps, meal_store, chat_delivery) = test_deps(
            FakeCalorieEstimator::succeeding(sample_result()),
            RecordingChatDelivery::default(),
        );
        let job = sample_job(ConsentScope::InlineGroup, false);
        let job_id = job.job_id;

        process_job(&deps, job).await;

        assert!(meal_store.contains(job_id));
        assert_eq!(chat_delivery.results.lock().unwrap().len(), 1);
        let snap = deps.telemetry.snapshot(Some(TriggerType::ReplyMention));
        assert_eq!(snap.sample_size, 1);
    }

    #[tokio::test]
    async fn failure_without_dm_requirement_sends_generic_reply() {
        let (deps, meal_store, chat_delivery) = test_deps(
            FakeCalorieEstimator::failing(calorie_estimator::EstimatorError::Timeout),
            RecordingChatDelivery::default(),
        );
        let job = sample_job(ConsentScope::InlineGroup, false);
        let job_id = job.job_id;

        process_job(&deps, job).await;

        assert!(!meal_store.contains(job_id));
        assert_eq!(chat_delivery.generic_errors.lock().unwrap().len(), 1);
        assert!(chat_delivery.failure_dms.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failure_with_inline_group_dm_requirement_sends_redacted_dm() {
        let (deps, _meal_store, chat_delivery) = test_deps(
            FakeCalorieEstimator::failing(calorie_estimator::EstimatorError::ModelError("bad json".into())),
            RecordingChatDelivery::default(),
        );
        let job = sample_job(ConsentScope::InlineGroup, true);

        process_job(&deps, job).await;

        assert_eq!(chat_delivery.failure_dms.lock().unwrap().len(), 1);
        assert!(chat_delivery.generic_errors.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn platform_refusal_on_failure_dm_records_permission_block_and_stops() {
        let (deps, _meal_store, chat_delivery) = test_deps(
            FakeCalorieEstimator::failing(calorie_estimator::EstimatorError::Timeout),
            RecordingChatDelivery {
                fail_dm: true,
                ..Default::default()
            },
        );
        let job = sample_job(ConsentScope::InlineGroup, true);

        process_job(&deps, job).await;

        assert_eq!(chat_delivery.failure_dms.lock().unwrap().len(), 1);
        assert!(chat_delivery.generic_errors.lock().unwrap().is_empty());
        let snap = deps.telemetry.snapshot(Some(TriggerType::ReplyMention));
        assert_eq!(snap.permission_blocks, 1);
    }

    #[tokio::test]
    async fn shutdown_signal_stops_the_loop_without_processing() {
        let (deps, _meal_store, _chat_delivery) = test_deps(
            FakeCalorieEstimator::succeeding(sample_result()),
            RecordingChatDelivery::default(),
        );
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let result = tokio::time::timeout(StdDuration::from_secs(2), run_worker(deps, rx)).await;
        assert!(result.is_ok(), "run_worker should exit promptly on shutdown");
    }
}
