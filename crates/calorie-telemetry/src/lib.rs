//! Process-wide telemetry registry for the inline pipeline. Holds, per
//! trigger type, a bounded ring buffer of recent
//! ack/result latencies plus monotonic failure and permission-block
//! counters. All writes are non-blocking and never fail observably —
//! mutex poisoning is recovered from rather than propagated, since a
//! telemetry write must never take down a webhook or worker request.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use calorie_core::types::{ChatType, InlineMetricsSnapshot, TriggerType};

const TRIGGERS: [TriggerType; 4] = [
    TriggerType::InlineQuery,
    TriggerType::ReplyMention,
    TriggerType::DirectMention,
    TriggerType::PrivatePhoto,
];

fn trigger_index(trigger: TriggerType) -> usize {
    match trigger {
        TriggerType::InlineQuery => 0,
        TriggerType::ReplyMention => 1,
        TriggerType::DirectMention => 2,
        TriggerType::PrivatePhoto => 3,
    }
}

#[derive(Default)]
struct TriggerState {
    ack_latencies_ms: VecDeque<u64>,
    result_latencies_ms: VecDeque<u64>,
    /// Sliding window of recent block/non-block outcomes, used only to
    /// compute the alerting rate in `record_permission_block`.
    block_outcomes: VecDeque<bool>,
    permission_blocks: u64,
    permission_blocks_by_chat: BTreeMap<String, u64>,
    failure_reasons: BTreeMap<String, u64>,
    accuracy_deltas_pct: VecDeque<f64>,
}

impl TriggerState {
    fn push_bounded<T>(buf: &mut VecDeque<T>, value: T, window: usize) {
        buf.push_back(value);
        while buf.len() > window {
            buf.pop_front();
        }
    }
}

/// Windowed latency/percentile registry, failure counters, and
/// permission-block alerting, keyed by trigger type.
pub struct InlineTelemetry {
    window: usize,
    /// Block rate above this threshold (fraction of the window) logs a
    /// warning on the triggering call.
    alert_threshold: f64,
    states: [Mutex<TriggerState>; 4],
}

impl Default for InlineTelemetry {
    fn default() -> Self {
        Self::new(50)
    }
}

impl InlineTelemetry {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            alert_threshold: 0.1,
            states: [
                Mutex::new(TriggerState::default()),
                Mutex::new(TriggerState::default()),
                Mutex::new(TriggerState::default()),
                Mutex::new(TriggerState::default()),
            ],
        }
    }

    pub fn with_alert_threshold(mut self, threshold: f64) -> Self {
        self.alert_threshold = threshold;
        self
    }

    fn state(&self, trigger: TriggerType) -> std::sync::MutexGuard<'_, TriggerState> {
        match self.states[trigger_index(trigger)].lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn record_ack_latency(&self, trigger: TriggerType, ms: u64) {
        let mut state = self.state(trigger);
        let window = self.window;
        TriggerState::push_bounded(&mut state.ack_latencies_ms, ms, window);
    }

    pub fn record_result_latency(&self, trigger: TriggerType, ms: u64) {
        let mut state = self.state(trigger);
        let window = self.window;
        TriggerState::push_bounded(&mut state.result_latencies_ms, ms, window);
    }

    /// Records a platform permission refusal and, when the per-trigger
    /// block rate in the current window exceeds the configured threshold,
    /// logs a warning.
    pub fn record_permission_block(&self, trigger: TriggerType, chat_type: ChatType) {
        let mut state = self.state(trigger);
        let window = self.window;
        state.permission_blocks += 1;
        *state
            .permission_blocks_by_chat
            .entry(chat_type.bucket_key().to_string())
            .or_insert(0) += 1;
        TriggerState::push_bounded(&mut state.block_outcomes, true, window);

        let blocks = state.block_outcomes.iter().filter(|b| **b).count();
        let rate = blocks as f64 / state.block_outcomes.len() as f64;
        if rate > self.alert_threshold {
            tracing::warn!(
                trigger = trigger.as_str(),
                chat_type = chat_type.as_str(),
                block_rate = rate,
                "permission_block rate exceeded threshold for trigger"
            );
        }
    }

    pub fn record_failure(&self, trigger: TriggerType, reason: calorie_core::FailureReason) {
        let mut state = self.state(trigger);
        let window = self.window;
        *state
            .failure_reasons
            .entry(reason.as_str().to_string())
            .or_insert(0) += 1;
        TriggerState::push_bounded(&mut state.block_outcomes, false, window);
    }

    pub fn record_accuracy_delta(&self, trigger: TriggerType, pct: f64) {
        let mut state = self.state(trigger);
        let window = self.window;
        TriggerState::push_bounded(&mut state.accuracy_deltas_pct, pct.abs(), window);
    }

    /// Consistent, copy-on-read snapshot scoped to a single trigger, or
    /// aggregated across all triggers when `trigger` is `None`.
    pub fn snapshot(&self, trigger: Option<TriggerType>) -> InlineMetricsSnapshot {
        match trigger {
            Some(t) => self.snapshot_one(t),
            None => self.snapshot_global(),
        }
    }

    fn snapshot_one(&self, trigger: TriggerType) -> InlineMetricsSnapshot {
        let state = self.state(trigger);
        InlineMetricsSnapshot {
            sample_size: state.ack_latencies_ms.len().max(state.result_latencies_ms.len()),
            ack_p95_ms: percentile_95(&state.ack_latencies_ms),
            result_p95_ms: percentile_95(&state.result_latencies_ms),
            permission_blocks: state.permission_blocks,
            permission_blocks_by_chat: state.permission_blocks_by_chat.clone(),
            failure_reasons: state.failure_reasons.clone(),
            avg_accuracy_delta_pct: mean(&state.accuracy_deltas_pct),
        }
    }

    fn snapshot_global(&self) -> InlineMetricsSnapshot {
        let mut ack_all: Vec<u64> = Vec::new();
        let mut result_all: Vec<u64> = Vec::new();
        let mut accuracy_all: Vec<f64> = Vec::new();
        let mut permission_blocks = 0u64;
        let mut permission_blocks_by_chat: BTreeMap<String, u64> = BTreeMap::new();
        let mut failure_reasons: BTreeMap<String, u64> = BTreeMap::new();

        for trigger in TRIGGERS {
            let state = self.state(trigger);
            ack_all.extend(state.ack_latencies_ms.iter().copied());
            result_all.extend(state.result_latencies_ms.iter().copied());
            accuracy_all.extend(state.accuracy_deltas_pct.iter().copied());
            permission_blocks += state.permission_blocks;
            for (k, v) in &state.permission_blocks_by_chat {
                *permission_blocks_by_chat.entry(k.clone()).or_insert(0) += v;
            }
            for (k, v) in &state.failure_reasons {
                *failure_reasons.entry(k.clone()).or_insert(0) += v;
            }
        }

        InlineMetricsSnapshot {
            sample_size: ack_all.len().max(result_all.len()),
            ack_p95_ms: percentile_95(&ack_all),
            result_p95_ms: percentile_95(&result_all),
            permission_blocks,
            permission_blocks_by_chat,
            failure_reasons,
            avg_accuracy_delta_pct: mean(&accuracy_all),
        }
    }

    /// Test-only reset hook.
    #[doc(hidden)]
    pub fn reset(&self) {
        for trigger in TRIGGERS {
            let mut state = self.state(trigger);
            *state = TriggerState::default();
        }
    }
}

/// Sort-on-read p95; with fewer than 5 samples, returns the max.
fn percentile_95<'a>(samples: impl IntoIterator<Item = &'a u64>) -> u64 {
    let mut sorted: Vec<u64> = samples.into_iter().copied().collect();
    if sorted.is_empty() {
        return 0;
    }
    sorted.sort_unstable();
    if sorted.len() < 5 {
        return *sorted.last().unwrap();
    }
    let idx = ((sorted.len() as f64) * 0.95).ceil() as usize;
    let idx = idx.saturating_sub(1).min(sorted.len() - 1);
    sorted[idx]
}

fn mean(samples: &VecDeque<f64>) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use calorie_core::FailureReason;

    #[test]
    fn ack_p95_uses_max_under_five_samples() {
        let telemetry = InlineTelemetry::new(50);
        telemetry.record_ack_latency(TriggerType::PrivatePhoto, 100);
        telemetry.record_ack_latency(TriggerType::PrivatePhoto, 300);
        let snap = telemetry.snapshot(Some(TriggerType::PrivatePhoto));
        assert_eq!(snap.ack_p95_ms, 300);
    }

    #[test]
    fn ack_p95_sorts_with_five_or_more_samples() {
        let telemetry = InlineTelemetry::new(50);
        for ms in [100, 200, 300, 400, 1000] {
            telemetry.record_ack_latency(TriggerType::PrivatePhoto, ms);
        }
        let snap = telemetry.snapshot(Some(TriggerType::PrivatePhoto));
        assert_eq!(snap.ack_p95_ms, 1000);
    }

    #[test]
    fn window_bounds_sample_count() {
        let telemetry = InlineTelemetry::new(3);
        for ms in [1, 2, 3, 4, 5] {
            telemetry.record_ack_latency(TriggerType::PrivatePhoto, ms);
        }
        let snap = telemetry.snapshot(Some(TriggerType::PrivatePhoto));
        assert_eq!(snap.sample_size, 3);
    }

    #[test]
    fn permission_block_alerting_scenario() {
        let telemetry = InlineTelemetry::new(50);
        telemetry.record_permission_block(TriggerType::ReplyMention, ChatType::Supergroup);
        telemetry.record_result_latency(TriggerType::ReplyMention, 15000);

        let snap = telemetry.snapshot(Some(TriggerType::ReplyMention));
        assert_eq!(snap.permission_blocks, 1);
        assert_eq!(snap.permission_blocks_by_chat.get("group"), Some(&1));
        assert!(snap.result_p95_ms >= 15000);
    }

    #[test]
    fn record_failure_tallies_by_reason() {
        let telemetry = InlineTelemetry::new(50);
        telemetry.record_failure(TriggerType::DirectMention, FailureReason::ModelError);
        telemetry.record_failure(TriggerType::DirectMention, FailureReason::ModelError);
        telemetry.record_failure(TriggerType::DirectMention, FailureReason::Timeout);

        let snap = telemetry.snapshot(Some(TriggerType::DirectMention));
        assert_eq!(snap.failure_reasons.get("model_error"), Some(&2));
        assert_eq!(snap.failure_reasons.get("timeout"), Some(&1));
    }

    #[test]
    fn accuracy_delta_is_mean_of_absolute_values() {
        let telemetry = InlineTelemetry::new(50);
        telemetry.record_accuracy_delta(TriggerType::PrivatePhoto, 5.0);
        telemetry.record_accuracy_delta(TriggerType::PrivatePhoto, -3.0);
        let snap = telemetry.snapshot(Some(TriggerType::PrivatePhoto));
        assert_eq!(snap.avg_accuracy_delta_pct, 4.0);
    }

    #[test]
    fn global_snapshot_aggregates_across_triggers() {
        let telemetry = InlineTelemetry::new(50);
        telemetry.record_permission_block(TriggerType::ReplyMention, ChatType::Supergroup);
        telemetry.record_permission_block(TriggerType::DirectMention, ChatType::Group);
        let snap = telemetry.snapshot(None);
        assert_eq!(snap.permission_blocks, 2);
    }

    #[test]
    fn reset_clears_all_state() {
        let telemetry = InlineTelemetry::new(50);
        telemetry.record_ack_latency(TriggerType::PrivatePhoto, 100);
        telemetry.reset();
        let snap = telemetry.snapshot(Some(TriggerType::PrivatePhoto));
        assert_eq!(snap.sample_size, 0);
    }
}
