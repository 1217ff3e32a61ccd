//! The scaling decision engine.

use std::time::Duration;

use qscale_core::{QueueDepth, ScalingConfig, ScalingDecision};

/// Map the observed queue depth and replica count to a decision.
///
/// Pure: the same inputs always produce the same decision. `since_last_action`
/// is `None` when the group has not acted since the process started, in
/// which case no cooldown applies.
pub fn decide(
    queue_depth: QueueDepth,
    current_replicas: u32,
    config: &ScalingConfig,
    since_last_action: Option<Duration>,
) -> ScalingDecision {
    if let Some(elapsed) = since_last_action
        && elapsed < config.cooldown_period()
    {
        return ScalingDecision::none(current_replicas);
    }

    if queue_depth > config.scale_up_queue_threshold && current_replicas < config.max_replicas {
        let target = current_replicas.saturating_add(1).min(config.max_replicas);
        return ScalingDecision::scale_up(target);
    }

    if queue_depth < config.scale_down_queue_threshold && current_replicas > config.min_replicas {
        let target = current_replicas.saturating_sub(1).max(config.min_replicas);
        return ScalingDecision::scale_down(target);
    }

    ScalingDecision::none(current_replicas)
}
