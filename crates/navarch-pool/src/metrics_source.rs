//! `MetricsSource`: the optional external collaborator that reports per-pool
//! job-queue depth to the queue and composite autoscalers (glossary:
//! "MetricsSource"). The scheduler/workload-queue integration itself is out
//! of scope for the core; this is the narrow pull interface the evaluation
//! loop calls each tick.

use async_trait::async_trait;

/// Pending and running job counts for one pool, as of the call.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueDepth {
    pub queued_jobs: u32,
    pub running_jobs: u32,
}

#[async_trait]
pub trait MetricsSource: Send + Sync + std::fmt::Debug {
    async fn queue_depth(&self, pool_name: &str) -> QueueDepth;
}

/// The default collaborator when no scheduler integration is configured:
/// every pool reports zero queue depth, which degrades the queue and
/// composite autoscalers to their other signals.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullMetricsSource;

#[async_trait]
impl MetricsSource for NullMetricsSource {
    async fn queue_depth(&self, _pool_name: &str) -> QueueDepth {
        QueueDepth::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_source_reports_zero() {
        let source = NullMetricsSource;
        let depth = source.queue_depth("training").await;
        assert_eq!(depth.queued_jobs, 0);
        assert_eq!(depth.running_jobs, 0);
    }
}
