use crate::fault::FaultDetection;
use crate::recovery::collaborators::SelfHealingEngine;
use crate::recovery::{RecoveryError, RecoveryResult, RecoveryStrategy};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const SELF_HEALING: &str = "self_healing";

/// Lets an external self-healing engine take part in dispatch as the
/// lowest-priority strategy for every fault type.
pub struct SelfHealingAdapter {
    engine: Option<Arc<dyn SelfHealingEngine>>,
}

impl SelfHealingAdapter {
    pub fn new(engine: Option<Arc<dyn SelfHealingEngine>>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl RecoveryStrategy for SelfHealingAdapter {
    fn name(&self) -> &str {
        SELF_HEALING
    }

    fn can_handle(&self, _fault: &FaultDetection) -> bool {
        true
    }

    async fn recover(
        &self,
        fault: &FaultDetection,
        cancel: &CancellationToken,
    ) -> Result<RecoveryResult, RecoveryError> {
        let started = Instant::now();

        let Some(engine) = &self.engine else {
            return Ok(RecoveryResult::failed(
                fault.id(),
                self.name(),
                started,
                "self-healing engine not available",
            ));
        };

        let healing = match engine.heal_fault(fault, cancel).await {
            Ok(h) => h,
            Err(e) => {
                warn!(fault_id = %fault.id(), "Self-healing engine failed: {:#}", e);
                return Ok(RecoveryResult::failed(
                    fault.id(),
                    self.name(),
                    started,
                    format!("self-healing failed: {e:#}"),
                ))
            }
        };

        debug!(
            fault_id = %fault.id(),
            success = healing.success,
            confidence = healing.confidence,
            "Self-healing engine finished"
        );

        if !healing.success {
            return Ok(RecoveryResult::failed(
                fault.id(),
                self.name(),
                started,
                "self-healing unsuccessful",
            ));
        }

        Ok(RecoveryResult::succeeded(fault.id(), self.name(), started)
            .with_metadata("actions", healing.actions)
            .with_metadata("confidence", healing.confidence)
            .with_metadata("healing_duration", healing.duration.as_secs_f64()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::{FaultType, Metadata};
    use crate::recovery::collaborators::HealingResult;
    use std::io::Write;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Collects formatted log lines for assertions.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct FixedHealer {
        success: bool,
    }

    #[async_trait]
    impl SelfHealingEngine for FixedHealer {
        async fn heal_fault(&self, _fault: &FaultDetection, _cancel: &CancellationToken) -> anyhow::Result<HealingResult> {
            Ok(HealingResult {
                success: self.success,
                actions: vec!["drain_node".into(), "rebalance".into()],
                confidence: 0.85,
                duration: Duration::from_millis(1500),
            })
        }
    }

    struct BrokenHealer;

    #[async_trait]
    impl SelfHealingEngine for BrokenHealer {
        async fn heal_fault(&self, _fault: &FaultDetection, _cancel: &CancellationToken) -> anyhow::Result<HealingResult> {
            anyhow::bail!("healing loop wedged")
        }
    }

    fn fault() -> FaultDetection {
        FaultDetection::new(
            FaultType::ResourceExhaustion,
            FaultType::ResourceExhaustion.default_severity(),
            "gpu-node-3",
            "vram exhausted",
            Metadata::new(),
        )
    }

    #[tokio::test]
    async fn test_missing_engine_is_safe_no_op() {
        let adapter = SelfHealingAdapter::new(None);
        let result = adapter.recover(&fault(), &CancellationToken::new()).await.unwrap();
        assert!(!result.successful);
        assert_eq!(result.error.as_deref(), Some("self-healing engine not available"));
    }

    #[tokio::test]
    async fn test_success_propagates_healing_report() {
        let adapter = SelfHealingAdapter::new(Some(Arc::new(FixedHealer { success: true })));
        let result = adapter.recover(&fault(), &CancellationToken::new()).await.unwrap();
        assert!(result.successful);
        assert_eq!(result.metadata["actions"], serde_json::json!(["drain_node", "rebalance"]));
        assert_eq!(result.metadata["confidence"], 0.85);
        assert_eq!(result.metadata["healing_duration"], 1.5);
    }

    #[tokio::test]
    async fn test_unsuccessful_and_erroring_engines_fail() {
        let adapter = SelfHealingAdapter::new(Some(Arc::new(FixedHealer { success: false })));
        let result = adapter.recover(&fault(), &CancellationToken::new()).await.unwrap();
        assert!(!result.successful);
        assert!(result.metadata.is_empty());

        let adapter = SelfHealingAdapter::new(Some(Arc::new(BrokenHealer)));
        let result = adapter.recover(&fault(), &CancellationToken::new()).await.unwrap();
        assert!(!result.successful);
        assert!(result.error.unwrap().contains("healing loop wedged"));
    }

    #[test]
    fn test_engine_error_is_logged_at_warn() {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .with_writer(move || writer.clone())
            .finish();

        let f = fault();
        let result = tracing::subscriber::with_default(subscriber, || {
            tokio_test::block_on(SelfHealingAdapter::new(Some(Arc::new(BrokenHealer))).recover(&f, &CancellationToken::new()))
        })
        .unwrap();
        assert!(!result.successful);

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("WARN"));
        assert!(output.contains("Self-healing engine failed: healing loop wedged"));
        assert!(output.contains(&f.id().to_string()));
    }
}
