//! 采集结果入库
//!
//! 把Minion上报的监控和发现结果转换成带标签的样本交给指标转发器。
//! 转发失败只记日志，不影响上报连接。

use std::sync::Arc;

use gateway_domain::{DetectorResult, MetricsForwarder, MonitorResult, Sample, ECHO_MONITOR_TYPE};
use tracing::{debug, warn};

pub const RESPONSE_TIME_METRIC: &str = "response_time_msec";
pub const DETECTOR_STATUS_METRIC: &str = "detector_status";

pub struct ResultSink {
    forwarder: Arc<dyn MetricsForwarder>,
}

impl ResultSink {
    pub fn new(forwarder: Arc<dyn MetricsForwarder>) -> Self {
        Self { forwarder }
    }

    pub async fn consume_monitor_result(&self, tenant_id: &str, result: &MonitorResult) {
        if result.monitor_type == ECHO_MONITOR_TYPE {
            debug!("跳过来自 {} 的ECHO监控结果", result.system_id);
            return;
        }

        let labeled = |name: &str, value: f64| {
            let sample = Sample::new(name, value, result.timestamp)
                .with_label("tenant", tenant_id)
                .with_label("location", result.location.as_str())
                .with_label("system_id", result.system_id.as_str())
                .with_label("monitor_type", result.monitor_type.as_str())
                .with_label("status", result.status.as_str());
            match &result.node_id {
                Some(node_id) => sample.with_label("node_id", node_id.as_str()),
                None => sample,
            }
        };

        let mut samples = vec![labeled(RESPONSE_TIME_METRIC, result.response_time_ms)];
        samples.extend(
            result
                .metrics
                .iter()
                .map(|(name, value)| labeled(name.as_str(), *value)),
        );

        self.forward(samples, "监控").await;
    }

    pub async fn consume_detector_result(&self, tenant_id: &str, result: &DetectorResult) {
        let labeled = |name: &str, value: f64| {
            let sample = Sample::new(name, value, result.timestamp)
                .with_label("tenant", tenant_id)
                .with_label("location", result.location.as_str())
                .with_label("system_id", result.system_id.as_str())
                .with_label("detector_type", result.detector_type.as_str());
            match &result.node_id {
                Some(node_id) => sample.with_label("node_id", node_id.as_str()),
                None => sample,
            }
        };

        let status = if result.detected { 1.0 } else { 0.0 };
        let mut samples = vec![labeled(DETECTOR_STATUS_METRIC, status)];
        samples.extend(
            result
                .metrics
                .iter()
                .map(|(name, value)| labeled(name.as_str(), *value)),
        );

        self.forward(samples, "发现").await;
    }

    async fn forward(&self, samples: Vec<Sample>, kind: &str) {
        let count = samples.len();
        match self.forwarder.forward(samples).await {
            Ok(()) => debug!("转发 {} 个{}样本", count, kind),
            Err(e) => warn!("转发{}结果失败，丢弃 {} 个样本: {}", kind, count, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gateway_errors::{GatewayError, GatewayResult};
    use gateway_testing_utils::{detector_result, MonitorResultBuilder, RecordingForwarder};
    use mockall::mock;

    mock! {
        Forwarder {}

        #[async_trait]
        impl MetricsForwarder for Forwarder {
            async fn forward(&self, samples: Vec<Sample>) -> GatewayResult<()>;
        }
    }

    #[tokio::test]
    async fn test_monitor_result_becomes_labeled_samples() {
        let forwarder = RecordingForwarder::new();
        let sink = ResultSink::new(Arc::new(forwarder.clone()));
        let result = MonitorResultBuilder::new("loc1", "m1")
            .with_response_time(12.5)
            .with_metric("packets_lost", 0.0)
            .build();

        sink.consume_monitor_result("t1", &result).await;

        let samples = forwarder.samples();
        assert_eq!(samples.len(), 2);
        let response_time = &samples[0];
        assert_eq!(response_time.name, RESPONSE_TIME_METRIC);
        assert_eq!(response_time.value, 12.5);
        assert_eq!(response_time.label("tenant"), Some("t1"));
        assert_eq!(response_time.label("location"), Some("loc1"));
        assert_eq!(response_time.label("system_id"), Some("m1"));
        assert_eq!(response_time.label("monitor_type"), Some("ICMP"));
        assert_eq!(samples[1].name, "packets_lost");
    }

    #[tokio::test]
    async fn test_echo_results_are_not_forwarded() {
        let mut forwarder = MockForwarder::new();
        forwarder.expect_forward().never();
        let sink = ResultSink::new(Arc::new(forwarder));

        let result = MonitorResultBuilder::new("loc1", "m1")
            .with_monitor_type(ECHO_MONITOR_TYPE)
            .build();
        sink.consume_monitor_result("t1", &result).await;
    }

    #[tokio::test]
    async fn test_detector_result_status_sample() {
        let forwarder = RecordingForwarder::new();
        let sink = ResultSink::new(Arc::new(forwarder.clone()));

        sink.consume_detector_result("t1", &detector_result("loc1", "m1", true))
            .await;
        sink.consume_detector_result("t1", &detector_result("loc1", "m1", false))
            .await;

        let samples = forwarder.samples();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].name, DETECTOR_STATUS_METRIC);
        assert_eq!(samples[0].value, 1.0);
        assert_eq!(samples[1].value, 0.0);
        assert_eq!(samples[0].label("detector_type"), Some("SNMP"));
        assert_eq!(samples[0].label("node_id"), Some("node-1"));
    }

    #[tokio::test]
    async fn test_forwarding_failure_is_swallowed() {
        let mut forwarder = MockForwarder::new();
        forwarder
            .expect_forward()
            .times(1)
            .returning(|_| Err(GatewayError::transport_error("metrics store down")));
        let sink = ResultSink::new(Arc::new(forwarder));

        sink.consume_monitor_result("t1", &MonitorResultBuilder::new("loc1", "m1").build())
            .await;
    }
}
