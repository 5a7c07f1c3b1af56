//! 把结果样本写入 `metrics` 门面，由Prometheus导出器对外暴露

use std::net::SocketAddr;

use anyhow::Result;
use async_trait::async_trait;
use gateway_domain::{MetricsForwarder, Sample};
use gateway_errors::GatewayResult;
use metrics::{counter, gauge, Label};
use tracing::{debug, info};

/// 通过 `metrics` 门面转发样本
#[derive(Debug, Clone)]
pub struct PrometheusForwarder {
    prefix: String,
}

impl PrometheusForwarder {
    pub fn new<S: Into<String>>(prefix: S) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn metric_name(&self, sample: &Sample) -> String {
        if self.prefix.is_empty() {
            sample.name.clone()
        } else {
            format!("{}_{}", self.prefix, sample.name)
        }
    }

    /// 同步记录一批样本
    pub fn record(&self, samples: &[Sample]) {
        for sample in samples {
            let labels: Vec<Label> = sample
                .labels
                .iter()
                .map(|(k, v)| Label::new(k.clone(), v.clone()))
                .collect();
            gauge!(self.metric_name(sample), labels).set(sample.value);
        }
        counter!("gateway_forwarded_samples_total").increment(samples.len() as u64);
        debug!("转发了 {} 个样本", samples.len());
    }
}

impl Default for PrometheusForwarder {
    fn default() -> Self {
        Self::new("minion")
    }
}

#[async_trait]
impl MetricsForwarder for PrometheusForwarder {
    async fn forward(&self, samples: Vec<Sample>) -> GatewayResult<()> {
        self.record(&samples);
        Ok(())
    }
}

/// 安装全局Prometheus导出器，在给定地址上提供 /metrics
pub fn install_prometheus_exporter(bind_address: SocketAddr) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(bind_address)
        .install()
        .map_err(|e| anyhow::anyhow!("安装Prometheus导出器失败: {}", e))?;

    info!("Prometheus指标导出器已启动: {}", bind_address);
    Ok(())
}
