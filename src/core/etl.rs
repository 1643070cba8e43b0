use crate::core::Pipeline;
use crate::utils::error::Result;
use crate::utils::monitor::SystemMonitor;
use std::time::Instant;

pub struct EtlEngine<P: Pipeline> {
    pipeline: P,
    monitor: SystemMonitor,
}

impl<P: Pipeline> EtlEngine<P> {
    pub fn new(pipeline: P) -> Self {
        Self::new_with_monitoring(pipeline, false)
    }

    pub fn new_with_monitoring(pipeline: P, monitor_enabled: bool) -> Self {
        Self {
            pipeline,
            monitor: SystemMonitor::new(monitor_enabled),
        }
    }

    pub async fn run(&self) -> Result<String> {
        let stage = self.pipeline.name();
        let started = Instant::now();
        tracing::info!("🚀 Starting stage: {}", stage);
        self.monitor.log_stats("Start");

        // Extract
        tracing::info!("📥 [{}] Extracting...", stage);
        let extracted = self.pipeline.extract().await?;
        self.monitor.log_stats("Extract");

        // Transform
        tracing::info!("🔄 [{}] Transforming...", stage);
        let transformed = self.pipeline.transform(extracted).await?;
        self.monitor.log_stats("Transform");

        // Load
        tracing::info!("💾 [{}] Loading...", stage);
        let output_path = self.pipeline.load(transformed).await?;
        self.monitor.log_stats("Load");

        tracing::info!(
            "✅ Stage {} finished in {:.1}s, output: {}",
            stage,
            started.elapsed().as_secs_f64(),
            output_path
        );
        self.monitor.log_final_stats();

        Ok(output_path)
    }
}
