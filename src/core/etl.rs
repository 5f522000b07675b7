use crate::core::Pipeline;
use crate::utils::error::Result;
use crate::utils::monitor::SystemMonitor;

/// Drives a pipeline through extract, transform and load.
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

    /// Returns the locations of every file written.
    pub fn run(&self) -> Result<Vec<String>> {
        tracing::info!("🚀 Starting conversion");
        self.monitor.log_stats("Start");

        // Extract
        tracing::info!("📥 Extracting records...");
        let documents = self.pipeline.extract()?;
        let record_count: usize = documents
            .iter()
            .flat_map(|d| d.categories.iter())
            .map(|c| c.records.len())
            .sum();
        tracing::info!(
            "Extracted {} records from {} documents",
            record_count,
            documents.len()
        );
        self.monitor.log_stats("Extract");

        // Transform
        tracing::info!("🔄 Assembling tables...");
        let result = self.pipeline.transform(documents)?;
        tracing::info!("Assembled {} tables", result.outputs.len());
        self.monitor.log_stats("Transform");

        // Load
        tracing::info!("💾 Writing tables...");
        let written = self.pipeline.load(result)?;
        for location in &written {
            tracing::debug!("Wrote {}", location);
        }
        self.monitor.log_stats("Load");
        self.monitor.log_final_stats();

        Ok(written)
    }
}
