//! Asset Stats Analyzer
//!
//! Background service that periodically recalculates the canonical asset
//! statistics from the per-exchange observations and writes them back in
//! fixed-size batches.

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use cryptomanager_core::{Asset, ExchangeAsset};

use crate::asset_stats::AssetStatsCalculator;
use crate::asset_storage::AssetStorageError;

/// Read side of the per-exchange observations
#[async_trait]
pub trait RawObservationSource: Send + Sync {
    async fn distinct_asset_ids(&self) -> Result<Vec<String>, AssetStorageError>;

    async fn observations_for(
        &self,
        asset_ids: &HashSet<String>,
    ) -> Result<Vec<ExchangeAsset>, AssetStorageError>;
}

/// Durable sink for canonical assets, keyed by asset id
#[async_trait]
pub trait AggregateStore: Send + Sync {
    async fn upsert_batch(&self, assets: &[Asset]) -> Result<(), AssetStorageError>;
}

/// Configuration for the asset stats analyzer
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Pause between two calculation cycles
    pub interval: Duration,
    /// Minimum time between two throughput log lines
    pub log_interval: Duration,
    /// Number of distinct assets calculated and written per batch
    pub batch_size: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            log_interval: Duration::from_secs(60),
            batch_size: 1000,
        }
    }
}

/// Outcome of a single calculation cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Distinct assets found in the observations
    pub assets: usize,
    pub batches: usize,
    pub failed_batches: usize,
    pub elapsed: Duration,
}

/// Background service recalculating canonical asset statistics
pub struct AssetStatsAnalyzer {
    source: Arc<dyn RawObservationSource>,
    store: Arc<dyn AggregateStore>,
    calculator: AssetStatsCalculator,
    config: AnalyzerConfig,
    last_log: parking_lot::Mutex<Option<Instant>>,
}

impl AssetStatsAnalyzer {
    pub fn new(
        source: Arc<dyn RawObservationSource>,
        store: Arc<dyn AggregateStore>,
        calculator: AssetStatsCalculator,
        config: AnalyzerConfig,
    ) -> Self {
        Self {
            source,
            store,
            calculator,
            config,
            last_log: parking_lot::Mutex::new(None),
        }
    }

    /// Run calculation cycles until `cancel` is cancelled
    ///
    /// A failing or panicking cycle is logged and the next cycle runs as
    /// scheduled. Cycles never overlap.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            "Starting asset stats analyzer with {}s interval",
            self.config.interval.as_secs()
        );

        while !cancel.is_cancelled() {
            match AssertUnwindSafe(self.run_once()).catch_unwind().await {
                Ok(Ok(report)) => self.log_throughput(&report),
                Ok(Err(e)) => error!("Error during asset stats calculation: {}", e),
                Err(_) => error!("Asset stats calculation panicked"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }

        info!("Asset stats analyzer stopped");
    }

    /// Run a single calculation cycle over all assets
    ///
    /// Failed or panicking batches are logged and counted; they don't stop the
    /// remaining batches.
    pub async fn run_once(&self) -> Result<CycleReport, AnalyzerError> {
        let started = Instant::now();
        let all_assets = self
            .source
            .distinct_asset_ids()
            .await
            .map_err(AnalyzerError::Source)?;

        let batch_size = self.config.batch_size.max(1);
        let mut report = CycleReport {
            assets: all_assets.len(),
            ..CycleReport::default()
        };

        for (index, chunk) in all_assets.chunks(batch_size).enumerate() {
            report.batches += 1;
            let outcome = AssertUnwindSafe(self.process_batch(chunk))
                .catch_unwind()
                .await;
            let error = match outcome {
                Ok(Ok(_)) => continue,
                Ok(Err(source)) => AnalyzerError::Batch {
                    batch: index,
                    assets: chunk.len(),
                    source,
                },
                Err(_) => AnalyzerError::BatchPanicked {
                    batch: index,
                    assets: chunk.len(),
                },
            };
            report.failed_batches += 1;
            warn!(batch = index, assets = chunk.len(), "{}", error);
        }

        report.elapsed = started.elapsed();
        Ok(report)
    }

    async fn process_batch(&self, asset_ids: &[String]) -> Result<usize, AssetStorageError> {
        let ids: HashSet<String> = asset_ids.iter().cloned().collect();
        let observations = self.source.observations_for(&ids).await?;

        let assets = self.calculator.calculate(&observations, Utc::now());
        self.store.upsert_batch(&assets).await?;

        debug!("Stored {} calculated assets", assets.len());
        Ok(assets.len())
    }

    fn log_throughput(&self, report: &CycleReport) {
        let mut last_log = self.last_log.lock();
        let due = last_log.map_or(true, |at| at.elapsed() > self.config.log_interval);
        if due {
            *last_log = Some(Instant::now());
            info!(
                "Asset calculation done in {}ms for {} items ({} of {} batches failed)",
                report.elapsed.as_millis(),
                report.assets,
                report.failed_batches,
                report.batches
            );
        }
    }
}

impl std::fmt::Debug for AssetStatsAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetStatsAnalyzer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Asset stats analyzer errors
#[derive(Debug, thiserror::Error)]
pub enum AnalyzerError {
    /// Aborts the whole cycle
    #[error("Failed to read asset observations: {0}")]
    Source(#[source] AssetStorageError),

    /// Only the affected batch is skipped
    #[error("Failed to process asset batch {batch} ({assets} assets): {source}")]
    Batch {
        batch: usize,
        assets: usize,
        #[source]
        source: AssetStorageError,
    },

    #[error("Asset batch {batch} ({assets} assets) panicked")]
    BatchPanicked { batch: usize, assets: usize },
}
