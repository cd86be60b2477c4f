//! Periodic lifecycle sweep

use crate::config::SweepConfig;
use crate::error::DaemonResult;
use pledgebook_ledger::{StateTransitioner, SweepReport};
use std::future::Future;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};

pub struct SweepScheduler {
    transitioner: Arc<StateTransitioner>,
    config: SweepConfig,
}

impl SweepScheduler {
    pub fn new(transitioner: Arc<StateTransitioner>, config: SweepConfig) -> Self {
        Self {
            transitioner,
            config,
        }
    }

    /// Run a single sweep.
    pub async fn run_once(&self) -> DaemonResult<SweepReport> {
        Ok(self.transitioner.sweep_all().await?)
    }

    /// Sweep on every interval tick until `shutdown` resolves.
    ///
    /// A failed sweep is logged and the loop keeps going.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        if !self.config.enabled {
            tracing::info!("Sweep disabled; waiting for shutdown");
            shutdown.await;
            return;
        }

        let mut ticker = interval(Duration::from_secs(self.config.interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(interval_secs = self.config.interval_secs, "Scheduler started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        tracing::error!(error = %e, "Sweep failed");
                    }
                }
                _ = &mut shutdown => break,
            }
        }
        tracing::info!("Scheduler stopped");
    }
}
