// file: src/monitor.rs
// version: 1.0.0
// guid: 4c8e1a72-b5d3-4f69-9e07-a2d6f3b8c510

//! Periodic patch and upload loop

use crate::config::MonitorConfig;
use crate::Result;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info};

/// Runs a cycle, then sleeps for the interval, until stopped
#[derive(Debug, Clone)]
pub struct Monitor {
    interval: Duration,
    max_cycles: Option<usize>,
}

impl Monitor {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            interval: config.interval,
            max_cycles: None,
        }
    }

    /// Run `cycle` repeatedly. A failed cycle is logged and the loop
    /// continues; returns the number of failed cycles once `max_cycles`
    /// is reached.
    pub async fn run<F, Fut>(&self, mut cycle: F) -> usize
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut failed = 0;
        let mut count = 0;
        loop {
            count += 1;
            info!("starting monitor cycle {}", count);
            match cycle(count).await {
                Ok(()) => info!("monitor cycle {} complete", count),
                Err(e) => {
                    failed += 1;
                    error!("monitor cycle {} failed: {}", count, e);
                }
            }

            if self.max_cycles.is_some_and(|max| count >= max) {
                return failed;
            }
            info!("next cycle in {} seconds", self.interval.as_secs());
            tokio::time::sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ImageSyncError;

    #[tokio::test]
    async fn test_failed_cycle_does_not_stop_monitor() {
        let monitor = Monitor {
            interval: Duration::from_millis(1),
            max_cycles: Some(3),
        };
        let mut seen = Vec::new();

        let failed = monitor
            .run(|cycle| {
                seen.push(cycle);
                async move {
                    if cycle == 2 {
                        Err(ImageSyncError::network("glance unreachable"))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert_eq!(failed, 1);
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn test_monitor_from_config() {
        let monitor = Monitor::new(&MonitorConfig {
            interval: Duration::from_secs(60),
        });
        assert_eq!(monitor.interval, Duration::from_secs(60));
        assert_eq!(monitor.max_cycles, None);
    }
}
