//! Long-running service supervision.
//!
//! A [`Service`] is a named task that runs until its shutdown token fires.
//! The [`ServiceHost`] owns a set of services, propagates ctrl-c as a
//! cancellation, and bounds the drain time on the way out.

use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// A long-running unit of work with cooperative shutdown.
#[async_trait::async_trait]
pub trait Service: Send {
    fn name(&self) -> &'static str;

    /// Run until completion or until `shutdown` is cancelled.
    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()>;
}

/// Runs services concurrently until shutdown is requested.
pub struct ServiceHost {
    services: Vec<Box<dyn Service>>,
    drain_timeout: Duration,
}

impl ServiceHost {
    pub fn new() -> Self {
        Self {
            services: Vec::new(),
            drain_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_service(mut self, service: impl Service + 'static) -> Self {
        self.services.push(Box::new(service));
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Spawn all services, wait for ctrl-c, then cancel and drain.
    pub async fn run_until_shutdown(self) -> Result<()> {
        let shutdown = CancellationToken::new();
        let mut handles = Vec::with_capacity(self.services.len());

        for service in self.services {
            let name = service.name();
            let token = shutdown.clone();
            info!(service = name, "starting service");

            handles.push(tokio::spawn(async move {
                if let Err(e) = service.run(token).await {
                    error!(service = name, error = %e, "service exited with error");
                }
                name
            }));
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
            }
            _ = shutdown.cancelled() => {}
        }

        shutdown.cancel();

        let drain = futures::future::join_all(handles);
        match tokio::time::timeout(self.drain_timeout, drain).await {
            Ok(results) => {
                for result in results {
                    match result {
                        Ok(name) => info!(service = name, "service stopped"),
                        Err(e) => warn!(error = %e, "service task panicked"),
                    }
                }
            }
            Err(_) => warn!(
                timeout_sec = self.drain_timeout.as_secs(),
                "services did not drain before timeout"
            ),
        }

        Ok(())
    }
}

impl Default for ServiceHost {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TickOnce;

    #[async_trait::async_trait]
    impl Service for TickOnce {
        fn name(&self) -> &'static str {
            "tick-once"
        }

        async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
            shutdown.cancelled().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn services_stop_on_cancellation() {
        let shutdown = CancellationToken::new();
        let service = Box::new(TickOnce);
        let token = shutdown.clone();

        let handle = tokio::spawn(async move { service.run(token).await });
        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }
}
