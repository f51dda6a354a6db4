//! Engine: event intake, the dispatch worker, and graceful shutdown.
//!
//! The store owns every state change; the engine supplies the clock, the
//! follow-up policy and the transport, and drives the periodic dispatch loop.

mod dispatch;
mod events;

#[cfg(test)]
mod tests;

pub use dispatch::TickReport;

use crate::api;
use leadflow_core::{
    config::{ApiConfig, Config, DispatchConfig},
    traits::Transport,
};
use leadflow_store::{DeliveryLog, FollowUpPolicy, Store};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// The lead lifecycle engine.
pub struct Engine {
    store: Store,
    transport: Arc<dyn Transport>,
    delivery_log: DeliveryLog,
    policy: FollowUpPolicy,
    dispatch: DispatchConfig,
    reminders_enabled: bool,
    /// Held for the whole of a tick so ticks never overlap.
    tick_lock: Mutex<()>,
}

impl Engine {
    pub fn new(store: Store, transport: Arc<dyn Transport>, config: &Config) -> Self {
        let delivery_log = DeliveryLog::new(store.pool().clone());
        Self {
            store,
            transport,
            delivery_log,
            policy: FollowUpPolicy::from_config(&config.followup),
            dispatch: config.dispatch.clone(),
            reminders_enabled: config.reminder.enabled,
            tick_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn delivery_log(&self) -> &DeliveryLog {
        &self.delivery_log
    }

    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    /// Run the dispatch worker and the API until Ctrl-C.
    pub async fn run(self: Arc<Self>, api_config: ApiConfig) -> anyhow::Result<()> {
        info!(
            "leadflow engine starting (transport: {}, poll every {}s)",
            self.transport.name(),
            self.dispatch.poll_interval_secs
        );

        let dispatch_handle = if self.dispatch.enabled {
            let engine = Arc::clone(&self);
            Some(tokio::spawn(async move {
                engine.dispatch_loop().await;
            }))
        } else {
            info!("dispatch worker disabled");
            None
        };

        let api_handle = if api_config.enabled {
            let engine = Arc::clone(&self);
            Some(tokio::spawn(async move {
                api::serve(api_config, engine).await;
            }))
        } else {
            None
        };

        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal"),
            Err(e) => error!("failed to listen for shutdown signal: {e}"),
        }

        self.shutdown(dispatch_handle, api_handle).await;
        Ok(())
    }

    /// Background task: one dispatch tick every `poll_interval_secs`.
    async fn dispatch_loop(&self) {
        let poll = Duration::from_secs(self.dispatch.poll_interval_secs);
        loop {
            tokio::time::sleep(poll).await;
            let report = self.run_tick(chrono::Utc::now()).await;
            if report.due > 0 || report.errors > 0 {
                info!("dispatch tick: {report}");
            }
        }
    }

    /// Stop background tasks. An in-flight tick is dropped mid-item; the
    /// row stays due and is picked up on the next start.
    async fn shutdown(
        &self,
        dispatch_handle: Option<JoinHandle<()>>,
        api_handle: Option<JoinHandle<()>>,
    ) {
        info!("Shutting down...");
        if let Some(h) = dispatch_handle {
            h.abort();
        }
        if let Some(h) = api_handle {
            h.abort();
        }
        let _guard = self.tick_lock.lock().await;
        info!("Shutdown complete.");
    }
}
