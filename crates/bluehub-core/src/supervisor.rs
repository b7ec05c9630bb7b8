//! Synchronous access to the async façade.
//!
//! [`TaskSupervisor`] owns one multi-threaded Tokio runtime. Synchronous
//! callers submit a future and block on its result for a bounded time; a
//! call that overruns is aborted and reported as [`Error::Timeout`].
//! [`BlockingBluetooth`] wraps a [`BluetoothPlugin`] with blocking versions
//! of every action.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use bluehub_types::BluetoothDevice;
use serde_json::Value;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::manager::ConnectOptions;
use crate::plugin::{BluetoothPlugin, BluetoothPluginBuilder, ScanRequest};

/// Extra time granted on top of an action's own timeouts.
const CALL_MARGIN: Duration = Duration::from_secs(5);

/// Bound on runtime shutdown when the supervisor is dropped.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TaskSupervisor {
    runtime: Option<Runtime>,
}

impl TaskSupervisor {
    /// Start a runtime whose worker threads are called `name`.
    pub fn new(name: &str) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name(name)
            .enable_all()
            .build()?;
        Ok(Self {
            runtime: Some(runtime),
        })
    }

    fn runtime(&self) -> Result<&Runtime> {
        self.runtime.as_ref().ok_or(Error::Cancelled)
    }

    pub fn handle(&self) -> Result<Handle> {
        Ok(self.runtime()?.handle().clone())
    }

    /// Run `future` on the runtime and wait up to `timeout` for its result.
    ///
    /// Must not be called from inside the supervisor's own runtime.
    pub fn call<F, T>(&self, operation: &str, timeout: Duration, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        let task = self.runtime()?.spawn(async move {
            let _ = tx.send(future.await);
        });

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                warn!(operation, ?timeout, "Blocking call timed out, aborting task");
                task.abort();
                Err(Error::timeout(operation, timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(Error::Cancelled),
        }
    }
}

impl Drop for TaskSupervisor {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            debug!("Shutting down supervisor runtime");
            runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
        }
    }
}

/// Blocking front end of a [`BluetoothPlugin`].
pub struct BlockingBluetooth {
    plugin: Arc<BluetoothPlugin>,
    supervisor: TaskSupervisor,
}

impl BlockingBluetooth {
    pub fn new(builder: BluetoothPluginBuilder) -> Result<Self> {
        let supervisor = TaskSupervisor::new("bluehub-worker")?;
        let plugin = Arc::new(builder.build()?);
        Ok(Self { plugin, supervisor })
    }

    pub fn plugin(&self) -> &Arc<BluetoothPlugin> {
        &self.plugin
    }

    fn connect_budget(&self, options: &ConnectOptions) -> Duration {
        let config = self.plugin.config();
        options.timeout.unwrap_or_else(|| config.connect_timeout())
            + config.scan_duration()
            + CALL_MARGIN
    }

    pub fn connect(&self, device: &str, options: ConnectOptions) -> Result<BluetoothDevice> {
        let plugin = Arc::clone(&self.plugin);
        let device = device.to_string();
        let budget = self.connect_budget(&options);
        self.supervisor.call("connect", budget, async move {
            plugin.connect(&device, &options).await
        })
    }

    pub fn disconnect(&self, device: &str, options: ConnectOptions) -> Result<()> {
        let plugin = Arc::clone(&self.plugin);
        let device = device.to_string();
        let budget = self.connect_budget(&options);
        self.supervisor.call("disconnect", budget, async move {
            plugin.disconnect(&device, &options).await
        })
    }

    pub fn read(
        &self,
        device: &str,
        options: ConnectOptions,
        size: Option<usize>,
    ) -> Result<Vec<u8>> {
        let plugin = Arc::clone(&self.plugin);
        let device = device.to_string();
        let budget = self.connect_budget(&options) * 2;
        self.supervisor.call("read", budget, async move {
            plugin.read(&device, &options, size).await
        })
    }

    pub fn write(&self, device: &str, data: Vec<u8>, options: ConnectOptions) -> Result<()> {
        let plugin = Arc::clone(&self.plugin);
        let device = device.to_string();
        let budget = self.connect_budget(&options) * 2;
        self.supervisor.call("write", budget, async move {
            plugin.write(&device, &data, &options).await
        })
    }

    pub fn scan(&self, request: ScanRequest) -> Result<Vec<BluetoothDevice>> {
        let plugin = Arc::clone(&self.plugin);
        let budget = request
            .duration
            .unwrap_or_else(|| plugin.config().scan_duration())
            + plugin.config().service_discovery_timeout()
            + CALL_MARGIN;
        self.supervisor
            .call("scan", budget, async move { plugin.scan(request).await })
    }

    pub fn status(&self, devices: Vec<String>) -> Result<Vec<BluetoothDevice>> {
        let plugin = Arc::clone(&self.plugin);
        let budget = plugin.config().scan_duration()
            + plugin.config().service_discovery_timeout()
            + CALL_MARGIN;
        self.supervisor
            .call("status", budget, async move { plugin.status(&devices).await })
    }

    pub fn scan_pause(&self, duration: Option<Duration>) -> Result<()> {
        let plugin = Arc::clone(&self.plugin);
        self.supervisor.call("scan_pause", CALL_MARGIN, async move {
            plugin.scan_pause(duration);
            Ok(())
        })
    }

    pub fn scan_resume(&self, duration: Option<Duration>) -> Result<()> {
        let plugin = Arc::clone(&self.plugin);
        self.supervisor.call("scan_resume", CALL_MARGIN, async move {
            plugin.scan_resume(duration);
            Ok(())
        })
    }

    pub fn set(&self, device: &str, value: Value) -> Result<BluetoothDevice> {
        let plugin = Arc::clone(&self.plugin);
        let device = device.to_string();
        let budget = self.connect_budget(&ConnectOptions::new()) * 2;
        self.supervisor
            .call("set", budget, async move { plugin.set(&device, &value).await })
    }

    /// Blocks for as long as the transfer takes, bounded by `timeout`.
    pub fn send_file(
        &self,
        device: &str,
        path: PathBuf,
        options: ConnectOptions,
        timeout: Duration,
    ) -> Result<()> {
        let plugin = Arc::clone(&self.plugin);
        let device = device.to_string();
        self.supervisor.call("send_file", timeout, async move {
            plugin.send_file(&device, &path, &options).await
        })
    }

    /// Start the background loops on the supervisor's runtime.
    pub fn start(&self) -> Result<()> {
        let plugin = Arc::clone(&self.plugin);
        self.supervisor
            .call("start", CALL_MARGIN, async move { plugin.start().await })
    }

    pub fn stop(&self) -> Result<()> {
        let plugin = Arc::clone(&self.plugin);
        let config = plugin.config();
        let budget = (config.disconnect_timeout() + config.scan_duration()) * 3 + CALL_MARGIN;
        self.supervisor.call("stop", budget, async move {
            plugin.stop().await;
            Ok(())
        })
    }

    pub fn should_stop(&self) -> bool {
        self.plugin.should_stop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_returns_result() {
        let supervisor = TaskSupervisor::new("test-worker").unwrap();
        let value = supervisor
            .call("answer", Duration::from_secs(1), async { Ok(42) })
            .unwrap();
        assert_eq!(value, 42);

        let err = supervisor
            .call::<_, ()>("fail", Duration::from_secs(1), async {
                Err(Error::transport("boom"))
            })
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[test]
    fn test_call_times_out() {
        let supervisor = TaskSupervisor::new("test-worker").unwrap();
        let err = supervisor
            .call("sleepy", Duration::from_millis(50), async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }
}
