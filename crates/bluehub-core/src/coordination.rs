//! State shared between the BLE and classic managers.
//!
//! The façade builds one [`Coordination`] and hands a clone to each manager.
//! It bundles:
//!
//! - the [`EntityCache`] both managers merge observations into,
//! - the [`EventBus`] lifecycle events go to,
//! - the [`DeviceQueue`] the façade drains into the entity store,
//! - the scan lock serializing discovery on a shared radio,
//! - the [`ScanGate`] used to pause and resume background discovery.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bluehub_types::BluetoothDevice;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::EntityCache;
use crate::events::{BluetoothEvent, EventBus, EventKind, Link};

/// Receiving end of the device queue, owned by the façade's main loop.
pub type DeviceReceiver = mpsc::UnboundedReceiver<BluetoothDevice>;

/// Devices whose state changed and should be persisted.
#[derive(Debug, Clone)]
pub struct DeviceQueue {
    tx: mpsc::UnboundedSender<BluetoothDevice>,
}

impl DeviceQueue {
    pub fn new() -> (Self, DeviceReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn push(&self, device: BluetoothDevice) {
        if self.tx.send(device).is_err() {
            debug!("Device queue closed, dropping update");
        }
    }
}

/// Pause/resume switch for background discovery.
///
/// Pausing never stops a manager; its loop simply waits on the gate before
/// the next pass. A pause or resume can carry a duration after which the
/// gate flips back by itself and posts the matching event.
pub struct ScanGate {
    enabled: watch::Sender<bool>,
    bus: Arc<dyn EventBus>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl ScanGate {
    /// A gate that starts enabled.
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        let (enabled, _) = watch::channel(true);
        Self {
            enabled,
            bus,
            timer: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        *self.enabled.borrow()
    }

    /// Resolves once discovery is enabled (immediately if it already is).
    pub async fn wait_enabled(&self) {
        let mut rx = self.enabled.subscribe();
        let _ = rx.wait_for(|enabled| *enabled).await;
    }

    /// Pause discovery, optionally resuming after `duration`.
    ///
    /// Must be called from within a Tokio runtime when `duration` is set.
    pub fn pause(self: &Arc<Self>, duration: Option<Duration>) {
        self.toggle(false, duration);
    }

    /// Resume discovery, optionally pausing again after `duration`.
    pub fn resume(self: &Arc<Self>, duration: Option<Duration>) {
        self.toggle(true, duration);
    }

    fn toggle(self: &Arc<Self>, enable: bool, duration: Option<Duration>) {
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = timer.take() {
            previous.abort();
        }
        self.set(enable, duration);

        if let Some(duration) = duration {
            let gate = Arc::downgrade(self);
            *timer = Some(tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                if let Some(gate) = gate.upgrade() {
                    gate.set(!enable, None);
                }
            }));
        }
    }

    fn set(&self, enable: bool, duration: Option<Duration>) {
        self.enabled.send_replace(enable);
        let duration_secs = duration.map(|d| d.as_secs());
        if enable {
            info!(?duration_secs, "Bluetooth scanning resumed");
            self.bus.post(BluetoothEvent::ScanResumed { duration_secs });
        } else {
            info!(?duration_secs, "Bluetooth scanning paused");
            self.bus.post(BluetoothEvent::ScanPaused { duration_secs });
        }
    }
}

impl Drop for ScanGate {
    fn drop(&mut self) {
        if let Some(timer) = self
            .timer
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            timer.abort();
        }
    }
}

/// Shared coordination context for both managers.
#[derive(Clone)]
pub struct Coordination {
    pub cache: Arc<EntityCache>,
    pub bus: Arc<dyn EventBus>,
    pub queue: DeviceQueue,
    /// Held for the whole of a discovery pass.
    pub scan_lock: Arc<tokio::sync::Mutex<()>>,
    pub scan_gate: Arc<ScanGate>,
}

impl Coordination {
    /// Build a fresh context and return the receiving end of its queue.
    pub fn new(bus: Arc<dyn EventBus>) -> (Self, DeviceReceiver) {
        let (queue, rx) = DeviceQueue::new();
        let coordination = Self {
            cache: Arc::new(EntityCache::new()),
            scan_gate: Arc::new(ScanGate::new(bus.clone())),
            bus,
            queue,
            scan_lock: Arc::new(tokio::sync::Mutex::new(())),
        };
        (coordination, rx)
    }

    /// Record a lifecycle transition.
    ///
    /// Merges `update` into the cache, posts the event carrying the merged
    /// record, then queues that record for persistence. The post and the
    /// push happen under the device's slot lock, so transitions of one
    /// device reach the bus and the queue in the same order.
    pub fn notify(&self, kind: EventKind, update: BluetoothDevice, link: Link) -> BluetoothDevice {
        let (device, ()) = self.cache.upsert_and_publish(
            update,
            |_, _| (),
            |device, _| {
                debug!(address = %device.address, ?kind, "Device transition");
                self.bus.post(kind.into_event(device.clone(), link));
                self.queue.push(device.clone());
            },
        );
        device
    }

    pub fn post(&self, event: BluetoothEvent) {
        self.bus.post(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventDispatcher;
    use bluehub_types::Address;

    fn setup() -> (Coordination, DeviceReceiver, EventDispatcher) {
        let dispatcher = EventDispatcher::new(16);
        let (coordination, rx) = Coordination::new(Arc::new(dispatcher.clone()));
        (coordination, rx, dispatcher)
    }

    #[tokio::test]
    async fn test_notify_posts_then_enqueues_merged_device() {
        let (coordination, mut rx, dispatcher) = setup();
        let mut events = dispatcher.subscribe();
        let addr: Address = "AA:BB:CC:DD:EE:FF".parse().unwrap();
        coordination.cache.add(BluetoothDevice::new(addr).with_name("Sensor1"));

        let mut update = BluetoothDevice::new(addr);
        update.connected = Some(true);
        let merged = coordination.notify(
            EventKind::Connected,
            update,
            Link {
                port: Some(1),
                service_uuid: None,
            },
        );

        assert_eq!(merged.name.as_deref(), Some("Sensor1"));
        match events.recv().await.unwrap() {
            BluetoothEvent::DeviceConnected { device, port, .. } => {
                assert_eq!(device, merged);
                assert_eq!(port, Some(1));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(rx.recv().await.unwrap(), merged);
    }

    #[test]
    fn test_concurrent_notifies_reach_bus_and_queue_in_same_order() {
        let dispatcher = EventDispatcher::new(512);
        let mut events = dispatcher.subscribe();
        let (coordination, mut rx) = Coordination::new(Arc::new(dispatcher));
        let coordination = Arc::new(coordination);
        let addr: Address = "AA:BB:CC:DD:EE:FF".parse().unwrap();

        let handles: Vec<_> = (0..4i16)
            .map(|i| {
                let coordination = coordination.clone();
                std::thread::spawn(move || {
                    for j in 0..25i16 {
                        let mut update = BluetoothDevice::new(addr);
                        update.rssi = Some(-(i * 25 + j));
                        coordination.notify(EventKind::Connected, update, Link::default());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut posted = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let BluetoothEvent::DeviceConnected { device, .. } = event {
                posted.push(device.rssi);
            }
        }
        let mut queued = Vec::new();
        while let Ok(device) = rx.try_recv() {
            queued.push(device.rssi);
        }
        assert_eq!(posted.len(), 100);
        assert_eq!(posted, queued);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_with_duration_auto_resumes() {
        let (coordination, _rx, dispatcher) = setup();
        let mut events = dispatcher.subscribe();
        let gate = coordination.scan_gate.clone();

        gate.pause(Some(Duration::from_secs(30)));
        assert!(!gate.is_enabled());
        assert_eq!(
            events.recv().await.unwrap(),
            BluetoothEvent::ScanPaused {
                duration_secs: Some(30)
            }
        );

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(!gate.is_enabled());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(gate.is_enabled());
        assert_eq!(
            events.recv().await.unwrap(),
            BluetoothEvent::ScanResumed {
                duration_secs: None
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_resume_cancels_pending_timer() {
        let (coordination, _rx, dispatcher) = setup();
        let mut events = dispatcher.subscribe();
        let gate = coordination.scan_gate.clone();

        gate.pause(Some(Duration::from_secs(10)));
        gate.resume(None);
        tokio::time::sleep(Duration::from_secs(20)).await;

        assert!(gate.is_enabled());
        assert!(matches!(events.recv().await.unwrap(), BluetoothEvent::ScanPaused { .. }));
        assert!(matches!(events.recv().await.unwrap(), BluetoothEvent::ScanResumed { .. }));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_wait_enabled_unblocks_on_resume() {
        let (coordination, _rx, _dispatcher) = setup();
        let gate = coordination.scan_gate.clone();
        gate.pause(None);

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_enabled().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        gate.resume(None);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
