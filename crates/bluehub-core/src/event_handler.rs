//! Turns raw device observations into lifecycle events.
//!
//! Each observation is compared against the cached record through a fixed
//! table of predicates. Whatever fires, the observation is merged into the
//! cache; the merged record is queued for persistence only when at least
//! one event fired, so repeated identical advertisements cost nothing
//! downstream.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use bluehub_types::{Address, BluetoothDevice};
use time::OffsetDateTime;

use crate::coordination::Coordination;
use crate::events::{EventKind, Link};

type Matcher = fn(Option<&BluetoothDevice>, &BluetoothDevice) -> bool;

const MATCHERS: &[(EventKind, Matcher)] = &[
    (EventKind::Connected, is_connected),
    (EventKind::Disconnected, is_disconnected),
    (EventKind::Found, is_found),
];

fn is_connected(prior: Option<&BluetoothDevice>, new: &BluetoothDevice) -> bool {
    prior.is_some_and(|p| p.connected != Some(true) && new.connected == Some(true))
}

fn is_disconnected(prior: Option<&BluetoothDevice>, new: &BluetoothDevice) -> bool {
    prior.is_some_and(|p| p.connected == Some(true) && new.connected == Some(false))
}

fn is_found(prior: Option<&BluetoothDevice>, new: &BluetoothDevice) -> bool {
    match prior {
        None => true,
        Some(p) => p.reachable != Some(true) && new.reachable == Some(true),
    }
}

fn signal_changed(prior: Option<&BluetoothDevice>, new: &BluetoothDevice) -> bool {
    let Some(prior) = prior else {
        return false;
    };
    let rssi_changed = new.rssi.is_some() && new.rssi != prior.rssi;
    let tx_changed = new.tx_power.is_some() && new.tx_power != prior.tx_power;
    rssi_changed || tx_changed
}

/// Event decision logic shared by both managers.
pub struct EventHandler {
    coordination: Coordination,
    signal_interval: time::Duration,
    last_signal: Mutex<HashMap<Address, OffsetDateTime>>,
}

impl EventHandler {
    pub fn new(coordination: Coordination, signal_interval: Duration) -> Self {
        Self {
            coordination,
            signal_interval: time::Duration::try_from(signal_interval)
                .unwrap_or(time::Duration::seconds(30)),
            last_signal: Mutex::new(HashMap::new()),
        }
    }

    /// Process an observation made now. Returns the merged record and the
    /// events that fired.
    pub fn handle(&self, candidate: BluetoothDevice) -> (BluetoothDevice, Vec<EventKind>) {
        self.handle_at(candidate, OffsetDateTime::now_utc())
    }

    /// Process an observation made at `now`.
    pub fn handle_at(
        &self,
        mut candidate: BluetoothDevice,
        now: OffsetDateTime,
    ) -> (BluetoothDevice, Vec<EventKind>) {
        candidate.updated_at = Some(now);
        let address = candidate.address;

        self.coordination.cache.upsert_and_publish(
            candidate,
            |prior, new| {
                let mut fired: Vec<EventKind> = MATCHERS
                    .iter()
                    .filter(|(_, matches)| matches(prior, new))
                    .map(|(kind, _)| *kind)
                    .collect();
                if prior.is_some() && signal_changed(prior, new) && self.signal_due(address, now) {
                    fired.push(EventKind::SignalUpdate);
                }
                fired
            },
            |merged, fired| {
                if fired.is_empty() {
                    return;
                }
                for kind in fired {
                    self.coordination
                        .post(kind.into_event(merged.clone(), Link::default()));
                }
                self.coordination.queue.push(merged.clone());
            },
        )
    }

    /// Claims the signal-update slot for `address` if the throttle allows.
    fn signal_due(&self, address: Address, now: OffsetDateTime) -> bool {
        let mut last = self
            .last_signal
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match last.get(&address) {
            Some(prev) if now - *prev < self.signal_interval => false,
            _ => {
                last.insert(address, now);
                true
            }
        }
    }
}
