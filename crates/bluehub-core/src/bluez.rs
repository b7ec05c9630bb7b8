//! Force-disconnect through the BlueZ system bus.
//!
//! When a link is owned by another process (or by the OS after a previous
//! crash), no in-process session exists to close. On Linux the device can
//! still be dropped by calling `org.bluez.Device1.Disconnect` on its object
//! path. Other platforms report [`Error::Unsupported`].

use bluehub_types::Address;

use crate::error::{Error, Result};

/// Adapter used when none is configured.
pub const DEFAULT_INTERFACE: &str = "hci0";

/// BlueZ object path of a device, e.g. `/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF`.
pub fn device_path(interface: &str, address: Address) -> String {
    format!(
        "/org/bluez/{}/dev_{}",
        interface,
        address.to_string().replace(':', "_")
    )
}

/// Ask BlueZ to disconnect `address` on `interface` (default `hci0`).
#[cfg(target_os = "linux")]
pub async fn disconnect_device(address: Address, interface: Option<&str>) -> Result<()> {
    let path = device_path(interface.unwrap_or(DEFAULT_INTERFACE), address);
    tokio::task::spawn_blocking(move || linux::disconnect(&path))
        .await
        .map_err(|e| Error::transport(format!("D-Bus task failed: {e}")))?
}

#[cfg(not(target_os = "linux"))]
pub async fn disconnect_device(address: Address, _interface: Option<&str>) -> Result<()> {
    Err(Error::unsupported(format!(
        "cannot force-disconnect {address}: system bus disconnect is only available with BlueZ"
    )))
}

#[cfg(target_os = "linux")]
mod linux {
    use std::time::Duration;

    use dbus::blocking::Connection;
    use tracing::{debug, info};

    use crate::error::{Error, Result};

    const BLUEZ_SERVICE: &str = "org.bluez";
    const DEVICE_INTERFACE: &str = "org.bluez.Device1";

    pub(super) fn disconnect(path: &str) -> Result<()> {
        let object = dbus::Path::new(path)
            .map_err(|_| Error::unsupported(format!("'{path}' is not a BlueZ device path")))?;
        let conn = Connection::new_system()
            .map_err(|e| Error::transport(format!("system bus unavailable: {e}")))?;
        let proxy = conn.with_proxy(BLUEZ_SERVICE, object, Duration::from_secs(5));

        debug!(path, "Calling Device1.Disconnect");
        proxy
            .method_call::<(), _, _, _>(DEVICE_INTERFACE, "Disconnect", ())
            .map_err(|e| map_error(path, e))?;
        info!(path, "Disconnected through BlueZ");
        Ok(())
    }

    fn map_error(path: &str, err: dbus::Error) -> Error {
        match err.name() {
            Some("org.freedesktop.DBus.Error.UnknownObject")
            | Some("org.freedesktop.DBus.Error.UnknownMethod")
            | Some("org.bluez.Error.DoesNotExist") => {
                Error::unsupported(format!("'{path}' is not a BlueZ device path"))
            }
            Some("org.bluez.Error.NotConnected") => Error::NotConnected(path.to_string()),
            _ => Error::transport(format!(
                "BlueZ disconnect of {path} failed: {}",
                err.message().unwrap_or("unknown error")
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_path() {
        let addr: Address = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        assert_eq!(
            device_path("hci0", addr),
            "/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF"
        );
    }
}
