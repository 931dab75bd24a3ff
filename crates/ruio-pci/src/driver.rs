//! Driver registration: an explicit owned object, not module-global state.
//!
//! A [`DriverRegistration`] owns the claim table and every device it has attached;
//! dropping it (or calling [`shutdown`](DriverRegistration::shutdown)) detaches them
//! all. Hosts call [`probe`](DriverRegistration::probe) for candidate functions and
//! [`remove`](DriverRegistration::remove) when a function goes away.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::info;

use ruio_platform::{IrqDispatcher, PciFunction, PciVendorDeviceId};

use crate::device::UioPciDevice;
use crate::error::ProbeError;
use crate::intr::PreferredMode;

pub struct DriverRegistration<F: PciFunction + IrqDispatcher + 'static> {
    name: &'static str,
    id_table: &'static [PciVendorDeviceId],
    preferred: PreferredMode,
    devices: Mutex<Vec<Arc<UioPciDevice<F>>>>,
}

impl<F: PciFunction + IrqDispatcher + 'static> DriverRegistration<F> {
    /// Registers the driver with its static claim table and interrupt-mode preference.
    pub fn register(
        name: &'static str,
        id_table: &'static [PciVendorDeviceId],
        preferred: PreferredMode,
    ) -> Self {
        info!(name, ids = id_table.len(), "driver registered");
        Self {
            name,
            id_table,
            preferred,
            devices: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the driver's claim table lists the given identity.
    pub fn claims(&self, id: PciVendorDeviceId) -> bool {
        self.id_table.contains(&id)
    }

    fn devices(&self) -> MutexGuard<'_, Vec<Arc<UioPciDevice<F>>>> {
        self.devices.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Probe entry point: attaches the function if the claim table lists it.
    ///
    /// Fatal attach errors propagate to the caller as-is; a failed probe leaves no
    /// trace in the registration.
    pub fn probe(&self, function: Arc<F>) -> Result<Arc<UioPciDevice<F>>, ProbeError> {
        let id = function.vendor_device();
        if !self.claims(id) {
            return Err(ProbeError::NotClaimed {
                vendor_id: id.vendor_id,
                device_id: id.device_id,
            });
        }
        let device = UioPciDevice::attach(function, self.preferred)?;
        self.devices().push(Arc::clone(&device));
        Ok(device)
    }

    /// Remove entry point: detaches the device and forgets it.
    pub fn remove(&self, device: &Arc<UioPciDevice<F>>) {
        device.detach();
        self.devices().retain(|held| !Arc::ptr_eq(held, device));
    }

    /// Unregisters the driver, detaching every device it still holds.
    pub fn shutdown(self) {
        // Drop does the actual work; consuming self makes the teardown explicit at the
        // call site.
    }
}

impl<F: PciFunction + IrqDispatcher + 'static> Drop for DriverRegistration<F> {
    fn drop(&mut self) {
        let devices = std::mem::take(&mut *self.devices());
        for device in &devices {
            device.detach();
        }
        info!(name = self.name, "driver unregistered");
    }
}
