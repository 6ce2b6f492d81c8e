//! RadioSystem - registry of managed radios
//!
//! Discovery is external; it reports what it sees through
//! [`RadioSystem::on_device_found`] and [`RadioSystem::on_device_still_alive`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use fsapi_transport::{HttpTransport, Transport};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{Radio, RadioConfig, SdkError};

#[derive(Default)]
struct Registry {
    radios: HashMap<String, Radio>,
    /// Addresses currently bootstrapping
    pending: HashSet<String>,
}

/// Clears a pending address if bootstrap is abandoned mid-flight
struct PendingGuard<'a> {
    registry: &'a Mutex<Registry>,
    address: &'a str,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!(address = %self.address, "bootstrap cancelled");
            self.registry.lock().pending.remove(self.address);
        }
    }
}

/// Address-keyed set of radios sharing one transport and config
///
/// # Example
///
/// ```rust,ignore
/// use radio_sdk::{RadioConfig, RadioSystem};
///
/// let system = RadioSystem::new(RadioConfig::default())?;
/// if let Some(radio) = system.on_device_found("192.168.1.40", "Kitchen").await? {
///     println!("{} is {:?}", radio.name, radio.get_property("power")?);
/// }
/// ```
pub struct RadioSystem {
    config: RadioConfig,
    transport: Arc<dyn Transport>,
    registry: Mutex<Registry>,
}

impl RadioSystem {
    pub fn new(config: RadioConfig) -> Result<Self, SdkError> {
        config.validate()?;
        let transport = Arc::new(HttpTransport::with_config(config.transport_config())?);
        Ok(Self::with_transport(config, transport))
    }

    pub fn with_transport(config: RadioConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            registry: Mutex::new(Registry::default()),
        }
    }

    pub fn config(&self) -> &RadioConfig {
        &self.config
    }

    /// A radio was seen at `address`
    ///
    /// Returns the managed radio, or `None` while another call is already
    /// bootstrapping the same address or when the address was removed
    /// before bootstrap finished.
    pub async fn on_device_found(
        &self,
        address: &str,
        advertised_name: &str,
    ) -> Result<Option<Radio>, SdkError> {
        {
            let mut registry = self.registry.lock();
            if let Some(radio) = registry.radios.get(address) {
                return Ok(Some(radio.clone()));
            }
            if !registry.pending.insert(address.to_string()) {
                debug!(%address, "bootstrap already in progress");
                return Ok(None);
            }
        }

        let mut guard = PendingGuard {
            registry: &self.registry,
            address,
            armed: true,
        };

        let result =
            Radio::with_transport(self.transport.clone(), address, advertised_name, &self.config)
                .await;

        guard.armed = false;
        let mut registry = self.registry.lock();
        let still_wanted = registry.pending.remove(address);

        match result {
            Ok(radio) if still_wanted => {
                info!(%address, id = %radio.id, "radio added");
                registry.radios.insert(address.to_string(), radio.clone());
                Ok(Some(radio))
            }
            Ok(radio) => {
                radio.stop();
                Ok(None)
            }
            Err(e) => {
                warn!(%address, error = %e, "radio bootstrap failed");
                Err(e)
            }
        }
    }

    /// Liveness probe: reconnect the radio at `address` if it is down
    ///
    /// Returns whether a radio is managed at that address.
    pub async fn on_device_still_alive(&self, address: &str) -> Result<bool, SdkError> {
        let Some(radio) = self.get(address) else {
            return Ok(false);
        };

        if !radio.is_connected() {
            debug!(%address, "reviving radio");
            radio.revive().await?;
        }
        Ok(true)
    }

    /// Stop and forget the radio at `address`
    pub fn remove_device(&self, address: &str) -> bool {
        let mut registry = self.registry.lock();
        let was_pending = registry.pending.remove(address);

        match registry.radios.remove(address) {
            Some(radio) => {
                // Stopped under the lock so no probe can revive it in between
                radio.stop();
                info!(%address, "radio removed");
                true
            }
            None => was_pending,
        }
    }

    pub fn get(&self, address: &str) -> Option<Radio> {
        self.registry.lock().radios.get(address).cloned()
    }

    /// Like [`RadioSystem::get`], as an error when nothing is managed there
    pub fn radio(&self, address: &str) -> Result<Radio, SdkError> {
        self.get(address)
            .ok_or_else(|| SdkError::DeviceNotFound(address.to_string()))
    }

    pub fn get_by_id(&self, id: &str) -> Option<Radio> {
        self.registry
            .lock()
            .radios
            .values()
            .find(|radio| radio.id == id)
            .cloned()
    }

    pub fn radios(&self) -> Vec<Radio> {
        self.registry.lock().radios.values().cloned().collect()
    }

    pub fn addresses(&self) -> Vec<String> {
        self.registry.lock().radios.keys().cloned().collect()
    }
}

impl Drop for RadioSystem {
    fn drop(&mut self) {
        for radio in self.registry.get_mut().radios.values() {
            radio.stop();
        }
    }
}
