//! Server-side logical device and its client restrictions

use crate::conformance::Conformance;
use crate::initiate::DEFAULT_MAX_PDU_SIZE;
use dlms_core::{DlmsError, DlmsResult};
use dlms_security::{SYSTEM_TITLE_LENGTH, SecuritySuite};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

pub const MAX_NAME_LENGTH: usize = 16;
pub const MANUFACTURER_ID_LENGTH: usize = 3;
/// Device ids occupy the last 5 octets of the system title
pub const MAX_DEVICE_ID: u64 = 0xFF_FFFF_FFFF;

/// Logical device reachable through the server
///
/// Each client id maps to its own [`SecuritySuite`] behind a dedicated
/// lock, so rotating one client's keys never blocks handshakes of other
/// clients. Handshakes work on a snapshot taken by
/// [`LogicalDevice::resolve_client`].
pub struct LogicalDevice {
    id: u16,
    name: String,
    manufacturer_id: [u8; MANUFACTURER_ID_LENGTH],
    device_id: u64,
    restrictions: HashMap<u16, Arc<RwLock<SecuritySuite>>>,
    conformance: Conformance,
    max_pdu_size: u16,
}

impl LogicalDevice {
    /// # Errors
    /// `Configuration` if the name is longer than 16 bytes, the
    /// manufacturer id is not 3 ASCII letters or the device id does not
    /// fit in 5 octets.
    pub fn new(id: u16, name: impl Into<String>, manufacturer_id: &str, device_id: u64) -> DlmsResult<Self> {
        let name = name.into();
        if name.len() > MAX_NAME_LENGTH {
            return Err(DlmsError::Configuration(format!(
                "Logical device name '{}' exceeds {} bytes",
                name, MAX_NAME_LENGTH
            )));
        }
        let manufacturer: [u8; MANUFACTURER_ID_LENGTH] = manufacturer_id
            .as_bytes()
            .try_into()
            .ok()
            .filter(|m: &[u8; MANUFACTURER_ID_LENGTH]| m.iter().all(u8::is_ascii_alphabetic))
            .ok_or_else(|| {
                DlmsError::Configuration(format!(
                    "Manufacturer id must be {} ASCII letters, got '{}'",
                    MANUFACTURER_ID_LENGTH, manufacturer_id
                ))
            })?;
        if device_id > MAX_DEVICE_ID {
            return Err(DlmsError::Configuration(format!(
                "Device id {} does not fit in 5 octets",
                device_id
            )));
        }

        Ok(Self {
            id,
            name,
            manufacturer_id: manufacturer,
            device_id,
            restrictions: HashMap::new(),
            conformance: Conformance::logical_name_default(),
            max_pdu_size: DEFAULT_MAX_PDU_SIZE,
        })
    }

    pub fn with_conformance(mut self, conformance: Conformance) -> Self {
        self.conformance = conformance;
        self
    }

    pub fn with_max_pdu_size(mut self, max_pdu_size: u16) -> Self {
        self.max_pdu_size = max_pdu_size;
        self
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn manufacturer_id(&self) -> &str {
        // validated as ASCII in `new`
        std::str::from_utf8(&self.manufacturer_id).unwrap_or_default()
    }

    pub fn device_id(&self) -> u64 {
        self.device_id
    }

    pub fn conformance(&self) -> Conformance {
        self.conformance
    }

    pub fn max_pdu_size(&self) -> u16 {
        self.max_pdu_size
    }

    /// Manufacturer id followed by the 5 low octets of the device id
    pub fn system_title(&self) -> [u8; SYSTEM_TITLE_LENGTH] {
        let mut title = [0u8; SYSTEM_TITLE_LENGTH];
        title[..MANUFACTURER_ID_LENGTH].copy_from_slice(&self.manufacturer_id);
        title[MANUFACTURER_ID_LENGTH..].copy_from_slice(&self.device_id.to_be_bytes()[3..]);
        title
    }

    /// Register the security suite a client must associate with
    ///
    /// # Errors
    /// `Configuration` if the client id already has a suite.
    pub fn add_restriction(&mut self, client_id: u16, suite: SecuritySuite) -> DlmsResult<()> {
        if self.restrictions.contains_key(&client_id) {
            return Err(DlmsError::Configuration(format!(
                "Client {} is already registered on logical device {}",
                client_id, self.id
            )));
        }
        self.restrictions.insert(client_id, Arc::new(RwLock::new(suite)));
        Ok(())
    }

    pub fn client_ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.restrictions.keys().copied()
    }

    /// Snapshot of the suite registered for `client_id`
    ///
    /// `None` means the client is unknown; callers must treat that as an
    /// authentication failure.
    pub fn resolve_client(&self, client_id: u16) -> Option<SecuritySuite> {
        let entry = self.restrictions.get(&client_id)?;
        let suite = entry.read().unwrap_or_else(PoisonError::into_inner);
        Some(suite.clone())
    }

    /// Run `update` with exclusive access to one client's suite
    ///
    /// Staged keys left behind by a failing `update` are discarded, so the
    /// suite keeps its previous keys.
    pub fn update_keys<F>(&self, client_id: u16, update: F) -> DlmsResult<()>
    where
        F: FnOnce(&mut SecuritySuite) -> DlmsResult<()>,
    {
        let entry = self.restrictions.get(&client_id).ok_or_else(|| {
            DlmsError::Configuration(format!("Client {} is not registered on logical device {}", client_id, self.id))
        })?;
        let mut suite = entry.write().unwrap_or_else(PoisonError::into_inner);
        match update(&mut suite) {
            Ok(()) => Ok(()),
            Err(e) => {
                suite.discard_staged_keys();
                Err(e)
            }
        }
    }
}

impl fmt::Debug for LogicalDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut clients: Vec<u16> = self.client_ids().collect();
        clients.sort_unstable();
        f.debug_struct("LogicalDevice")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("manufacturer_id", &self.manufacturer_id())
            .field("device_id", &self.device_id)
            .field("clients", &clients)
            .field("conformance", &self.conformance)
            .field("max_pdu_size", &self.max_pdu_size)
            .finish()
    }
}
