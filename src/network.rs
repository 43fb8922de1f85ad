/// A network groups channels that share an 8 byte network key. Devices only
/// talk to each other when both sides use the same key.
use std::fmt;
use std::sync::Mutex;

use log::info;

use crate::dispatcher::{lock, Dispatcher};
use crate::Result;

/// Key of the public ANT+ network.
pub const ANT_PLUS_NETWORK_KEY: [u8; 8] = [0xB9, 0xA5, 0x21, 0xFB, 0xBD, 0x72, 0xC3, 0x45];
/// Key of the ANT-FS network used by fitness devices for file transfer.
pub const ANT_FS_NETWORK_KEY: [u8; 8] = [0xA8, 0xA4, 0x23, 0xB9, 0xF5, 0x5E, 0x63, 0xC1];
pub const DEFAULT_NETWORK_KEY: [u8; 8] = [0; 8];

pub struct Network {
    id: u8,
    key: Mutex<[u8; 8]>,
    dispatcher: Dispatcher,
}

impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Network")
            .field("id", &self.id)
            .field("key", &self.key())
            .finish()
    }
}

impl Network {
    pub fn new(id: u8, dispatcher: Dispatcher) -> Self {
        Network {
            id,
            key: Mutex::new(DEFAULT_NETWORK_KEY),
            dispatcher,
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    /// Last key the radio acknowledged.
    pub fn key(&self) -> [u8; 8] {
        *lock(&self.key)
    }

    /// Writes the key to the radio and blocks until it is acknowledged. The
    /// stored key is left unchanged if the radio rejects it.
    pub fn set_key(&self, key: [u8; 8]) -> Result<()> {
        self.dispatcher.set_network_key(self.id, key)?.wait()?;
        *lock(&self.key) = key;
        info!("Network {} key set", self.id);
        Ok(())
    }
}
