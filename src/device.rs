/// Device is the entry point to an ANT radio. It owns the dispatcher reading
/// from the radio and the channel and network objects sized after the radio's
/// capabilities.
use std::convert::TryFrom;
use std::sync::Arc;

use log::{info, warn};

use crate::channel::Channel;
use crate::dialect::SerialDialect;
use crate::dispatcher::{Config, Dispatcher};
use crate::error::AntError;
use crate::message::{Capabilities, StartupReason, MESG_CAPABILITIES_ID, MESG_STARTUP_MESG_ID};
use crate::network::Network;
use crate::transport::Transport;
use crate::usb::UsbDevice;
use crate::workflow::{execute, Chain, Command};
use crate::Result;

pub struct Device {
    dispatcher: Dispatcher,
    channels: Vec<Channel>,
    networks: Vec<Arc<Network>>,
    capabilities: Option<Capabilities>,
    closed: bool,
}

impl Device {
    /// Starts reading from `transport` and resets the radio.
    pub fn new<T: Transport + 'static>(transport: T) -> Result<Device> {
        Device::with_config(transport, Config::new())
    }

    pub fn with_config<T: Transport + 'static>(transport: T, config: Config) -> Result<Device> {
        let dispatcher = Dispatcher::with_config(transport, SerialDialect::new(), config);
        dispatcher.start()?;
        let mut device = Device {
            dispatcher,
            channels: Vec::new(),
            networks: Vec::new(),
            capabilities: None,
            closed: false,
        };
        device.reset_system()?;
        Ok(device)
    }

    /// Opens the first ANT USB stick found.
    pub fn open_usb() -> Result<Device> {
        let mut ctx = rusb::Context::new()?;
        Device::new(UsbDevice::init(&mut ctx)?)
    }

    /// Resets the radio and queries its capabilities. Channels and networks
    /// are recreated to match, so earlier channel and network objects and
    /// their configuration are gone.
    pub fn reset_system(&mut self) -> Result<()> {
        let ctx = execute(
            &self.dispatcher,
            Chain::new()
                .then(Command::reset_system())
                .then(Command::get_capabilities()),
        )?;
        if let Some(startup) = ctx.last_reply(MESG_STARTUP_MESG_ID) {
            info!("Radio started: {:?}", StartupReason::try_from(startup)?);
        }
        let reply = ctx
            .last_reply(MESG_CAPABILITIES_ID)
            .ok_or_else(|| AntError::Malformed("no capabilities reply".into()))?;
        let capabilities = Capabilities::try_from(reply)?;
        info!(
            "Radio supports {} channels on {} networks",
            capabilities.max_channels, capabilities.max_networks
        );
        self.channels = (0..capabilities.max_channels)
            .map(|id| Channel::new(id, self.dispatcher.clone()))
            .collect();
        self.networks = (0..capabilities.max_networks)
            .map(|id| Arc::new(Network::new(id, self.dispatcher.clone())))
            .collect();
        self.capabilities = Some(capabilities);
        Ok(())
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn capabilities(&self) -> Option<&Capabilities> {
        self.capabilities.as_ref()
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn channel(&self, id: u8) -> Option<&Channel> {
        self.channels.get(id as usize)
    }

    pub fn channel_mut(&mut self, id: u8) -> Option<&mut Channel> {
        self.channels.get_mut(id as usize)
    }

    pub fn networks(&self) -> &[Arc<Network>] {
        &self.networks
    }

    pub fn network(&self, id: u8) -> Option<Arc<Network>> {
        self.networks.get(id as usize).cloned()
    }

    /// Resets the radio, stops the dispatcher and closes the transport. The
    /// reader thread has exited when this returns.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Err(e) = self.dispatcher.send_named("ResetSystem", &[]) {
            warn!("Could not reset radio on close: {}", e);
        }
        self.channels.clear();
        self.networks.clear();
        self.dispatcher.close()?;
        info!("Device closed");
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Error closing device: {}", e);
        }
    }
}
