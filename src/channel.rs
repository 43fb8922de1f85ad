/// A channel is a means of communication with one ANT device. A radio supports
/// a fixed number of channels, each assigned to a network. Opening a channel
/// runs the whole configuration sequence against the radio, then the caller's
/// payload state, then closes the channel again.
use std::convert::TryFrom;
use std::fmt;
use std::sync::{Arc, Weak};

use log::info;

use crate::dispatcher::Dispatcher;
use crate::error::AntError;
use crate::message::{ChannelId, ChannelStatus};
use crate::network::Network;
use crate::workflow::{execute, Chain, Command, Context, State};
use crate::Result;

pub const CHANNEL_TYPE_BIDIRECTIONAL_RECEIVE: u8 = 0x00;
pub const CHANNEL_TYPE_BIDIRECTIONAL_TRANSMIT: u8 = 0x10;
pub const CHANNEL_TYPE_SHARED_BIDIRECTIONAL_RECEIVE: u8 = 0x20;
pub const CHANNEL_TYPE_SHARED_BIDIRECTIONAL_TRANSMIT: u8 = 0x30;
pub const CHANNEL_TYPE_UNIDIRECTIONAL_RECEIVE_ONLY: u8 = 0x40;
pub const CHANNEL_TYPE_UNIDIRECTIONAL_TRANSMIT_ONLY: u8 = 0x50;

/// Channel parameters written to the radio when the channel opens. A zero
/// device number, device type or transmission type is a wildcard for
/// searching.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    channel_type: u8,
    device_number: u16,
    device_type: u8,
    trans_type: u8,
    period: u16,
    search_timeout: u8,
    rf_freq: u8,
    search_waveform: Option<u16>,
    open_scan_mode: bool,
    extended_attrs: Option<u8>,
}

impl Default for Config {
    fn default() -> Self {
        Config::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Config {
            channel_type: CHANNEL_TYPE_BIDIRECTIONAL_RECEIVE,
            device_number: 0,
            device_type: 0,
            trans_type: 0,
            period: 0x2000,
            search_timeout: 0xFF,
            rf_freq: 66,
            search_waveform: None,
            open_scan_mode: false,
            extended_attrs: None,
        }
    }

    pub fn channel_type(mut self, channel_type: u8) -> Self {
        self.channel_type = channel_type;
        self
    }

    pub fn device_number(mut self, device_number: u16) -> Self {
        self.device_number = device_number;
        self
    }

    pub fn device_type(mut self, device_type: u8) -> Self {
        self.device_type = device_type;
        self
    }

    pub fn trans_type(mut self, trans_type: u8) -> Self {
        self.trans_type = trans_type;
        self
    }

    /// Message period in 1/32768 s units.
    pub fn period(mut self, period: u16) -> Self {
        self.period = period;
        self
    }

    /// Search timeout in 2.5 s units, 0xFF searches forever.
    pub fn search_timeout(mut self, search_timeout: u8) -> Self {
        self.search_timeout = search_timeout;
        self
    }

    /// Offset from 2400 MHz.
    pub fn rf_freq(mut self, rf_freq: u8) -> Self {
        self.rf_freq = rf_freq;
        self
    }

    pub fn search_waveform(mut self, search_waveform: u16) -> Self {
        self.search_waveform = Some(search_waveform);
        self
    }

    /// Continuous scanning. Only channel 0 can be opened in scan mode.
    pub fn open_scan_mode(mut self, open_scan_mode: bool) -> Self {
        self.open_scan_mode = open_scan_mode;
        self
    }

    pub fn extended_attrs(mut self, extended_attrs: u8) -> Self {
        self.extended_attrs = Some(extended_attrs);
        self
    }

    pub fn get_channel_type(&self) -> u8 {
        self.channel_type
    }

    pub fn get_device_number(&self) -> u16 {
        self.device_number
    }

    pub fn get_device_type(&self) -> u8 {
        self.device_type
    }

    pub fn get_trans_type(&self) -> u8 {
        self.trans_type
    }

    pub fn get_period(&self) -> u16 {
        self.period
    }

    pub fn get_search_timeout(&self) -> u8 {
        self.search_timeout
    }

    pub fn get_rf_freq(&self) -> u8 {
        self.rf_freq
    }

    pub fn get_search_waveform(&self) -> Option<u16> {
        self.search_waveform
    }

    pub fn is_open_scan_mode(&self) -> bool {
        self.open_scan_mode
    }

    pub fn get_extended_attrs(&self) -> Option<u8> {
        self.extended_attrs
    }
}

pub struct Channel {
    id: u8,
    network: Option<Weak<Network>>,
    config: Config,
    dispatcher: Dispatcher,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("network", &self.network_id())
            .field("config", &self.config)
            .finish()
    }
}

impl Channel {
    pub fn new(id: u8, dispatcher: Dispatcher) -> Self {
        Channel {
            id,
            network: None,
            config: Config::new(),
            dispatcher,
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn set_config(&mut self, config: Config) {
        self.config = config;
    }

    pub fn set_network(&mut self, network: &Arc<Network>) {
        self.network = Some(Arc::downgrade(network));
    }

    /// Id of the assigned network, if it still exists.
    pub fn network_id(&self) -> Option<u8> {
        self.network().map(|network| network.id())
    }

    fn network(&self) -> Option<Arc<Network>> {
        self.network.as_ref().and_then(Weak::upgrade)
    }

    /// The configuration sequence followed by `payload` and a close.
    fn open_chain<S: State + 'static>(&self, network: u8, payload: S) -> Chain {
        let id = self.id;
        let config = &self.config;
        let assign = match config.extended_attrs {
            Some(attrs) => {
                Command::assign_channel_extended(id, config.channel_type, network, attrs)
            }
            None => Command::assign_channel(id, config.channel_type, network),
        };
        let mut chain = Chain::new()
            .then(assign)
            .then(Command::set_channel_id(
                id,
                config.device_number,
                config.device_type,
                config.trans_type,
            ))
            .then(Command::set_channel_period(id, config.period))
            .then(Command::set_channel_search_timeout(id, config.search_timeout))
            .then(Command::set_channel_rf_freq(id, config.rf_freq));
        if let Some(waveform) = config.search_waveform {
            chain = chain.then(Command::set_channel_search_waveform(id, waveform));
        }
        chain = if config.open_scan_mode {
            chain.then(Command::open_rx_scan_mode())
        } else {
            chain.then(Command::open_channel(id))
        };
        chain.then(payload).then(Command::close_channel(id))
    }

    /// Configures and opens the channel, runs `payload` while it is open,
    /// then closes it. Blocks until the channel is closed again and returns
    /// the replies the payload collected.
    pub fn open<S: State + 'static>(&self, payload: S) -> Result<Context> {
        let network = self.network().ok_or_else(|| {
            AntError::ApiUsage(format!("channel {} has no network assigned", self.id))
        })?;
        if self.config.open_scan_mode && self.id != 0 {
            return Err(AntError::ApiUsage(format!(
                "open scan mode is only supported on channel 0, not {}",
                self.id
            )));
        }
        info!("Opening channel {} on network {}", self.id, network.id());
        execute(&self.dispatcher, self.open_chain(network.id(), payload))
    }

    /// Closes and unassigns the channel. Closing a channel that is not open
    /// fails with the radio's `MessageFailed`.
    pub fn close(&self) -> Result<()> {
        execute(
            &self.dispatcher,
            Chain::new()
                .then(Command::close_channel(self.id))
                .then(Command::unassign_channel(self.id)),
        )?;
        info!("Channel {} closed and unassigned", self.id);
        Ok(())
    }

    pub fn get_channel_id(&self) -> Result<ChannelId> {
        let reply = self.dispatcher.get_channel_id(self.id)?.wait()?;
        ChannelId::try_from(&reply)
    }

    pub fn get_channel_status(&self) -> Result<ChannelStatus> {
        let reply = self.dispatcher.get_channel_status(self.id)?.wait()?;
        ChannelStatus::try_from(&reply)
    }

    pub fn send_broadcast(&self, data: [u8; 8]) -> Result<()> {
        self.dispatcher.send_broadcast_data(self.id, data)
    }

    /// Blocks until the radio reports the transfer completed or failed.
    pub fn send_acknowledged(&self, data: [u8; 8]) -> Result<()> {
        self.dispatcher
            .send_acknowledged_data(self.id, data)?
            .wait()
            .map(|_| ())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dialect::encode_reply;
    use crate::message::*;
    use crate::transport::mock::MockTransport;
    use crate::workflow::Receive;

    fn response(channel: u8, msg_id: u8, code: u8) -> Vec<u8> {
        encode_reply(
            "ChannelResponse",
            &[channel.into(), msg_id.into(), code.into()],
        )
        .unwrap()
    }

    fn ok(channel: u8, msg_id: u8) -> Vec<Vec<u8>> {
        vec![response(channel, msg_id, RESPONSE_NO_ERROR)]
    }

    /// A radio that acknowledges every channel configuration command.
    fn radio(channel: u8) -> Arc<MockTransport> {
        let transport = MockTransport::new()
            .on(MESG_ASSIGN_CHANNEL_ID, ok(channel, MESG_ASSIGN_CHANNEL_ID))
            .on(MESG_CHANNEL_ID_ID, ok(channel, MESG_CHANNEL_ID_ID))
            .on(
                MESG_CHANNEL_MESG_PERIOD_ID,
                ok(channel, MESG_CHANNEL_MESG_PERIOD_ID),
            )
            .on(
                MESG_CHANNEL_SEARCH_TIMEOUT_ID,
                ok(channel, MESG_CHANNEL_SEARCH_TIMEOUT_ID),
            )
            .on(
                MESG_CHANNEL_RADIO_FREQ_ID,
                ok(channel, MESG_CHANNEL_RADIO_FREQ_ID),
            )
            .on(MESG_SEARCH_WAVEFORM_ID, ok(channel, MESG_SEARCH_WAVEFORM_ID))
            .on(
                MESG_OPEN_CHANNEL_ID,
                vec![
                    response(channel, MESG_OPEN_CHANNEL_ID, RESPONSE_NO_ERROR),
                    encode_reply("BroadcastData", &[channel.into(), [1u8; 8].into()]).unwrap(),
                ],
            )
            .on(
                MESG_CLOSE_CHANNEL_ID,
                vec![
                    response(channel, MESG_CLOSE_CHANNEL_ID, RESPONSE_NO_ERROR),
                    response(channel, MESG_EVENT_ID, EVENT_CHANNEL_CLOSED),
                ],
            )
            .on(MESG_UNASSIGN_CHANNEL_ID, ok(channel, MESG_UNASSIGN_CHANNEL_ID));
        Arc::new(transport)
    }

    fn setup(transport: &Arc<MockTransport>) -> (Dispatcher, Arc<Network>) {
        let dispatcher = Dispatcher::new(transport.clone());
        dispatcher.start().unwrap();
        let network = Arc::new(Network::new(0, dispatcher.clone()));
        (dispatcher, network)
    }

    #[test]
    fn config_defaults() {
        let config = Config::new();
        assert_eq!(config.get_period(), 0x2000);
        assert_eq!(config.get_search_timeout(), 0xFF);
        assert_eq!(config.get_rf_freq(), 66);
        assert_eq!(config.get_search_waveform(), None);
        assert!(!config.is_open_scan_mode());
        assert_eq!(Config::default(), config);
    }

    #[test]
    fn open_without_network_is_api_usage() {
        let channel = Channel::new(0, Dispatcher::new(MockTransport::new()));
        assert!(matches!(
            channel.open(Receive::new(0, 1)),
            Err(AntError::ApiUsage(_))
        ));
    }

    #[test]
    fn open_with_dropped_network_is_api_usage() {
        let dispatcher = Dispatcher::new(MockTransport::new());
        let mut channel = Channel::new(0, dispatcher.clone());
        let network = Arc::new(Network::new(0, dispatcher));
        channel.set_network(&network);
        drop(network);
        assert_eq!(channel.network_id(), None);
        assert!(matches!(
            channel.open(Receive::new(0, 1)),
            Err(AntError::ApiUsage(_))
        ));
    }

    #[test]
    fn scan_mode_only_on_channel_zero() {
        let dispatcher = Dispatcher::new(MockTransport::new());
        let network = Arc::new(Network::new(0, dispatcher.clone()));
        let mut channel = Channel::new(1, dispatcher);
        channel.set_network(&network);
        channel.set_config(Config::new().open_scan_mode(true));
        assert!(matches!(
            channel.open(Receive::new(1, 1)),
            Err(AntError::ApiUsage(_))
        ));
    }

    #[test]
    fn open_runs_configuration_payload_and_close() {
        let transport = radio(2);
        let (dispatcher, network) = setup(&transport);
        let mut channel = Channel::new(2, dispatcher.clone());
        channel.set_network(&network);
        channel.set_config(
            Config::new()
                .device_number(0x0302)
                .device_type(0x78)
                .period(8070)
                .search_waveform(0x0053),
        );
        let ctx = channel.open(Receive::new(2, 1)).unwrap();
        assert_eq!(ctx.replies.len(), 1);
        assert_eq!(ctx.replies[0].msg_id, MESG_BROADCAST_DATA_ID);
        assert_eq!(
            transport.written_ids(),
            vec![
                MESG_ASSIGN_CHANNEL_ID,
                MESG_CHANNEL_ID_ID,
                MESG_CHANNEL_MESG_PERIOD_ID,
                MESG_CHANNEL_SEARCH_TIMEOUT_ID,
                MESG_CHANNEL_RADIO_FREQ_ID,
                MESG_SEARCH_WAVEFORM_ID,
                MESG_OPEN_CHANNEL_ID,
                MESG_CLOSE_CHANNEL_ID,
            ]
        );
        assert_eq!(
            transport.written()[1],
            Frame::new(MESG_CHANNEL_ID_ID, &[2, 0x02, 0x03, 0x78, 0]).encode()
        );
        assert_eq!(dispatcher.listener_count(), 0);
        dispatcher.stop().unwrap();
    }

    #[test]
    fn scan_mode_and_extended_assign() {
        let transport = radio(0);
        transport.set_replies(MESG_OPEN_RX_SCAN_ID, ok(0, MESG_OPEN_RX_SCAN_ID));
        let (dispatcher, network) = setup(&transport);
        let mut channel = Channel::new(0, dispatcher.clone());
        channel.set_network(&network);
        channel.set_config(Config::new().open_scan_mode(true).extended_attrs(0x01));
        // No payload data is scripted for scan mode, take none.
        channel.open(Receive::new(0, 0)).unwrap();
        let written = transport.written();
        assert_eq!(written[0], Frame::new(MESG_ASSIGN_CHANNEL_ID, &[0, 0, 0, 1]).encode());
        assert_eq!(
            transport.written_ids()[5..].to_vec(),
            vec![MESG_OPEN_RX_SCAN_ID, MESG_CLOSE_CHANNEL_ID]
        );
        dispatcher.stop().unwrap();
    }

    #[test]
    fn close_surfaces_nack() {
        let transport = Arc::new(MockTransport::new().on(
            MESG_CLOSE_CHANNEL_ID,
            vec![response(1, MESG_CLOSE_CHANNEL_ID, CHANNEL_IN_WRONG_STATE)],
        ));
        let (dispatcher, _network) = setup(&transport);
        let channel = Channel::new(1, dispatcher.clone());
        assert_eq!(
            channel.close(),
            Err(AntError::MessageFailed {
                msg_id: MESG_CLOSE_CHANNEL_ID,
                code: CHANNEL_IN_WRONG_STATE
            })
        );
        assert_eq!(transport.written_ids(), vec![MESG_CLOSE_CHANNEL_ID]);
        dispatcher.stop().unwrap();
    }

    #[test]
    fn close_then_unassign() {
        let transport = radio(1);
        let (dispatcher, _network) = setup(&transport);
        let channel = Channel::new(1, dispatcher.clone());
        channel.close().unwrap();
        assert_eq!(
            transport.written_ids(),
            vec![MESG_CLOSE_CHANNEL_ID, MESG_UNASSIGN_CHANNEL_ID]
        );
        dispatcher.stop().unwrap();
    }

    #[test]
    fn channel_id_and_status() {
        let transport = Arc::new(MockTransport::new());
        transport.set_replies(
            MESG_REQUEST_ID,
            vec![b"\xA4\x05\x51\x01\x02\x03\x04\x05\xF1".to_vec()],
        );
        let (dispatcher, _network) = setup(&transport);
        let channel = Channel::new(1, dispatcher.clone());
        let id = channel.get_channel_id().unwrap();
        assert_eq!(id.device_number, 0x0302);
        assert_eq!(id.device_type, 0x04);

        transport.set_replies(
            MESG_REQUEST_ID,
            vec![encode_reply("ChannelStatus", &[1u8.into(), 0x03u8.into()]).unwrap()],
        );
        let status = channel.get_channel_status().unwrap();
        assert_eq!(status.state, ChannelState::Tracking);
        dispatcher.stop().unwrap();
    }
}
