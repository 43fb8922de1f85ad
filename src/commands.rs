/// Non-blocking requests on a `Dispatcher`. Each call registers a listener for
/// the reply before writing the command, then hands back the `Future` the
/// listener will fulfil. Channel responses with a non-zero code fail the
/// future with `MessageFailed`.
use std::sync::Arc;

use log::info;

use crate::dispatcher::Dispatcher;
use crate::error::AntError;
use crate::future::{self, Future, MatchingListener, MessageMatcher, Validator};
use crate::message::*;
use crate::Result;

/// Validator for a channel response to `msg_id`.
pub fn check_response(msg_id: u8) -> impl Fn(&AntMessage) -> Result<()> + Send + Sync {
    move |message: &AntMessage| match message.args.u8("message_code")? {
        RESPONSE_NO_ERROR => Ok(()),
        code => Err(AntError::MessageFailed { msg_id, code }),
    }
}

/// Matches the channel response the radio sends for command `msg_id`.
pub fn response_matcher(channel: u8, msg_id: u8) -> MessageMatcher {
    MessageMatcher::new(MESG_RESPONSE_EVENT_ID)
        .with("channel_number", channel)
        .with("message_id", msg_id)
}

impl Dispatcher {
    /// Writes command `name` and waits for the first message `matcher`
    /// accepts.
    pub fn request(&self, name: &str, args: &[Value], matcher: MessageMatcher) -> Result<Future> {
        self.request_with(name, args, matcher, None)
    }

    fn request_with(
        &self,
        name: &str,
        args: &[Value],
        matcher: MessageMatcher,
        validator: Option<Validator>,
    ) -> Result<Future> {
        let future = MatchingListener::register(self, matcher, validator);
        if let Err(e) = self.send_named(name, args) {
            future.cancel();
            return Err(e);
        }
        Ok(future)
    }

    /// Writes a command answered by a channel response on `channel`.
    fn command(&self, name: &str, channel: u8, args: &[Value]) -> Result<Future> {
        let msg_id = self
            .dialect()
            .functions()
            .lookup_name(name)
            .map(|entry| entry.msg_id)
            .ok_or_else(|| AntError::Encoding(format!("unknown message {}", name)))?;
        let (promise, future) = future::channel(self.config().get_reply_timeout());
        let listener = MatchingListener::new(response_matcher(channel, msg_id), promise)
            .validate(check_response(msg_id));
        let id = self.add_listener(Arc::new(listener));
        let future = future.bind(self, id);
        if let Err(e) = self.send_named(name, args) {
            future.cancel();
            return Err(e);
        }
        Ok(future)
    }

    /// Resets the radio. The future holds the startup message.
    pub fn reset_system(&self) -> Result<Future> {
        info!("Resetting ANT radio");
        self.request(
            "ResetSystem",
            &[],
            MessageMatcher::new(MESG_STARTUP_MESG_ID),
        )
    }

    /// Asks for a message by id, answered with that message on `channel`.
    pub fn request_message(&self, channel: u8, msg_id: u8) -> Result<Future> {
        let mut matcher = MessageMatcher::new(msg_id);
        if msg_id == MESG_CHANNEL_ID_ID || msg_id == MESG_CHANNEL_STATUS_ID {
            matcher = matcher.with("channel_number", channel);
        }
        self.request(
            "RequestMessage",
            &[channel.into(), msg_id.into()],
            matcher,
        )
    }

    pub fn get_capabilities(&self) -> Result<Future> {
        self.request_message(0, MESG_CAPABILITIES_ID)
    }

    pub fn get_channel_id(&self, channel: u8) -> Result<Future> {
        self.request_message(channel, MESG_CHANNEL_ID_ID)
    }

    pub fn get_channel_status(&self, channel: u8) -> Result<Future> {
        self.request_message(channel, MESG_CHANNEL_STATUS_ID)
    }

    pub fn get_serial_number(&self) -> Result<Future> {
        self.request_message(0, MESG_GET_SERIAL_NUM_ID)
    }

    /// The radio answers on the network number in place of a channel.
    pub fn set_network_key(&self, network: u8, key: [u8; 8]) -> Result<Future> {
        self.command(
            "SetNetworkKey",
            network,
            &[network.into(), u64::from_le_bytes(key).into()],
        )
    }

    pub fn assign_channel(&self, channel: u8, channel_type: u8, network: u8) -> Result<Future> {
        self.command(
            "AssignChannel",
            channel,
            &[channel.into(), channel_type.into(), network.into()],
        )
    }

    pub fn assign_channel_extended(
        &self,
        channel: u8,
        channel_type: u8,
        network: u8,
        extended_attrs: u8,
    ) -> Result<Future> {
        self.command(
            "AssignChannelExtended",
            channel,
            &[
                channel.into(),
                channel_type.into(),
                network.into(),
                extended_attrs.into(),
            ],
        )
    }

    pub fn unassign_channel(&self, channel: u8) -> Result<Future> {
        self.command("UnassignChannel", channel, &[channel.into()])
    }

    pub fn set_channel_id(
        &self,
        channel: u8,
        device_number: u16,
        device_type: u8,
        trans_type: u8,
    ) -> Result<Future> {
        self.command(
            "SetChannelId",
            channel,
            &[
                channel.into(),
                device_number.into(),
                device_type.into(),
                trans_type.into(),
            ],
        )
    }

    pub fn set_channel_period(&self, channel: u8, period: u16) -> Result<Future> {
        self.command(
            "SetChannelPeriod",
            channel,
            &[channel.into(), period.into()],
        )
    }

    pub fn set_channel_search_timeout(&self, channel: u8, timeout: u8) -> Result<Future> {
        self.command(
            "SetChannelSearchTimeout",
            channel,
            &[channel.into(), timeout.into()],
        )
    }

    pub fn set_channel_rf_freq(&self, channel: u8, rf_freq: u8) -> Result<Future> {
        self.command(
            "SetChannelRfFreq",
            channel,
            &[channel.into(), rf_freq.into()],
        )
    }

    pub fn set_channel_search_waveform(&self, channel: u8, waveform: u16) -> Result<Future> {
        self.command(
            "SetChannelSearchWaveform",
            channel,
            &[channel.into(), waveform.into()],
        )
    }

    pub fn open_channel(&self, channel: u8) -> Result<Future> {
        info!("Opening channel {}", channel);
        self.command("OpenChannel", channel, &[channel.into()])
    }

    pub fn open_rx_scan_mode(&self) -> Result<Future> {
        info!("Opening channel 0 in scan mode");
        self.command("OpenRxScanMode", 0, &[])
    }

    pub fn close_channel(&self, channel: u8) -> Result<Future> {
        info!("Closing channel {}", channel);
        self.command("CloseChannel", channel, &[channel.into()])
    }

    pub fn rx_ext_mesgs_enable(&self, enable: bool) -> Result<Future> {
        self.command("RxExtMesgsEnable", 0, &[enable.into()])
    }

    /// Broadcast data is not acknowledged, the write is all there is.
    pub fn send_broadcast_data(&self, channel: u8, data: [u8; 8]) -> Result<()> {
        self.send_named("SendBroadcastData", &[channel.into(), data.into()])
    }

    /// Resolves on EVENT_TRANSFER_TX_COMPLETED, fails with `MessageFailed` on
    /// EVENT_TRANSFER_TX_FAILED.
    pub fn send_acknowledged_data(&self, channel: u8, data: [u8; 8]) -> Result<Future> {
        let matcher = MessageMatcher::new(MESG_RESPONSE_EVENT_ID)
            .with("channel_number", channel)
            .with("message_id", MESG_EVENT_ID)
            .with_any(
                "message_code",
                &[EVENT_TRANSFER_TX_COMPLETED, EVENT_TRANSFER_TX_FAILED],
            );
        let validator: Validator = Box::new(|message: &AntMessage| {
            match message.args.u8("message_code")? {
                EVENT_TRANSFER_TX_COMPLETED => Ok(()),
                code => Err(AntError::MessageFailed {
                    msg_id: MESG_ACKNOWLEDGED_DATA_ID,
                    code,
                }),
            }
        });
        self.request_with(
            "SendAcknowledgedData",
            &[channel.into(), data.into()],
            matcher,
            Some(validator),
        )
    }
}
