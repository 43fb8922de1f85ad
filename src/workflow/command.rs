/// Workflow states for single radio commands, and the `Receive` payload state.
use log::{debug, info};

use super::{Context, State, StepResult};
use crate::commands::{check_response, response_matcher};
use crate::error::AntError;
use crate::future::MessageMatcher;
use crate::message::*;

/// What finishes a `Command`.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    /// A channel response with a zero code. Non-zero codes fail the step.
    Response { channel: u8, msg_id: u8 },
    /// The first message the matcher accepts. It is kept in the context.
    Message(MessageMatcher),
    /// The close response, then EVENT_CHANNEL_CLOSED for the channel.
    CloseChannel { channel: u8 },
}

/// Sends one command on enter and waits for its reply.
#[derive(Clone, Debug)]
pub struct Command {
    name: &'static str,
    args: Vec<Value>,
    reply: Reply,
    closing: bool,
}

impl Command {
    pub fn new(name: &'static str, args: Vec<Value>, reply: Reply) -> Self {
        Command {
            name,
            args,
            reply,
            closing: false,
        }
    }

    fn response(name: &'static str, channel: u8, msg_id: u8, args: Vec<Value>) -> Self {
        Command::new(name, args, Reply::Response { channel, msg_id })
    }

    pub fn reset_system() -> Self {
        Command::new(
            "ResetSystem",
            vec![],
            Reply::Message(MessageMatcher::new(MESG_STARTUP_MESG_ID)),
        )
    }

    pub fn request_message(channel: u8, msg_id: u8) -> Self {
        Command::new(
            "RequestMessage",
            vec![channel.into(), msg_id.into()],
            Reply::Message(MessageMatcher::new(msg_id)),
        )
    }

    pub fn get_capabilities() -> Self {
        Command::request_message(0, MESG_CAPABILITIES_ID)
    }

    pub fn set_network_key(network: u8, key: [u8; 8]) -> Self {
        Command::response(
            "SetNetworkKey",
            network,
            MESG_NETWORK_KEY_ID,
            vec![network.into(), u64::from_le_bytes(key).into()],
        )
    }

    pub fn assign_channel(channel: u8, channel_type: u8, network: u8) -> Self {
        Command::response(
            "AssignChannel",
            channel,
            MESG_ASSIGN_CHANNEL_ID,
            vec![channel.into(), channel_type.into(), network.into()],
        )
    }

    pub fn assign_channel_extended(
        channel: u8,
        channel_type: u8,
        network: u8,
        extended_attrs: u8,
    ) -> Self {
        Command::response(
            "AssignChannelExtended",
            channel,
            MESG_ASSIGN_CHANNEL_ID,
            vec![
                channel.into(),
                channel_type.into(),
                network.into(),
                extended_attrs.into(),
            ],
        )
    }

    pub fn unassign_channel(channel: u8) -> Self {
        Command::response(
            "UnassignChannel",
            channel,
            MESG_UNASSIGN_CHANNEL_ID,
            vec![channel.into()],
        )
    }

    pub fn set_channel_id(channel: u8, device_number: u16, device_type: u8, trans_type: u8) -> Self {
        Command::response(
            "SetChannelId",
            channel,
            MESG_CHANNEL_ID_ID,
            vec![
                channel.into(),
                device_number.into(),
                device_type.into(),
                trans_type.into(),
            ],
        )
    }

    pub fn set_channel_period(channel: u8, period: u16) -> Self {
        Command::response(
            "SetChannelPeriod",
            channel,
            MESG_CHANNEL_MESG_PERIOD_ID,
            vec![channel.into(), period.into()],
        )
    }

    pub fn set_channel_search_timeout(channel: u8, timeout: u8) -> Self {
        Command::response(
            "SetChannelSearchTimeout",
            channel,
            MESG_CHANNEL_SEARCH_TIMEOUT_ID,
            vec![channel.into(), timeout.into()],
        )
    }

    pub fn set_channel_rf_freq(channel: u8, rf_freq: u8) -> Self {
        Command::response(
            "SetChannelRfFreq",
            channel,
            MESG_CHANNEL_RADIO_FREQ_ID,
            vec![channel.into(), rf_freq.into()],
        )
    }

    pub fn set_channel_search_waveform(channel: u8, waveform: u16) -> Self {
        Command::response(
            "SetChannelSearchWaveform",
            channel,
            MESG_SEARCH_WAVEFORM_ID,
            vec![channel.into(), waveform.into()],
        )
    }

    pub fn open_channel(channel: u8) -> Self {
        Command::response(
            "OpenChannel",
            channel,
            MESG_OPEN_CHANNEL_ID,
            vec![channel.into()],
        )
    }

    pub fn open_rx_scan_mode() -> Self {
        Command::response("OpenRxScanMode", 0, MESG_OPEN_RX_SCAN_ID, vec![])
    }

    pub fn close_channel(channel: u8) -> Self {
        Command::new(
            "CloseChannel",
            vec![channel.into()],
            Reply::CloseChannel { channel },
        )
    }

    pub fn rx_ext_mesgs_enable(enable: bool) -> Self {
        Command::response(
            "RxExtMesgsEnable",
            0,
            MESG_RX_EXT_MESGS_ENABLE_ID,
            vec![enable.into()],
        )
    }

    fn check(&self, msg_id: u8, event: &AntMessage) -> StepResult {
        match check_response(msg_id)(event) {
            Ok(()) => StepResult::Done,
            Err(e) => StepResult::Error(e),
        }
    }
}

impl State for Command {
    fn name(&self) -> &str {
        self.name
    }

    fn enter(&mut self, ctx: &mut Context) -> StepResult {
        self.closing = false;
        match ctx.send_named(self.name, &self.args) {
            Ok(()) => StepResult::AwaitEvent,
            Err(e) => StepResult::Error(e),
        }
    }

    fn accept(&mut self, ctx: &mut Context, event: &AntMessage) -> StepResult {
        match &self.reply {
            Reply::Response { channel, msg_id } => {
                if response_matcher(*channel, *msg_id).matches(event) {
                    self.check(*msg_id, event)
                } else {
                    StepResult::AwaitEvent
                }
            }
            Reply::Message(matcher) => {
                if matcher.matches(event) {
                    ctx.replies.push(event.clone());
                    StepResult::Done
                } else {
                    StepResult::AwaitEvent
                }
            }
            Reply::CloseChannel { channel } => {
                let channel = *channel;
                if !self.closing {
                    if !response_matcher(channel, MESG_CLOSE_CHANNEL_ID).matches(event) {
                        return StepResult::AwaitEvent;
                    }
                    if let StepResult::Error(e) = self.check(MESG_CLOSE_CHANNEL_ID, event) {
                        return StepResult::Error(e);
                    }
                    debug!("Channel {} close acknowledged", channel);
                    self.closing = true;
                    ctx.mark_progress();
                    return StepResult::AwaitEvent;
                }
                let closed = MessageMatcher::new(MESG_RESPONSE_EVENT_ID)
                    .with("channel_number", channel)
                    .with("message_id", MESG_EVENT_ID)
                    .with("message_code", EVENT_CHANNEL_CLOSED);
                if closed.matches(event) {
                    info!("Channel {} closed", channel);
                    StepResult::Done
                } else {
                    StepResult::AwaitEvent
                }
            }
        }
    }
}

/// Collects `count` data messages (broadcast, acknowledged or burst) from a
/// channel into the context. A search timeout on the channel fails with
/// `Timeout`.
#[derive(Clone, Debug)]
pub struct Receive {
    channel: u8,
    count: usize,
    received: usize,
}

impl Receive {
    pub fn new(channel: u8, count: usize) -> Self {
        Receive {
            channel,
            count,
            received: 0,
        }
    }
}

impl State for Receive {
    fn name(&self) -> &str {
        "Receive"
    }

    fn enter(&mut self, _ctx: &mut Context) -> StepResult {
        self.received = 0;
        if self.count == 0 {
            StepResult::Done
        } else {
            StepResult::AwaitEvent
        }
    }

    fn accept(&mut self, ctx: &mut Context, event: &AntMessage) -> StepResult {
        let on_channel = event.args.u8("channel_number") == Ok(self.channel);
        match event.msg_id {
            MESG_BROADCAST_DATA_ID | MESG_ACKNOWLEDGED_DATA_ID | MESG_BURST_DATA_ID
                if on_channel =>
            {
                ctx.replies.push(event.clone());
                ctx.mark_progress();
                self.received += 1;
                if self.received >= self.count {
                    StepResult::Done
                } else {
                    StepResult::AwaitEvent
                }
            }
            MESG_RESPONSE_EVENT_ID
                if on_channel
                    && event.args.u8("message_id") == Ok(MESG_EVENT_ID)
                    && event.args.u8("message_code") == Ok(EVENT_RX_SEARCH_TIMEOUT) =>
            {
                debug!("Search timed out on channel {}", self.channel);
                StepResult::Error(AntError::Timeout)
            }
            _ => StepResult::AwaitEvent,
        }
    }
}
