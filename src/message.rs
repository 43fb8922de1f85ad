/// Message module provides the values exchanged with the ANT radio: raw frames
/// as they travel over the wire, decoded messages with named arguments, and
/// typed views over the replies the driver cares about.
use std::convert::TryFrom;
use std::fmt;

use crate::error::AntError;
use crate::Result;

pub const MESG_TX_SYNC: u8 = 0xA4;
pub const MESG_SYNC_SIZE: usize = 1;
pub const MESG_SIZE_SIZE: usize = 1;
pub const MESG_ID_SIZE: usize = 1;
pub const MESG_CHECKSUM_SIZE: usize = 1;
pub const MESG_HEADER_SIZE: usize = MESG_SYNC_SIZE + MESG_SIZE_SIZE + MESG_ID_SIZE;
pub const MESG_FRAME_SIZE: usize = MESG_HEADER_SIZE + MESG_CHECKSUM_SIZE;
pub const MESG_SIZE_OFFSET: usize = MESG_SYNC_SIZE;
pub const MESG_ID_OFFSET: usize = MESG_SYNC_SIZE + MESG_SIZE_SIZE;
pub const MESG_DATA_OFFSET: usize = MESG_HEADER_SIZE;
pub const MESG_CHANNEL_NUM_SIZE: usize = 1;
pub const MESG_EXT_MESG_BF_SIZE: usize = 1;
pub const ANT_STANDARD_DATA_PAYLOAD_SIZE: usize = 8;
pub const ANT_EXT_MESG_DEVICE_ID_FIELD_SIZE: usize = 4;
pub const ANT_EXT_STRING_SIZE: usize = 19;
pub const MESG_ANT_MAX_PAYLOAD_SIZE: usize = ANT_STANDARD_DATA_PAYLOAD_SIZE;
pub const MESG_MAX_EXT_DATA_SIZE: usize = ANT_EXT_MESG_DEVICE_ID_FIELD_SIZE + ANT_EXT_STRING_SIZE;
pub const MESG_MAX_DATA_SIZE: usize =
    MESG_ANT_MAX_PAYLOAD_SIZE + MESG_EXT_MESG_BF_SIZE + MESG_MAX_EXT_DATA_SIZE;
/// Largest LEN byte a radio sends.
pub const MESG_MAX_SIZE_VALUE: usize = MESG_MAX_DATA_SIZE + MESG_CHANNEL_NUM_SIZE;

pub const RESPONSE_NO_ERROR: u8 = 0x00;
pub const MESG_EVENT_ID: u8 = 0x01;
pub const MESG_RESPONSE_EVENT_ID: u8 = 0x40;
pub const MESG_UNASSIGN_CHANNEL_ID: u8 = 0x41;
pub const MESG_ASSIGN_CHANNEL_ID: u8 = 0x42;
pub const MESG_CHANNEL_MESG_PERIOD_ID: u8 = 0x43;
pub const MESG_CHANNEL_SEARCH_TIMEOUT_ID: u8 = 0x44;
pub const MESG_CHANNEL_RADIO_FREQ_ID: u8 = 0x45;
pub const MESG_NETWORK_KEY_ID: u8 = 0x46;
pub const MESG_SEARCH_WAVEFORM_ID: u8 = 0x49;
pub const MESG_SYSTEM_RESET_ID: u8 = 0x4A;
pub const MESG_OPEN_CHANNEL_ID: u8 = 0x4B;
pub const MESG_CLOSE_CHANNEL_ID: u8 = 0x4C;
pub const MESG_REQUEST_ID: u8 = 0x4D;
pub const MESG_BROADCAST_DATA_ID: u8 = 0x4E;
pub const MESG_ACKNOWLEDGED_DATA_ID: u8 = 0x4F;
pub const MESG_BURST_DATA_ID: u8 = 0x50;
pub const MESG_CHANNEL_ID_ID: u8 = 0x51;
pub const MESG_CHANNEL_STATUS_ID: u8 = 0x52;
pub const MESG_CAPABILITIES_ID: u8 = 0x54;
pub const MESG_OPEN_RX_SCAN_ID: u8 = 0x5B;
pub const MESG_GET_SERIAL_NUM_ID: u8 = 0x61;
pub const MESG_RX_EXT_MESGS_ENABLE_ID: u8 = 0x66;
pub const MESG_STARTUP_MESG_ID: u8 = 0x6F;

pub const EVENT_RX_SEARCH_TIMEOUT: u8 = 0x01;
pub const EVENT_TRANSFER_TX_COMPLETED: u8 = 0x05;
pub const EVENT_TRANSFER_TX_FAILED: u8 = 0x06;
pub const EVENT_CHANNEL_CLOSED: u8 = 0x07;
pub const CHANNEL_IN_WRONG_STATE: u8 = 0x15;

/// Flag bits of the byte that precedes extended data.
pub const EXT_FLAG_CHANNEL_ID: u8 = 0x80;
pub const EXT_FLAG_RSSI: u8 = 0x40;
pub const EXT_FLAG_TIMESTAMP: u8 = 0x20;

/// Running XOR of every byte.
pub fn generate_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0, |checksum, b| checksum ^ b)
}

/// True when the XOR of the whole buffer, trailing checksum included, is zero.
pub fn validate_checksum(data: &[u8]) -> bool {
    generate_checksum(data) == 0
}

/// A single wire frame before encoding or after the sync, length and checksum
/// have been stripped off.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: u8,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(id: u8, data: &[u8]) -> Frame {
        Frame {
            id,
            data: data.to_vec(),
        }
    }

    /// Converts the frame into bytes that can be written to the radio:
    /// SYNC, LEN, ID, DATA, CHECKSUM.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MESG_FRAME_SIZE + self.data.len());
        buf.push(MESG_TX_SYNC);
        buf.push(self.data.len() as u8);
        buf.push(self.id);
        buf.extend_from_slice(&self.data);
        buf.push(generate_checksum(&buf));
        buf
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Frame ID: 0x{:02X} DATA: {:02x?}", self.id, self.data)
    }
}

/// ReadBuffer collects bytes read from the radio and splits them into frames.
/// Bytes before a sync byte are dropped. A frame that is cut short is kept
/// until the rest of it arrives with the next read. A sync byte is taken as
/// noise, reported and skipped when its frame fails the checksum, when its
/// LEN byte is larger than any radio sends, or when a complete valid frame
/// starts before its own frame is complete.
#[derive(Debug, Default)]
pub struct ReadBuffer {
    inner: Vec<u8>,
}

impl ReadBuffer {
    pub fn new() -> Self {
        ReadBuffer { inner: Vec::new() }
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.inner.extend_from_slice(data);
    }

    /// Bytes waiting to become a complete frame.
    pub fn pending(&self) -> usize {
        self.inner.len()
    }

    /// Drops the sync byte at the front of the buffer.
    fn skip_sync(&mut self, reason: &str) -> AntError {
        let end = self.inner.len().min(MESG_HEADER_SIZE);
        let err = AntError::Malformed(format!("{}: {:02x?}", reason, &self.inner[..end]));
        self.inner.drain(..MESG_SYNC_SIZE);
        err
    }

    fn valid_frame_after_sync(&self) -> bool {
        self.inner
            .iter()
            .enumerate()
            .skip(MESG_SYNC_SIZE)
            .any(|(i, &b)| b == MESG_TX_SYNC && complete_frame_len(&self.inner[i..]).is_some())
    }
}

/// Length of the checksummed frame at the start of `buf`, if it is complete.
fn complete_frame_len(buf: &[u8]) -> Option<usize> {
    let size = *buf.get(MESG_SIZE_OFFSET)? as usize;
    if size > MESG_MAX_SIZE_VALUE {
        return None;
    }
    let len = size + MESG_FRAME_SIZE;
    if buf.len() < len || !validate_checksum(&buf[..len]) {
        return None;
    }
    Some(len)
}

impl Iterator for ReadBuffer {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.iter().position(|&b| b == MESG_TX_SYNC) {
            Some(index) => {
                self.inner.drain(..index);
            }
            None => {
                self.inner.clear();
                return None;
            }
        }
        if self.inner.len() < MESG_SIZE_OFFSET + MESG_SIZE_SIZE {
            return None;
        }
        let size = self.inner[MESG_SIZE_OFFSET] as usize;
        if size > MESG_MAX_SIZE_VALUE {
            return Some(Err(self.skip_sync("length out of range")));
        }
        let len = size + MESG_FRAME_SIZE;
        if self.inner.len() < len {
            if self.valid_frame_after_sync() {
                return Some(Err(self.skip_sync("frame cut short")));
            }
            return None;
        }
        if validate_checksum(&self.inner[..len]) {
            return Some(Ok(self.inner.drain(..len).collect()));
        }
        let bad = self.inner[..len].to_vec();
        self.inner.drain(..MESG_SYNC_SIZE);
        Some(Err(AntError::Checksum(bad)))
    }
}

/// A typed argument value, packed or unpacked according to a catalog field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    U8(u8),
    Bool(bool),
    U16(u16),
    U32(u32),
    U64(u64),
    Bytes(Vec<u8>),
}

impl Value {
    /// Integer view used when packing into a field of a different width.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::U8(v) => Some(*v as u64),
            Value::Bool(v) => Some(*v as u64),
            Value::U16(v) => Some(*v as u64),
            Value::U32(v) => Some(*v as u64),
            Value::U64(v) => Some(*v),
            Value::Bytes(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::U8(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Value::U16(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::U32(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::U64(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<[u8; 8]> for Value {
    fn from(v: [u8; 8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

/// Named arguments of a decoded message, in layout order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Args(Vec<(&'static str, Value)>);

impl Args {
    pub fn new() -> Self {
        Args(Vec::new())
    }

    pub fn push(&mut self, name: &'static str, value: Value) {
        self.0.push((name, value));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Value)> {
        self.0.iter().map(|(n, v)| (*n, v))
    }

    /// Values in layout order, suitable for re-encoding.
    pub fn values(&self) -> Vec<Value> {
        self.0.iter().map(|(_, v)| v.clone()).collect()
    }

    /// Integer field narrowed to u8. Fails if missing or out of range.
    pub fn u8(&self, name: &str) -> Result<u8> {
        self.integer(name).and_then(|v| {
            u8::try_from(v).map_err(|_| AntError::Malformed(format!("{} out of range", name)))
        })
    }

    pub fn u16(&self, name: &str) -> Result<u16> {
        self.integer(name).and_then(|v| {
            u16::try_from(v).map_err(|_| AntError::Malformed(format!("{} out of range", name)))
        })
    }

    pub fn u32(&self, name: &str) -> Result<u32> {
        self.integer(name).and_then(|v| {
            u32::try_from(v).map_err(|_| AntError::Malformed(format!("{} out of range", name)))
        })
    }

    pub fn bytes(&self, name: &str) -> Result<&[u8]> {
        self.get(name)
            .and_then(Value::as_bytes)
            .ok_or_else(|| AntError::Malformed(format!("missing byte field {}", name)))
    }

    fn integer(&self, name: &str) -> Result<u64> {
        self.get(name)
            .and_then(Value::as_u64)
            .ok_or_else(|| AntError::Malformed(format!("missing integer field {}", name)))
    }
}

/// A message decoded by the dialect. Immutable once created.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AntMessage {
    pub msg_id: u8,
    pub name: &'static str,
    pub args: Args,
    /// Bytes trailing the fixed layout, empty for plain messages.
    pub extended: Vec<u8>,
}

impl AntMessage {
    pub fn extended_data(&self) -> Option<ExtendedData> {
        ExtendedData::parse(&self.extended)
    }
}

impl fmt::Display for AntMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}(0x{:02X})", self.name, self.msg_id)?;
        for (name, value) in self.args.iter() {
            write!(f, " {}={:x?}", name, value)?;
        }
        if !self.extended.is_empty() {
            write!(f, " extended={:02x?}", self.extended)?;
        }
        Ok(())
    }
}

fn expect_id(message: &AntMessage, msg_id: u8) -> Result<()> {
    if message.msg_id == msg_id {
        Ok(())
    } else {
        Err(AntError::Malformed(format!(
            "expected message 0x{:02X}, got {}",
            msg_id, message
        )))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartupReason {
    PowerOnReset,
    HardwareResetLine,
    WatchDogReset,
    CommandReset,
    SynchronousReset,
    SuspendReset,
    Error,
}

impl From<u8> for StartupReason {
    fn from(reason: u8) -> Self {
        match reason {
            0x00 => StartupReason::PowerOnReset,
            0x01 => StartupReason::HardwareResetLine,
            0x02 => StartupReason::WatchDogReset,
            0x20 => StartupReason::CommandReset,
            0x40 => StartupReason::SynchronousReset,
            0x80 => StartupReason::SuspendReset,
            _ => StartupReason::Error,
        }
    }
}

impl TryFrom<&AntMessage> for StartupReason {
    type Error = AntError;

    fn try_from(message: &AntMessage) -> Result<Self> {
        expect_id(message, MESG_STARTUP_MESG_ID)?;
        Ok(StartupReason::from(message.args.u8("startup_message")?))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelResponseCode {
    ResponseNoError,
    EventRxSearchTimeout,
    EventRxFail,
    EventTx,
    EventTransferRxFailed,
    EventTransferTxCompleted,
    EventTransferTxFailed,
    EventChannelClosed,
    EventRxFailGoToSearch,
    ChannelCollision,
    EventTransferTxStart,
    ChannelInWrongState,
    ChannelNotOpened,
    ChannelIdNotSet,
    CloseAllChannels,
    TransferInProgress,
    TransferSequenceNumberError,
    TransferInError,
    InvalidMessage,
    InvalidNetworkNumber,
    Other(u8),
}

impl From<u8> for ChannelResponseCode {
    fn from(code: u8) -> Self {
        match code {
            0x00 => ChannelResponseCode::ResponseNoError,
            0x01 => ChannelResponseCode::EventRxSearchTimeout,
            0x02 => ChannelResponseCode::EventRxFail,
            0x03 => ChannelResponseCode::EventTx,
            0x04 => ChannelResponseCode::EventTransferRxFailed,
            0x05 => ChannelResponseCode::EventTransferTxCompleted,
            0x06 => ChannelResponseCode::EventTransferTxFailed,
            0x07 => ChannelResponseCode::EventChannelClosed,
            0x08 => ChannelResponseCode::EventRxFailGoToSearch,
            0x09 => ChannelResponseCode::ChannelCollision,
            0x0A => ChannelResponseCode::EventTransferTxStart,
            0x15 => ChannelResponseCode::ChannelInWrongState,
            0x16 => ChannelResponseCode::ChannelNotOpened,
            0x18 => ChannelResponseCode::ChannelIdNotSet,
            0x19 => ChannelResponseCode::CloseAllChannels,
            0x1F => ChannelResponseCode::TransferInProgress,
            0x20 => ChannelResponseCode::TransferSequenceNumberError,
            0x21 => ChannelResponseCode::TransferInError,
            0x28 => ChannelResponseCode::InvalidMessage,
            0x29 => ChannelResponseCode::InvalidNetworkNumber,
            other => ChannelResponseCode::Other(other),
        }
    }
}

/// A channel response or channel event (message 0x40). Responses echo the id
/// of the command they answer, events carry MESG_EVENT_ID.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelEvent {
    pub channel: u8,
    pub message_id: u8,
    pub code: u8,
}

impl ChannelEvent {
    pub fn is_event(&self) -> bool {
        self.message_id == MESG_EVENT_ID
    }

    pub fn code(&self) -> ChannelResponseCode {
        ChannelResponseCode::from(self.code)
    }
}

impl TryFrom<&AntMessage> for ChannelEvent {
    type Error = AntError;

    fn try_from(message: &AntMessage) -> Result<Self> {
        expect_id(message, MESG_RESPONSE_EVENT_ID)?;
        Ok(ChannelEvent {
            channel: message.args.u8("channel_number")?,
            message_id: message.args.u8("message_id")?,
            code: message.args.u8("message_code")?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capabilities {
    pub max_channels: u8,
    pub max_networks: u8,
    pub standard_options: u8,
    pub advanced_options: u8,
    pub advanced_options_2: u8,
}

impl TryFrom<&AntMessage> for Capabilities {
    type Error = AntError;

    fn try_from(message: &AntMessage) -> Result<Self> {
        expect_id(message, MESG_CAPABILITIES_ID)?;
        Ok(Capabilities {
            max_channels: message.args.u8("max_channels")?,
            max_networks: message.args.u8("max_networks")?,
            standard_options: message.args.u8("standard_options")?,
            advanced_options: message.args.u8("advanced_options")?,
            advanced_options_2: message.args.u8("advanced_options_2")?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelId {
    pub channel: u8,
    pub device_number: u16,
    pub device_type: u8,
    pub trans_type: u8,
}

impl TryFrom<&AntMessage> for ChannelId {
    type Error = AntError;

    fn try_from(message: &AntMessage) -> Result<Self> {
        expect_id(message, MESG_CHANNEL_ID_ID)?;
        Ok(ChannelId {
            channel: message.args.u8("channel_number")?,
            device_number: message.args.u16("device_number")?,
            device_type: message.args.u8("device_type_id")?,
            trans_type: message.args.u8("trans_type")?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    Unassigned,
    Assigned,
    Searching,
    Tracking,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelStatus {
    pub channel: u8,
    pub state: ChannelState,
    pub network: u8,
    pub channel_type: u8,
}

impl TryFrom<&AntMessage> for ChannelStatus {
    type Error = AntError;

    fn try_from(message: &AntMessage) -> Result<Self> {
        expect_id(message, MESG_CHANNEL_STATUS_ID)?;
        let status = message.args.u8("channel_status")?;
        let state = match status & 0x03 {
            0 => ChannelState::Unassigned,
            1 => ChannelState::Assigned,
            2 => ChannelState::Searching,
            _ => ChannelState::Tracking,
        };
        Ok(ChannelStatus {
            channel: message.args.u8("channel_number")?,
            state,
            network: (status >> 2) & 0x03,
            channel_type: status >> 4,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rssi {
    pub measurement_type: u8,
    pub value: i8,
    pub threshold: i8,
}

/// Device identifying data a radio appends to data messages once extended
/// messages are enabled. The first byte is a flag field telling which of the
/// optional blocks follow, in flag bit order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExtendedData {
    pub channel_id: Option<(u16, u8, u8)>,
    pub rssi: Option<Rssi>,
    pub timestamp: Option<u16>,
}

impl ExtendedData {
    /// Parses an extended tail. Returns None for an empty tail or when the
    /// tail is shorter than its flag byte announces.
    pub fn parse(tail: &[u8]) -> Option<ExtendedData> {
        let (&flags, mut rest) = tail.split_first()?;
        let mut data = ExtendedData::default();
        if flags & EXT_FLAG_CHANNEL_ID != 0 {
            let block = rest.get(..4)?;
            data.channel_id = Some((
                u16::from_le_bytes([block[0], block[1]]),
                block[2],
                block[3],
            ));
            rest = &rest[4..];
        }
        if flags & EXT_FLAG_RSSI != 0 {
            let block = rest.get(..3)?;
            data.rssi = Some(Rssi {
                measurement_type: block[0],
                value: block[1] as i8,
                threshold: block[2] as i8,
            });
            rest = &rest[3..];
        }
        if flags & EXT_FLAG_TIMESTAMP != 0 {
            let block = rest.get(..2)?;
            data.timestamp = Some(u16::from_le_bytes([block[0], block[1]]));
        }
        Some(data)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn startup() -> Vec<u8> {
        Frame::new(MESG_STARTUP_MESG_ID, &[0x00]).encode()
    }

    #[test]
    fn test_generate_checksum() {
        assert_eq!(generate_checksum(b"\xA5\x5A"), 0xFF);
        assert_eq!(generate_checksum(b"\xA5\x5A\xFF"), 0x00);
    }

    #[test]
    fn test_validate_checksum() {
        assert!(validate_checksum(b"\xA5\x5A\xFF"));
        assert!(validate_checksum(b"\xA5\x5A\xFF\x00"));
        assert!(!validate_checksum(b"\xA5\x5A\xFF\x01"));
    }

    #[test]
    fn test_encode() {
        let data = vec![1, 0xac, 2, 0x5c, 3];
        let buf = Frame::new(MESG_CAPABILITIES_ID, &data).encode();
        assert_eq!(buf.len(), data.len() + 4);
        assert_eq!(buf[0], MESG_TX_SYNC);
        assert_eq!(buf[1], data.len() as u8);
        //MESG_CAPABILITIES_ID = 0x54
        assert_eq!(buf[2], 0x54);
        assert_eq!(buf[3..8], data[..]);
        assert!(validate_checksum(&buf));
    }

    #[test]
    fn test_read_buffer() {
        let mut buffer = startup();
        buffer.extend_from_slice(&startup());
        buffer.extend_from_slice(&startup());
        let mut read_buffer = ReadBuffer::new();
        read_buffer.extend(&buffer);
        assert_eq!(read_buffer.next(), Some(Ok(startup())));
        assert_eq!(read_buffer.next(), Some(Ok(startup())));
        assert_eq!(read_buffer.next(), Some(Ok(startup())));
        assert_eq!(read_buffer.next(), None);
        assert_eq!(read_buffer.pending(), 0);
    }

    #[test]
    fn test_read_buffer_with_invalid_data() {
        let mut buffer = startup();
        buffer.extend_from_slice(&[0, 1, 2, 3]);
        buffer.extend_from_slice(&startup());
        let mut read_buffer = ReadBuffer::new();
        read_buffer.extend(&buffer);
        assert_eq!(read_buffer.next(), Some(Ok(startup())));
        assert_eq!(read_buffer.next(), Some(Ok(startup())));
        assert_eq!(read_buffer.next(), None);
    }

    #[test]
    fn test_read_buffer_with_invalid_mesg() {
        let mut buffer = startup();
        buffer.extend_from_slice(&[MESG_TX_SYNC, 1, 2, 0, 9]);
        buffer.extend_from_slice(&startup());
        let mut read_buffer = ReadBuffer::new();
        read_buffer.extend(&buffer);
        assert_eq!(read_buffer.next(), Some(Ok(startup())));
        match read_buffer.next() {
            Some(Err(AntError::Checksum(frame))) => assert_eq!(frame, vec![MESG_TX_SYNC, 1, 2, 0, 9]),
            other => panic!("expected checksum error, got {:?}", other),
        }
        assert_eq!(read_buffer.next(), Some(Ok(startup())));
        assert_eq!(read_buffer.next(), None);
    }

    #[test]
    fn test_read_buffer_split_frame() {
        let frame = startup();
        let mut read_buffer = ReadBuffer::new();
        read_buffer.extend(&frame[..2]);
        assert_eq!(read_buffer.next(), None);
        assert_eq!(read_buffer.pending(), 2);
        read_buffer.extend(&frame[2..]);
        assert_eq!(read_buffer.next(), Some(Ok(frame)));
    }

    #[test]
    fn test_read_buffer_resyncs_after_oversized_length() {
        let mut read_buffer = ReadBuffer::new();
        read_buffer.extend(&[MESG_TX_SYNC, 0xF0]);
        read_buffer.extend(&startup());
        assert!(matches!(read_buffer.next(), Some(Err(AntError::Malformed(_)))));
        assert_eq!(read_buffer.next(), Some(Ok(startup())));
        assert_eq!(read_buffer.next(), None);
        assert_eq!(read_buffer.pending(), 0);
    }

    #[test]
    fn test_read_buffer_resyncs_on_truncated_frame() {
        // LEN is in range but the frame never completes before the next one.
        let mut read_buffer = ReadBuffer::new();
        read_buffer.extend(&[MESG_TX_SYNC, 0x10, 0x4E]);
        read_buffer.extend(&startup());
        assert!(matches!(read_buffer.next(), Some(Err(AntError::Malformed(_)))));
        assert_eq!(read_buffer.next(), Some(Ok(startup())));
        assert_eq!(read_buffer.next(), None);
    }

    #[test]
    fn test_read_buffer_waits_for_long_frame() {
        let frame = Frame::new(MESG_BROADCAST_DATA_ID, &[0, 1, 2, 3, 4, 5, 6, 7, 8]).encode();
        let mut read_buffer = ReadBuffer::new();
        read_buffer.extend(&frame[..6]);
        assert_eq!(read_buffer.next(), None);
        assert_eq!(read_buffer.pending(), 6);
        read_buffer.extend(&frame[6..]);
        assert_eq!(read_buffer.next(), Some(Ok(frame)));
    }

    #[test]
    fn test_startup_reason() {
        assert_eq!(StartupReason::from(0), StartupReason::PowerOnReset);
        assert_eq!(StartupReason::from(0x01), StartupReason::HardwareResetLine);
        assert_eq!(StartupReason::from(0x02), StartupReason::WatchDogReset);
        assert_eq!(StartupReason::from(0x20), StartupReason::CommandReset);
        assert_eq!(StartupReason::from(0x40), StartupReason::SynchronousReset);
        assert_eq!(StartupReason::from(0x80), StartupReason::SuspendReset);
        assert_eq!(StartupReason::from(0x95), StartupReason::Error);
    }

    #[test]
    fn test_channel_response_code() {
        assert_eq!(ChannelResponseCode::from(0x00), ChannelResponseCode::ResponseNoError);
        assert_eq!(ChannelResponseCode::from(0x07), ChannelResponseCode::EventChannelClosed);
        assert_eq!(ChannelResponseCode::from(0x15), ChannelResponseCode::ChannelInWrongState);
        assert_eq!(ChannelResponseCode::from(0x99), ChannelResponseCode::Other(0x99));
    }

    #[test]
    fn test_args_narrowing() {
        let mut args = Args::new();
        args.push("channel_number", Value::U8(3));
        args.push("device_number", Value::U16(0x1234));
        assert_eq!(args.u8("channel_number").unwrap(), 3);
        assert_eq!(args.u16("channel_number").unwrap(), 3);
        assert_eq!(args.u16("device_number").unwrap(), 0x1234);
        assert!(args.u8("device_number").is_err());
        assert!(args.u8("missing").is_err());
        assert!(args.bytes("device_number").is_err());
    }

    #[test]
    fn test_extended_data() {
        let tail = [0xE0, 0x34, 0x12, 0x78, 0x01, 0x20, 0xC4, 0xB0, 0xCD, 0xAB];
        let data = ExtendedData::parse(&tail).unwrap();
        assert_eq!(data.channel_id, Some((0x1234, 0x78, 0x01)));
        assert_eq!(
            data.rssi,
            Some(Rssi {
                measurement_type: 0x20,
                value: -60,
                threshold: -80,
            })
        );
        assert_eq!(data.timestamp, Some(0xABCD));
        assert_eq!(ExtendedData::parse(&[]), None);
        assert_eq!(ExtendedData::parse(&[0x80, 0x01]), None);
    }

    #[test]
    fn test_channel_status() {
        let mut args = Args::new();
        args.push("channel_number", Value::U8(2));
        args.push("channel_status", Value::U8(0b0001_0111));
        let message = AntMessage {
            msg_id: MESG_CHANNEL_STATUS_ID,
            name: "ChannelStatus",
            args,
            extended: vec![],
        };
        let status = ChannelStatus::try_from(&message).unwrap();
        assert_eq!(status.channel, 2);
        assert_eq!(status.state, ChannelState::Tracking);
        assert_eq!(status.network, 1);
        assert_eq!(status.channel_type, 1);
        assert!(ChannelId::try_from(&message).is_err());
    }
}
