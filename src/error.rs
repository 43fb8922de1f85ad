use rusb::Error as USBError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AntError {
    #[error("{0}")]
    UsbDeviceError(#[from] USBError),
    #[error("checksum mismatch in frame {0:02x?}")]
    Checksum(Vec<u8>),
    #[error("unknown message id 0x{0:02X}")]
    UnknownMessage(u8),
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("cannot encode message: {0}")]
    Encoding(String),
    #[error("timed out waiting for reply")]
    Timeout,
    #[error("message 0x{msg_id:02X} failed with code 0x{code:02X}")]
    MessageFailed { msg_id: u8, code: u8 },
    #[error("{0}")]
    ApiUsage(String),
    #[error("dispatcher already running")]
    AlreadyRunning,
    #[error("dispatcher is not running")]
    NotRunning,
    #[error("reply channel disconnected")]
    Disconnected,
}
