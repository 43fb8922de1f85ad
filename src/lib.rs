pub mod catalog;
pub mod channel;
mod commands;
pub mod device;
pub mod dialect;
pub mod dispatcher;
mod error;
pub mod future;
pub mod message;
pub mod network;
pub mod transport;
mod usb;
pub mod workflow;

pub type Result<T> = std::result::Result<T, error::AntError>;

pub use channel::Channel;
pub use commands::{check_response, response_matcher};
pub use device::Device;
pub use dialect::SerialDialect;
pub use dispatcher::{Dispatch, Dispatcher, Listener};
pub use error::AntError;
pub use future::{Future, MatchingListener, MessageMatcher};
pub use message::AntMessage;
pub use network::{Network, ANT_FS_NETWORK_KEY, ANT_PLUS_NETWORK_KEY};
pub use transport::Transport;
pub use usb::{Context, UsbDevice};
pub use workflow::{chain, execute, Chain, State, StepResult, Workflow};
