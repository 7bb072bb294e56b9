pub mod broker;
pub mod error;
pub mod manager;
pub mod store;

pub use broker::{
    BrokerClient, PeekedMessage, QueueAttributes, QueueInfo, ReceivedMessage, RedrivePolicy,
};
pub use error::{BrokerError, BrokerErrorKind, QueueError};
pub use manager::QueueManager;
pub use store::{FjallBroker, MAX_MESSAGE_BYTES, QueueDepth};
