//! Domain - ドメインモデル（ids, message, queue metadata, state, errors）

pub mod errors;
pub mod ids;
pub mod message;
pub mod queue;
pub mod state;

pub use errors::{ErrorKind, QueueError, QueueResult, StoreError, StoreResult};
pub use ids::{IdParseError, MessageId, PopReceipt, QueueId};
pub use message::{Message, MessageMetadata, PoppedMessage, StoredMessage};
pub use queue::{NewQueue, QueueMetadata, DEFAULT_VISIBILITY_TIMEOUT};
pub use state::MessageState;
