//! Client side of the streaming chat pipeline.
//!
//! [`encode_request`] turns a chat turn into the `GET /api/chat` URL,
//! [`StreamConsumer`] drives one event stream at a time and rebuilds the
//! assistant reply from its deltas.

pub mod consumer;
pub mod encoder;
pub mod error;
pub mod transport;

pub use consumer::{
    CONNECTION_LOST_MESSAGE, CONNECT_FAILED_MESSAGE, ConsumerState, DEFAULT_TIMEOUT,
    StreamConsumer, TIMEOUT_MESSAGE,
};
pub use encoder::{CHAT_PATH, encode_request};
pub use error::{ClientError, Result};
pub use transport::{EventSource, HttpEventSource, HttpTransport, Transport, TransportEvent};
