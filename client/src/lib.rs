//! Chat client: connect and identify with a nickname, relay server payloads
//! to an event bus, send prefixed messages on request.

pub mod client;
pub mod input_reader;
pub mod types;

pub use client::Client;
pub use input_reader::{Input, InputReader};
pub use types::{ClientConfig, ClientError};
