//! Broadcast chat server.
//!
//! One accept loop hands every connection to its own task. A connection is
//! asked for a nickname, joins the [`roster::Roster`], and from then on each
//! payload it sends is relayed by [`delivery::Delivery`] to everyone else.
//! Write or read failures evict exactly that connection.

pub mod client_handler;
pub mod delivery;
pub mod roster;
pub mod server;
pub mod server_listener;
pub mod server_types;

pub use delivery::{Delivery, DeliveryReport};
pub use server::{ChatServer, ServerConfig, ServerHandle};
pub use server_types::{ConnId, HandshakeError, ServerError};
