//! Parla Network Library
//!
//! TCP transport for the live translation room coordinator.
//!
//! # Architecture
//!
//! - **Server**: Accepts speaker, viewer and lobby connections and drives the
//!   core [`parla_core::Coordinator`]
//! - **Client**: Connects to a server and surfaces every push as an event
//! - **Protocol**: Length-prefixed JSON messages tagged by `type`
//!
//! # Usage
//!
//! ```ignore
//! let server = Server::start(coordinator, ServerOptions::default()).await?;
//!
//! let client = Client::connect(server.addr()).await?;
//! client.join_as_viewer("lecture-1").await?;
//! while let Some(event) = client.next_event().await {
//!     match event {
//!         ServerMessage::NewTranscription(msg) => { /* render */ }
//!         _ => {}
//!     }
//! }
//! ```

pub mod client;
pub mod error;
mod frame;
pub mod protocol;
pub mod server;

pub use client::{Client, ClientOptions, ConnectionState};
pub use error::{Error, Result};
pub use frame::DEFAULT_MAX_FRAME_SIZE;
pub use protocol::{ClientMessage, ServerMessage};
pub use server::{Server, ServerOptions};

/// Default listening port
pub const DEFAULT_PORT: u16 = 8080;
