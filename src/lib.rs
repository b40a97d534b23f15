//! # reliable-socket
//!
//! A resilient client-side connection wrapper: automatic reconnection with a
//! fixed retry delay, ordered buffering of payloads sent while offline, and
//! an observable lifecycle phase machine.
//!
//! ## Architecture
//!
//! - **Phase machine** ([`Phase`], [`phase::StateMachine`]): tracks the
//!   connection lifecycle and fires subscriber callbacks on every change
//! - **Pending store** ([`PendingStore`]): ordered buffer for payloads that
//!   could not be sent, in memory or persisted via sled
//! - **Transport** ([`transport`]): capability traits over the socket halves,
//!   with a tokio-tungstenite WebSocket implementation
//! - **Socket** ([`ReliableSocket`]): ties the pieces together under a single
//!   driver task
//!
//! ## Usage
//!
//! ```no_run
//! use reliable_socket::{ReliableSocket, SocketOptions};
//!
//! #[tokio::main]
//! async fn main() -> reliable_socket::Result<()> {
//!     let socket = ReliableSocket::new("ws://localhost:3000", SocketOptions::default());
//!     socket.connect().await?;
//!     socket.send("hello").await?;
//!     socket.close().await;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod payload;
pub mod phase;
pub mod socket;
pub mod store;
pub mod transport;

pub use error::{Result, SocketError};
pub use payload::{BlobSource, FileSource, Outbound};
pub use phase::Phase;
pub use socket::{default_buffer_dir, ReliableSocket, SocketOptions};
pub use store::{DurableStore, MemoryStore, PendingEntry, PendingStore};
pub use transport::{Connector, TransportSink, TransportStream, WsConnector};
