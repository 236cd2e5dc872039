//! # Expedition Sync
//!
//! Real-time synchronization layer for shared expedition tracking.
//!
//! The crate sits between a socket transport and the UI. It tracks connection
//! health, keeps a bounded list of recent expedition updates, keeps the
//! client's room subscriptions consistent across reconnects and turns updates
//! into haptic cues and popup messages.
//!
//! ## Features
//!
//! - **Transport-agnostic**: implement [`Transport`] for any event source, or
//!   drive a [`SocketClient`] over any [`FrameChannel`](socket::FrameChannel)
//! - **WebSocket built-in**: the default `transport-websocket` feature provides
//!   `WebSocketChannel` and `WebSocketDialer`
//! - **One facade**: [`SyncFacade`] is the single object UI surfaces need
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # async fn example() -> expedition_sync::Result<()> {
//! use std::sync::Arc;
//! use expedition_sync::{
//!     SocketClient, SocketConfig, SyncConfig, SyncFacade, TracingSink, WebSocketDialer,
//! };
//!
//! let client = SocketClient::start(
//!     WebSocketDialer::new("ws://localhost:3000/socket"),
//!     SocketConfig::default(),
//! );
//! let sync = SyncFacade::new(
//!     client,
//!     SyncConfig::new().with_room(Some(42)),
//!     Arc::new(TracingSink),
//!     Arc::new(TracingSink),
//! )?;
//!
//! let mut updates = sync.subscribe();
//! while let Ok(update) = updates.recv().await {
//!     println!("{} updates so far, latest: {update:?}", sync.recent_updates().len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod facade;
pub mod monitor;
pub mod notify;
pub mod protocol;
pub mod rooms;
pub mod socket;
pub mod transport;
pub mod transports;
pub mod update;
pub mod update_log;

// Re-export primary types for ergonomic imports.
pub use error::{Result, SyncError};
pub use facade::{SyncConfig, SyncFacade};
pub use monitor::{ConnectionMonitor, ConnectionState, HandlerId, MonitorConfig};
pub use notify::{
    HapticCue, HapticSink, NotificationDispatcher, NotificationPolicy, PopupSink, TracingSink,
};
pub use rooms::{RoomBinding, RoomSubscriptionManager};
pub use socket::{SocketClient, SocketConfig};
pub use transport::{ListenerId, ListenerSet, Transport, TransportEvent};
pub use update::{ExpeditionId, Update, UpdateKind, UpdatePayload};
pub use update_log::UpdateLog;

#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketChannel, WebSocketDialer};
