//! Concrete [`FrameChannel`](crate::socket::FrameChannel) implementations.
//!
//! Each channel sits behind a Cargo feature:
//!
//! | Feature                | Channel              | Dialer              |
//! |------------------------|----------------------|---------------------|
//! | `transport-websocket`  | [`WebSocketChannel`] | [`WebSocketDialer`] |

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-websocket")]
pub use websocket::{WebSocketChannel, WebSocketDialer};
