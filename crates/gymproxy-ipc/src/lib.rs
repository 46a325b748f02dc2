//! Multipart request/reply transport for the gym proxy over TCP or UNIX sockets.

mod error;

pub mod client;
pub mod codec;
pub mod framing;
pub mod server;

pub use client::ProxyTransport;
pub use error::IpcError;
pub use server::{LifecycleEvent, ProxyListener, RequestHandler, serve};
