//! UPnP callback server for receiving GENA event notifications.
//!
//! This crate provides a lightweight HTTP server for handling UPnP NOTIFY
//! requests. It knows nothing about renderers or service types; it only
//! accepts notifications on the paths it has been told about and hands the
//! raw bodies to a channel.
//!
//! # Overview
//!
//! - [`CallbackServer`]: binds a local port (ephemeral by default) and
//!   answers NOTIFY requests.
//! - [`EventRouter`]: the set of callback paths currently advertised to
//!   devices; forwards matching notifications to a channel.
//! - [`NotificationPayload`]: path, subscription ID and raw XML body of one
//!   notification.
//!
//! # Example
//!
//! ```no_run
//! use std::net::{IpAddr, Ipv4Addr, SocketAddr};
//! use callback_server::{CallbackServer, NotificationPayload};
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), callback_server::ServerError> {
//!     let device_ip: IpAddr = "192.168.1.40".parse().unwrap();
//!     let (tx, mut rx) = mpsc::unbounded_channel::<NotificationPayload>();
//!
//!     let local_ip = CallbackServer::detect_local_ip(device_ip)?;
//!     let bind = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
//!     let server = CallbackServer::start(bind, local_ip, tx).await?;
//!     server.router().register("/RenderingControl/Event").await;
//!
//!     tokio::spawn(async move {
//!         while let Some(notification) = rx.recv().await {
//!             println!("{} -> {}", notification.path, notification.event_xml);
//!         }
//!     });
//!
//!     server.shutdown().await;
//!     Ok(())
//! }
//! ```

mod error;
pub mod router;
mod server;

pub use error::ServerError;
pub use router::{EventRouter, NotificationPayload};
pub use server::CallbackServer;
