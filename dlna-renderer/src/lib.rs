//! Control point for UPnP/DLNA media renderers
//!
//! `dlna-renderer` drives a renderer through its AVTransport and
//! RenderingControl services: transport control, seeking, position and
//! duration queries, volume and mute, and loading media with DIDL-Lite
//! metadata. State changes pushed by the device over GENA are decoded into
//! typed events and delivered to registered listeners.
//!
//! # Quick start
//!
//! ```no_run
//! use std::net::{IpAddr, Ipv4Addr};
//! use dlna_renderer::{MediaRenderer, Service, ServiceDescription, ServiceEntry};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let base = "http://192.168.1.50:49152";
//! let description = ServiceDescription::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 50)), 49152)
//!     .with_service(ServiceEntry::new(
//!         Service::AVTransport.urn(),
//!         base,
//!         "/AVTransport/Control",
//!         Some("/AVTransport/Event".to_string()),
//!     ));
//!
//! let renderer = MediaRenderer::new(description)?;
//! renderer.pause().wait()?;
//!
//! let handle = renderer
//!     .subscribe_play_state(|state| println!("now {state:?}"))
//!     .wait()?;
//! // ...
//! handle.unsubscribe().wait()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Errors
//!
//! Each command resolves exactly once, with a value or a [`CommandError`].
//! Subscriptions are best effort: when a device refuses a SUBSCRIBE the
//! listener stays registered but receives nothing, and no error is
//! reported.

mod completion;
mod config;
mod description;
mod dispatcher;
mod endpoint;
mod error;
mod events;
mod model;
mod renderer;
mod service;
mod subscription;

pub use completion::{CallbackExecutor, ChannelExecutor, InlineExecutor, Pending, Task};
pub use config::{RendererConfig, RetryPolicy};
pub use description::{ServiceDescription, ServiceEntry};
pub use dispatcher::CommandDispatcher;
pub use endpoint::{Capability, ServiceEndpoint, ServiceEndpoints};
pub use error::{CommandError, RendererError, Result};
pub use events::{decode_notification, parse_last_change, EventTarget, RendererEvent, StateVariable};
pub use model::{MediaInfo, MediaRequest, MimeType, PlayState};
pub use renderer::{MediaRenderer, MediaRendererBuilder};
pub use service::Service;
pub use subscription::{ListenerHandle, ListenerId, SubscriptionInfo, SubscriptionManager};

pub use soap_client::{FieldExtractor, FirstMatchExtractor, HttpTransport, SoapAction};
