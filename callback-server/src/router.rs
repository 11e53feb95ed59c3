//! Callback path registry.
//!
//! This module provides the `EventRouter` which maintains the set of callback
//! paths advertised to devices and forwards incoming NOTIFY bodies to a channel.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

/// One NOTIFY request accepted by the callback server.
///
/// This is an unparsed GENA NOTIFY as received over HTTP: the path it was
/// delivered to, the subscription ID from its `SID` header and the raw body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationPayload {
    /// Request path, identical to the path advertised in the CALLBACK header
    pub path: String,
    /// Value of the `SID` header
    pub subscription_id: String,
    /// Request body, usually an `e:propertyset` document
    pub event_xml: String,
}

/// Decides which callback paths accept notifications and forwards the
/// accepted ones to a channel.
///
/// Paths are registered when a CALLBACK header advertising them is sent and
/// unregistered when the subscription ends. Notifications for unknown paths
/// are refused so the device drops its stale subscription.
#[derive(Clone)]
pub struct EventRouter {
    /// Callback paths currently advertised to devices
    paths: Arc<RwLock<HashSet<String>>>,
    event_sender: mpsc::UnboundedSender<NotificationPayload>,
}

impl EventRouter {
    /// A router with no registered paths, forwarding to `event_sender`.
    pub fn new(event_sender: mpsc::UnboundedSender<NotificationPayload>) -> Self {
        Self {
            paths: Arc::new(RwLock::new(HashSet::new())),
            event_sender,
        }
    }

    /// Register a callback path for event routing.
    ///
    /// # Example
    ///
    /// ```
    /// # use tokio::sync::mpsc;
    /// # use callback_server::router::{EventRouter, NotificationPayload};
    /// # #[tokio::main]
    /// # async fn main() {
    /// # let (tx, _rx) = mpsc::unbounded_channel::<NotificationPayload>();
    /// # let router = EventRouter::new(tx);
    /// router.register("/AVTransport/Event").await;
    /// # }
    /// ```
    pub async fn register(&self, path: impl Into<String>) {
        let path = normalize_path(path.into());
        debug!(path = %path, "Registered callback path");
        self.paths.write().await.insert(path);
    }

    /// Unregister a callback path.
    pub async fn unregister(&self, path: &str) {
        let path = normalize_path(path.to_string());
        self.paths.write().await.remove(&path);
    }

    pub async fn is_registered(&self, path: &str) -> bool {
        self.paths.read().await.contains(path)
    }

    /// Forward a notification delivered to `path`.
    ///
    /// Returns `false` if the path is not registered. A closed channel still
    /// counts as routed: the device did reach a live callback address.
    pub async fn route_event(&self, path: &str, subscription_id: String, event_xml: String) -> bool {
        if !self.is_registered(path).await {
            return false;
        }

        let payload = NotificationPayload {
            path: path.to_string(),
            subscription_id,
            event_xml,
        };
        if self.event_sender.send(payload).is_err() {
            debug!(path, "Notification receiver dropped; discarding event");
        }
        true
    }
}

/// Leading `/`, no query. Requests are matched on their path alone.
fn normalize_path(path: String) -> String {
    let path = match path.split_once('?') {
        Some((path, _)) => path.to_string(),
        None => path,
    };
    if path.starts_with('/') {
        path
    } else {
        format!("/{path}")
    }
}
