//! HTTP server for receiving UPnP event notifications.

use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use warp::http::StatusCode;
use warp::Filter;

use crate::error::ServerError;
use crate::router::{EventRouter, NotificationPayload};

/// HTTP callback server for receiving UPnP event notifications.
///
/// The `CallbackServer` binds a local port and accepts GENA `NOTIFY`
/// requests on the paths registered with its [`EventRouter`]. Every
/// notification delivered to a registered path is answered with 200,
/// whatever happens to it afterwards.
///
/// Not every request gets 200:
///
/// | Request | Status |
/// |---------|--------|
/// | `NOTIFY` to a registered path with valid GENA headers | 200 |
/// | `NOTIFY` to a path that is not registered | 404 |
/// | `NOTIFY` without `SID`, or with an `NT`/`NTS` other than `upnp:event`/`upnp:propchange` | 412 |
/// | any other method | 405 |
///
/// The 404 tells a device holding a stale subscription to drop it.
///
/// # Example
///
/// ```no_run
/// use std::net::{IpAddr, Ipv4Addr, SocketAddr};
/// use tokio::sync::mpsc;
/// use callback_server::{CallbackServer, NotificationPayload};
///
/// #[tokio::main]
/// async fn main() {
///     let (tx, mut rx) = mpsc::unbounded_channel::<NotificationPayload>();
///     let bind = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
///     let advertised = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20));
///
///     let server = CallbackServer::start(bind, advertised, tx)
///         .await
///         .expect("Failed to start callback server");
///     server.router().register("/AVTransport/Event").await;
///
///     println!("Callback URL: {}/AVTransport/Event", server.base_url());
///
///     while let Some(notification) = rx.recv().await {
///         println!("Event for {}: {}", notification.subscription_id, notification.event_xml);
///     }
/// }
/// ```
pub struct CallbackServer {
    /// The port the server is bound to
    port: u16,
    /// `http://<advertised ip>:<port>`, the prefix of every CALLBACK URL
    base_url: String,
    event_router: Arc<EventRouter>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    server_handle: Option<tokio::task::JoinHandle<()>>,
}

impl CallbackServer {
    /// Bind `bind_addr` (port 0 picks an ephemeral port) and start serving.
    ///
    /// `advertised_ip` is the address devices will be told to call back on;
    /// see [`CallbackServer::detect_local_ip`].
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start(
        bind_addr: SocketAddr,
        advertised_ip: IpAddr,
        event_sender: mpsc::UnboundedSender<NotificationPayload>,
    ) -> Result<Self, ServerError> {
        let event_router = Arc::new(EventRouter::new(event_sender));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let routes = Self::routes(event_router.clone());
        let (addr, server) = warp::serve(routes)
            .try_bind_with_graceful_shutdown(bind_addr, async move {
                shutdown_rx.recv().await;
            })
            .map_err(|e| ServerError::Bind {
                addr: bind_addr.to_string(),
                message: e.to_string(),
            })?;

        let port = addr.port();
        let base_url = match advertised_ip {
            IpAddr::V4(ip) => format!("http://{ip}:{port}"),
            IpAddr::V6(ip) => format!("http://[{ip}]:{port}"),
        };
        info!(%addr, base_url = %base_url, "Callback server listening");

        let server_handle = tokio::spawn(server);

        Ok(Self {
            port,
            base_url,
            event_router,
            shutdown_tx: Some(shutdown_tx),
            server_handle: Some(server_handle),
        })
    }

    /// Base URL for CALLBACK headers; append the registered path.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get the port the server is bound to.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The router deciding which paths accept notifications.
    pub fn router(&self) -> &Arc<EventRouter> {
        &self.event_router
    }

    /// Shutdown the callback server gracefully, waiting for in-flight
    /// requests to complete.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.server_handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Callback server task ended abnormally");
            }
        }
        info!(port = self.port, "Callback server stopped");
    }

    /// Local address the OS would use to reach `device_ip`.
    ///
    /// Connecting a UDP socket only selects a route; no packet is sent.
    pub fn detect_local_ip(device_ip: IpAddr) -> Result<IpAddr, ServerError> {
        let unspecified: SocketAddr = match device_ip {
            IpAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            IpAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let unavailable = |_| ServerError::LocalIpUnavailable(device_ip.to_string());

        let socket = UdpSocket::bind(unspecified).map_err(unavailable)?;
        socket.connect((device_ip, 1900)).map_err(unavailable)?;
        let local = socket.local_addr().map_err(unavailable)?.ip();

        if local.is_unspecified() {
            return Err(ServerError::LocalIpUnavailable(device_ip.to_string()));
        }
        Ok(local)
    }

    fn routes(
        event_router: Arc<EventRouter>,
    ) -> impl Filter<Extract = (impl warp::Reply,), Error = Infallible> + Clone {
        warp::method()
            .and(warp::path::full())
            .and(warp::header::optional::<String>("sid"))
            .and(warp::header::optional::<String>("nt"))
            .and(warp::header::optional::<String>("nts"))
            .and(warp::body::bytes())
            .and_then(
                move |method: warp::http::Method,
                      path: warp::path::FullPath,
                      sid: Option<String>,
                      nt: Option<String>,
                      nts: Option<String>,
                      body: bytes::Bytes| {
                    let router = event_router.clone();
                    async move {
                        if method.as_str() != "NOTIFY" {
                            return Err(warp::reject::custom(MethodNotAllowed));
                        }

                        debug!(
                            path = path.as_str(),
                            sid = sid.as_deref().unwrap_or("-"),
                            bytes = body.len(),
                            "Incoming NOTIFY"
                        );

                        if !validate_upnp_headers(&sid, &nt, &nts) {
                            warn!(path = path.as_str(), "Rejecting NOTIFY with invalid GENA headers");
                            return Err(warp::reject::custom(InvalidUpnpHeaders));
                        }
                        let subscription_id = sid.ok_or_else(|| warp::reject::custom(InvalidUpnpHeaders))?;
                        let event_xml = String::from_utf8_lossy(&body).into_owned();

                        if router.route_event(path.as_str(), subscription_id, event_xml).await {
                            Ok(warp::reply::with_status("", StatusCode::OK))
                        } else {
                            warn!(path = path.as_str(), "NOTIFY for unregistered callback path");
                            Err(warp::reject::not_found())
                        }
                    }
                },
            )
            .recover(handle_rejection)
    }
}

/// Validate GENA event notification headers.
///
/// `SID` is required; `NT`/`NTS`, when both present, must be the event
/// notification values.
fn validate_upnp_headers(sid: &Option<String>, nt: &Option<String>, nts: &Option<String>) -> bool {
    if sid.as_deref().map_or(true, |s| s.trim().is_empty()) {
        return false;
    }
    if let (Some(nt_val), Some(nts_val)) = (nt, nts) {
        if nt_val != "upnp:event" || nts_val != "upnp:propchange" {
            return false;
        }
    }
    true
}

#[derive(Debug)]
struct InvalidUpnpHeaders;

impl warp::reject::Reject for InvalidUpnpHeaders {}

#[derive(Debug)]
struct MethodNotAllowed;

impl warp::reject::Reject for MethodNotAllowed {}

async fn handle_rejection(err: warp::Rejection) -> Result<impl warp::Reply, Infallible> {
    let (code, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Unknown callback path")
    } else if err.find::<InvalidUpnpHeaders>().is_some() {
        // GENA answers missing or bad NT/NTS/SID with 412
        (StatusCode::PRECONDITION_FAILED, "Invalid UPnP headers")
    } else if err.find::<MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Only NOTIFY is accepted")
    } else {
        (StatusCode::BAD_REQUEST, "Bad request")
    };

    Ok(warp::reply::with_status(message, code))
}
