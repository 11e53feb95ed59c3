//! GENA subscription table.
//!
//! Listener registrations are reference counts on the service that carries
//! their events: the first listener for a service SUBSCRIBEs it, the last one
//! to leave UNSUBSCRIBEs it. The callback server runs exactly while at least
//! one listener is registered and is started before any SUBSCRIBE goes out,
//! so every CALLBACK header names a live address.
//!
//! Failures here are absorbed. A SUBSCRIBE that fails leaves the service
//! unsubscribed and the listener simply receives nothing; the next listener
//! added for that service tries again.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};

use callback_server::{CallbackServer, EventRouter, NotificationPayload, ServerError};
use parking_lot::RwLock;
use soap_client::SoapClient;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::completion::{CallbackExecutor, Pending};
use crate::config::RendererConfig;
use crate::endpoint::ServiceEndpoints;
use crate::events::{decode_notification, EventTarget, RendererEvent};
use crate::service::Service;

/// Receives decoded events for one registration.
pub(crate) type EventSink = Arc<dyn Fn(RendererEvent) + Send + Sync>;

/// Identifies one listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Snapshot of an active subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    pub service: Service,
    pub sid: String,
    /// Lease granted by the device
    pub lease_seconds: u32,
    pub created_at: SystemTime,
    pub callback_url: String,
}

struct Registration {
    target: EventTarget,
    sink: EventSink,
}

struct ActiveSubscription {
    sid: String,
    event_url: String,
    callback_path: String,
    callback_url: String,
    lease_seconds: u32,
    created_at: SystemTime,
    renewal: JoinHandle<()>,
    /// Held by whichever GENA request for this SID is on the wire
    in_flight: Arc<Mutex<()>>,
}

impl ActiveSubscription {
    fn info(&self, service: Service) -> SubscriptionInfo {
        SubscriptionInfo {
            service,
            sid: self.sid.clone(),
            lease_seconds: self.lease_seconds,
            created_at: self.created_at,
            callback_url: self.callback_url.clone(),
        }
    }
}

impl Drop for ActiveSubscription {
    fn drop(&mut self) {
        self.renewal.abort();
    }
}

struct RunningServer {
    server: CallbackServer,
    // Ends on its own once the server's router is dropped
    _dispatch: JoinHandle<()>,
}

#[derive(Default)]
struct SubscriptionTable {
    listeners: HashMap<ListenerId, Registration>,
    subscriptions: HashMap<Service, ActiveSubscription>,
    server: Option<RunningServer>,
    next_id: u64,
}

impl SubscriptionTable {
    fn router(&self) -> Option<Arc<EventRouter>> {
        self.server.as_ref().map(|running| running.server.router().clone())
    }

    fn has_listeners_for(&self, service: Service) -> bool {
        self.listeners
            .values()
            .any(|registration| registration.target.service() == service)
    }
}

/// Owns the subscription table of one renderer.
///
/// All mutation is serialized through a single async mutex, held across the
/// SUBSCRIBE/UNSUBSCRIBE round trips and the callback server start/stop.
#[derive(Clone)]
pub struct SubscriptionManager {
    table: Arc<Mutex<SubscriptionTable>>,
    client: SoapClient,
    endpoints: Arc<RwLock<ServiceEndpoints>>,
    config: Arc<RendererConfig>,
}

impl SubscriptionManager {
    pub(crate) fn new(
        client: SoapClient,
        endpoints: Arc<RwLock<ServiceEndpoints>>,
        config: Arc<RendererConfig>,
    ) -> Self {
        Self {
            table: Arc::new(Mutex::new(SubscriptionTable::default())),
            client,
            endpoints,
            config,
        }
    }

    /// Register `sink` for `target`, subscribing its service if needed.
    pub(crate) async fn add_listener(&self, target: EventTarget, sink: EventSink) -> ListenerId {
        let mut table = self.table.lock().await;

        let id = ListenerId(table.next_id);
        table.next_id += 1;
        table.listeners.insert(id, Registration { target, sink });
        debug!(target = target.name(), listeners = table.listeners.len(), "Listener added");

        if table.server.is_none() {
            match self.start_server().await {
                Ok(running) => table.server = Some(running),
                Err(e) => {
                    warn!(error = %e, "Failed to start callback server; events will not be delivered");
                    return id;
                }
            }
        }

        let service = target.service();
        if !table.subscriptions.contains_key(&service) {
            let Some(running) = table.server.as_ref() else {
                return id;
            };
            let base_url = running.server.base_url().to_string();
            let router = running.server.router().clone();

            if let Some(subscription) = self.subscribe(service, &base_url, &router).await {
                table.subscriptions.insert(service, subscription);
            }
        }

        id
    }

    /// Drop a registration. Unknown ids are ignored.
    pub(crate) async fn remove_listener(&self, id: ListenerId) {
        let mut table = self.table.lock().await;

        let Some(registration) = table.listeners.remove(&id) else {
            debug!(?id, "Listener already removed");
            return;
        };
        let service = registration.target.service();
        debug!(
            target = registration.target.name(),
            listeners = table.listeners.len(),
            "Listener removed"
        );

        if !table.has_listeners_for(service) {
            if let Some(subscription) = table.subscriptions.remove(&service) {
                self.unsubscribe(service, subscription, table.router()).await;
            }
        }

        if table.listeners.is_empty() {
            self.stop(&mut table).await;
        }
    }

    /// Remove every listener, cancel every subscription and stop the
    /// callback server.
    pub async fn unsubscribe_all(&self) {
        let mut table = self.table.lock().await;
        table.listeners.clear();
        self.stop(&mut table).await;
    }

    /// SID currently held for `service`.
    pub async fn sid(&self, service: Service) -> Option<String> {
        let table = self.table.lock().await;
        table.subscriptions.get(&service).map(|s| s.sid.clone())
    }

    pub async fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        let table = self.table.lock().await;
        let mut infos: Vec<_> = table
            .subscriptions
            .iter()
            .map(|(service, subscription)| subscription.info(*service))
            .collect();
        infos.sort_by_key(|info| info.service);
        infos
    }

    pub async fn listener_count(&self) -> usize {
        self.table.lock().await.listeners.len()
    }

    pub async fn is_server_running(&self) -> bool {
        self.table.lock().await.server.is_some()
    }

    /// `http://ip:port` of the running callback server.
    pub async fn callback_base_url(&self) -> Option<String> {
        let table = self.table.lock().await;
        table
            .server
            .as_ref()
            .map(|running| running.server.base_url().to_string())
    }

    async fn stop(&self, table: &mut SubscriptionTable) {
        let router = table.router();
        let subscriptions: Vec<_> = table.subscriptions.drain().collect();
        for (service, subscription) in subscriptions {
            self.unsubscribe(service, subscription, router.clone()).await;
        }

        if let Some(running) = table.server.take() {
            running.server.shutdown().await;
        }
    }

    async fn start_server(&self) -> Result<RunningServer, ServerError> {
        let advertised_ip = match self.config.callback_host {
            Some(host) => host,
            None => {
                let device_ip = self.endpoints.read().device_ip().ok_or_else(|| {
                    ServerError::LocalIpUnavailable("no device address is known".to_string())
                })?;
                CallbackServer::detect_local_ip(device_ip)?
            }
        };
        let bind_addr = SocketAddr::new(self.config.callback_bind_addr, self.config.callback_port);

        let (sender, receiver) = mpsc::unbounded_channel();
        let server = CallbackServer::start(bind_addr, advertised_ip, sender).await?;
        let dispatch = tokio::spawn(dispatch_notifications(Arc::downgrade(&self.table), receiver));

        Ok(RunningServer {
            server,
            _dispatch: dispatch,
        })
    }

    async fn subscribe(
        &self,
        service: Service,
        base_url: &str,
        router: &Arc<EventRouter>,
    ) -> Option<ActiveSubscription> {
        let endpoint = self.endpoints.read().get(service).cloned();
        let Some((event_url, callback_path)) =
            endpoint.and_then(|endpoint| Some((endpoint.event_url?, endpoint.event_sub_url?)))
        else {
            debug!(%service, "Service has no event URL; not subscribing");
            return None;
        };

        router.register(callback_path.clone()).await;
        let callback_url = format!("{base_url}{callback_path}");
        let lease = self.config.lease_seconds();

        let client = self.client.clone();
        let (url, callback) = (event_url.clone(), callback_url.clone());
        let result = tokio::task::spawn_blocking(move || client.subscribe(&url, &callback, lease))
            .await
            .map_err(|e| e.to_string())
            .and_then(|response| response.map_err(|e| e.to_string()));

        match result {
            Ok(response) => {
                info!(
                    %service,
                    sid = %response.sid,
                    lease = response.timeout_seconds,
                    "Subscribed to renderer events"
                );
                let in_flight = Arc::new(Mutex::new(()));
                let renewal = self.spawn_renewal(
                    service,
                    event_url.clone(),
                    response.sid.clone(),
                    response.timeout_seconds,
                    in_flight.clone(),
                );
                Some(ActiveSubscription {
                    sid: response.sid,
                    event_url,
                    callback_path,
                    callback_url,
                    lease_seconds: response.timeout_seconds,
                    created_at: SystemTime::now(),
                    renewal,
                    in_flight,
                })
            }
            Err(e) => {
                warn!(%service, error = %e, "SUBSCRIBE failed");
                router.unregister(&callback_path).await;
                None
            }
        }
    }

    /// Fixed-rate renewal every half lease. Ticks that fall behind a slow
    /// renewal fire back to back.
    ///
    /// The `in_flight` guard travels into the blocking call, so it is only
    /// released once the request completes, even if this task is aborted.
    fn spawn_renewal(
        &self,
        service: Service,
        event_url: String,
        sid: String,
        granted: u32,
        in_flight: Arc<Mutex<()>>,
    ) -> JoinHandle<()> {
        let period = (Duration::from_secs(u64::from(granted)) / 2).max(Duration::from_secs(1));
        let lease = self.config.lease_seconds();
        let client = self.client.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

            loop {
                ticker.tick().await;

                let guard = in_flight.clone().lock_owned().await;
                let (client, url, sid) = (client.clone(), event_url.clone(), sid.clone());
                let renew = move || {
                    let _guard = guard;
                    client.renew_subscription(&url, &sid, lease)
                };
                match tokio::task::spawn_blocking(renew).await {
                    Ok(Ok(granted)) => debug!(%service, granted, "Subscription renewed"),
                    Ok(Err(e)) => warn!(%service, error = %e, "Subscription renewal failed"),
                    Err(e) => warn!(%service, error = %e, "Subscription renewal task failed"),
                }
            }
        })
    }

    async fn unsubscribe(&self, service: Service, subscription: ActiveSubscription, router: Option<Arc<EventRouter>>) {
        // No new renewal starts; one already on the wire finishes first
        subscription.renewal.abort();
        let guard = subscription.in_flight.clone().lock_owned().await;

        let client = self.client.clone();
        let (url, sid) = (subscription.event_url.clone(), subscription.sid.clone());
        let unsubscribe = move || {
            let _guard = guard;
            client.unsubscribe(&url, &sid)
        };
        match tokio::task::spawn_blocking(unsubscribe).await {
            Ok(Ok(())) => info!(%service, sid = %subscription.sid, "Unsubscribed from renderer events"),
            Ok(Err(e)) => warn!(%service, error = %e, "UNSUBSCRIBE failed"),
            Err(e) => warn!(%service, error = %e, "UNSUBSCRIBE task failed"),
        }

        if let Some(router) = router {
            router.unregister(&subscription.callback_path).await;
        }
    }
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager").finish_non_exhaustive()
    }
}

async fn dispatch_notifications(
    table: Weak<Mutex<SubscriptionTable>>,
    mut receiver: mpsc::UnboundedReceiver<NotificationPayload>,
) {
    while let Some(notification) = receiver.recv().await {
        let Some(table) = table.upgrade() else {
            break;
        };

        let events = decode_notification(&notification.event_xml);
        if events.is_empty() {
            debug!(
                path = %notification.path,
                sid = %notification.subscription_id,
                "Dropping notification with no renderer events"
            );
            continue;
        }
        debug!(
            path = %notification.path,
            sid = %notification.subscription_id,
            events = events.len(),
            "Dispatching notification"
        );

        // Listeners run outside the lock; they may add or remove listeners
        let sinks: Vec<(EventTarget, EventSink)> = {
            let table = table.lock().await;
            table
                .listeners
                .values()
                .map(|registration| (registration.target, registration.sink.clone()))
                .collect()
        };

        for event in events {
            let target = event.target();
            for (_, sink) in sinks.iter().filter(|(t, _)| *t == target) {
                sink(event.clone());
            }
        }
    }
}

/// A registered event listener.
///
/// Dropping the handle keeps the listener registered; call
/// [`unsubscribe`](ListenerHandle::unsubscribe) to remove it.
pub struct ListenerHandle {
    id: ListenerId,
    target: EventTarget,
    manager: SubscriptionManager,
    runtime: Handle,
    executor: Arc<dyn CallbackExecutor>,
}

impl ListenerHandle {
    pub(crate) fn new(
        id: ListenerId,
        target: EventTarget,
        manager: SubscriptionManager,
        runtime: Handle,
        executor: Arc<dyn CallbackExecutor>,
    ) -> Self {
        Self {
            id,
            target,
            manager,
            runtime,
            executor,
        }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn target(&self) -> EventTarget {
        self.target
    }

    /// Remove this listener. The last listener of a service cancels its
    /// subscription; the last listener overall stops the callback server.
    pub fn unsubscribe(self) -> Pending<()> {
        let Self {
            id,
            manager,
            runtime,
            executor,
            ..
        } = self;
        Pending::spawn(&runtime, executor, async move {
            manager.remove_listener(id).await;
            Ok(())
        })
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("id", &self.id)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}
