//! The media control facade.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use quick_xml::escape::{escape, unescape};
use soap_client::{
    build_didl_lite_metadata, format_seek_target, parse_didl_item, parse_duration, FieldExtractor,
    FirstMatchExtractor, HttpTransport, SoapAction, SoapClient, UreqTransport,
};
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, warn};

use crate::completion::{CallbackExecutor, InlineExecutor, Pending};
use crate::config::RendererConfig;
use crate::description::ServiceDescription;
use crate::dispatcher::CommandDispatcher;
use crate::endpoint::{Capability, ServiceEndpoints};
use crate::error::{CommandError, RendererError, Result};
use crate::events::{EventTarget, RendererEvent};
use crate::model::{
    parse_upnp_bool, percent_to_volume, step_volume, volume_to_percent, MediaInfo, MediaRequest,
    MimeType, PlayState,
};
use crate::service::Service;
use crate::subscription::{EventSink, ListenerHandle, SubscriptionManager};

/// Controls one UPnP/DLNA media renderer.
///
/// Every operation returns a [`Pending`] immediately; the network work runs
/// on the renderer's runtime, never on the calling thread.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use dlna_renderer::{MediaRenderer, MediaRequest, ServiceDescription};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let xml = std::fs::read_to_string("description.xml")?;
/// let description = ServiceDescription::from_xml("http://192.168.1.50:49152/description.xml", &xml)?;
/// let renderer = MediaRenderer::builder(description).build()?;
///
/// renderer
///     .display_media(MediaRequest::new("http://192.168.1.20:8000/song.mp3", "audio/mp3").title("Song"))
///     .wait()?;
/// renderer.seek(Duration::from_secs(90)).wait()?;
/// println!("volume: {}", renderer.get_volume().wait()?);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MediaRenderer {
    inner: Arc<Inner>,
    runtime: Handle,
    executor: Arc<dyn CallbackExecutor>,
    _owned_runtime: Option<Arc<OwnedRuntime>>,
}

struct Inner {
    config: Arc<RendererConfig>,
    description: RwLock<ServiceDescription>,
    endpoints: Arc<RwLock<ServiceEndpoints>>,
    dispatcher: CommandDispatcher,
    subscriptions: SubscriptionManager,
    extractor: Arc<dyn FieldExtractor>,
    /// Held from a step's read until its write completes
    volume_steps: Arc<tokio::sync::Mutex<()>>,
}

/// A runtime created by the renderer itself, shut down without blocking
/// when the last renderer clone goes away.
struct OwnedRuntime(Option<Runtime>);

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

/// Builder for [`MediaRenderer`].
pub struct MediaRendererBuilder {
    description: ServiceDescription,
    config: RendererConfig,
    transport: Option<Arc<dyn HttpTransport>>,
    executor: Option<Arc<dyn CallbackExecutor>>,
    runtime: Option<Handle>,
    extractor: Option<Arc<dyn FieldExtractor>>,
}

impl MediaRendererBuilder {
    pub fn config(mut self, config: RendererConfig) -> Self {
        self.config = config;
        self
    }

    /// HTTP transport for control and GENA requests. Defaults to a `ureq`
    /// agent using the configured timeouts.
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Where completion and event listeners run. Defaults to
    /// [`InlineExecutor`].
    pub fn callback_executor(mut self, executor: Arc<dyn CallbackExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Runtime to run network work on. Defaults to the ambient tokio
    /// runtime, or a private one with `worker_threads` workers.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Response field extraction. Defaults to first-match tag extraction.
    pub fn field_extractor(mut self, extractor: Arc<dyn FieldExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn build(self) -> std::result::Result<MediaRenderer, RendererError> {
        self.config.validate()?;

        let (runtime, owned_runtime) = match self.runtime.or_else(|| Handle::try_current().ok()) {
            Some(handle) => (handle, None),
            None => {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(self.config.worker_threads)
                    .thread_name("dlna-renderer")
                    .enable_all()
                    .build()
                    .map_err(|e| RendererError::Runtime(e.to_string()))?;
                (runtime.handle().clone(), Some(Arc::new(OwnedRuntime(Some(runtime)))))
            }
        };

        let transport = self.transport.unwrap_or_else(|| {
            Arc::new(UreqTransport::new(
                self.config.connect_timeout,
                self.config.read_timeout,
            ))
        });
        let mut client = SoapClient::with_transport(transport);
        if let Some(user_agent) = &self.config.user_agent {
            client = client.user_agent(user_agent.clone());
        }

        let config = Arc::new(self.config);
        let endpoints = Arc::new(RwLock::new(ServiceEndpoints::resolve(&self.description)));
        debug!(
            device = %self.description.ip_address,
            capabilities = endpoints.read().capabilities().len(),
            "Renderer endpoints resolved"
        );

        let inner = Inner {
            dispatcher: CommandDispatcher::new(client.clone(), endpoints.clone()),
            subscriptions: SubscriptionManager::new(client, endpoints.clone(), config.clone()),
            config,
            description: RwLock::new(self.description),
            endpoints,
            extractor: self
                .extractor
                .unwrap_or_else(|| Arc::new(FirstMatchExtractor)),
            volume_steps: Arc::new(tokio::sync::Mutex::new(())),
        };

        Ok(MediaRenderer {
            inner: Arc::new(inner),
            runtime,
            executor: self.executor.unwrap_or_else(|| Arc::new(InlineExecutor)),
            _owned_runtime: owned_runtime,
        })
    }
}

impl MediaRenderer {
    pub fn builder(description: ServiceDescription) -> MediaRendererBuilder {
        MediaRendererBuilder {
            description,
            config: RendererConfig::default(),
            transport: None,
            executor: None,
            runtime: None,
            extractor: None,
        }
    }

    /// A renderer with the default configuration.
    pub fn new(description: ServiceDescription) -> std::result::Result<Self, RendererError> {
        Self::builder(description).build()
    }

    pub fn config(&self) -> &RendererConfig {
        &self.inner.config
    }

    pub fn description(&self) -> ServiceDescription {
        self.inner.description.read().clone()
    }

    /// Replace the device description and re-resolve the endpoints.
    ///
    /// Existing subscriptions keep the event URLs they were made with.
    pub fn set_service_description(&self, description: ServiceDescription) {
        let endpoints = ServiceEndpoints::resolve(&description);
        debug!(device = %description.ip_address, "Service description replaced");
        *self.inner.endpoints.write() = endpoints;
        *self.inner.description.write() = description;
    }

    pub fn endpoints(&self) -> ServiceEndpoints {
        self.inner.endpoints.read().clone()
    }

    pub fn capabilities(&self) -> std::collections::BTreeSet<Capability> {
        self.inner.endpoints.read().capabilities()
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// The subscription table, for inspection.
    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.inner.subscriptions
    }

    pub fn play(&self) -> Pending<()> {
        self.run(|inner| async move { inner.play().await })
    }

    pub fn pause(&self) -> Pending<()> {
        self.run(|inner| async move { inner.transport_command("Pause").await })
    }

    pub fn stop(&self) -> Pending<()> {
        self.run(|inner| async move { inner.transport_command("Stop").await })
    }

    pub fn next(&self) -> Pending<()> {
        self.run(|inner| async move { inner.transport_command("Next").await })
    }

    pub fn previous(&self) -> Pending<()> {
        self.run(|inner| async move { inner.transport_command("Previous").await })
    }

    /// AVTransport has no standard rewind action.
    pub fn rewind(&self) -> Pending<()> {
        self.fail(CommandError::NotSupported("rewind".to_string()))
    }

    /// AVTransport has no standard fast-forward action.
    pub fn fast_forward(&self) -> Pending<()> {
        self.fail(CommandError::NotSupported("fast forward".to_string()))
    }

    /// Seek to `position` within the current track.
    ///
    /// The target is sent as `HH:MM:SS` with hours taken modulo 24, so
    /// positions of a day or more wrap around.
    pub fn seek(&self, position: Duration) -> Pending<()> {
        let target = format_seek_target(duration_millis(position));
        self.run(move |inner| async move {
            inner
                .send(
                    SoapAction::new(Service::AVTransport.urn(), "Seek")
                        .param("Unit", "REL_TIME")
                        .param("Target", target),
                )
                .await
                .map(drop)
        })
    }

    pub fn get_position(&self) -> Pending<Duration> {
        self.run(|inner| async move {
            let body = inner.position_info().await?;
            let position = parse_duration(&inner.field(&body, "RelTime")?)?;
            Ok(Duration::from_millis(position))
        })
    }

    /// Duration of the current track.
    ///
    /// Renderers report `0:00:00` until they know the duration; for
    /// anything but images the query is repeated under
    /// [`RendererConfig::duration_retry`]. When the policy runs out the
    /// placeholder zero is returned.
    pub fn get_duration(&self) -> Pending<Duration> {
        self.run(|inner| async move { inner.duration().await })
    }

    pub fn get_play_state(&self) -> Pending<PlayState> {
        self.run(|inner| async move {
            let body = inner
                .send(SoapAction::new(Service::AVTransport.urn(), "GetTransportInfo"))
                .await?;
            let state = inner.field(&body, "CurrentTransportState")?;
            Ok(PlayState::from_transport_state(&state))
        })
    }

    /// Metadata of the current track.
    pub fn get_media_info(&self) -> Pending<MediaInfo> {
        self.run(|inner| async move {
            let body = inner.position_info().await?;
            current_media(&inner.field(&body, "TrackMetaData")?)
        })
    }

    /// Volume in [0, 1].
    pub fn get_volume(&self) -> Pending<f32> {
        self.run(|inner| async move { inner.volume().await })
    }

    /// Set the volume; `volume` must be within [0, 1].
    pub fn set_volume(&self, volume: f32) -> Pending<()> {
        if let Err(e) = volume_to_percent(volume) {
            return self.fail(e);
        }
        self.run(move |inner| async move { inner.set_volume(volume).await })
    }

    /// Raise the volume by the configured step.
    ///
    /// Completes once the new value has been sent, without waiting for the
    /// device to apply it. Steps are applied one after another, so each
    /// reads the value the previous one wrote.
    pub fn volume_up(&self) -> Pending<()> {
        let step = self.inner.config.volume_step;
        self.run(move |inner| inner.step_volume(step))
    }

    pub fn volume_down(&self) -> Pending<()> {
        let step = self.inner.config.volume_step;
        self.run(move |inner| inner.step_volume(-step))
    }

    pub fn get_mute(&self) -> Pending<bool> {
        self.run(|inner| async move {
            let body = inner
                .send(SoapAction::new(Service::RenderingControl.urn(), "GetMute").param("Channel", "Master"))
                .await?;
            let value = inner.field(&body, "CurrentMute")?;
            parse_upnp_bool(&value)
                .ok_or_else(|| CommandError::ParseError(format!("Invalid CurrentMute: {value:?}")))
        })
    }

    pub fn set_mute(&self, muted: bool) -> Pending<()> {
        self.run(move |inner| async move {
            inner
                .send(
                    SoapAction::new(Service::RenderingControl.urn(), "SetMute")
                        .param("Channel", "Master")
                        .param("DesiredMute", if muted { "1" } else { "0" }),
                )
                .await
                .map(drop)
        })
    }

    /// Load `request` and start playing it.
    ///
    /// The MIME type is validated before anything is sent. `Play` is only
    /// sent once `SetAVTransportURI` has succeeded.
    pub fn display_media(&self, request: MediaRequest) -> Pending<()> {
        let mime_type = match MimeType::parse(&request.mime_type) {
            Ok(mime_type) => mime_type,
            Err(e) => return self.fail(e),
        };
        self.run(move |inner| async move {
            let metadata = build_didl_lite_metadata(
                &request.url,
                &mime_type.to_string(),
                request.title.as_deref(),
                request.description.as_deref(),
                request.icon_url.as_deref(),
            );
            inner
                .send(
                    SoapAction::new(Service::AVTransport.urn(), "SetAVTransportURI")
                        .param("CurrentURI", escape(request.url.as_str()))
                        .param("CurrentURIMetaData", metadata),
                )
                .await?;
            inner.play().await
        })
    }

    pub fn display_image(&self, request: MediaRequest) -> Pending<()> {
        self.display_media(request)
    }

    /// Play audio or video. Renderers offer no standard way to loop a
    /// single item, so `looping` is ignored.
    pub fn play_media(&self, request: MediaRequest, looping: bool) -> Pending<()> {
        if looping {
            debug!(url = %request.url, "Looping playback is not available; playing once");
        }
        self.display_media(request)
    }

    pub fn close_media(&self) -> Pending<()> {
        self.stop()
    }

    pub fn subscribe_play_state<F>(&self, listener: F) -> Pending<ListenerHandle>
    where
        F: Fn(PlayState) + Send + Sync + 'static,
    {
        self.subscribe(EventTarget::PlayState, move |event| {
            if let RendererEvent::PlayState(state) = event {
                listener(state)
            }
        })
    }

    pub fn subscribe_media_info<F>(&self, listener: F) -> Pending<ListenerHandle>
    where
        F: Fn(MediaInfo) + Send + Sync + 'static,
    {
        self.subscribe(EventTarget::MediaInfo, move |event| {
            if let RendererEvent::MediaInfo(info) = event {
                listener(info)
            }
        })
    }

    pub fn subscribe_volume<F>(&self, listener: F) -> Pending<ListenerHandle>
    where
        F: Fn(f32) + Send + Sync + 'static,
    {
        self.subscribe(EventTarget::Volume, move |event| {
            if let RendererEvent::Volume(volume) = event {
                listener(volume)
            }
        })
    }

    pub fn subscribe_mute<F>(&self, listener: F) -> Pending<ListenerHandle>
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.subscribe(EventTarget::Mute, move |event| {
            if let RendererEvent::Mute(muted) = event {
                listener(muted)
            }
        })
    }

    /// Drop every listener and subscription and stop the callback server.
    pub fn unsubscribe_all(&self) -> Pending<()> {
        let manager = self.inner.subscriptions.clone();
        Pending::spawn(&self.runtime, self.executor.clone(), async move {
            manager.unsubscribe_all().await;
            Ok(())
        })
    }

    /// Registering never fails: when the subscription cannot be made the
    /// listener is kept but receives no events.
    fn subscribe<F>(&self, target: EventTarget, listener: F) -> Pending<ListenerHandle>
    where
        F: Fn(RendererEvent) + Send + Sync + 'static,
    {
        let listener = Arc::new(listener);
        let executor = self.executor.clone();
        let sink: EventSink = Arc::new(move |event| {
            let listener = listener.clone();
            executor.execute(Box::new(move || listener(event)));
        });

        let manager = self.inner.subscriptions.clone();
        let (runtime, executor) = (self.runtime.clone(), self.executor.clone());
        Pending::spawn(&self.runtime, self.executor.clone(), async move {
            let id = manager.add_listener(target, sink).await;
            Ok(ListenerHandle::new(id, target, manager, runtime, executor))
        })
    }

    fn run<T, F, Fut>(&self, operation: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<Inner>) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Pending::spawn(&self.runtime, self.executor.clone(), operation(self.inner.clone()))
    }

    fn fail<T: Send + 'static>(&self, error: CommandError) -> Pending<T> {
        Pending::ready(&self.runtime, self.executor.clone(), Err(error))
    }
}

impl std::fmt::Debug for MediaRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaRenderer")
            .field("device", &self.inner.description.read().ip_address)
            .field("endpoints", &*self.inner.endpoints.read())
            .finish_non_exhaustive()
    }
}

impl Inner {
    async fn send(&self, action: SoapAction) -> Result<String> {
        self.dispatcher.send(action).await
    }

    fn field(&self, body: &str, tag: &str) -> Result<String> {
        Ok(self.extractor.extract(body, tag)?)
    }

    async fn transport_command(&self, action: &str) -> Result<()> {
        self.send(SoapAction::new(Service::AVTransport.urn(), action))
            .await
            .map(drop)
    }

    async fn play(&self) -> Result<()> {
        self.send(SoapAction::new(Service::AVTransport.urn(), "Play").param("Speed", "1"))
            .await
            .map(drop)
    }

    async fn position_info(&self) -> Result<String> {
        self.send(SoapAction::new(Service::AVTransport.urn(), "GetPositionInfo"))
            .await
    }

    async fn duration(&self) -> Result<Duration> {
        let policy = &self.config.duration_retry;
        let started = Instant::now();
        let mut attempt = 1;

        loop {
            let body = self.position_info().await?;
            let duration = parse_duration(&self.field(&body, "TrackDuration")?)?;
            if duration > 0 || self.showing_image(&body) {
                return Ok(Duration::from_millis(duration));
            }

            if !policy.allows_retry(attempt, started.elapsed()) {
                warn!(attempts = attempt, "Renderer never reported a track duration");
                return Ok(Duration::ZERO);
            }
            debug!(attempt, "Track duration not known yet; retrying");
            tokio::time::sleep(policy.interval).await;
            attempt += 1;
        }
    }

    fn showing_image(&self, position_info: &str) -> bool {
        self.field(position_info, "TrackMetaData")
            .and_then(|metadata| current_media(&metadata))
            .map_or(false, |info| info.is_image())
    }

    async fn volume(&self) -> Result<f32> {
        let body = self
            .send(SoapAction::new(Service::RenderingControl.urn(), "GetVolume").param("Channel", "Master"))
            .await?;
        let value = self.field(&body, "CurrentVolume")?;
        let percent = value
            .trim()
            .parse::<i64>()
            .map_err(|_| CommandError::ParseError(format!("Invalid CurrentVolume: {value:?}")))?;
        Ok(percent_to_volume(percent))
    }

    async fn set_volume(&self, volume: f32) -> Result<()> {
        let percent = volume_to_percent(volume)?;
        self.send(
            SoapAction::new(Service::RenderingControl.urn(), "SetVolume")
                .param("Channel", "Master")
                .param("DesiredVolume", percent.to_string()),
        )
        .await
        .map(drop)
    }

    async fn step_volume(self: Arc<Self>, delta: f32) -> Result<()> {
        let step = self.volume_steps.clone().lock_owned().await;
        let current = self.volume().await?;
        let target = step_volume(current, delta);
        if volume_to_percent(target)? == volume_to_percent(current)? {
            debug!(volume = current, "Volume already at its limit");
            return Ok(());
        }

        tokio::spawn(async move {
            let _step = step;
            if let Err(e) = self.set_volume(target).await {
                warn!(error = %e, volume = target, "Failed to apply stepped volume");
            }
        });
        Ok(())
    }
}

/// Parse the escaped DIDL-Lite found in `TrackMetaData`.
fn current_media(metadata: &str) -> Result<MediaInfo> {
    let didl = unescape(metadata)
        .map_err(|e| CommandError::ParseError(format!("Invalid TrackMetaData: {e}")))?;
    Ok(parse_didl_item(&didl)?.into())
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
