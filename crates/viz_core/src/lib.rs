//! Dynamic policy-impact visualization engine.
//!
//! Keeps an interactive map synchronized with an asynchronous stream of
//! simulation/chat events while running timed visual animations that start,
//! progress, and terminate deterministically, and while tearing down cleanly
//! on every city change or view exit.
//!
//! All map mutation is serialized through one orchestrator task: commands
//! and events are enqueued and processed strictly in arrival order.

use std::{collections::BTreeMap, sync::Arc};

use chrono::Utc;
use map_surface::{CameraMove, LayerKind, MapInit, MapSurfaceProvider};
use shared::{
    domain::LayerId,
    error::InitError,
    geo::{bounding_box, centroid, circle_polygon, Feature, FeatureCollection, LngLat},
    protocol::{EventKind, ImpactEvent, MetricsSnapshot, ThoughtEntry},
};
use tokio::{
    sync::{broadcast, mpsc, oneshot, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

pub mod animation;
pub mod backend;
pub mod camera;
pub mod commands;
pub mod config;
pub mod heatmap;
pub mod layers;
pub mod markers;
pub mod session;
pub mod stream;

use animation::{AnimationScheduler, AnimationSignal, AnimationSpec};
use camera::{CameraController, Geocoder, ProjectionAuthority, ProjectionMode};
use layers::{default_paint, LayerDescriptor, LayerReconciler};
use markers::{MarkerOrigin, MarkerPool, MarkerSpec, PopupSchedule};
use session::SessionLifecycle;

pub use commands::{parse_chat, Command, CommandParseError};
pub use config::{load_settings, EngineConfig};

const CONSTRUCTION_COLOR: &str = "#3b82f6";
const DEMOLITION_COLOR: &str = "#ef4444";
const EXTRUSION_COLOR: &str = "#9ca3af";
const TRAFFIC_COLOR: &str = "#f59e0b";
const DEFAULT_BUILDING_HEIGHT_M: f64 = 30.0;
const DEFAULT_BUILDING_FOOTPRINT_M: f64 = 60.0;
const TOKEN_AGENT: &str = "assistant";

/// Inputs to the orchestrator queue. Processed in arrival order on a single
/// logical thread; there is no parallel mutation of map state.
pub enum EngineInput {
    Command(Command),
    Event(ImpactEvent),
    SetCity(String),
    TransportDown,
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// Notifications for UI observers, mirrored over a broadcast channel.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Thought(ThoughtEntry),
    MetricsUpdated(MetricsSnapshot),
    CityChanged { city: String, center: LngLat },
    TransportDown,
    SimulationError(String),
    Error(String),
}

#[derive(Default)]
struct EngineState {
    city: Option<String>,
    latest_metrics: Option<MetricsSnapshot>,
    thoughts: Vec<ThoughtEntry>,
    command_layers: BTreeMap<LayerId, LayerDescriptor>,
    heatmap_layers: Vec<LayerDescriptor>,
    zone_counter: u64,
}

pub struct PolicyMapEngine {
    config: EngineConfig,
    lifecycle: SessionLifecycle,
    session: Arc<session::MapSession>,
    layers: Arc<LayerReconciler>,
    markers: Arc<MarkerPool>,
    animations: Arc<AnimationScheduler>,
    camera: Arc<CameraController>,
    geocoder: Arc<dyn Geocoder>,
    inner: Mutex<EngineState>,
    events: broadcast::Sender<EngineEvent>,
    input_tx: mpsc::UnboundedSender<EngineInput>,
    loop_task: Mutex<Option<JoinHandle<()>>>,
}

impl PolicyMapEngine {
    /// Create the map session and start the orchestrator loop. Fails with
    /// `InitError` if the rendering surface cannot be created; that state is
    /// fatal for the view instance and is not retried.
    pub async fn open(
        config: EngineConfig,
        provider: Arc<dyn MapSurfaceProvider>,
        geocoder: Arc<dyn Geocoder>,
    ) -> Result<Arc<Self>, InitError> {
        let lifecycle = SessionLifecycle::new(provider);
        let session = lifecycle
            .open(MapInit {
                access_token: config.mapbox_token.clone(),
                center: config.default_center,
                zoom: config.default_zoom,
                pitch: 0.0,
                bearing: 0.0,
            })
            .await?;

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(1024);

        let layers = Arc::new(LayerReconciler::new(Arc::clone(&session)));
        let markers = MarkerPool::new(Arc::clone(&session));
        let animations = AnimationScheduler::new(Arc::clone(&session), signal_tx);
        let camera = CameraController::new(
            Arc::clone(&session),
            Arc::clone(&geocoder),
            ProjectionAuthority::Owned,
        );

        let engine = Arc::new(Self {
            config,
            lifecycle,
            session,
            layers,
            markers,
            animations,
            camera,
            geocoder,
            inner: Mutex::new(EngineState::default()),
            events,
            input_tx,
            loop_task: Mutex::new(None),
        });

        let runner = Arc::clone(&engine);
        let task = tokio::spawn(async move {
            runner.run_loop(input_rx, signal_rx).await;
        });
        *engine.loop_task.lock().await = Some(task);
        Ok(engine)
    }

    async fn run_loop(
        self: Arc<Self>,
        mut input_rx: mpsc::UnboundedReceiver<EngineInput>,
        mut signal_rx: mpsc::UnboundedReceiver<AnimationSignal>,
    ) {
        loop {
            tokio::select! {
                // Animation completions are continuations of work already
                // in flight; drain them before taking new inputs.
                biased;
                signal = signal_rx.recv() => match signal {
                    None => break,
                    Some(signal) => self.handle_animation_done(signal).await,
                },
                input = input_rx.recv() => match input {
                    None | Some(EngineInput::Shutdown) => break,
                    Some(input) => self.process(input).await,
                },
            }
        }
        debug!("orchestrator loop stopped");
    }

    async fn process(&self, input: EngineInput) {
        match input {
            EngineInput::Command(command) => self.handle_command(command).await,
            EngineInput::Event(event) => self.handle_event(event).await,
            EngineInput::SetCity(city) => self.handle_set_city(city).await,
            EngineInput::TransportDown => {
                warn!("event stream transport down");
                let _ = self.events.send(EngineEvent::TransportDown);
            }
            EngineInput::Flush(ack) => {
                let _ = ack.send(());
            }
            EngineInput::Shutdown => {}
        }
    }

    // ---- commands ------------------------------------------------------

    async fn handle_command(&self, command: Command) {
        match command {
            Command::Build {
                location,
                coordinates,
                units,
            } => self.handle_build(location, coordinates, units).await,
            Command::DemolishSpecific {
                target,
                coordinates,
            } => self.handle_demolish_specific(target, coordinates).await,
            Command::DemolishArea { center, radius_m } => {
                self.handle_demolish_area(center, radius_m).await
            }
            Command::AnalyzeTraffic { corridor } => self.handle_analyze_traffic(corridor).await,
            Command::HighlightArea {
                location,
                coordinates,
                color,
            } => self.handle_highlight(location, coordinates, color).await,
            Command::ShowHeatmap { metric } => self.handle_show_heatmap(metric).await,
        }
    }

    async fn handle_build(&self, location: String, coordinates: Option<LngLat>, units: u32) {
        let Some(center) = self.resolve_coordinates(coordinates, &location).await else {
            return;
        };

        self.markers
            .place(MarkerSpec {
                position: center,
                label: format!("Construction: {location} ({units} units)"),
                color: CONSTRUCTION_COLOR.to_string(),
                origin: MarkerOrigin::Command,
                popup: Some(self.popup_schedule()),
                owning_animation: None,
            })
            .await;

        let id = LayerId::new(format!("construction:{}", slug(&location)));
        let descriptor = circle_descriptor(id.clone(), center, 400.0, CONSTRUCTION_COLOR, 0.35);
        self.upsert_command_layer(descriptor).await;
        self.sync_layers().await;
    }

    async fn handle_demolish_specific(&self, target: String, coordinates: LngLat) {
        let layer_id = LayerId::new(format!("extrusion:{}", slug(&target)));

        // Make sure the target extrusion exists before the animation starts
        // mutating its paint.
        let descriptor = LayerDescriptor {
            id: layer_id.clone(),
            kind: LayerKind::Extrusion,
            source: FeatureCollection::single(
                Feature::new(circle_polygon(coordinates, DEFAULT_BUILDING_FOOTPRINT_M))
                    .with_property("name", target.clone()),
            ),
            paint: default_paint(LayerKind::Extrusion, EXTRUSION_COLOR, 1.0),
            radius_hint_m: DEFAULT_BUILDING_FOOTPRINT_M,
        };
        self.upsert_command_layer(descriptor).await;
        self.sync_layers().await;

        let marker = self
            .markers
            .place(MarkerSpec {
                position: coordinates,
                label: format!("Demolition: {target}"),
                color: DEMOLITION_COLOR.to_string(),
                origin: MarkerOrigin::Command,
                popup: Some(self.popup_schedule()),
                owning_animation: None,
            })
            .await;

        let animation = self
            .animations
            .start(AnimationSpec {
                kind: animation::AnimationKind::Demolition,
                target_layers: vec![layer_id.clone()],
                step_percent: self.config.animation_step_percent,
                interval: self.config.animation_interval,
                base_extrusion_height_m: Some(DEFAULT_BUILDING_HEIGHT_M),
                follow_up: Some(animation::FollowUp::RetireLayers(vec![layer_id])),
            })
            .await;

        if let Some(marker) = marker {
            self.markers.assign_owner(marker, animation).await;
        }
        info!(target, animation = animation.0, "demolition started");
    }

    async fn handle_demolish_area(&self, center: LngLat, radius_m: f64) {
        let zone = {
            let mut inner = self.inner.lock().await;
            inner.zone_counter += 1;
            inner.zone_counter
        };
        let id = LayerId::new(format!("demolition-zone:{zone}"));
        let descriptor = circle_descriptor(id.clone(), center, radius_m, DEMOLITION_COLOR, 0.4);
        self.upsert_command_layer(descriptor).await;
        self.sync_layers().await;

        self.animations
            .start(AnimationSpec {
                kind: animation::AnimationKind::RippleFade,
                target_layers: vec![id.clone()],
                step_percent: self.config.animation_step_percent,
                interval: self.config.animation_interval,
                base_extrusion_height_m: None,
                follow_up: Some(animation::FollowUp::RetireLayers(vec![id])),
            })
            .await;
    }

    async fn handle_analyze_traffic(&self, corridor: Vec<LngLat>) {
        let zone = {
            let mut inner = self.inner.lock().await;
            inner.zone_counter += 1;
            inner.zone_counter
        };
        let id = LayerId::new(format!("traffic:{zone}"));
        let descriptor = LayerDescriptor {
            id: id.clone(),
            kind: LayerKind::Line,
            source: FeatureCollection::single(Feature::new(shared::geo::Geometry::LineString(
                corridor.clone(),
            ))),
            paint: default_paint(LayerKind::Line, TRAFFIC_COLOR, 0.8),
            radius_hint_m: 0.0,
        };
        self.upsert_command_layer(descriptor).await;
        self.sync_layers().await;

        // Fit the view to the corridor: fly to its centroid at a zoom
        // derived from the padded extent.
        if let Some(center) = centroid(&corridor) {
            let zoom = bounding_box(&corridor, 0.005)
                .map(|[min_lng, min_lat, max_lng, max_lat]| {
                    let span = (max_lng - min_lng).max(max_lat - min_lat).max(1e-4);
                    (360.0 / span).log2().clamp(10.0, 15.0)
                })
                .unwrap_or(self.config.default_zoom);
            self.camera.fly_to(CameraMove::fly(center, zoom));
        }
    }

    async fn handle_highlight(
        &self,
        location: String,
        coordinates: Option<LngLat>,
        color: String,
    ) {
        let Some(center) = self.resolve_coordinates(coordinates, &location).await else {
            return;
        };
        let id = LayerId::new(format!("highlight:{}", slug(&location)));
        let descriptor = circle_descriptor(id.clone(), center, 500.0, &color, 0.3);
        self.upsert_command_layer(descriptor).await;
        self.sync_layers().await;
    }

    /// A heatmap request arriving before the metrics event it depends on is
    /// a harmless no-op: it waits for the next Completed event.
    async fn handle_show_heatmap(&self, metric: Option<String>) {
        let snapshot = { self.inner.lock().await.latest_metrics.clone() };
        let Some(snapshot) = snapshot else {
            debug!("heatmap requested before any metrics snapshot, ignoring");
            self.push_thought("engine", "No simulation metrics yet; heatmap pending.")
                .await;
            return;
        };
        let snapshot = match metric {
            Some(metric) => {
                let filtered: BTreeMap<_, _> = snapshot
                    .metrics
                    .iter()
                    .filter(|(name, _)| **name == metric)
                    .map(|(name, delta)| (name.clone(), *delta))
                    .collect();
                MetricsSnapshot { metrics: filtered }
            }
            None => snapshot,
        };
        self.apply_heatmap(&snapshot).await;
    }

    // ---- events --------------------------------------------------------

    async fn handle_event(&self, event: ImpactEvent) {
        match event.kind {
            EventKind::Message { agent, text } => {
                self.push_thought(&agent, &text).await;
            }
            EventKind::Token { text } => {
                self.append_token(&text).await;
            }
            EventKind::Completed { metrics } => {
                info!(channel = %event.channel, "simulation completed");
                {
                    let mut inner = self.inner.lock().await;
                    inner.latest_metrics = Some(metrics.clone());
                }
                // Retire the previous result's markers before painting the
                // new one.
                self.markers
                    .remove_where(|origin, _| origin == MarkerOrigin::Simulation)
                    .await;
                self.apply_heatmap(&metrics).await;
                let _ = self.events.send(EngineEvent::MetricsUpdated(metrics));
            }
            EventKind::Error { message } => {
                warn!(channel = %event.channel, message, "simulation error event");
                let _ = self.events.send(EngineEvent::SimulationError(message));
            }
        }
    }

    async fn apply_heatmap(&self, snapshot: &MetricsSnapshot) {
        let center = self
            .camera
            .current_center()
            .unwrap_or(self.config.default_center);
        let descriptors =
            heatmap::heatmap_descriptors(center, snapshot, self.config.heatmap_base_radius_m);
        {
            let mut inner = self.inner.lock().await;
            inner.heatmap_layers = descriptors;
        }
        self.sync_layers().await;
    }

    async fn handle_animation_done(&self, signal: AnimationSignal) {
        debug!(animation = signal.id.0, "animation completed");
        self.markers.remove_owned_by(signal.id).await;
        if let Some(animation::FollowUp::RetireLayers(ids)) = signal.follow_up {
            let mut inner = self.inner.lock().await;
            for id in ids {
                inner.command_layers.remove(&id);
            }
            drop(inner);
            self.sync_layers().await;
        }
        self.animations.reap(signal.id).await;
    }

    // ---- city / lifecycle ----------------------------------------------

    async fn handle_set_city(&self, city: String) {
        info!(city, "changing city");
        // Tear down everything belonging to the previous city before the
        // camera starts moving.
        self.camera.cancel_pending();
        self.animations.cancel_all().await;
        self.markers.clear().await;
        {
            let mut inner = self.inner.lock().await;
            inner.command_layers.clear();
            inner.heatmap_layers.clear();
            inner.latest_metrics = None;
        }
        self.layers.clear().await;

        match self.camera.fly_to_city(&city, self.config.default_zoom).await {
            Ok(Some(center)) => {
                self.inner.lock().await.city = Some(city.clone());
                let _ = self.events.send(EngineEvent::CityChanged { city, center });
            }
            Ok(None) => {
                debug!(city, "city change superseded before the camera moved");
            }
            Err(err) => {
                warn!(city, error = %err, "geocode failed for city change");
                let _ = self
                    .events
                    .send(EngineEvent::Error(format!("could not locate '{city}': {err}")));
            }
        }
    }

    /// Release every timer and camera intent, then the map handle. Safe to
    /// call twice.
    pub async fn close(&self) {
        if let Some(task) = self.loop_task.lock().await.take() {
            task.abort();
        }
        self.lifecycle
            .close(&self.animations, &self.markers, &self.camera)
            .await;
    }

    // ---- public surface ------------------------------------------------

    pub fn submit_command(&self, command: Command) {
        let _ = self.input_tx.send(EngineInput::Command(command));
    }

    /// Parse operator chat into a command and enqueue it. Rejections are
    /// reported to UI observers as well as returned.
    pub fn submit_chat(&self, text: &str) -> Result<(), CommandParseError> {
        match parse_chat(text) {
            Ok(command) => {
                self.submit_command(command);
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "chat command rejected");
                let _ = self.events.send(EngineEvent::Error(err.to_string()));
                Err(err)
            }
        }
    }

    pub fn ingest_event(&self, event: ImpactEvent) {
        let _ = self.input_tx.send(EngineInput::Event(event));
    }

    pub fn set_city(&self, city: impl Into<String>) {
        let _ = self.input_tx.send(EngineInput::SetCity(city.into()));
    }

    pub fn set_projection(&self, mode: ProjectionMode) {
        self.camera.set_projection(mode);
    }

    /// Sender feeding the orchestrator queue; handed to the event channel
    /// client so stream events and commands share one ordered queue.
    pub fn input_sender(&self) -> mpsc::UnboundedSender<EngineInput> {
        self.input_tx.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Wait until every input enqueued before this call has been processed.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.input_tx.send(EngineInput::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    pub async fn thought_log(&self) -> Vec<ThoughtEntry> {
        self.inner.lock().await.thoughts.clone()
    }

    pub async fn latest_metrics(&self) -> Option<MetricsSnapshot> {
        self.inner.lock().await.latest_metrics.clone()
    }

    pub async fn current_city(&self) -> Option<String> {
        self.inner.lock().await.city.clone()
    }

    pub fn session(&self) -> &Arc<session::MapSession> {
        &self.session
    }

    pub fn layers(&self) -> &Arc<LayerReconciler> {
        &self.layers
    }

    pub fn markers(&self) -> &Arc<MarkerPool> {
        &self.markers
    }

    pub fn animations(&self) -> &Arc<AnimationScheduler> {
        &self.animations
    }

    pub fn camera(&self) -> &Arc<CameraController> {
        &self.camera
    }

    // ---- helpers -------------------------------------------------------

    async fn resolve_coordinates(
        &self,
        coordinates: Option<LngLat>,
        location: &str,
    ) -> Option<LngLat> {
        if let Some(center) = coordinates {
            return Some(center);
        }
        match self.geocoder.geocode(location).await {
            Ok(center) => Some(center),
            Err(err) => {
                warn!(location, error = %err, "geocode failed for command");
                let _ = self
                    .events
                    .send(EngineEvent::Error(format!("could not locate '{location}'")));
                None
            }
        }
    }

    async fn upsert_command_layer(&self, descriptor: LayerDescriptor) {
        let mut inner = self.inner.lock().await;
        inner
            .command_layers
            .insert(descriptor.id.clone(), descriptor);
    }

    /// Rebuild the full desired set (command layers + heatmap rings) and
    /// reconcile. Recomputing from unchanged state is a no-op downstream.
    async fn sync_layers(&self) {
        let desired: Vec<LayerDescriptor> = {
            let inner = self.inner.lock().await;
            inner
                .command_layers
                .values()
                .cloned()
                .chain(inner.heatmap_layers.iter().cloned())
                .collect()
        };
        self.layers.reconcile(&desired).await;
    }

    async fn push_thought(&self, agent: &str, message: &str) {
        let entry = ThoughtEntry {
            agent: agent.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
        };
        {
            let mut inner = self.inner.lock().await;
            inner.thoughts.push(entry.clone());
            let capacity = self.config.thought_log_capacity;
            if inner.thoughts.len() > capacity {
                let overflow = inner.thoughts.len() - capacity;
                inner.thoughts.drain(..overflow);
            }
        }
        let _ = self.events.send(EngineEvent::Thought(entry));
    }

    /// Streaming tokens coalesce into one in-progress entry instead of
    /// flooding the log.
    async fn append_token(&self, text: &str) {
        let entry = {
            let mut inner = self.inner.lock().await;
            match inner.thoughts.last_mut() {
                Some(last) if last.agent == TOKEN_AGENT => {
                    last.message.push_str(text);
                    last.clone()
                }
                _ => {
                    let entry = ThoughtEntry {
                        agent: TOKEN_AGENT.to_string(),
                        message: text.to_string(),
                        timestamp: Utc::now(),
                    };
                    inner.thoughts.push(entry.clone());
                    entry
                }
            }
        };
        let _ = self.events.send(EngineEvent::Thought(entry));
    }

    fn popup_schedule(&self) -> PopupSchedule {
        PopupSchedule {
            open_after: self.config.popup_open_after,
            close_after: self.config.popup_close_after,
        }
    }
}

fn circle_descriptor(
    id: LayerId,
    center: LngLat,
    radius_m: f64,
    color: &str,
    opacity: f64,
) -> LayerDescriptor {
    LayerDescriptor {
        id,
        kind: LayerKind::Circle,
        source: FeatureCollection::single(Feature::new(circle_polygon(center, radius_m))),
        paint: default_paint(LayerKind::Circle, color, opacity),
        radius_hint_m: radius_m,
    }
}

fn slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.trim_end_matches('-').to_string()
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
