use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use map_surface::{
    CameraMove, LayerSpec, MapInit, MapSurface, MapSurfaceProvider, MarkerVisual, PaintProperty,
    SourceSpec, SurfaceError,
};
use shared::domain::{ChannelName, LayerId, MarkerId, SimulationId};
use tracing::info;
use uuid::Uuid;
use viz_core::{
    backend::BackendClient, load_settings, stream::EventChannelClient, EngineEvent, EngineInput,
    PolicyMapEngine,
};

#[derive(Parser, Debug)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a simulation for a policy document and watch it play out.
    Simulate {
        city: String,
        policy_file: String,
    },
    /// Send a chat message into an existing simulation.
    Chat {
        simulation_id: String,
        message: String,
    },
    /// Upload a policy document to the backend.
    Upload {
        file: String,
    },
    /// Print raw events from a stream channel.
    Watch {
        channel: String,
    },
}

/// Headless stand-in for a real map renderer: every mutation becomes a log
/// line, which is enough to watch an engine run from a terminal.
struct TraceSurface;

impl MapSurface for TraceSurface {
    fn add_source(&self, source: SourceSpec) -> Result<(), SurfaceError> {
        info!(source = %source.id, features = source.data.features.len(), "add source");
        Ok(())
    }

    fn remove_source(&self, id: &str) -> Result<(), SurfaceError> {
        info!(source = id, "remove source");
        Ok(())
    }

    fn add_layer(&self, layer: LayerSpec) -> Result<(), SurfaceError> {
        info!(layer = %layer.id, kind = ?layer.kind, "add layer");
        Ok(())
    }

    fn remove_layer(&self, id: &LayerId) -> Result<(), SurfaceError> {
        info!(layer = %id, "remove layer");
        Ok(())
    }

    fn set_paint_property(&self, id: &LayerId, property: PaintProperty) -> Result<(), SurfaceError> {
        info!(layer = %id, property = ?property, "set paint");
        Ok(())
    }

    fn place_marker(&self, marker: MarkerVisual) -> Result<(), SurfaceError> {
        info!(marker = marker.id.0, label = %marker.label, "place marker");
        Ok(())
    }

    fn remove_marker(&self, id: MarkerId) -> Result<(), SurfaceError> {
        info!(marker = id.0, "remove marker");
        Ok(())
    }

    fn set_popup_visible(&self, id: MarkerId, visible: bool) -> Result<(), SurfaceError> {
        info!(marker = id.0, visible, "popup");
        Ok(())
    }

    fn move_camera(&self, motion: CameraMove) -> Result<(), SurfaceError> {
        info!(center = ?motion.center, zoom = ?motion.zoom, motion = ?motion.motion, "move camera");
        Ok(())
    }

    fn destroy(&self) {
        info!("surface destroyed");
    }
}

struct TraceSurfaceProvider;

#[async_trait::async_trait]
impl MapSurfaceProvider for TraceSurfaceProvider {
    async fn create_surface(&self, init: &MapInit) -> Result<Arc<dyn MapSurface>> {
        info!(center = ?init.center, zoom = init.zoom, "creating trace surface");
        Ok(Arc::new(TraceSurface))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let cli = Cli::parse();
    let settings = load_settings();
    let backend = Arc::new(BackendClient::new(
        &settings.backend_url,
        &settings.geocode_base_url,
        &settings.mapbox_token,
    ));

    match cli.command {
        Command::Simulate { city, policy_file } => {
            let policy = tokio::fs::read_to_string(&policy_file).await?;
            let created = backend.create_simulation(&city, &policy).await?;
            println!("simulation_id={}", created.simulation_id);

            let engine = PolicyMapEngine::open(
                settings.clone(),
                Arc::new(TraceSurfaceProvider),
                backend,
            )
            .await?;
            let stream = EventChannelClient::connect(
                &settings.stream_url,
                settings.event_buffer_capacity,
                engine.input_sender(),
            )
            .await?;
            stream.subscribe(created.channel).await;

            let mut events = engine.subscribe_events();
            engine.set_city(city);

            while let Ok(event) = events.recv().await {
                match event {
                    EngineEvent::Thought(entry) => {
                        println!("[{}] {}", entry.agent, entry.message);
                    }
                    EngineEvent::MetricsUpdated(snapshot) => {
                        for (metric, delta) in &snapshot.metrics {
                            println!("{metric}: {:+.1}%", delta.percentage);
                        }
                        break;
                    }
                    EngineEvent::SimulationError(message) => {
                        eprintln!("simulation error: {message}");
                        break;
                    }
                    EngineEvent::TransportDown => {
                        eprintln!("event stream disconnected");
                        break;
                    }
                    _ => {}
                }
            }

            stream.shutdown().await;
            engine.close().await;
        }
        Command::Chat {
            simulation_id,
            message,
        } => {
            let id = SimulationId(Uuid::parse_str(&simulation_id)?);
            backend.send_chat(id, &message).await?;
            println!("sent");
        }
        Command::Upload { file } => {
            let bytes = tokio::fs::read(&file).await?;
            let filename = std::path::Path::new(&file)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("document.txt");
            backend.upload_document(filename, bytes).await?;
            println!("uploaded {filename}");
        }
        Command::Watch { channel } => {
            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
            let stream = EventChannelClient::connect(
                &settings.stream_url,
                settings.event_buffer_capacity,
                tx,
            )
            .await?;
            stream.subscribe(ChannelName(channel)).await;

            while let Some(input) = rx.recv().await {
                match input {
                    EngineInput::Event(event) => {
                        println!("{}", serde_json::to_string(&event)?);
                    }
                    EngineInput::TransportDown => {
                        eprintln!("event stream disconnected");
                        break;
                    }
                    _ => {}
                }
            }
            stream.shutdown().await;
        }
    }

    Ok(())
}
