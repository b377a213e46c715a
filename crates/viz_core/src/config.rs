use std::{collections::HashMap, fs, time::Duration};

use shared::geo::LngLat;

/// Engine configuration. Defaults target a local backend and the San
/// Francisco view the simulation backend assumes when no city is given.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub backend_url: String,
    pub stream_url: String,
    pub mapbox_token: String,
    pub geocode_base_url: String,
    pub default_center: LngLat,
    pub default_zoom: f64,
    pub animation_interval: Duration,
    pub animation_step_percent: u8,
    pub popup_open_after: Duration,
    pub popup_close_after: Duration,
    pub heatmap_base_radius_m: f64,
    pub thought_log_capacity: usize,
    pub event_buffer_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:8000".into(),
            stream_url: "ws://127.0.0.1:8000/events".into(),
            mapbox_token: String::new(),
            geocode_base_url: "https://api.mapbox.com/geocoding/v5/mapbox.places".into(),
            default_center: LngLat::new(-122.4194, 37.7749),
            default_zoom: 13.0,
            animation_interval: Duration::from_millis(500),
            animation_step_percent: 10,
            popup_open_after: Duration::from_millis(500),
            popup_close_after: Duration::from_millis(3000),
            heatmap_base_radius_m: 300.0,
            thought_log_capacity: 100,
            event_buffer_capacity: 256,
        }
    }
}

/// Layered load: defaults, then `vizctl.toml`, then `APP__*` environment
/// overrides.
pub fn load_settings() -> EngineConfig {
    let mut settings = EngineConfig::default();

    if let Ok(raw) = fs::read_to_string("vizctl.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            if let Some(v) = file_cfg.get("backend_url") {
                settings.backend_url = v.clone();
            }
            if let Some(v) = file_cfg.get("stream_url") {
                settings.stream_url = v.clone();
            }
            if let Some(v) = file_cfg.get("mapbox_token") {
                settings.mapbox_token = v.clone();
            }
            if let Some(v) = file_cfg.get("geocode_base_url") {
                settings.geocode_base_url = v.clone();
            }
        }
    }

    if let Ok(v) = std::env::var("APP__BACKEND_URL") {
        settings.backend_url = v;
    }
    if let Ok(v) = std::env::var("APP__STREAM_URL") {
        settings.stream_url = v;
    }
    if let Ok(v) = std::env::var("MAPBOX_TOKEN") {
        settings.mapbox_token = v;
    }
    if let Ok(v) = std::env::var("APP__MAPBOX_TOKEN") {
        settings.mapbox_token = v;
    }
    if let Ok(v) = std::env::var("APP__GEOCODE_BASE_URL") {
        settings.geocode_base_url = v;
    }
    if let Ok(v) = std::env::var("APP__ANIMATION_INTERVAL_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.animation_interval = Duration::from_millis(parsed);
        }
    }

    settings
}
