//! Free-form operator input → typed commands.
//!
//! Chat text is scanned for a known verb; everything else about the phrase
//! (quoted target names, `lng,lat` pairs, magnitudes) is extracted around
//! it. Unknown verbs are rejected with an error, never silently dropped.

use shared::geo::LngLat;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Build {
        location: String,
        coordinates: Option<LngLat>,
        units: u32,
    },
    DemolishSpecific {
        target: String,
        coordinates: LngLat,
    },
    DemolishArea {
        center: LngLat,
        radius_m: f64,
    },
    AnalyzeTraffic {
        corridor: Vec<LngLat>,
    },
    HighlightArea {
        location: String,
        coordinates: Option<LngLat>,
        color: String,
    },
    ShowHeatmap {
        metric: Option<String>,
    },
}

#[derive(Debug, Error)]
pub enum CommandParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("missing argument: {0}")]
    MissingArgument(&'static str),
    #[error("invalid coordinate pair '{value}'")]
    InvalidCoordinate { value: String },
}

const HIGHLIGHT_COLOR: &str = "#f59e0b";

/// Metric names the backend reports; used to pick a heatmap focus out of
/// free text.
const KNOWN_METRICS: &[&str] = &[
    "housing_affordability",
    "housing_units",
    "traffic_congestion",
    "gdp_growth",
    "affordability_index",
    "air_quality",
    "public_satisfaction",
    "population",
];

pub fn parse_chat(input: &str) -> Result<Command, CommandParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(CommandParseError::Empty);
    }

    let lowered = trimmed.to_ascii_lowercase();
    let words: Vec<&str> = lowered.split_whitespace().collect();
    let coordinates = extract_coordinates(&words)?;

    if contains_any(&words, &["demolish", "raze"]) || lowered.contains("tear down") {
        if words.contains(&"area") {
            let center = coordinates
                .first()
                .copied()
                .ok_or(CommandParseError::MissingArgument("area center"))?;
            let radius_m = number_after(&words, "radius").unwrap_or(500.0);
            return Ok(Command::DemolishArea { center, radius_m });
        }
        let target = quoted_span(trimmed)
            .or_else(|| phrase_after(trimmed, &["demolish", "raze", "tear down"]))
            .ok_or(CommandParseError::MissingArgument("demolition target"))?;
        let coordinates = coordinates
            .first()
            .copied()
            .ok_or(CommandParseError::MissingArgument("target coordinates"))?;
        return Ok(Command::DemolishSpecific {
            target,
            coordinates,
        });
    }

    if contains_any(&words, &["build", "construct", "develop"]) {
        let units = number_after(&words, "build")
            .or_else(|| number_before(&words, "units"))
            .map(|n| n.max(1.0) as u32)
            .unwrap_or(100);
        let location = quoted_span(trimmed)
            .or_else(|| phrase_after(trimmed, &["in", "at", "near"]))
            .ok_or(CommandParseError::MissingArgument("build location"))?;
        return Ok(Command::Build {
            location,
            coordinates: coordinates.first().copied(),
            units,
        });
    }

    if words.contains(&"traffic") {
        if coordinates.len() < 2 {
            return Err(CommandParseError::MissingArgument("traffic corridor"));
        }
        return Ok(Command::AnalyzeTraffic {
            corridor: coordinates,
        });
    }

    if contains_any(&words, &["heatmap", "impact"]) {
        let metric = KNOWN_METRICS
            .iter()
            .find(|m| lowered.contains(*m))
            .map(|m| m.to_string());
        return Ok(Command::ShowHeatmap { metric });
    }

    if words.contains(&"highlight") {
        let location = quoted_span(trimmed)
            .or_else(|| phrase_after(trimmed, &["highlight"]))
            .ok_or(CommandParseError::MissingArgument("highlight location"))?;
        return Ok(Command::HighlightArea {
            location,
            coordinates: coordinates.first().copied(),
            color: HIGHLIGHT_COLOR.to_string(),
        });
    }

    let verb = words.first().unwrap_or(&"").to_string();
    Err(CommandParseError::UnknownCommand(verb))
}

fn contains_any(words: &[&str], verbs: &[&str]) -> bool {
    words.iter().any(|w| verbs.contains(w))
}

/// Collect `lng,lat` pairs, tolerating `-122.4,37.7`, `(-122.4, 37.7)` and
/// the comma-then-space split across two tokens.
fn extract_coordinates(words: &[&str]) -> Result<Vec<LngLat>, CommandParseError> {
    let mut pairs = Vec::new();
    let mut i = 0;
    while i < words.len() {
        let token = words[i].trim_matches(|c| c == '(' || c == ')');
        if let Some((lng_raw, lat_raw)) = token.split_once(',') {
            if lat_raw.is_empty() {
                // "lng," "lat" split across tokens.
                if let Some(next) = words.get(i + 1) {
                    let next = next.trim_matches(|c| c == '(' || c == ')');
                    if let (Ok(lng), Ok(lat)) = (lng_raw.parse::<f64>(), next.parse::<f64>()) {
                        pairs.push(LngLat::new(lng, lat));
                        i += 2;
                        continue;
                    }
                }
            } else if let (Ok(lng), Ok(lat)) = (lng_raw.parse::<f64>(), lat_raw.parse::<f64>()) {
                pairs.push(LngLat::new(lng, lat));
                i += 1;
                continue;
            }
            if lng_raw.parse::<f64>().is_ok() || lat_raw.parse::<f64>().is_ok() {
                return Err(CommandParseError::InvalidCoordinate {
                    value: token.to_string(),
                });
            }
        }
        i += 1;
    }
    Ok(pairs)
}

/// First double-quoted span in the raw input, if any.
fn quoted_span(input: &str) -> Option<String> {
    let start = input.find('"')?;
    let rest = &input[start + 1..];
    let end = rest.find('"')?;
    let span = rest[..end].trim();
    (!span.is_empty()).then(|| span.to_string())
}

/// The words following the first occurrence of any keyword (matched as
/// whole words, including two-word keywords like "tear down"), stopped at a
/// coordinate token or a trailing "at". Leading articles are dropped.
fn phrase_after(input: &str, keywords: &[&str]) -> Option<String> {
    let words: Vec<&str> = input.split_whitespace().collect();
    let normalized: Vec<String> = words
        .iter()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_ascii_lowercase()
        })
        .collect();

    let mut start = None;
    'scan: for (i, word) in normalized.iter().enumerate() {
        for keyword in keywords {
            if let Some((first, second)) = keyword.split_once(' ') {
                if word == first && normalized.get(i + 1).is_some_and(|n| n == second) {
                    start = Some(i + 2);
                    break 'scan;
                }
            } else if word == keyword {
                start = Some(i + 1);
                break 'scan;
            }
        }
    }

    let mut collected = Vec::new();
    for (word, normalized) in words.iter().zip(normalized.iter()).skip(start?) {
        if normalized == "at" || word.contains(',') {
            break;
        }
        if collected.is_empty() && matches!(normalized.as_str(), "the" | "a" | "an") {
            continue;
        }
        let trimmed = word.trim_matches(|c: char| !c.is_alphanumeric());
        if !trimmed.is_empty() {
            collected.push(trimmed);
        }
    }
    let phrase = collected.join(" ");
    (!phrase.is_empty()).then_some(phrase)
}

fn number_after(words: &[&str], keyword: &str) -> Option<f64> {
    let idx = words.iter().position(|w| *w == keyword)?;
    words.get(idx + 1)?.parse().ok()
}

fn number_before(words: &[&str], keyword: &str) -> Option<f64> {
    let idx = words.iter().position(|w| *w == keyword)?;
    idx.checked_sub(1).and_then(|i| words[i].parse().ok())
}

#[cfg(test)]
#[path = "tests/commands_tests.rs"]
mod tests;
