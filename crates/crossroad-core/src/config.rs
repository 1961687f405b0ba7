//! Relay configuration loading and typed config structures.
//!
//! The optional configuration file `crossroad-config.yaml` tunes the
//! relay's ports, cadences, and the junction signal layout. Every
//! field has a serde default matching the original deployment, so a
//! missing file or a partial file is always usable.

use std::collections::BTreeMap;
use std::path::Path;

use crossroad_types::Approach;
use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The junction layout is not internally consistent.
    #[error("invalid junction layout: {message}")]
    Layout {
        /// Description of the inconsistency.
        message: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level relay configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RelayConfig {
    /// Telemetry ingest settings.
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Snapshot broadcast settings.
    #[serde(default)]
    pub broadcast: BroadcastConfig,

    /// Engine discovery settings.
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Direction-to-signal-position mapping for the controlled
    /// junction.
    #[serde(default)]
    pub junction: JunctionLayout,
}

impl RelayConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Layout`] if the junction layout is inconsistent.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] or [`ConfigError::Layout`] as for
    /// [`RelayConfig::from_file`].
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        config.junction.validate()?;
        Ok(config)
    }
}

/// Telemetry ingest settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TelemetryConfig {
    /// UDP port the protocol publishes telemetry to (loopback only).
    #[serde(default = "default_telemetry_port")]
    pub port: u16,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            port: default_telemetry_port(),
        }
    }
}

const fn default_telemetry_port() -> u16 {
    8766
}

/// Snapshot broadcast settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BroadcastConfig {
    /// Minimum wall-clock milliseconds between two emitted snapshots.
    /// Deliberately independent of the simulation step length.
    #[serde(default = "default_broadcast_interval_ms")]
    pub interval_ms: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_broadcast_interval_ms(),
        }
    }
}

const fn default_broadcast_interval_ms() -> u64 {
    250
}

/// Engine discovery settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DiscoveryConfig {
    /// Milliseconds between discovery polls while waiting for the
    /// engine process to appear.
    #[serde(default = "default_discovery_poll_ms")]
    pub poll_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            poll_ms: default_discovery_poll_ms(),
        }
    }
}

const fn default_discovery_poll_ms() -> u64 {
    1000
}

/// The direction-to-signal-position mapping for one controlled
/// junction.
///
/// A SUMO signal state is a string with one character per signal
/// position. Which positions belong to which compass approach is a
/// property of the junction's network definition, so it is
/// configuration here. The default is the original four-approach
/// layout: four 3-position blocks over a 12-character string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JunctionLayout {
    /// Total number of signal positions at the junction.
    #[serde(default = "default_signal_length")]
    pub signal_length: usize,

    /// Signal positions belonging to each approach.
    #[serde(default = "default_blocks")]
    pub blocks: BTreeMap<Approach, Vec<usize>>,
}

impl Default for JunctionLayout {
    fn default() -> Self {
        Self {
            signal_length: default_signal_length(),
            blocks: default_blocks(),
        }
    }
}

const fn default_signal_length() -> usize {
    12
}

fn default_blocks() -> BTreeMap<Approach, Vec<usize>> {
    let mut blocks = BTreeMap::new();
    blocks.insert(Approach::N, vec![0, 1, 2]);
    blocks.insert(Approach::E, vec![3, 4, 5]);
    blocks.insert(Approach::S, vec![6, 7, 8]);
    blocks.insert(Approach::W, vec![9, 10, 11]);
    blocks
}

impl JunctionLayout {
    /// The signal positions mapped to an approach. Unmapped approaches
    /// yield an empty slice.
    pub fn positions(&self, approach: Approach) -> &[usize] {
        self.blocks.get(&approach).map_or(&[], Vec::as_slice)
    }

    /// The representative signal character for an approach, read from
    /// a raw signal-state string. Missing positions default to red.
    pub fn approach_char(&self, raw: &str, approach: Approach) -> char {
        self.positions(approach)
            .first()
            .and_then(|&idx| raw.chars().nth(idx))
            .unwrap_or('r')
    }

    /// Check that every mapped position fits inside the signal string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Layout`] when a block references a
    /// position at or beyond `signal_length`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (approach, positions) in &self.blocks {
            for &idx in positions {
                if idx >= self.signal_length {
                    return Err(ConfigError::Layout {
                        message: format!(
                            "approach {approach} maps position {idx}, \
                             but the signal string has length {}",
                            self.signal_length
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_original_deployment() {
        let config = RelayConfig::parse("{}").unwrap();
        assert_eq!(config.telemetry.port, 8766);
        assert_eq!(config.broadcast.interval_ms, 250);
        assert_eq!(config.discovery.poll_ms, 1000);
        assert_eq!(config.junction.signal_length, 12);
        assert_eq!(config.junction.positions(Approach::N), &[0, 1, 2]);
        assert_eq!(config.junction.positions(Approach::W), &[9, 10, 11]);
    }

    #[test]
    fn partial_yaml_overrides_only_named_fields() {
        let config = RelayConfig::parse(
            "telemetry:\n  port: 9900\nbroadcast:\n  interval_ms: 500\n",
        )
        .unwrap();
        assert_eq!(config.telemetry.port, 9900);
        assert_eq!(config.broadcast.interval_ms, 500);
        assert_eq!(config.discovery.poll_ms, 1000);
    }

    #[test]
    fn custom_junction_layout_parses() {
        let yaml = r"
junction:
  signal_length: 8
  blocks:
    N: [0, 1]
    E: [2, 3]
    S: [4, 5]
    W: [6, 7]
";
        let config = RelayConfig::parse(yaml).unwrap();
        assert_eq!(config.junction.signal_length, 8);
        assert_eq!(config.junction.positions(Approach::S), &[4, 5]);
    }

    #[test]
    fn out_of_range_position_is_rejected() {
        let yaml = r"
junction:
  signal_length: 4
  blocks:
    N: [0, 1]
    E: [2, 9]
";
        assert!(matches!(
            RelayConfig::parse(yaml),
            Err(ConfigError::Layout { .. })
        ));
    }

    #[test]
    fn approach_char_defaults_to_red_for_short_strings() {
        let layout = JunctionLayout::default();
        assert_eq!(layout.approach_char("GGG", Approach::N), 'G');
        // W maps position 9, which "GGG" does not have.
        assert_eq!(layout.approach_char("GGG", Approach::W), 'r');
        assert_eq!(layout.approach_char("", Approach::N), 'r');
    }
}
