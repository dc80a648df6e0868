//! Parsing the on-disk TOML configuration file shape into
//! [`tdns_core::config::CoreConfig`] plus the zone list it doesn't itself
//! define (`spec.md` §6 covers only the options the core reads at runtime,
//! not how they reach it).

use std::fs;
use std::path::{Path, PathBuf};

use domain::base::iana::Class;
use serde::{Deserialize, Serialize};
use tdns_core::config::CoreConfig;

/// One zone this process should load and serve authoritatively.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ZoneConfig {
    /// The zone's apex, in presentation form.
    pub apex: String,
    /// Path to the zonefile to load it from.
    pub file: PathBuf,
    #[serde(default = "default_class")]
    pub class: String,
    /// Whether this responder signs the zone online rather than serving
    /// pre-signed records.
    #[serde(default)]
    pub online_signing: bool,
}

fn default_class() -> String {
    "IN".to_string()
}

impl ZoneConfig {
    pub fn class(&self) -> Class {
        match self.class.to_ascii_uppercase().as_str() {
            "CH" => Class::CH,
            "HS" => Class::HS,
            _ => Class::IN,
        }
    }
}

/// The full on-disk configuration tree: the core's own options plus the
/// zones this process is authoritative for.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TdnsConfig {
    #[serde(default)]
    pub core: CoreConfig,
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
}

#[derive(Debug)]
pub enum CfgError {
    Read(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
}

impl std::fmt::Display for CfgError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read(path, err) => write!(f, "failed to read {}: {err}", path.display()),
            Self::Parse(path, err) => write!(f, "failed to parse {}: {err}", path.display()),
        }
    }
}

impl std::error::Error for CfgError {}

/// Load a [`TdnsConfig`] from a TOML file on disk.
pub fn load(path: &Path) -> Result<TdnsConfig, CfgError> {
    let text = fs::read_to_string(path).map_err(|err| CfgError::Read(path.to_path_buf(), err))?;
    toml::from_str(&text).map_err(|err| CfgError::Parse(path.to_path_buf(), err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let parsed: TdnsConfig = toml::from_str("").unwrap();
        assert!(parsed.zones.is_empty());
        assert_eq!(parsed.core.line_width, 80);
    }

    #[test]
    fn zone_class_defaults_to_in() {
        let zone = ZoneConfig { apex: "example.test.".to_string(), file: PathBuf::from("example.test.zone"), class: default_class(), online_signing: false };
        assert_eq!(zone.class(), Class::IN);
    }
}
