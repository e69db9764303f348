//! # Offset Store
//!
//! JSON-backed repository of per-OS/build hook offsets that the agent needs to
//! locate `__CFBinaryPlistCreate15` and `_xpc_connection_call_event_handler`.
//!
//! ## File format
//!
//! ```json
//! { "offsets": [ { "os": "iPhone14,7",
//!                  "builds": [ { "20B110": { "PlistCreate": "0xb1c00", "CallHandler": "0x11c00" } } ] } ] }
//! ```
//!
//! `builds` is written as an array of single-entry maps. Older files that hold
//! one map with several builds are still read and normalised on load.
//!
//! ## Known gaps
//!
//! - [`append`] never merges or deduplicates: appending an existing
//!   `(machine, version)` pair adds a second, identical entry.
//! - Appends are read-modify-write over the whole file with no locking and no
//!   backup. A crash between truncate and re-encode loses the file; callers
//!   must serialise appends themselves.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::domain::ConfigError;

/// Name of the config file in the home directory
pub const DEFAULT_CONFIG_NAME: &str = "gxpc.conf";

/// Offsets for one OS build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOffsets {
    #[serde(rename = "PlistCreate")]
    pub plist_create: String,
    #[serde(rename = "CallHandler")]
    pub call_handler: String,
}

/// All builds recorded for one machine identifier (e.g. `iPhone14,7`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsOffsets {
    pub os: String,
    #[serde(deserialize_with = "deserialize_builds")]
    pub builds: Vec<BTreeMap<String, BuildOffsets>>,
}

impl OsOffsets {
    /// Entry holding exactly one build
    pub fn single(os: &str, version: &str, offsets: BuildOffsets) -> Self {
        Self { os: os.to_string(), builds: vec![BTreeMap::from([(version.to_string(), offsets)])] }
    }

    /// Look up a build by version across all build maps
    pub fn build(&self, version: &str) -> Option<&BuildOffsets> {
        self.builds.iter().find_map(|b| b.get(version))
    }
}

/// The whole config file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetRecord {
    pub offsets: Vec<OsOffsets>,
}

impl OffsetRecord {
    /// Sample config written by `gxpc --init`
    pub fn sample() -> Self {
        Self {
            offsets: vec![
                OsOffsets::single(
                    "iPhone14,7",
                    "20B110",
                    BuildOffsets {
                        plist_create: "0xb1c00".to_string(),
                        call_handler: "0x11c00".to_string(),
                    },
                ),
                OsOffsets::single(
                    "iPad7,11",
                    "22B83",
                    BuildOffsets {
                        plist_create: "0x7dbf4".to_string(),
                        call_handler: "0xf98c".to_string(),
                    },
                ),
            ],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

/// Offsets announced by the agent after it resolved the hook points itself
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NewOffset {
    #[serde(deserialize_with = "lenient_string")]
    pub machine: String,
    #[serde(deserialize_with = "lenient_string")]
    pub version: String,
    #[serde(deserialize_with = "lenient_string")]
    pub call_event: String,
    #[serde(deserialize_with = "lenient_string")]
    pub plist_create: String,
}

/// Accept a string, a number (kept as its JSON text) or null
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BuildsRepr {
    List(Vec<BTreeMap<String, BuildOffsets>>),
    Map(BTreeMap<String, BuildOffsets>),
}

fn deserialize_builds<'de, D>(deserializer: D) -> Result<Vec<BTreeMap<String, BuildOffsets>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match BuildsRepr::deserialize(deserializer)? {
        BuildsRepr::List(list) => list,
        // legacy shape: one map holding every build
        BuildsRepr::Map(map) => map.into_iter().map(|(k, v)| BTreeMap::from([(k, v)])).collect(),
    })
}

/// Default config location: `$HOME/gxpc.conf`
pub fn default_config_path() -> PathBuf {
    dirs::home_dir().unwrap_or_default().join(DEFAULT_CONFIG_NAME)
}

/// Load the store.
///
/// A missing file yields an empty record. Malformed JSON is a
/// [`ConfigError::Decode`].
pub fn load(path: &Path) -> Result<OffsetRecord, ConfigError> {
    match File::open(path) {
        Ok(file) => decode(path, &file),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(OffsetRecord::default()),
        Err(e) => Err(e.into()),
    }
}

/// Load the store, distinguishing "no file" from "empty file contents".
///
/// This is what the agent's `setup` call receives: `None` becomes JSON `null`.
pub fn load_if_present(path: &Path) -> Result<Option<OffsetRecord>, ConfigError> {
    if path.exists() {
        load(path).map(Some)
    } else {
        Ok(None)
    }
}

/// Append one OS entry holding a single build.
///
/// Creates the file when it does not exist. Otherwise decodes the whole file,
/// pushes a new entry, truncates and re-encodes from the start.
pub fn append(path: &Path, update: &NewOffset) -> Result<(), ConfigError> {
    let entry = OsOffsets::single(
        &update.machine,
        &update.version,
        BuildOffsets {
            plist_create: update.plist_create.clone(),
            call_handler: update.call_event.clone(),
        },
    );

    let mut file = match OpenOptions::new().read(true).write(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let mut file = File::create(path)?;
            let record = OffsetRecord { offsets: vec![entry] };
            return encode(path, &mut file, &record);
        }
        Err(e) => return Err(e.into()),
    };

    let mut record = decode(path, &file)?;
    record.offsets.push(entry);

    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    encode(path, &mut file, &record)
}

/// Write the sample config, replacing whatever is at `path`
pub fn write_sample(path: &Path) -> Result<(), ConfigError> {
    let mut file = File::create(path)?;
    encode(path, &mut file, &OffsetRecord::sample())
}

fn decode(path: &Path, file: &File) -> Result<OffsetRecord, ConfigError> {
    serde_json::from_reader(BufReader::new(file))
        .map_err(|source| ConfigError::Decode { path: path.to_path_buf(), source })
}

fn encode(path: &Path, file: &mut File, record: &OffsetRecord) -> Result<(), ConfigError> {
    serde_json::to_writer_pretty(&mut *file, record)
        .map_err(|source| ConfigError::Encode { path: path.to_path_buf(), source })?;
    file.write_all(b"\n")?;
    file.flush()?;
    Ok(())
}
