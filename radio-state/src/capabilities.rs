//! Device capabilities read once at bootstrap
//!
//! Capabilities never change for the lifetime of a device, so they are read
//! once after the first successful connection and shared immutably.

use std::sync::Arc;

use fsapi::{nodes, ApiError, Connection, ListItem};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Result, StateError};

const UNKNOWN_PREFIX: &str = "unknown-#";

/// One entry of the device's source-mode list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModeEntry {
    /// Wire index written to `netremote.sys.mode`
    pub index: i64,
    pub id: String,
    pub label: String,
    pub selectable: bool,
    pub streamable: bool,
}

impl ModeEntry {
    pub fn new(index: i64, id: &str, label: &str, selectable: bool) -> Self {
        Self {
            index,
            id: id.to_string(),
            label: label.to_string(),
            selectable,
            streamable: false,
        }
    }

    /// Property and action names worth showing while this mode is active
    pub fn visible_properties(&self) -> &'static [&'static str] {
        const BASE: &[&str] = &["power", "mode", "volume", "muted"];

        match self.id.as_str() {
            "IR" => &["power", "mode", "volume", "muted", "info", "cover"],
            "Spotify" | "MP" => &[
                "power", "mode", "volume", "muted", "playing", "repeat", "shuffle", "info",
                "cover", "previous", "next",
            ],
            "DMR" => &["power", "mode", "volume", "muted", "playing", "info", "cover"],
            "DAB" => &["power", "mode", "volume", "muted", "info", "previous", "next"],
            "FM" => &[
                "power", "mode", "volume", "muted", "frequency", "info", "previous", "next",
            ],
            _ => BASE,
        }
    }

    fn from_item(position: usize, item: &ListItem) -> Self {
        Self {
            index: item.key.unwrap_or(position as i64),
            id: item.field_str("id").unwrap_or_default().trim().to_string(),
            label: item.field_str("label").unwrap_or_default().trim().to_string(),
            selectable: item.field_i64("selectable").unwrap_or(0) != 0,
            streamable: item.field_i64("streamable").unwrap_or(0) != 0,
        }
    }
}

/// The immutable mode list, indexed by wire index
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModeList {
    entries: Vec<ModeEntry>,
}

impl ModeList {
    pub fn new(entries: Vec<ModeEntry>) -> Self {
        Self { entries }
    }

    pub fn from_items(items: &[ListItem]) -> Self {
        Self::new(
            items
                .iter()
                .enumerate()
                .map(|(position, item)| ModeEntry::from_item(position, item))
                .collect(),
        )
    }

    pub fn entries(&self) -> &[ModeEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn by_index(&self, index: i64) -> Option<&ModeEntry> {
        self.entries.iter().find(|entry| entry.index == index)
    }

    pub fn by_label(&self, label: &str) -> Option<&ModeEntry> {
        self.entries
            .iter()
            .find(|entry| entry.label == label)
            .or_else(|| {
                self.entries
                    .iter()
                    .find(|entry| entry.label.eq_ignore_ascii_case(label))
            })
    }

    /// Label for a wire index, synthesizing `unknown-#<index>` when absent
    pub fn label_for(&self, index: i64) -> String {
        self.by_index(index)
            .map(|entry| entry.label.clone())
            .unwrap_or_else(|| format!("{}{}", UNKNOWN_PREFIX, index))
    }

    /// Wire index for a label, including synthesized `unknown-#<index>` ones
    pub fn index_for(&self, label: &str) -> Option<i64> {
        self.by_label(label)
            .map(|entry| entry.index)
            .or_else(|| label.strip_prefix(UNKNOWN_PREFIX)?.parse().ok())
    }

    /// The labels offered to users
    pub fn selectable_labels(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|entry| entry.selectable)
            .map(|entry| entry.label.clone())
            .collect()
    }
}

/// FM tuner range in kHz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FmRange {
    pub lower: i64,
    pub upper: i64,
    pub step: i64,
}

/// Everything read from the device before it goes live
#[derive(Debug, Clone, Serialize)]
pub struct Capabilities {
    pub radio_id: String,
    pub friendly_name: Option<String>,
    pub volume_steps: i64,
    pub fm_range: Option<FmRange>,
    pub modes: Arc<ModeList>,
}

impl Capabilities {
    /// Stable identifier, independent of the network address
    pub fn device_id(&self) -> String {
        format!("frontier-silicon-{}", self.radio_id)
    }

    /// Highest volume exposed, scaled by `limit_percent` of the device range
    pub fn max_volume(&self, limit_percent: u8) -> i64 {
        let limit = i64::from(limit_percent.clamp(1, 100));
        ((self.volume_steps - 1).max(0) * limit) / 100
    }
}

/// Read all capabilities through the connection
pub async fn bootstrap(connection: &Connection) -> Result<Capabilities> {
    let radio_id = connection
        .get(nodes::RADIO_ID)
        .await
        .map_err(|e| StateError::Bootstrap(format!("radio id: {}", e)))?
        .raw
        .trim()
        .to_string();

    let friendly_name = optional(connection.get(nodes::FRIENDLY_NAME).await)?
        .map(|v| v.raw.trim().to_string())
        .filter(|name| !name.is_empty());

    let volume_steps = connection
        .get(nodes::VOLUME_STEPS)
        .await
        .map_err(|e| StateError::Bootstrap(format!("volume steps: {}", e)))?
        .as_i64()
        .ok_or_else(|| StateError::Bootstrap("volume steps is not a number".to_string()))?;

    let fm_range = match (
        optional_i64(connection, nodes::FM_FREQ_LOWER).await?,
        optional_i64(connection, nodes::FM_FREQ_UPPER).await?,
        optional_i64(connection, nodes::FM_FREQ_STEP).await?,
    ) {
        (Some(lower), Some(upper), Some(step)) if step > 0 => Some(FmRange { lower, upper, step }),
        _ => None,
    };

    let items = connection
        .get_list(nodes::VALID_MODES)
        .await
        .map_err(|e| StateError::Bootstrap(format!("mode list: {}", e)))?;
    let modes = Arc::new(ModeList::from_items(&items));

    info!(
        address = %connection.address(),
        radio_id = %radio_id,
        modes = modes.entries().len(),
        fm = fm_range.is_some(),
        "capabilities loaded"
    );

    Ok(Capabilities {
        radio_id,
        friendly_name,
        volume_steps,
        fm_range,
        modes,
    })
}

/// A node the device may not implement
fn optional<T>(result: std::result::Result<T, ApiError>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ApiError::NodeUnavailable { node, .. }) => {
            debug!(node = %node, "optional capability not supported");
            Ok(None)
        }
        Err(e) => Err(StateError::Bootstrap(e.to_string())),
    }
}

async fn optional_i64(connection: &Connection, node: &str) -> Result<Option<i64>> {
    Ok(optional(connection.get(node).await)?.and_then(|v| v.as_i64()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modes() -> ModeList {
        ModeList::new(vec![
            ModeEntry::new(0, "IR", "Internet radio", true),
            ModeEntry::new(1, "MP", "Music player", false),
            ModeEntry::new(5, "FM", "FM", true),
        ])
    }

    #[test]
    fn test_labels_and_indices() {
        let modes = modes();
        assert_eq!(modes.label_for(5), "FM");
        assert_eq!(modes.label_for(9), "unknown-#9");
        assert_eq!(modes.index_for("internet radio"), Some(0));
        assert_eq!(modes.index_for("unknown-#9"), Some(9));
        assert_eq!(modes.index_for("unknown-#x"), None);
        assert_eq!(modes.selectable_labels(), vec!["Internet radio", "FM"]);
    }

    #[test]
    fn test_max_volume() {
        let caps = Capabilities {
            radio_id: "0022610A1B2C".to_string(),
            friendly_name: None,
            volume_steps: 33,
            fm_range: None,
            modes: Arc::new(ModeList::default()),
        };

        assert_eq!(caps.max_volume(100), 32);
        assert_eq!(caps.max_volume(50), 16);
        assert_eq!(caps.max_volume(0), 0);
        assert_eq!(caps.device_id(), "frontier-silicon-0022610A1B2C");
    }

    #[test]
    fn test_capabilities_serialize_with_shared_modes() {
        let caps = Capabilities {
            radio_id: "0022610A1B2C".to_string(),
            friendly_name: Some("Kitchen".to_string()),
            volume_steps: 33,
            fm_range: Some(FmRange {
                lower: 87500,
                upper: 108000,
                step: 50,
            }),
            modes: Arc::new(modes()),
        };

        let json = serde_json::to_value(&caps).unwrap();
        assert_eq!(json["friendly_name"], "Kitchen");
        assert_eq!(json["fm_range"]["step"], 50);
        assert_eq!(json["modes"]["entries"][2]["id"], "FM");
        assert_eq!(json["modes"]["entries"][1]["selectable"], false);
    }

    #[test]
    fn test_visible_properties() {
        let fm = ModeEntry::new(5, "FM", "FM", true);
        assert!(fm.visible_properties().contains(&"frequency"));

        let unknown = ModeEntry::new(9, "CASSETTE", "Tape", true);
        assert_eq!(unknown.visible_properties(), &["power", "mode", "volume", "muted"]);
    }
}
