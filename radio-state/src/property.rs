//! Property definitions, derivation hooks and actions
//!
//! Every property is one [`PropertyDef`] record: where it is read from,
//! where it is written to, and which codec kind interprets it. The table is
//! built from the bootstrap [`Capabilities`] so bounds and the mode list are
//! baked into each kind.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use fsapi::nodes;

use crate::capabilities::{Capabilities, ModeList};
use crate::codec::{BoolMapping, PropertyKind, PropertyValue, StepRange};
use crate::store::{Derived, Hook, UpdateContext};

/// Property names
pub mod names {
    pub const POWER: &str = "power";
    pub const PLAYING: &str = "playing";
    pub const MUTED: &str = "muted";
    pub const REPEAT: &str = "repeat";
    pub const SHUFFLE: &str = "shuffle";
    pub const VOLUME: &str = "volume";
    pub const MODE: &str = "mode";
    pub const FREQUENCY: &str = "frequency";
    pub const INFO: &str = "info";
    pub const COVER: &str = "cover";
    pub const SPOTIFY_USER: &str = "spotify_user";
}

/// Nodes read, in order, to build the composite info text
pub const INFO_FIELDS: [&str; 4] = [
    nodes::INFO_NAME,
    nodes::INFO_TEXT,
    nodes::INFO_ARTIST,
    nodes::INFO_ALBUM,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource {
    Node(&'static str),
    Composite(&'static [&'static str]),
}

#[derive(Debug, Clone)]
pub struct PropertyDef {
    pub name: &'static str,
    pub source: ReadSource,
    /// `None` for read-only properties
    pub write_node: Option<&'static str>,
    pub kind: PropertyKind,
}

impl PropertyDef {
    fn new(name: &'static str, node: &'static str, kind: PropertyKind) -> Self {
        Self {
            name,
            source: ReadSource::Node(node),
            write_node: Some(node),
            kind,
        }
    }

    fn read_only(mut self) -> Self {
        self.write_node = None;
        self
    }

    pub fn read_node(&self) -> Option<&'static str> {
        match self.source {
            ReadSource::Node(node) => Some(node),
            ReadSource::Composite(_) => None,
        }
    }

    pub fn is_writable(&self) -> bool {
        self.write_node.is_some()
    }

    /// Matches the name or any node of this property, ignoring case
    pub fn matches(&self, key: &str) -> bool {
        let nodes: &[&str] = match &self.source {
            ReadSource::Node(node) => std::slice::from_ref(node),
            ReadSource::Composite(fields) => fields,
        };

        self.name.eq_ignore_ascii_case(key)
            || nodes.iter().any(|node| node.eq_ignore_ascii_case(key))
            || self
                .write_node
                .is_some_and(|node| node.eq_ignore_ascii_case(key))
    }
}

/// Build the property table for a device
pub fn property_table(caps: &Capabilities, volume_limit_percent: u8) -> Vec<PropertyDef> {
    let plain = || PropertyKind::Boolean(BoolMapping::Plain);

    let mut table = vec![
        PropertyDef::new(names::POWER, nodes::POWER, plain()),
        PropertyDef {
            name: names::PLAYING,
            source: ReadSource::Node(nodes::PLAY_STATUS),
            write_node: Some(nodes::PLAY_CONTROL),
            kind: PropertyKind::Boolean(BoolMapping::PlayStatus),
        },
        PropertyDef::new(names::MUTED, nodes::MUTE, plain()),
        PropertyDef::new(names::REPEAT, nodes::REPEAT, plain()),
        PropertyDef::new(names::SHUFFLE, nodes::SHUFFLE, plain()),
        PropertyDef::new(
            names::VOLUME,
            nodes::VOLUME,
            PropertyKind::Integer {
                min: 0,
                max: caps.max_volume(volume_limit_percent),
            },
        ),
        PropertyDef::new(names::MODE, nodes::MODE, PropertyKind::Enum(caps.modes.clone())),
    ];

    if let Some(fm) = caps.fm_range {
        table.push(PropertyDef::new(
            names::FREQUENCY,
            nodes::FREQUENCY,
            PropertyKind::Float(StepRange::khz(fm.lower, fm.upper, fm.step)),
        ));
    }

    table.extend([
        PropertyDef {
            name: names::INFO,
            source: ReadSource::Composite(&INFO_FIELDS),
            write_node: None,
            kind: PropertyKind::CompositeText,
        },
        PropertyDef::new(names::COVER, nodes::INFO_GRAPHIC, PropertyKind::Opaque).read_only(),
        PropertyDef::new(names::SPOTIFY_USER, nodes::SPOTIFY_USER, PropertyKind::Opaque)
            .read_only(),
    ]);

    table
}

/// Post-update hooks keyed by the property that triggers them
pub fn standard_hooks(modes: Arc<ModeList>) -> Vec<(&'static str, Hook)> {
    let muted_from_volume: Hook = Arc::new(|ctx: &UpdateContext<'_>| {
        match ctx.value.as_i64() {
            Some(volume) => vec![Derived::Apply {
                name: names::MUTED,
                value: PropertyValue::Bool(volume == 0),
            }],
            None => Vec::new(),
        }
    });

    let playing_side_effects: Hook = Arc::new(move |ctx: &UpdateContext<'_>| {
        if !ctx.origin.is_remote() {
            return Vec::new();
        }

        let mut derived = Vec::new();
        if ctx.raw.map(str::trim) == Some("2") {
            derived.push(Derived::Apply {
                name: names::POWER,
                value: PropertyValue::Bool(true),
            });
        }

        let on_spotify = ctx
            .current(names::MODE)
            .and_then(|mode| mode.as_str().and_then(|label| modes.by_label(label)))
            .is_some_and(|entry| entry.id == "Spotify");
        if on_spotify {
            derived.push(Derived::Refetch(names::SPOTIFY_USER));
        }

        derived
    });

    vec![
        (names::VOLUME, muted_from_volume),
        (names::PLAYING, playing_side_effects),
    ]
}

/// Fire-and-forget transport commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Next,
    Previous,
    Play,
    Pause,
    Stop,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::Next,
        Action::Previous,
        Action::Play,
        Action::Pause,
        Action::Stop,
    ];

    /// Value written to `netremote.play.control`
    pub fn control_value(self) -> &'static str {
        match self {
            Action::Stop => nodes::control::STOP,
            Action::Play => nodes::control::PLAY,
            Action::Pause => nodes::control::PAUSE,
            Action::Next => nodes::control::NEXT,
            Action::Previous => nodes::control::PREVIOUS,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Action::Next => "next",
            Action::Previous => "previous",
            Action::Play => "play",
            Action::Pause => "pause",
            Action::Stop => "stop",
        }
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|action| action.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| s.to_string())
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{FmRange, ModeEntry};

    fn caps(fm: bool) -> Capabilities {
        Capabilities {
            radio_id: "42".to_string(),
            friendly_name: Some("Kitchen".to_string()),
            volume_steps: 21,
            fm_range: fm.then_some(FmRange {
                lower: 87500,
                upper: 108000,
                step: 50,
            }),
            modes: Arc::new(ModeList::new(vec![ModeEntry::new(0, "IR", "Internet radio", true)])),
        }
    }

    #[test]
    fn test_table_without_fm() {
        let table = property_table(&caps(false), 100);
        assert!(table.iter().all(|def| def.name != names::FREQUENCY));
        assert_eq!(table.len(), 10);
    }

    #[test]
    fn test_volume_bounds_follow_limit() {
        let table = property_table(&caps(true), 50);
        let volume = table.iter().find(|d| d.name == names::VOLUME).unwrap();
        assert!(matches!(volume.kind, PropertyKind::Integer { min: 0, max: 10 }));
        assert!(table.iter().any(|def| def.name == names::FREQUENCY));
    }

    #[test]
    fn test_lookup_by_name_or_node() {
        let table = property_table(&caps(false), 100);
        let find = |key: &str| table.iter().find(|d| d.matches(key)).map(|d| d.name);

        assert_eq!(find("netRemote.sys.audio.volume"), Some(names::VOLUME));
        assert_eq!(find("PLAYING"), Some(names::PLAYING));
        assert_eq!(find("netremote.play.control"), Some(names::PLAYING));
        assert_eq!(find("netremote.play.info.artist"), Some(names::INFO));
        assert_eq!(find("netremote.sys.clock"), None);
    }

    #[test]
    fn test_read_only_properties() {
        let table = property_table(&caps(false), 100);
        for name in [names::INFO, names::COVER, names::SPOTIFY_USER] {
            let def = table.iter().find(|d| d.name == name).unwrap();
            assert!(!def.is_writable(), "{} should be read-only", name);
        }
    }

    #[test]
    fn test_actions() {
        assert_eq!("Next".parse::<Action>().unwrap(), Action::Next);
        assert_eq!(Action::Previous.control_value(), "4");
        assert_eq!(Action::Stop.control_value(), "0");
        assert!("rewind".parse::<Action>().is_err());
    }
}
