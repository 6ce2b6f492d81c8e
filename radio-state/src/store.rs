//! Local property cache with remote and local update paths
//!
//! Two entry points mutate the cache:
//!
//! - [`PropertyStore::apply_remote_update`] for values read from the device
//!   (refresh or notification). These never lead to a write.
//! - [`PropertyStore::apply_local_write`] for caller-initiated sets. It caches
//!   the encoded value optimistically and returns the wire write to perform.
//!
//! Both run the post-update hooks of the changed property inside the same
//! call, apply derived values, and only then publish events.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::codec::{CodecError, PropertyKind, PropertyValue};
use crate::error::{Result, StateError};
use crate::property::PropertyDef;

const EVENT_CAPACITY: usize = 256;

/// Bound on chained derivations within one update
const MAX_DERIVATION_DEPTH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Origin {
    /// Read from the device
    Remote,
    /// Written by a caller
    Local,
}

impl Origin {
    pub fn is_remote(self) -> bool {
        self == Origin::Remote
    }
}

/// Something a device consumer may want to react to
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DeviceEvent {
    ConnectivityChanged {
        connected: bool,
    },
    PropertyUpdated {
        name: String,
        value: PropertyValue,
        origin: Origin,
    },
    /// The offered mode labels changed
    ModeOptionsChanged {
        options: Vec<String>,
    },
}

/// What a hook sees about the update that triggered it
pub struct UpdateContext<'a> {
    pub name: &'a str,
    pub value: &'a PropertyValue,
    /// Wire text when the update came straight from the device
    pub raw: Option<&'a str>,
    pub origin: Origin,
    values: &'a HashMap<&'static str, Entry>,
}

impl UpdateContext<'_> {
    /// Cached value of another property
    pub fn current(&self, name: &str) -> Option<&PropertyValue> {
        self.values.get(name).and_then(|entry| entry.value.as_ref())
    }
}

/// Outcome of a hook
#[derive(Debug, Clone, PartialEq)]
pub enum Derived {
    /// Set another property without writing it to the device
    Apply {
        name: &'static str,
        value: PropertyValue,
    },
    /// Re-read another property from the device after this dispatch
    Refetch(&'static str),
}

pub type Hook = Arc<dyn Fn(&UpdateContext<'_>) -> Vec<Derived> + Send + Sync>;

struct Entry {
    def: PropertyDef,
    value: Option<PropertyValue>,
    /// Mode labels shown in addition to the selectable ones until the next update
    extra_options: Vec<String>,
}

/// A write to send to the device
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    pub node: &'static str,
    pub wire: String,
    pub applied: PropertyValue,
}

/// Result of applying an update
#[derive(Debug, Default)]
pub struct Applied {
    pub refetch: Vec<&'static str>,
}

pub struct PropertyStore {
    order: Vec<&'static str>,
    entries: RwLock<HashMap<&'static str, Entry>>,
    hooks: HashMap<&'static str, Vec<Hook>>,
    events: broadcast::Sender<DeviceEvent>,
}

impl PropertyStore {
    pub fn new(table: Vec<PropertyDef>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let order = table.iter().map(|def| def.name).collect();
        let entries = table
            .into_iter()
            .map(|def| {
                (
                    def.name,
                    Entry {
                        def,
                        value: None,
                        extra_options: Vec::new(),
                    },
                )
            })
            .collect();

        Self {
            order,
            entries: RwLock::new(entries),
            hooks: HashMap::new(),
            events,
        }
    }

    pub fn add_hook(&mut self, name: &'static str, hook: Hook) {
        self.hooks.entry(name).or_default().push(hook);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    pub fn emit(&self, event: DeviceEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Property names in table order
    pub fn names(&self) -> &[&'static str] {
        &self.order
    }

    /// Resolve a name or node key, ignoring case
    pub fn resolve(&self, key: &str) -> Option<&'static str> {
        let entries = self.entries.read();
        self.order
            .iter()
            .copied()
            .find(|name| entries.get(name).is_some_and(|e| e.def.matches(key)))
    }

    /// The property read from exactly `node`
    pub fn by_read_node(&self, node: &str) -> Option<&'static str> {
        let entries = self.entries.read();
        self.order.iter().copied().find(|name| {
            entries
                .get(name)
                .and_then(|e| e.def.read_node())
                .is_some_and(|read| read.eq_ignore_ascii_case(node))
        })
    }

    pub fn definition(&self, name: &str) -> Option<PropertyDef> {
        self.entries.read().get(name).map(|e| e.def.clone())
    }

    pub fn get(&self, name: &str) -> Option<PropertyValue> {
        self.entries.read().get(name).and_then(|e| e.value.clone())
    }

    /// Cached values of every property that has one, in table order
    pub fn snapshot(&self) -> Vec<(&'static str, PropertyValue)> {
        let entries = self.entries.read();
        self.order
            .iter()
            .filter_map(|name| Some((*name, entries.get(name)?.value.clone()?)))
            .collect()
    }

    /// Enumeration currently offered for an enum property
    pub fn options(&self, name: &str) -> Option<Vec<String>> {
        let entries = self.entries.read();
        let entry = entries.get(name)?;
        match &entry.def.kind {
            PropertyKind::Enum(modes) => {
                let mut options = modes.selectable_labels();
                options.extend(entry.extra_options.iter().cloned());
                Some(options)
            }
            _ => None,
        }
    }

    /// Decode and cache a wire value read from the device
    pub fn apply_remote_update(&self, name: &str, raw: &str) -> Result<Applied> {
        let kind = self
            .definition(name)
            .map(|def| def.kind)
            .ok_or_else(|| StateError::UnknownProperty(name.to_string()))?;

        let value = kind.decode(raw).map_err(|_| StateError::Decode {
            property: name.to_string(),
            raw: raw.to_string(),
        })?;

        Ok(self.apply(name, value, Some(raw), Origin::Remote))
    }

    /// Cache an already-typed value that came from the device
    pub fn apply_remote_value(&self, name: &str, value: PropertyValue) -> Result<Applied> {
        if self.definition(name).is_none() {
            return Err(StateError::UnknownProperty(name.to_string()));
        }
        Ok(self.apply(name, value, None, Origin::Remote))
    }

    /// Encode a caller's value, cache it optimistically and return the write
    pub fn apply_local_write(&self, name: &str, value: &PropertyValue) -> Result<PendingWrite> {
        let def = self
            .definition(name)
            .ok_or_else(|| StateError::UnknownProperty(name.to_string()))?;
        let node = def
            .write_node
            .ok_or_else(|| StateError::ReadOnly(name.to_string()))?;

        let encoded = def.kind.encode(value).map_err(|e| match e {
            CodecError::NotWritable => StateError::ReadOnly(name.to_string()),
            other => StateError::InvalidValue {
                property: name.to_string(),
                reason: other.to_string(),
            },
        })?;

        if &encoded.applied != value {
            debug!(property = name, requested = %value, applied = %encoded.applied, "value adjusted to device bounds");
        }

        let applied = self.apply(name, encoded.applied.clone(), None, Origin::Local);
        if !applied.refetch.is_empty() {
            trace!(property = name, refetch = ?applied.refetch, "local write requested refetch");
        }

        Ok(PendingWrite {
            node,
            wire: encoded.wire,
            applied: encoded.applied,
        })
    }

    fn apply(
        &self,
        name: &str,
        value: PropertyValue,
        raw: Option<&str>,
        origin: Origin,
    ) -> Applied {
        let mut events = Vec::new();
        let mut refetch = Vec::new();

        {
            let mut entries = self.entries.write();
            let mut queue = vec![(name.to_string(), value, raw.map(str::to_string), 0usize)];

            while let Some((name, value, raw, depth)) = queue.pop() {
                let Some(entry) = entries.get_mut(name.as_str()) else {
                    warn!(property = %name, "derived update for unregistered property");
                    continue;
                };
                let key = entry.def.name;

                if let Some(options) = update_extra_options(entry, &value) {
                    events.push(DeviceEvent::ModeOptionsChanged { options });
                }
                entry.value = Some(value.clone());
                events.push(DeviceEvent::PropertyUpdated {
                    name: key.to_string(),
                    value: value.clone(),
                    origin,
                });

                let Some(hooks) = self.hooks.get(key) else {
                    continue;
                };

                let ctx = UpdateContext {
                    name: key,
                    value: &value,
                    raw: raw.as_deref(),
                    origin,
                    values: &entries,
                };
                let derived: Vec<Derived> = hooks.iter().flat_map(|hook| hook(&ctx)).collect();

                for item in derived {
                    match item {
                        Derived::Apply { name, value } if depth < MAX_DERIVATION_DEPTH => {
                            queue.push((name.to_string(), value, None, depth + 1));
                        }
                        Derived::Apply { name, .. } => {
                            warn!(property = name, "derivation chain too deep; dropped");
                        }
                        Derived::Refetch(name) => {
                            if !refetch.contains(&name) {
                                refetch.push(name);
                            }
                        }
                    }
                }
            }
        }

        for event in events {
            self.emit(event);
        }

        Applied { refetch }
    }
}

/// Recompute transient mode labels; returns the new options when they changed
fn update_extra_options(entry: &mut Entry, value: &PropertyValue) -> Option<Vec<String>> {
    let PropertyKind::Enum(modes) = &entry.def.kind else {
        return None;
    };

    let selectable = modes.selectable_labels();
    let extra: Vec<String> = match value.as_str() {
        Some(label) if !selectable.iter().any(|s| s == label) => vec![label.to_string()],
        _ => Vec::new(),
    };

    if extra == entry.extra_options {
        return None;
    }

    entry.extra_options = extra;
    let mut options = selectable;
    options.extend(entry.extra_options.iter().cloned());
    Some(options)
}
