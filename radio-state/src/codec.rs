//! Conversion between wire strings and typed property values
//!
//! One codec for every property: the [`PropertyKind`] tag carries the
//! kind-specific parameters (bounds, step, backing mode list) and `decode` /
//! `encode` dispatch on it. Out-of-range writes are clamped or rounded, never
//! rejected; the value actually written is returned alongside the wire text.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::capabilities::ModeList;

/// A typed local property value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl PropertyValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(f) => Some(*f),
            PropertyValue::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            PropertyValue::Bool(_) => "boolean",
            PropertyValue::Int(_) => "integer",
            PropertyValue::Float(_) => "number",
            PropertyValue::Text(_) => "string",
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(b) => write!(f, "{}", b),
            PropertyValue::Int(n) => write!(f, "{}", n),
            PropertyValue::Float(v) => write!(f, "{}", v),
            PropertyValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        PropertyValue::Bool(b)
    }
}

impl From<i64> for PropertyValue {
    fn from(n: i64) -> Self {
        PropertyValue::Int(n)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::Text(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::Text(s)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    #[error("cannot decode {0:?}")]
    Decode(String),

    #[error("expected {expected}, got {got}")]
    TypeMismatch {
        expected: &'static str,
        got: &'static str,
    },

    #[error("no mode labelled {0:?}")]
    UnknownLabel(String),

    #[error("value cannot be written")]
    NotWritable,
}

/// How a boolean maps onto its wire nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolMapping {
    /// "1" is true, anything else false
    Plain,
    /// Read from the play status (1 buffering, 2 playing, 3 paused), written
    /// as a play control value (1 play, 2 pause)
    PlayStatus,
}

/// Fixed-point float: wire integer = value * scale, constrained to a stepped range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepRange {
    pub scale: i64,
    pub step: i64,
    pub min: i64,
    pub max: i64,
}

impl StepRange {
    /// Frequency in MHz over a kHz wire range
    pub fn khz(lower: i64, upper: i64, step: i64) -> Self {
        Self {
            scale: 1000,
            step: step.max(1),
            min: lower.min(upper),
            max: lower.max(upper),
        }
    }

    /// Nearest step multiple to `value`, kept inside `min..=max`
    pub fn to_wire(&self, value: f64) -> i64 {
        let step = self.step.max(1);
        let steps = (value * self.scale as f64 / step as f64).round();
        let wire = (steps as i64).saturating_mul(step);

        if wire > self.max {
            self.max.div_euclid(step) * step
        } else if wire < self.min {
            -((-self.min).div_euclid(step)) * step
        } else {
            wire
        }
    }

    pub fn to_value(&self, wire: i64) -> f64 {
        wire as f64 / self.scale as f64
    }
}

#[derive(Debug, Clone)]
pub enum PropertyKind {
    Boolean(BoolMapping),
    Integer { min: i64, max: i64 },
    Float(StepRange),
    Enum(Arc<ModeList>),
    CompositeText,
    Opaque,
}

/// Result of encoding a local write
#[derive(Debug, Clone, PartialEq)]
pub struct Encoded {
    pub wire: String,
    /// The value after clamping or rounding; this is what gets cached
    pub applied: PropertyValue,
}

impl PropertyKind {
    /// Interpret a wire string; booleans never fail
    pub fn decode(&self, raw: &str) -> Result<PropertyValue, CodecError> {
        let raw = raw.trim();
        match self {
            PropertyKind::Boolean(BoolMapping::Plain) => Ok(PropertyValue::Bool(raw == "1")),
            PropertyKind::Boolean(BoolMapping::PlayStatus) => {
                Ok(PropertyValue::Bool(!(raw == "1" || raw == "3")))
            }
            PropertyKind::Integer { .. } => raw
                .parse()
                .map(PropertyValue::Int)
                .map_err(|_| CodecError::Decode(raw.to_string())),
            PropertyKind::Float(range) => raw
                .parse::<i64>()
                .map(|wire| PropertyValue::Float(range.to_value(wire)))
                .map_err(|_| CodecError::Decode(raw.to_string())),
            PropertyKind::Enum(modes) => raw
                .parse::<i64>()
                .map(|index| PropertyValue::Text(modes.label_for(index)))
                .map_err(|_| CodecError::Decode(raw.to_string())),
            PropertyKind::CompositeText | PropertyKind::Opaque => {
                Ok(PropertyValue::Text(raw.to_string()))
            }
        }
    }

    /// Produce the wire string for a local write
    pub fn encode(&self, value: &PropertyValue) -> Result<Encoded, CodecError> {
        match (self, value) {
            (PropertyKind::Boolean(mapping), PropertyValue::Bool(b)) => {
                let wire = match (mapping, b) {
                    (BoolMapping::Plain, true) => "1",
                    (BoolMapping::Plain, false) => "0",
                    (BoolMapping::PlayStatus, true) => fsapi::nodes::control::PLAY,
                    (BoolMapping::PlayStatus, false) => fsapi::nodes::control::PAUSE,
                };
                Ok(Encoded {
                    wire: wire.to_string(),
                    applied: PropertyValue::Bool(*b),
                })
            }
            (PropertyKind::Integer { min, max }, PropertyValue::Int(_) | PropertyValue::Float(_)) => {
                let requested = match value {
                    PropertyValue::Int(n) => *n,
                    _ => value.as_f64().unwrap_or_default().round() as i64,
                };
                let clamped = requested.clamp((*min).min(*max), (*max).max(*min));
                Ok(Encoded {
                    wire: clamped.to_string(),
                    applied: PropertyValue::Int(clamped),
                })
            }
            (PropertyKind::Float(range), PropertyValue::Float(_) | PropertyValue::Int(_)) => {
                let wire = range.to_wire(value.as_f64().unwrap_or_default());
                Ok(Encoded {
                    wire: wire.to_string(),
                    applied: PropertyValue::Float(range.to_value(wire)),
                })
            }
            (PropertyKind::Enum(modes), PropertyValue::Text(label)) => {
                let index = modes
                    .index_for(label)
                    .ok_or_else(|| CodecError::UnknownLabel(label.clone()))?;
                Ok(Encoded {
                    wire: index.to_string(),
                    applied: PropertyValue::Text(modes.label_for(index)),
                })
            }
            (PropertyKind::Enum(modes), PropertyValue::Int(index)) => Ok(Encoded {
                wire: index.to_string(),
                applied: PropertyValue::Text(modes.label_for(*index)),
            }),
            (PropertyKind::Opaque, PropertyValue::Text(s)) => Ok(Encoded {
                wire: s.clone(),
                applied: value.clone(),
            }),
            (PropertyKind::CompositeText, _) => Err(CodecError::NotWritable),
            (kind, value) => Err(CodecError::TypeMismatch {
                expected: kind.type_name(),
                got: value.type_name(),
            }),
        }
    }

    /// Parse user input (e.g. a CLI argument) into a value of this kind
    pub fn parse_input(&self, input: &str) -> Result<PropertyValue, CodecError> {
        let input = input.trim();
        match self {
            PropertyKind::Boolean(_) => match input.to_ascii_lowercase().as_str() {
                "true" | "on" | "1" | "yes" => Ok(PropertyValue::Bool(true)),
                "false" | "off" | "0" | "no" => Ok(PropertyValue::Bool(false)),
                _ => Err(CodecError::Decode(input.to_string())),
            },
            PropertyKind::Integer { .. } => input
                .parse()
                .map(PropertyValue::Int)
                .map_err(|_| CodecError::Decode(input.to_string())),
            PropertyKind::Float(_) => input
                .parse()
                .map(PropertyValue::Float)
                .map_err(|_| CodecError::Decode(input.to_string())),
            PropertyKind::Enum(_) | PropertyKind::CompositeText | PropertyKind::Opaque => {
                Ok(PropertyValue::Text(input.to_string()))
            }
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            PropertyKind::Boolean(_) => "boolean",
            PropertyKind::Integer { .. } => "integer",
            PropertyKind::Float(_) => "number",
            PropertyKind::Enum(_) | PropertyKind::CompositeText | PropertyKind::Opaque => {
                "string"
            }
        }
    }
}

/// Render the now-playing fields as one display string
///
/// Fields are trimmed and empty ones skipped.
pub fn compose_info(name: &str, text: &str, artist: &str, album: &str) -> String {
    let mut out = String::new();
    for (prefix, field) in [("", name), ("", text), ("Artist: ", artist), ("Album: ", album)] {
        let field = field.trim();
        if !field.is_empty() {
            out.push_str(prefix);
            out.push_str(field);
            out.push('\n');
        }
    }
    out
}
