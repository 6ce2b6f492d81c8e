//! Parsing of `fsapiResponse` documents
//!
//! Every FSAPI endpoint answers with the same envelope:
//!
//! ```xml
//! <fsapiResponse>
//!   <status>FS_OK</status>
//!   <value><u8>1</u8></value>
//! </fsapiResponse>
//! ```
//!
//! List pages carry `<item key="..">` children holding `<field name="..">`
//! elements, and notification batches carry `<notify node="..">` children.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use xmltree::{Element, XMLNode};

use crate::error::{ApiError, Result};

/// Status token reported by the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Status {
    Ok,
    ListEnd,
    Timeout,
    Fail,
    NodeDoesNotExist,
    NodeBlocked,
    Other(String),
}

impl Status {
    pub fn from_token(token: &str) -> Self {
        match token.trim() {
            "FS_OK" => Status::Ok,
            "FS_LIST_END" => Status::ListEnd,
            "FS_TIMEOUT" => Status::Timeout,
            "FS_FAIL" => Status::Fail,
            "FS_NODE_DOES_NOT_EXIST" => Status::NodeDoesNotExist,
            "FS_NODE_BLOCKED" => Status::NodeBlocked,
            other => Status::Other(other.to_string()),
        }
    }

    pub fn as_token(&self) -> &str {
        match self {
            Status::Ok => "FS_OK",
            Status::ListEnd => "FS_LIST_END",
            Status::Timeout => "FS_TIMEOUT",
            Status::Fail => "FS_FAIL",
            Status::NodeDoesNotExist => "FS_NODE_DOES_NOT_EXIST",
            Status::NodeBlocked => "FS_NODE_BLOCKED",
            Status::Other(token) => token,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

/// Wire type tag of a value element
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ValueType {
    U8,
    U16,
    U32,
    S8,
    S16,
    S32,
    C8Array,
    Other(String),
}

impl ValueType {
    fn from_tag(tag: &str) -> Self {
        match tag {
            "u8" => ValueType::U8,
            "u16" => ValueType::U16,
            "u32" => ValueType::U32,
            "s8" => ValueType::S8,
            "s16" => ValueType::S16,
            "s32" => ValueType::S32,
            "c8_array" => ValueType::C8Array,
            other => ValueType::Other(other.to_string()),
        }
    }
}

/// A typed scalar as it appears on the wire
///
/// The raw text is kept verbatim; interpretation belongs to the codec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WireValue {
    pub value_type: ValueType,
    pub raw: String,
}

impl WireValue {
    pub fn new(value_type: ValueType, raw: impl Into<String>) -> Self {
        Self {
            value_type,
            raw: raw.into(),
        }
    }

    pub fn text(raw: impl Into<String>) -> Self {
        Self::new(ValueType::C8Array, raw)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.raw.trim().parse().ok()
    }

    /// Parse the first typed child of a `<value>` or `<field>` element
    fn from_container(container: &Element) -> Option<Self> {
        let typed = first_child_element(container)?;
        Some(Self {
            value_type: ValueType::from_tag(&typed.name),
            raw: element_text(typed),
        })
    }
}

impl fmt::Display for WireValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// One entry of a list node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListItem {
    pub key: Option<i64>,
    pub fields: Vec<(String, WireValue)>,
}

impl ListItem {
    pub fn field(&self, name: &str) -> Option<&WireValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.field(name).map(WireValue::as_str)
    }

    pub fn field_i64(&self, name: &str) -> Option<i64> {
        self.field(name).and_then(WireValue::as_i64)
    }
}

/// One page of a list read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListPage {
    pub items: Vec<ListItem>,
    /// The device reported no further items after this page
    pub end: bool,
}

/// Outcome of one long-poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notifications {
    /// Changed nodes keyed by lower-cased node path
    Changes(BTreeMap<String, WireValue>),
    /// Nothing changed within the device's window
    Timeout,
}

/// A parsed `fsapiResponse` envelope
#[derive(Debug, Clone)]
pub struct FsapiResponse {
    status: Status,
    root: Element,
}

impl FsapiResponse {
    pub fn from_element(root: Element) -> Result<Self> {
        let status = root
            .get_child("status")
            .map(element_text)
            .ok_or_else(|| ApiError::Malformed(format!("<{}> has no <status>", root.name)))?;

        Ok(Self {
            status: Status::from_token(&status),
            root,
        })
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn session_id(&self) -> Option<String> {
        self.root
            .get_child("sessionId")
            .map(element_text)
            .map(|sid| sid.trim().to_string())
            .filter(|sid| !sid.is_empty())
    }

    /// The scalar inside `<value>`, if any
    pub fn value(&self) -> Option<WireValue> {
        self.root
            .get_child("value")
            .and_then(WireValue::from_container)
    }

    pub fn items(&self) -> Vec<ListItem> {
        child_elements(&self.root, "item")
            .map(|item| ListItem {
                key: item
                    .attributes
                    .get("key")
                    .and_then(|key| key.trim().parse().ok()),
                fields: child_elements(item, "field")
                    .filter_map(|field| {
                        let name = field.attributes.get("name")?.clone();
                        let value = WireValue::from_container(field)
                            .unwrap_or_else(|| WireValue::text(""));
                        Some((name, value))
                    })
                    .collect(),
            })
            .collect()
    }

    pub fn has_list_end(&self) -> bool {
        self.status == Status::ListEnd || self.root.get_child("listend").is_some()
    }

    /// Notification entries; a node reported twice keeps its last value
    pub fn notifications(&self) -> BTreeMap<String, WireValue> {
        child_elements(&self.root, "notify")
            .filter_map(|notify| {
                let node = notify.attributes.get("node")?.to_lowercase();
                let value = notify.get_child("value").and_then(WireValue::from_container)?;
                Some((node, value))
            })
            .collect()
    }
}

fn child_elements<'a>(parent: &'a Element, name: &'a str) -> impl Iterator<Item = &'a Element> {
    parent
        .children
        .iter()
        .filter_map(XMLNode::as_element)
        .filter(move |child| child.name == name)
}

fn first_child_element(parent: &Element) -> Option<&Element> {
    parent.children.iter().find_map(XMLNode::as_element)
}

fn element_text(element: &Element) -> String {
    element
        .get_text()
        .map(|text| text.into_owned())
        .unwrap_or_default()
}
