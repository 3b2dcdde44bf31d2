//! JSON wire protocol.
//!
//! Every frame is one JSON object tagged by `type`. Server-to-client frames
//! are [`Envelope`]s (DOM patches plus the `get` request); client-to-server
//! frames are [`Inbound`] (`data` events and `get` replies).
//!
//! Field names are part of the browser contract and are kept verbatim,
//! including `propertie` and `id_ret`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ProtocolError;
use crate::ids::{ComponentId, RequestId};

/// Which DOM facet a `get` request reads back.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GetKind {
    /// `element.value`
    Value,
    /// `element.innerHTML`
    Html,
    /// `element.innerText`
    Text,
    /// One computed style property; the sub-target names it.
    Style,
    /// An arbitrary element property; the sub-target names it.
    #[serde(rename = "propertie")]
    Property,
}

impl GetKind {
    /// Wire name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Value => "value",
            Self::Html => "html",
            Self::Text => "text",
            Self::Style => "style",
            Self::Property => "propertie",
        }
    }
}

/// Server-to-client frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Envelope {
    /// Replace the content of `id` with an HTML fragment.
    Fill {
        /// Target element.
        id: String,
        /// HTML fragment.
        value: String,
    },
    /// Replace the text of `id`.
    Text {
        /// Target element.
        id: String,
        /// Plain text.
        value: String,
    },
    /// Replace the inline CSS text of `id`.
    Style {
        /// Target element.
        id: String,
        /// CSS text.
        value: String,
    },
    /// Set the value of a form element.
    Set {
        /// Target element.
        id: String,
        /// New `value`.
        value: String,
    },
    /// Set an arbitrary element property.
    #[serde(rename = "propertie")]
    Property {
        /// Target element.
        id: String,
        /// Property name.
        propertie: String,
        /// Property value.
        value: Value,
    },
    /// Execute a script in the page.
    Script {
        /// Script source.
        value: String,
    },
    /// Remove the element.
    Remove {
        /// Target element.
        id: String,
    },
    /// Append an HTML fragment as a child of `id`.
    AddNode {
        /// Parent element.
        id: String,
        /// HTML fragment.
        value: String,
    },
    /// Ask the client to read something back and reply with `id_ret`.
    Get {
        /// Element to read.
        id: String,
        /// Style or property name for `style`/`propertie` reads, else empty.
        value: String,
        /// Correlation id echoed in the reply.
        id_ret: RequestId,
        /// What to read.
        sub_type: GetKind,
    },
}

impl Envelope {
    /// Wire `type` tag, used for metric labels and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Fill { .. } => "fill",
            Self::Text { .. } => "text",
            Self::Style { .. } => "style",
            Self::Set { .. } => "set",
            Self::Property { .. } => "propertie",
            Self::Script { .. } => "script",
            Self::Remove { .. } => "remove",
            Self::AddNode { .. } => "addNode",
            Self::Get { .. } => "get",
        }
    }

    /// DOM id the envelope targets, if any.
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Fill { id, .. }
            | Self::Text { id, .. }
            | Self::Style { id, .. }
            | Self::Set { id, .. }
            | Self::Property { id, .. }
            | Self::Remove { id }
            | Self::AddNode { id, .. }
            | Self::Get { id, .. } => Some(id),
            Self::Script { .. } => None,
        }
    }

    /// Serialize to a single JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}

/// Client-to-server frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Inbound {
    /// A browser interaction routed to a component's event handler.
    Data {
        /// Component that owns the handler.
        id: ComponentId,
        /// Handler name.
        event: String,
        /// Event payload, `null` when absent.
        #[serde(default)]
        data: Value,
    },
    /// Reply to an earlier [`Envelope::Get`].
    Get {
        /// Id from the matching request.
        id_ret: RequestId,
        /// Value read by the client.
        #[serde(default)]
        data: Value,
    },
}

impl Inbound {
    /// Decode one text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }

    /// Wire `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Data { .. } => "data",
            Self::Get { .. } => "get",
        }
    }
}

/// Flatten a reply payload into the string the `get_*` helpers return.
///
/// Strings are returned as-is, `null` becomes empty, anything else is the
/// compact JSON text.
pub fn payload_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
