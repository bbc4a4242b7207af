//! Wire framing: `<prefix><JSON envelope>` text frames.
//!
//! Two logical channels share one socket. Data frames start with `m:`, control
//! frames with `c:`, and both carry a `{"type": .., "payload": ..}` envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// Prefix of data-channel frames.
pub const DATA_PREFIX: &str = "m:";
/// Prefix of control-channel frames.
pub const CONTROL_PREFIX: &str = "c:";

/// Logical channel a frame travels on.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Application data feeds
    Data,
    /// Protocol traffic (`ping`, `client-token`, `unsubscribe`, ...)
    Control,
}

impl Channel {
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Data => DATA_PREFIX,
            Self::Control => CONTROL_PREFIX,
        }
    }

    /// Split a raw frame into its channel and body.
    fn split(text: &str) -> Option<(Self, &str)> {
        if let Some(body) = text.strip_prefix(DATA_PREFIX) {
            Some((Self::Data, body))
        } else {
            text.strip_prefix(CONTROL_PREFIX)
                .map(|body| (Self::Control, body))
        }
    }
}

/// A typed message carried inside a frame.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type used for routing (e.g. `ping`, `client-token`)
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Arbitrary JSON payload
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    #[must_use]
    pub fn new<S: Into<String>>(msg_type: S, payload: Value) -> Self {
        Self {
            msg_type: msg_type.into(),
            payload,
        }
    }

    /// Whether this envelope has the given type.
    #[must_use]
    pub fn is(&self, msg_type: &str) -> bool {
        self.msg_type == msg_type
    }
}

#[derive(Serialize)]
struct OutboundEnvelope<'envelope, P: Serialize + ?Sized> {
    #[serde(rename = "type")]
    msg_type: &'envelope str,
    payload: &'envelope P,
}

/// Serialize a message into a prefixed frame.
pub fn encode<P: Serialize + ?Sized>(
    channel: Channel,
    msg_type: &str,
    payload: &P,
) -> Result<String> {
    let envelope = serde_json::to_string(&OutboundEnvelope { msg_type, payload })?;
    Ok(format!("{}{envelope}", channel.prefix()))
}

/// Parse a raw frame.
///
/// Returns `None` for anything that is not a well-formed frame: an unknown
/// prefix, a body that is not JSON, a JSON body that is not an object, or an
/// object without a string `type`.
#[must_use]
pub fn decode(text: &str) -> Option<(Channel, Envelope)> {
    let (channel, body) = Channel::split(text)?;
    let value: Value = serde_json::from_str(body.trim()).ok()?;
    if !value.is_object() {
        return None;
    }
    let envelope = serde_json::from_value(value).ok()?;
    Some((channel, envelope))
}
