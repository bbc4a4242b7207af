//! Merge strategies folding pushed messages into a live value.

use serde_json::Value;

use crate::Result;
use crate::error::Error;

/// How an incoming message is folded into the current value of a live
/// request.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeStrategy {
    /// The incoming message becomes the new value
    Replace,
    /// The incoming message is pushed to the back of the current array
    Append,
    /// The incoming message is pushed to the front of the current array
    Prepend,
    /// The first element whose `key` field equals the incoming message's is
    /// replaced in place; without one, the message is appended
    Upsert { key: String },
}

impl MergeStrategy {
    /// Resolve a strategy declared by the server.
    ///
    /// No name means [`MergeStrategy::Replace`]. Unknown names, and `upsert`
    /// without a key, are validation errors.
    pub fn resolve(name: Option<&str>, upsert_key: Option<&str>) -> Result<Self> {
        match name {
            None | Some("replace") => Ok(Self::Replace),
            Some("append") => Ok(Self::Append),
            Some("prepend") => Ok(Self::Prepend),
            Some("upsert") => upsert_key
                .map(|key| Self::Upsert {
                    key: key.to_owned(),
                })
                .ok_or_else(|| Error::validation("merge strategy `upsert` requires an upsertKey")),
            Some(other) => Err(Error::validation(format!(
                "unsupported merge strategy `{other}`"
            ))),
        }
    }

    /// Fold `incoming` into `current`.
    ///
    /// `None` means the value does not change: the array strategies only
    /// apply to an array.
    #[must_use]
    pub fn merge(&self, current: &Value, incoming: Value) -> Option<Value> {
        match self {
            Self::Replace => Some(incoming),
            Self::Append => {
                let mut next = current.as_array()?.clone();
                next.push(incoming);
                Some(Value::Array(next))
            }
            Self::Prepend => {
                let mut next = current.as_array()?.clone();
                next.insert(0, incoming);
                Some(Value::Array(next))
            }
            Self::Upsert { key } => {
                let mut next = current.as_array()?.clone();
                let position = {
                    let id = incoming.get(key.as_str());
                    next.iter().position(|item| item.get(key.as_str()) == id)
                };
                match position {
                    Some(index) => next[index] = incoming,
                    None => next.push(incoming),
                }
                Some(Value::Array(next))
            }
        }
    }
}
