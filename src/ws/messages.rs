//! Nostr wire messages: the JSON-array frames exchanged with clients and
//! relays.
//!
//! Every frame is an array whose first element is a tag string. Decoding is
//! fallible and validates only the fields routing needs; filters and event
//! bodies stay opaque JSON and are forwarded verbatim.

use serde_json::{Map, Value};

use crate::error::{BouncerError, BouncerResult};

/// A decoded protocol frame.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    /// `["REQ", id, filter...]`
    Req {
        /// Client-chosen subscription id.
        subscription_id: String,
        /// Filter objects, opaque to the bouncer.
        filters: Vec<Value>,
    },
    /// `["CLOSE", id]`
    Close {
        /// Subscription being closed.
        subscription_id: String,
    },
    /// `["EVENT", event]` from a client or `["EVENT", id, event]` from a relay.
    Event {
        /// Present on relay deliveries, absent on client publishes.
        subscription_id: Option<String>,
        /// The event object.
        event: Map<String, Value>,
    },
    /// `["EOSE", id]`
    Eose {
        /// Subscription whose stored events are exhausted.
        subscription_id: String,
    },
    /// `["OK", event_id, accepted, message]`
    Ok {
        /// Id of the acknowledged event.
        event_id: String,
        /// Whether the event was accepted.
        accepted: bool,
        /// Human-readable detail, usually empty.
        message: String,
    },
    /// `["NOTICE", message]`
    Notice {
        /// Human-readable message.
        message: String,
    },
    /// `["CLOSED", id, reason]`
    Closed {
        /// Subscription that was closed.
        subscription_id: String,
        /// Reason, empty for a client-requested close.
        reason: String,
    },
}

impl WireMessage {
    /// Parses a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`BouncerError::MalformedMessage`] if the text is not JSON or
    /// does not have the shape of a known message.
    pub fn decode(text: &str) -> BouncerResult<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| BouncerError::MalformedMessage(format!("invalid JSON: {e}")))?;
        Self::from_value(value)
    }

    /// Converts an already-parsed JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`BouncerError::MalformedMessage`] for non-arrays, empty
    /// arrays, unknown tags and missing or mistyped routing fields.
    pub fn from_value(value: Value) -> BouncerResult<Self> {
        let Value::Array(items) = value else {
            return Err(malformed("expected a JSON array"));
        };
        let mut items = items.into_iter();
        let tag = match items.next() {
            Some(Value::String(tag)) => tag,
            Some(_) => return Err(malformed("tag must be a string")),
            None => return Err(malformed("empty array")),
        };

        match tag.as_str() {
            "REQ" => Ok(Self::Req {
                subscription_id: take_string(&mut items, "subscription id")?,
                filters: items.collect(),
            }),
            "CLOSE" => Ok(Self::Close {
                subscription_id: take_string(&mut items, "subscription id")?,
            }),
            "EVENT" => match (items.next(), items.next()) {
                (Some(Value::Object(event)), None) => Ok(Self::Event {
                    subscription_id: None,
                    event,
                }),
                (Some(Value::String(id)), Some(Value::Object(event))) => Ok(Self::Event {
                    subscription_id: Some(id),
                    event,
                }),
                _ => Err(malformed("EVENT requires an event object")),
            },
            "EOSE" => Ok(Self::Eose {
                subscription_id: take_string(&mut items, "subscription id")?,
            }),
            "OK" => {
                let event_id = take_string(&mut items, "event id")?;
                let accepted = match items.next() {
                    Some(Value::Bool(b)) => b,
                    _ => return Err(malformed("OK requires a boolean")),
                };
                Ok(Self::Ok {
                    event_id,
                    accepted,
                    message: take_optional_string(&mut items),
                })
            }
            "NOTICE" => Ok(Self::Notice {
                message: take_string(&mut items, "message")?,
            }),
            "CLOSED" => Ok(Self::Closed {
                subscription_id: take_string(&mut items, "subscription id")?,
                reason: take_optional_string(&mut items),
            }),
            other => Err(BouncerError::MalformedMessage(format!(
                "unsupported tag {other}"
            ))),
        }
    }

    /// Returns the frame's tag string.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Req { .. } => "REQ",
            Self::Close { .. } => "CLOSE",
            Self::Event { .. } => "EVENT",
            Self::Eose { .. } => "EOSE",
            Self::Ok { .. } => "OK",
            Self::Notice { .. } => "NOTICE",
            Self::Closed { .. } => "CLOSED",
        }
    }

    /// Returns the `id` field of an EVENT's event object, if it is a string.
    #[must_use]
    pub fn event_id(&self) -> Option<&str> {
        match self {
            Self::Event { event, .. } => event.get("id").and_then(Value::as_str),
            _ => None,
        }
    }

    /// Converts the message into its JSON array form.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut out = vec![Value::from(self.tag())];
        match self {
            Self::Req {
                subscription_id,
                filters,
            } => {
                out.push(Value::from(subscription_id.as_str()));
                out.extend(filters.iter().cloned());
            }
            Self::Close { subscription_id } | Self::Eose { subscription_id } => {
                out.push(Value::from(subscription_id.as_str()));
            }
            Self::Event {
                subscription_id,
                event,
            } => {
                if let Some(id) = subscription_id {
                    out.push(Value::from(id.as_str()));
                }
                out.push(Value::Object(event.clone()));
            }
            Self::Ok {
                event_id,
                accepted,
                message,
            } => {
                out.push(Value::from(event_id.as_str()));
                out.push(Value::Bool(*accepted));
                out.push(Value::from(message.as_str()));
            }
            Self::Notice { message } => out.push(Value::from(message.as_str())),
            Self::Closed {
                subscription_id,
                reason,
            } => {
                out.push(Value::from(subscription_id.as_str()));
                out.push(Value::from(reason.as_str()));
            }
        }
        Value::Array(out)
    }

    /// Serializes the message as a JSON text frame.
    #[must_use]
    pub fn to_json(&self) -> String {
        self.to_value().to_string()
    }
}

fn malformed(reason: &str) -> BouncerError {
    BouncerError::MalformedMessage(reason.to_string())
}

fn take_string(items: &mut impl Iterator<Item = Value>, field: &str) -> BouncerResult<String> {
    match items.next() {
        Some(Value::String(s)) => Ok(s),
        _ => Err(BouncerError::MalformedMessage(format!(
            "missing or non-string {field}"
        ))),
    }
}

fn take_optional_string(items: &mut impl Iterator<Item = Value>) -> String {
    match items.next() {
        Some(Value::String(s)) => s,
        _ => String::new(),
    }
}
