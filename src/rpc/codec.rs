//! Line codec for the command channel.
//!
//! Wire format: one UTF-8 JSON object per line, `\n`-terminated.
//! ```text
//! {"version":"v0","type":"<command>","payload":{...}}\n
//! ```
//!
//! [`parse`] turns a line (without its terminator) into a [`Message`];
//! [`serialize`] and [`write_line`] go the other way and always emit exactly
//! one trailing newline.  `serde_json` escapes control characters inside
//! strings, so a serialized line never contains an embedded newline.
//!
//! Payloads stay as a real JSON object ([`Payload`]) and are read through
//! typed accessors.  A field holding `null` reads as absent, never as zero.
//!
//! Only syntactically broken input is [`ParseError::Malformed`].  A line
//! that is valid JSON but carries a number `f64` cannot hold (`1e400`)
//! still decodes; the offending payload field then fails its accessor
//! with [`FieldError::OutOfRange`].

use core::fmt;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::error::Category;
use serde_json::value::RawValue;
use serde_json::{Map, Value};

/// The single supported protocol version.
pub const PROTOCOL_VERSION: &str = "v0";

/// Message type identifiers.
pub mod msg_type {
    pub const GET_TELEMETRY: &str = "get_telemetry";
    pub const SET_MODE: &str = "set_mode";
    pub const SET_TARGETS: &str = "set_targets";
    pub const TELEMETRY: &str = "telemetry";
    pub const ACK: &str = "ack";
}

/// Used as the ack `command` when the request never yielded a type.
pub const UNKNOWN_COMMAND: &str = "unknown";

// ═══════════════════════════════════════════════════════════════
//  Errors
// ═══════════════════════════════════════════════════════════════

/// Envelope-level decode failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Not valid JSON.  Carries the parser's description.
    Malformed(String),
    /// Valid JSON, but the top level is not an object.
    NotAnObject,
    MissingVersion,
    MissingType,
    MissingPayload,
    /// A top-level field is present with the wrong JSON type.
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(detail) => write!(f, "JSON parse error: {detail}"),
            Self::NotAnObject => write!(f, "Message must be a JSON object"),
            Self::MissingVersion => write!(f, "Missing 'version' field"),
            Self::MissingType => write!(f, "Missing 'type' field"),
            Self::MissingPayload => write!(f, "Missing 'payload' field"),
            Self::WrongType { field, expected } => {
                write!(f, "Field '{field}' must be {expected}")
            }
        }
    }
}

impl std::error::Error for ParseError {}

/// Payload-level accessor failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    Missing(&'static str),
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
    /// A number too large for a 64-bit float.
    OutOfRange(&'static str),
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing(field) => write!(f, "Missing '{field}' in payload"),
            Self::OutOfRange(field) => {
                write!(f, "{field} out of range (not representable as a 64-bit float)")
            }
            Self::WrongType { field, expected } => {
                write!(f, "Field '{field}' must be {expected}")
            }
        }
    }
}

impl std::error::Error for FieldError {}

// ═══════════════════════════════════════════════════════════════
//  Message
// ═══════════════════════════════════════════════════════════════

/// A JSON object payload with typed accessors.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Payload {
    fields: Map<String, Value>,
    /// Keys whose value held a number `f64` cannot represent.
    unrepresentable: Vec<String>,
}

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    fn from_map(fields: Map<String, Value>) -> Self {
        Self {
            fields,
            unrepresentable: Vec::new(),
        }
    }

    /// Raw value of `field`; `null` counts as absent.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field).filter(|v| !v.is_null())
    }

    fn is_unrepresentable(&self, field: &str) -> bool {
        self.unrepresentable.iter().any(|k| k == field)
    }

    /// Required string field.
    pub fn str_field(&self, field: &'static str) -> Result<&str, FieldError> {
        match self.get(field) {
            None if self.is_unrepresentable(field) => Err(FieldError::WrongType {
                field,
                expected: "a string",
            }),
            None => Err(FieldError::Missing(field)),
            Some(Value::String(s)) => Ok(s),
            Some(_) => Err(FieldError::WrongType {
                field,
                expected: "a string",
            }),
        }
    }

    /// Required numeric field.
    pub fn number_field(&self, field: &'static str) -> Result<f64, FieldError> {
        self.optional_number(field)?
            .ok_or(FieldError::Missing(field))
    }

    /// Optional numeric field: absent and `null` both give `None`.
    pub fn optional_number(&self, field: &'static str) -> Result<Option<f64>, FieldError> {
        match self.get(field) {
            None if self.is_unrepresentable(field) => Err(FieldError::OutOfRange(field)),
            None => Ok(None),
            Some(v) => v.as_f64().map(Some).ok_or(FieldError::WrongType {
                field,
                expected: "a number",
            }),
        }
    }

    pub fn insert(&mut self, field: &str, value: impl Into<Value>) {
        self.fields.insert(field.to_owned(), value.into());
    }
}

impl Serialize for Payload {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

/// A decoded envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub version: String,
    pub msg_type: String,
    pub payload: Payload,
}

impl Message {
    /// Build a current-version message.
    pub fn new(msg_type: &str, payload: Payload) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_owned(),
            msg_type: msg_type.to_owned(),
            payload,
        }
    }
}

/// Borrowed view of the envelope used for every outbound line.
#[derive(Serialize)]
struct Envelope<'a, P> {
    version: &'a str,
    #[serde(rename = "type")]
    msg_type: &'a str,
    payload: P,
}

// ═══════════════════════════════════════════════════════════════
//  Decode / encode
// ═══════════════════════════════════════════════════════════════

/// Decode one line (terminator already stripped).
pub fn parse(line: &str) -> Result<Message, ParseError> {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) if e.classify() == Category::Data => return parse_unrepresentable(line),
        Err(e) => return Err(ParseError::Malformed(e.to_string())),
    };
    let Value::Object(mut obj) = value else {
        return Err(ParseError::NotAnObject);
    };

    let version = match take(&mut obj, "version") {
        None => return Err(ParseError::MissingVersion),
        Some(Value::String(s)) => s,
        Some(_) => return Err(wrong_type("version", "a string")),
    };
    let msg_type = match take(&mut obj, "type") {
        None => return Err(ParseError::MissingType),
        Some(Value::String(s)) => s,
        Some(_) => return Err(wrong_type("type", "a string")),
    };
    let payload = match take(&mut obj, "payload") {
        None => return Err(ParseError::MissingPayload),
        Some(Value::Object(map)) => Payload::from_map(map),
        Some(_) => return Err(wrong_type("payload", "an object")),
    };

    Ok(Message {
        version,
        msg_type,
        payload,
    })
}

/// Encode a message as one newline-terminated line.
pub fn serialize(msg: &Message) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(&Envelope {
        version: &msg.version,
        msg_type: &msg.msg_type,
        payload: &msg.payload,
    })?;
    line.push('\n');
    Ok(line)
}

/// Append a current-version line carrying `payload` to `buf`.
///
/// Writes straight into the caller's buffer so a buffer reserved up front
/// can be reused on every call.
pub fn write_line<T: Serialize>(
    buf: &mut Vec<u8>,
    msg_type: &str,
    payload: &T,
) -> Result<(), serde_json::Error> {
    serde_json::to_writer(
        &mut *buf,
        &Envelope {
            version: PROTOCOL_VERSION,
            msg_type,
            payload,
        },
    )?;
    buf.push(b'\n');
    Ok(())
}

/// Second pass for a line that parsed as JSON but holds a number `f64`
/// cannot represent.  Values are captured unparsed and decoded one at a
/// time, so only the entries holding such a number are set aside.
fn parse_unrepresentable(line: &str) -> Result<Message, ParseError> {
    let mut top: HashMap<String, Box<RawValue>> =
        serde_json::from_str(line).map_err(|e| match e.classify() {
            Category::Data => ParseError::NotAnObject,
            _ => ParseError::Malformed(e.to_string()),
        })?;

    let version = raw_string(&mut top, "version", ParseError::MissingVersion)?;
    let msg_type = raw_string(&mut top, "type", ParseError::MissingType)?;
    let raw = top.remove("payload").ok_or(ParseError::MissingPayload)?;
    let payload = match serde_json::from_str::<Value>(raw.get()) {
        Ok(Value::Null) => return Err(ParseError::MissingPayload),
        Ok(Value::Object(map)) => Payload::from_map(map),
        Ok(_) => return Err(wrong_type("payload", "an object")),
        Err(_) => {
            let entries: HashMap<String, Box<RawValue>> = serde_json::from_str(raw.get())
                .map_err(|_| wrong_type("payload", "an object"))?;
            let mut payload = Payload::new();
            for (key, raw) in entries {
                match serde_json::from_str::<Value>(raw.get()) {
                    Ok(value) => {
                        payload.fields.insert(key, value);
                    }
                    Err(_) => payload.unrepresentable.push(key),
                }
            }
            payload
        }
    };

    Ok(Message {
        version,
        msg_type,
        payload,
    })
}

fn raw_string(
    top: &mut HashMap<String, Box<RawValue>>,
    field: &'static str,
    missing: ParseError,
) -> Result<String, ParseError> {
    let Some(raw) = top.remove(field) else {
        return Err(missing);
    };
    match serde_json::from_str::<Value>(raw.get()) {
        Ok(Value::Null) => Err(missing),
        Ok(Value::String(s)) => Ok(s),
        _ => Err(wrong_type(field, "a string")),
    }
}

fn take(obj: &mut Map<String, Value>, field: &str) -> Option<Value> {
    obj.remove(field).filter(|v| !v.is_null())
}

fn wrong_type(field: &'static str, expected: &'static str) -> ParseError {
    ParseError::WrongType { field, expected }
}

// ═══════════════════════════════════════════════════════════════
//  Acknowledgements
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Ok,
    Error,
}

/// Payload of an `ack` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckPayload {
    pub command: String,
    pub status: AckStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Returned if an ack ever fails to serialize.
const FALLBACK_ACK: &str = "{\"version\":\"v0\",\"type\":\"ack\",\"payload\":{\"command\":\"unknown\",\"status\":\"error\",\"message\":\"internal encoding error\"}}\n";

impl AckPayload {
    pub fn ok(command: &str, message: impl Into<String>) -> Self {
        Self {
            command: command.to_owned(),
            status: AckStatus::Ok,
            message: Some(message.into()),
        }
    }

    pub fn error(command: &str, message: impl Into<String>) -> Self {
        Self {
            command: command.to_owned(),
            status: AckStatus::Error,
            message: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == AckStatus::Ok
    }

    /// Encode as a complete ack line.
    pub fn to_line(&self) -> String {
        let mut buf = Vec::with_capacity(128);
        match write_line(&mut buf, msg_type::ACK, self) {
            Ok(()) => String::from_utf8(buf).unwrap_or_else(|_| FALLBACK_ACK.to_owned()),
            Err(e) => {
                log::error!("ack encoding failed: {}", e);
                FALLBACK_ACK.to_owned()
            }
        }
    }
}

/// Decode an ack line (client side and tests).
pub fn parse_ack(line: &str) -> Result<AckPayload, ParseError> {
    let msg = parse(line.trim_end_matches(['\r', '\n']))?;
    if msg.msg_type != msg_type::ACK {
        return Err(wrong_type("type", "\"ack\""));
    }
    serde_json::from_value(Value::Object(msg.payload.fields))
        .map_err(|e| ParseError::Malformed(e.to_string()))
}
