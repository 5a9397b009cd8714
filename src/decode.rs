//! Turns response text into the shape a request declared.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Error;
use crate::util::truncate_body;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalarKind {
    Boolean,
    Integer,
    Float,
}

impl ScalarKind {
    const fn name(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Float => "float",
        }
    }
}

/// Declared interpretation of a response body.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResponseShape {
    /// Text returned unchanged.
    #[default]
    Raw,
    Scalar(ScalarKind),
    /// Any JSON document.
    Structured,
    /// A JSON array.
    List,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Decoded {
    /// No body where one was required. The retry executor treats this as a failed attempt.
    Absent,
    Text(String),
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Structured(Value),
    List(Vec<Value>),
}

impl Decoded {
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            Self::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn into_json(self) -> Option<Value> {
        match self {
            Self::Structured(value) => Some(value),
            Self::List(items) => Some(Value::Array(items)),
            _ => None,
        }
    }
}

pub fn decode(text: &str, shape: ResponseShape) -> Result<Decoded, Error> {
    match shape {
        ResponseShape::Raw => Ok(Decoded::Text(text.to_owned())),
        ResponseShape::Scalar(kind) => decode_scalar(text, kind),
        ResponseShape::Structured => decode_structured(text),
        ResponseShape::List => decode_list(text),
    }
}

fn decode_scalar(text: &str, kind: ScalarKind) -> Result<Decoded, Error> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Decoded::Absent);
    }
    let invalid = || Error::DecodeScalar {
        expected: kind.name(),
        body: truncate_body(text.as_bytes()),
    };
    match kind {
        ScalarKind::Boolean => {
            if trimmed.eq_ignore_ascii_case("true") {
                Ok(Decoded::Boolean(true))
            } else if trimmed.eq_ignore_ascii_case("false") {
                Ok(Decoded::Boolean(false))
            } else {
                Err(invalid())
            }
        }
        ScalarKind::Integer => trimmed
            .parse::<i64>()
            .map(Decoded::Integer)
            .map_err(|_| invalid()),
        ScalarKind::Float => trimmed
            .parse::<f64>()
            .map(Decoded::Float)
            .map_err(|_| invalid()),
    }
}

fn decode_structured(text: &str) -> Result<Decoded, Error> {
    if text.trim().is_empty() {
        return Ok(Decoded::Absent);
    }
    parse_json::<Value>(text).map(Decoded::Structured)
}

fn decode_list(text: &str) -> Result<Decoded, Error> {
    if text.trim().is_empty() {
        return Ok(Decoded::Absent);
    }
    match parse_json::<Value>(text)? {
        Value::Array(items) => Ok(Decoded::List(items)),
        _ => Err(Error::UnexpectedShape {
            expected: "json array",
            body: truncate_body(text.as_bytes()),
        }),
    }
}

/// Decodes into a caller type; `Ok(None)` for an empty body.
pub fn decode_json<T>(text: &str) -> Result<Option<T>, Error>
where
    T: DeserializeOwned,
{
    if text.trim().is_empty() {
        return Ok(None);
    }
    parse_json(text).map(Some)
}

fn parse_json<T>(text: &str) -> Result<T, Error>
where
    T: DeserializeOwned,
{
    serde_json::from_str(text).map_err(|source| Error::Deserialize {
        source,
        body: truncate_body(text.as_bytes()),
    })
}
