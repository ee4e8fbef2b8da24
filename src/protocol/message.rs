//! JSON payloads carried inside frames.
//!
//! ```text
//! request:  {"id": 23, "method": "get_status", "params": [...]}
//! response: {"id": 23, "result": [...] | {...} | "ok"}
//! error:    {"id": 23, "error": {"code": -5001, "message": "..."}}
//! ```

use crate::error::{constants, MiioError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Result string a peer sends back for a method it does not implement
pub const UNKNOWN_METHOD: &str = "unknown_method";

/// Method queried for device identity and model
pub const INFO_METHOD: &str = "miIO.info";

/// Command parameters: absent, an ordered list or a keyed map.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Params {
    #[default]
    None,
    List(Vec<Value>),
    Map(Map<String, Value>),
}

impl Params {
    /// Accept `null`, an array or an object. Scalars are rejected.
    pub fn from_value(value: Option<Value>) -> Result<Self> {
        match value {
            None | Some(Value::Null) => Ok(Params::None),
            Some(Value::Array(list)) => Ok(Params::List(list)),
            Some(Value::Object(map)) => Ok(Params::Map(map)),
            Some(other) => Err(MiioError::InvalidParameters(format!(
                "{}, got {other}",
                constants::ERR_PARAMS_SHAPE
            ))),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Params::None => true,
            Params::List(list) => list.is_empty(),
            Params::Map(map) => map.is_empty(),
        }
    }

    /// JSON form, or `None` when the params should be omitted from the wire.
    pub fn to_value(&self) -> Option<Value> {
        match self {
            _ if self.is_empty() => None,
            Params::List(list) => Some(Value::Array(list.clone())),
            Params::Map(map) => Some(Value::Object(map.clone())),
            Params::None => None,
        }
    }
}

impl From<Vec<Value>> for Params {
    fn from(list: Vec<Value>) -> Self {
        Params::List(list)
    }
}

impl From<Map<String, Value>> for Params {
    fn from(map: Map<String, Value>) -> Self {
        Params::Map(map)
    }
}

#[derive(Serialize, Deserialize)]
struct CommandWire {
    id: u32,
    #[serde(default)]
    method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

/// A request: correlation id, method name and parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub id: u32,
    pub method: String,
    pub params: Params,
}

impl Command {
    pub fn new(id: u32, method: impl Into<String>, params: Params) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        let wire = CommandWire {
            id: self.id,
            method: self.method.clone(),
            params: self.params.to_value(),
        };
        Ok(serde_json::to_string(&wire)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let wire: CommandWire = serde_json::from_str(text)?;
        Ok(Self {
            id: wire.id,
            method: wire.method,
            params: Params::from_value(wire.params)?,
        })
    }
}

/// The shape of a reply's `result` member.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ResponseResult {
    #[default]
    Empty,
    List(Vec<Value>),
    Map(Map<String, Value>),
    Text(String),
}

impl ResponseResult {
    pub fn from_value(value: Option<Value>) -> Result<Self> {
        match value {
            None | Some(Value::Null) => Ok(ResponseResult::Empty),
            Some(Value::Array(list)) => Ok(ResponseResult::List(list)),
            Some(Value::Object(map)) => Ok(ResponseResult::Map(map)),
            Some(Value::String(text)) => Ok(ResponseResult::Text(text)),
            Some(other) => Err(MiioError::InvalidResponse(format!(
                "{}: {other}",
                constants::ERR_RESULT_SHAPE
            ))),
        }
    }

    pub fn to_value(&self) -> Option<Value> {
        match self {
            ResponseResult::Empty => None,
            ResponseResult::List(list) => Some(Value::Array(list.clone())),
            ResponseResult::Map(map) => Some(Value::Object(map.clone())),
            ResponseResult::Text(text) => Some(Value::String(text.clone())),
        }
    }

    pub fn is_unknown_method(&self) -> bool {
        matches!(self, ResponseResult::Text(text) if text == UNKNOWN_METHOD)
    }
}

/// A reply: correlation id and result.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: u32,
    pub result: ResponseResult,
}

impl Response {
    pub fn new(id: u32, result: ResponseResult) -> Self {
        Self { id, result }
    }

    pub fn unknown_method(id: u32) -> Self {
        Self::new(id, ResponseResult::Text(UNKNOWN_METHOD.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        let mut object = Map::new();
        object.insert("id".into(), Value::from(self.id));
        if let Some(result) = self.result.to_value() {
            object.insert("result".into(), result);
        }
        Ok(serde_json::to_string(&Value::Object(object))?)
    }

    /// Parse a reply. An `error` member becomes [`MiioError::DeviceError`].
    pub fn from_json(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(mut object) = value else {
            return Err(MiioError::InvalidResponse(constants::ERR_NOT_AN_OBJECT.into()));
        };
        let id = reply_id(&object)?;

        if let Some(error) = object.remove("error") {
            return Err(device_error(&error));
        }

        Ok(Self {
            id,
            result: ResponseResult::from_value(object.remove("result"))?,
        })
    }

    /// Deserialize the result into a caller-chosen type.
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<T> {
        let value = self.result.to_value().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|e| MiioError::InvalidResponse(e.to_string()))
    }
}

/// Extract the numeric `id` member of a JSON object.
pub fn reply_id(object: &Map<String, Value>) -> Result<u32> {
    object
        .get("id")
        .and_then(Value::as_u64)
        .and_then(|id| u32::try_from(id).ok())
        .ok_or_else(|| MiioError::InvalidResponse(constants::ERR_MISSING_ID.into()))
}

fn device_error(error: &Value) -> MiioError {
    let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
    let message = match error.get("message") {
        Some(Value::String(message)) => message.clone(),
        Some(other) => other.to_string(),
        None => error.to_string(),
    };
    MiioError::DeviceError { code, message }
}

/// Identity block returned by `miIO.info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fw_ver: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hw_ver: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}
