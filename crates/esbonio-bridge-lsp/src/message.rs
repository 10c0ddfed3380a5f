//! JSON-RPC 2.0 message model.
//!
//! Messages are kept close to the wire: parameters and results stay as
//! [`serde_json::Value`] so anything the bridge does not inspect passes
//! through untouched.

use crate::error::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

/// Prefix of ids the bridge uses for its own outbound requests.
pub const BRIDGE_ID_PREFIX: &str = "esbonio-bridge/";

/// JSON-RPC error codes used by the bridge.
pub mod codes {
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl RequestId {
    /// Id for the bridge's `n`th outbound request.
    pub fn bridge(n: u64) -> Self {
        RequestId::String(format!("{BRIDGE_ID_PREFIX}{n}"))
    }

    /// Whether the bridge itself issued this id.
    pub fn is_bridge(&self) -> bool {
        matches!(self, RequestId::String(s) if s.starts_with(BRIDGE_ID_PREFIX))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ResponseError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// `None` only for errors about unparsable requests.
    pub id: Option<RequestId>,
    pub result: Result<Value, ResponseError>,
}

impl Response {
    pub fn ok(id: RequestId, result: Value) -> Self {
        Self {
            id: Some(id),
            result: Ok(result),
        }
    }

    pub fn error(id: RequestId, error: ResponseError) -> Self {
        Self {
            id: Some(id),
            result: Err(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Notification(Notification),
    Response(Response),
}

impl Message {
    pub fn request(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Message::Request(Request {
            id,
            method: method.into(),
            params,
        })
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Message::Notification(Notification {
            method: method.into(),
            params,
        })
    }

    /// Parse a message body.
    pub fn parse(content: &str) -> BridgeResult<Self> {
        let value: Value = serde_json::from_str(content)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> BridgeResult<Self> {
        let Value::Object(mut object) = value else {
            return Err(BridgeError::protocol_error("Message is not an object"));
        };

        let id = match object.remove("id") {
            None | Some(Value::Null) => None,
            Some(id) => Some(
                serde_json::from_value::<RequestId>(id)
                    .map_err(|_| BridgeError::protocol_error("Invalid id"))?,
            ),
        };
        let params = object.remove("params");

        if let Some(method) = object.remove("method") {
            let Value::String(method) = method else {
                return Err(BridgeError::protocol_error("Method is not a string"));
            };
            return Ok(match id {
                Some(id) => Message::Request(Request { id, method, params }),
                None => Message::Notification(Notification { method, params }),
            });
        }

        let result = match object.remove("error") {
            Some(error) if !error.is_null() => Err(serde_json::from_value::<ResponseError>(error)
                .map_err(|_| BridgeError::protocol_error("Invalid error object"))?),
            _ => Ok(object.remove("result").unwrap_or(Value::Null)),
        };
        Ok(Message::Response(Response { id, result }))
    }

    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        object.insert("jsonrpc".to_string(), json!("2.0"));
        match self {
            Message::Request(request) => {
                object.insert("id".to_string(), json!(request.id));
                object.insert("method".to_string(), json!(request.method));
                if let Some(params) = &request.params {
                    object.insert("params".to_string(), params.clone());
                }
            }
            Message::Notification(notification) => {
                object.insert("method".to_string(), json!(notification.method));
                if let Some(params) = &notification.params {
                    object.insert("params".to_string(), params.clone());
                }
            }
            Message::Response(response) => {
                object.insert("id".to_string(), json!(response.id));
                match &response.result {
                    Ok(result) => object.insert("result".to_string(), result.clone()),
                    Err(error) => object.insert("error".to_string(), json!(error)),
                };
            }
        }
        Value::Object(object)
    }

    pub fn to_json(&self) -> String {
        self.to_value().to_string()
    }

    /// Method name for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request(request) => Some(&request.method),
            Message::Notification(notification) => Some(&notification.method),
            Message::Response(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kinds() {
        let request = Message::parse(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#).unwrap();
        assert!(matches!(request, Message::Request(ref r) if r.id == RequestId::Number(1)));

        let notification = Message::parse(r#"{"jsonrpc":"2.0","method":"initialized","params":{}}"#).unwrap();
        assert_eq!(notification.method(), Some("initialized"));

        let response = Message::parse(r#"{"jsonrpc":"2.0","id":"esbonio-bridge/3","result":null}"#).unwrap();
        match response {
            Message::Response(response) => {
                assert_eq!(response.id, Some(RequestId::bridge(3)));
                assert_eq!(response.result, Ok(Value::Null));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_parse_error_response() {
        let message =
            Message::parse(r#"{"jsonrpc":"2.0","id":7,"error":{"code":-32601,"message":"nope"}}"#).unwrap();
        let Message::Response(response) = message else {
            panic!("expected response");
        };
        let error = response.result.unwrap_err();
        assert_eq!(error.code, codes::METHOD_NOT_FOUND);
        assert_eq!(error.message, "nope");
    }

    #[test]
    fn test_parse_rejects_non_objects() {
        assert!(Message::parse("[1, 2]").is_err());
        assert!(Message::parse(r#"{"method": 3}"#).is_err());
        assert!(Message::parse("not json").is_err());
    }

    #[test]
    fn test_serialized_shape() {
        let message = Message::request(RequestId::bridge(1), "shutdown", None);
        assert_eq!(
            message.to_value(),
            json!({"jsonrpc": "2.0", "id": "esbonio-bridge/1", "method": "shutdown"})
        );

        let response = Message::Response(Response::ok(RequestId::Number(2), Value::Null));
        assert_eq!(
            response.to_value(),
            json!({"jsonrpc": "2.0", "id": 2, "result": null})
        );
    }

    #[test]
    fn test_bridge_ids() {
        assert!(RequestId::bridge(9).is_bridge());
        assert!(!RequestId::String("c0ffee".to_string()).is_bridge());
        assert!(!RequestId::Number(9).is_bridge());
        assert_eq!(RequestId::bridge(9).to_string(), "esbonio-bridge/9");
    }
}
