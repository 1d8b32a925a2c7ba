use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, RequestErrorKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Method {
    TransportSetMaxIncomingBitrate,
    TransportProduce,
    TransportConsume,
    TransportDump,
    ProducerClose,
    ProducerPause,
    ProducerResume,
    ConsumerClose,
}

/// A single request received over the control channel. `internal` carries
/// routing ids, `data` the method payload, both kept as raw JSON so that
/// field validation happens at handling time and malformed fields turn into
/// rejections instead of deserialization failures.
#[derive(Clone, Debug, Deserialize)]
pub struct Request {
    pub method: Method,
    #[serde(default)]
    pub internal: Value,
    #[serde(default)]
    pub data: Value,
}

impl Request {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            internal: Value::Null,
            data: Value::Null,
        }
    }

    pub fn with_internal(mut self, internal: Value) -> Self {
        self.internal = internal;
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn internal_str(&self, key: &str) -> Result<&str, Error> {
        match self.internal.get(key) {
            None => Err(Error::new_request(
                format!("request has no internal.{}", key),
                RequestErrorKind::MissingFieldError,
            )),
            Some(value) => value.as_str().ok_or_else(|| {
                Error::new_request(
                    format!("request has no internal.{}", key),
                    RequestErrorKind::InvalidFieldError,
                )
            }),
        }
    }

    pub fn data_u64(&self, key: &str) -> Result<u64, Error> {
        match self.data.get(key) {
            None => Err(Error::new_request(
                format!("missing {}", key),
                RequestErrorKind::MissingFieldError,
            )),
            Some(value) => value.as_u64().ok_or_else(|| {
                Error::new_request(
                    format!("missing {}", key),
                    RequestErrorKind::InvalidFieldError,
                )
            }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "lowercase", tag = "result")]
pub enum Response {
    Accepted {
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    Rejected {
        reason: String,
    },
}

impl Response {
    pub fn accept() -> Self {
        Response::Accepted { data: None }
    }

    pub fn accept_with(data: Value) -> Self {
        Response::Accepted { data: Some(data) }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Response::Rejected {
            reason: reason.into(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Response::Accepted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn method_uses_wire_names() {
        let method: Method = serde_json::from_value(json!("TRANSPORT_SET_MAX_INCOMING_BITRATE"))
            .expect("method should deserialize");
        assert_eq!(method, Method::TransportSetMaxIncomingBitrate);

        let serialized = serde_json::to_value(Method::ProducerClose).unwrap();
        assert_eq!(serialized, json!("PRODUCER_CLOSE"));
    }

    #[test]
    fn request_deserializes_from_wire_json() {
        let request: Request = serde_json::from_value(json!({
            "method": "PRODUCER_CLOSE",
            "internal": { "producerId": "p1" }
        }))
        .expect("request should deserialize");

        assert_eq!(request.method, Method::ProducerClose);
        assert_eq!(request.internal_str("producerId").unwrap(), "p1");
        assert!(request.data.is_null());
    }

    #[test]
    fn internal_str_rejects_non_string() {
        let request =
            Request::new(Method::ProducerClose).with_internal(json!({ "producerId": 42 }));
        assert!(request.internal_str("producerId").is_err());

        let request =
            Request::new(Method::ProducerClose).with_internal(json!({ "producerId": "p1" }));
        assert_eq!(request.internal_str("producerId").unwrap(), "p1");
    }

    #[test]
    fn data_u64_rejects_signed_and_missing() {
        let request = Request::new(Method::TransportSetMaxIncomingBitrate)
            .with_data(json!({ "bitrate": -5 }));
        assert!(request.data_u64("bitrate").is_err());

        let request = Request::new(Method::TransportSetMaxIncomingBitrate).with_data(json!({}));
        assert!(request.data_u64("bitrate").is_err());
    }
}
