//! Application messages: file request and answer. JSON objects on the wire, tagged by a numeric `type`.

use serde_json::{Map, Value};

/// Version of the transport handshake. Sent in the hello frame.
pub const PROTOCOL_VERSION: u8 = 1;

/// Discriminator of an [`Answer`].
pub const TYPE_ANSWER: u64 = 0;
/// Discriminator of a [`FileRequest`].
pub const TYPE_REQUEST: u64 = 1;

/// Answer code: transfer accepted, body may follow.
pub const CODE_ACCEPT: i64 = 0;
/// Answer code: request could not be validated.
pub const CODE_MALFORMED: i64 = 1;
/// Answer code: requested name would leave the receiver's directory.
pub const CODE_PATH_REJECTED: i64 = 2;
/// Answer code: destination file could not be created.
pub const CODE_DESTINATION_FAILED: i64 = 3;

/// Position of a file within its batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch {
    pub index: u64,
    pub count: u64,
}

/// Announces one file before its body is streamed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRequest {
    /// Base name only; the receiver never trusts directory parts.
    pub name: String,
    pub size: u64,
    /// `None` for the single-file form without batch metadata.
    pub batch: Option<Batch>,
}

impl FileRequest {
    pub fn new(name: impl Into<String>, size: u64, index: u64, count: u64) -> Self {
        Self {
            name: name.into(),
            size,
            batch: Some(Batch { index, count }),
        }
    }

    /// Request without `index`/`count`; treated as file 0 of 1.
    pub fn single(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            batch: None,
        }
    }

    /// Zero-based index and total count.
    pub fn position(&self) -> (u64, u64) {
        self.batch.map(|b| (b.index, b.count)).unwrap_or((0, 1))
    }

    pub fn is_last(&self) -> bool {
        let (index, count) = self.position();
        index + 1 == count
    }

    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("type".into(), Value::from(TYPE_REQUEST));
        obj.insert("name".into(), Value::from(self.name.clone()));
        obj.insert("size".into(), Value::from(self.size));
        if let Some(batch) = self.batch {
            obj.insert("index".into(), Value::from(batch.index));
            obj.insert("count".into(), Value::from(batch.count));
        }
        Value::Object(obj)
    }

    /// Decode and validate a request received from the peer.
    pub fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        let obj = expect_type(value, TYPE_REQUEST)?;
        let name = match obj.get("name") {
            Some(Value::String(s)) => s.clone(),
            Some(_) => return Err(ProtocolError::NotString("name")),
            None => return Err(ProtocolError::MissingField("name")),
        };
        let size = number_field(obj, "size")?.ok_or(ProtocolError::MissingField("size"))?;
        let index = number_field(obj, "index")?;
        let count = number_field(obj, "count")?;
        let batch = match (index, count) {
            (Some(index), Some(count)) => {
                if index >= count {
                    return Err(ProtocolError::IndexOutOfRange { index, count });
                }
                Some(Batch { index, count })
            }
            (None, None) => None,
            (Some(_), None) => return Err(ProtocolError::MissingField("count")),
            (None, Some(_)) => return Err(ProtocolError::MissingField("index")),
        };
        Ok(Self { name, size, batch })
    }
}

/// Receiver's verdict on a [`FileRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub code: i64,
    pub message: Option<String>,
}

impl Answer {
    pub fn accept() -> Self {
        Self {
            code: CODE_ACCEPT,
            message: None,
        }
    }

    pub fn reject(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.code == CODE_ACCEPT
    }

    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("type".into(), Value::from(TYPE_ANSWER));
        obj.insert("code".into(), Value::from(self.code));
        if let Some(msg) = &self.message {
            obj.insert("msg".into(), Value::from(msg.clone()));
        }
        Value::Object(obj)
    }

    pub fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        let obj = expect_type(value, TYPE_ANSWER)?;
        let code = match obj.get("code") {
            Some(v) => v.as_i64().ok_or(ProtocolError::NotNumeric("code"))?,
            None => return Err(ProtocolError::MissingField("code")),
        };
        let message = match obj.get("msg") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Null) | None => None,
            Some(_) => return Err(ProtocolError::NotString("msg")),
        };
        Ok(Self { code, message })
    }

    /// Turn a refusal into the error the sender aborts with.
    pub fn into_result(self) -> Result<(), ProtocolError> {
        if self.is_accepted() {
            Ok(())
        } else {
            Err(ProtocolError::Rejected {
                code: self.code,
                message: self.message,
            })
        }
    }
}

fn expect_type(value: &Value, expected: u64) -> Result<&Map<String, Value>, ProtocolError> {
    let obj = value.as_object().ok_or(ProtocolError::NotAnObject)?;
    match obj.get("type") {
        Some(v) if v.as_u64() == Some(expected) => Ok(obj),
        Some(v) => Err(ProtocolError::UnexpectedType {
            expected,
            found: v.to_string(),
        }),
        None => Err(ProtocolError::MissingField("type")),
    }
}

fn number_field(obj: &Map<String, Value>, field: &'static str) -> Result<Option<u64>, ProtocolError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v.as_u64().map(Some).ok_or(ProtocolError::NotNumeric(field)),
    }
}

/// Malformed or unexpected application message.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("message is not a JSON object")]
    NotAnObject,
    #[error("unexpected message type {found} (expected {expected})")]
    UnexpectedType { expected: u64, found: String },
    #[error("missing field '{0}'")]
    MissingField(&'static str),
    #[error("field '{0}' is not a non-negative integer")]
    NotNumeric(&'static str),
    #[error("field '{0}' is not a string")]
    NotString(&'static str),
    #[error("index {index} out of range for batch of {count}")]
    IndexOutOfRange { index: u64, count: u64 },
    #[error("request rejected by peer (code {code}): {}", .message.as_deref().unwrap_or("no reason given"))]
    Rejected { code: i64, message: Option<String> },
    #[error("declared size {declared} but received {actual} bytes")]
    SizeMismatch { declared: u64, actual: u64 },
    #[error("connection closed in the middle of a batch")]
    UnexpectedEof,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_roundtrip() {
        let req = FileRequest::new("report.pdf", 1234, 2, 5);
        let decoded = FileRequest::from_value(&req.to_value()).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn single_request_omits_batch_fields() {
        let req = FileRequest::single("a.txt", 5);
        let value = req.to_value();
        assert!(value.get("index").is_none());
        assert!(value.get("count").is_none());
        let decoded = FileRequest::from_value(&value).unwrap();
        assert_eq!(decoded.position(), (0, 1));
        assert!(decoded.is_last());
    }

    #[test]
    fn answer_roundtrip() {
        let ok = Answer::accept();
        assert_eq!(Answer::from_value(&ok.to_value()).unwrap(), ok);
        let no = Answer::reject(CODE_PATH_REJECTED, "nope");
        assert_eq!(Answer::from_value(&no.to_value()).unwrap(), no);
    }

    #[test]
    fn wire_shape_matches_json_contract() {
        let req = FileRequest::new("a.txt", 5, 0, 1);
        assert_eq!(
            req.to_value(),
            json!({"type": 1, "name": "a.txt", "size": 5, "index": 0, "count": 1})
        );
        assert_eq!(Answer::accept().to_value(), json!({"type": 0, "code": 0}));
    }

    #[test]
    fn wrong_discriminator_rejected() {
        let err = FileRequest::from_value(&Answer::accept().to_value()).unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedType { expected: 1, .. }));
        let err = Answer::from_value(&FileRequest::single("x", 1).to_value()).unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedType { expected: 0, .. }));
    }

    #[test]
    fn non_numeric_fields_rejected() {
        let v = json!({"type": 1, "name": "a", "size": "5"});
        assert!(matches!(
            FileRequest::from_value(&v),
            Err(ProtocolError::NotNumeric("size"))
        ));
        let v = json!({"type": 1, "name": "a", "size": 5, "index": -1, "count": 2});
        assert!(matches!(
            FileRequest::from_value(&v),
            Err(ProtocolError::NotNumeric("index"))
        ));
        let v = json!({"type": 1, "name": "a"});
        assert!(matches!(
            FileRequest::from_value(&v),
            Err(ProtocolError::MissingField("size"))
        ));
    }

    #[test]
    fn index_and_count_travel_together() {
        let v = json!({"type": 1, "name": "a", "size": 1, "index": 0});
        assert!(matches!(
            FileRequest::from_value(&v),
            Err(ProtocolError::MissingField("count"))
        ));
    }

    #[test]
    fn index_out_of_range() {
        let v = json!({"type": 1, "name": "a", "size": 1, "index": 3, "count": 3});
        assert!(matches!(
            FileRequest::from_value(&v),
            Err(ProtocolError::IndexOutOfRange { index: 3, count: 3 })
        ));
    }

    #[test]
    fn rejected_answer_becomes_error() {
        let err = Answer::reject(CODE_MALFORMED, "bad").into_result().unwrap_err();
        assert!(matches!(err, ProtocolError::Rejected { code: 1, .. }));
        assert!(Answer::accept().into_result().is_ok());
    }
}
