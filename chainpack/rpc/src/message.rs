//! RPC message shapes layered over [`RpcValue`].
//!
//! A message is an imap whose keys identify the request id, method name,
//! parameters, result, and error. Which keys are present determines what
//! kind of message it is:
//!
//! ```text
//! method + id          request
//! method, no id        notify
//! id + result/error    response
//! anything else        undefined (never sent)
//! ```
//!
//! The message value carries metadata tag 1 set to [`RPC_MESSAGE_META_TYPE_ID`]
//! so receivers can tell RPC traffic from other packed values.

use std::collections::BTreeMap;
use std::fmt;

use chainpack_wire::{RpcValue, Value, TAG_META_TYPE_ID};
use thiserror::Error;

/// Imap key holding the request id.
pub const KEY_ID: u64 = 1;
/// Imap key holding the method name.
pub const KEY_METHOD: u64 = 2;
/// Imap key holding request or notify parameters.
pub const KEY_PARAMS: u64 = 3;
/// Imap key holding a successful response payload.
pub const KEY_RESULT: u64 = 4;
/// Imap key holding an error response payload.
pub const KEY_ERROR: u64 = 5;

/// Key of the numeric code inside an error payload.
pub const ERR_KEY_CODE: u64 = 1;
/// Key of the human-readable text inside an error payload.
pub const ERR_KEY_MESSAGE: u64 = 2;

/// Metadata type id marking a packed value as an RPC message.
pub const RPC_MESSAGE_META_TYPE_ID: u64 = 1;

/// Message classification derived from which keys are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcType {
    /// Carries a method and an id; expects a response.
    Request,
    /// Carries an id and a result or error.
    Response,
    /// Carries a method but no id; fire and forget.
    Notify,
    /// None of the above; such a message is never sent.
    Undefined,
}

/// Error codes carried inside an error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Placeholder for "no error".
    NoError,
    /// Message was not a valid request.
    InvalidRequest,
    /// Requested method does not exist.
    MethodNotFound,
    /// Parameters were invalid for the method.
    InvalidParams,
    /// Internal error while serving the request.
    InternalError,
    /// Peer sent bytes that did not parse.
    ParseError,
    /// Synchronous call did not complete in time.
    SyncMethodCallTimeout,
    /// Synchronous call was cancelled.
    SyncMethodCallCancelled,
    /// Method ran but raised an exception.
    MethodInvocationException,
    /// Code not recognized by this implementation.
    Unknown,
}

impl From<u64> for ErrorCode {
    fn from(code: u64) -> Self {
        match code {
            0 => ErrorCode::NoError,
            1 => ErrorCode::InvalidRequest,
            2 => ErrorCode::MethodNotFound,
            3 => ErrorCode::InvalidParams,
            4 => ErrorCode::InternalError,
            5 => ErrorCode::ParseError,
            6 => ErrorCode::SyncMethodCallTimeout,
            7 => ErrorCode::SyncMethodCallCancelled,
            8 => ErrorCode::MethodInvocationException,
            _ => ErrorCode::Unknown,
        }
    }
}

impl From<ErrorCode> for u64 {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::NoError => 0,
            ErrorCode::InvalidRequest => 1,
            ErrorCode::MethodNotFound => 2,
            ErrorCode::InvalidParams => 3,
            ErrorCode::InternalError => 4,
            ErrorCode::ParseError => 5,
            ErrorCode::SyncMethodCallTimeout => 6,
            ErrorCode::SyncMethodCallCancelled => 7,
            ErrorCode::MethodInvocationException => 8,
            ErrorCode::Unknown => 9,
        }
    }
}

/// Error payload of a failed request.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("rpc error {code:?}: {message}")]
pub struct RpcError {
    /// Numeric error class.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
}

impl RpcError {
    /// Creates an error payload.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Packs the error into its imap wire form.
    pub fn to_value(&self) -> RpcValue {
        let mut entries = BTreeMap::new();
        entries.insert(ERR_KEY_CODE, RpcValue::from(u64::from(self.code)));
        entries.insert(ERR_KEY_MESSAGE, RpcValue::from(self.message.clone()));
        RpcValue::from(entries)
    }

    /// Reads an error payload back out of its imap wire form.
    ///
    /// The code key is required; a missing message reads as empty.
    pub fn from_value(value: &RpcValue) -> Option<Self> {
        let entries = value.as_imap()?;
        let code = entries.get(&ERR_KEY_CODE).and_then(RpcValue::as_uint)?;
        let message = entries
            .get(&ERR_KEY_MESSAGE)
            .and_then(RpcValue::as_str)
            .unwrap_or_default()
            .to_string();
        Some(Self {
            code: ErrorCode::from(code),
            message,
        })
    }
}

/// One RPC message: an imap value plus the message metadata marker.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcMessage {
    value: RpcValue,
}

impl RpcMessage {
    /// Creates an empty message with the RPC metadata marker set.
    pub fn new() -> Self {
        let mut value = RpcValue::from(BTreeMap::<u64, RpcValue>::new());
        value
            .meta_mut()
            .insert(TAG_META_TYPE_ID, RPC_MESSAGE_META_TYPE_ID);
        Self { value }
    }

    /// Builds a request carrying `id`, `method`, and optional parameters.
    pub fn new_request(id: u64, method: impl Into<String>, params: Option<RpcValue>) -> Self {
        let mut msg = Self::new();
        msg.set_id(id);
        msg.set_method(method);
        if let Some(params) = params {
            msg.set_params(params);
        }
        msg
    }

    /// Builds a successful response to request `id`.
    pub fn new_response(id: u64, result: impl Into<RpcValue>) -> Self {
        let mut msg = Self::new();
        msg.set_id(id);
        msg.set_result(result);
        msg
    }

    /// Builds an error response to request `id`.
    pub fn new_error(id: u64, error: RpcError) -> Self {
        let mut msg = Self::new();
        msg.set_id(id);
        msg.set_error(error);
        msg
    }

    /// Builds a notify for `method` with optional parameters.
    pub fn new_notify(method: impl Into<String>, params: Option<RpcValue>) -> Self {
        let mut msg = Self::new();
        msg.set_method(method);
        if let Some(params) = params {
            msg.set_params(params);
        }
        msg
    }

    /// Interprets a decoded value as a message.
    ///
    /// Returns the value back unchanged when it does not have the imap
    /// shape messages require.
    pub fn from_value(value: RpcValue) -> Result<Self, RpcValue> {
        match value.value() {
            Value::IMap(_) => Ok(Self { value }),
            _ => Err(value),
        }
    }

    /// The message as a packable value.
    pub fn as_value(&self) -> &RpcValue {
        &self.value
    }

    /// Consumes the message, yielding the underlying value.
    pub fn into_value(self) -> RpcValue {
        self.value
    }

    fn field(&self, key: u64) -> Option<&RpcValue> {
        match self.value.value() {
            Value::IMap(entries) => entries.get(&key),
            _ => None,
        }
    }

    fn set_field(&mut self, key: u64, value: RpcValue) {
        if let Value::IMap(entries) = self.value.value_mut() {
            entries.insert(key, value);
        }
    }

    /// Request id, if present.
    ///
    /// Accepts both unsigned and non-negative signed encodings, since
    /// other implementations emit either.
    pub fn id(&self) -> Option<u64> {
        let field = self.field(KEY_ID)?;
        field
            .as_uint()
            .or_else(|| field.as_int().and_then(|n| u64::try_from(n).ok()))
    }

    /// Sets the request id.
    pub fn set_id(&mut self, id: u64) {
        self.set_field(KEY_ID, RpcValue::from(id));
    }

    /// Method name, if present.
    pub fn method(&self) -> Option<&str> {
        self.field(KEY_METHOD)?.as_str()
    }

    /// Sets the method name.
    pub fn set_method(&mut self, method: impl Into<String>) {
        self.set_field(KEY_METHOD, RpcValue::from(method.into()));
    }

    /// Parameters, if present.
    pub fn params(&self) -> Option<&RpcValue> {
        self.field(KEY_PARAMS)
    }

    /// Sets the parameters.
    pub fn set_params(&mut self, params: impl Into<RpcValue>) {
        self.set_field(KEY_PARAMS, params.into());
    }

    /// Successful result payload, if present.
    pub fn result(&self) -> Option<&RpcValue> {
        self.field(KEY_RESULT)
    }

    /// Sets the result payload.
    pub fn set_result(&mut self, result: impl Into<RpcValue>) {
        self.set_field(KEY_RESULT, result.into());
    }

    /// Error payload, if present and well formed.
    pub fn error(&self) -> Option<RpcError> {
        self.field(KEY_ERROR).and_then(RpcError::from_value)
    }

    /// Sets the error payload.
    pub fn set_error(&mut self, error: RpcError) {
        self.set_field(KEY_ERROR, error.to_value());
    }

    /// Classifies the message by the keys it carries.
    pub fn rpc_type(&self) -> RpcType {
        let id = self.id().unwrap_or(0);
        if self.method().is_some() {
            if id > 0 {
                RpcType::Request
            } else {
                RpcType::Notify
            }
        } else if id > 0 && (self.field(KEY_RESULT).is_some() || self.field(KEY_ERROR).is_some()) {
            RpcType::Response
        } else {
            RpcType::Undefined
        }
    }

    /// Whether this message is a request.
    pub fn is_request(&self) -> bool {
        self.rpc_type() == RpcType::Request
    }

    /// Whether this message is a response.
    pub fn is_response(&self) -> bool {
        self.rpc_type() == RpcType::Response
    }

    /// Whether this message is a notify.
    pub fn is_notify(&self) -> bool {
        self.rpc_type() == RpcType::Notify
    }
}

impl Default for RpcMessage {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RpcMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainpack_wire::{pack, unpack_exact};

    #[test]
    fn test_request_shape() {
        let msg = RpcMessage::new_request(7, "echo", Some(RpcValue::from("hi")));
        assert_eq!(msg.rpc_type(), RpcType::Request);
        assert!(msg.is_request());
        assert_eq!(msg.id(), Some(7));
        assert_eq!(msg.method(), Some("echo"));
        assert_eq!(msg.params().and_then(RpcValue::as_str), Some("hi"));
        assert!(msg.result().is_none());
        assert!(msg.error().is_none());
    }

    #[test]
    fn test_notify_shape() {
        let msg = RpcMessage::new_notify("ping", None);
        assert_eq!(msg.rpc_type(), RpcType::Notify);
        assert!(msg.is_notify());
        assert_eq!(msg.id(), None);
        assert_eq!(msg.method(), Some("ping"));
    }

    #[test]
    fn test_response_shapes() {
        let ok = RpcMessage::new_response(3, RpcValue::from(42u64));
        assert_eq!(ok.rpc_type(), RpcType::Response);
        assert_eq!(ok.result().and_then(RpcValue::as_uint), Some(42));
        assert!(ok.error().is_none());

        let failed = RpcMessage::new_error(3, RpcError::new(ErrorCode::MethodNotFound, "no echo"));
        assert_eq!(failed.rpc_type(), RpcType::Response);
        assert!(failed.result().is_none());
        let err = failed.error().unwrap();
        assert_eq!(err.code, ErrorCode::MethodNotFound);
        assert_eq!(err.message, "no echo");
    }

    #[test]
    fn test_classification_grid() {
        let empty = RpcMessage::new();
        assert_eq!(empty.rpc_type(), RpcType::Undefined);

        let mut id_only = RpcMessage::new();
        id_only.set_id(1);
        assert_eq!(id_only.rpc_type(), RpcType::Undefined);

        // Method beats result when both are present alongside an id.
        let mut both = RpcMessage::new_request(1, "m", None);
        both.set_result(RpcValue::from(true));
        assert_eq!(both.rpc_type(), RpcType::Request);

        // Id zero counts as absent.
        let mut zero_id = RpcMessage::new_notify("m", None);
        zero_id.set_id(0);
        assert_eq!(zero_id.rpc_type(), RpcType::Notify);
    }

    #[test]
    fn test_meta_type_marker() {
        let msg = RpcMessage::new();
        assert_eq!(
            msg.as_value().meta().meta_type_id(),
            Some(RPC_MESSAGE_META_TYPE_ID),
        );
    }

    #[test]
    fn test_from_value_requires_imap() {
        let err = RpcMessage::from_value(RpcValue::from(5u64)).unwrap_err();
        assert_eq!(err, RpcValue::from(5u64));

        let msg = RpcMessage::new_notify("chng", None);
        let back = RpcMessage::from_value(msg.as_value().clone()).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_id_accepts_signed_wire_form() {
        let mut entries = BTreeMap::new();
        entries.insert(KEY_ID, RpcValue::from(5i64));
        entries.insert(KEY_METHOD, RpcValue::from("m"));
        let msg = RpcMessage::from_value(RpcValue::from(entries)).unwrap();
        assert_eq!(msg.id(), Some(5));
        assert_eq!(msg.rpc_type(), RpcType::Request);
    }

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(ErrorCode::from(2u64), ErrorCode::MethodNotFound);
        assert_eq!(ErrorCode::from(8u64), ErrorCode::MethodInvocationException);
        assert_eq!(ErrorCode::from(77u64), ErrorCode::Unknown);
        assert_eq!(u64::from(ErrorCode::ParseError), 5);
    }

    #[test]
    fn test_error_payload_round_trip() {
        let err = RpcError::new(ErrorCode::InvalidParams, "bad params");
        let back = RpcError::from_value(&err.to_value()).unwrap();
        assert_eq!(back, err);

        // Missing code makes the payload unreadable.
        let empty = RpcValue::from(BTreeMap::<u64, RpcValue>::new());
        assert!(RpcError::from_value(&empty).is_none());
    }

    #[test]
    fn test_message_round_trip_through_codec() {
        let msg = RpcMessage::new_request(9, "ls", Some(RpcValue::from("a/b")));
        let bytes = pack(msg.as_value());
        let value = unpack_exact(&bytes).unwrap();
        assert_eq!(value.meta().meta_type_id(), Some(RPC_MESSAGE_META_TYPE_ID));
        let back = RpcMessage::from_value(value).unwrap();
        assert_eq!(back, msg);
    }
}
