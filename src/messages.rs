/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The message schema shared by clients, the master, and storage nodes.
//!
//! Every exchange consists of exactly one [KVMessage] in each direction. A message is a type tag plus up to three
//! optional fields (key, value, message text). Which fields must be present depends on the type:
//!
//! | Type        | Key      | Value    | Message  |
//! |-------------|----------|----------|----------|
//! | PutRequest  | required | required | absent   |
//! | GetRequest  | required | absent   | absent   |
//! | DelRequest  | required | absent   | absent   |
//! | Response    | key and value, or message (not both) |||
//! | Register    | absent   | absent   | required |
//! | Ready       | absent   | absent   | absent   |
//! | Commit      | absent   | absent   | absent   |
//! | Abort       | absent   | absent   | optional |
//! | Ack         | absent   | absent   | absent   |
//!
//! Messages are encoded with borsh. Decoding is done in two steps: the bytes are first parsed (failures are
//! [parser errors](KVError::Parser)), then checked against the table above (failures are
//! [invalid-format errors](KVError::InvalidFormat)).

use borsh::{BorshDeserialize, BorshSerialize};

use crate::error::KVError;
use crate::types::{Key, Value};

/// Upper bound on the encoded size of a single message. Comfortably above the largest valid put request.
pub const MAX_MESSAGE_SIZE: usize = 512 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub enum MessageType {
    PutRequest,
    GetRequest,
    DelRequest,
    Response,
    Register,
    Ready,
    Commit,
    Abort,
    Ack,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct KVMessage {
    msg_type: MessageType,
    key: Option<Key>,
    value: Option<Value>,
    message: Option<String>,
}

impl KVMessage {
    fn new(msg_type: MessageType) -> KVMessage {
        KVMessage {
            msg_type,
            key: None,
            value: None,
            message: None,
        }
    }

    pub fn put_request(key: Key, value: Value) -> KVMessage {
        KVMessage {
            key: Some(key),
            value: Some(value),
            ..Self::new(MessageType::PutRequest)
        }
    }

    pub fn get_request(key: Key) -> KVMessage {
        KVMessage {
            key: Some(key),
            ..Self::new(MessageType::GetRequest)
        }
    }

    pub fn del_request(key: Key) -> KVMessage {
        KVMessage {
            key: Some(key),
            ..Self::new(MessageType::DelRequest)
        }
    }

    /// A successful reply to a get request.
    pub fn value_response(key: Key, value: Value) -> KVMessage {
        KVMessage {
            key: Some(key),
            value: Some(value),
            ..Self::new(MessageType::Response)
        }
    }

    /// A reply carrying status text, e.g. [SUCCESS](crate::error::SUCCESS).
    pub fn message_response(message: impl Into<String>) -> KVMessage {
        KVMessage {
            message: Some(message.into()),
            ..Self::new(MessageType::Response)
        }
    }

    pub fn error_response(error: &KVError) -> KVMessage {
        Self::message_response(error.to_string())
    }

    pub fn register(node_info: impl Into<String>) -> KVMessage {
        KVMessage {
            message: Some(node_info.into()),
            ..Self::new(MessageType::Register)
        }
    }

    pub fn ready() -> KVMessage {
        Self::new(MessageType::Ready)
    }

    pub fn commit() -> KVMessage {
        Self::new(MessageType::Commit)
    }

    pub fn abort(reason: Option<String>) -> KVMessage {
        KVMessage {
            message: reason,
            ..Self::new(MessageType::Abort)
        }
    }

    pub fn ack() -> KVMessage {
        Self::new(MessageType::Ack)
    }

    pub fn msg_type(&self) -> MessageType {
        self.msg_type
    }

    pub fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn into_key_value(self) -> (Option<Key>, Option<Value>) {
        (self.key, self.value)
    }

    /// If this is a `Response` carrying anything other than a value or a [SUCCESS](crate::error::SUCCESS) text,
    /// the error it reports.
    pub fn response_error(&self) -> Option<KVError> {
        match (self.msg_type, &self.message) {
            (MessageType::Response, Some(text)) if text != crate::error::SUCCESS => {
                Some(KVError::from_message(text))
            }
            _ => None,
        }
    }

    /// Check field presence against the schema.
    pub fn validate(&self) -> Result<(), KVError> {
        let has_key = self.key.is_some();
        let has_value = self.value.is_some();
        let has_message = self.message.is_some();

        let well_formed = match self.msg_type {
            MessageType::PutRequest => has_key && has_value && !has_message,
            MessageType::GetRequest | MessageType::DelRequest => has_key && !has_value && !has_message,
            MessageType::Response => (has_key && has_value && !has_message) || (!has_key && !has_value && has_message),
            MessageType::Register => !has_key && !has_value && has_message,
            MessageType::Ready | MessageType::Commit | MessageType::Ack => !has_key && !has_value && !has_message,
            MessageType::Abort => !has_key && !has_value,
        };

        if well_formed {
            Ok(())
        } else {
            Err(KVError::InvalidFormat)
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, KVError> {
        self.validate()?;
        self.try_to_vec().map_err(|_| KVError::Parser)
    }

    pub fn decode(bytes: &[u8]) -> Result<KVMessage, KVError> {
        let msg = KVMessage::try_from_slice(bytes).map_err(|_| KVError::Parser)?;
        msg.validate()?;
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_rejects_missing_and_extra_fields() {
        let put_without_value = KVMessage {
            key: Some(b"k".to_vec()),
            ..KVMessage::new(MessageType::PutRequest)
        };
        assert_eq!(put_without_value.validate(), Err(KVError::InvalidFormat));

        let get_with_value = KVMessage {
            key: Some(b"k".to_vec()),
            value: Some(b"v".to_vec()),
            ..KVMessage::new(MessageType::GetRequest)
        };
        assert_eq!(get_with_value.validate(), Err(KVError::InvalidFormat));

        let response_with_everything = KVMessage {
            key: Some(b"k".to_vec()),
            value: Some(b"v".to_vec()),
            message: Some("m".to_string()),
            ..KVMessage::new(MessageType::Response)
        };
        assert_eq!(response_with_everything.validate(), Err(KVError::InvalidFormat));

        let ready_with_message = KVMessage {
            message: Some("m".to_string()),
            ..KVMessage::new(MessageType::Ready)
        };
        assert_eq!(ready_with_message.validate(), Err(KVError::InvalidFormat));

        assert!(KVMessage::abort(Some("rejected".to_string())).validate().is_ok());
        assert!(KVMessage::abort(None).validate().is_ok());
    }

    #[test]
    fn decode_reports_parser_error_for_garbage() {
        assert_eq!(KVMessage::decode(&[0xff, 0x01, 0x02]), Err(KVError::Parser));
        assert_eq!(KVMessage::decode(&[]), Err(KVError::Parser));
    }

    #[test]
    fn decode_checks_schema_after_parsing() {
        let bytes = KVMessage {
            key: Some(b"k".to_vec()),
            ..KVMessage::new(MessageType::Register)
        }
        .try_to_vec()
        .unwrap();
        assert_eq!(KVMessage::decode(&bytes), Err(KVError::InvalidFormat));
    }

    #[test]
    fn error_responses_carry_their_variant() {
        let reply = KVMessage::decode(&KVMessage::error_response(&KVError::NoSuchKey).encode().unwrap()).unwrap();
        assert_eq!(reply.response_error(), Some(KVError::NoSuchKey));
        assert_eq!(KVMessage::message_response(crate::error::SUCCESS).response_error(), None);
        assert_eq!(KVMessage::value_response(b"k".to_vec(), b"v".to_vec()).response_error(), None);
    }
}
