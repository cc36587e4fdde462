use grpc_service::grpc_protocol;
use std::fmt::{Display, Formatter};

/// A single text payload exchanged with the hello service.
///
/// Messages carry no identity beyond their payload.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Message {
    payload: String,
}

impl Message {
    pub fn new<S: Into<String>>(payload: S) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn into_payload(self) -> String {
        self.payload
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.payload)
    }
}

impl From<grpc_protocol::Text> for Message {
    fn from(message: grpc_protocol::Text) -> Self {
        Self::new(message.value)
    }
}

impl From<Message> for grpc_protocol::Text {
    fn from(message: Message) -> Self {
        grpc_protocol::Text {
            value: message.payload,
        }
    }
}
