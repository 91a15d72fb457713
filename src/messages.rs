//! Wire envelopes and typed request/response payloads
//!
//! Every frame is `{"type": ..., "conv": ..., "data": {...}}`. Inbound
//! frames are decoded in two steps: the envelope first, then `data` into the
//! variant selected by `type`. Unknown types and malformed payloads are
//! `Validation` errors, never connection aborts.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::core_types::ExchangeId;
use crate::error::HubError;
use crate::models::{Answer, FailedOffer, Offer};

/// Envelope type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    // Inbound
    CreateResponder,
    CreateInitiator,
    OfferAnswer,
    RejectExchange,
    DeleteResponder,
    DeleteInitiator,

    // Outbound
    Offer,
    OfferFailed,
    AgreementAnswer,
    Info,
    Error,
}

/// Outbound envelope as written to a connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub conv: String,
    pub data: Value,
}

/// Inbound envelope before the payload is interpreted
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub conv: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl InboundEnvelope {
    pub fn parse(text: &str) -> Result<Self, HubError> {
        serde_json::from_str(text)
            .map_err(|e| HubError::Validation(format!("malformed envelope: {e}")))
    }
}

// ============================================================================
// Inbound requests
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CreateResponderRequest {
    pub name: String,
    #[serde(
        default,
        rename = "accesskeys",
        alias = "accesskey",
        deserialize_with = "one_or_many"
    )]
    pub access_keys: Vec<String>,
    #[serde(default, rename = "managementkey")]
    pub management_key: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateInitiatorRequest {
    pub name: String,
    #[serde(rename = "targetname")]
    pub target_name: String,
    #[serde(default, rename = "targetaccesskey")]
    pub target_access_key: String,
    #[serde(default, rename = "managementkey")]
    pub management_key: String,
    pub sdp: String,
    #[serde(default, rename = "ignoreiftargetmissing")]
    pub ignore_if_target_missing: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AcceptExchangeRequest {
    #[serde(rename = "exchangeid", alias = "offerid", alias = "offerID")]
    pub exchange_id: String,
    pub sdp: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RejectExchangeRequest {
    #[serde(rename = "exchangeid", alias = "offerid", alias = "offerID")]
    pub exchange_id: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteResponderRequest {
    pub name: String,
    #[serde(default, rename = "managementkey")]
    pub management_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteInitiatorRequest {
    pub name: String,
    #[serde(rename = "targetname")]
    pub target_name: String,
    #[serde(default, rename = "managementkey")]
    pub management_key: String,
}

/// One decoded inbound request
#[derive(Debug, Clone)]
pub enum Request {
    CreateResponder(CreateResponderRequest),
    CreateInitiator(CreateInitiatorRequest),
    AcceptExchange(AcceptExchangeRequest),
    RejectExchange(RejectExchangeRequest),
    DeleteResponder(DeleteResponderRequest),
    DeleteInitiator(DeleteInitiatorRequest),
}

impl Request {
    /// Decode `data` into the variant selected by `kind`
    pub fn decode(kind: &str, data: Value) -> Result<Self, HubError> {
        let kind: MessageType = serde_json::from_value(Value::String(kind.to_string()))
            .map_err(|_| HubError::Validation(format!("unsupported message type: {kind}")))?;

        let request = match kind {
            MessageType::CreateResponder => Request::CreateResponder(payload(kind, data)?),
            MessageType::CreateInitiator => Request::CreateInitiator(payload(kind, data)?),
            MessageType::OfferAnswer => Request::AcceptExchange(payload(kind, data)?),
            MessageType::RejectExchange => Request::RejectExchange(payload(kind, data)?),
            MessageType::DeleteResponder => Request::DeleteResponder(payload(kind, data)?),
            MessageType::DeleteInitiator => Request::DeleteInitiator(payload(kind, data)?),
            other => {
                return Err(HubError::Validation(format!(
                    "message type {other:?} is outbound only"
                )));
            }
        };
        Ok(request)
    }

    pub fn kind(&self) -> MessageType {
        match self {
            Request::CreateResponder(_) => MessageType::CreateResponder,
            Request::CreateInitiator(_) => MessageType::CreateInitiator,
            Request::AcceptExchange(_) => MessageType::OfferAnswer,
            Request::RejectExchange(_) => MessageType::RejectExchange,
            Request::DeleteResponder(_) => MessageType::DeleteResponder,
            Request::DeleteInitiator(_) => MessageType::DeleteInitiator,
        }
    }
}

fn payload<T: for<'de> Deserialize<'de>>(kind: MessageType, data: Value) -> Result<T, HubError> {
    serde_json::from_value(data)
        .map_err(|e| HubError::Validation(format!("invalid {kind:?} payload: {e}")))
}

/// Access keys arrive either as one string or as a list
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(key)) if key.is_empty() => Vec::new(),
        Some(OneOrMany::One(key)) => vec![key],
        Some(OneOrMany::Many(keys)) => keys,
    })
}

// ============================================================================
// Outbound messages
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InfoMessage {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorMessage {
    pub message: String,
    pub code: String,
    #[serde(rename = "exchangeid", skip_serializing_if = "Option::is_none")]
    pub exchange_id: Option<ExchangeId>,
}

impl ErrorMessage {
    pub fn from_error(err: &HubError) -> Self {
        Self {
            message: err.to_string(),
            code: err.code().to_string(),
            exchange_id: None,
        }
    }

    /// Rejection of an exchange, carrying the responder's reason verbatim
    pub fn rejected(exchange_id: ExchangeId, reason: &str) -> Self {
        Self {
            message: reason.to_string(),
            code: "REJECTED".to_string(),
            exchange_id: Some(exchange_id),
        }
    }
}

/// Typed outbound payload
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Offer(Offer),
    OfferFailed(FailedOffer),
    AgreementAnswer(Answer),
    Info(InfoMessage),
    Error(ErrorMessage),
}

impl OutboundMessage {
    pub fn info(message: impl Into<String>) -> Self {
        OutboundMessage::Info(InfoMessage {
            message: message.into(),
        })
    }

    pub fn kind(&self) -> MessageType {
        match self {
            OutboundMessage::Offer(_) => MessageType::Offer,
            OutboundMessage::OfferFailed(_) => MessageType::OfferFailed,
            OutboundMessage::AgreementAnswer(_) => MessageType::AgreementAnswer,
            OutboundMessage::Info(_) => MessageType::Info,
            OutboundMessage::Error(_) => MessageType::Error,
        }
    }

    pub fn into_envelope(self, conv: String) -> Result<Envelope, serde_json::Error> {
        let kind = self.kind();
        let data = match self {
            OutboundMessage::Offer(m) => serde_json::to_value(m)?,
            OutboundMessage::OfferFailed(m) => serde_json::to_value(m)?,
            OutboundMessage::AgreementAnswer(m) => serde_json::to_value(m)?,
            OutboundMessage::Info(m) => serde_json::to_value(m)?,
            OutboundMessage::Error(m) => serde_json::to_value(m)?,
        };
        Ok(Envelope { kind, conv, data })
    }
}
