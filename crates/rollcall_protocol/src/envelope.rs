//! Application message envelope.

use crate::error::{ProtocolError, ProtocolResult};
use crate::record::PersonnelRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Action carried by an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Upsert one record.
    Save,
    /// Remove one record by ssn.
    Delete,
    /// Upsert every record in the payload, in order.
    SaveAll,
    /// Remove every record.
    DeleteAll,
}

impl Action {
    /// All actions, in wire-code order.
    pub const ALL: [Action; 4] = [
        Action::Save,
        Action::Delete,
        Action::SaveAll,
        Action::DeleteAll,
    ];

    /// Returns the wire name of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Save => "SAVE",
            Action::Delete => "DELETE",
            Action::SaveAll => "SAVE_ALL",
            Action::DeleteAll => "DELETE_ALL",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownAction(s.to_string()))
    }
}

/// The decrypted logical message: one action and its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// Upsert one record.
    Save(PersonnelRecord),
    /// Remove the record with this ssn.
    Delete {
        /// Social security number of the record to remove.
        ssn: String,
    },
    /// Upsert every record, in order.
    SaveAll(Vec<PersonnelRecord>),
    /// Remove every record.
    DeleteAll,
}

/// Payload of a `DELETE` envelope.
#[derive(Serialize, Deserialize)]
struct SsnOnly {
    ssn: String,
}

/// Wire shape shared by all envelopes. Field order is fixed and payload
/// objects are emitted with sorted keys, so a given envelope always
/// produces the same text.
#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    personnel: Option<serde_json::Value>,
}

impl Envelope {
    /// Returns the action of this envelope.
    pub fn action(&self) -> Action {
        match self {
            Envelope::Save(_) => Action::Save,
            Envelope::Delete { .. } => Action::Delete,
            Envelope::SaveAll(_) => Action::SaveAll,
            Envelope::DeleteAll => Action::DeleteAll,
        }
    }

    /// Number of personnel records carried (or addressed) by this envelope.
    pub fn record_count(&self) -> usize {
        match self {
            Envelope::Save(_) | Envelope::Delete { .. } => 1,
            Envelope::SaveAll(records) => records.len(),
            Envelope::DeleteAll => 0,
        }
    }

    /// Serializes to the canonical JSON text.
    pub fn to_json(&self) -> ProtocolResult<Vec<u8>> {
        let personnel = match self {
            Envelope::Save(record) => Some(serde_json::to_value(record)),
            Envelope::Delete { ssn } => Some(serde_json::to_value(SsnOnly { ssn: ssn.clone() })),
            Envelope::SaveAll(records) => Some(serde_json::to_value(records)),
            Envelope::DeleteAll => None,
        }
        .transpose()
        .map_err(|e| ProtocolError::encode(e.to_string()))?;

        let wire = WireEnvelope {
            action: self.action().as_str().to_string(),
            personnel,
        };
        serde_json::to_vec(&wire).map_err(|e| ProtocolError::encode(e.to_string()))
    }

    /// Parses the canonical JSON text.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::Decode`] if the text is not an envelope or the
    ///   payload does not match the action's shape
    /// - [`ProtocolError::UnknownAction`] if the action is not recognised
    pub fn from_json(bytes: &[u8]) -> ProtocolResult<Self> {
        let wire: WireEnvelope =
            serde_json::from_slice(bytes).map_err(|e| ProtocolError::decode(e.to_string()))?;
        let action: Action = wire.action.parse()?;

        let payload = |wire: Option<serde_json::Value>| {
            wire.ok_or_else(|| ProtocolError::decode(format!("{action} requires a payload")))
        };

        match action {
            Action::Save => {
                let record = serde_json::from_value(payload(wire.personnel)?)
                    .map_err(|e| ProtocolError::decode(format!("SAVE payload: {e}")))?;
                Ok(Envelope::Save(record))
            }
            Action::Delete => {
                let SsnOnly { ssn } = serde_json::from_value(payload(wire.personnel)?)
                    .map_err(|e| ProtocolError::decode(format!("DELETE payload: {e}")))?;
                Ok(Envelope::Delete { ssn })
            }
            Action::SaveAll => {
                let records = serde_json::from_value(payload(wire.personnel)?)
                    .map_err(|e| ProtocolError::decode(format!("SAVE_ALL payload: {e}")))?;
                Ok(Envelope::SaveAll(records))
            }
            Action::DeleteAll => Ok(Envelope::DeleteAll),
        }
    }
}
