//! Personnel and client records.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// A person distributed from the server to its clients.
///
/// `ssn` is the natural key: at most one record per ssn exists in any
/// repository. `id` is assigned by whichever repository stores the record
/// and carries no meaning across repositories.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PersonnelRecord {
    /// Repository-assigned identifier (0 until stored).
    #[serde(default)]
    pub id: u64,
    /// Given name.
    pub name: String,
    /// Family name.
    pub surname: String,
    /// Social security number, unique per record.
    pub ssn: String,
}

impl PersonnelRecord {
    /// Creates a record that has not been stored yet.
    pub fn new(name: impl Into<String>, surname: impl Into<String>, ssn: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            surname: surname.into(),
            ssn: ssn.into(),
        }
    }

    /// Returns a copy carrying the given id.
    #[must_use]
    pub fn with_id(mut self, id: u64) -> Self {
        self.id = id;
        self
    }

    /// Returns true if both records describe the same person with the same
    /// fields, ignoring the repository id.
    pub fn same_content(&self, other: &Self) -> bool {
        self.name == other.name && self.surname == other.surname && self.ssn == other.ssn
    }
}

impl fmt::Display for PersonnelRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.name, self.surname, self.ssn)
    }
}

/// A reachable client as seen by the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientRecord {
    /// Display index; unique among live clients.
    pub id: u64,
    /// Display name derived from the index (`Client<id>`).
    pub display_name: String,
    /// Peer host.
    pub host: String,
    /// Peer port.
    pub port: u16,
}

impl ClientRecord {
    /// Creates a record for the given display index and peer address.
    pub fn new(id: u64, addr: SocketAddr) -> Self {
        Self {
            id,
            display_name: Self::display_name_for(id),
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }

    /// Display name used for a given index.
    pub fn display_name_for(id: u64) -> String {
        format!("Client{id}")
    }

    /// Returns the peer address, if `host` parses as an IP address.
    pub fn addr(&self) -> Option<SocketAddr> {
        self.host
            .parse::<std::net::IpAddr>()
            .ok()
            .map(|ip| SocketAddr::new(ip, self.port))
    }
}

impl fmt::Display for ClientRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}:{}", self.display_name, self.host, self.port)
    }
}
