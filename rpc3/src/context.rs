use serde::{Deserialize, Serialize};
use serde_inline_default::serde_inline_default;

use crate::{
    NetworkId,
    error::Result,
    transport::{PacketPriority, PacketReliability, SendParams, SystemAddress},
};

/// Sticky defaults applied to every outgoing call and signal.
///
/// Setters on [`crate::Rpc`] change these values; sending reads them and
/// leaves them as they are.
#[serde_inline_default]
#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone)]
pub struct OutgoingConfig {
    /// Timestamp prefixed to frames; 0 sends none.
    #[serde_inline_default(0)]
    pub timestamp: u64,
    #[serde_inline_default(PacketPriority::High)]
    pub priority: PacketPriority,
    #[serde_inline_default(PacketReliability::ReliableOrdered)]
    pub reliability: PacketReliability,
    #[serde_inline_default(0)]
    pub ordering_channel: u8,
    /// Single target, or the peer to skip when broadcasting.
    #[serde_inline_default(SystemAddress::UNASSIGNED)]
    pub recipient: SystemAddress,
    #[serde_inline_default(true)]
    pub broadcast: bool,
    /// Object a call is addressed to. Ignored by signals.
    #[serde_inline_default(NetworkId::UNASSIGNED)]
    pub recipient_object: NetworkId,
}

impl Default for OutgoingConfig {
    fn default() -> Self {
        serde_json::from_value(serde_json::Value::Object(serde_json::Map::default())).unwrap()
    }
}

impl OutgoingConfig {
    /// # Errors
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    #[must_use]
    pub fn send_params(&self) -> SendParams {
        SendParams {
            priority: self.priority,
            reliability: self.reliability,
            ordering_channel: self.ordering_channel,
        }
    }
}

/// What the most recent inbound dispatch looked like.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IncomingContext {
    pub last_sender: SystemAddress,
    pub last_timestamp: u64,
    /// Identifier being dispatched right now, empty when idle.
    pub current_execution: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OutgoingConfig::default();
        assert_eq!(config.timestamp, 0);
        assert_eq!(config.priority, PacketPriority::High);
        assert_eq!(config.reliability, PacketReliability::ReliableOrdered);
        assert_eq!(config.ordering_channel, 0);
        assert_eq!(config.recipient, SystemAddress::UNASSIGNED);
        assert!(config.broadcast);
        assert_eq!(config.recipient_object, NetworkId::UNASSIGNED);
    }

    #[test]
    fn test_from_json() {
        let config = OutgoingConfig::from_json(
            r#"{"priority": "Low", "broadcast": false, "recipient": "127.0.0.1:9000"}"#,
        )
        .unwrap();
        assert_eq!(config.priority, PacketPriority::Low);
        assert!(!config.broadcast);
        assert_eq!(config.recipient.to_string(), "127.0.0.1:9000");
        assert_eq!(config.send_params().reliability, PacketReliability::ReliableOrdered);

        assert!(OutgoingConfig::from_json(r#"{"priority": "Urgent"}"#).is_err());
    }
}
