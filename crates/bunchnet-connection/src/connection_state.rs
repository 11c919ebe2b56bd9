/// Connection lifecycle state.
///
/// `Closed` is terminal: a closed connection is never reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not initialised.
    #[default]
    Invalid,

    /// Waiting for the control channel to be opened and acknowledged.
    Pending,

    /// Control channel is up; data may flow on any channel.
    Open,

    /// Closed locally, by the remote end or by timeout.
    Closed,
}

impl ConnectionState {
    /// Returns true if channels may still send bunches.
    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionState::Pending | ConnectionState::Open)
    }

    /// Returns true once the connection is fully established.
    pub fn is_established(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    /// Returns true once the connection is closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_invalid() {
        let state = ConnectionState::default();
        assert_eq!(state, ConnectionState::Invalid);
        assert!(!state.is_active());
    }

    #[test]
    fn test_state_predicates() {
        assert!(ConnectionState::Pending.is_active());
        assert!(!ConnectionState::Pending.is_established());
        assert!(ConnectionState::Open.is_active());
        assert!(ConnectionState::Open.is_established());
        assert!(ConnectionState::Closed.is_closed());
        assert!(!ConnectionState::Closed.is_active());
    }
}
