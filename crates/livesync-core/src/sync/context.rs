//! Connection context
//!
//! Snapshot of transport state for one sync session. Strategies receive a
//! clone, return a replacement, and never edit the committed value in place.

use super::polling::PollingHandle;
use super::socket::SocketHandle;
use crate::models::TransportMode;

/// Transport state threaded through every strategy call
#[derive(Debug, Clone, Default)]
pub struct ConnectionContext {
    /// Transports still worth trying, in priority order
    pub modes: Vec<TransportMode>,
    /// Live socket, if one has been opened
    pub socket: Option<SocketHandle>,
    /// Running polling loop, if one has been scheduled
    pub polling: Option<PollingHandle>,
    /// Number of sockets opened this session
    pub connection_attempts: u32,
    /// Number of sockets closed by the server or the network
    pub closures: u32,
    /// Socket transport disabled after too many closures
    pub banned: bool,
}

impl ConnectionContext {
    /// Create a context trying the given modes in order
    ///
    /// Duplicate modes keep their first position.
    pub fn new(modes: impl IntoIterator<Item = TransportMode>) -> Self {
        let mut unique = Vec::new();
        for mode in modes {
            if !unique.contains(&mode) {
                unique.push(mode);
            }
        }

        Self {
            modes: unique,
            ..Self::default()
        }
    }

    /// Check whether a mode is still a candidate
    pub fn is_viable(&self, mode: TransportMode) -> bool {
        self.modes.contains(&mode)
    }

    /// Drop a mode for the rest of the session, returning whether it was present
    pub fn remove_mode(&mut self, mode: TransportMode) -> bool {
        let before = self.modes.len();
        self.modes.retain(|m| *m != mode);
        before != self.modes.len()
    }

    /// Socket handle, only if the socket is still open
    pub fn open_socket(&self) -> Option<&SocketHandle> {
        self.socket.as_ref().filter(|socket| socket.is_open())
    }

    /// Polling handle, only if the loop is still running
    pub fn active_polling(&self) -> Option<&PollingHandle> {
        self.polling.as_ref().filter(|handle| handle.is_active())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_dedupes_modes() {
        let ctx = ConnectionContext::new([
            TransportMode::Socket,
            TransportMode::Polling,
            TransportMode::Socket,
        ]);
        assert_eq!(ctx.modes, vec![TransportMode::Socket, TransportMode::Polling]);
        assert_eq!(ctx.connection_attempts, 0);
        assert!(!ctx.banned);
    }

    #[test]
    fn test_remove_mode() {
        let mut ctx = ConnectionContext::new([TransportMode::Socket, TransportMode::Polling]);
        assert!(ctx.remove_mode(TransportMode::Socket));
        assert!(!ctx.remove_mode(TransportMode::Socket));
        assert!(!ctx.is_viable(TransportMode::Socket));
        assert!(ctx.is_viable(TransportMode::Polling));
    }

    #[test]
    fn test_no_handles_by_default() {
        let ctx = ConnectionContext::new([TransportMode::Polling]);
        assert!(ctx.open_socket().is_none());
        assert!(ctx.active_polling().is_none());
    }
}
