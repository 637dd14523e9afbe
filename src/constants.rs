//! Application-wide constants for peerchat.
//!
//! Centralizes the wire limits and default rendezvous point so the codec,
//! the socket layer and the configuration agree on them.

// ============================================================================
// Network
// ============================================================================

/// Host both roles use when nothing else is configured.
pub const DEFAULT_HOST: &str = "localhost";

/// Port both roles use when nothing else is configured.
pub const DEFAULT_PORT: u16 = 1500;

// ============================================================================
// Wire protocol
// ============================================================================

/// Size of the big-endian length prefix in front of every message.
pub const LENGTH_PREFIX_SIZE: usize = 2;

/// Largest encoded message body a frame can carry.
///
/// Bounded by the 2-byte length prefix.
pub const MAX_MESSAGE_LEN: usize = u16::MAX as usize;

/// Read buffer for the receive loop.
///
/// Large enough to pull one maximum-size frame in a single read.
pub const READ_BUFFER_SIZE: usize = LENGTH_PREFIX_SIZE + MAX_MESSAGE_LEN;

// ============================================================================
// Chat log
// ============================================================================

/// Prefix for connection status lines in the chat log.
pub const STATUS_LINE_PREFIX: &str = "Message: ";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_message_len_fits_length_prefix() {
        assert_eq!(MAX_MESSAGE_LEN, 65535);
        assert!(u16::try_from(MAX_MESSAGE_LEN).is_ok());
    }

    #[test]
    fn test_read_buffer_holds_a_full_frame() {
        assert!(READ_BUFFER_SIZE >= LENGTH_PREFIX_SIZE + MAX_MESSAGE_LEN);
    }
}
