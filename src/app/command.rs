//! Wire vocabulary: the one-byte LED command and the client acknowledgement.
//!
//! | Direction       | Payload        | Meaning                         |
//! |-----------------|----------------|---------------------------------|
//! | server → client | `'1'`          | turn LED on                     |
//! | server → client | `'0'`          | turn LED off                    |
//! | client → server | `"LED ON ACK"` | client LED is on                |
//! | client → server | anything else  | client LED is off               |

/// Exact positive acknowledgement (byte-exact, case-sensitive, no trimming).
pub const LED_ON_ACK: &[u8] = b"LED ON ACK";

/// Command forwarded to the client on each debounced press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandValue {
    On = b'1',
    Off = b'0',
}

impl CommandValue {
    /// The single byte sent on the wire.
    pub const fn wire_byte(self) -> u8 {
        self as u8
    }

    pub fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            b'1' => Some(Self::On),
            b'0' => Some(Self::Off),
            _ => None,
        }
    }
}

/// Locally mirrored LED state, derived from the last acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LedState {
    On,
    #[default]
    Off,
}

impl LedState {
    /// The command a press issues: always the opposite of the mirrored state.
    pub const fn toggle_command(self) -> CommandValue {
        match self {
            Self::On => CommandValue::Off,
            Self::Off => CommandValue::On,
        }
    }
}

/// Interpret an acknowledgement payload.
///
/// The payload is bounded at the first NUL byte, mirroring a terminated
/// string; everything after it is ignored.
pub fn parse_ack(payload: &[u8]) -> LedState {
    let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
    if &payload[..end] == LED_ON_ACK {
        LedState::On
    } else {
        LedState::Off
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_bytes_are_ascii_digits() {
        assert_eq!(CommandValue::On.wire_byte(), b'1');
        assert_eq!(CommandValue::Off.wire_byte(), b'0');
        assert_eq!(CommandValue::from_wire(b'1'), Some(CommandValue::On));
        assert_eq!(CommandValue::from_wire(b'x'), None);
    }

    #[test]
    fn press_toggles_mirrored_state() {
        assert_eq!(LedState::Off.toggle_command(), CommandValue::On);
        assert_eq!(LedState::On.toggle_command(), CommandValue::Off);
        assert_eq!(LedState::default(), LedState::Off);
    }

    #[test]
    fn exact_ack_is_on() {
        assert_eq!(parse_ack(b"LED ON ACK"), LedState::On);
    }

    #[test]
    fn near_misses_are_off() {
        assert_eq!(parse_ack(b"LED ON ACK "), LedState::Off);
        assert_eq!(parse_ack(b"led on ack"), LedState::Off);
        assert_eq!(parse_ack(b" LED ON ACK"), LedState::Off);
        assert_eq!(parse_ack(b"LED OFF ACK"), LedState::Off);
        assert_eq!(parse_ack(b""), LedState::Off);
    }

    #[test]
    fn nul_terminates_payload() {
        assert_eq!(parse_ack(b"LED ON ACK\0garbage"), LedState::On);
        assert_eq!(parse_ack(b"LED\0 ON ACK"), LedState::Off);
    }
}
