//! Wire layout and codec for the four-step timing exchange packet.
//!
//! One UDP datagram carries exactly one [`Packet`], 28 bytes, little-endian,
//! with no version byte and no framing beyond UDP's own.

use thiserror::Error;

/// Length in bytes of the packet on the wire.
pub const WIRE_LEN: usize = 28;

/// A single step of the four-step timing exchange.
///
/// Field order matches the wire layout exactly; `encode`/`decode` do not
/// reorder fields.
#[cfg_attr(feature = "fuzz", derive(arbitrary::Arbitrary))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Packet {
    /// Nanoseconds since the initiator's epoch when it first sent this packet.
    pub initiator_time: i64,
    /// Nanoseconds since the receiver's epoch when it first saw this packet.
    pub receiver_time: i64,
    /// Nanoseconds the initiator measured between send and first response.
    pub initiator_round_trip_time: i32,
    /// Nanoseconds the receiver measured between its timestamp and the next packet it received.
    pub receiver_round_trip_time: i32,
    /// Step counter, 0..=4. Values 0 and 1 are outbound; 2, 3, 4 carry enough
    /// data to derive an offset.
    pub package_nr: i32,
}

/// Why a datagram could not be decoded into a [`Packet`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The datagram was not exactly [`WIRE_LEN`] bytes.
    #[error("expected a {WIRE_LEN}-byte packet, got {actual} bytes")]
    WrongLength {
        /// The length of the offending datagram.
        actual: usize,
    },
}

impl Packet {
    /// Build a fresh state-0 initiation packet: `package_nr = 0`,
    /// `initiator_time = now`, every other field zeroed.
    pub fn fresh(now: i64) -> Packet {
        Packet {
            initiator_time: now,
            package_nr: 0,
            ..Packet::default()
        }
    }

    /// Encode this packet into its 28-byte little-endian wire form.
    pub fn encode(&self) -> [u8; WIRE_LEN] {
        let mut buf = [0u8; WIRE_LEN];
        buf[0..8].copy_from_slice(&self.initiator_time.to_le_bytes());
        buf[8..16].copy_from_slice(&self.receiver_time.to_le_bytes());
        buf[16..20].copy_from_slice(&self.initiator_round_trip_time.to_le_bytes());
        buf[20..24].copy_from_slice(&self.receiver_round_trip_time.to_le_bytes());
        buf[24..28].copy_from_slice(&self.package_nr.to_le_bytes());
        buf
    }

    /// Decode a datagram into a [`Packet`]. Returns [`DecodeError::WrongLength`]
    /// for anything other than exactly [`WIRE_LEN`] bytes; the caller (the
    /// reactor) is responsible for logging and dropping such datagrams.
    pub fn decode(bytes: &[u8]) -> Result<Packet, DecodeError> {
        if bytes.len() != WIRE_LEN {
            return Err(DecodeError::WrongLength {
                actual: bytes.len(),
            });
        }

        let mut initiator_time = [0u8; 8];
        let mut receiver_time = [0u8; 8];
        let mut initiator_round_trip_time = [0u8; 4];
        let mut receiver_round_trip_time = [0u8; 4];
        let mut package_nr = [0u8; 4];

        initiator_time.copy_from_slice(&bytes[0..8]);
        receiver_time.copy_from_slice(&bytes[8..16]);
        initiator_round_trip_time.copy_from_slice(&bytes[16..20]);
        receiver_round_trip_time.copy_from_slice(&bytes[20..24]);
        package_nr.copy_from_slice(&bytes[24..28]);

        Ok(Packet {
            initiator_time: i64::from_le_bytes(initiator_time),
            receiver_time: i64::from_le_bytes(receiver_time),
            initiator_round_trip_time: i32::from_le_bytes(initiator_round_trip_time),
            receiver_round_trip_time: i32::from_le_bytes(receiver_round_trip_time),
            package_nr: i32::from_le_bytes(package_nr),
        })
    }
}

/// Derive a signed nanosecond offset (`local - remote`) from a packet that
/// has reached a derivable state (2, 3, or 4). Returns `None` for any other
/// `package_nr`.
///
/// States 3 and 4 carry the same magnitude but opposite sign, since each
/// side computes "offset" from its own viewpoint; state 4's result is
/// negated to align both sides to "local minus remote".
pub fn derive_offset(packet: &Packet) -> Option<i32> {
    // All arithmetic happens in i64 and is only narrowed to i32 at the very
    // end, so the half-RTT subtraction can't overflow before truncation.
    match packet.package_nr {
        2 => {
            let half_rtt = (packet.initiator_round_trip_time / 2) as i64;
            let offset = packet.receiver_time - packet.initiator_time - half_rtt;
            Some(offset as i32)
        }
        3 => {
            let half_rtt = (packet.receiver_round_trip_time / 2) as i64;
            let offset = packet.initiator_time + packet.initiator_round_trip_time as i64
                - packet.receiver_time
                - half_rtt;
            Some(offset as i32)
        }
        4 => {
            let half_rtt = (packet.receiver_round_trip_time / 2) as i64;
            let offset = packet.initiator_time + packet.initiator_round_trip_time as i64
                - packet.receiver_time
                - half_rtt;
            Some((-offset) as i32)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let packet = Packet {
            initiator_time: 1_700_000_000_000_000_000,
            receiver_time: 1_700_000_000_000_500_000,
            initiator_round_trip_time: 250_000,
            receiver_round_trip_time: 125_000,
            package_nr: 3,
        };

        assert_eq!(Packet::decode(&packet.encode()).unwrap(), packet);
    }

    #[test]
    fn rejects_wrong_length() {
        assert_eq!(
            Packet::decode(&[0u8; WIRE_LEN - 1]),
            Err(DecodeError::WrongLength {
                actual: WIRE_LEN - 1
            })
        );
        assert_eq!(
            Packet::decode(&[0u8; WIRE_LEN + 1]),
            Err(DecodeError::WrongLength {
                actual: WIRE_LEN + 1
            })
        );
    }

    #[test]
    fn fresh_is_state_zero() {
        let packet = Packet::fresh(42);
        assert_eq!(packet.package_nr, 0);
        assert_eq!(packet.initiator_time, 42);
        assert_eq!(packet.receiver_time, 0);
    }

    #[test]
    fn derive_offset_only_on_states_2_3_4() {
        for nr in 0..2 {
            let mut p = Packet::default();
            p.package_nr = nr;
            assert_eq!(derive_offset(&p), None);
        }
        for nr in 2..=4 {
            let mut p = Packet::default();
            p.package_nr = nr;
            assert!(derive_offset(&p).is_some());
        }
        let mut p = Packet::default();
        p.package_nr = 5;
        assert_eq!(derive_offset(&p), None);
    }

    #[test]
    fn state_3_and_4_are_sign_flipped() {
        let mut p3 = Packet {
            initiator_time: 1_000_000_000,
            receiver_time: 1_000_000_500,
            initiator_round_trip_time: 1000,
            receiver_round_trip_time: 400,
            package_nr: 3,
        };
        let mut p4 = p3;
        p4.package_nr = 4;

        let o3 = derive_offset(&p3).unwrap();
        let o4 = derive_offset(&p4).unwrap();
        assert_eq!(o3, -o4);

        // sanity: changing a field doesn't break the relationship
        p3.receiver_round_trip_time = 900;
        p4.receiver_round_trip_time = 900;
        assert_eq!(derive_offset(&p3).unwrap(), -derive_offset(&p4).unwrap());
    }
}
