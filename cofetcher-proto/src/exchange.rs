//! The four-step exchange state machine.
//!
//! `advance` mutates a [`Packet`] in place according to its current
//! `package_nr`, and reports whether the caller must send a reply.

use crate::packet::Packet;

/// Advance `packet` by one step. Returns `true` if the caller must reply
/// with the (now-mutated) packet, `false` otherwise.
///
/// | state in | role     | action                                   | reply |
/// |----------|----------|-------------------------------------------|-------|
/// | 0        | receiver | stamp `receiver_time = now`                | yes   |
/// | 1        | initiator| stamp `initiator_round_trip_time`          | yes   |
/// | 2        | receiver | stamp `receiver_round_trip_time`           | yes   |
/// | 3        | either   | increment only                             | no    |
/// | >=4      | -        | drop                                        | no    |
pub fn advance(packet: &mut Packet, now: i64) -> bool {
    match packet.package_nr {
        0 => {
            packet.receiver_time = now;
            packet.package_nr += 1;
            true
        }
        1 => {
            packet.initiator_round_trip_time = (now - packet.initiator_time) as i32;
            packet.package_nr += 1;
            true
        }
        2 => {
            packet.receiver_round_trip_time = (now - packet.receiver_time) as i32;
            packet.package_nr += 1;
            true
        }
        3 => {
            packet.package_nr += 1;
            false
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::derive_offset;

    #[test]
    fn totality_and_reply_flags() {
        for nr in 0..=3 {
            let mut packet = Packet {
                package_nr: nr,
                ..Packet::default()
            };
            let reply = advance(&mut packet, 100);
            assert_eq!(packet.package_nr, nr + 1);
            assert_eq!(reply, nr < 3);
        }
    }

    #[test]
    fn state_ge_4_is_dropped() {
        for nr in 4..8 {
            let mut packet = Packet {
                package_nr: nr,
                ..Packet::default()
            };
            assert!(!advance(&mut packet, 0));
            assert_eq!(packet.package_nr, nr, "a dropped packet is left untouched");
        }
    }

    #[test]
    fn full_round_trip_derives_an_offset_on_both_sides() {
        let mut packet = Packet::fresh(1_000_000_000);

        assert!(advance(&mut packet, 1_000_000_500)); // receiver stamps, state -> 1
        assert!(advance(&mut packet, 1_000_001_000)); // initiator stamps rtt, state -> 2
        assert!(derive_offset(&packet).is_none());

        assert!(advance(&mut packet, 1_000_001_200)); // receiver stamps rtt, state -> 3
        assert!(derive_offset(&packet).is_some(), "state 3 is derivable by the receiver before it replies");

        assert!(!advance(&mut packet, 0)); // state -> 4, no reply
        assert!(derive_offset(&packet).is_some());
    }
}
