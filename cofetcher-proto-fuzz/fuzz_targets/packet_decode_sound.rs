#![no_main]

use cofetcher_proto::Packet;
use libfuzzer_sys::fuzz_target;

// `Packet::decode` is the one place this protocol parses attacker-controlled
// bytes (a UDP datagram from any peer). It must never panic, regardless of
// length or content, and a successful decode must always round-trip through
// `encode`.
fuzz_target!(|data: &[u8]| {
    if let Ok(packet) = Packet::decode(data) {
        assert_eq!(Packet::decode(&packet.encode()).unwrap(), packet);
    }
});
