#![no_main]

use cofetcher_proto::Packet;
use libfuzzer_sys::fuzz_target;

// Every structurally valid packet, not just ones reachable by mutating raw
// bytes, must survive an encode/decode round trip unchanged.
fuzz_target!(|packet: Packet| {
    assert_eq!(Packet::decode(&packet.encode()).unwrap(), packet);
});
