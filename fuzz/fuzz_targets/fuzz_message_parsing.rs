//! Fuzz target for network message decoding.
//!
//! This target tests that arbitrary bytes cannot crash the decoder. Whatever arrives on
//! the multicast group is handed to it unfiltered.
//!
//! # Safety Properties Tested
//! - No panics on arbitrary input
//! - An accepted datagram has exactly the length of its message type
//! - An accepted datagram re-encodes to the same bytes

#![no_main]

use libfuzzer_sys::fuzz_target;

use bubble_netplay::network::codec;

fuzz_target!(|data: &[u8]| {
    // Malformed data must return Err, not panic.
    if let Ok(message) = codec::decode(data) {
        assert_eq!(data.len(), 1 + message.message_type().payload_len());
        let encoded = codec::encode(&message).expect("decoded message must re-encode");
        assert_eq!(encoded, data);
    }
});
