//! Fuzz target: `HeaderDecoder::feed`
//!
//! Feeds arbitrary bytes into the streaming header decoder, first whole and
//! then one byte at a time, and checks that both deliveries agree and that
//! the decoder never claims more bytes than it was offered.
//!
//! cargo fuzz run fuzz_header_decoder

#![no_main]

use echo_firmware::echo::{HeaderDecoder, HeaderFeed, MessageHeader};
use libfuzzer_sys::fuzz_target;

fn first_outcome(decoder: &mut HeaderDecoder, data: &[u8], step: usize) -> Option<HeaderFeed> {
    let mut offset = 0;
    while offset < data.len() {
        let end = (offset + step).min(data.len());
        match decoder.feed(&data[offset..end]) {
            HeaderFeed::NeedMore(n) => {
                assert_eq!(n, end - offset, "partial header must take everything");
                offset = end;
            }
            outcome => return Some(outcome),
        }
    }
    None
}

fuzz_target!(|data: &[u8]| {
    let mut whole = HeaderDecoder::new();
    let mut bytewise = HeaderDecoder::new();

    let a = first_outcome(&mut whole, data, data.len().max(1));
    let b = first_outcome(&mut bytewise, data, 1);

    match (a, b) {
        (Some(HeaderFeed::Complete(h1, _)), Some(HeaderFeed::Complete(h2, _))) => {
            assert_eq!(h1, h2);
            // a decoded header re-encodes to a prefix of the input
            let encoded = h1.encode();
            assert_eq!(MessageHeader::decode(&encoded).ok().map(|(h, _)| h), Some(h1));
        }
        (Some(HeaderFeed::Malformed(_)), Some(HeaderFeed::Malformed(_))) | (None, None) => {}
        (a, b) => panic!("whole {a:?} differs from bytewise {b:?}"),
    }

    whole.reset();
    assert_eq!(whole.retained(), 0);
});
