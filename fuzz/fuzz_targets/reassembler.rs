#![no_main]

use isomdl_proximity::transport::fragment::Reassembler;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Split the input into units at arbitrary points given by its own bytes.
    let mut reassembler = Reassembler::new(4096);
    let mut rest = data;
    while let Some((&len, tail)) = rest.split_first() {
        let len = (len as usize).min(tail.len());
        let (unit, tail) = tail.split_at(len);
        if let Ok(Some(message)) = reassembler.push(unit) {
            assert!(message.len() <= 4096);
        }
        rest = tail;
    }
});
