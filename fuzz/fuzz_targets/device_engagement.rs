#![no_main]

use isomdl_proximity::definitions::DeviceEngagement;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(engagement) = DeviceEngagement::decode(data) {
        // Anything accepted must keep the bytes it was decoded from.
        assert_eq!(engagement.inner_bytes, data);
        let _ = engagement.as_ref().encode();
    }
});
