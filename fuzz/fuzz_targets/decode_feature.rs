#![no_main]
use libfuzzer_sys::fuzz_target;
use jbon::{EntryArray, JbFeature, JbReader};

fuzz_target!(|data: &[u8]| {
    if let Ok(feature) = JbFeature::map_bytes(data, None) {
        let _ = feature.feature_type();
        let _ = feature.to_value();
        if let Ok(mut map) = feature.root_map() {
            let _ = map.count();
        }
    }
    let _ = JbReader::new(data).decode_value();
});
