#![no_main]

use libfuzzer_sys::fuzz_target;
use matter_pki::{CustomAttribute, SubjectAttributeSet, Tier};

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(attributes) = serde_json::from_str::<Vec<CustomAttribute>>(s) {
            for tier in [Tier::Root, Tier::Subordinate] {
                if let Ok(subject) = SubjectAttributeSet::classify(tier, &attributes) {
                    assert_eq!(subject.attributes(), attributes);
                }
            }
        }
    }
});
