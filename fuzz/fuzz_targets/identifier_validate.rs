#![no_main]

use libfuzzer_sys::fuzz_target;
use matter_pki::identifier::parse_product_ids;
use matter_pki::{Identifier, IdentifierField};

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(id) = Identifier::validate(IdentifierField::VendorId, s) {
            assert_eq!(format!("{:04X}", id.value()), s);
        }
        let _ = parse_product_ids(s);
    }
});
