#![no_main]

use libfuzzer_sys::fuzz_target;
use matter_pki::AuthorityArn;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(arn) = AuthorityArn::parse(s) {
            assert_eq!(AuthorityArn::parse(&arn.to_string()), Ok(arn));
        }
    }
});
