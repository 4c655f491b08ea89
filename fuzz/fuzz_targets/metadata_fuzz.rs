//! Metadata fuzz target: feed arbitrary text to the protocol XML parser and the
//! value text parser. Neither may panic.
//! Build with: cargo fuzz run metadata_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let s = match std::str::from_utf8(data) {
        Ok(x) => x,
        Err(_) => return,
    };
    let _ = protolayout::parse_protocol_str(s, &protolayout::ParseOptions::default());
    let mut m = protolayout::Member::scalar("v", protolayout::BaseType::Long).with_sequence(8);
    if m.compute_layout(&protolayout::LayoutRules::message()).is_ok() {
        let _ = protolayout::Value::parse(&m, s);
    }
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run metadata_fuzz");
}
