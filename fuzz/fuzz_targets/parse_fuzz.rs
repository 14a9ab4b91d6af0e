//! Parse fuzz target: feed arbitrary bytes to the NDF value grammar.
//! Parsing must not panic; a successful parse must build back without panicking.
//! Build with: cargo fuzz run parse_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let mut tree = bingrammar::Tree::new(bingrammar::ndf::value_grammar());
    if tree.parse_bytes(data).is_ok() {
        let _ = tree.build_bytes();
    }
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run parse_fuzz");
}
