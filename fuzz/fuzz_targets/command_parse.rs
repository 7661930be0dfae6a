//! Fuzz target for `Command::parse`
//!
//! Arbitrary lines must parse or fail cleanly. Anything that parses must
//! render back to a line that parses to the same command.

#![no_main]

use libfuzzer_sys::fuzz_target;
use wallet_proto::{Command, amount::parse_amount};

fuzz_target!(|line: &str| {
    let _ = parse_amount(line);

    let Ok(command) = Command::parse(line) else {
        return;
    };

    let rendered = command.to_line();
    let reparsed = Command::parse(&rendered).expect("rendered line must parse");
    assert_eq!(reparsed, command);
    assert!(!rendered.contains('\n'));
});
