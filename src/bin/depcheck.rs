//! Purpose: Check the component versions compiled into this build against their targets.
//! Role: Argument-free CLI; prints one `<indent><name>...<verdict>` line per entry.
//! Invariants: Exit code is 0 regardless of mismatches; only a failed stdout write exits 1.
//! Invariants: Entries print in checklist order.
use std::io;

use poolside::api::{MismatchStyle, builtin_checklist, run_check};

const INDENT: &str = "  ";

fn main() {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let code = match run_check(
        &mut out,
        INDENT,
        &builtin_checklist(),
        MismatchStyle::CurrentAndTarget,
    ) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("depcheck: {err}");
            1
        }
    };
    std::process::exit(code);
}
