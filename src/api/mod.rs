//! Purpose: Define the stable public Rust API boundary for poolside.
//! Exports: Pool, response sink, runtime, and version-check types used by the binaries.
//! Role: Public, additive-only surface; internal module paths may move.
//! Invariants: Binaries and integration tests import through this module only.

pub use crate::core::counting::{BufferedResponse, ByteCounter, ResponseSink, SinkWrite};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::pool::{Checkout, ContextPool, Factory, PoolStats};
pub use crate::runtime::{Runtime, RuntimeConfig, RuntimeEvent, load_prelude};
pub use crate::versions::{
    CheckSummary, MismatchStyle, Verdict, VersionEntry, builtin_checklist, format_line,
    report_json, run_check, write_report,
};
