//! Purpose: Compare observed component versions against required targets and report per entry.
//! Exports: `VersionEntry`, `Verdict`, `MismatchStyle`, `CheckSummary`, `format_line`,
//!          `write_report`, `run_check`, `report_json`, `builtin_checklist`.
//! Role: Backing library for the `depcheck` binary and `poolside versions`.
//! Invariants: One output line per entry, in caller order; no sorting.
//! Invariants: Equality is exact on the numeric value; mismatches never abort the report.
//! Invariants: Versions render with exactly one fractional digit.
use std::io::{self, Write};

use serde_json::{Value, json};
use tracing::debug;

use crate::core::error::{Error, ErrorKind};

/// Version of the HTTP envelope served by `poolside serve`.
pub const HTTP_API_VERSION: f64 = 1.0;
/// Version of the runtime context layout handed out by the pool.
pub const RUNTIME_VERSION: f64 = 1.0;
/// Version of the response sink capability set (`headers`, `write_status`, `write`).
pub const SINK_VERSION: f64 = 1.0;

#[derive(Clone, Debug, PartialEq)]
pub struct VersionEntry {
    name: String,
    observed: f64,
    required: f64,
}

impl VersionEntry {
    pub fn new(name: impl Into<String>, observed: f64, required: f64) -> Result<Self, Error> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("version entry name must not be empty"));
        }
        Ok(Self {
            name,
            observed,
            required,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn observed(&self) -> f64 {
        self.observed
    }

    pub fn required(&self) -> f64 {
        self.required
    }

    #[allow(clippy::float_cmp)]
    pub fn verdict(&self) -> Verdict {
        if self.observed == self.required {
            Verdict::Ok
        } else {
            Verdict::Mismatch {
                observed: self.observed,
                required: self.required,
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Verdict {
    Ok,
    Mismatch { observed: f64, required: f64 },
}

impl Verdict {
    pub fn is_ok(self) -> bool {
        matches!(self, Verdict::Ok)
    }

    pub fn describe(self, style: MismatchStyle) -> String {
        match (self, style) {
            (Verdict::Ok, _) => "ok".to_string(),
            (Verdict::Mismatch { observed, required }, MismatchStyle::CurrentAndTarget) => {
                format!("is {observed:.1}, needs version {required:.1}")
            }
            (Verdict::Mismatch { required, .. }, MismatchStyle::TargetOnly) => {
                format!("needs version {required:.1}")
            }
        }
    }
}

/// Wording used for mismatch lines.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum MismatchStyle {
    #[default]
    CurrentAndTarget,
    TargetOnly,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CheckSummary {
    pub ok: usize,
    pub mismatched: usize,
}

pub fn format_line(prefix: &str, entry: &VersionEntry, style: MismatchStyle) -> String {
    format!(
        "{prefix}{}...{}",
        entry.name,
        entry.verdict().describe(style)
    )
}

pub fn write_report<W: Write>(
    out: &mut W,
    prefix: &str,
    entries: &[VersionEntry],
    style: MismatchStyle,
) -> io::Result<CheckSummary> {
    let mut summary = CheckSummary::default();
    for entry in entries {
        writeln!(out, "{}", format_line(prefix, entry, style))?;
        if entry.verdict().is_ok() {
            summary.ok += 1;
        } else {
            summary.mismatched += 1;
        }
    }
    Ok(summary)
}

/// Writes the report and flushes `out`, returning the process exit code for a checker run.
///
/// The code is 0 whatever the verdicts are; only a failed write is an error.
pub fn run_check<W: Write>(
    out: &mut W,
    prefix: &str,
    entries: &[VersionEntry],
    style: MismatchStyle,
) -> Result<i32, Error> {
    let summary = write_report(out, prefix, entries, style)
        .and_then(|summary| out.flush().map(|()| summary))
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to write version report")
                .with_source(err)
        })?;
    if summary.mismatched > 0 {
        debug!(mismatched = summary.mismatched, "version mismatches reported");
    }
    Ok(0)
}

/// Machine-readable form of `write_report`, used by `--json` output and the HTTP host.
pub fn report_json(entries: &[VersionEntry], style: MismatchStyle) -> Value {
    let mut summary = CheckSummary::default();
    let items: Vec<Value> = entries
        .iter()
        .map(|entry| {
            let verdict = entry.verdict();
            if verdict.is_ok() {
                summary.ok += 1;
            } else {
                summary.mismatched += 1;
            }
            json!({
                "name": entry.name,
                "observed": entry.observed,
                "required": entry.required,
                "ok": verdict.is_ok(),
                "verdict": verdict.describe(style),
            })
        })
        .collect();
    json!({
        "versions": items,
        "ok": summary.ok,
        "mismatched": summary.mismatched,
    })
}

/// Component versions compiled into this build, each checked against the target it must match.
pub fn builtin_checklist() -> Vec<VersionEntry> {
    vec![
        VersionEntry {
            name: "http-api".to_string(),
            observed: HTTP_API_VERSION,
            required: 1.0,
        },
        VersionEntry {
            name: "runtime".to_string(),
            observed: RUNTIME_VERSION,
            required: 1.0,
        },
        VersionEntry {
            name: "response-sink".to_string(),
            observed: SINK_VERSION,
            required: 1.0,
        },
    ]
}
