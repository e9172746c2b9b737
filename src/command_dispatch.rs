//! Purpose: Hold top-level CLI command dispatch for `poolside`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: `versions` exits 0 even when entries mismatch.

use super::*;

use poolside::api::{MismatchStyle, builtin_checklist, report_json, run_check};

pub(super) fn dispatch_command(command: Command) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "poolside", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Versions {
            terse,
            json,
            indent,
        } => {
            let style = if terse {
                MismatchStyle::TargetOnly
            } else {
                MismatchStyle::CurrentAndTarget
            };
            let entries = builtin_checklist();
            if json {
                emit_json(report_json(&entries, style));
                return Ok(RunOutcome::ok());
            }
            let stdout = io::stdout();
            let mut out = stdout.lock();
            let code = run_check(&mut out, &indent, &entries, style)?;
            Ok(RunOutcome::with_code(code))
        }
        Command::Serve {
            bind,
            allow_non_loopback,
            prelude,
            prewarm,
            max_body_bytes,
        } => {
            let config = serve::ServeConfig {
                bind: parse_bind(&bind)?,
                prelude,
                prewarm,
                allow_non_loopback,
                max_body_bytes,
            };
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to start runtime")
                        .with_source(err)
                })?;
            runtime.block_on(serve::serve(config))?;
            Ok(RunOutcome::ok())
        }
    }
}
