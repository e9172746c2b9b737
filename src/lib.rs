//! Purpose: Library crate behind the `poolside` and `depcheck` binaries.
//! Exports: `api` (stable surface), `core` (error, pool, counting), `runtime`, `versions`.
//! Role: Three independent components plus the runtime context the HTTP host pools.
//! Invariants: `core::pool`, `core::counting`, and `versions` do not depend on each other.
//! Invariants: No process-wide state; collaborators are passed in explicitly.
pub mod api;
pub mod core;
pub mod runtime;
pub mod versions;
