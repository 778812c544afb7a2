//! Process-role entrypoints (SPEC_FULL §2.1): one module per binary role,
//! plus the two operator diagnostic commands. Mirrors this codebase's
//! original one-long-running-role-per-file split (see DESIGN.md), all
//! sharing the `orbitctl` library crate.

pub mod build_worker;
pub mod check;
pub mod reconciler;
pub mod version;
pub mod webhook_dispatcher;
