//! Utilities shared by uisync tests.
//!
//! Provides a toy component format with real [`uisync_core::Parser`], [`uisync_core::AstToIr`]
//! and [`uisync_core::Generator`] implementations, counting wrappers for asserting how often the
//! sync engine calls out, and a temporary two-sided workspace.

mod counting;
mod harness;
pub mod toy;

#[cfg(feature = "workspace")]
mod workspace;

pub use counting::{CallSpan, Counting};
pub use harness::ToyCollaborators;
pub use toy::{button_source, ToyConverter, ToyGenerator, ToyParser};

#[cfg(feature = "workspace")]
pub use workspace::TestWorkspace;
