//! Core types shared by every uisync crate.
//!
//! This crate owns the vocabulary of the synchronization core:
//! - [`Side`], [`ChangeKind`] and [`ChangeEvent`] (raw watcher signals)
//! - [`ArtifactId`] and the [`NamingConvention`] that maps paths to artifacts
//! - the framework-agnostic IR ([`ComponentIr`], [`IrNode`], [`PropValue`])
//! - the opaque parser output ([`Ast`])
//! - the collaborator contracts (parsers, converters, validators, generators)
//!
//! It intentionally has no async runtime or OS-watcher dependencies so that
//! collaborator implementations can depend on it cheaply.

mod artifact;
mod ast;
mod collaborators;
mod event;
mod fs;
mod ir;
mod naming;
mod validate;

pub use artifact::ArtifactId;
pub use ast::{Ast, AstNode, Span};
pub use collaborators::{
    AstToIr, Collaborators, ConversionError, GenerationError, Generator, ParseError, Parser,
    SideCollaborators, ValidationIssue, ValidationReport, Validator,
};
pub use event::{ChangeEvent, ChangeKind, Side};
pub use fs::{
    atomic_write, content_hash, normalize_local_path, now_millis, remove_file_best_effort,
    TMP_MARKER,
};
pub use ir::{
    ComponentIr, EventHandler, IrNode, Layout, PropValue, Props, StateField, IR_SCHEMA_VERSION,
};
pub use naming::{CaseNamingConvention, FileCase, NamingConvention, SideLayout};
pub use validate::StructuralValidator;

/// Best-effort conversion of a panic payload into a printable message.
pub fn panic_payload_to_str(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(|s| s.as_str()))
        .unwrap_or("<non-string panic>")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payload_extracts_static_and_owned_messages() {
        let err = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_payload_to_str(&*err), "boom");

        let err = std::panic::catch_unwind(|| panic!("{}", String::from("owned"))).unwrap_err();
        assert_eq!(panic_payload_to_str(&*err), "owned");

        let err = std::panic::catch_unwind(|| std::panic::panic_any(42_u32)).unwrap_err();
        assert_eq!(panic_payload_to_str(&*err), "<non-string panic>");
    }
}
