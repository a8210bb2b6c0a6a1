//! Contracts for the external collaborators the sync core drives.
//!
//! Grammar-level parsing, node mapping and code generation live outside this workspace. The
//! core only depends on these traits; implementations must be `Send + Sync` because they are
//! invoked from pool worker threads.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{Ast, ComponentIr, NamingConvention, Side};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("{line}:{column}: {message}")]
pub struct ParseError {
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl ParseError {
    pub fn new(line: u32, column: u32, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ConversionError {
    pub message: String,
}

impl ConversionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct GenerationError {
    pub message: String,
}

impl GenerationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Dotted location inside the IR (e.g. `root.children[1]`).
    pub location: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn from_issues(errors: Vec<ValidationIssue>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// All issue messages joined into one line, for result records and logs.
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(|issue| format!("{}: {}", issue.location, issue.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

pub trait Parser: Send + Sync {
    fn parse(&self, source: &str, path: &Path) -> Result<Ast, ParseError>;
}

pub trait AstToIr: Send + Sync {
    fn convert(&self, ast: &Ast) -> Result<ComponentIr, ConversionError>;
}

pub trait Validator: Send + Sync {
    fn validate(&self, ir: &ComponentIr) -> ValidationReport;
}

pub trait Generator: Send + Sync {
    fn generate(&self, ir: &ComponentIr) -> Result<String, GenerationError>;
}

/// The per-side half of the collaborator set.
#[derive(Clone)]
pub struct SideCollaborators {
    pub parser: Arc<dyn Parser>,
    pub to_ir: Arc<dyn AstToIr>,
    pub generator: Arc<dyn Generator>,
}

/// Everything the sync engine calls out to, injected at construction time.
#[derive(Clone)]
pub struct Collaborators {
    pub side_a: SideCollaborators,
    pub side_b: SideCollaborators,
    pub validator: Arc<dyn Validator>,
    pub naming: Arc<dyn NamingConvention>,
}

impl Collaborators {
    pub fn side(&self, side: Side) -> &SideCollaborators {
        match side {
            Side::A => &self.side_a,
            Side::B => &self.side_b,
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
