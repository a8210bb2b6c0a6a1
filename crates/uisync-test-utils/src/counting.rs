use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use uisync_core::{
    Ast, AstToIr, ComponentIr, ConversionError, GenerationError, Generator, ParseError, Parser,
};

/// Wall-clock interval of one parser invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSpan {
    pub path: PathBuf,
    pub start: Instant,
    pub end: Instant,
}

impl CallSpan {
    pub fn overlaps(&self, other: &CallSpan) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Wraps a collaborator and counts how often it is invoked. Parsers also record a [`CallSpan`]
/// per call.
#[derive(Debug)]
pub struct Counting<T> {
    inner: T,
    calls: Arc<AtomicUsize>,
    spans: Arc<Mutex<Vec<CallSpan>>>,
}

impl<T> Counting<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            calls: Arc::default(),
            spans: Arc::default(),
        }
    }

    /// Shared handle to the counter, usable after the wrapper has been moved into an `Arc<dyn _>`.
    pub fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    pub fn spans(&self) -> Arc<Mutex<Vec<CallSpan>>> {
        Arc::clone(&self.spans)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl<T: Parser> Parser for Counting<T> {
    fn parse(&self, source: &str, path: &Path) -> Result<Ast, ParseError> {
        self.hit();
        let start = Instant::now();
        let result = self.inner.parse(source, path);
        self.spans.lock().push(CallSpan {
            path: path.to_path_buf(),
            start,
            end: Instant::now(),
        });
        result
    }
}

impl<T: AstToIr> AstToIr for Counting<T> {
    fn convert(&self, ast: &Ast) -> Result<ComponentIr, ConversionError> {
        self.hit();
        self.inner.convert(ast)
    }
}

impl<T: Generator> Generator for Counting<T> {
    fn generate(&self, ir: &ComponentIr) -> Result<String, GenerationError> {
        self.hit();
        self.inner.generate(ir)
    }
}
