use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use uisync_config::SyncConfig;
use uisync_core::{
    Collaborators, NamingConvention, Side, SideCollaborators, StructuralValidator,
};

use crate::counting::{CallSpan, Counting};
use crate::toy::{ToyConverter, ToyGenerator, ToyParser};

struct SideCounters {
    parse: Arc<AtomicUsize>,
    parse_spans: Arc<Mutex<Vec<CallSpan>>>,
    generate: Arc<AtomicUsize>,
}

/// Toy collaborators for both sides, with parser and generator invocation counters.
pub struct ToyCollaborators {
    collaborators: Collaborators,
    side_a: SideCounters,
    side_b: SideCounters,
}

fn side(side: Side) -> (SideCollaborators, SideCounters) {
    let parser = Counting::new(ToyParser::new(side));
    let generator = Counting::new(ToyGenerator::new(side));
    let counters = SideCounters {
        parse: parser.counter(),
        parse_spans: parser.spans(),
        generate: generator.counter(),
    };
    let collaborators = SideCollaborators {
        parser: Arc::new(parser),
        to_ir: Arc::new(ToyConverter),
        generator: Arc::new(generator),
    };
    (collaborators, counters)
}

impl ToyCollaborators {
    pub fn new(naming: Arc<dyn NamingConvention>) -> Self {
        let (side_a, counters_a) = side(Side::A);
        let (side_b, counters_b) = side(Side::B);
        Self {
            collaborators: Collaborators {
                side_a,
                side_b,
                validator: Arc::new(StructuralValidator),
                naming,
            },
            side_a: counters_a,
            side_b: counters_b,
        }
    }

    /// Uses the naming convention implied by `config`'s side layouts.
    pub fn for_config(config: &SyncConfig) -> Self {
        Self::new(Arc::new(config.naming_convention()))
    }

    pub fn collaborators(&self) -> Collaborators {
        self.collaborators.clone()
    }

    fn counters(&self, side: Side) -> &SideCounters {
        match side {
            Side::A => &self.side_a,
            Side::B => &self.side_b,
        }
    }

    /// Parser invocations for sources on `side`.
    pub fn parse_calls(&self, side: Side) -> usize {
        self.counters(side).parse.load(Ordering::SeqCst)
    }

    /// Start and end of every parser invocation on `side`, in completion order.
    pub fn parse_spans(&self, side: Side) -> Vec<CallSpan> {
        self.counters(side).parse_spans.lock().clone()
    }

    /// Generator invocations producing `side`'s source.
    pub fn generate_calls(&self, side: Side) -> usize {
        self.counters(side).generate.load(Ordering::SeqCst)
    }
}
