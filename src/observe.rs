//! Trace points fired by the parse and build walks.
//!
//! The walk itself never logs. Each node visit calls [`Observer::enter`] before
//! touching the stream and [`Observer::exit`] with the byte range it covered.

use crate::tree::{FieldKind, Key, NodeId};
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Parse,
    Build,
}

/// One node visit.
#[derive(Debug, Clone, Copy)]
pub struct Event<'a> {
    pub phase: Phase,
    pub node: NodeId,
    pub kind: FieldKind,
    pub key: &'a Key,
    /// Nesting depth below the node the walk started from.
    pub depth: usize,
}

pub trait Observer {
    fn enter(&mut self, _event: &Event<'_>) {}

    /// `range` is the stream span between entering and leaving the node.
    fn exit(&mut self, _event: &Event<'_>, _range: Range<u64>) {}
}

/// Ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl Observer for NoopObserver {}

/// Forwards events to `tracing` at TRACE level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn enter(&mut self, event: &Event<'_>) {
        tracing::trace!(
            phase = ?event.phase,
            node = event.node.index(),
            kind = %event.kind,
            key = %event.key,
            depth = event.depth,
            "enter"
        );
    }

    fn exit(&mut self, event: &Event<'_>, range: Range<u64>) {
        tracing::trace!(
            phase = ?event.phase,
            node = event.node.index(),
            kind = %event.kind,
            key = %event.key,
            depth = event.depth,
            start = range.start,
            end = range.end,
            "exit"
        );
    }
}

/// Records every event; used to inspect the walk order.
#[derive(Debug, Default, Clone)]
pub struct Recorder {
    pub entries: Vec<(Phase, String, Range<u64>)>,
}

impl Observer for Recorder {
    fn exit(&mut self, event: &Event<'_>, range: Range<u64>) {
        self.entries.push((event.phase, event.key.to_string(), range));
    }
}
