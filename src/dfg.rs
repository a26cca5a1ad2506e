// SPDX-License-Identifier: Apache-2.0

//! The dataflow graph core.
//!
//! Vertices live in a slab addressed by stable `VertexId` handles and are
//! threaded on an intrusive doubly-linked list that preserves insertion
//! order. Source edges are slots owned by the sink vertex; each source
//! vertex keeps a back list of `(sink, slot)` references, so detaching and
//! relinking an edge is O(1) and redirecting all consumers of a vertex is
//! O(out-degree).
//!
//! Traversal contract: fetch the next id with `next_of` *before* mutating
//! the current vertex. It is safe to delete or relink the current vertex
//! during such a walk, but not any other vertex of the same graph.

use std::fmt;

use crate::ast::VarId;
use crate::kind::{BinaryOp, UnaryOp};
use crate::loc::Loc;
use crate::value::PackedVal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexId(u32);

impl VertexId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Bit offset and location of one logical driver of a variable vertex.
/// Parallel to the variable's source slots.
#[derive(Debug, Clone, Copy)]
pub struct DriverInfo {
    pub lsb: u32,
    pub loc: Loc,
}

#[derive(Debug, Clone)]
pub struct VarInfo {
    pub var: VarId,
    pub name: String,
    /// Referenced outside what any graph can see: port, or target of a
    /// hierarchical reference. Such variables must never be deleted.
    pub has_ext_refs: bool,
    /// Referenced by module logic left in tree form. Must be kept, but ranks
    /// below `has_ext_refs` when choosing a canonical variable.
    pub has_mod_refs: bool,
    pub drivers: Vec<DriverInfo>,
}

#[derive(Debug, Clone)]
pub enum VertexKind {
    Const(PackedVal),
    Var(VarInfo),
    Unary(UnaryOp),
    Binary(BinaryOp),
    Mux,
    Sel { lsb: u32 },
}

impl VertexKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            VertexKind::Const(_) => "const",
            VertexKind::Var(_) => "var",
            VertexKind::Unary(op) => op.name(),
            VertexKind::Binary(op) => op.name(),
            VertexKind::Mux => "mux",
            VertexKind::Sel { .. } => "sel",
        }
    }

    /// Human-readable name of the source operand with the given index.
    pub fn src_name(&self, idx: usize) -> &'static str {
        match self {
            VertexKind::Var(_) => "driver",
            VertexKind::Unary(_) => "src",
            VertexKind::Binary(_) => {
                if idx == 0 {
                    "lhs"
                } else {
                    "rhs"
                }
            }
            VertexKind::Mux => ["cond", "then", "else"][idx],
            VertexKind::Sel { .. } => "from",
            VertexKind::Const(_) => "",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Edge {
    source: Option<VertexId>,
    /// Back index of this edge in the source's sink list. Meaningless while
    /// unconnected.
    pos: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkRef {
    pub sink: VertexId,
    pub slot: u32,
}

#[derive(Debug)]
pub struct Vertex {
    kind: VertexKind,
    width: u32,
    loc: Loc,
    sources: Vec<Edge>,
    sinks: Vec<SinkRef>,
    prev: Option<VertexId>,
    next: Option<VertexId>,
}

#[derive(Debug)]
pub struct DfgGraph {
    module_name: String,
    name: String,
    slots: Vec<Option<Vertex>>,
    free: Vec<u32>,
    head: Option<VertexId>,
    tail: Option<VertexId>,
    len: usize,
}

impl DfgGraph {
    pub fn new(module_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            name: name.into(),
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the handle refers to a live vertex. Handles of deleted
    /// vertices become invalid (and their slots may be reused).
    pub fn is_valid(&self, id: VertexId) -> bool {
        self.slots
            .get(id.index())
            .is_some_and(|slot| slot.is_some())
    }

    fn slot(&self, id: VertexId) -> &Vertex {
        self.slots[id.index()]
            .as_ref()
            .unwrap_or_else(|| panic!("stale vertex handle {}", id))
    }

    fn slot_mut(&mut self, id: VertexId) -> &mut Vertex {
        self.slots[id.index()]
            .as_mut()
            .unwrap_or_else(|| panic!("stale vertex handle {}", id))
    }

    // ---- Construction ------------------------------------------------

    fn alloc(&mut self, kind: VertexKind, width: u32, loc: Loc, arity: usize) -> VertexId {
        assert!(width > 0, "zero-width vertex");
        let vertex = Vertex {
            kind,
            width,
            loc,
            sources: (0..arity)
                .map(|_| Edge {
                    source: None,
                    pos: 0,
                })
                .collect(),
            sinks: Vec::new(),
            prev: None,
            next: None,
        };
        self.adopt(vertex)
    }

    /// Places a fully formed vertex record into a slot and links it at the
    /// tail of the insertion-order list.
    fn adopt(&mut self, mut vertex: Vertex) -> VertexId {
        vertex.prev = self.tail;
        vertex.next = None;
        let id = match self.free.pop() {
            Some(idx) => {
                debug_assert!(self.slots[idx as usize].is_none());
                self.slots[idx as usize] = Some(vertex);
                VertexId(idx)
            }
            None => {
                self.slots.push(Some(vertex));
                VertexId((self.slots.len() - 1) as u32)
            }
        };
        match self.tail {
            Some(tail) => self.slot_mut(tail).next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.len += 1;
        id
    }

    pub fn new_const(&mut self, value: PackedVal, loc: Loc) -> VertexId {
        let width = value.width();
        self.alloc(VertexKind::Const(value), width, loc, 0)
    }

    pub fn new_var(&mut self, var: VarId, name: impl Into<String>, width: u32, loc: Loc) -> VertexId {
        let info = VarInfo {
            var,
            name: name.into(),
            has_ext_refs: false,
            has_mod_refs: false,
            drivers: vec![DriverInfo { lsb: 0, loc }],
        };
        self.alloc(VertexKind::Var(info), width, loc, 1)
    }

    pub fn new_unary(&mut self, op: UnaryOp, width: u32, loc: Loc) -> VertexId {
        self.alloc(VertexKind::Unary(op), width, loc, 1)
    }

    pub fn new_binary(&mut self, op: BinaryOp, width: u32, loc: Loc) -> VertexId {
        self.alloc(VertexKind::Binary(op), width, loc, 2)
    }

    pub fn new_mux(&mut self, width: u32, loc: Loc) -> VertexId {
        self.alloc(VertexKind::Mux, width, loc, 3)
    }

    pub fn new_sel(&mut self, lsb: u32, width: u32, loc: Loc) -> VertexId {
        self.alloc(VertexKind::Sel { lsb }, width, loc, 1)
    }

    // ---- Accessors ---------------------------------------------------

    pub fn kind(&self, id: VertexId) -> &VertexKind {
        &self.slot(id).kind
    }

    pub fn width(&self, id: VertexId) -> u32 {
        self.slot(id).width
    }

    pub fn loc(&self, id: VertexId) -> Loc {
        self.slot(id).loc
    }

    pub fn is_const(&self, id: VertexId) -> bool {
        matches!(self.slot(id).kind, VertexKind::Const(_))
    }

    pub fn is_var(&self, id: VertexId) -> bool {
        matches!(self.slot(id).kind, VertexKind::Var(_))
    }

    pub fn const_value(&self, id: VertexId) -> Option<&PackedVal> {
        match &self.slot(id).kind {
            VertexKind::Const(value) => Some(value),
            _ => None,
        }
    }

    pub fn var_info(&self, id: VertexId) -> Option<&VarInfo> {
        match &self.slot(id).kind {
            VertexKind::Var(info) => Some(info),
            _ => None,
        }
    }

    pub fn var_info_mut(&mut self, id: VertexId) -> Option<&mut VarInfo> {
        match &mut self.slot_mut(id).kind {
            VertexKind::Var(info) => Some(info),
            _ => None,
        }
    }

    pub fn sel_lsb(&self, id: VertexId) -> u32 {
        match self.slot(id).kind {
            VertexKind::Sel { lsb } => lsb,
            _ => panic!("sel_lsb on non-sel vertex {}", id),
        }
    }

    pub(crate) fn set_sel_lsb(&mut self, id: VertexId, lsb: u32) {
        match &mut self.slot_mut(id).kind {
            VertexKind::Sel { lsb: slot } => *slot = lsb,
            _ => panic!("set_sel_lsb on non-sel vertex {}", id),
        }
    }

    pub fn arity(&self, id: VertexId) -> usize {
        self.slot(id).sources.len()
    }

    pub fn source(&self, id: VertexId, slot: usize) -> Option<VertexId> {
        self.slot(id).sources[slot].source
    }

    pub fn sinks(&self, id: VertexId) -> &[SinkRef] {
        &self.slot(id).sinks
    }

    pub fn has_sinks(&self, id: VertexId) -> bool {
        !self.slot(id).sinks.is_empty()
    }

    pub fn has_multiple_sinks(&self, id: VertexId) -> bool {
        self.slot(id).sinks.len() > 1
    }

    /// The consuming vertex, if this vertex has exactly one sink edge.
    pub fn single_sink(&self, id: VertexId) -> Option<VertexId> {
        match self.slot(id).sinks.as_slice() {
            [only] => Some(only.sink),
            _ => None,
        }
    }

    pub fn fanout(&self, id: VertexId) -> usize {
        self.slot(id).sinks.len()
    }

    /// Slot index in `sink` driven from `source` (first match).
    pub fn source_index(&self, source: VertexId, sink: VertexId) -> Option<usize> {
        self.slot(sink)
            .sources
            .iter()
            .position(|edge| edge.source == Some(source))
    }

    pub fn drivers(&self, id: VertexId) -> &[DriverInfo] {
        match &self.slot(id).kind {
            VertexKind::Var(info) => &info.drivers,
            _ => &[],
        }
    }

    /// The single whole-width driver of a variable vertex, if it has one.
    pub fn full_driver(&self, id: VertexId) -> Option<VertexId> {
        let info = self.var_info(id)?;
        if info.drivers.len() != 1 || info.drivers[0].lsb != 0 {
            return None;
        }
        let src = self.source(id, 0)?;
        if self.width(src) == self.width(id) {
            Some(src)
        } else {
            None
        }
    }

    // ---- Edge manipulation -------------------------------------------

    /// Detaches the edge at `sink`'s `slot` from its current source (if any)
    /// and attaches it to `new_source`. Sink-side identity is untouched.
    pub fn relink_source(&mut self, sink: VertexId, slot: usize, new_source: Option<VertexId>) {
        debug_assert!(
            new_source != Some(sink),
            "self edge on {} would make the graph cyclic",
            sink
        );
        let edge = self.slot(sink).sources[slot];
        if let Some(old) = edge.source {
            let pos = edge.pos as usize;
            let old_sinks = &mut self.slot_mut(old).sinks;
            debug_assert_eq!(
                old_sinks[pos],
                SinkRef {
                    sink,
                    slot: slot as u32
                },
                "edge back index out of sync"
            );
            old_sinks.swap_remove(pos);
            if pos < old_sinks.len() {
                let moved = old_sinks[pos];
                self.slot_mut(moved.sink).sources[moved.slot as usize].pos = pos as u32;
            }
        }
        match new_source {
            Some(new) => {
                let new_sinks = &mut self.slot_mut(new).sinks;
                new_sinks.push(SinkRef {
                    sink,
                    slot: slot as u32,
                });
                let pos = (new_sinks.len() - 1) as u32;
                let edge = &mut self.slot_mut(sink).sources[slot];
                edge.source = Some(new);
                edge.pos = pos;
            }
            None => {
                let edge = &mut self.slot_mut(sink).sources[slot];
                edge.source = None;
                edge.pos = 0;
            }
        }
    }

    pub fn unlink_source(&mut self, sink: VertexId, slot: usize) {
        self.relink_source(sink, slot, None);
    }

    /// Redirects every consumer of `old` to `new`.
    pub fn replace_with(&mut self, old: VertexId, new: VertexId) {
        assert_ne!(old, new, "replace_with self");
        while let Some(&last) = self.slot(old).sinks.last() {
            self.relink_source(last.sink, last.slot as usize, Some(new));
        }
    }

    /// Drops all source slots (and driver records) of a variable vertex so
    /// drivers can be rebuilt with `add_driver`.
    pub fn reset_var_sources(&mut self, id: VertexId) {
        for slot in 0..self.arity(id) {
            self.unlink_source(id, slot);
        }
        let vertex = self.slot_mut(id);
        vertex.sources.clear();
        match &mut vertex.kind {
            VertexKind::Var(info) => info.drivers.clear(),
            _ => panic!("reset_var_sources on non-var vertex {}", id),
        }
    }

    /// Appends a driver slot to a variable vertex: `src` drives the bits
    /// starting at `lsb`.
    pub fn add_driver(&mut self, id: VertexId, lsb: u32, loc: Loc, src: VertexId) {
        debug_assert!(
            lsb + self.width(src) <= self.width(id),
            "driver [{}+:{}] out of range for {} bit variable {}",
            lsb,
            self.width(src),
            self.width(id),
            id
        );
        let vertex = self.slot_mut(id);
        let slot = vertex.sources.len();
        vertex.sources.push(Edge {
            source: None,
            pos: 0,
        });
        match &mut vertex.kind {
            VertexKind::Var(info) => info.drivers.push(DriverInfo { lsb, loc }),
            _ => panic!("add_driver on non-var vertex {}", id),
        }
        self.relink_source(id, slot, Some(src));
    }

    /// Unlinks the vertex from all neighbours and the graph, then frees it.
    /// Consumers are left with unconnected source slots, so the caller must
    /// either have redirected them beforehand or be deleting them too.
    pub fn unlink_delete(&mut self, id: VertexId) {
        while let Some(&last) = self.slot(id).sinks.last() {
            self.relink_source(last.sink, last.slot as usize, None);
        }
        for slot in 0..self.arity(id) {
            self.unlink_source(id, slot);
        }
        let vertex = self.slots[id.index()].take().expect("double delete");
        match vertex.prev {
            Some(prev) => self.slot_mut(prev).next = vertex.next,
            None => self.head = vertex.next,
        }
        match vertex.next {
            Some(next) => self.slot_mut(next).prev = vertex.prev,
            None => self.tail = vertex.prev,
        }
        self.free.push(id.0);
        self.len -= 1;
    }

    // ---- Iteration ---------------------------------------------------

    pub fn head(&self) -> Option<VertexId> {
        self.head
    }

    pub fn tail(&self) -> Option<VertexId> {
        self.tail
    }

    pub fn next_of(&self, id: VertexId) -> Option<VertexId> {
        self.slot(id).next
    }

    pub fn prev_of(&self, id: VertexId) -> Option<VertexId> {
        self.slot(id).prev
    }

    /// Read-only walk in insertion order. Do not mutate while iterating;
    /// mutating passes use the `head`/`next_of` cursor idiom instead.
    pub fn iter_ids(&self) -> impl Iterator<Item = VertexId> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let id = cursor?;
            cursor = self.slot(id).next;
            Some(id)
        })
    }

    /// Snapshot of all vertex ids in insertion order. Useful for passes
    /// that allocate new vertices while walking; check `is_valid` on each
    /// id before use.
    pub fn vertex_ids(&self) -> Vec<VertexId> {
        self.iter_ids().collect()
    }

    // ---- Component splitting -----------------------------------------

    /// Partitions the graph into its undirected connected components,
    /// moving every vertex into one of the returned graphs. `self` is left
    /// empty. Handles into the old graph are invalidated; component
    /// membership and relative insertion order are preserved.
    pub fn split_into_components(&mut self) -> Vec<DfgGraph> {
        let order = self.vertex_ids();
        // Flood fill with an explicit work stack; recursion depth would be
        // unbounded on large designs.
        let mut comp_of: Vec<Option<u32>> = vec![None; self.slots.len()];
        let mut n_comps: u32 = 0;
        let mut stack: Vec<VertexId> = Vec::new();
        for &seed in &order {
            if comp_of[seed.index()].is_some() {
                continue;
            }
            let comp = n_comps;
            n_comps += 1;
            stack.push(seed);
            while let Some(id) = stack.pop() {
                if comp_of[id.index()].is_some() {
                    continue;
                }
                comp_of[id.index()] = Some(comp);
                let vertex = self.slot(id);
                for edge in &vertex.sources {
                    if let Some(src) = edge.source {
                        if comp_of[src.index()].is_none() {
                            stack.push(src);
                        }
                    }
                }
                for sink_ref in &vertex.sinks {
                    if comp_of[sink_ref.sink.index()].is_none() {
                        stack.push(sink_ref.sink);
                    }
                }
            }
        }

        let mut comps: Vec<DfgGraph> = (0..n_comps)
            .map(|i| DfgGraph::new(self.module_name.clone(), format!("{}-comp{}", self.name, i)))
            .collect();

        // Move the records over in insertion order, then remap the handles
        // they carry. Edge back indices stay valid because sink vectors are
        // moved verbatim and components are closed under edges.
        let mut remap: Vec<Option<VertexId>> = vec![None; self.slots.len()];
        for &id in &order {
            let comp = comp_of[id.index()].unwrap() as usize;
            let vertex = self.slots[id.index()].take().unwrap();
            let new_id = comps[comp].adopt(vertex);
            remap[id.index()] = Some(new_id);
        }
        for comp in &mut comps {
            let ids = comp.vertex_ids();
            for id in ids {
                let vertex = comp.slot_mut(id);
                for edge in &mut vertex.sources {
                    if let Some(src) = edge.source {
                        edge.source = Some(remap[src.index()].unwrap());
                    }
                }
                for sink_ref in &mut vertex.sinks {
                    sink_ref.sink = remap[sink_ref.sink.index()].unwrap();
                }
            }
        }

        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
        self.len = 0;
        comps
    }

    /// Chooses the canonical variable vertex holding the value of this
    /// vertex: the variable itself, or the best variable sink fully driven
    /// by it. The priority order (keep-flag > module-reference-presence >
    /// source order > name) is a defined total order so results are stable
    /// across runs.
    pub fn result_var(&self, id: VertexId) -> Option<VertexId> {
        if self.is_var(id) {
            return Some(id);
        }
        let mut best: Option<VertexId> = None;
        for sink_ref in self.sinks(id) {
            let cand = sink_ref.sink;
            if !self.is_var(cand) || self.full_driver(cand) != Some(id) {
                continue;
            }
            best = Some(match best {
                None => cand,
                Some(prev) => self.prefer_var(prev, cand),
            });
        }
        best
    }

    fn prefer_var(&self, a: VertexId, b: VertexId) -> VertexId {
        let ia = self.var_info(a).expect("var vertex");
        let ib = self.var_info(b).expect("var vertex");
        if ia.has_ext_refs != ib.has_ext_refs {
            return if ia.has_ext_refs { a } else { b };
        }
        if ia.has_mod_refs != ib.has_mod_refs {
            return if ia.has_mod_refs { a } else { b };
        }
        match self.loc(a).cmp(&self.loc(b)) {
            std::cmp::Ordering::Less => a,
            std::cmp::Ordering::Greater => b,
            std::cmp::Ordering::Equal => {
                if ia.name <= ib.name {
                    a
                } else {
                    b
                }
            }
        }
    }

    // ---- Consistency checks ------------------------------------------

    /// Validates the edge cross-references. Expensive; only runs in debug
    /// builds, in the manner of the invariant sweeps around passes.
    pub fn debug_check(&self) {
        if !cfg!(debug_assertions) {
            return;
        }
        for id in self.iter_ids() {
            let vertex = self.slot(id);
            assert!(vertex.width > 0, "{}: zero width", id);
            for (slot, edge) in vertex.sources.iter().enumerate() {
                if let Some(src) = edge.source {
                    assert!(self.is_valid(src), "{} slot {}: dangling source", id, slot);
                    let back = self.slot(src).sinks[edge.pos as usize];
                    assert!(
                        back.sink == id && back.slot as usize == slot,
                        "{} slot {}: sink back reference out of sync",
                        id,
                        slot
                    );
                }
            }
            for (pos, sink_ref) in vertex.sinks.iter().enumerate() {
                assert!(self.is_valid(sink_ref.sink), "{}: dangling sink", id);
                let edge = &self.slot(sink_ref.sink).sources[sink_ref.slot as usize];
                assert!(
                    edge.source == Some(id) && edge.pos as usize == pos,
                    "{}: source back reference out of sync",
                    id
                );
            }
        }
    }
}
