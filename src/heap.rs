// ABOUTME: Managed heap with slab allocator, root stack, symbol interning,
// ABOUTME: and the mark-and-sweep garbage collector

use crate::config::{GC_THRESHOLD, ROOT_STACK_CAPACITY, SLAB_CAPACITY};
use crate::value::{Cell, Closure, PrimitiveFn};
use std::fmt;

const WORD_BITS: usize = 64;

/// A handle to a cell on the heap. Slab positions are stable for the life of
/// the heap, so a `GcRef` never moves. Equality is cell identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct GcRef(u32);

impl fmt::Debug for GcRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GcRef({})", self.0)
    }
}

/// A fixed-size pool of cells with parallel in-use and mark bitmaps.
struct Slab {
    cells: Vec<Cell>,
    in_use: Vec<u64>,
    marked: Vec<u64>,
}

impl Slab {
    fn new() -> Slab {
        Slab {
            cells: (0..SLAB_CAPACITY).map(|_| Cell::Guard).collect(),
            in_use: vec![0; SLAB_CAPACITY / WORD_BITS],
            marked: vec![0; SLAB_CAPACITY / WORD_BITS],
        }
    }

    fn find_free(&self) -> Option<usize> {
        for (word_idx, &word) in self.in_use.iter().enumerate() {
            if word != u64::MAX {
                let bit = (!word).trailing_zeros() as usize;
                return Some(word_idx * WORD_BITS + bit);
            }
        }
        None
    }

    fn live_cells(&self) -> usize {
        self.in_use.iter().map(|word| word.count_ones() as usize).sum()
    }
}

fn bit_position(slot: usize) -> (usize, u64) {
    (slot / WORD_BITS, 1u64 << (slot % WORD_BITS))
}

/// The reserved symbols, interned once at startup. Special forms are
/// recognised by identity against these handles.
#[derive(Debug, Clone, Copy)]
pub struct Reserved {
    pub nil: GcRef,
    pub t: GcRef,
    pub quote: GcRef,
    pub if_: GcRef,
    pub lambda: GcRef,
    pub progn: GcRef,
    pub setf: GcRef,
    pub define: GcRef,
    pub defmacro: GcRef,
}

/// The heap and GC runtime: the slab chain, the root stack, the interned
/// symbol table, and the top-level environment frame.
///
/// The symbol table and the top-level environment are permanent GC roots.
/// Everything else survives a collection only while reachable from the root
/// stack, which the evaluator maintains around allocation points.
pub struct Heap {
    slabs: Vec<Slab>,
    roots: Vec<GcRef>,
    symbols: GcRef,
    toplevel: GcRef,
    pub reserved: Reserved,
    total_allocations: u64,
    allocations_since_gc: u64,
    collections: u64,
    gc_threshold: u64,
}

impl Default for Heap {
    fn default() -> Self {
        Heap::new()
    }
}

/// ## Construction
impl Heap {
    /// Create a heap with the default collection threshold.
    pub fn new() -> Heap {
        Heap::with_gc_threshold(GC_THRESHOLD)
    }

    /// Create a heap that collects once more than `gc_threshold` allocations
    /// have happened since the last sweep. A threshold of 0 collects before
    /// every evaluation step.
    pub fn with_gc_threshold(gc_threshold: u64) -> Heap {
        let placeholder = GcRef(0);
        let mut heap = Heap {
            slabs: vec![Slab::new()],
            roots: Vec::with_capacity(ROOT_STACK_CAPACITY),
            symbols: placeholder,
            toplevel: placeholder,
            reserved: Reserved {
                nil: placeholder,
                t: placeholder,
                quote: placeholder,
                if_: placeholder,
                lambda: placeholder,
                progn: placeholder,
                setf: placeholder,
                define: placeholder,
                defmacro: placeholder,
            },
            total_allocations: 0,
            allocations_since_gc: 0,
            collections: 0,
            gc_threshold,
        };

        // The nil symbol doubles as the empty-list terminator, so it must
        // exist before the symbol table it lives in.
        let nil = heap.alloc(Cell::Symbol("nil".to_string()));
        heap.reserved.nil = nil;
        heap.symbols = heap.cons(nil, nil);

        heap.reserved.t = heap.intern("t");
        heap.reserved.quote = heap.intern("quote");
        heap.reserved.if_ = heap.intern("if");
        heap.reserved.lambda = heap.intern("lambda");
        heap.reserved.progn = heap.intern("progn");
        heap.reserved.setf = heap.intern("setf");
        heap.reserved.define = heap.intern("define");
        heap.reserved.defmacro = heap.intern("defmacro");

        heap.toplevel = heap.cons(nil, nil);
        heap
    }
}

/// ## Allocation
impl Heap {
    /// Allocate a cell. Never triggers a collection; the evaluator decides
    /// when to collect.
    pub fn alloc(&mut self, cell: Cell) -> GcRef {
        self.total_allocations += 1;
        self.allocations_since_gc += 1;

        let (slab_idx, slot) = match self.find_free_slot() {
            Some(location) => location,
            None => {
                self.slabs.push(Slab::new());
                (self.slabs.len() - 1, 0)
            }
        };

        let slab = &mut self.slabs[slab_idx];
        let (word, mask) = bit_position(slot);
        slab.in_use[word] |= mask;
        slab.marked[word] &= !mask;
        slab.cells[slot] = cell;

        GcRef((slab_idx * SLAB_CAPACITY + slot) as u32)
    }

    fn find_free_slot(&self) -> Option<(usize, usize)> {
        for (slab_idx, slab) in self.slabs.iter().enumerate() {
            if let Some(slot) = slab.find_free() {
                return Some((slab_idx, slot));
            }
        }
        None
    }

    pub fn cons(&mut self, car: GcRef, cdr: GcRef) -> GcRef {
        self.alloc(Cell::Cons(car, cdr))
    }

    pub fn alloc_int(&mut self, value: i64) -> GcRef {
        self.alloc(Cell::Int(value))
    }

    pub fn alloc_primitive(&mut self, op: PrimitiveFn) -> GcRef {
        self.alloc(Cell::Primitive(op))
    }

    pub fn alloc_proc(&mut self, closure: Closure) -> GcRef {
        self.alloc(Cell::Proc(closure))
    }

    pub fn alloc_macro(&mut self, closure: Closure) -> GcRef {
        self.alloc(Cell::Macro(closure))
    }
}

/// ## Cell access
impl Heap {
    fn locate(r: GcRef) -> (usize, usize) {
        let index = r.0 as usize;
        (index / SLAB_CAPACITY, index % SLAB_CAPACITY)
    }

    /// Read a cell. Touching a freed slot is a heap-corruption bug and
    /// aborts with a distinguishable message.
    pub fn cell(&self, r: GcRef) -> &Cell {
        let (slab_idx, slot) = Self::locate(r);
        let cell = &self.slabs[slab_idx].cells[slot];
        if let Cell::Guard = cell {
            panic!("heap corruption: access to freed cell {:?}", r);
        }
        cell
    }

    pub fn is_nil(&self, r: GcRef) -> bool {
        r == self.reserved.nil
    }

    pub fn is_cons(&self, r: GcRef) -> bool {
        matches!(self.cell(r), Cell::Cons(..))
    }

    /// The car of a cons. nil and other non-cons cells yield nil.
    pub fn car(&self, r: GcRef) -> GcRef {
        match self.cell(r) {
            Cell::Cons(car, _) => *car,
            _ => self.reserved.nil,
        }
    }

    /// The cdr of a cons. nil and other non-cons cells yield nil.
    pub fn cdr(&self, r: GcRef) -> GcRef {
        match self.cell(r) {
            Cell::Cons(_, cdr) => *cdr,
            _ => self.reserved.nil,
        }
    }

    pub fn set_car(&mut self, r: GcRef, value: GcRef) {
        let (slab_idx, slot) = Self::locate(r);
        match &mut self.slabs[slab_idx].cells[slot] {
            Cell::Cons(car, _) => *car = value,
            other => panic!("set_car on a {} cell {:?}", other.type_name(), r),
        }
    }

    pub fn set_cdr(&mut self, r: GcRef, value: GcRef) {
        let (slab_idx, slot) = Self::locate(r);
        match &mut self.slabs[slab_idx].cells[slot] {
            Cell::Cons(_, cdr) => *cdr = value,
            other => panic!("set_cdr on a {} cell {:?}", other.type_name(), r),
        }
    }
}

/// ## Symbols
impl Heap {
    /// Canonicalize a name to its unique symbol cell, creating and
    /// registering the cell on first use.
    pub fn intern(&mut self, name: &str) -> GcRef {
        let mut current = self.symbols;
        while current != self.reserved.nil {
            let sym = self.car(current);
            if let Cell::Symbol(existing) = self.cell(sym) {
                if existing == name {
                    return sym;
                }
            }
            current = self.cdr(current);
        }

        let sym = self.alloc(Cell::Symbol(name.to_string()));
        self.push_root(sym);
        self.symbols = self.cons(sym, self.symbols);
        self.pop_root();
        sym
    }

    /// The cons list of every interned symbol.
    pub fn symbols(&self) -> GcRef {
        self.symbols
    }

    /// The top-level environment frame.
    pub fn toplevel(&self) -> GcRef {
        self.toplevel
    }
}

/// ## Root stack
impl Heap {
    /// Protect a value for the duration of upcoming allocations. Pops must
    /// mirror pushes in LIFO order.
    pub fn push_root(&mut self, r: GcRef) {
        if self.roots.len() == ROOT_STACK_CAPACITY {
            panic!("root stack overflow (capacity {})", ROOT_STACK_CAPACITY);
        }
        self.roots.push(r);
    }

    pub fn pop_root(&mut self) -> GcRef {
        self.roots.pop().expect("root stack underflow")
    }

    pub fn root_depth(&self) -> usize {
        self.roots.len()
    }

    /// Drop every root above `depth`. The evaluator records its entry depth
    /// and restores it on exit so errors unwinding through `?` cannot leave
    /// stale roots behind.
    pub fn truncate_roots(&mut self, depth: usize) {
        self.roots.truncate(depth);
    }
}

/// ## Garbage collection
impl Heap {
    /// Mark everything reachable from the root stack, the symbol table, and
    /// the top-level environment, then sweep every slab, poisoning dead
    /// slots with the guard tag.
    pub fn collect(&mut self) {
        let mut pending: Vec<GcRef> = Vec::with_capacity(self.roots.len() + 2);
        pending.push(self.symbols);
        pending.push(self.toplevel);
        pending.extend_from_slice(&self.roots);

        // The mark bit is tested before any child is pushed, which is what
        // terminates cycles between environments and the closures they hold.
        while let Some(r) = pending.pop() {
            if self.is_marked(r) {
                continue;
            }
            self.set_marked(r);
            match self.cell(r) {
                Cell::Cons(car, cdr) => {
                    pending.push(*car);
                    pending.push(*cdr);
                }
                Cell::Proc(closure) | Cell::Macro(closure) => {
                    pending.push(closure.params);
                    pending.push(closure.body);
                    pending.push(closure.env);
                }
                _ => {}
            }
        }

        for slab in &mut self.slabs {
            for word in 0..slab.in_use.len() {
                let mut dead = slab.in_use[word] & !slab.marked[word];
                slab.in_use[word] &= slab.marked[word];
                slab.marked[word] = 0;
                while dead != 0 {
                    let bit = dead.trailing_zeros() as usize;
                    slab.cells[word * WORD_BITS + bit] = Cell::Guard;
                    dead &= dead - 1;
                }
            }
        }

        self.allocations_since_gc = 0;
        self.collections += 1;
    }

    fn is_marked(&self, r: GcRef) -> bool {
        let (slab_idx, slot) = Self::locate(r);
        let (word, mask) = bit_position(slot);
        self.slabs[slab_idx].marked[word] & mask != 0
    }

    fn set_marked(&mut self, r: GcRef) {
        let (slab_idx, slot) = Self::locate(r);
        let (word, mask) = bit_position(slot);
        self.slabs[slab_idx].marked[word] |= mask;
    }
}

/// ## Statistics
impl Heap {
    pub fn total_allocations(&self) -> u64 {
        self.total_allocations
    }

    pub fn allocations_since_gc(&self) -> u64 {
        self.allocations_since_gc
    }

    pub fn gc_threshold(&self) -> u64 {
        self.gc_threshold
    }

    pub fn collections(&self) -> u64 {
        self.collections
    }

    pub fn live_cells(&self) -> usize {
        self.slabs.iter().map(Slab::live_cells).sum()
    }
}
