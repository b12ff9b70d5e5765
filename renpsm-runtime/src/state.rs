//! Simulation storage shared by every rule unit.
//!
//! A membrane is a slot in a fixed-capacity array of packed 32-bit words. The
//! low 24 bits hold the slot of its parent and the high 8 bits say which
//! declared regions it belongs to: region `r` is the `r`-th declared label,
//! and a membrane is in region `r` exactly when bit `24 + r` of its word is
//! set. Every region also keeps a membership list, so that rules can loop over
//! the members of a region without scanning the whole slot array.
//!
//! Variables are dense row-major arrays of `f64` cells keyed by name and
//! arity. Cells start out with every bit set, a NaN that reads as undefined.
//!
//! Everything is stored in atomics so that rule units can run concurrently
//! within a step. Writes are relaxed: the step boundary (the join of the
//! worker pool) is what orders them.

use std::io::{self, Write};
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use tracing::trace;

use crate::error::{Error, Result};
use crate::raster::Raster;
use crate::rng::Rng;

pub const PARENT_BITS: u32 = 24;
pub const PARENT_MASK: u32 = (1 << PARENT_BITS) - 1;
pub const REGION_MASK: u32 = !PARENT_MASK;
pub const MAX_REGIONS: usize = 8;
pub const MAX_CAPACITY: usize = 1 << PARENT_BITS;
pub const DEFAULT_CAPACITY: usize = 524288;
/// Largest number of cells a single variable may allocate.
pub const MAX_CELLS: usize = 1 << 31;

/// Name and arity of the variable whose first cell stops the simulation.
pub const HALT_VARIABLE: (&str, usize) = ("Halt", 1);

const UNDEFINED_BITS: u64 = u64::MAX;
const VACANT: u32 = u32::MAX;

/// The value of a cell that was never written.
pub fn undefined() -> f64 {
    f64::from_bits(UNDEFINED_BITS)
}

/// Convert an evaluated index expression to a slot, rounding to the nearest
/// integer. Indices that are negative or not finite become `usize::MAX`,
/// which is out of bounds for every array.
pub fn index_of(value: f64) -> usize {
    let rounded = value.round();
    if rounded.is_finite() && rounded >= 0.0 && rounded < MAX_CELLS as f64 {
        rounded as usize
    } else {
        usize::MAX
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId(pub usize);

impl RegionId {
    /// The membership bit of this region in a membrane word.
    pub fn bit(self) -> u32 {
        1 << (PARENT_BITS + self.0 as u32)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VariableShape {
    pub name: String,
    pub dims: Vec<usize>,
}

impl VariableShape {
    pub fn arity(&self) -> usize {
        self.dims.len()
    }

    pub fn cells(&self) -> Option<usize> {
        self.dims
            .iter()
            .try_fold(1_usize, |cells, dim| cells.checked_mul(*dim))
    }
}

/// The shape of the simulation state: membrane capacity, declared region
/// labels in declaration order, and variable shapes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Layout {
    capacity: usize,
    regions: Vec<i64>,
    variables: Vec<VariableShape>,
}

impl Layout {
    pub fn new(capacity: usize) -> Layout {
        Layout {
            capacity,
            regions: Vec::new(),
            variables: Vec::new(),
        }
    }

    pub fn with_region(mut self, label: i64) -> Layout {
        self.add_region(label);
        self
    }

    pub fn with_variable(mut self, name: &str, dims: &[usize]) -> Layout {
        self.add_variable(name, dims.to_vec());
        self
    }

    /// Declare a region label, returning the existing region if the label was
    /// already declared.
    pub fn add_region(&mut self, label: i64) -> RegionId {
        match self.region(label) {
            Some(region) => region,
            None => {
                self.regions.push(label);
                RegionId(self.regions.len() - 1)
            }
        }
    }

    /// Declare a variable, widening the dimensions of an existing variable of
    /// the same name and arity.
    pub fn add_variable(&mut self, name: &str, dims: Vec<usize>) -> VarId {
        match self.variable(name, dims.len()) {
            Some(var) => {
                let shape = &mut self.variables[var.0];
                for (size, new_size) in shape.dims.iter_mut().zip(dims) {
                    *size = usize::max(*size, new_size);
                }
                var
            }
            None => {
                let name = name.to_owned();
                self.variables.push(VariableShape { name, dims });
                VarId(self.variables.len() - 1)
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn regions(&self) -> &[i64] {
        &self.regions
    }

    pub fn variables(&self) -> &[VariableShape] {
        &self.variables
    }

    pub fn region(&self, label: i64) -> Option<RegionId> {
        let index = self.regions.iter().position(|l| *l == label)?;
        Some(RegionId(index))
    }

    pub fn variable(&self, name: &str, arity: usize) -> Option<VarId> {
        let index = (self.variables.iter())
            .position(|shape| shape.name == name && shape.arity() == arity)?;
        Some(VarId(index))
    }

    pub fn shape(&self, var: VarId) -> &VariableShape {
        &self.variables[var.0]
    }

    /// Check the layout against the limits of the packed membrane encoding.
    pub fn validate(&self) -> Result<()> {
        if self.capacity > MAX_CAPACITY {
            return Err(Error::CapacityTooLarge {
                capacity: self.capacity,
                bits: PARENT_BITS,
            });
        }
        if self.regions.len() > MAX_REGIONS {
            return Err(Error::TooManyRegions {
                count: self.regions.len(),
                max: MAX_REGIONS,
            });
        }
        for label in &self.regions {
            if usize::try_from(*label).map_or(true, |slot| slot >= self.capacity) {
                return Err(Error::LabelOutOfRange {
                    label: *label,
                    capacity: self.capacity,
                });
            }
        }
        for shape in &self.variables {
            match shape.cells() {
                Some(cells) if cells <= MAX_CELLS => {}
                _ => {
                    return Err(Error::VariableTooLarge {
                        name: shape.name.clone(),
                        dims: shape.dims.clone(),
                    })
                }
            }
        }
        Ok(())
    }
}

struct Variable {
    strides: Vec<usize>,
    dims: Vec<usize>,
    cells: Vec<AtomicU64>,
}

impl Variable {
    fn new(shape: &VariableShape) -> Variable {
        let mut strides = vec![1; shape.dims.len()];
        for i in (0..shape.dims.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * shape.dims[i + 1];
        }
        let cells = shape.cells().unwrap_or(0);

        Variable {
            strides,
            dims: shape.dims.clone(),
            cells: (0..cells).map(|_| AtomicU64::new(UNDEFINED_BITS)).collect(),
        }
    }

    fn offset(&self, indices: &[usize]) -> Option<usize> {
        if indices.len() != self.dims.len() {
            return None;
        }
        let mut offset = 0;
        for ((index, dim), stride) in indices.iter().zip(&self.dims).zip(&self.strides) {
            if index >= dim {
                return None;
            }
            offset += index * stride;
        }
        Some(offset)
    }

    fn indices(&self, mut offset: usize) -> Vec<usize> {
        (self.strides.iter())
            .map(|stride| {
                let index = offset / stride;
                offset %= stride;
                index
            })
            .collect()
    }
}

/// An append-only list of membrane slots.
///
/// Slots are claimed with an atomic increment before they are written, so a
/// reader racing with an append may briefly see a vacant entry. Readers skip
/// those.
struct Membership {
    len: AtomicUsize,
    members: Vec<AtomicU32>,
}

impl Membership {
    fn new(capacity: usize) -> Membership {
        Membership {
            len: AtomicUsize::new(0),
            members: (0..capacity).map(|_| AtomicU32::new(VACANT)).collect(),
        }
    }

    fn push(&self, slot: u32) -> bool {
        let index = self.len.fetch_add(1, Ordering::AcqRel);
        match self.members.get(index) {
            Some(entry) => {
                entry.store(slot, Ordering::Release);
                true
            }
            None => {
                self.len.fetch_sub(1, Ordering::AcqRel);
                false
            }
        }
    }

    fn len(&self) -> usize {
        usize::min(self.len.load(Ordering::Acquire), self.members.len())
    }

    fn get(&self, index: usize) -> Option<usize> {
        match self.members.get(index)?.load(Ordering::Acquire) {
            VACANT => None,
            slot => Some(slot as usize),
        }
    }
}

pub struct State {
    layout: Layout,
    membranes: Vec<AtomicU32>,
    regions: Vec<Membership>,
    variables: Vec<Variable>,
    protein: AtomicI64,
    next_protein: AtomicI64,
    halt: Option<VarId>,
    map: Option<Raster>,
    seed: u64,
}

impl State {
    /// Allocate the storage described by `layout`. Every cell starts out
    /// undefined, every membrane word zero, and the protein at `1`.
    pub fn new(layout: Layout) -> Result<State> {
        layout.validate()?;

        let capacity = layout.capacity();
        let (halt_name, halt_arity) = HALT_VARIABLE;

        Ok(State {
            membranes: (0..capacity).map(|_| AtomicU32::new(0)).collect(),
            regions: (layout.regions().iter())
                .map(|_| Membership::new(capacity))
                .collect(),
            variables: layout.variables().iter().map(Variable::new).collect(),
            protein: AtomicI64::new(1),
            next_protein: AtomicI64::new(1),
            halt: layout.variable(halt_name, halt_arity),
            map: None,
            seed: 0,
            layout,
        })
    }

    pub fn with_map(mut self, map: Raster) -> State {
        self.map = Some(map);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> State {
        self.seed = seed;
        self
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn map(&self) -> Option<&Raster> {
        self.map.as_ref()
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Read a cell. Out of bounds reads are undefined.
    pub fn load(&self, var: VarId, indices: &[usize]) -> f64 {
        let variable = &self.variables[var.0];
        match variable.offset(indices) {
            Some(offset) => f64::from_bits(variable.cells[offset].load(Ordering::Relaxed)),
            None => undefined(),
        }
    }

    /// Write a cell. Out of bounds writes are dropped and return `false`.
    pub fn store(&self, var: VarId, indices: &[usize], value: f64) -> bool {
        let variable = &self.variables[var.0];
        match variable.offset(indices) {
            Some(offset) => {
                variable.cells[offset].store(value.to_bits(), Ordering::Relaxed);
                true
            }
            None => {
                let name = &self.layout.shape(var).name;
                trace!(variable = %name, ?indices, "dropped out of bounds write");
                false
            }
        }
    }

    /// The packed word of a membrane slot, or `0` outside of the capacity.
    pub fn word(&self, slot: usize) -> u32 {
        self.membranes
            .get(slot)
            .map_or(0, |word| word.load(Ordering::Relaxed))
    }

    pub fn parent(&self, slot: usize) -> usize {
        (self.word(slot) & PARENT_MASK) as usize
    }

    pub fn in_region(&self, slot: usize, region: RegionId) -> bool {
        self.word(slot) & region.bit() != 0
    }

    /// Number of slots currently registered in a region.
    pub fn region_len(&self, region: RegionId) -> usize {
        self.regions[region.0].len()
    }

    /// A snapshot of the slots registered in a region, in registration order.
    pub fn members(&self, region: RegionId) -> Vec<usize> {
        let membership = &self.regions[region.0];
        (0..membership.len())
            .filter_map(|index| membership.get(index))
            .collect()
    }

    /// Set the word of a membrane and register it in every region whose bit
    /// is set in `regions`.
    pub fn declare_membrane(&self, slot: usize, parent: usize, regions: u32) -> bool {
        let (Some(word), true) = (self.membranes.get(slot), parent < self.membranes.len()) else {
            trace!(slot, parent, "membrane outside of the capacity");
            return false;
        };

        let packed = (parent as u32 & PARENT_MASK) | (regions & REGION_MASK);
        word.store(packed, Ordering::Relaxed);
        self.register(slot, packed);
        true
    }

    /// Create `child` inside `parent`: the child inherits the regions of its
    /// parent, plus its own region if the child slot is a declared label.
    pub fn create_membrane(&self, child: usize, parent: usize) -> bool {
        let own = i64::try_from(child)
            .ok()
            .and_then(|label| self.layout.region(label))
            .map_or(0, RegionId::bit);
        let inherited = self.word(parent) & REGION_MASK;
        self.declare_membrane(child, parent, inherited | own)
    }

    fn register(&self, slot: usize, word: u32) {
        for (index, membership) in self.regions.iter().enumerate() {
            if word & RegionId(index).bit() != 0 && !membership.push(slot as u32) {
                trace!(slot, region = index, "membership list is full");
            }
        }
    }

    pub fn protein(&self) -> i64 {
        self.protein.load(Ordering::Acquire)
    }

    /// Stage the protein state that becomes live at the next step boundary.
    pub fn stage_protein(&self, next: i64) {
        self.next_protein.store(next, Ordering::Release);
    }

    pub fn commit_protein(&self) {
        let next = self.next_protein.load(Ordering::Acquire);
        self.protein.store(next, Ordering::Release);
    }

    /// Whether the halting variable has been set to something other than zero.
    pub fn halted(&self) -> bool {
        match self.halt {
            Some(var) => {
                let value = self.load(var, &[0]);
                !value.is_nan() && value != 0.0
            }
            None => false,
        }
    }

    /// The random number generator of a unit (and membrane) within a step.
    pub fn rng(&self, step: u64, unit: usize, member: usize) -> Rng {
        Rng::new(self.seed, step, unit as u64, member as u64)
    }

    /// Print every registered membrane and every defined cell.
    pub fn dump(&self, mut out: impl Write) -> io::Result<()> {
        writeln!(out, "----MEMBRANES----")?;
        for (slot, word) in self.membranes.iter().enumerate() {
            let word = word.load(Ordering::Relaxed);
            if word != 0 {
                write!(out, "p({slot}) = {} ", word & PARENT_MASK)?;
            }
        }
        writeln!(out)?;

        writeln!(out, "----VARIABLES----")?;
        for (shape, variable) in self.layout.variables().iter().zip(&self.variables) {
            for (offset, cell) in variable.cells.iter().enumerate() {
                let value = f64::from_bits(cell.load(Ordering::Relaxed));
                if value.is_nan() {
                    continue;
                }
                write!(out, "{}", shape.name)?;
                for index in variable.indices(offset) {
                    write!(out, "[{index}]")?;
                }
                write!(out, " = {value:.2} ")?;
            }
        }
        writeln!(out)
    }

    /// Draw a segment from every member of `root` to its parent, using rows 1
    /// and 2 of `position` as the coordinates of each membrane. Members whose
    /// parent is the root label itself have no position to connect to.
    pub fn draw_tree(&self, raster: &mut Raster, root: RegionId, position: VarId) -> usize {
        let root_label = self.layout.regions()[root.0];
        let coordinates = |slot: usize| {
            let x = self.load(position, &[1, slot]);
            let y = self.load(position, &[2, slot]);
            (x.round() as i64, y.round() as i64)
        };

        let mut segments = 0;
        for child in self.members(root) {
            let parent = self.parent(child);
            if i64::try_from(parent).map_or(false, |parent| parent == root_label) {
                continue;
            }
            let (x0, y0) = coordinates(child);
            let (x1, y1) = coordinates(parent);
            raster.draw_line(x0, y0, x1, y1, 0);
            segments += 1;
        }
        segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_rooms() -> Layout {
        Layout::new(16)
            .with_region(1)
            .with_region(2)
            .with_region(3)
            .with_variable("Y", &[3, 16])
            .with_variable("Halt", &[1])
    }

    #[test]
    fn cells_start_undefined() {
        let state = State::new(two_rooms()).unwrap();
        let y = state.layout().variable("Y", 2).unwrap();
        assert!(state.load(y, &[0, 0]).is_nan());
        assert!(state.store(y, &[2, 15], 4.5));
        assert_eq!(state.load(y, &[2, 15]), 4.5);
        assert!(!state.store(y, &[3, 0], 1.0));
        assert!(state.load(y, &[0, usize::MAX]).is_nan());
        assert!(state.load(y, &[0]).is_nan(), "wrong arity");
    }

    #[test]
    fn adding_a_variable_twice_widens_it() {
        let mut layout = Layout::new(4);
        let a = layout.add_variable("X", vec![2, 1]);
        let b = layout.add_variable("X", vec![1, 5]);
        let c = layout.add_variable("X", vec![3]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(layout.shape(a).dims, [2, 5]);
    }

    #[test]
    fn declared_membranes_join_their_regions() {
        let state = State::new(two_rooms()).unwrap();
        let [r1, r2, r3] = [RegionId(0), RegionId(1), RegionId(2)];

        assert!(state.declare_membrane(2, 1, r1.bit() | r2.bit()));
        assert!(state.declare_membrane(3, 1, r1.bit() | r3.bit()));

        assert_eq!(state.members(r1), [2, 3]);
        assert_eq!(state.members(r2), [2]);
        assert_eq!(state.members(r3), [3]);
        assert_eq!(state.parent(3), 1);
        assert!(state.in_region(3, r3));
        assert!(!state.in_region(3, r2));
    }

    #[test]
    fn created_membranes_inherit_regions() {
        let state = State::new(two_rooms()).unwrap();
        let [r1, r2, r3] = [RegionId(0), RegionId(1), RegionId(2)];
        state.declare_membrane(2, 1, r1.bit() | r2.bit());

        assert!(state.create_membrane(7, 2));
        assert_eq!(state.parent(7), 2);
        assert_eq!(state.word(7) & REGION_MASK, r1.bit() | r2.bit());
        assert_eq!(state.members(r1), [2, 7]);

        // slot 3 is a declared label, so it also joins its own region
        assert!(state.create_membrane(3, 7));
        assert_eq!(state.members(r3), [3]);

        assert!(!state.create_membrane(16, 2));
        assert!(!state.create_membrane(4, 99));
    }

    #[test]
    fn protein_changes_at_commit() {
        let state = State::new(two_rooms()).unwrap();
        state.stage_protein(2);
        assert_eq!(state.protein(), 1);
        state.commit_protein();
        assert_eq!(state.protein(), 2);
    }

    #[test]
    fn halting_needs_a_defined_non_zero_value() {
        let state = State::new(two_rooms()).unwrap();
        let halt = state.layout().variable("Halt", 1).unwrap();
        assert!(!state.halted());
        state.store(halt, &[0], 0.0);
        assert!(!state.halted());
        state.store(halt, &[0], 1.0);
        assert!(state.halted());
    }

    #[test]
    fn layout_limits() {
        let nine = (0..9).fold(Layout::new(16), |layout, label| layout.with_region(label));
        assert!(matches!(
            State::new(nine),
            Err(Error::TooManyRegions { count: 9, max: 8 })
        ));
        assert!(matches!(
            State::new(Layout::new(MAX_CAPACITY + 1)),
            Err(Error::CapacityTooLarge { .. })
        ));
        assert!(matches!(
            State::new(Layout::new(4).with_region(4)),
            Err(Error::LabelOutOfRange { label: 4, .. })
        ));
    }

    #[test]
    fn index_conversion_rounds() {
        assert_eq!(index_of(2.4), 2);
        assert_eq!(index_of(2.5), 3);
        assert_eq!(index_of(-1.0), usize::MAX);
        assert_eq!(index_of(f64::NAN), usize::MAX);
    }

    #[test]
    fn tree_is_drawn_between_positions() {
        let state = State::new(two_rooms()).unwrap();
        let y = state.layout().variable("Y", 2).unwrap();
        let root = RegionId(0);
        state.declare_membrane(2, 1, root.bit());
        state.create_membrane(5, 2);
        for (slot, x, y_) in [(2, 0.0, 0.0), (5, 3.0, 0.0)] {
            state.store(y, &[1, slot], x);
            state.store(y, &[2, slot], y_);
        }

        let mut raster = Raster::new(4, 1, 255);
        assert_eq!(state.draw_tree(&mut raster, root, y), 1);
        assert_eq!(raster.pixels(), [0, 0, 0, 0]);
    }

    #[test]
    fn dump_lists_defined_state() {
        let state = State::new(Layout::new(4).with_region(1).with_variable("X", &[2])).unwrap();
        let x = state.layout().variable("X", 1).unwrap();
        state.declare_membrane(2, 1, RegionId(0).bit());
        state.store(x, &[1], 6.0);

        let mut out = Vec::new();
        state.dump(&mut out).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("p(2) = 1"), "{out}");
        assert!(out.contains("X[1] = 6.00"), "{out}");
        assert!(!out.contains("X[0]"), "{out}");
    }
}
