//! Register assignment resolution.
//!
//! A register assignment request names a set of registers and the values
//! they should hold *simultaneously*: every value is read as it was before
//! any of the assignments happened. Emitting the moves in declaration order
//! is wrong as soon as one destination is also read by another value
//! (`rdi <- rax, rax <- rdi`), so the resolver orders the moves along the
//! dependency graph and breaks cycles, either with an exchange instruction
//! or by parking one value in a scratch register.
//!
//! Dependencies come from register sources and from the base and index
//! registers of memory operands. Registers outside the request impose no
//! ordering, and an assignment reading its own destination (`rax <- [rax+8]`)
//! is not an edge.

use crate::core::arch::Arch;
use crate::core::error::{ShellResult, ShellcraftError};
use crate::core::fragment::FragmentBuilder;
use crate::core::operand::Operand;
use crate::core::register_file::{RegSet, Register};
use crate::core::target::Target;

/// Ordered set of simultaneous register assignments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentRequest {
    arch: Arch,
    entries: Vec<(Register, Operand)>,
}

impl AssignmentRequest {
    pub fn new(arch: Arch) -> Self {
        Self { arch, entries: Vec::new() }
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    /// Add `dst <- value`.
    ///
    /// Fails with `InvalidOperand` when `dst` (or an alias of it) is already
    /// assigned, is read-only, or cannot be loaded with `value` by a single
    /// instruction of the target.
    pub fn insert(&mut self, dst: Register, value: Operand) -> ShellResult<&mut Self> {
        if dst.arch() != self.arch {
            return Err(ShellcraftError::invalid_operand(
                self.arch,
                dst.name(),
                format!("register belongs to {}", dst.arch()),
            ));
        }
        if let Some((other, _)) = self.entries.iter().find(|(other, _)| other.overlaps(dst)) {
            return Err(ShellcraftError::invalid_operand(
                self.arch,
                dst.name(),
                format!("{other} is already assigned"),
            ));
        }
        let target = self.arch.target();
        target.lowering.load(target, dst, &value)?;
        self.entries.push((dst, value));
        Ok(self)
    }

    /// Builder form of [`AssignmentRequest::insert`].
    pub fn with(mut self, dst: Register, value: Operand) -> ShellResult<Self> {
        self.insert(dst, value)?;
        Ok(self)
    }

    pub fn entries(&self) -> &[(Register, Operand)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One step of a resolved assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Move { dst: Register, src: Operand },
    Exchange { a: Register, b: Register },
}

/// Ordered steps realizing a request, plus the scratch registers they clobber.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub steps: Vec<Step>,
    pub scratch: Vec<Register>,
}

impl Resolution {
    pub fn exchanges(&self) -> usize {
        self.steps.iter().filter(|step| matches!(step, Step::Exchange { .. })).count()
    }

    /// Lower every step for `target` into `out`, recording the scratch
    /// registers as clobbered.
    pub fn emit(&self, target: &Target, out: &mut FragmentBuilder) -> ShellResult<()> {
        for step in &self.steps {
            let insn = match step {
                Step::Move { dst, src } => target.lowering.load(target, *dst, src)?,
                Step::Exchange { a, b } => target.lowering.exchange(target, *a, *b)?,
            };
            out.emit(insn);
        }
        for &reg in &self.scratch {
            out.clobber(reg);
        }
        Ok(())
    }
}

/// Resolution state of one assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MoveState {
    /// Not emitted yet.
    Pending,
    /// Emitted, or satisfied without emitting anything.
    Done,
}

#[derive(Debug, Clone, Copy)]
struct PendingMove {
    dst: Register,
    value: Operand,
    state: MoveState,
}

impl PendingMove {
    fn is_pending(&self) -> bool {
        self.state == MoveState::Pending
    }

    fn is_identity(&self) -> bool {
        self.value == Operand::Register(self.dst)
    }

    /// Whether the value reads `other`'s destination.
    fn reads(&self, other: &PendingMove) -> bool {
        self.value.reads_register(other.dst)
    }
}

/// Resolver for one request.
struct Resolver<'t> {
    target: &'t Target,
    moves: Vec<PendingMove>,
    /// Every destination of the request.
    destinations: RegSet,
    /// Every register some value of the request reads.
    sources: RegSet,
    steps: Vec<Step>,
    scratch: Vec<Register>,
}

impl<'t> Resolver<'t> {
    fn new(request: &AssignmentRequest, target: &'t Target) -> Self {
        let destinations = request.entries.iter().map(|(dst, _)| *dst).collect();
        let sources = request.entries.iter().flat_map(|(_, value)| value.reads()).collect();
        let moves = request
            .entries
            .iter()
            .map(|&(dst, value)| PendingMove { dst, value, state: MoveState::Pending })
            .collect();
        let mut resolver = Self {
            target,
            moves,
            destinations,
            sources,
            steps: Vec::new(),
            scratch: Vec::new(),
        };
        resolver.drop_identities();
        resolver
    }

    fn drop_identities(&mut self) {
        for mv in &mut self.moves {
            if mv.is_pending() && mv.is_identity() {
                log::trace!("{} already holds its value", mv.dst);
                mv.state = MoveState::Done;
            }
        }
    }

    fn pending(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.moves.len()).filter(|&i| self.moves[i].is_pending())
    }

    /// Whether `dst <- value` lowers to an instruction of the target.
    fn is_loadable(&self, dst: Register, value: &Operand) -> bool {
        self.target.lowering.load(self.target, dst, value).is_ok()
    }

    /// Whether some other pending move still needs the current value of `i`'s destination.
    fn is_read(&self, i: usize) -> bool {
        self.pending().any(|j| j != i && self.moves[j].reads(&self.moves[i]))
    }

    fn run(mut self) -> ShellResult<Resolution> {
        loop {
            let Some(first) = self.pending().next() else {
                break;
            };
            let ready = self.pending().find(|&i| !self.is_read(i));
            if let Some(ready) = ready {
                let mv = &mut self.moves[ready];
                log::trace!("move {} <- {}", mv.dst, mv.value);
                self.steps.push(Step::Move { dst: mv.dst, src: mv.value });
                mv.state = MoveState::Done;
                continue;
            }
            let cycle = self.find_cycle(first);
            self.break_cycle(&cycle)?;
        }
        Ok(Resolution { steps: self.steps, scratch: self.scratch })
    }

    /// First pending move other than `i` that reads `i`'s destination.
    fn first_reader(&self, i: usize) -> Option<usize> {
        self.pending().find(|&j| j != i && self.moves[j].reads(&self.moves[i]))
    }

    /// Follow read-by edges from `start` until a move repeats.
    ///
    /// Only called when no move is ready, so every pending move has a
    /// reader. The returned cycle starts at its earliest declared member and
    /// each element is read by the next.
    fn find_cycle(&self, start: usize) -> Vec<usize> {
        let mut path = vec![start];
        let mut current = start;
        while let Some(next) = self.first_reader(current) {
            if let Some(pos) = path.iter().position(|&i| i == next) {
                let mut cycle = path.split_off(pos);
                let earliest = (0..cycle.len()).min_by_key(|&k| cycle[k]).unwrap_or(0);
                cycle.rotate_left(earliest);
                return cycle;
            }
            path.push(next);
            current = next;
        }
        path
    }

    /// Whether every member is a plain full-width copy of its predecessor.
    fn is_register_cycle(&self, cycle: &[usize]) -> bool {
        cycle.iter().enumerate().all(|(k, &i)| {
            let prev = cycle[(k + cycle.len() - 1) % cycle.len()];
            let mv = &self.moves[i];
            mv.dst.is_canonical() && mv.value == Operand::Register(self.moves[prev].dst)
        })
    }

    fn break_cycle(&mut self, cycle: &[usize]) -> ShellResult<()> {
        let names: Vec<&str> = cycle.iter().map(|&i| self.moves[i].dst.name()).collect();
        log::debug!("{}: breaking cycle {}", self.target.arch, names.join(" -> "));

        let swappable = self.target.has_exchange && cycle.len() >= 2 && self.is_register_cycle(cycle);
        if swappable && cycle.len() == 2 && self.exchange(cycle[0], cycle[1]) {
            return Ok(());
        }
        if self.park_in_scratch(cycle[0]) {
            return Ok(());
        }
        if swappable && self.exchange(cycle[0], cycle[1]) {
            return Ok(());
        }
        Err(ShellcraftError::UnresolvableAssignment {
            arch: self.target.arch,
            registers: names.iter().map(|name| name.to_string()).collect(),
        })
    }

    /// Exchange `x` with its reader `y`, which completes `y`.
    ///
    /// Every other pending value reading either register is rewritten to
    /// read the other one. Returns false, changing nothing, when a
    /// sub-register read cannot be rewritten or a rewritten move no longer
    /// lowers to one instruction.
    fn exchange(&mut self, x: usize, y: usize) -> bool {
        let (a, b) = (self.moves[x].dst, self.moves[y].dst);
        let file = &self.target.registers;
        let mut rewritten = Vec::new();
        for i in self.pending().filter(|&i| i != y) {
            let swapped = self.moves[i].value.map_reads(|reg| {
                if reg.overlaps(a) {
                    file.relocate(reg, b)
                } else if reg.overlaps(b) {
                    file.relocate(reg, a)
                } else {
                    Some(reg)
                }
            });
            match swapped {
                Some(value) if self.is_loadable(self.moves[i].dst, &value) => rewritten.push((i, value)),
                _ => return false,
            }
        }

        log::trace!("exchange {a} <-> {b}");
        self.steps.push(Step::Exchange { a, b });
        self.moves[y].state = MoveState::Done;
        for (i, value) in rewritten {
            self.moves[i].value = value;
        }
        self.drop_identities();
        true
    }

    /// Copy `c`'s destination into a free scratch register and point its
    /// readers there. A candidate is unusable when some rewritten reader
    /// would not lower to one instruction (`bh <- r11b` on amd64). Returns
    /// false when no candidate is usable.
    fn park_in_scratch(&mut self, c: usize) -> bool {
        let target = self.target;
        let saved = self.moves[c].dst.canonical();
        let busy: RegSet = self.pending().flat_map(|i| self.moves[i].value.reads()).collect();

        for scratch in target.scratch_candidates() {
            if self.destinations.contains(scratch) || self.sources.contains(scratch) || busy.contains(scratch) {
                continue;
            }
            let rewritten: Option<Vec<(usize, Operand)>> = self
                .pending()
                .filter(|&i| i != c && self.moves[i].reads(&self.moves[c]))
                .map(|i| {
                    let value = self.moves[i].value.relocate(saved, scratch)?;
                    self.is_loadable(self.moves[i].dst, &value).then_some((i, value))
                })
                .collect();
            let Some(rewritten) = rewritten else {
                continue;
            };

            log::debug!("{}: parking {} in scratch {}", target.arch, saved, scratch);
            self.steps.push(Step::Move { dst: scratch, src: Operand::Register(saved) });
            if !self.scratch.contains(&scratch) {
                self.scratch.push(scratch);
            }
            for (i, value) in rewritten {
                self.moves[i].value = value;
            }
            return true;
        }
        false
    }
}

/// Order the assignments of `request` so they take effect simultaneously.
pub fn resolve(request: &AssignmentRequest, target: &Target) -> ShellResult<Resolution> {
    if request.arch != target.arch {
        return Err(ShellcraftError::invalid_operand(
            target.arch,
            format!("{} request", request.arch),
            "request was built for another architecture",
        ));
    }
    let resolution = Resolver::new(request, target).run()?;
    log::debug!(
        "{}: {} assignment(s) resolved in {} step(s), scratch {:?}",
        target.arch,
        request.len(),
        resolution.steps.len(),
        resolution.scratch
    );
    Ok(resolution)
}
