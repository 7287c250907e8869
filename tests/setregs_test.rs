//! Resolver properties checked by executing the steps on a register model.

use hashbrown::HashMap;

use shellcraft::core::operand::{MemoryRef, Operand};
use shellcraft::primitives::registers::setregs;
use shellcraft::x86::encoder::encode;
use shellcraft::{resolve, Arch, AssignmentRequest, Register, Resolution, ShellcraftError, Step, Target};

fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// splitmix64, used both as the generator step and as memory contents.
fn mix(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

/// Concrete register contents, one value per full-width register.
#[derive(Clone)]
struct Machine {
    regs: HashMap<Register, u64>,
}

impl Machine {
    fn new(target: &Target, seed: u64) -> Self {
        let regs = target
            .registers
            .registers()
            .filter(|r| r.is_canonical())
            .map(|r| {
                let value = if r.is_writable() { mix(seed ^ u64::from(r.id())) & mask(r.width()) } else { 0 };
                (r, value)
            })
            .collect();
        Self { regs }
    }

    fn read(&self, reg: Register) -> u64 {
        (self.regs[&reg.canonical()] >> reg.offset()) & mask(reg.width())
    }

    /// Write `value` to `reg`; 32-bit writes to a 64-bit register clear the upper half.
    fn write(&mut self, reg: Register, value: u64) {
        let canonical = reg.canonical();
        if !canonical.is_writable() {
            return;
        }
        let value = value & mask(reg.width());
        let old = self.regs[&canonical];
        let new = if reg.width() == 32 && canonical.width() == 64 {
            value
        } else {
            (old & !(mask(reg.width()) << reg.offset())) | (value << reg.offset())
        };
        self.regs.insert(canonical, new);
    }

    fn eval(&self, value: &Operand, width: u32) -> u64 {
        let raw = match value {
            Operand::Immediate(imm) => imm.value() as u64,
            Operand::Register(reg) => self.read(*reg),
            Operand::Memory(mem) => {
                let index = mem.index().map_or(0, |(r, s)| self.read(r).wrapping_mul(u64::from(s)));
                mix(self.read(mem.base()).wrapping_add(index).wrapping_add(mem.disp() as u64))
            }
        };
        raw & mask(width)
    }

    fn run(&mut self, resolution: &Resolution) {
        for step in &resolution.steps {
            match *step {
                Step::Move { dst, src } => {
                    let value = self.eval(&src, dst.width());
                    self.write(dst, value);
                }
                Step::Exchange { a, b } => {
                    let (va, vb) = (self.read(a), self.read(b));
                    self.write(a, vb);
                    self.write(b, va);
                }
            }
        }
    }
}

/// Execute `resolution` and check every register ends up right.
fn check_resolution(request: &AssignmentRequest, target: &Target, resolution: &Resolution, seed: u64) {
    let before = Machine::new(target, seed);
    let mut after = before.clone();
    after.run(resolution);

    for (dst, value) in request.entries() {
        assert_eq!(
            after.read(*dst),
            before.eval(value, dst.width()),
            "{}: {dst} <- {value} in {request:?} via {:?}",
            target.arch,
            resolution.steps
        );
    }
    for (&reg, value) in &after.regs {
        let requested = request.entries().iter().any(|(dst, _)| dst.overlaps(reg));
        let scratch = resolution.scratch.iter().any(|s| s.overlaps(reg));
        if !requested && !scratch {
            assert_eq!(*value, before.regs[&reg], "{}: {reg} changed by {:?}", target.arch, resolution.steps);
        }
    }
}

/// Resolve `request` and check the result.
fn check(request: &AssignmentRequest, target: &Target) -> Resolution {
    let resolution = resolve(request, target).unwrap();
    check_resolution(request, target, &resolution, 0x1234_5678);
    resolution
}

fn is_cyclic(request: &AssignmentRequest) -> bool {
    let moves: Vec<_> = request
        .entries()
        .iter()
        .filter(|(dst, value)| *value != Operand::Register(*dst))
        .collect();
    // Kahn: repeatedly drop moves nobody else still reads.
    let mut alive = vec![true; moves.len()];
    loop {
        let ready = (0..moves.len()).find(|&i| {
            alive[i]
                && !(0..moves.len()).any(|j| j != i && alive[j] && moves[j].1.reads_register(moves[i].0))
        });
        match ready {
            Some(i) => alive[i] = false,
            None => return alive.iter().any(|&a| a),
        }
    }
}

/// Deterministic xorshift generator.
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    fn below(&mut self, n: usize) -> usize {
        (self.next() % n as u64) as usize
    }

    fn pick<T: Copy>(&mut self, items: &[T]) -> T {
        items[self.below(items.len())]
    }
}

/// Syscall registers and every writable part of them.
fn register_pool(target: &Target) -> Vec<Register> {
    let mut full = target.syscall_arg_registers().unwrap();
    full.push(target.syscall_number_register().unwrap());
    target
        .registers
        .registers()
        .filter(|r| r.is_writable() && full.iter().any(|f| f.overlaps(*r)))
        .collect()
}

fn random_request(target: &Target, pool: &[Register], rng: &mut Rng) -> AssignmentRequest {
    let full: Vec<Register> = pool.iter().copied().filter(|r| r.is_canonical()).collect();
    let mut request = AssignmentRequest::new(target.arch);
    let attempts = 1 + rng.below(full.len() + 2);
    for _ in 0..attempts {
        let dst = rng.pick(pool);
        let value = match rng.below(6) {
            0 => Operand::imm(target.arch, rng.below(1 << dst.width().min(12)) as i128).unwrap(),
            1 | 2 => {
                // Half of the memory loads read their own destination.
                let base = if rng.below(2) == 0 { dst.canonical() } else { rng.pick(&full) };
                Operand::Memory(MemoryRef::new(base, 8 * rng.below(8) as i64).unwrap())
            }
            _ => {
                let same_width: Vec<Register> = pool.iter().copied().filter(|r| r.width() == dst.width()).collect();
                Operand::Register(rng.pick(&same_width))
            }
        };
        // Aliasing destinations and unencodable pairs are rejected up front.
        let _ = request.insert(dst, value);
    }
    request
}

#[test]
fn random_requests_are_resolved_exactly() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut rng = Rng(0x5eed_1234_abcd_0001);
    for arch in Arch::ALL {
        let target = arch.target();
        let pool = register_pool(target);
        let mut sub_registers = 0;
        for round in 0..500u64 {
            let request = random_request(target, &pool, &mut rng);
            if request.is_empty() {
                continue;
            }
            sub_registers += request.entries().iter().filter(|(dst, _)| !dst.is_canonical()).count();
            let resolution = match resolve(&request, target) {
                Ok(resolution) => resolution,
                Err(ShellcraftError::UnresolvableAssignment { .. }) => {
                    assert!(is_cyclic(&request), "{arch}: {request:?}");
                    continue;
                }
                Err(other) => panic!("{arch}: {request:?}: {other}"),
            };
            check_resolution(&request, target, &resolution, mix(round));
            if !is_cyclic(&request) {
                let non_identity = request
                    .entries()
                    .iter()
                    .filter(|(dst, value)| *value != Operand::Register(*dst))
                    .count();
                assert_eq!(resolution.steps.len(), non_identity, "{arch}: {request:?}");
                assert_eq!(resolution.exchanges(), 0);
                assert!(resolution.scratch.is_empty());
            }
            if arch.family() == shellcraft::core::Family::X86 {
                let fragment = setregs(target, &request).unwrap();
                if let Err(e) = encode(arch, &[fragment], 0) {
                    panic!("{arch}: {request:?} does not encode: {e}");
                }
            }
        }
        if pool.iter().any(|r| !r.is_canonical()) {
            assert!(sub_registers > 0, "{arch}: no sub-register destinations generated");
        }
    }
}

fn request(arch: Arch, pairs: &[(&str, &str)]) -> AssignmentRequest {
    let target = arch.target();
    let mut request = AssignmentRequest::new(arch);
    for (dst, value) in pairs {
        request
            .insert(target.register(dst).unwrap(), Operand::parse(arch, value).unwrap())
            .unwrap();
    }
    request
}

#[test]
fn two_register_swap_uses_one_exchange() {
    for (arch, a, b) in [(Arch::Amd64, "rdi", "rsi"), (Arch::I386, "ebx", "ecx")] {
        let target = arch.target();
        let resolution = check(&request(arch, &[(a, b), (b, a)]), target);
        assert_eq!(resolution.steps.len(), 1);
        assert_eq!(resolution.exchanges(), 1);
        assert!(resolution.scratch.is_empty());
    }
}

#[test]
fn swap_without_exchange_goes_through_scratch() {
    for (arch, a, b) in [(Arch::Arm, "r0", "r1"), (Arch::Aarch64, "x0", "x1"), (Arch::Riscv64, "a0", "a1")] {
        let target = arch.target();
        let resolution = check(&request(arch, &[(a, b), (b, a)]), target);
        assert_eq!(resolution.steps.len(), 3, "{arch}");
        assert_eq!(resolution.exchanges(), 0);
        assert_eq!(resolution.scratch.len(), 1);
        let scratch = resolution.scratch[0];
        assert_eq!(scratch.name(), target.scratch[0], "{arch}");
    }
}

#[test]
fn three_cycle_on_amd64_uses_scratch() {
    let target = Arch::Amd64.target();
    let resolution = check(&request(Arch::Amd64, &[("rax", "rbx"), ("rbx", "rcx"), ("rcx", "rax")]), target);
    let steps: Vec<String> = resolution
        .steps
        .iter()
        .map(|step| match step {
            Step::Move { dst, src } => format!("{dst} <- {src}"),
            Step::Exchange { a, b } => format!("{a} <-> {b}"),
        })
        .collect();
    assert_eq!(steps, vec!["r11 <- rax", "rax <- rbx", "rbx <- rcx", "rcx <- r11"]);
    assert_eq!(resolution.exchanges(), 0);
}

#[test]
fn three_cycle_with_every_scratch_busy_uses_two_exchanges() {
    let target = Arch::Amd64.target();
    let cycle = ["rax", "rbx", "rcx"];
    let mut pairs = vec![("rax", "rbx"), ("rbx", "rcx"), ("rcx", "rax")];
    for name in target.scratch.iter().copied().filter(|n| !cycle.contains(n)) {
        pairs.push((name, "7"));
    }
    let resolution = check(&request(Arch::Amd64, &pairs), target);
    assert_eq!(resolution.exchanges(), 2);
    assert!(resolution.scratch.is_empty());
}

#[test]
fn cycle_without_exchange_or_scratch_is_unresolvable() {
    let target = Arch::Riscv64.target();
    let mut pairs = vec![("a0", "a1"), ("a1", "a0")];
    for name in target.scratch.iter().copied().filter(|n| !["a0", "a1"].contains(n)) {
        pairs.push((name, "0"));
    }
    let err = resolve(&request(Arch::Riscv64, &pairs), target).unwrap_err();
    match err {
        ShellcraftError::UnresolvableAssignment { arch, registers } => {
            assert_eq!(arch, Arch::Riscv64);
            assert_eq!(registers, vec!["a0".to_string(), "a1".to_string()]);
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn sub_register_cycle_is_resolved_through_matching_scratch_part() {
    let target = Arch::Amd64.target();
    let resolution = check(&request(Arch::Amd64, &[("eax", "ebx"), ("ebx", "eax")]), target);
    assert_eq!(resolution.scratch.len(), 1);
    assert_eq!(resolution.steps.len(), 3);
    match resolution.steps[2] {
        Step::Move { src: Operand::Register(src), .. } => assert_eq!(src.width(), 32),
        other => panic!("unexpected step {other:?}"),
    }
}

#[test]
fn high_byte_cycle_parks_in_a_legacy_register() {
    let target = Arch::Amd64.target();
    let resolution = check(&request(Arch::Amd64, &[("al", "bh"), ("bh", "al"), ("cl", "5")]), target);
    assert_eq!(resolution.scratch, vec![target.register("rdx").unwrap()]);
}

#[test]
fn request_rejects_conflicting_destinations() {
    let target = Arch::Amd64.target();
    let mut req = AssignmentRequest::new(Arch::Amd64);
    req.insert(target.register("rax").unwrap(), Operand::imm(Arch::Amd64, 1).unwrap())
        .unwrap();
    let err = req
        .insert(target.register("eax").unwrap(), Operand::imm(Arch::Amd64, 2).unwrap())
        .unwrap_err();
    assert!(matches!(err, ShellcraftError::InvalidOperand { .. }));
}
