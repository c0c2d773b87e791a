//! Forth-style dual-stack bytecode virtual machine
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

use static_assertions::const_assert_eq;
use zerocopy::{AsBytes, FromBytes, FromZeroes, LittleEndian, U16};

mod fmt;
pub use fmt::StrBuf;

/// Number of bytes in VM memory
pub const RAM_SIZE: usize = 65536;

/// Highest valid RAM address
pub const MEM_MAX: u16 = 0xFFFF;

/// Highest address of the heap, the region a loaded image may occupy
pub const HEAP_MAX: u16 = 0xFBFF;

/// Number of bytes in the heap
pub const HEAP_SIZE: usize = HEAP_MAX as usize + 1;

/// Base address of the reserved [`SysVars`] block
pub const SYS_VARS_ADDR: u16 = 0xFC00;

/// Base address of the terminal input buffer
pub const TIB_ADDR: u16 = 0xFD00;

/// Number of bytes in the terminal input buffer
pub const TIB_SIZE: usize = 256;

/// Opcodes allowed per watchdog period
pub const MAX_CYCLES: u32 = 65_535;

/// Watchdog periods granted before a runaway program is halted
const WATCHDOG_PERIODS: u32 = 4;

/// Runtime faults raised by the interpreter
///
/// The numeric codes are stable: they land in the error register, in
/// [`SysVars::last_fault`], and in [`Host::log_error`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Fault {
    /// Push attempted with the data stack full
    DataOverflow = 1,

    /// Data stack held too few items for the opcode
    DataUnderflow = 2,

    /// Push attempted with the return stack full
    ReturnOverflow = 3,

    /// Return stack held too few items for the opcode
    ///
    /// Raising this fault also clears both stacks.
    ReturnUnderflow = 4,

    /// Address or span reaches outside of RAM
    BadAddress = 5,

    /// Byte at the program counter is not an opcode
    ///
    /// This fault halts the machine.
    BadOpcode = 6,

    /// Watchdog ran out of cycle budgets
    CpuHog = 7,

    /// Division by zero
    DivideByZero = 8,

    /// Quotient does not fit in a word
    DivideOverflow = 9,

    /// Source text failed to compile
    Compile = 10,
}

impl Fault {
    /// Numeric code for this fault
    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Looks up a fault by its numeric code
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Fault::DataOverflow),
            2 => Some(Fault::DataUnderflow),
            3 => Some(Fault::ReturnOverflow),
            4 => Some(Fault::ReturnUnderflow),
            5 => Some(Fault::BadAddress),
            6 => Some(Fault::BadOpcode),
            7 => Some(Fault::CpuHog),
            8 => Some(Fault::DivideByZero),
            9 => Some(Fault::DivideOverflow),
            10 => Some(Fault::Compile),
            _ => None,
        }
    }
}

/// Bytecode operations
///
/// Opcodes are dense: every value from `0x00` to `0x38` decodes, and the
/// discriminants are the wire encoding.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Op {
    /// Spend a cycle doing nothing
    Nop = 0x00,
    /// Stop the dispatch loop
    Halt = 0x01,
    /// Push the next byte, zero extended
    U8 = 0x02,
    /// Push the next two bytes as a little-endian halfword
    U16 = 0x03,
    /// Push the next four bytes as a little-endian word
    I32 = 0x04,
    /// Push the address of an inline counted string and skip past it
    Str = 0x05,
    /// Branch forward if the popped flag is zero
    Bz = 0x06,
    /// Branch forward if the popped flag is nonzero
    Bnz = 0x07,
    /// Add a halfword offset to the program counter, wrapping
    Jmp = 0x08,
    /// Jump like [`Op::Jmp`], pushing a return address first
    Jal = 0x09,
    /// Jump to the address popped from the return stack
    Ret = 0x0a,
    /// Jump to the address popped from the data stack, saving a link
    Call = 0x0b,
    /// Load a byte, zero extended
    Lb = 0x0c,
    /// Store the low byte of the second item
    Sb = 0x0d,
    /// Load a little-endian halfword, zero extended
    Lh = 0x0e,
    /// Store the low halfword of the second item
    Sh = 0x0f,
    /// Load a little-endian word
    Lw = 0x10,
    /// Store a word
    Sw = 0x11,
    /// Add one to the top item
    Inc = 0x12,
    /// Subtract one from the top item
    Dec = 0x13,
    /// Wrapping addition
    Add = 0x14,
    /// Wrapping subtraction
    Sub = 0x15,
    /// Wrapping negation of the top item
    Neg = 0x16,
    /// Wrapping multiplication
    Mul = 0x17,
    /// Signed division, truncating toward zero
    Div = 0x18,
    /// Signed remainder
    Mod = 0x19,
    /// Logical left shift
    Sll = 0x1a,
    /// Logical right shift
    Srl = 0x1b,
    /// Arithmetic right shift
    Sra = 0x1c,
    /// Bitwise complement of the top item
    Inv = 0x1d,
    /// Bitwise exclusive or
    Xor = 0x1e,
    /// Bitwise or
    Or = 0x1f,
    /// Bitwise and
    And = 0x20,
    /// Logical or, yielding 0 or 1
    Orl = 0x21,
    /// Logical and, yielding 0 or 1
    Andl = 0x22,
    /// Signed greater-than, yielding 0 or 1
    Gt = 0x23,
    /// Signed less-than, yielding 0 or 1
    Lt = 0x24,
    /// Signed greater-or-equal, yielding 0 or 1
    Gte = 0x25,
    /// Signed less-or-equal, yielding 0 or 1
    Lte = 0x26,
    /// Equality, yielding 0 or 1
    Eq = 0x27,
    /// Inequality, yielding 0 or 1
    Ne = 0x28,
    /// Discard the top item
    Drop = 0x29,
    /// Push a copy of the top item
    Dup = 0x2a,
    /// Push a copy of the second item
    Over = 0x2b,
    /// Exchange the top two items
    Swap = 0x2c,
    /// Push a copy of the top of the return stack
    R = 0x2d,
    /// Move the top item to the return stack
    Mtr = 0x2e,
    /// Discard the top of the return stack
    Rdrop = 0x2f,
    /// Write the low byte of the popped item to the host
    Emit = 0x30,
    /// Write a counted string from memory to the host
    Print = 0x31,
    /// Write a newline to the host
    Cr = 0x32,
    /// Write the popped item in decimal
    Dot = 0x33,
    /// Write the popped item in hex
    Doth = 0x34,
    /// Write the whole data stack in decimal
    Dots = 0x35,
    /// Write the whole data stack in hex
    Dotsh = 0x36,
    /// Write the whole return stack in hex
    Dotrh = 0x37,
    /// Write a hexdump of a span of memory
    Dump = 0x38,
}

impl Op {
    /// Every opcode, indexed by its encoding
    pub const TABLE: [Op; 57] = [
        Op::Nop,
        Op::Halt,
        Op::U8,
        Op::U16,
        Op::I32,
        Op::Str,
        Op::Bz,
        Op::Bnz,
        Op::Jmp,
        Op::Jal,
        Op::Ret,
        Op::Call,
        Op::Lb,
        Op::Sb,
        Op::Lh,
        Op::Sh,
        Op::Lw,
        Op::Sw,
        Op::Inc,
        Op::Dec,
        Op::Add,
        Op::Sub,
        Op::Neg,
        Op::Mul,
        Op::Div,
        Op::Mod,
        Op::Sll,
        Op::Srl,
        Op::Sra,
        Op::Inv,
        Op::Xor,
        Op::Or,
        Op::And,
        Op::Orl,
        Op::Andl,
        Op::Gt,
        Op::Lt,
        Op::Gte,
        Op::Lte,
        Op::Eq,
        Op::Ne,
        Op::Drop,
        Op::Dup,
        Op::Over,
        Op::Swap,
        Op::R,
        Op::Mtr,
        Op::Rdrop,
        Op::Emit,
        Op::Print,
        Op::Cr,
        Op::Dot,
        Op::Doth,
        Op::Dots,
        Op::Dotsh,
        Op::Dotrh,
        Op::Dump,
    ];
}

impl TryFrom<u8> for Op {
    type Error = Fault;

    fn try_from(v: u8) -> Result<Self, Fault> {
        Op::TABLE
            .get(usize::from(v))
            .copied()
            .ok_or(Fault::BadOpcode)
    }
}

/// Fixed-depth data stack with its two hottest cells split out
///
/// `t` and `s` hold the top and second items; deeper values spill into
/// `cells`, oldest first.
#[derive(Debug, Default)]
pub struct DataStack {
    t: i32,
    s: i32,
    cells: [i32; 16],
    depth: u8,
}

impl DataStack {
    /// Maximum number of items the stack can hold
    pub const MAX_DEPTH: u8 = 18;

    /// Pushes an item, failing when the stack is full
    #[inline]
    fn push(&mut self, v: i32) -> Result<(), Fault> {
        if self.is_full() {
            return Err(Fault::DataOverflow);
        }
        if self.depth > 1 {
            self.cells[usize::from(self.depth) - 2] = self.s;
        }
        self.s = self.t;
        self.t = v;
        self.depth += 1;
        Ok(())
    }

    /// Pops the top item, failing when the stack is empty
    #[inline]
    fn pop(&mut self) -> Result<i32, Fault> {
        let out = self.top()?;
        self.t = self.s;
        if self.depth > 2 {
            self.s = self.cells[usize::from(self.depth) - 3];
        }
        self.depth -= 1;
        Ok(out)
    }

    /// Reads the top item without popping it
    #[inline]
    fn top(&self) -> Result<i32, Fault> {
        if self.depth == 0 {
            return Err(Fault::DataUnderflow);
        }
        Ok(self.t)
    }

    /// Replaces the top item
    ///
    /// Only meaningful after a preceding depth check.
    #[inline]
    fn set_top(&mut self, v: i32) {
        self.t = v;
    }

    /// Reads the top two items as a `(second, top)` pair
    #[inline]
    fn pair(&self) -> Result<(i32, i32), Fault> {
        if self.depth < 2 {
            return Err(Fault::DataUnderflow);
        }
        Ok((self.s, self.t))
    }

    /// Drops the second item, leaving `v` on top
    #[inline]
    fn nip_with(&mut self, v: i32) {
        self.t = v;
        if self.depth > 2 {
            self.s = self.cells[usize::from(self.depth) - 3];
        }
        self.depth -= 1;
    }

    /// Drops the top two items
    #[inline]
    fn drop2(&mut self) {
        if self.depth > 3 {
            self.t = self.cells[usize::from(self.depth) - 3];
            self.s = self.cells[usize::from(self.depth) - 4];
        } else if self.depth > 2 {
            self.t = self.cells[usize::from(self.depth) - 3];
        }
        self.depth -= 2;
    }

    /// Discards every item
    #[inline]
    fn clear(&mut self) {
        self.depth = 0;
    }

    /// Number of items on the stack
    #[inline]
    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// Checks whether the stack is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.depth == 0
    }

    /// Checks whether the stack is full
    #[inline]
    pub fn is_full(&self) -> bool {
        self.depth == Self::MAX_DEPTH
    }

    /// Iterates over the stack, oldest item first
    pub fn entries(&self) -> impl Iterator<Item = i32> + '_ {
        let n = usize::from(self.depth);
        self.cells[..n.saturating_sub(2)]
            .iter()
            .copied()
            .chain((n > 1).then_some(self.s))
            .chain((n > 0).then_some(self.t))
    }
}

/// Fixed-depth return stack with its top cell split out
#[derive(Debug, Default)]
pub struct ReturnStack {
    r: i32,
    cells: [i32; 16],
    depth: u8,
}

impl ReturnStack {
    /// Maximum number of items the stack can hold
    pub const MAX_DEPTH: u8 = 17;

    /// Pushes an item, failing when the stack is full
    #[inline]
    fn push(&mut self, v: i32) -> Result<(), Fault> {
        if self.is_full() {
            return Err(Fault::ReturnOverflow);
        }
        if self.depth > 0 {
            self.cells[usize::from(self.depth) - 1] = self.r;
        }
        self.r = v;
        self.depth += 1;
        Ok(())
    }

    /// Pops the top item, failing when the stack is empty
    #[inline]
    fn pop(&mut self) -> Result<i32, Fault> {
        let out = self.top()?;
        if self.depth > 1 {
            self.r = self.cells[usize::from(self.depth) - 2];
        }
        self.depth -= 1;
        Ok(out)
    }

    /// Reads the top item without popping it
    #[inline]
    fn top(&self) -> Result<i32, Fault> {
        if self.depth == 0 {
            return Err(Fault::ReturnUnderflow);
        }
        Ok(self.r)
    }

    /// Discards every item
    #[inline]
    fn clear(&mut self) {
        self.depth = 0;
    }

    /// Number of items on the stack
    #[inline]
    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// Checks whether the stack is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.depth == 0
    }

    /// Checks whether the stack is full
    #[inline]
    pub fn is_full(&self) -> bool {
        self.depth == Self::MAX_DEPTH
    }

    /// Iterates over the stack, oldest item first
    pub fn entries(&self) -> impl Iterator<Item = i32> + '_ {
        let n = usize::from(self.depth);
        self.cells[..n.saturating_sub(1)]
            .iter()
            .copied()
            .chain((n > 0).then_some(self.r))
    }
}

/// Reserved system variables, mapped at [`SYS_VARS_ADDR`]
///
/// The block lives inside VM memory, so programs can read it with the load
/// opcodes. Fields are little-endian.
#[derive(AsBytes, FromZeroes, FromBytes)]
#[repr(C)]
pub struct SysVars {
    /// Dictionary pointer, the first free heap byte
    pub dp: U16<LittleEndian>,

    /// Code of the most recent fault
    pub last_fault: u8,

    _reserved: u8,
}

const_assert_eq!(core::mem::size_of::<SysVars>(), 4);

/// The virtual machine itself
pub struct Vm<'a> {
    /// 64 KiB of VM memory
    ram: &'a mut [u8; RAM_SIZE],

    /// Data stack
    stack: DataStack,

    /// Return stack
    ret: ReturnStack,

    /// Program counter
    pc: u16,

    /// Error register, code of the most recent fault
    err: u8,

    /// Set by `HALT` and by fatal faults
    halted: bool,
}

/// Applies a binary function to `(second, top)`, leaving the result on top
macro_rules! op_bin {
    ($vm:ident, $f:expr) => {{
        let (a, b) = $vm.stack.pair()?;
        let f: fn(i32, i32) -> i32 = $f;
        $vm.stack.nip_with(f(a, b));
    }};
}

/// Applies a comparison to `(second, top)`, leaving 0 or 1 on top
macro_rules! op_cmp {
    ($vm:ident, $f:expr) => {{
        let (a, b) = $vm.stack.pair()?;
        let f: fn(i32, i32) -> bool = $f;
        $vm.stack.nip_with(f(a, b) as i32);
    }};
}

/// Applies a unary function to the top item in place
macro_rules! op_un {
    ($vm:ident, $f:expr) => {{
        let v = $vm.stack.top()?;
        let f: fn(i32) -> i32 = $f;
        $vm.stack.set_top(f(v));
    }};
}

impl<'a> Vm<'a> {
    /// Builds a new VM with the given image loaded at address zero
    ///
    /// The image is truncated at the heap boundary; the rest of memory is
    /// zero-filled, and zero is the `NOP` opcode.
    pub fn new<'b>(rom: &'b [u8], ram: &'a mut [u8; RAM_SIZE]) -> Self {
        ram.fill(0);
        let n = rom.len().min(HEAP_SIZE);
        ram[..n].copy_from_slice(&rom[..n]);
        let mut out = Self {
            ram,
            stack: DataStack::default(),
            ret: ReturnStack::default(),
            pc: 0,
            err: 0,
            halted: false,
        };
        out.sys_vars_mut().dp.set(n as u16);
        out
    }

    /// Reads the byte at the program counter and advances it, wrapping
    #[inline]
    fn next(&mut self) -> u8 {
        let out = self.ram[usize::from(self.pc)];
        self.pc = self.pc.wrapping_add(1);
        out
    }

    /// Reads one byte of memory
    #[inline]
    fn load_u8(&self, addr: u16) -> u8 {
        self.ram[usize::from(addr)]
    }

    /// Writes one byte of memory
    #[inline]
    fn store_u8(&mut self, addr: u16, v: u8) {
        self.ram[usize::from(addr)] = v;
    }

    /// Checks that `len` bytes starting at `addr` stay inside RAM
    #[inline]
    fn check_span(&self, addr: u16, len: u32) -> Result<(), Fault> {
        if u32::from(addr) + len - 1 > u32::from(MEM_MAX) {
            return Err(Fault::BadAddress);
        }
        Ok(())
    }

    /// Reads a little-endian halfword
    fn load_u16(&self, addr: u16) -> Result<u16, Fault> {
        self.check_span(addr, 2)?;
        let i = usize::from(addr);
        Ok(u16::from_le_bytes([self.ram[i], self.ram[i + 1]]))
    }

    /// Writes a little-endian halfword
    fn store_u16(&mut self, addr: u16, v: u16) -> Result<(), Fault> {
        self.check_span(addr, 2)?;
        let i = usize::from(addr);
        self.ram[i..i + 2].copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    /// Reads a little-endian word
    fn load_u32(&self, addr: u16) -> Result<u32, Fault> {
        self.check_span(addr, 4)?;
        let i = usize::from(addr);
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.ram[i..i + 4]);
        Ok(u32::from_le_bytes(bytes))
    }

    /// Writes a little-endian word
    fn store_u32(&mut self, addr: u16, v: u32) -> Result<(), Fault> {
        self.check_span(addr, 4)?;
        let i = usize::from(addr);
        self.ram[i..i + 4].copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    /// Typed view of the reserved system variable block
    #[inline]
    pub fn sys_vars(&self) -> &SysVars {
        let i = usize::from(SYS_VARS_ADDR);
        SysVars::ref_from(&self.ram[i..][..core::mem::size_of::<SysVars>()]).unwrap()
    }

    /// Typed mutable view of the reserved system variable block
    #[inline]
    pub fn sys_vars_mut(&mut self) -> &mut SysVars {
        let i = usize::from(SYS_VARS_ADDR);
        SysVars::mut_from(&mut self.ram[i..][..core::mem::size_of::<SysVars>()]).unwrap()
    }

    /// Records a fault in the error register and reports it to the host
    ///
    /// The machine keeps running afterwards; only the dispatch loop decides
    /// whether a fault is fatal. Return-stack underflow clears both stacks.
    fn fault(&mut self, host: &mut dyn Host, f: Fault) {
        if f == Fault::ReturnUnderflow {
            self.stack.clear();
            self.ret.clear();
        }
        self.err = f.code();
        self.sys_vars_mut().last_fault = f.code();
        host.log_error(f.code());
    }

    /// Executes a single decoded opcode
    fn op<H: Host>(&mut self, op: Op, host: &mut H) -> Result<(), Fault> {
        match op {
            Op::Nop => op::nop(self, host),
            Op::Halt => op::halt(self, host),
            Op::U8 => op::lit_u8(self, host),
            Op::U16 => op::lit_u16(self, host),
            Op::I32 => op::lit_i32(self, host),
            Op::Str => op::lit_str(self, host),
            Op::Bz => op::bz(self, host),
            Op::Bnz => op::bnz(self, host),
            Op::Jmp => op::jmp(self, host),
            Op::Jal => op::jal(self, host),
            Op::Ret => op::ret(self, host),
            Op::Call => op::call(self, host),
            Op::Lb => op::lb(self, host),
            Op::Sb => op::sb(self, host),
            Op::Lh => op::lh(self, host),
            Op::Sh => op::sh(self, host),
            Op::Lw => op::lw(self, host),
            Op::Sw => op::sw(self, host),
            Op::Inc => op::inc(self, host),
            Op::Dec => op::dec(self, host),
            Op::Add => op::add(self, host),
            Op::Sub => op::sub(self, host),
            Op::Neg => op::neg(self, host),
            Op::Mul => op::mul(self, host),
            Op::Div => op::div(self, host),
            Op::Mod => op::rem(self, host),
            Op::Sll => op::sll(self, host),
            Op::Srl => op::srl(self, host),
            Op::Sra => op::sra(self, host),
            Op::Inv => op::inv(self, host),
            Op::Xor => op::xor(self, host),
            Op::Or => op::or(self, host),
            Op::And => op::and(self, host),
            Op::Orl => op::orl(self, host),
            Op::Andl => op::andl(self, host),
            Op::Gt => op::gt(self, host),
            Op::Lt => op::lt(self, host),
            Op::Gte => op::gte(self, host),
            Op::Lte => op::lte(self, host),
            Op::Eq => op::eq(self, host),
            Op::Ne => op::ne(self, host),
            Op::Drop => op::drop(self, host),
            Op::Dup => op::dup(self, host),
            Op::Over => op::over(self, host),
            Op::Swap => op::swap(self, host),
            Op::R => op::r(self, host),
            Op::Mtr => op::mtr(self, host),
            Op::Rdrop => op::rdrop(self, host),
            Op::Emit => op::emit(self, host),
            Op::Print => op::print(self, host),
            Op::Cr => op::cr(self, host),
            Op::Dot => op::dot(self, host),
            Op::Doth => op::doth(self, host),
            Op::Dots => op::dots(self, host),
            Op::Dotsh => op::dotsh(self, host),
            Op::Dotrh => op::dotrh(self, host),
            Op::Dump => op::dump(self, host),
        }
    }

    /// Executes opcodes until the program halts or the budget runs out
    ///
    /// A faulting opcode leaves its operands and the program counter as they
    /// were, and execution continues with the next fetch. An undefined byte
    /// is fatal. Returns `true` once the machine has halted.
    pub fn step<H: Host>(&mut self, host: &mut H, max_cycles: u32) -> bool {
        for _ in 0..max_cycles {
            if self.halted {
                break;
            }
            let b = self.next();
            match Op::try_from(b) {
                Ok(op) => {
                    if let Err(f) = self.op(op, host) {
                        self.fault(host, f);
                    }
                }
                Err(f) => {
                    self.fault(host, f);
                    self.halted = true;
                }
            }
        }
        self.halted
    }

    /// Runs the dispatch loop until the program halts
    ///
    /// Each watchdog period allows [`MAX_CYCLES`] opcodes. A period that
    /// runs dry raises [`Fault::CpuHog`]; after the last one the machine is
    /// halted outright.
    pub fn run<H: Host>(&mut self, host: &mut H) {
        for _ in 0..WATCHDOG_PERIODS {
            if self.step(host, MAX_CYCLES) {
                return;
            }
            self.fault(host, Fault::CpuHog);
        }
        self.halted = true;
    }

    /// Current program counter
    pub fn pc(&self) -> u16 {
        self.pc
    }

    /// Error register, the code of the most recent fault
    pub fn error(&self) -> u8 {
        self.err
    }

    /// Checks whether the machine has halted
    pub fn halted(&self) -> bool {
        self.halted
    }

    /// Shared reference to the data stack
    pub fn stack(&self) -> &DataStack {
        &self.stack
    }

    /// Shared reference to the return stack
    pub fn ret(&self) -> &ReturnStack {
        &self.ret
    }

    /// Shared reference to VM memory
    pub fn ram(&self) -> &[u8; RAM_SIZE] {
        self.ram
    }

    /// Mutable reference to VM memory
    pub fn ram_mut(&mut self) -> &mut [u8; RAM_SIZE] {
        self.ram
    }
}

mod op {
    use super::*;

    /// Converts a stack item into a RAM address
    #[inline]
    fn addr(n: i32) -> Result<u16, Fault> {
        u16::try_from(n).map_err(|_| Fault::BadAddress)
    }

    /// No Operation
    ///
    /// ```text
    /// NOP --
    /// ```
    ///
    /// Spends a cycle doing nothing.
    #[inline]
    pub fn nop(_: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        Ok(())
    }

    /// Halt
    ///
    /// ```text
    /// HALT --
    /// ```
    ///
    /// Stops the dispatch loop.
    #[inline]
    pub fn halt(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        vm.halted = true;
        Ok(())
    }

    /// Unsigned Byte Literal
    ///
    /// ```text
    /// U8 -- n
    /// ```
    ///
    /// Pushes the byte following the opcode, zero extended.
    #[inline]
    pub fn lit_u8(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        let v = vm.load_u8(vm.pc);
        vm.stack.push(i32::from(v))?;
        vm.pc = vm.pc.wrapping_add(1);
        Ok(())
    }

    /// Unsigned Halfword Literal
    ///
    /// ```text
    /// U16 -- n
    /// ```
    ///
    /// Pushes the two bytes following the opcode as a little-endian
    /// halfword, zero extended.
    #[inline]
    pub fn lit_u16(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        if vm.stack.is_full() {
            return Err(Fault::DataOverflow);
        }
        let v = vm.load_u16(vm.pc)?;
        vm.stack.push(i32::from(v))?;
        vm.pc = vm.pc.wrapping_add(2);
        Ok(())
    }

    /// Word Literal
    ///
    /// ```text
    /// I32 -- n
    /// ```
    ///
    /// Pushes the four bytes following the opcode as a little-endian word.
    #[inline]
    pub fn lit_i32(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        if vm.stack.is_full() {
            return Err(Fault::DataOverflow);
        }
        let v = vm.load_u32(vm.pc)?;
        vm.stack.push(v as i32)?;
        vm.pc = vm.pc.wrapping_add(4);
        Ok(())
    }

    /// String Literal
    ///
    /// ```text
    /// STR -- addr
    /// ```
    ///
    /// Pushes the address of the inline counted string following the opcode,
    /// then skips the program counter past it. The first byte past the
    /// string must be addressable.
    #[inline]
    pub fn lit_str(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        if vm.stack.is_full() {
            return Err(Fault::DataOverflow);
        }
        let len = vm.load_u8(vm.pc);
        let end = u32::from(vm.pc) + 1 + u32::from(len);
        if end > u32::from(MEM_MAX) {
            return Err(Fault::BadAddress);
        }
        vm.stack.push(i32::from(vm.pc))?;
        vm.pc = end as u16;
        Ok(())
    }

    /// Branch if Zero
    ///
    /// ```text
    /// BZ flag --
    /// ```
    ///
    /// Pops a flag. Zero adds the unsigned offset byte to its own address;
    /// nonzero skips the offset byte.
    #[inline]
    pub fn bz(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        let v = vm.stack.top()?;
        if v == 0 {
            let n = vm.load_u8(vm.pc);
            vm.pc = vm
                .pc
                .checked_add(u16::from(n))
                .ok_or(Fault::BadAddress)?;
        } else {
            vm.pc = vm.pc.wrapping_add(1);
        }
        vm.stack.pop()?;
        Ok(())
    }

    /// Branch if Not Zero
    ///
    /// ```text
    /// BNZ flag --
    /// ```
    ///
    /// Pops a flag. Nonzero adds the unsigned offset byte to its own
    /// address; zero skips the offset byte.
    #[inline]
    pub fn bnz(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        let v = vm.stack.top()?;
        if v != 0 {
            let n = vm.load_u8(vm.pc);
            vm.pc = vm
                .pc
                .checked_add(u16::from(n))
                .ok_or(Fault::BadAddress)?;
        } else {
            vm.pc = vm.pc.wrapping_add(1);
        }
        vm.stack.pop()?;
        Ok(())
    }

    /// Jump
    ///
    /// ```text
    /// JMP --
    /// ```
    ///
    /// Adds the halfword offset to its own address, wrapping through the
    /// address space, so jumps reach anywhere in RAM.
    #[inline]
    pub fn jmp(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        let n = vm.load_u16(vm.pc)?;
        vm.pc = vm.pc.wrapping_add(n);
        Ok(())
    }

    /// Jump and Link
    ///
    /// ```text
    /// JAL -- (R: -- ret)
    /// ```
    ///
    /// Pushes the address after the offset field onto the return stack,
    /// then jumps like [`jmp`].
    #[inline]
    pub fn jal(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        if vm.ret.is_full() {
            return Err(Fault::ReturnOverflow);
        }
        let n = vm.load_u16(vm.pc)?;
        vm.ret.push(i32::from(vm.pc) + 2)?;
        vm.pc = vm.pc.wrapping_add(n);
        Ok(())
    }

    /// Return
    ///
    /// ```text
    /// RET -- (R: ret --)
    /// ```
    ///
    /// Pops the return stack into the program counter.
    #[inline]
    pub fn ret(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        let dest = addr(vm.ret.top()?)?;
        vm.ret.pop()?;
        vm.pc = dest;
        Ok(())
    }

    /// Call
    ///
    /// ```text
    /// CALL addr -- (R: -- ret)
    /// ```
    ///
    /// Jumps to the popped absolute address, saving the current program
    /// counter on the return stack.
    #[inline]
    pub fn call(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        if vm.ret.is_full() {
            return Err(Fault::ReturnOverflow);
        }
        let dest = addr(vm.stack.top()?)?;
        vm.ret.push(i32::from(vm.pc))?;
        vm.pc = dest;
        vm.stack.pop()?;
        Ok(())
    }

    /// Load Byte
    ///
    /// ```text
    /// LB addr -- u8
    /// ```
    #[inline]
    pub fn lb(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        let a = addr(vm.stack.top()?)?;
        vm.stack.set_top(i32::from(vm.load_u8(a)));
        Ok(())
    }

    /// Store Byte
    ///
    /// ```text
    /// SB u8 addr --
    /// ```
    ///
    /// Stores the low byte of the second item at the popped address.
    #[inline]
    pub fn sb(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        let (v, a) = vm.stack.pair()?;
        let a = addr(a)?;
        vm.store_u8(a, v as u8);
        vm.stack.drop2();
        Ok(())
    }

    /// Load Halfword
    ///
    /// ```text
    /// LH addr -- u16
    /// ```
    ///
    /// Loads a little-endian halfword, zero extended. The whole span must
    /// be addressable.
    #[inline]
    pub fn lh(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        let a = addr(vm.stack.top()?)?;
        let v = vm.load_u16(a)?;
        vm.stack.set_top(i32::from(v));
        Ok(())
    }

    /// Store Halfword
    ///
    /// ```text
    /// SH u16 addr --
    /// ```
    #[inline]
    pub fn sh(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        let (v, a) = vm.stack.pair()?;
        let a = addr(a)?;
        vm.store_u16(a, v as u16)?;
        vm.stack.drop2();
        Ok(())
    }

    /// Load Word
    ///
    /// ```text
    /// LW addr -- w
    /// ```
    #[inline]
    pub fn lw(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        let a = addr(vm.stack.top()?)?;
        let v = vm.load_u32(a)?;
        vm.stack.set_top(v as i32);
        Ok(())
    }

    /// Store Word
    ///
    /// ```text
    /// SW w addr --
    /// ```
    #[inline]
    pub fn sw(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        let (v, a) = vm.stack.pair()?;
        let a = addr(a)?;
        vm.store_u32(a, v as u32)?;
        vm.stack.drop2();
        Ok(())
    }

    /// Increment
    ///
    /// ```text
    /// INC n -- n+1
    /// ```
    #[inline]
    pub fn inc(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        op_un!(vm, |v| v.wrapping_add(1));
        Ok(())
    }

    /// Decrement
    ///
    /// ```text
    /// DEC n -- n-1
    /// ```
    #[inline]
    pub fn dec(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        op_un!(vm, |v| v.wrapping_sub(1));
        Ok(())
    }

    /// Add
    ///
    /// ```text
    /// ADD a b -- a+b
    /// ```
    #[inline]
    pub fn add(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        op_bin!(vm, |a, b| a.wrapping_add(b));
        Ok(())
    }

    /// Subtract
    ///
    /// ```text
    /// SUB a b -- a-b
    /// ```
    #[inline]
    pub fn sub(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        op_bin!(vm, |a, b| a.wrapping_sub(b));
        Ok(())
    }

    /// Negate
    ///
    /// ```text
    /// NEG n -- -n
    /// ```
    #[inline]
    pub fn neg(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        op_un!(vm, |v| v.wrapping_neg());
        Ok(())
    }

    /// Multiply
    ///
    /// ```text
    /// MUL a b -- a*b
    /// ```
    #[inline]
    pub fn mul(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        op_bin!(vm, |a, b| a.wrapping_mul(b));
        Ok(())
    }

    /// Divide
    ///
    /// ```text
    /// DIV a b -- a/b
    /// ```
    ///
    /// Signed division, truncating toward zero. A zero divisor or an
    /// overflowing quotient faults with the operands untouched.
    #[inline]
    pub fn div(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        let (a, b) = vm.stack.pair()?;
        match a.checked_div(b) {
            Some(q) => {
                vm.stack.nip_with(q);
                Ok(())
            }
            None if b == 0 => Err(Fault::DivideByZero),
            None => Err(Fault::DivideOverflow),
        }
    }

    /// Modulo
    ///
    /// ```text
    /// MOD a b -- a%b
    /// ```
    ///
    /// Signed remainder with the sign of the dividend.
    #[inline]
    pub fn rem(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        let (a, b) = vm.stack.pair()?;
        match a.checked_rem(b) {
            Some(m) => {
                vm.stack.nip_with(m);
                Ok(())
            }
            None if b == 0 => Err(Fault::DivideByZero),
            None => Err(Fault::DivideOverflow),
        }
    }

    /// Shift Left Logical
    ///
    /// ```text
    /// SLL n count -- n<<count
    /// ```
    ///
    /// Shift counts are taken modulo 32.
    #[inline]
    pub fn sll(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        op_bin!(vm, |a, b| a.wrapping_shl(b as u32));
        Ok(())
    }

    /// Shift Right Logical
    ///
    /// ```text
    /// SRL n count -- n>>count
    /// ```
    ///
    /// Shifts in zero bits. Counts are taken modulo 32.
    #[inline]
    pub fn srl(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        op_bin!(vm, |a, b| ((a as u32).wrapping_shr(b as u32)) as i32);
        Ok(())
    }

    /// Shift Right Arithmetic
    ///
    /// ```text
    /// SRA n count -- n>>count
    /// ```
    ///
    /// Shifts in copies of the sign bit. Counts are taken modulo 32.
    #[inline]
    pub fn sra(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        op_bin!(vm, |a, b| a.wrapping_shr(b as u32));
        Ok(())
    }

    /// Invert Bits
    ///
    /// ```text
    /// INV n -- ~n
    /// ```
    #[inline]
    pub fn inv(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        op_un!(vm, |v| !v);
        Ok(())
    }

    /// Bitwise Xor
    ///
    /// ```text
    /// XOR a b -- a^b
    /// ```
    #[inline]
    pub fn xor(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        op_bin!(vm, |a, b| a ^ b);
        Ok(())
    }

    /// Bitwise Or
    ///
    /// ```text
    /// OR a b -- a|b
    /// ```
    #[inline]
    pub fn or(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        op_bin!(vm, |a, b| a | b);
        Ok(())
    }

    /// Bitwise And
    ///
    /// ```text
    /// AND a b -- a&b
    /// ```
    #[inline]
    pub fn and(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        op_bin!(vm, |a, b| a & b);
        Ok(())
    }

    /// Logical Or
    ///
    /// ```text
    /// ORL a b -- flag
    /// ```
    #[inline]
    pub fn orl(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        op_cmp!(vm, |a, b| (a != 0) || (b != 0));
        Ok(())
    }

    /// Logical And
    ///
    /// ```text
    /// ANDL a b -- flag
    /// ```
    #[inline]
    pub fn andl(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        op_cmp!(vm, |a, b| (a != 0) && (b != 0));
        Ok(())
    }

    /// Greater Than
    ///
    /// ```text
    /// GT a b -- flag
    /// ```
    #[inline]
    pub fn gt(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        op_cmp!(vm, |a, b| a > b);
        Ok(())
    }

    /// Less Than
    ///
    /// ```text
    /// LT a b -- flag
    /// ```
    #[inline]
    pub fn lt(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        op_cmp!(vm, |a, b| a < b);
        Ok(())
    }

    /// Greater or Equal
    ///
    /// ```text
    /// GTE a b -- flag
    /// ```
    #[inline]
    pub fn gte(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        op_cmp!(vm, |a, b| a >= b);
        Ok(())
    }

    /// Less or Equal
    ///
    /// ```text
    /// LTE a b -- flag
    /// ```
    #[inline]
    pub fn lte(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        op_cmp!(vm, |a, b| a <= b);
        Ok(())
    }

    /// Equal
    ///
    /// ```text
    /// EQ a b -- flag
    /// ```
    #[inline]
    pub fn eq(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        op_cmp!(vm, |a, b| a == b);
        Ok(())
    }

    /// Not Equal
    ///
    /// ```text
    /// NE a b -- flag
    /// ```
    #[inline]
    pub fn ne(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        op_cmp!(vm, |a, b| a != b);
        Ok(())
    }

    /// Drop
    ///
    /// ```text
    /// DROP n --
    /// ```
    #[inline]
    pub fn drop(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        vm.stack.pop()?;
        Ok(())
    }

    /// Duplicate
    ///
    /// ```text
    /// DUP n -- n n
    /// ```
    #[inline]
    pub fn dup(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        let v = vm.stack.top()?;
        vm.stack.push(v)?;
        Ok(())
    }

    /// Over
    ///
    /// ```text
    /// OVER a b -- a b a
    /// ```
    #[inline]
    pub fn over(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        let (s, _) = vm.stack.pair()?;
        vm.stack.push(s)?;
        Ok(())
    }

    /// Swap
    ///
    /// ```text
    /// SWAP a b -- b a
    /// ```
    #[inline]
    pub fn swap(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        let (s, t) = vm.stack.pair()?;
        vm.stack.t = s;
        vm.stack.s = t;
        Ok(())
    }

    /// Return Stack Copy
    ///
    /// ```text
    /// R -- r
    /// ```
    ///
    /// Pushes a copy of the top of the return stack.
    #[inline]
    pub fn r(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        if vm.stack.is_full() {
            return Err(Fault::DataOverflow);
        }
        let v = vm.ret.top()?;
        vm.stack.push(v)?;
        Ok(())
    }

    /// Move to Return Stack
    ///
    /// ```text
    /// MTR n -- (R: -- n)
    /// ```
    #[inline]
    pub fn mtr(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        let v = vm.stack.top()?;
        vm.ret.push(v)?;
        vm.stack.pop()?;
        Ok(())
    }

    /// Return Stack Drop
    ///
    /// ```text
    /// RDROP -- (R: r --)
    /// ```
    #[inline]
    pub fn rdrop(vm: &mut Vm, _: &mut dyn Host) -> Result<(), Fault> {
        vm.ret.pop()?;
        Ok(())
    }

    /// Emit Character
    ///
    /// ```text
    /// EMIT char --
    /// ```
    ///
    /// Writes the low byte of the popped item to the host.
    #[inline]
    pub fn emit(vm: &mut Vm, host: &mut dyn Host) -> Result<(), Fault> {
        let v = vm.stack.pop()?;
        host.put_char(v as u8);
        Ok(())
    }

    /// Print String
    ///
    /// ```text
    /// PRINT addr --
    /// ```
    ///
    /// Writes the counted string at the popped address to the host. The
    /// first byte past the string must be addressable.
    #[inline]
    pub fn print(vm: &mut Vm, host: &mut dyn Host) -> Result<(), Fault> {
        let a = addr(vm.stack.top()?)?;
        let len = vm.load_u8(a);
        let end = u32::from(a) + 1 + u32::from(len);
        if end > u32::from(MEM_MAX) {
            return Err(Fault::BadAddress);
        }
        let start = usize::from(a) + 1;
        host.write_bytes(&vm.ram[start..start + usize::from(len)]);
        vm.stack.pop()?;
        Ok(())
    }

    /// Carriage Return
    ///
    /// ```text
    /// CR --
    /// ```
    #[inline]
    pub fn cr(_: &mut Vm, host: &mut dyn Host) -> Result<(), Fault> {
        host.put_char(b'\n');
        Ok(())
    }

    /// Print Top of Stack
    ///
    /// ```text
    /// DOT n --
    /// ```
    ///
    /// Writes the popped item in signed decimal, preceded by one space.
    #[inline]
    pub fn dot(vm: &mut Vm, host: &mut dyn Host) -> Result<(), Fault> {
        let v = vm.stack.top()?;
        let mut s = StrBuf::new();
        s.put_spaces(1);
        s.put_decimal(v);
        host.write_bytes(s.bytes());
        vm.stack.pop()?;
        Ok(())
    }

    /// Print Top of Stack in Hex
    ///
    /// ```text
    /// DOTH n --
    /// ```
    ///
    /// Writes the popped item in lowercase hex, preceded by one space.
    #[inline]
    pub fn doth(vm: &mut Vm, host: &mut dyn Host) -> Result<(), Fault> {
        let v = vm.stack.top()?;
        let mut s = StrBuf::new();
        s.put_spaces(1);
        s.put_hex(v as u32);
        host.write_bytes(s.bytes());
        vm.stack.pop()?;
        Ok(())
    }

    /// Print Stack
    ///
    /// ```text
    /// DOTS --
    /// ```
    ///
    /// Writes every data stack item in decimal, oldest first, without
    /// popping anything.
    pub fn dots(vm: &mut Vm, host: &mut dyn Host) -> Result<(), Fault> {
        let mut s = StrBuf::new();
        if vm.stack.is_empty() {
            s.put_str(" Stack is empty");
        } else {
            for v in vm.stack.entries() {
                s.put_spaces(1);
                s.put_decimal(v);
            }
        }
        host.write_bytes(s.bytes());
        Ok(())
    }

    /// Print Stack in Hex
    ///
    /// ```text
    /// DOTSH --
    /// ```
    pub fn dotsh(vm: &mut Vm, host: &mut dyn Host) -> Result<(), Fault> {
        let mut s = StrBuf::new();
        if vm.stack.is_empty() {
            s.put_str(" Stack is empty");
        } else {
            for v in vm.stack.entries() {
                s.put_spaces(1);
                s.put_hex(v as u32);
            }
        }
        host.write_bytes(s.bytes());
        Ok(())
    }

    /// Print Return Stack in Hex
    ///
    /// ```text
    /// DOTRH --
    /// ```
    pub fn dotrh(vm: &mut Vm, host: &mut dyn Host) -> Result<(), Fault> {
        let mut s = StrBuf::new();
        if vm.ret.is_empty() {
            s.put_str(" Return stack is empty");
        } else {
            for v in vm.ret.entries() {
                s.put_spaces(1);
                s.put_hex(v as u32);
            }
        }
        host.write_bytes(s.bytes());
        Ok(())
    }

    /// Hexdump Memory
    ///
    /// ```text
    /// DUMP addr count --
    /// ```
    ///
    /// Writes a hexdump of `count` bytes starting at `addr`, sixteen per
    /// row with an ASCII gutter, and pops both operands. The whole span is
    /// validated before anything is written.
    pub fn dump(vm: &mut Vm, host: &mut dyn Host) -> Result<(), Fault> {
        let (first, count) = vm.stack.pair()?;
        let first = addr(first)?;
        let count = u32::try_from(count).map_err(|_| Fault::BadAddress)?;
        if count > 0 && u32::from(first) + count - 1 > u32::from(MEM_MAX) {
            return Err(Fault::BadAddress);
        }
        vm.stack.drop2();
        let mut left = StrBuf::new();
        let mut right = StrBuf::new();
        let first = u32::from(first);
        for (i, a) in (first..first + count).enumerate() {
            let b = vm.load_u8(a as u16);
            let col = i & 15;
            if col == 0 {
                left.put_hex_u16(a as u16);
                left.put_spaces(2);
            } else if col % 4 == 0 {
                left.put_spaces(1);
                right.put_spaces(1);
            }
            left.put_hex_u8(b);
            if (32..127).contains(&b) {
                right.put_raw_byte(b);
            } else {
                right.put_raw_byte(b'.');
            }
            if col == 15 {
                left.put_spaces(2);
                left.append(&right);
                left.put_newline();
                host.write_bytes(left.bytes());
                left.clear();
                right.clear();
            }
        }
        if !left.is_empty() {
            let pad = 41_usize.saturating_sub(left.len()) + 2;
            left.put_spaces(pad as u8);
            left.append(&right);
            left.put_newline();
            host.write_bytes(left.bytes());
        }
        Ok(())
    }
}

/// Trait connecting the VM to its host environment
pub trait Host {
    /// Reports a fault code at the moment it is raised
    fn log_error(&mut self, code: u8);

    /// Writes a block of output, typically a formatted string
    fn write_bytes(&mut self, bytes: &[u8]);

    /// Writes a single byte of output
    fn put_char(&mut self, byte: u8);

    /// Reads one byte of input, `None` on end of input
    fn get_char(&mut self) -> Option<u8> {
        None
    }
}

/// Host which does nothing
pub struct EmptyHost;

impl Host for EmptyHost {
    fn log_error(&mut self, _code: u8) {
        // nothing to do here
    }

    fn write_bytes(&mut self, _bytes: &[u8]) {
        // nothing to do here
    }

    fn put_char(&mut self, _byte: u8) {
        // nothing to do here
    }
}

/// Loads a bytecode image at address zero and runs it to completion
///
/// Returns the final value of the error register, zero for a clean run.
pub fn load_and_run<H: Host>(rom: &[u8], ram: &mut [u8; RAM_SIZE], host: &mut H) -> u8 {
    let mut vm = Vm::new(rom, ram);
    vm.run(host);
    vm.error()
}

/// Compiles source text into a fresh VM and runs it
///
/// Compilation is not implemented yet, so the error register always ends up
/// holding [`Fault::Compile`]. Compile failures are not reported through
/// [`Host::log_error`].
pub fn compile_and_run<H: Host>(source: &[u8], ram: &mut [u8; RAM_SIZE], host: &mut H) -> u8 {
    let mut vm = Vm::new(&[], ram);
    match compile(source, &mut vm) {
        Ok(()) => vm.run(host),
        Err(f) => vm.err = f.code(),
    }
    vm.error()
}

/// Compiler entry point
///
/// TODO: port the outer interpreter so `compile_and_run` can accept source
/// text instead of prebuilt images.
fn compile(_source: &[u8], _vm: &mut Vm) -> Result<(), Fault> {
    Err(Fault::Compile)
}

#[cfg(feature = "alloc")]
mod ram {
    extern crate alloc;
    use alloc::boxed::Box;

    use crate::RAM_SIZE;

    /// Helper type for building a RAM array of the appropriate size
    ///
    /// This is only available if the `"alloc"` feature is enabled
    pub struct VmRam(Box<[u8; RAM_SIZE]>);

    impl VmRam {
        /// Builds a new zero-initialized RAM
        pub fn new() -> Self {
            VmRam(Box::new([0u8; RAM_SIZE]))
        }

        /// Leaks the memory, returning a `'static` reference
        pub fn leak(self) -> &'static mut [u8; RAM_SIZE] {
            Box::leak(self.0)
        }
    }

    impl Default for VmRam {
        fn default() -> Self {
            Self::new()
        }
    }

    impl core::ops::Deref for VmRam {
        type Target = [u8; RAM_SIZE];
        fn deref(&self) -> &Self::Target {
            &self.0
        }
    }

    impl core::ops::DerefMut for VmRam {
        fn deref_mut(&mut self) -> &mut Self::Target {
            &mut self.0
        }
    }
}

#[cfg(feature = "alloc")]
pub use ram::VmRam;

#[cfg(all(feature = "alloc", test))]
mod test {
    use super::*;

    #[derive(Default)]
    struct TestHost {
        out: Vec<u8>,
        faults: Vec<u8>,
    }

    impl Host for TestHost {
        fn log_error(&mut self, code: u8) {
            self.faults.push(code);
        }

        fn write_bytes(&mut self, bytes: &[u8]) {
            self.out.extend_from_slice(bytes);
        }

        fn put_char(&mut self, byte: u8) {
            self.out.push(byte);
        }
    }

    fn decode_op(s: &str) -> Result<Op, &str> {
        let op = match s {
            "NOP" => Op::Nop,
            "HALT" => Op::Halt,
            "U8" => Op::U8,
            "U16" => Op::U16,
            "I32" => Op::I32,
            "STR" => Op::Str,
            "BZ" => Op::Bz,
            "BNZ" => Op::Bnz,
            "JMP" => Op::Jmp,
            "JAL" => Op::Jal,
            "RET" => Op::Ret,
            "CALL" => Op::Call,
            "LB" => Op::Lb,
            "SB" => Op::Sb,
            "LH" => Op::Lh,
            "SH" => Op::Sh,
            "LW" => Op::Lw,
            "SW" => Op::Sw,
            "INC" => Op::Inc,
            "DEC" => Op::Dec,
            "ADD" => Op::Add,
            "SUB" => Op::Sub,
            "NEG" => Op::Neg,
            "MUL" => Op::Mul,
            "DIV" => Op::Div,
            "MOD" => Op::Mod,
            "SLL" => Op::Sll,
            "SRL" => Op::Srl,
            "SRA" => Op::Sra,
            "INV" => Op::Inv,
            "XOR" => Op::Xor,
            "OR" => Op::Or,
            "AND" => Op::And,
            "ORL" => Op::Orl,
            "ANDL" => Op::Andl,
            "GT" => Op::Gt,
            "LT" => Op::Lt,
            "GTE" => Op::Gte,
            "LTE" => Op::Lte,
            "EQ" => Op::Eq,
            "NE" => Op::Ne,
            "DROP" => Op::Drop,
            "DUP" => Op::Dup,
            "OVER" => Op::Over,
            "SWAP" => Op::Swap,
            "R" => Op::R,
            "MTR" => Op::Mtr,
            "RDROP" => Op::Rdrop,
            "EMIT" => Op::Emit,
            "PRINT" => Op::Print,
            "CR" => Op::Cr,
            "DOT" => Op::Dot,
            "DOTH" => Op::Doth,
            "DOTS" => Op::Dots,
            "DOTSH" => Op::Dotsh,
            "DOTRH" => Op::Dotrh,
            "DUMP" => Op::Dump,
            _ => return Err(s),
        };
        Ok(op)
    }

    /// Assembles a line of mnemonics and decimal immediates into bytecode
    ///
    /// An immediate's width comes from the literal or branch opcode before
    /// it: one byte after `U8` / `BZ` / `BNZ`, two after `U16` / `JMP` /
    /// `JAL`, four after `I32`.
    fn assemble(src: &str) -> Vec<u8> {
        let mut out = vec![];
        let mut width = 0;
        for tok in src.split_whitespace() {
            if let Ok(n) = tok.parse::<i64>() {
                assert_ne!(width, 0, "immediate {tok} has no preceding literal op");
                let bytes = n.to_le_bytes();
                out.extend_from_slice(&bytes[..width]);
                width = 0;
                continue;
            }
            let op = decode_op(tok).unwrap();
            width = match op {
                Op::U8 | Op::Bz | Op::Bnz => 1,
                Op::U16 | Op::Jmp | Op::Jal => 2,
                Op::I32 => 4,
                _ => 0,
            };
            out.push(op as u8);
        }
        out
    }

    /// Runs a line of the form `CODE ( expected stack )`, with the expected
    /// items in decimal, oldest first
    fn run_line(line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let (code, rest) = line.split_once('(').unwrap();
        let expected: Vec<i32> = rest
            .trim_end_matches(')')
            .split_whitespace()
            .map(|s| s.parse().unwrap())
            .collect();
        let mut rom = assemble(code);
        rom.push(Op::Halt as u8);
        let mut ram = VmRam::new();
        let mut vm = Vm::new(&rom, &mut ram);
        vm.run(&mut EmptyHost);
        let actual: Vec<i32> = vm.stack().entries().collect();
        assert_eq!(actual, expected, "failed to execute {code:?}");
    }

    #[test]
    fn opcodes() {
        const TEST_SUITE: &str = "
            U8 0 ( 0 )
            U8 255 ( 255 )
            U16 256 ( 256 )
            U16 65535 ( 65535 )
            I32 2147483647 ( 2147483647 )
            I32 -2147483648 ( -2147483648 )
            I32 -1 ( -1 )
            NOP U8 1 ( 1 )
            U8 1 U8 2 ADD ( 3 )
            I32 2147483647 U8 1 ADD ( -2147483648 )
            U8 5 U8 7 SUB ( -2 )
            U8 7 U8 5 SUB ( 2 )
            U8 9 NEG ( -9 )
            I32 -3 NEG ( 3 )
            U8 6 U8 7 MUL ( 42 )
            I32 -6 U8 7 MUL ( -42 )
            U8 42 U8 6 DIV ( 7 )
            I32 -7 U8 2 DIV ( -3 )
            U8 42 U8 5 MOD ( 2 )
            I32 -7 U8 2 MOD ( -1 )
            U8 41 INC ( 42 )
            U8 0 DEC ( -1 )
            U8 1 U8 4 SLL ( 16 )
            U8 1 U8 33 SLL ( 2 )
            U8 16 U8 2 SRL ( 4 )
            I32 -16 U8 2 SRL ( 1073741820 )
            I32 -16 U8 2 SRA ( -4 )
            U8 0 INV ( -1 )
            I32 -1 INV ( 0 )
            U8 12 U8 10 XOR ( 6 )
            U8 12 U8 10 OR ( 14 )
            U8 12 U8 10 AND ( 8 )
            U8 0 U8 0 ORL ( 0 )
            U8 2 U8 0 ORL ( 1 )
            U8 2 U8 3 ANDL ( 1 )
            U8 0 U8 3 ANDL ( 0 )
            U8 2 U8 1 GT ( 1 )
            U8 1 U8 2 GT ( 0 )
            U8 1 U8 2 LT ( 1 )
            I32 -1 U8 0 LT ( 1 )
            U8 2 U8 2 GTE ( 1 )
            U8 1 U8 2 GTE ( 0 )
            U8 2 U8 2 LTE ( 1 )
            U8 3 U8 2 LTE ( 0 )
            U8 7 U8 7 EQ ( 1 )
            U8 7 U8 8 EQ ( 0 )
            U8 7 U8 8 NE ( 1 )
            U8 7 U8 7 NE ( 0 )
            U8 1 U8 2 DROP ( 1 )
            U8 5 DUP DROP ( 5 )
            U8 3 DUP ( 3 3 )
            U8 1 U8 2 OVER ( 1 2 1 )
            U8 1 U8 2 SWAP ( 2 1 )
            U8 1 U8 2 SWAP SWAP ( 1 2 )
            U8 7 MTR R ( 7 )
            U8 7 MTR U8 1 RDROP ( 1 )
            U8 42 U8 200 SB U8 200 LB ( 42 )
            U16 65535 U16 1000 SH U16 1000 LH ( 65535 )
            I32 -123456 U16 2000 SW U16 2000 LW ( -123456 )
            U8 0 BZ 3 U8 99 U8 1 ( 1 )
            U8 5 BZ 3 U8 99 U8 1 ( 99 1 )
            U8 5 BNZ 3 U8 99 U8 1 ( 1 )
            U8 0 BNZ 3 U8 99 U8 1 ( 99 1 )
            JMP 4 U8 99 U8 1 ( 1 )
            JMP 4 HALT NOP JMP 65532 ( )
            JAL 5 U8 7 HALT U8 99 RET ( 99 7 )
            U8 6 CALL U8 7 HALT U8 99 RET ( 99 7 )
        ";
        for line in TEST_SUITE.lines() {
            run_line(line);
        }
    }

    #[test]
    fn decode_table_is_dense() {
        for (i, op) in Op::TABLE.iter().enumerate() {
            assert_eq!(*op as usize, i);
        }
        assert_eq!(Op::try_from(0x38), Ok(Op::Dump));
        assert_eq!(Op::try_from(0x39), Err(Fault::BadOpcode));
        assert_eq!(Op::try_from(0xff), Err(Fault::BadOpcode));
    }

    #[test]
    fn bad_opcode_is_fatal() {
        let rom = [0x39, Op::U8 as u8, 1, Op::Halt as u8];
        let mut ram = VmRam::new();
        let mut vm = Vm::new(&rom, &mut ram);
        let mut host = TestHost::default();
        vm.run(&mut host);
        assert!(vm.halted());
        assert_eq!(vm.error(), Fault::BadOpcode.code());
        assert_eq!(host.faults, [Fault::BadOpcode.code()]);
        assert!(vm.stack().is_empty());
    }

    #[test]
    fn data_stack_overflow_keeps_state() {
        // The faulting 19th push leaves its literal byte at the PC, so the
        // literal is zero to decode as NOP on the next fetch
        let mut src = String::new();
        for i in 1..=18 {
            src += &format!("U8 {i} ");
        }
        src += "U8 0 ";
        let mut rom = assemble(&src);
        rom.push(Op::Halt as u8);
        let mut ram = VmRam::new();
        let mut vm = Vm::new(&rom, &mut ram);
        let mut host = TestHost::default();
        vm.run(&mut host);
        assert_eq!(vm.stack().depth(), DataStack::MAX_DEPTH);
        assert_eq!(host.faults, [Fault::DataOverflow.code()]);
        assert_eq!(vm.error(), Fault::DataOverflow.code());
        let entries: Vec<i32> = vm.stack().entries().collect();
        assert_eq!(entries, (1..=18).collect::<Vec<i32>>());
    }

    #[test]
    fn data_stack_underflow_reports() {
        let rom = [Op::Drop as u8, Op::U8 as u8, 9, Op::Halt as u8];
        let mut ram = VmRam::new();
        let mut vm = Vm::new(&rom, &mut ram);
        let mut host = TestHost::default();
        vm.run(&mut host);
        assert_eq!(host.faults, [Fault::DataUnderflow.code()]);
        let entries: Vec<i32> = vm.stack().entries().collect();
        assert_eq!(entries, [9]);
    }

    #[test]
    fn return_stack_overflow_keeps_stacks() {
        let mut src = String::new();
        for _ in 0..18 {
            src += "U8 1 MTR ";
        }
        let mut rom = assemble(&src);
        rom.push(Op::Halt as u8);
        let mut ram = VmRam::new();
        let mut vm = Vm::new(&rom, &mut ram);
        let mut host = TestHost::default();
        vm.run(&mut host);
        assert_eq!(host.faults, [Fault::ReturnOverflow.code()]);
        assert_eq!(vm.ret().depth(), ReturnStack::MAX_DEPTH);
        assert_eq!(vm.stack().depth(), 1);
    }

    #[test]
    fn return_underflow_clears_both_stacks() {
        let mut rom = assemble("U8 1 U8 2 RET");
        rom.push(Op::Halt as u8);
        let mut ram = VmRam::new();
        let mut vm = Vm::new(&rom, &mut ram);
        let mut host = TestHost::default();
        vm.run(&mut host);
        assert_eq!(host.faults, [Fault::ReturnUnderflow.code()]);
        assert!(vm.stack().is_empty());
        assert!(vm.ret().is_empty());
        assert!(vm.halted());
    }

    #[test]
    fn r_needs_return_depth() {
        let mut rom = assemble("U8 5 R");
        rom.push(Op::Halt as u8);
        let mut ram = VmRam::new();
        let mut vm = Vm::new(&rom, &mut ram);
        let mut host = TestHost::default();
        vm.run(&mut host);
        assert_eq!(host.faults, [Fault::ReturnUnderflow.code()]);
        assert!(vm.stack().is_empty());
    }

    #[test]
    fn div_by_zero_leaves_operands() {
        let mut rom = assemble("U8 7 U8 0 DIV");
        rom.push(Op::Halt as u8);
        let mut ram = VmRam::new();
        let mut vm = Vm::new(&rom, &mut ram);
        let mut host = TestHost::default();
        vm.run(&mut host);
        assert_eq!(host.faults, [Fault::DivideByZero.code()]);
        let entries: Vec<i32> = vm.stack().entries().collect();
        assert_eq!(entries, [7, 0]);
        assert!(vm.halted());
    }

    #[test]
    fn div_overflow_leaves_operands() {
        let mut rom = assemble("I32 -2147483648 I32 -1 DIV");
        rom.push(Op::Halt as u8);
        let mut ram = VmRam::new();
        let mut vm = Vm::new(&rom, &mut ram);
        let mut host = TestHost::default();
        vm.run(&mut host);
        assert_eq!(host.faults, [Fault::DivideOverflow.code()]);
        let entries: Vec<i32> = vm.stack().entries().collect();
        assert_eq!(entries, [i32::MIN, -1]);
    }

    #[test]
    fn memory_edge_loads() {
        let mut rom = assemble("U16 65534 LW");
        rom.push(Op::Halt as u8);
        let mut ram = VmRam::new();
        let mut vm = Vm::new(&rom, &mut ram);
        let mut host = TestHost::default();
        vm.run(&mut host);
        assert_eq!(host.faults, [Fault::BadAddress.code()]);
        let entries: Vec<i32> = vm.stack().entries().collect();
        assert_eq!(entries, [65534]);

        let mut rom = assemble("U16 65532 LW");
        rom.push(Op::Halt as u8);
        let mut ram = VmRam::new();
        let mut vm = Vm::new(&rom, &mut ram);
        let mut host = TestHost::default();
        vm.run(&mut host);
        assert!(host.faults.is_empty());
        let entries: Vec<i32> = vm.stack().entries().collect();
        assert_eq!(entries, [0]);
    }

    #[test]
    fn emit_writes_characters() {
        let rom = [
            Op::U8 as u8,
            b'h',
            Op::Emit as u8,
            Op::U8 as u8,
            b'i',
            Op::Emit as u8,
            Op::Halt as u8,
        ];
        let mut ram = VmRam::new();
        let mut vm = Vm::new(&rom, &mut ram);
        let mut host = TestHost::default();
        vm.run(&mut host);
        assert_eq!(host.out, b"hi");
        assert!(vm.halted());
        assert_eq!(vm.error(), 0);
    }

    #[test]
    fn emit_truncates_to_low_byte() {
        let mut rom = assemble("U16 360 EMIT");
        rom.push(Op::Halt as u8);
        let mut ram = VmRam::new();
        let mut vm = Vm::new(&rom, &mut ram);
        let mut host = TestHost::default();
        vm.run(&mut host);
        assert_eq!(host.out, [0x68]);
    }

    #[test]
    fn lit_str_pushes_address_and_skips() {
        let mut rom = vec![Op::Str as u8, 3];
        rom.extend_from_slice(b"abc");
        rom.push(Op::Halt as u8);
        let mut ram = VmRam::new();
        let mut vm = Vm::new(&rom, &mut ram);
        let mut host = TestHost::default();
        vm.run(&mut host);
        let entries: Vec<i32> = vm.stack().entries().collect();
        assert_eq!(entries, [1]);
        assert!(host.faults.is_empty());
    }

    #[test]
    fn str_at_memory_edge_faults() {
        // Jump to 0xFFFE, where a string literal claims 255 bytes that
        // cannot fit. The fault leaves the stack alone, and the 0xFF length
        // byte is then fetched as an undefined opcode.
        let rom = [Op::Jmp as u8, 0xfd, 0xff];
        let mut ram = VmRam::new();
        let mut vm = Vm::new(&rom, &mut ram);
        vm.ram_mut()[0xfffe] = Op::Str as u8;
        vm.ram_mut()[0xffff] = 0xff;
        let mut host = TestHost::default();
        vm.run(&mut host);
        assert_eq!(
            host.faults,
            [Fault::BadAddress.code(), Fault::BadOpcode.code()]
        );
        assert!(vm.stack().is_empty());
        assert!(vm.halted());
    }

    #[test]
    fn print_writes_counted_string() {
        let mut rom = vec![Op::Str as u8, 5];
        rom.extend_from_slice(b"hello");
        rom.push(Op::Print as u8);
        rom.push(Op::Halt as u8);
        let mut ram = VmRam::new();
        let mut vm = Vm::new(&rom, &mut ram);
        let mut host = TestHost::default();
        vm.run(&mut host);
        assert_eq!(host.out, b"hello");
        assert!(vm.stack().is_empty());
        assert_eq!(vm.error(), 0);
    }

    #[test]
    fn dot_formats_decimal() {
        let mut rom = assemble("I32 -2147483648 DOT U8 0 DOT");
        rom.push(Op::Halt as u8);
        let mut ram = VmRam::new();
        let mut vm = Vm::new(&rom, &mut ram);
        let mut host = TestHost::default();
        vm.run(&mut host);
        assert_eq!(host.out, b" -2147483648 0");
        assert!(vm.stack().is_empty());
    }

    #[test]
    fn doth_formats_hex() {
        let mut rom = assemble("I32 -1 DOTH U16 7951 DOTH U8 0 DOTH");
        rom.push(Op::Halt as u8);
        let mut ram = VmRam::new();
        let mut vm = Vm::new(&rom, &mut ram);
        let mut host = TestHost::default();
        vm.run(&mut host);
        assert_eq!(host.out, b" ffffffff 1f0f 0");
    }

    #[test]
    fn dots_lists_stack() {
        let mut rom = assemble("DOTS U8 1 U8 2 U8 3 DOTS");
        rom.push(Op::Halt as u8);
        let mut ram = VmRam::new();
        let mut vm = Vm::new(&rom, &mut ram);
        let mut host = TestHost::default();
        vm.run(&mut host);
        assert_eq!(host.out, b" Stack is empty 1 2 3");
        assert_eq!(vm.stack().depth(), 3);
    }

    #[test]
    fn dotrh_lists_return_stack() {
        let mut rom = assemble("DOTRH U8 16 MTR DOTRH");
        rom.push(Op::Halt as u8);
        let mut ram = VmRam::new();
        let mut vm = Vm::new(&rom, &mut ram);
        let mut host = TestHost::default();
        vm.run(&mut host);
        assert_eq!(host.out, b" Return stack is empty 10");
    }

    #[test]
    fn dump_formats_rows() {
        let mut rom = assemble("U16 256 U8 16 DUMP");
        rom.push(Op::Halt as u8);
        let mut ram = VmRam::new();
        let mut vm = Vm::new(&rom, &mut ram);
        vm.ram_mut()[0x100..0x110].copy_from_slice(b"AAAABBBBCCCCDDDD");
        let mut host = TestHost::default();
        vm.run(&mut host);
        assert_eq!(
            host.out,
            b"0100  41414141 42424242 43434343 44444444  AAAA BBBB CCCC DDDD\n"
        );
        assert!(vm.stack().is_empty());
    }

    #[test]
    fn dump_pads_partial_rows() {
        let mut rom = assemble("U16 256 U8 5 DUMP");
        rom.push(Op::Halt as u8);
        let mut ram = VmRam::new();
        let mut vm = Vm::new(&rom, &mut ram);
        vm.ram_mut()[0x100..0x105].copy_from_slice(b"AAAAB");
        let mut host = TestHost::default();
        vm.run(&mut host);
        let expected = format!("0100  41414141 42{}AAAA B\n", " ".repeat(26));
        assert_eq!(host.out, expected.as_bytes());
    }

    #[test]
    fn dump_marks_unprintable_bytes() {
        let mut rom = assemble("U16 256 U8 4 DUMP");
        rom.push(Op::Halt as u8);
        let mut ram = VmRam::new();
        let mut vm = Vm::new(&rom, &mut ram);
        vm.ram_mut()[0x100..0x104].copy_from_slice(&[0x68, 0x69, 0x00, 0x7f]);
        let mut host = TestHost::default();
        vm.run(&mut host);
        let expected = format!("0100  6869007f{}hi..\n", " ".repeat(29));
        assert_eq!(host.out, expected.as_bytes());
    }

    #[test]
    fn dump_rejects_spans_outside_ram() {
        let mut rom = assemble("U16 65535 U8 2 DUMP");
        rom.push(Op::Halt as u8);
        let mut ram = VmRam::new();
        let mut vm = Vm::new(&rom, &mut ram);
        let mut host = TestHost::default();
        vm.run(&mut host);
        assert_eq!(host.faults, [Fault::BadAddress.code()]);
        assert_eq!(host.out, b"");
        assert_eq!(vm.stack().depth(), 2);
    }

    #[test]
    fn watchdog_trips_on_runaway_program() {
        // No HALT anywhere: the PC walks a sea of NOPs forever
        let mut ram = VmRam::new();
        let mut vm = Vm::new(&[], &mut ram);
        let mut host = TestHost::default();
        vm.run(&mut host);
        assert!(vm.halted());
        assert_eq!(vm.error(), Fault::CpuHog.code());
        assert_eq!(host.faults, vec![Fault::CpuHog.code(); 4]);
    }

    #[test]
    fn jump_wraps_program_counter() {
        // JMP lands on the last byte of RAM; the NOP there wraps the PC
        // back to zero and the program loops until the watchdog gives up
        let rom = assemble("JMP 65534");
        let mut ram = VmRam::new();
        let mut vm = Vm::new(&rom, &mut ram);
        let mut host = TestHost::default();
        vm.run(&mut host);
        assert!(vm.halted());
        assert_eq!(vm.error(), Fault::CpuHog.code());
    }

    #[test]
    fn rom_truncates_at_heap_boundary() {
        let rom = vec![Op::Halt as u8; RAM_SIZE];
        let mut ram = VmRam::new();
        let vm = Vm::new(&rom, &mut ram);
        assert_eq!(vm.sys_vars().dp.get(), HEAP_MAX.wrapping_add(1));
        assert_eq!(vm.ram()[usize::from(TIB_ADDR)], 0);
        assert_eq!(vm.ram()[HEAP_SIZE - 1], Op::Halt as u8);
    }

    #[test]
    fn sys_vars_track_load_and_faults() {
        // The fault code lands in RAM where bytecode can read it back
        let mut rom = assemble("U8 0 DROP DROP U16 64514 LB");
        rom.push(Op::Halt as u8);
        let rom_len = rom.len() as u16;
        let mut ram = VmRam::new();
        let mut vm = Vm::new(&rom, &mut ram);
        assert_eq!(vm.sys_vars().dp.get(), rom_len);
        let mut host = TestHost::default();
        vm.run(&mut host);
        assert_eq!(vm.sys_vars().last_fault, Fault::DataUnderflow.code());
        let entries: Vec<i32> = vm.stack().entries().collect();
        assert_eq!(entries, [i32::from(Fault::DataUnderflow.code())]);
    }

    #[test]
    fn fault_codes_round_trip() {
        use Fault::*;
        for f in [
            DataOverflow,
            DataUnderflow,
            ReturnOverflow,
            ReturnUnderflow,
            BadAddress,
            BadOpcode,
            CpuHog,
            DivideByZero,
            DivideOverflow,
            Compile,
        ] {
            assert_eq!(Fault::from_code(f.code()), Some(f));
        }
        assert_eq!(Fault::from_code(0), None);
        assert_eq!(Fault::from_code(11), None);
    }

    #[test]
    fn load_and_run_reports_final_error() {
        let mut ram = VmRam::new();
        let mut host = TestHost::default();
        let rom = [Op::Halt as u8];
        assert_eq!(load_and_run(&rom, &mut ram, &mut host), 0);
        let rom = [0xff];
        assert_eq!(
            load_and_run(&rom, &mut ram, &mut host),
            Fault::BadOpcode.code()
        );
    }

    #[test]
    fn compile_and_run_is_stubbed() {
        let mut ram = VmRam::new();
        let mut host = TestHost::default();
        let code = compile_and_run(b": main 1 2 + ;", &mut ram, &mut host);
        assert_eq!(code, Fault::Compile.code());
        assert!(host.faults.is_empty());
    }

    #[test]
    fn stack_push_pop_laws() {
        let mut s = DataStack::default();
        assert!(s.is_empty());
        assert_eq!(s.pop(), Err(Fault::DataUnderflow));
        s.push(7).unwrap();
        assert_eq!(s.depth(), 1);
        assert_eq!(s.top(), Ok(7));
        assert_eq!(s.pop(), Ok(7));
        assert!(s.is_empty());

        for i in 0..18 {
            s.push(i).unwrap();
        }
        assert!(s.is_full());
        assert_eq!(s.push(99), Err(Fault::DataOverflow));
        for i in (0..18).rev() {
            assert_eq!(s.pop(), Ok(i));
        }
    }

    #[test]
    fn return_stack_push_pop_laws() {
        let mut s = ReturnStack::default();
        assert_eq!(s.pop(), Err(Fault::ReturnUnderflow));
        for i in 0..17 {
            s.push(i).unwrap();
        }
        assert!(s.is_full());
        assert_eq!(s.push(99), Err(Fault::ReturnOverflow));
        let entries: Vec<i32> = s.entries().collect();
        assert_eq!(entries, (0..17).collect::<Vec<i32>>());
        for i in (0..17).rev() {
            assert_eq!(s.pop(), Ok(i));
        }
    }
}
