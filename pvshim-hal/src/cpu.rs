//! Guest register access abstraction.
//!
//! The host VM-exit framework owns the actual vCPU register file; this trait
//! is the narrow read/write surface the shim needs to decode hypercall
//! arguments and steer RIP past a handled instruction.

/// 64-bit register value, as held by a hardware vCPU.
pub type RegisterValue = u64;

/// General-purpose registers the shim reads or writes while handling an exit.
///
/// Hypercall arguments arrive in RDI/RSI/RDX/R10/R8/R9 on the impersonated
/// ABI's calling convention; the hypercall number itself and the return value
/// both live in RAX.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuestRegister {
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rdi,
    Rsi,
    R8,
    R9,
}

/// Register accessors exposed by a guest vCPU.
///
/// Implemented by the host VM-exit framework; `pvshim-core` never implements
/// this trait, only consumes it.
pub trait VcpuRegisters {
    /// Read a general-purpose register.
    fn read_reg(&self, reg: GuestRegister) -> RegisterValue;

    /// Write a general-purpose register.
    fn write_reg(&mut self, reg: GuestRegister, value: RegisterValue);

    /// Current instruction pointer.
    fn rip(&self) -> u64;

    /// Overwrite the instruction pointer.
    fn set_rip(&mut self, rip: u64);

    /// RFLAGS.IF (interrupt flag).
    fn interrupts_enabled(&self) -> bool;

    /// Clear the "blocking by STI" bit in the interruptibility-state field,
    /// as required immediately before a HLT-driven yield.
    fn clear_sti_blocking(&mut self);

    /// Advance RIP past the instruction that caused the current exit
    /// (VMCALL, WRMSR, HLT, ...). Exact length depends on the exit reason and
    /// is computed by the host framework.
    fn advance_past_instruction(&mut self);
}
