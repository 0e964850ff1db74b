//! Host vCPU and parent-vCPU contracts.
//!
//! Narrower than a full VM-exit loop: a set of registration points the host
//! calls into, plus a handful of accessors back out to host-owned facilities
//! (GPA/GVA mapping, preemption timer, XSTATE, and the parent vCPU).

use crate::cpu::VcpuRegisters;
use crate::memory::GuestMemory;

/// Reasons the host hands control back to the shim. A strict subset of the
/// exits the shim cares about; everything else is the host's business.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PvExitReason {
    /// CPUID executed with `EAX` equal to one of the registered PV leaves.
    Cpuid { leaf: u32 },
    /// WRMSR executed against a registered MSR index.
    WriteMsr { msr: u32, value: u64 },
    /// VMCALL / hypercall instruction.
    VmCall,
    /// HLT instruction.
    Hlt,
    /// Preemption timer fired.
    PreemptionTimerExpired,
    /// General exit fired while the preemption timer is armed, used only to
    /// capture `tsc_at_exit`.
    SaveTsc,
    /// CPU exception other than NMI.
    Exception { vector: u8 },
    /// NMI, always passed through untouched.
    Nmi,
    /// Host-routed external interrupt.
    ExternalInterrupt { vector: u8 },
}

/// What the shim tells the host to do after handling (or declining) an exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PvExitAction {
    /// Exit fully handled; resume the guest.
    Handled,
    /// Exit not recognized or a guest-memory fault occurred while decoding
    /// it; the host should deliver its own default behavior (e.g. inject a
    /// fault into the guest).
    NotHandled,
    /// Resume the parent vCPU after queuing an interrupt for later delivery.
    ResumeAfterInterrupt,
    /// Yield to the parent vCPU for approximately `micros` microseconds.
    YieldFor { micros: u64 },
}

/// Registration handle returned so a caller can tell which handlers have
/// already been installed (backs a `pet_handlers_added`-once guard).
pub type HandlerToken = ();

/// Facilities the host VM-exit framework exposes to the per-vCPU shim.
///
/// Implemented by the host; `pvshim-core::PvShim` is generic over this trait
/// and never implements it.
pub trait HostVcpu: VcpuRegisters + GuestMemory {
    /// Register a handler for a CPUID leaf. Leaves not registered fall
    /// through to host default behavior.
    fn register_cpuid_handler(&mut self, leaf: u32) -> HandlerToken;

    /// Register a write-MSR handler for a specific MSR index.
    fn register_wrmsr_handler(&mut self, msr: u32) -> HandlerToken;

    /// Register the VMCALL/hypercall handler.
    fn register_vmcall_handler(&mut self) -> HandlerToken;

    /// Register the HLT handler.
    fn register_hlt_handler(&mut self) -> HandlerToken;

    /// Register the preemption-timer-fired handler.
    fn register_preemption_timer_handler(&mut self) -> HandlerToken;

    /// Register a general exit handler used solely to capture `tsc_at_exit`
    /// while the preemption timer is armed.
    fn register_save_tsc_handler(&mut self) -> HandlerToken;

    /// Register the exception handler (invoked for all vectors but NMI).
    fn register_exception_handler(&mut self) -> HandlerToken;

    /// Register a resume delegate, invoked every time this vCPU is about to
    /// resume guest execution after any exit.
    fn register_resume_delegate(&mut self) -> HandlerToken;

    /// Program the preemption timer with an absolute tick count. `None`
    /// disarms it.
    fn set_preemption_timer(&mut self, ticks: Option<u64>);

    /// Currently programmed preemption-timer tick count, if armed.
    fn get_preemption_timer(&self) -> Option<u64>;

    fn enable_preemption_timer(&mut self);
    fn disable_preemption_timer(&mut self);

    /// Snapshot and save extended (FPU/SSE/AVX) state before handing control
    /// to the parent vCPU.
    fn save_xstate(&mut self);

    /// Queue an external interrupt for delivery to this vCPU itself.
    fn queue_external_interrupt(&mut self, vector: u8);

    /// Back-reference to the host vCPU backing this guest vCPU.
    fn parent_vcpu(&self) -> &dyn ParentVcpu;

    /// Mutable back-reference, for operations that mutate parent state
    /// (loading it, pushing an interrupt).
    fn parent_vcpu_mut(&mut self) -> &mut dyn ParentVcpu;
}

/// The host-side vCPU backing a guest vCPU: owns physical interrupts,
/// PCI/MSI tables, and yields.
pub trait ParentVcpu {
    /// Make this the currently-scheduled vCPU on the host thread.
    fn load(&mut self);

    /// Queue an external interrupt for this (the parent's own) vCPU.
    fn queue_external_interrupt(&mut self, vector: u8);

    /// Push an external interrupt onto another vCPU's pending list.
    fn push_external_interrupt(&mut self, vector: u8);

    /// Tell the host to resume the parent after an interrupt was queued.
    fn return_resume_after_interrupt(&mut self) -> PvExitAction;

    /// Tell the host to yield to the parent for `micros` microseconds.
    fn return_yield(&mut self, micros: u64) -> PvExitAction;

    /// Resolve a vector to a guest MSI owner, if the parent has one
    /// registered for it.
    fn find_guest_msi(&self, vector: u8) -> Option<GuestMsi>;
}

/// A guest MSI routing entry as owned by the parent vCPU's PCI/MSI tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestMsi {
    /// The guest vCPU (by domain-local index) this MSI targets.
    pub owning_vcpu: u32,
}
