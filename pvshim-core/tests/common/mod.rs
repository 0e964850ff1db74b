//! Host-side test doubles shared by the integration and property suites.
//!
//! These stand in for the VM-exit framework the shim is embedded in: a flat
//! byte arena for guest memory, a vCPU carrying register/timer/interrupt
//! state, and a parent vCPU recording what the shim asked of it.

use std::cell::UnsafeCell;
use std::collections::HashMap;

use pvshim_hal::memory::{Gpa, Gva};
use pvshim_hal::{
    Domain, GpaMapping, GuestMemory, GuestMsi, GuestRegister, GvaMapping, HandlerToken,
    HostVcpu, MappingError, ParentVcpu, PvExitAction, RegisterValue, StartOfDayInfo, VcpuRegisters,
};

/// Flat guest-memory arena. Addresses used by these tests are small offsets
/// into it, not real physical addresses.
pub struct TestMemory {
    bytes: UnsafeCell<Vec<u8>>,
}

impl TestMemory {
    pub fn new(size: usize) -> Self {
        Self { bytes: UnsafeCell::new(vec![0u8; size]) }
    }

    fn len(&self) -> usize {
        unsafe { (*self.bytes.get()).len() }
    }

    fn ptr_mut(&self) -> *mut u8 {
        unsafe { (*self.bytes.get()).as_mut_ptr() }
    }

    /// Read back raw bytes for assertions that don't go through a typed
    /// mapping (e.g. verifying the installed trampoline page).
    pub fn snapshot(&self, addr: u64, len: usize) -> Vec<u8> {
        let start = addr as usize;
        unsafe { (&(*self.bytes.get()))[start..start + len].to_vec() }
    }
}

impl GuestMemory for TestMemory {
    fn map_gpa_4k<T>(&self, addr: Gpa) -> Result<GpaMapping<'_, T>, MappingError> {
        let start = addr as usize;
        let end = start.checked_add(core::mem::size_of::<T>()).ok_or(MappingError)?;
        if end > self.len() {
            return Err(MappingError);
        }
        let ptr = unsafe { self.ptr_mut().add(start) } as *mut T;
        Ok(unsafe { GpaMapping::from_raw(ptr) })
    }

    fn map_gva_4k<T>(&self, addr: Gva, len: usize) -> Result<GvaMapping<'_, T>, MappingError> {
        let start = addr as usize;
        let end = start.checked_add(len).ok_or(MappingError)?;
        if end > self.len() {
            return Err(MappingError);
        }
        let ptr = unsafe { self.ptr_mut().add(start) } as *mut T;
        Ok(unsafe { GvaMapping::from_raw(ptr, len) })
    }
}

/// The host-side vCPU backing the impersonated guest vCPU.
pub struct TestVcpu {
    pub mem: TestMemory,
    regs: HashMap<GuestRegister, u64>,
    rip: u64,
    pub interrupts_enabled: bool,
    pub sti_blocking: bool,
    pub pet: Option<u64>,
    pub pet_enabled: bool,
    pub queued: Vec<u8>,
    pub xstate_saved: bool,
    pub parent: TestParent,
}

impl TestVcpu {
    pub fn new() -> Self {
        Self {
            mem: TestMemory::new(0x20_0000),
            regs: HashMap::new(),
            rip: 0,
            interrupts_enabled: true,
            sti_blocking: true,
            pet: None,
            pet_enabled: false,
            queued: Vec::new(),
            xstate_saved: false,
            parent: TestParent::default(),
        }
    }

    /// Seed the hypercall argument registers (RAX/RDI/RSI/RDX).
    pub fn set_hypercall_args(&mut self, number: u64, arg0: u64, arg1: u64, arg2: u64) {
        self.regs.insert(GuestRegister::Rax, number);
        self.regs.insert(GuestRegister::Rdi, arg0);
        self.regs.insert(GuestRegister::Rsi, arg1);
        self.regs.insert(GuestRegister::Rdx, arg2);
    }

    pub fn rax(&self) -> u64 {
        *self.regs.get(&GuestRegister::Rax).unwrap_or(&0)
    }
}

impl VcpuRegisters for TestVcpu {
    fn read_reg(&self, reg: GuestRegister) -> RegisterValue {
        *self.regs.get(&reg).unwrap_or(&0)
    }

    fn write_reg(&mut self, reg: GuestRegister, value: RegisterValue) {
        self.regs.insert(reg, value);
    }

    fn rip(&self) -> u64 {
        self.rip
    }

    fn set_rip(&mut self, rip: u64) {
        self.rip = rip;
    }

    fn interrupts_enabled(&self) -> bool {
        self.interrupts_enabled
    }

    fn clear_sti_blocking(&mut self) {
        self.sti_blocking = false;
    }

    fn advance_past_instruction(&mut self) {
        self.rip += 1;
    }
}

impl GuestMemory for TestVcpu {
    fn map_gpa_4k<T>(&self, addr: Gpa) -> Result<GpaMapping<'_, T>, MappingError> {
        self.mem.map_gpa_4k(addr)
    }

    fn map_gva_4k<T>(&self, addr: Gva, len: usize) -> Result<GvaMapping<'_, T>, MappingError> {
        self.mem.map_gva_4k(addr, len)
    }
}

impl HostVcpu for TestVcpu {
    fn register_cpuid_handler(&mut self, _leaf: u32) -> HandlerToken {}
    fn register_wrmsr_handler(&mut self, _msr: u32) -> HandlerToken {}
    fn register_vmcall_handler(&mut self) -> HandlerToken {}
    fn register_hlt_handler(&mut self) -> HandlerToken {}
    fn register_preemption_timer_handler(&mut self) -> HandlerToken {}
    fn register_save_tsc_handler(&mut self) -> HandlerToken {}
    fn register_exception_handler(&mut self) -> HandlerToken {}
    fn register_resume_delegate(&mut self) -> HandlerToken {}

    fn set_preemption_timer(&mut self, ticks: Option<u64>) {
        self.pet = ticks;
    }

    fn get_preemption_timer(&self) -> Option<u64> {
        self.pet
    }

    fn enable_preemption_timer(&mut self) {
        self.pet_enabled = true;
    }

    fn disable_preemption_timer(&mut self) {
        self.pet_enabled = false;
    }

    fn save_xstate(&mut self) {
        self.xstate_saved = true;
    }

    fn queue_external_interrupt(&mut self, vector: u8) {
        self.queued.push(vector);
    }

    fn parent_vcpu(&self) -> &dyn ParentVcpu {
        &self.parent
    }

    fn parent_vcpu_mut(&mut self) -> &mut dyn ParentVcpu {
        &mut self.parent
    }
}

/// The host-side parent vCPU: records what the shim asked of it.
#[derive(Default)]
pub struct TestParent {
    pub loaded: bool,
    pub queued: Vec<u8>,
    pub pushed: Vec<u8>,
    pub msi_table: HashMap<u8, GuestMsi>,
}

impl ParentVcpu for TestParent {
    fn load(&mut self) {
        self.loaded = true;
    }

    fn queue_external_interrupt(&mut self, vector: u8) {
        self.queued.push(vector);
    }

    fn push_external_interrupt(&mut self, vector: u8) {
        self.pushed.push(vector);
    }

    fn return_resume_after_interrupt(&mut self) -> PvExitAction {
        PvExitAction::ResumeAfterInterrupt
    }

    fn return_yield(&mut self, micros: u64) -> PvExitAction {
        PvExitAction::YieldFor { micros }
    }

    fn find_guest_msi(&self, vector: u8) -> Option<GuestMsi> {
        self.msi_table.get(&vector).copied()
    }
}

/// The enclosing domain object.
pub struct TestDomain {
    pub initdom: bool,
    pub id: u32,
    pub sod: StartOfDayInfo,
    pub rx: std::cell::RefCell<Vec<u8>>,
    pub tx: std::cell::RefCell<Vec<u8>>,
}

impl TestDomain {
    pub fn initdom(sod: StartOfDayInfo) -> Self {
        Self { initdom: true, id: 0, sod, rx: Default::default(), tx: Default::default() }
    }

    pub fn guest(id: u32, sod: StartOfDayInfo) -> Self {
        Self { initdom: false, id, sod, rx: Default::default(), tx: Default::default() }
    }
}

impl Domain for TestDomain {
    fn initdom(&self) -> bool {
        self.initdom
    }

    fn id(&self) -> u32 {
        self.id
    }

    fn sod_info(&self) -> StartOfDayInfo {
        self.sod
    }

    fn hvc_rx_get(&self, buf: &mut [u8]) -> usize {
        let mut rx = self.rx.borrow_mut();
        let n = rx.len().min(buf.len());
        buf[..n].copy_from_slice(&rx[..n]);
        rx.drain(..n);
        n
    }

    fn hvc_tx_put(&self, buf: &[u8]) -> usize {
        self.tx.borrow_mut().extend_from_slice(buf);
        buf.len()
    }
}
