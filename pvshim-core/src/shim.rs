//! Identity & initialization: the per-vCPU PV shim object itself.

use pvshim_hal::abi::{
    RunstateState, VcpuRunstateInfo, MSR_HYPERCALL_PAGE, MSR_SELF_IPI, MSR_TSC_DEADLINE,
};
use pvshim_hal::memory::Gpa;
use pvshim_hal::{Domain, GpaMapping, HostVcpu, PvExitAction, PvExitReason, VcpuRegisters};

use crate::cpuid_msr;

use crate::ids::{DomainHandle, Identity, DOMID_ALLOCATOR};
use crate::pet::PetDriver;
use crate::runstate::RunstateTracker;
use crate::time::TimeEngine;
use crate::tsc::TscParams;

/// The per-vCPU PV hypercall shim. Generic over the enclosing domain object;
/// the host vCPU and parent vCPU are passed into each handling call rather
/// than stored, since the host owns their lifetime. Guest-memory mappings
/// the shim holds onto across exits (`time`, `runstate_area`) are stored
/// lifetime-erased for the same reason: no per-exit vCPU borrow lives as
/// long as the shim itself.
pub struct PvShim<D: Domain> {
    pub identity: Identity,
    pub tsc_params: TscParams,
    pet_shift: u8,
    #[allow(dead_code)]
    domain_handle: DomainHandle,
    pub time: TimeEngine,
    pub runstate: RunstateTracker,
    pub runstate_area: Option<GpaMapping<'static, VcpuRunstateInfo>>,
    pub pet: PetDriver,
    pub pet_handlers_added: bool,
    pub shinfo_gpfn: Option<Gpa>,
    pub callback_vector: Option<u8>,
    pub domain: D,
}

impl<D: Domain> PvShim<D> {
    /// Assign identity, compute TSC scaling, seed the domain handle, and
    /// register with the host vCPU the handlers that must exist before the
    /// guest's first instruction runs.
    pub fn new(vcpu: &mut impl HostVcpu, domain: D, tsc_khz: u64, pet_shift: u8) -> Self {
        let identity = if domain.initdom() {
            Identity::assign(true, 0)
        } else {
            Identity::assign(false, DOMID_ALLOCATOR.allocate())
        };
        let tsc_params = TscParams::from_khz(tsc_khz);
        let domain_handle = DomainHandle::from_domid(identity.domid);
        let sod = domain.sod_info();

        vcpu.register_cpuid_handler(pvshim_hal::abi::CPUID_PV_BASE);
        vcpu.register_cpuid_handler(pvshim_hal::abi::CPUID_PV_BASE + 1);
        vcpu.register_cpuid_handler(pvshim_hal::abi::CPUID_PV_BASE + 2);
        vcpu.register_cpuid_handler(pvshim_hal::abi::CPUID_PV_BASE + 4);
        vcpu.register_wrmsr_handler(MSR_HYPERCALL_PAGE);
        vcpu.register_vmcall_handler();
        vcpu.register_wrmsr_handler(MSR_SELF_IPI);
        vcpu.register_exception_handler();

        Self {
            identity,
            tsc_params,
            pet_shift,
            domain_handle,
            time: TimeEngine::new(tsc_params, identity.vcpuid as usize, sod.tsc, sod.wc_sec, sod.wc_nsec),
            runstate: RunstateTracker::new(0),
            runstate_area: None,
            pet: PetDriver::new(pet_shift),
            pet_handlers_added: false,
            shinfo_gpfn: None,
            callback_vector: None,
            domain,
        }
    }

    pub fn pet_shift(&self) -> u8 {
        self.pet_shift
    }

    /// Install the first-call-only PET-related handlers: preemption-timer
    /// fire, HLT, save-TSC, and the APIC TSC-deadline MSR swallow, triggered
    /// by the first `set_singleshot_timer` call.
    pub fn ensure_pet_handlers(&mut self, vcpu: &mut impl HostVcpu) {
        if self.pet_handlers_added {
            return;
        }
        vcpu.register_preemption_timer_handler();
        vcpu.register_hlt_handler();
        vcpu.register_save_tsc_handler();
        vcpu.register_wrmsr_handler(pvshim_hal::abi::MSR_TSC_DEADLINE);
        self.pet_handlers_added = true;
    }

    /// Resume delegate: called every time this vCPU is
    /// about to resume guest execution after any exit.
    pub fn on_resume(&mut self, vcpu: &mut impl HostVcpu, now_tsc: u64) {
        self.time.update_runstate(RunstateState::Running, &mut self.runstate, now_tsc);
        if let Some(area) = self.runstate_area.as_mut() {
            self.runstate.sync_guest_area(area);
        }
        self.pet.on_resume(vcpu, now_tsc);
    }

    /// Bind `shared_info` on a guest request to do so, and install the
    /// resume delegate that keeps it (and the runstate area, once
    /// registered) current across every subsequent exit.
    pub fn init_shared_info(&mut self, vcpu: &mut impl HostVcpu, gpfn: Gpa, now_tsc: u64) -> Result<(), crate::error::HandlerFault> {
        self.time.init_shared_info(gpfn, vcpu, now_tsc)?;
        self.shinfo_gpfn = Some(gpfn);
        vcpu.register_resume_delegate();
        Ok(())
    }

    /// Single entry point the host calls on every registered exit: routes to
    /// the component that owns the reason.
    pub fn handle_exit(&mut self, reason: PvExitReason, vcpu: &mut impl HostVcpu, now_tsc: u64) -> PvExitAction {
        match reason {
            PvExitReason::Cpuid { leaf } => match cpuid_msr::dispatch_cpuid(leaf, &self.identity) {
                Some((eax, ebx, ecx, edx)) => {
                    vcpu.write_reg(pvshim_hal::GuestRegister::Rax, eax as u64);
                    vcpu.write_reg(pvshim_hal::GuestRegister::Rbx, ebx as u64);
                    vcpu.write_reg(pvshim_hal::GuestRegister::Rcx, ecx as u64);
                    vcpu.write_reg(pvshim_hal::GuestRegister::Rdx, edx as u64);
                    vcpu.advance_past_instruction();
                    PvExitAction::Handled
                }
                None => PvExitAction::NotHandled,
            },
            PvExitReason::WriteMsr { msr, value } => self.handle_wrmsr(msr, value, vcpu),
            PvExitReason::VmCall => self.dispatch_hypercall(vcpu, now_tsc),
            PvExitReason::Hlt => self.route_hlt(vcpu, now_tsc),
            PvExitReason::PreemptionTimerExpired => {
                self.pet.on_fire(vcpu);
                PvExitAction::Handled
            }
            PvExitReason::SaveTsc => {
                self.pet.on_exit(now_tsc);
                PvExitAction::Handled
            }
            PvExitReason::Exception { vector } => cpuid_msr::handle_exception(vcpu, vector),
            PvExitReason::Nmi => PvExitAction::NotHandled,
            PvExitReason::ExternalInterrupt { vector } => self.route_external_interrupt(vcpu, vector, now_tsc),
        }
    }

    fn handle_wrmsr(&mut self, msr: u32, value: u64, vcpu: &mut impl HostVcpu) -> PvExitAction {
        let handled = match msr {
            MSR_HYPERCALL_PAGE => cpuid_msr::install_hypercall_page(vcpu, value).is_ok(),
            MSR_SELF_IPI => {
                cpuid_msr::handle_self_ipi_write(vcpu, value);
                true
            }
            MSR_TSC_DEADLINE => {
                cpuid_msr::handle_tsc_deadline_write(value);
                true
            }
            _ => false,
        };
        if handled {
            vcpu.advance_past_instruction();
            PvExitAction::Handled
        } else {
            PvExitAction::NotHandled
        }
    }
}
