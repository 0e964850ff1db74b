//! Interrupt & HLT router.

use pvshim_hal::abi::{RunstateState, VIRQ_TIMER};
use pvshim_hal::{Domain, HostVcpu, PvExitAction, VcpuRegisters};

use crate::shim::PvShim;

impl<D: Domain> PvShim<D> {
    /// Route a host-delivered external interrupt: reflect it to a matching
    /// guest MSI owner if one exists, otherwise hand control to the parent
    /// with the vector queued for delivery.
    pub fn route_external_interrupt(&mut self, vcpu: &mut impl HostVcpu, vector: u8, now_tsc: u64) -> PvExitAction {
        if let Some(msi) = vcpu.parent_vcpu().find_guest_msi(vector) {
            if msi.owning_vcpu == self.identity.vcpuid {
                vcpu.queue_external_interrupt(vector);
            } else {
                vcpu.parent_vcpu_mut().push_external_interrupt(vector);
            }
            return PvExitAction::Handled;
        }

        vcpu.save_xstate();
        self.time.update_runstate(RunstateState::Runnable, &mut self.runstate, now_tsc);
        if let Some(area) = self.runstate_area.as_mut() {
            self.runstate.sync_guest_area(area);
        }
        let parent = vcpu.parent_vcpu_mut();
        parent.load();
        parent.queue_external_interrupt(vector);
        parent.return_resume_after_interrupt()
    }

    /// Handle a HLT exit. If the guest has interrupts disabled,
    /// decline so the host applies its default behavior.
    pub fn route_hlt(&mut self, vcpu: &mut impl HostVcpu, now_tsc: u64) -> PvExitAction {
        if !vcpu.interrupts_enabled() {
            return PvExitAction::NotHandled;
        }

        vcpu.advance_past_instruction();
        vcpu.queue_external_interrupt(VIRQ_TIMER as u8);
        self.time.update_runstate(RunstateState::Blocked, &mut self.runstate, now_tsc);
        if let Some(area) = self.runstate_area.as_mut() {
            self.runstate.sync_guest_area(area);
        }
        vcpu.clear_sti_blocking();

        let remaining_pet = self.pet.remaining_ticks(vcpu);
        let micros = yield_budget_micros(remaining_pet, self.pet_shift(), self.tsc_params.tsc_khz);

        vcpu.save_xstate();
        let parent = vcpu.parent_vcpu_mut();
        parent.load();
        parent.return_yield(micros)
    }
}

/// `(pet << pet_shift) * 1000 / tsc_khz`.
fn yield_budget_micros(pet_ticks: u64, pet_shift: u8, tsc_khz: u64) -> u64 {
    if tsc_khz == 0 {
        return 0;
    }
    ((pet_ticks << pet_shift) as u128 * 1000 / tsc_khz as u128) as u64
}
