//! Preemption-timer driver.

use pvshim_hal::abi::VIRQ_TIMER;
use pvshim_hal::HostVcpu;

use crate::tsc::tsc_to_pet_ticks;

/// Tracks the single-shot preemption timer and the TSC-steal bookkeeping
/// across a vm-exit/resume pair.
#[derive(Debug, Default)]
pub struct PetDriver {
    enabled: bool,
    pet_shift: u8,
    /// TSC reading captured at the most recent vm-exit. Zero means "no exit
    /// captured yet" and disables stealing.
    tsc_at_exit: u64,
}

impl PetDriver {
    pub fn new(pet_shift: u8) -> Self {
        Self { enabled: false, pet_shift, tsc_at_exit: 0 }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Arm the timer for `deadline_tsc`, expressed in PET ticks on `vcpu`.
    pub fn arm(&mut self, vcpu: &mut impl HostVcpu, deadline_tsc: u64, now_tsc: u64) {
        let ticks = tsc_to_pet_ticks(deadline_tsc.saturating_sub(now_tsc), self.pet_shift);
        vcpu.set_preemption_timer(Some(ticks));
        vcpu.enable_preemption_timer();
        self.enabled = true;
    }

    pub fn disarm(&mut self, vcpu: &mut impl HostVcpu) {
        vcpu.disable_preemption_timer();
        vcpu.set_preemption_timer(None);
        self.enabled = false;
    }

    /// Capture `tsc_at_exit` on vm-exit, if the timer is enabled.
    pub fn on_exit(&mut self, now_tsc: u64) {
        if self.enabled {
            self.tsc_at_exit = now_tsc;
        }
    }

    /// On resume: reduce the remaining programmed PET by the ticks stolen
    /// since the captured exit, floored at zero, and reprogram.
    pub fn on_resume(&mut self, vcpu: &mut impl HostVcpu, now_tsc: u64) {
        if !self.enabled || self.tsc_at_exit == 0 {
            return;
        }
        let stolen_tsc = now_tsc.saturating_sub(self.tsc_at_exit);
        let stolen_pet = tsc_to_pet_ticks(stolen_tsc, self.pet_shift);

        if let Some(remaining) = vcpu.get_preemption_timer() {
            let reduced = remaining.saturating_sub(stolen_pet);
            vcpu.set_preemption_timer(Some(reduced));
        }
    }

    /// On PET fire: disable the timer and queue the TIMER VIRQ on this vCPU.
    pub fn on_fire(&mut self, vcpu: &mut impl HostVcpu) {
        self.disarm(vcpu);
        vcpu.queue_external_interrupt(VIRQ_TIMER as u8);
    }

    /// Currently programmed ticks, or zero if disarmed. Used for the HLT
    /// yield budget computation.
    pub fn remaining_ticks(&self, vcpu: &impl HostVcpu) -> u64 {
        vcpu.get_preemption_timer().unwrap_or(0)
    }
}
