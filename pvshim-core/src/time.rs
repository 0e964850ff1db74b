//! Time engine: the PV monotonic clock derived from TSC, and the
//! wall clock living in `shared_info`.

use core::sync::atomic::{fence, Ordering};

use pvshim_hal::abi::{SharedInfo, TimeInfoFlags, VcpuTimeInfo, XenpfSettime64};
use pvshim_hal::memory::Gpa;
use pvshim_hal::{GpaMapping, GuestMemory};

use crate::error::HandlerFault;
use crate::runstate::RunstateTracker;
use crate::tsc::{tsc_to_ns, TscParams};

/// Maintains the guest-visible clock pages for one vCPU.
///
/// `shared_info` carries the kernel `vcpu_time_info` (embedded per-vCPU) and
/// the wall clock; `user_time_info` is the separately-registered page from
/// `register_vcpu_time_memory_area` and mirrors the same monotonic values.
/// Both mappings outlive the per-exit vCPU borrow they were created from, so
/// they are stored lifetime-erased (see `GpaMapping::into_static`).
pub struct TimeEngine {
    tsc_params: TscParams,
    vcpuid: usize,
    start_tsc: u64,
    start_wc_sec: u64,
    start_wc_nsec: u32,
    shared_info: Option<GpaMapping<'static, SharedInfo>>,
    user_time_info: Option<GpaMapping<'static, VcpuTimeInfo>>,
}

impl TimeEngine {
    pub fn new(tsc_params: TscParams, vcpuid: usize, start_tsc: u64, start_wc_sec: u64, start_wc_nsec: u32) -> Self {
        Self {
            tsc_params,
            vcpuid,
            start_tsc,
            start_wc_sec,
            start_wc_nsec,
            shared_info: None,
            user_time_info: None,
        }
    }

    /// Convert a TSC reading to nanoseconds since this engine's start-of-day
    /// TSC.
    pub fn now_ns(&self, tsc: u64) -> u64 {
        let delta = tsc.saturating_sub(self.start_tsc);
        tsc_to_ns(delta, self.tsc_params.tsc_shift, self.tsc_params.tsc_mul)
    }

    /// Map the shared-info page, fill the kernel `vcpu_time_info` with the
    /// TSC params and `now_tsc`, and write the wall clock derived from the
    /// domain's start-of-day values plus the TSC delta to now.
    pub fn init_shared_info(
        &mut self,
        gpfn: Gpa,
        mem: &impl GuestMemory,
        now_tsc: u64,
    ) -> Result<(), HandlerFault> {
        let mut mapping = mem.map_gpa_4k::<SharedInfo>(gpfn)?;
        let now_ns = self.now_ns(now_tsc);

        self.write_kernel_vti_locked(&mut mapping, now_tsc, now_ns);
        self.write_wallclock_locked(&mut mapping, now_ns);

        self.shared_info = Some(unsafe { mapping.into_static() });
        Ok(())
    }

    /// Register the user-visible `vcpu_time_info` page requested by
    /// `register_vcpu_time_memory_area`.
    pub fn register_user_time_info(
        &mut self,
        gpfn: Gpa,
        mem: &impl GuestMemory,
    ) -> Result<(), HandlerFault> {
        let mapping = mem.map_gpa_4k::<VcpuTimeInfo>(gpfn)?;
        self.user_time_info = Some(unsafe { mapping.into_static() });
        Ok(())
    }

    /// Advance both `vcpu_time_info` pages to `now_tsc`, then transition
    /// `runstate` accordingly. Each sub-update short-circuits if its target
    /// page is not bound.
    pub fn update_runstate(&mut self, new_state: pvshim_hal::abi::RunstateState, runstate: &mut RunstateTracker, now_tsc: u64) {
        let now_ns = self.now_ns(now_tsc);

        if let Some(mapping) = self.shared_info.as_mut() {
            Self::write_kernel_vti_locked_static(mapping, self.vcpuid, now_tsc, now_ns);
        }
        if let Some(mapping) = self.user_time_info.as_mut() {
            write_vti_locked(mapping, now_tsc, now_ns, self.tsc_params);
        }

        runstate.transition(new_state, now_ns);
    }

    /// `wc_sec/wc_sec_hi/wc_nsec` derived from `secs + nsecs - system_time`,
    /// under the wall-clock sequence lock.
    pub fn update_wallclock(&mut self, settime: XenpfSettime64) {
        let system_time_ns = settime.system_time;
        let total_nsec = (settime.secs as u64)
            .saturating_mul(1_000_000_000)
            .saturating_add(settime.nsecs as u64)
            .saturating_sub(system_time_ns);
        let wc_sec = total_nsec / 1_000_000_000;
        let wc_nsec = (total_nsec % 1_000_000_000) as u32;

        if let Some(mapping) = self.shared_info.as_mut() {
            let mut info = mapping.read();
            info.wc_version = info.wc_version.wrapping_add(1);
            mapping.write(info);
            fence(Ordering::Release);

            info.wc_sec = wc_sec as u32;
            info.wc_sec_hi = (wc_sec >> 32) as u32;
            info.wc_nsec = wc_nsec;
            mapping.write(info);
            fence(Ordering::Release);

            info.wc_version = info.wc_version.wrapping_add(1);
            mapping.write(info);
            fence(Ordering::Release);
        }
    }

    fn write_kernel_vti_locked(&self, mapping: &mut GpaMapping<'_, SharedInfo>, now_tsc: u64, now_ns: u64) {
        Self::write_kernel_vti_locked_static(mapping, self.vcpuid, now_tsc, now_ns);
        // tsc params are fixed for the mapping's lifetime; stamp them once here too.
        let mut info = mapping.read();
        info.vcpu_info[self.vcpuid].time.tsc_to_system_mul = self.tsc_params.tsc_mul;
        info.vcpu_info[self.vcpuid].time.tsc_shift = self.tsc_params.tsc_shift;
        info.vcpu_info[self.vcpuid].time.flags = TimeInfoFlags::TSC_STABLE_BIT.bits();
        mapping.write(info);
    }

    fn write_kernel_vti_locked_static(mapping: &mut GpaMapping<'_, SharedInfo>, vcpuid: usize, now_tsc: u64, now_ns: u64) {
        let mut info = mapping.read();
        info.vcpu_info[vcpuid].time.version = info.vcpu_info[vcpuid].time.version.wrapping_add(1);
        mapping.write(info);
        fence(Ordering::Release);

        info.vcpu_info[vcpuid].time.tsc_timestamp = now_tsc;
        info.vcpu_info[vcpuid].time.system_time = now_ns;
        mapping.write(info);
        fence(Ordering::Release);

        info.vcpu_info[vcpuid].time.version = info.vcpu_info[vcpuid].time.version.wrapping_add(1);
        mapping.write(info);
        fence(Ordering::Release);
    }

    fn write_wallclock_locked(&self, mapping: &mut GpaMapping<'_, SharedInfo>, now_ns: u64) {
        let mut info = mapping.read();
        info.wc_version = info.wc_version.wrapping_add(1);
        mapping.write(info);
        fence(Ordering::Release);

        let elapsed = now_ns; // ns since start_tsc, added onto the recorded start-of-day wallclock
        let total_nsec = (self.start_wc_sec)
            .saturating_mul(1_000_000_000)
            .saturating_add(self.start_wc_nsec as u64)
            .saturating_add(elapsed);
        info.wc_sec = (total_nsec / 1_000_000_000) as u32;
        info.wc_sec_hi = ((total_nsec / 1_000_000_000) >> 32) as u32;
        info.wc_nsec = (total_nsec % 1_000_000_000) as u32;
        mapping.write(info);
        fence(Ordering::Release);

        info.wc_version = info.wc_version.wrapping_add(1);
        mapping.write(info);
        fence(Ordering::Release);
    }
}

fn write_vti_locked(mapping: &mut GpaMapping<'_, VcpuTimeInfo>, now_tsc: u64, now_ns: u64, params: TscParams) {
    let mut info = mapping.read();
    info.version = info.version.wrapping_add(1);
    mapping.write(info);
    fence(Ordering::Release);

    info.tsc_timestamp = now_tsc;
    info.system_time = now_ns;
    info.tsc_to_system_mul = params.tsc_mul;
    info.tsc_shift = params.tsc_shift;
    info.flags = TimeInfoFlags::TSC_STABLE_BIT.bits();
    mapping.write(info);
    fence(Ordering::Release);

    info.version = info.version.wrapping_add(1);
    mapping.write(info);
    fence(Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wallclock_subtracts_system_time() {
        let settime = XenpfSettime64 { secs: 1_700_000_010, nsecs: 500_000_000, system_time: 10_000_000_000, mbz: 0 };
        let mut engine = TimeEngine::new(TscParams::from_khz(2_000_000), 0, 0, 0, 0);
        // No shared_info bound: the call is a documented no-op short-circuit.
        engine.update_wallclock(settime);
        assert!(engine.shared_info.is_none());
    }
}
