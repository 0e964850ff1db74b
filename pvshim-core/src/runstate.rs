//! Per-vCPU runstate accounting.

use core::sync::atomic::{fence, Ordering};

use pvshim_hal::abi::{RunstateState, VcpuRunstateInfo, RUNSTATE_COUNT, RUNSTATE_UPDATE_IN_PROGRESS};
use pvshim_hal::GpaMapping;

/// Tracks the current runstate and the guest-registered area it mirrors
/// into, if any.
pub struct RunstateTracker {
    state: RunstateState,
    state_entry_time: u64,
    time: [u64; RUNSTATE_COUNT],
    /// Opt-in atomic-update-bit protocol for `state_entry_time`, toggled by
    /// `vm_assist`.
    pub assist_enabled: bool,
}

impl RunstateTracker {
    pub fn new(now_ns: u64) -> Self {
        let mut time = [0u64; RUNSTATE_COUNT];
        time[RunstateState::Running as usize] = now_ns;
        Self { state: RunstateState::Running, state_entry_time: now_ns, time, assist_enabled: false }
    }

    pub fn state(&self) -> RunstateState {
        self.state
    }

    pub fn state_entry_time(&self) -> u64 {
        self.state_entry_time
    }

    /// Accumulated time[state], for the sum-of-elapsed invariant.
    pub fn accumulated(&self) -> [u64; RUNSTATE_COUNT] {
        self.time
    }

    /// Advance to `new_state` at `now_ns`: accumulate elapsed time into the
    /// old state's bucket, then transition.
    pub fn transition(&mut self, new_state: RunstateState, now_ns: u64) {
        let elapsed = now_ns.saturating_sub(self.state_entry_time);
        self.time[self.state as usize] = self.time[self.state as usize].saturating_add(elapsed);
        self.state = new_state;
        self.set_state_entry_time(now_ns);
    }

    fn set_state_entry_time(&mut self, now_ns: u64) {
        self.state_entry_time = now_ns;
    }

    /// Initialize a freshly-registered guest runstate area: `state=RUNNING`,
    /// `state_entry_time=time[RUNNING]=system_time`, others zero.
    pub fn init_guest_area(area: &mut GpaMapping<'_, VcpuRunstateInfo>, now_ns: u64) {
        let mut info = VcpuRunstateInfo::default();
        info.state = RunstateState::Running as u32;
        info.state_entry_time = now_ns;
        info.time[RunstateState::Running as usize] = now_ns;
        area.write(info);
    }

    /// Mirror the tracker's current state into a guest runstate area,
    /// applying the atomic-update-bit protocol to `state_entry_time` when
    /// `assist_enabled`.
    pub fn sync_guest_area(&self, area: &mut GpaMapping<'_, VcpuRunstateInfo>) {
        let mut info = area.read();
        info.state = self.state as u32;
        info.time = self.time;
        if self.assist_enabled {
            write_state_entry_time_atomic(&mut info, self.state_entry_time);
        } else {
            info.state_entry_time = self.state_entry_time;
        }
        area.write(info);
    }
}

/// Set high bit, barrier, OR in value, barrier, clear bit, barrier.
fn write_state_entry_time_atomic(info: &mut VcpuRunstateInfo, now_ns: u64) {
    info.state_entry_time |= RUNSTATE_UPDATE_IN_PROGRESS;
    fence(Ordering::Release);
    info.state_entry_time = (info.state_entry_time & RUNSTATE_UPDATE_IN_PROGRESS) | now_ns;
    fence(Ordering::Release);
    info.state_entry_time &= !RUNSTATE_UPDATE_IN_PROGRESS;
    fence(Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_time_sums_to_total(
    ) {
        let mut rs = RunstateTracker::new(0);
        rs.transition(RunstateState::Runnable, 100);
        rs.transition(RunstateState::Blocked, 250);
        rs.transition(RunstateState::Running, 400);

        let total: u64 = rs.accumulated().iter().sum();
        assert_eq!(total, 400);
    }

    #[test]
    fn atomic_update_clears_in_progress_bit() {
        let mut info = VcpuRunstateInfo::default();
        write_state_entry_time_atomic(&mut info, 12345);
        assert_eq!(info.state_entry_time, 12345);
        assert_eq!(info.state_entry_time & RUNSTATE_UPDATE_IN_PROGRESS, 0);
    }
}
