//! Raw TSC read. The shift/mul conversion scheme itself lives in
//! `pvshim-core::tsc`, since it is PV-ABI-specified behavior, not a hardware
//! primitive.
#![cfg(target_arch = "x86_64")]

/// Read the Time Stamp Counter.
#[inline]
pub fn rdtsc() -> u64 {
    unsafe { core::arch::x86_64::_rdtsc() }
}
