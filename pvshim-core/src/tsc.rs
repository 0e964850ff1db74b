//! TSC↔nanosecond conversion: the arithmetic every other module in
//! this crate ultimately depends on to reason about elapsed real time.

/// `tsc_shift`/`tsc_mul` pair describing a vCPU's TSC-to-ns scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TscParams {
    pub tsc_khz: u64,
    pub tsc_shift: i8,
    pub tsc_mul: u32,
}

impl TscParams {
    /// `tsc_shift` is always 0 and `tsc_mul = (10^9 << 32) / tsc_khz`
    ///.
    pub fn from_khz(tsc_khz: u64) -> Self {
        let tsc_mul = ((1_000_000_000u128 << 32) / tsc_khz as u128) as u32;
        Self { tsc_khz, tsc_shift: 0, tsc_mul }
    }
}

/// `ns = ((ticks << shift) * mul) >> 32`.
pub fn tsc_to_ns(ticks: u64, shift: i8, mul: u32) -> u64 {
    let shifted = shift_ticks(ticks, shift);
    (((shifted as u128) * (mul as u128)) >> 32) as u64
}

/// `ticks = ((ns << 32) / mul) >> shift`.
pub fn ns_to_tsc(ns: u64, shift: i8, mul: u32) -> u64 {
    let scaled = ((ns as u128) << 32) / (mul as u128);
    (scaled as u64) >> shift.max(0)
}

fn shift_ticks(ticks: u64, shift: i8) -> u64 {
    if shift >= 0 {
        ticks << shift
    } else {
        ticks >> (-shift)
    }
}

/// `pet_ticks = tsc >> pet_shift`.
pub fn tsc_to_pet_ticks(tsc: u64, pet_shift: u8) -> u64 {
    tsc >> pet_shift
}
