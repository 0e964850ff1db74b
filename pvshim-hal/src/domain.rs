//! Enclosing domain contract.

/// The domain's recorded start-of-day clock state, used to derive the
/// initial wall clock in `init_shared_info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartOfDayInfo {
    /// TSC value at start of day.
    pub tsc: u64,
    /// Wall-clock seconds at start of day.
    pub wc_sec: u64,
    /// Wall-clock nanoseconds at start of day.
    pub wc_nsec: u32,
}

/// The domain object enclosing this vCPU's shim.
///
/// Implemented by the host; supplies identity, the start-of-day clock, and
/// the console HVC rings.
pub trait Domain {
    /// `true` for the privileged bootstrap domain (domid 0).
    fn initdom(&self) -> bool;

    /// This domain's id. Only meaningful for non-init domains; the init
    /// domain's identity is always pinned to zero regardless of this value.
    fn id(&self) -> u32;

    /// Start-of-day clock snapshot.
    fn sod_info(&self) -> StartOfDayInfo;

    /// Drain up to `buf.len()` bytes from the domain's HVC receive ring into
    /// `buf`. Returns the number of bytes copied.
    fn hvc_rx_get(&self, buf: &mut [u8]) -> usize;

    /// Write `buf` to the domain's HVC transmit ring. Returns the number of
    /// bytes accepted.
    fn hvc_tx_put(&self, buf: &[u8]) -> usize;
}
