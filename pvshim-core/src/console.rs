//! Console pass-through: `CONSOLEIO_read`/`write`, init-domain
//! only, copying between a guest virtual buffer and the domain's HVC ring.

use pvshim_hal::memory::Gva;
use pvshim_hal::{Domain, GuestMemory};

use crate::error::GuestError;

pub const CONSOLEIO_READ: u64 = 0;
pub const CONSOLEIO_WRITE: u64 = 1;

/// Copy up to `len` bytes from the domain's HVC receive ring into the guest
/// buffer at `gva`. Returns the byte count placed in the result register.
pub fn consoleio_read(domain: &impl Domain, mem: &impl GuestMemory, gva: Gva, len: usize) -> Result<i64, GuestError> {
    if !domain.initdom() {
        return Err(GuestError::Eacces);
    }
    let mut mapping = mem.map_gva_4k::<u8>(gva, len).map_err(|_| GuestError::Einval)?;
    let dst = unsafe { core::slice::from_raw_parts_mut(mapping.as_mut_bytes(), mapping.len()) };
    let copied = domain.hvc_rx_get(dst);
    Ok(copied as i64)
}

/// Copy up to `len` bytes from the guest buffer at `gva` into the domain's
/// HVC transmit ring. Returns the byte count placed in the result register.
pub fn consoleio_write(domain: &impl Domain, mem: &impl GuestMemory, gva: Gva, len: usize) -> Result<i64, GuestError> {
    if !domain.initdom() {
        return Err(GuestError::Eacces);
    }
    let mut mapping = mem.map_gva_4k::<u8>(gva, len).map_err(|_| GuestError::Einval)?;
    let src = unsafe { core::slice::from_raw_parts(mapping.as_mut_bytes(), mapping.len()) };
    let accepted = domain.hvc_tx_put(src);
    Ok(accepted as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeDomain {
        initdom: bool,
        rx: Vec<u8>,
    }

    impl Domain for FakeDomain {
        fn initdom(&self) -> bool { self.initdom }
        fn id(&self) -> u32 { 0 }
        fn sod_info(&self) -> pvshim_hal::StartOfDayInfo { pvshim_hal::StartOfDayInfo { tsc: 0, wc_sec: 0, wc_nsec: 0 } }
        fn hvc_rx_get(&self, buf: &mut [u8]) -> usize {
            let n = self.rx.len().min(buf.len());
            buf[..n].copy_from_slice(&self.rx[..n]);
            n
        }
        fn hvc_tx_put(&self, buf: &[u8]) -> usize { buf.len() }
    }

    struct FakeMem;
    impl GuestMemory for FakeMem {
        fn map_gpa_4k<T>(&self, _addr: pvshim_hal::memory::Gpa) -> Result<pvshim_hal::GpaMapping<'_, T>, pvshim_hal::MappingError> {
            Err(pvshim_hal::MappingError)
        }
        fn map_gva_4k<T>(&self, _addr: Gva, _len: usize) -> Result<pvshim_hal::GvaMapping<'_, T>, pvshim_hal::MappingError> {
            Err(pvshim_hal::MappingError)
        }
    }

    #[test]
    fn non_init_domain_is_rejected() {
        let domain = FakeDomain { initdom: false, rx: Vec::new() };
        let mem = FakeMem;
        assert_eq!(consoleio_read(&domain, &mem, 0x1000, 16), Err(GuestError::Eacces));
        assert_eq!(consoleio_write(&domain, &mem, 0x1000, 16), Err(GuestError::Eacces));
    }
}
