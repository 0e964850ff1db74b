//! CPUID/MSR shim: PV signature leaves and hypercall-page
//! installation.

use pvshim_hal::abi::{
    build_trampoline, Base4Features, CPUID_PV_BASE, MSR_HYPERCALL_PAGE, PV_SIGNATURE_EBX,
    PV_SIGNATURE_ECX, PV_SIGNATURE_EDX, PV_VERSION_MAJOR, PV_VERSION_MINOR, TRAMPOLINE_COUNT,
    TRAMPOLINE_STRIDE,
};
use pvshim_hal::memory::Gpa;
use pvshim_hal::{GuestMemory, HostVcpu, PvExitAction, VcpuRegisters};

use crate::error::HandlerFault;
use crate::ids::Identity;
use crate::log;

/// CPUID register quadruple: (eax, ebx, ecx, edx).
pub type CpuidResult = (u32, u32, u32, u32);

/// Dispatch one of the five registered PV leaves. Returns
/// `None` for any leaf outside `base..base+5`, which should never be
/// reached since only those leaves are registered with the host.
pub fn dispatch_cpuid(leaf: u32, identity: &Identity) -> Option<CpuidResult> {
    match leaf.checked_sub(CPUID_PV_BASE)? {
        0 => Some(leaf0()),
        1 => Some(leaf1()),
        2 => Some(leaf2()),
        4 => Some(leaf4(identity)),
        _ => None,
    }
}

/// EAX = base+5 ("five PV leaves present from here"); signature in EBX/ECX/EDX.
fn leaf0() -> CpuidResult {
    (CPUID_PV_BASE + 5, PV_SIGNATURE_EBX, PV_SIGNATURE_ECX, PV_SIGNATURE_EDX)
}

/// Packed version: upper 16 bits major, lower 16 bits minor.
fn leaf1() -> CpuidResult {
    let eax = (PV_VERSION_MAJOR << 16) | PV_VERSION_MINOR;
    (eax, 0, 0, 0)
}

/// One hypercall page supported; EBX names the MSR index that installs it.
fn leaf2() -> CpuidResult {
    (1, MSR_HYPERCALL_PAGE, 0, 0)
}

/// Feature bitmap plus the caller's pinned vcpuid/domid.
fn leaf4(identity: &Identity) -> CpuidResult {
    let features = Base4Features::X2APIC_VIRT | Base4Features::VCPU_ID_PRESENT | Base4Features::DOMID_PRESENT;
    (features.bits(), identity.vcpuid, identity.domid, 0)
}

/// Handle a write to the hypercall-page MSR: `value` is a guest physical
/// address. Map 4 KiB there and write 55 identical trampolines.
pub fn install_hypercall_page(mem: &impl GuestMemory, gpa: Gpa) -> Result<(), HandlerFault> {
    let mut mapping = mem.map_gpa_4k::<[u8; 4096]>(gpa)?;
    let mut page = [0u8; 4096];
    for i in 0..TRAMPOLINE_COUNT {
        let code = build_trampoline(i as u8);
        let offset = i * TRAMPOLINE_STRIDE;
        page[offset..offset + code.len()].copy_from_slice(&code);
    }
    mapping.write(page);
    Ok(())
}

/// Handle a write to the self-IPI MSR: queue an external interrupt on this
/// vCPU at the written vector.
pub fn handle_self_ipi_write(vcpu: &mut impl HostVcpu, value: u64) {
    vcpu.queue_external_interrupt(value as u8);
}

/// Handle a write to the APIC TSC-deadline MSR: swallowed unconditionally
/// once the first singleshot timer has been programmed.
pub fn handle_tsc_deadline_write(_value: u64) {}

/// Exception handler. NMIs arrive through `PvExitReason::Nmi`
/// and never reach this function. Logs the vector and RIP, dumps 32 bytes at
/// RIP if mappable, and reports the exit handled.
pub fn handle_exception(vcpu: &mut (impl HostVcpu + VcpuRegisters), vector: u8) -> PvExitAction {
    let rip = vcpu.rip();
    log!("[exception] vector={} rip={:#x}", vector, rip);

    if let Ok(mut mapping) = vcpu.map_gva_4k::<[u8; 32]>(rip, 32) {
        let bytes = unsafe { core::slice::from_raw_parts(mapping.as_mut_bytes(), mapping.len()) };
        log!("[exception] bytes={:02x?}", bytes);
    }

    PvExitAction::Handled
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf0_announces_five_leaves() {
        let (eax, ebx, ecx, edx) = leaf0();
        assert_eq!(eax, CPUID_PV_BASE + 5);
        assert_eq!(ebx, PV_SIGNATURE_EBX);
        assert_eq!(ecx, PV_SIGNATURE_ECX);
        assert_eq!(edx, PV_SIGNATURE_EDX);
    }

    #[test]
    fn leaf1_packs_version() {
        let (eax, ..) = leaf1();
        assert_eq!(eax >> 16, PV_VERSION_MAJOR);
        assert_eq!(eax & 0xFFFF, PV_VERSION_MINOR);
    }

    #[test]
    fn leaf4_reports_exact_feature_bits_and_identity() {
        let identity = Identity { domid: 7, vcpuid: 0, apicid: 0, acpiid: 0 };
        let (eax, ebx, ecx, _) = leaf4(&identity);
        let expected = (Base4Features::X2APIC_VIRT | Base4Features::VCPU_ID_PRESENT | Base4Features::DOMID_PRESENT).bits();
        assert_eq!(eax, expected);
        assert_eq!(ebx, 0);
        assert_eq!(ecx, 7);
    }

    #[test]
    fn dispatch_rejects_leaves_outside_registered_range() {
        let identity = Identity { domid: 0, vcpuid: 0, apicid: 0, acpiid: 0 };
        assert!(dispatch_cpuid(CPUID_PV_BASE + 3, &identity).is_none());
        assert!(dispatch_cpuid(CPUID_PV_BASE - 1, &identity).is_none());
    }
}
