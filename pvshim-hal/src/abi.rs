//! Guest-visible ABI: memory layouts, hypercall numbers, and the CPUID/MSR
//! constants the impersonated ABI fixes. Every layout here must match the
//! impersonated ABI byte-for-byte.

use static_assertions::const_assert_eq;

/// The guest kernel hard-codes vCPU slot 0 at early TSC calibration; the
/// shim is single-vCPU-per-guest by construction.
pub const LEGACY_MAX_VCPUS: usize = 32;

// ---------------------------------------------------------------------
// CPUID
// ---------------------------------------------------------------------

/// Base leaf of the five PV-signature leaves (base+0..base+4).
pub const CPUID_PV_BASE: u32 = 0x4000_0000;

/// "XenVMMXenVMM" spread across EBX/ECX/EDX of leaf base+0.
pub const PV_SIGNATURE_EBX: u32 = 0x566e_6558;
pub const PV_SIGNATURE_ECX: u32 = 0x6558_4d4d;
pub const PV_SIGNATURE_EDX: u32 = 0x4d4d_566e;

/// Packed version returned in EAX of leaf base+1: upper 16 bits major, lower
/// 16 bits minor.
pub const PV_VERSION_MAJOR: u32 = 4;
pub const PV_VERSION_MINOR: u32 = 13;

bitflags::bitflags! {
    /// Feature bitmap returned in EAX of leaf base+4.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Base4Features: u32 {
        const X2APIC_VIRT    = 1 << 1;
        const VCPU_ID_PRESENT = 1 << 3;
        const DOMID_PRESENT  = 1 << 4;
    }
}

// ---------------------------------------------------------------------
// MSRs
// ---------------------------------------------------------------------

/// Writing a guest physical address here installs the hypercall trampoline
/// page.
pub const MSR_HYPERCALL_PAGE: u32 = 0xC000_0500;

/// Writing a vector here queues a self-targeted external interrupt.
pub const MSR_SELF_IPI: u32 = 0x83F;

/// APIC TSC-deadline MSR; writes are swallowed once `set_singleshot_timer`
/// has installed the first singleshot timer handler.
pub const MSR_TSC_DEADLINE: u32 = 0x6E0;

// ---------------------------------------------------------------------
// Hypercall trampoline
// ---------------------------------------------------------------------

/// Number of identical trampolines written to the hypercall page.
pub const TRAMPOLINE_COUNT: usize = 55;
/// Byte stride between trampolines.
pub const TRAMPOLINE_STRIDE: usize = 32;
/// Encoded length of a single trampoline: `B8 ii 00 00 00  0F 01 C1  C3`.
pub const TRAMPOLINE_CODE_LEN: usize = 9;

/// Build the 9-byte trampoline for hypercall index `i`:
/// `mov eax, i; vmcall; ret`.
pub fn build_trampoline(i: u8) -> [u8; TRAMPOLINE_CODE_LEN] {
    [0xB8, i, 0x00, 0x00, 0x00, 0x0F, 0x01, 0xC1, 0xC3]
}

// ---------------------------------------------------------------------
// Hypercall numbers
// ---------------------------------------------------------------------

pub const HYPERCALL_PLATFORM_OP: u64 = 7;
pub const HYPERCALL_MEMORY_OP: u64 = 12;
pub const HYPERCALL_XEN_VERSION: u64 = 17;
pub const HYPERCALL_CONSOLE_IO: u64 = 18;
pub const HYPERCALL_GRANT_TABLE_OP: u64 = 20;
pub const HYPERCALL_VM_ASSIST: u64 = 21;
pub const HYPERCALL_VCPU_OP: u64 = 24;
pub const HYPERCALL_XSM_OP: u64 = 27;
pub const HYPERCALL_EVENT_CHANNEL_OP: u64 = 32;
pub const HYPERCALL_PHYSDEV_OP: u64 = 33;
pub const HYPERCALL_HVM_OP: u64 = 34;
pub const HYPERCALL_SYSCTL: u64 = 35;
pub const HYPERCALL_DOMCTL: u64 = 36;

// ---------------------------------------------------------------------
// hvm_op sub-ops and HVM_PARAM indices
// ---------------------------------------------------------------------

pub const HVMOP_SET_PARAM: u64 = 0;
pub const HVMOP_GET_PARAM: u64 = 1;
pub const HVMOP_PAGETABLE_DYING: u64 = 9;

pub const HVM_PARAM_CALLBACK_IRQ: u64 = 0;

/// Encoded in bits 63:56 of the `set_param(CALLBACK_IRQ)` value.
pub const HVM_PARAM_CALLBACK_TYPE_VECTOR: u64 = 2;

// ---------------------------------------------------------------------
// platform_op sub-ops
// ---------------------------------------------------------------------

pub const PLATFORMOP_SETTIME64: u32 = 17;
pub const PLATFORMOP_GET_CPUINFO: u32 = 58;

/// `xenpf_platform_quirk`/cpuinfo `flags` bit indicating the CPU is online.
pub const PLATFORM_CPU_ONLINE: u32 = 1 << 0;

// ---------------------------------------------------------------------
// vcpu_op sub-ops (real Xen numbering)
// ---------------------------------------------------------------------

pub const VCPUOP_REGISTER_RUNSTATE_MEMORY_AREA: u64 = 5;
pub const VCPUOP_SET_PERIODIC_TIMER: u64 = 6;
pub const VCPUOP_STOP_PERIODIC_TIMER: u64 = 7;
pub const VCPUOP_SET_SINGLESHOT_TIMER: u64 = 8;
pub const VCPUOP_STOP_SINGLESHOT_TIMER: u64 = 9;
pub const VCPUOP_REGISTER_VCPU_TIME_MEMORY_AREA: u64 = 13;

/// `vcpu_set_singleshot_timer.flags` bit: fail with `ETIME` rather than
/// programming an immediate timer if the deadline has already passed.
pub const VCPU_SSHOTTMR_FUTURE: u32 = 1 << 0;

// ---------------------------------------------------------------------
// vm_assist
// ---------------------------------------------------------------------

pub const VMASST_CMD_ENABLE: u64 = 0;
pub const VMASST_TYPE_RUNSTATE_UPDATE_FLAG: u64 = 1;

// ---------------------------------------------------------------------
// VIRQ
// ---------------------------------------------------------------------

pub const VIRQ_TIMER: u32 = 0;

// ---------------------------------------------------------------------
// Guest-facing error codes (negative-errno convention)
// ---------------------------------------------------------------------

pub const EINVAL: i64 = 22;
pub const EACCES: i64 = 13;
pub const ENOSYS: i64 = 38;
pub const ETIME: i64 = 62;

// ---------------------------------------------------------------------
// Guest-visible memory layouts
// ---------------------------------------------------------------------

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TimeInfoFlags: u8 {
        const TSC_STABLE_BIT = 1 << 0;
    }
}

/// Per-vCPU time snapshot, sequence-locked on `version`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VcpuTimeInfo {
    pub version: u32,
    pub pad0: u32,
    pub tsc_timestamp: u64,
    pub system_time: u64,
    pub tsc_to_system_mul: u32,
    pub tsc_shift: i8,
    pub flags: u8,
    pub pad1: [u8; 2],
}

const_assert_eq!(core::mem::size_of::<VcpuTimeInfo>(), 32);

impl Default for VcpuTimeInfo {
    fn default() -> Self {
        Self {
            version: 0,
            pad0: 0,
            tsc_timestamp: 0,
            system_time: 0,
            tsc_to_system_mul: 0,
            tsc_shift: 0,
            flags: 0,
            pad1: [0; 2],
        }
    }
}

/// Per-vCPU slot inside `shared_info`: just the time snapshot, since the
/// shim pins everything else about the slot to vCPU 0.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VcpuInfo {
    pub time: VcpuTimeInfo,
}

impl Default for VcpuInfo {
    fn default() -> Self {
        Self { time: VcpuTimeInfo::default() }
    }
}

/// The guest-readable 4 KiB shared-info page.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SharedInfo {
    pub vcpu_info: [VcpuInfo; LEGACY_MAX_VCPUS],
    pub wc_version: u32,
    pub wc_sec: u32,
    pub wc_nsec: u32,
    pub wc_sec_hi: u32,
}

impl Default for SharedInfo {
    fn default() -> Self {
        Self {
            vcpu_info: [VcpuInfo::default(); LEGACY_MAX_VCPUS],
            wc_version: 0,
            wc_sec: 0,
            wc_nsec: 0,
            wc_sec_hi: 0,
        }
    }
}

/// Per-vCPU runstate states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RunstateState {
    Running = 0,
    Runnable = 1,
    Blocked = 2,
    Offline = 3,
}

/// Number of runstate accumulator slots.
pub const RUNSTATE_COUNT: usize = 4;

/// Guest-registered runstate accounting area.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VcpuRunstateInfo {
    pub state: u32,
    pub state_entry_time: u64,
    pub time: [u64; RUNSTATE_COUNT],
}

impl Default for VcpuRunstateInfo {
    fn default() -> Self {
        Self { state: RunstateState::Offline as u32, state_entry_time: 0, time: [0; RUNSTATE_COUNT] }
    }
}

/// High bit of `state_entry_time` marking an in-progress atomic update.
pub const RUNSTATE_UPDATE_IN_PROGRESS: u64 = 1 << 63;

/// `platform_op(settime64)` argument struct.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct XenpfSettime64 {
    pub secs: u32,
    pub nsecs: u32,
    pub system_time: u64,
    pub mbz: u32,
}

/// `hvm_op(set_param/get_param)` argument struct.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct XenHvmParam {
    pub domid: u16,
    pub index: u32,
    pub value: u64,
}

/// `vcpu_op(set_singleshot_timer)` argument struct.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VcpuSetSingleshotTimer {
    pub timeout_abs_ns: u64,
    pub flags: u32,
}

/// `platform_op(get_cpuinfo)` result struct.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct XenpfPcpuinfo {
    pub max_present: u32,
    pub flags: u32,
    pub apicid: u32,
    pub acpiid: u32,
}
