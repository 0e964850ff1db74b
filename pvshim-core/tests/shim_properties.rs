//! Property-based tests covering invariants that must hold for every input,
//! not just the hand-picked cases in `shim_lifecycle.rs`.

mod common;

use common::{TestDomain, TestVcpu};

use proptest::prelude::*;

use pvshim_core::ids::DomidAllocator;
use pvshim_core::PvShim;
use pvshim_hal::abi::{
    build_trampoline, MSR_HYPERCALL_PAGE, TRAMPOLINE_CODE_LEN, TRAMPOLINE_COUNT, TRAMPOLINE_STRIDE,
};
use pvshim_hal::{GuestMemory, PvExitReason, StartOfDayInfo};

proptest! {
    /// Every domid the allocator hands out within one allocator's lifetime is
    /// distinct and strictly increasing.
    #[test]
    fn domid_allocation_is_unique_and_monotonic(n in 1usize..200) {
        let alloc = DomidAllocator::new();
        let mut prev = None;
        for _ in 0..n {
            let id = alloc.allocate();
            if let Some(p) = prev {
                prop_assert!(id > p);
            }
            prev = Some(id);
        }
    }
}

proptest! {
    /// Every `on_resume` call advances the kernel `vcpu_time_info` version by
    /// exactly 2 and leaves it even.
    #[test]
    fn shared_info_version_stays_even_with_delta_two(resumes in 1usize..50, tsc_khz in 1_000_000u64..5_000_000u64) {
        let mut vcpu = TestVcpu::new();
        let domain = TestDomain::initdom(StartOfDayInfo { tsc: 0, wc_sec: 0, wc_nsec: 0 });
        let mut shim = PvShim::new(&mut vcpu, domain, tsc_khz, 4);
        shim.init_shared_info(&mut vcpu, 0x4000, 0).unwrap();

        let mut last_version = vcpu
            .mem
            .map_gpa_4k::<pvshim_hal::abi::SharedInfo>(0x4000)
            .unwrap()
            .read()
            .vcpu_info[0]
            .time
            .version;
        prop_assert_eq!(last_version % 2, 0);

        for i in 0..resumes {
            shim.on_resume(&mut vcpu, (i as u64 + 1) * 1000);
            let version = vcpu
                .mem
                .map_gpa_4k::<pvshim_hal::abi::SharedInfo>(0x4000)
                .unwrap()
                .read()
                .vcpu_info[0]
                .time
                .version;
            prop_assert_eq!(version % 2, 0);
            prop_assert_eq!(version.wrapping_sub(last_version), 2);
            last_version = version;
        }
    }
}

proptest! {
    /// The installed hypercall page carries exactly `TRAMPOLINE_COUNT`
    /// trampolines at `TRAMPOLINE_STRIDE`-byte offsets, each encoding `mov
    /// eax, i; vmcall; ret` for its own index.
    #[test]
    fn hypercall_page_layout_is_exact(gpa_offset in 0u64..0x1000) {
        let mut vcpu = TestVcpu::new();
        let domain = TestDomain::initdom(StartOfDayInfo { tsc: 0, wc_sec: 0, wc_nsec: 0 });
        let mut shim = PvShim::new(&mut vcpu, domain, 2_000_000, 4);

        let gpa = 0x10_0000 + gpa_offset;
        shim.handle_exit(PvExitReason::WriteMsr { msr: MSR_HYPERCALL_PAGE, value: gpa }, &mut vcpu, 0);

        for i in 0..TRAMPOLINE_COUNT {
            let offset = gpa + (i * TRAMPOLINE_STRIDE) as u64;
            let bytes = vcpu.mem.snapshot(offset, TRAMPOLINE_CODE_LEN);
            prop_assert_eq!(bytes, build_trampoline(i as u8).to_vec());
        }
    }
}
