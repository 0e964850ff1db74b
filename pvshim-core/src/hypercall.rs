//! Hypercall dispatcher: routes a VM-call by hypercall number.

use pvshim_hal::abi::{
    VcpuSetSingleshotTimer, XenHvmParam, XenpfPcpuinfo, XenpfSettime64, HVMOP_GET_PARAM,
    HVMOP_PAGETABLE_DYING, HVMOP_SET_PARAM, HVM_PARAM_CALLBACK_IRQ, HVM_PARAM_CALLBACK_TYPE_VECTOR,
    HYPERCALL_CONSOLE_IO, HYPERCALL_DOMCTL, HYPERCALL_EVENT_CHANNEL_OP, HYPERCALL_GRANT_TABLE_OP,
    HYPERCALL_HVM_OP, HYPERCALL_MEMORY_OP, HYPERCALL_PHYSDEV_OP, HYPERCALL_PLATFORM_OP,
    HYPERCALL_SYSCTL, HYPERCALL_VCPU_OP, HYPERCALL_VM_ASSIST, HYPERCALL_XEN_VERSION,
    HYPERCALL_XSM_OP, PLATFORMOP_GET_CPUINFO, PLATFORMOP_SETTIME64, PLATFORM_CPU_ONLINE,
    VCPUOP_REGISTER_RUNSTATE_MEMORY_AREA, VCPUOP_REGISTER_VCPU_TIME_MEMORY_AREA,
    VCPUOP_SET_PERIODIC_TIMER, VCPUOP_SET_SINGLESHOT_TIMER, VCPUOP_STOP_PERIODIC_TIMER,
    VCPUOP_STOP_SINGLESHOT_TIMER, VCPU_SSHOTTMR_FUTURE, VMASST_CMD_ENABLE,
    VMASST_TYPE_RUNSTATE_UPDATE_FLAG,
};
use pvshim_hal::{Domain, GuestMemory, GuestRegister, HostVcpu, PvExitAction, VcpuRegisters};

use crate::console::{consoleio_read, consoleio_write};
use crate::error::GuestError;
use crate::shim::PvShim;
use crate::shim_assert;

impl<D: Domain> PvShim<D> {
    /// Entry point for a VMCALL exit: read the hypercall number and up to
    /// three scalar arguments from registers, dispatch, and write the result
    /// to RAX.
    pub fn dispatch_hypercall(&mut self, vcpu: &mut impl HostVcpu, now_tsc: u64) -> PvExitAction {
        let number = vcpu.read_reg(GuestRegister::Rax);
        let arg0 = vcpu.read_reg(GuestRegister::Rdi);
        let arg1 = vcpu.read_reg(GuestRegister::Rsi);
        let arg2 = vcpu.read_reg(GuestRegister::Rdx);

        let Some(result) = self.dispatch_number(number, arg0, arg1, arg2, vcpu, now_tsc) else {
            return PvExitAction::NotHandled;
        };

        let raw = match result {
            Ok(value) => value as u64,
            Err(e) => e.to_raw() as u64,
        };
        vcpu.write_reg(GuestRegister::Rax, raw);
        vcpu.advance_past_instruction();
        PvExitAction::Handled
    }

    fn dispatch_number(
        &mut self,
        number: u64,
        arg0: u64,
        arg1: u64,
        arg2: u64,
        vcpu: &mut impl HostVcpu,
        now_tsc: u64,
    ) -> Option<Result<i64, GuestError>> {
        match number {
            HYPERCALL_HVM_OP => Some(self.hvm_op(arg0, arg1, vcpu)),
            HYPERCALL_VCPU_OP => Some(self.vcpu_op(arg0, arg1, arg2, vcpu, now_tsc)),
            HYPERCALL_VM_ASSIST => Some(self.vm_assist(arg0, arg1)),
            HYPERCALL_CONSOLE_IO => Some(self.console_io(arg0, arg1, arg2, vcpu)),
            HYPERCALL_PLATFORM_OP => Some(self.platform_op(arg0 as u32, arg1, vcpu)),
            HYPERCALL_XSM_OP => Some(self.xsm_op()),

            // Sub-service glue: this shim does not own
            // memory/version/evtchn/gnttab/sysctl/domctl/physdev state, so
            // recognized-but-unimplemented numbers report a handled no-op
            // rather than faulting the guest.
            HYPERCALL_MEMORY_OP
            | HYPERCALL_XEN_VERSION
            | HYPERCALL_EVENT_CHANNEL_OP
            | HYPERCALL_GRANT_TABLE_OP
            | HYPERCALL_SYSCTL
            | HYPERCALL_DOMCTL
            | HYPERCALL_PHYSDEV_OP => Some(Ok(0)),

            _ => None,
        }
    }

    fn hvm_op(&mut self, sub_op: u64, arg_gva: u64, vcpu: &mut impl HostVcpu) -> Result<i64, GuestError> {
        match sub_op {
            HVMOP_SET_PARAM => {
                let param = read_gva::<XenHvmParam>(vcpu, arg_gva)?;
                if param.index as u64 != HVM_PARAM_CALLBACK_IRQ {
                    return Ok(0);
                }
                self.callback_vector = Some(validate_callback_irq(param.value)?);
                Ok(0)
            }
            // Open question (see DESIGN.md): unconditional ENOSYS.
            HVMOP_GET_PARAM => Err(GuestError::Enosys),
            HVMOP_PAGETABLE_DYING => Ok(0),
            _ => Err(GuestError::Enosys),
        }
    }

    fn vcpu_op(&mut self, sub_op: u64, vcpuid: u64, arg_gva: u64, vcpu: &mut impl HostVcpu, now_tsc: u64) -> Result<i64, GuestError> {
        shim_assert!(vcpuid as u32 == self.identity.vcpuid, "vcpu_op targeting a foreign vcpuid");
        match sub_op {
            VCPUOP_STOP_PERIODIC_TIMER => Ok(0),
            VCPUOP_STOP_SINGLESHOT_TIMER => {
                self.pet.disarm(vcpu);
                Ok(0)
            }
            VCPUOP_SET_SINGLESHOT_TIMER => self.set_singleshot_timer(arg_gva, vcpu, now_tsc),
            VCPUOP_REGISTER_VCPU_TIME_MEMORY_AREA => self.register_vcpu_time_memory_area(arg_gva, vcpu),
            VCPUOP_REGISTER_RUNSTATE_MEMORY_AREA => self.register_runstate_memory_area(arg_gva, vcpu, now_tsc),
            VCPUOP_SET_PERIODIC_TIMER => Err(GuestError::Enosys),
            _ => Err(GuestError::Enosys),
        }
    }

    fn set_singleshot_timer(&mut self, arg_gva: u64, vcpu: &mut impl HostVcpu, now_tsc: u64) -> Result<i64, GuestError> {
        let sst = read_gva::<VcpuSetSingleshotTimer>(vcpu, arg_gva)?;
        let now_ns = self.time.now_ns(now_tsc);

        if sst.timeout_abs_ns <= now_ns {
            if sst.flags & VCPU_SSHOTTMR_FUTURE != 0 {
                return Err(GuestError::Etime);
            }
            self.ensure_pet_handlers(vcpu);
            self.pet.arm(vcpu, now_tsc, now_tsc);
            return Ok(0);
        }

        let delta_ns = sst.timeout_abs_ns - now_ns;
        let delta_tsc = crate::tsc::ns_to_tsc(delta_ns, self.tsc_params.tsc_shift, self.tsc_params.tsc_mul);
        self.ensure_pet_handlers(vcpu);
        self.pet.arm(vcpu, now_tsc + delta_tsc, now_tsc);
        Ok(0)
    }

    fn register_vcpu_time_memory_area(&mut self, arg_gpa: u64, vcpu: &mut impl HostVcpu) -> Result<i64, GuestError> {
        if self.shinfo_gpfn.is_none() {
            return Err(GuestError::Einval);
        }
        self.time.register_user_time_info(arg_gpa, vcpu).map_err(|_| GuestError::Einval)?;
        Ok(0)
    }

    fn register_runstate_memory_area(&mut self, arg_gpa: u64, vcpu: &mut impl HostVcpu, now_tsc: u64) -> Result<i64, GuestError> {
        let mut mapping = vcpu
            .map_gpa_4k::<pvshim_hal::abi::VcpuRunstateInfo>(arg_gpa)
            .map_err(|_| GuestError::Einval)?;
        let now_ns = self.time.now_ns(now_tsc);
        crate::runstate::RunstateTracker::init_guest_area(&mut mapping, now_ns);
        self.runstate_area = Some(unsafe { mapping.into_static() });
        Ok(0)
    }

    fn vm_assist(&mut self, cmd: u64, ty: u64) -> Result<i64, GuestError> {
        if cmd == VMASST_CMD_ENABLE && ty == VMASST_TYPE_RUNSTATE_UPDATE_FLAG {
            self.runstate.assist_enabled = true;
            Ok(0)
        } else {
            Err(GuestError::Einval)
        }
    }

    fn console_io(&mut self, sub_op: u64, gva: u64, len: u64, vcpu: &mut impl HostVcpu) -> Result<i64, GuestError> {
        match sub_op {
            crate::console::CONSOLEIO_READ => consoleio_read(&self.domain, &*vcpu, gva, len as usize),
            crate::console::CONSOLEIO_WRITE => consoleio_write(&self.domain, &*vcpu, gva, len as usize),
            _ => Err(GuestError::Enosys),
        }
    }

    fn xsm_op(&self) -> Result<i64, GuestError> {
        Err(GuestError::Eacces)
    }

    /// `platform_op`: gated on `domain.initdom()` up front, so every sub-op
    /// below runs only for the init domain.
    fn platform_op(&mut self, cmd: u32, arg_gva: u64, vcpu: &mut impl HostVcpu) -> Result<i64, GuestError> {
        if !self.domain.initdom() {
            return Err(GuestError::Eacces);
        }
        match cmd {
            PLATFORMOP_GET_CPUINFO => {
                let info = self.platform_get_cpuinfo();
                write_gva(vcpu, arg_gva, info)?;
                Ok(0)
            }
            PLATFORMOP_SETTIME64 => {
                let settime = read_gva::<XenpfSettime64>(vcpu, arg_gva)?;
                self.platform_settime64(settime)?;
                Ok(0)
            }
            _ => Err(GuestError::Enosys),
        }
    }

    /// `platform_op(get_cpuinfo)`. Reaching this with a non-init domain
    /// would mean `platform_op`'s gate above was bypassed: a dispatcher bug,
    /// not something a guest can trigger.
    fn platform_get_cpuinfo(&self) -> XenpfPcpuinfo {
        shim_assert!(self.domain.initdom(), "platform_get_cpuinfo reached for a non-init domain");
        XenpfPcpuinfo {
            max_present: 1,
            flags: PLATFORM_CPU_ONLINE,
            apicid: self.identity.apicid,
            acpiid: self.identity.acpiid,
        }
    }

    /// `platform_op(settime64)`.
    fn platform_settime64(&mut self, settime: XenpfSettime64) -> Result<(), GuestError> {
        if settime.mbz != 0 {
            return Err(GuestError::Einval);
        }
        self.time.update_wallclock(settime);
        Ok(())
    }
}

/// Map `len_of::<T>()` bytes of guest-virtual memory at `gva` and take a
/// volatile snapshot. Any mapping fault becomes `EINVAL`, folding a handler
/// fault into the guest-facing error for argument decoding.
fn read_gva<T: Copy>(vcpu: &impl GuestMemory, gva: u64) -> Result<T, GuestError> {
    let mut mapping = vcpu.map_gva_4k::<T>(gva, core::mem::size_of::<T>()).map_err(|_| GuestError::Einval)?;
    Ok(unsafe { core::ptr::read_volatile(mapping.as_mut_bytes() as *const T) })
}

/// Map `size_of::<T>()` bytes of guest-virtual memory at `gva` and take a
/// volatile write of `value`. Mirrors `read_gva`, for hypercalls that report
/// results back into a guest-supplied buffer.
fn write_gva<T: Copy>(vcpu: &impl GuestMemory, gva: u64, value: T) -> Result<(), GuestError> {
    let mut mapping = vcpu.map_gva_4k::<T>(gva, core::mem::size_of::<T>()).map_err(|_| GuestError::Einval)?;
    unsafe { core::ptr::write_volatile(mapping.as_mut_bytes() as *mut T, value) };
    Ok(())
}

/// `set_param(CALLBACK_IRQ)` validation: type in bits 63:56 must
/// be VECTOR, and the vector in bits 7:0 must land in `[0x20, 0xFF]`.
fn validate_callback_irq(value: u64) -> Result<u8, GuestError> {
    let ty = value >> 56;
    let vector = (value & 0xFF) as u8;
    if ty != HVM_PARAM_CALLBACK_TYPE_VECTOR || !(0x20..=0xFF).contains(&vector) {
        Err(GuestError::Einval)
    } else {
        Ok(vector)
    }
}
