//! Errors returned to the guest, and the dispatcher-boundary fault type.

use pvshim_hal::abi::{EACCES, EINVAL, ENOSYS, ETIME};

/// Negative-errno values placed in RAX as the hypercall result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestError {
    /// Malformed arguments.
    Einval,
    /// Privileged operation attempted from an unprivileged domain, or a
    /// version mismatch.
    Eacces,
    /// Unimplemented sub-op.
    Enosys,
    /// Singleshot timer deadline already past and `FUTURE` was set.
    Etime,
}

impl GuestError {
    /// The value placed in RAX: a negative errno.
    pub fn to_raw(self) -> i64 {
        -match self {
            GuestError::Einval => EINVAL,
            GuestError::Eacces => EACCES,
            GuestError::Enosys => ENOSYS,
            GuestError::Etime => ETIME,
        }
    }
}

/// Raised when mapping or decoding a guest argument faults. Caught at the
/// dispatcher boundary and turned into "not handled": never retried, never
/// surfaced to the guest directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerFault;

impl From<pvshim_hal::MappingError> for HandlerFault {
    fn from(_: pvshim_hal::MappingError) -> Self {
        HandlerFault
    }
}

/// Panics with a message identifying a breach of the host/shim contract,
/// e.g. `vcpu_op` targeting a foreign vcpuid, or an init-only op reaching a
/// non-init domain. These are not guest-facing errors: the contract
/// violation means the caller is the host itself, not the guest.
#[macro_export]
macro_rules! shim_assert {
    ($cond:expr, $msg:literal) => {
        if !$cond {
            panic!(concat!("pv shim contract violation: ", $msg));
        }
    };
}
