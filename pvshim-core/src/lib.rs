#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

//! Per-vCPU PV hypercall shim.
//!
//! Impersonates a Xen-style PV-on-HVM ABI for a single guest vCPU on top of
//! a host VM-exit framework (the traits in `pvshim-hal`). Every module here
//! corresponds to one component of the shim: CPUID/MSR responses, the
//! hypercall dispatcher, the TSC-derived time engine, the preemption-timer
//! driver, runstate accounting, the interrupt/HLT router, and console
//! pass-through for the privileged domain. `shim` ties them together behind
//! a single per-exit entry point.

pub mod console;
pub mod cpuid_msr;
pub mod error;
pub mod hypercall;
pub mod ids;
pub mod interrupt;
pub mod log;
pub mod pet;
pub mod runstate;
pub mod shim;
pub mod time;
pub mod tsc;

pub use error::{GuestError, HandlerFault};
pub use ids::{DomainHandle, Identity};
pub use pet::PetDriver;
pub use runstate::RunstateTracker;
pub use shim::PvShim;
pub use time::TimeEngine;
pub use tsc::TscParams;
