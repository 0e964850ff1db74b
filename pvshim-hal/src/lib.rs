#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

//! Host-facing traits and guest ABI layouts for the PV hypercall shim.
//!
//! This crate is the boundary between `pvshim-core` (the per-vCPU PV
//! emulation object) and the host VM-exit framework it is embedded in: every
//! trait here is either implemented by the host (`HostVcpu`, `ParentVcpu`,
//! `Domain`, `GuestMemory`, `VcpuRegisters`) or is a plain data layout that
//! must match the impersonated ABI byte-for-byte (`abi`).

pub mod abi;
pub mod cpu;
pub mod cycles;
pub mod domain;
pub mod memory;
pub mod vcpu;

pub use cpu::{GuestRegister, RegisterValue, VcpuRegisters};
pub use domain::{Domain, StartOfDayInfo};
pub use memory::{GpaMapping, GuestMemory, GvaMapping, MappingError};
pub use vcpu::{GuestMsi, HandlerToken, HostVcpu, ParentVcpu, PvExitAction, PvExitReason};
