//! Per-processor interrupt dispatch and run-level management.
//!
//! This crate mediates between asynchronous hardware interrupt delivery and
//! the kernel's software priority model: every accepted interrupt runs its
//! handler chain exactly once at the run level its vector maps to, interrupts
//! arriving while the processor is at or above that level are deferred and
//! replayed in priority order, and the nominal run level, the admissible
//! interrupt set, and the hardware interrupt flag stay mutually consistent
//! across every transition.

#![cfg_attr(not(test), no_std)]
#![deny(clippy::as_conversions, clippy::debug_assert_with_mut_call)]
#![warn(
    clippy::pedantic,
    clippy::undocumented_unsafe_blocks,
    clippy::semicolon_inside_block,
    clippy::semicolon_if_nothing_returned,
    unsafe_op_in_unsafe_fn
)]
#![allow(
    clippy::enum_glob_use,
    clippy::inline_always,
    clippy::items_after_statements,
    clippy::must_use_candidate,
    clippy::missing_const_for_fn,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::if_not_else,
    dead_code
)]

#[macro_use]
extern crate bitflags;

#[macro_use]
extern crate log;

#[macro_use]
extern crate num_enum;

#[macro_use]
extern crate thiserror;

#[macro_use]
extern crate zerocopy;

pub mod arch;
pub mod interrupts;
pub mod kernel;
pub mod processor;
pub mod runlevel;
pub mod trap;

#[cfg(test)]
pub(crate) mod testing;

pub use interrupts::Vector;
pub use interrupts::controller::{Controller, ControllerDriver, InterruptCause, MagicCandy};
pub use interrupts::dispatch::{
    dispatch_interrupt, get_run_level, lower_run_level, raise_run_level,
};
pub use interrupts::handler::{
    ConnectError, InterruptArgument, InterruptHandler, InterruptStatus, ServiceContext,
    ServiceRoutine, TriggerMode, connect_handler,
};
pub use kernel::{KernelServices, set_kernel_services};
pub use processor::{
    ThreadRef, install_controller, request_dispatch_interrupt, set_running_thread,
};
pub use runlevel::{RunLevel, VectorMap, install_vector_map};
pub use trap::{RFlags, TrapFrame};
