// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Xen hypercall validation and dispatch.
//!
//! This crate helps you implement handling for Xen hypercalls issued by guest
//! VMs on x86. Every hypercall number has a fixed argument count, one for the
//! native 64-bit calling convention and one for the 32-bit compat convention,
//! recorded in [`XEN_ARITY_TABLE`]. The dispatcher checks each call against
//! that table before any handler sees it, and implements the multicall
//! hypercall, which runs a guest-supplied list of calls in one trap.
//!
//! To use this crate, you provide access to the processor's registers, and you
//! implement [`HypercallDispatch`] (or a typed trait such as
//! [`FpuTaskswitch`]) for each hypercall you want to support. Then you use the
//! [`dispatcher`] macro to instantiate a dispatcher, and you call
//! [`Dispatcher::dispatch`] to dispatch the hypercall.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod arity;
mod imp;
mod multicall;
mod support;
mod x86;

pub use self::arity::AbiMode;
pub use self::arity::ArityEntry;
pub use self::arity::ArityError;
pub use self::arity::ArityTable;
pub use self::arity::ArityTableBuilder;
pub use self::arity::XEN_ARITY_TABLE;
pub use self::imp::*;
pub use self::multicall::BatchCall;
pub use self::multicall::GuestMemoryAccess;
pub use self::multicall::GuestMemoryError;
pub use self::multicall::GuestMulticallList;
pub use self::multicall::MulticallAccess;
pub use self::multicall::MulticallBatch;
pub use self::multicall::MulticallOutcome;
pub use self::support::ArgReader;
pub use self::support::AsHandler;
pub use self::support::CallArgs;
pub use self::support::CallRequest;
pub use self::support::DispatchError;
pub use self::support::Dispatcher;
pub use self::support::DispatcherConfig;
pub use self::support::Hypercall;
pub use self::support::HypercallDefinition;
pub use self::support::HypercallDispatch;
pub use self::support::HypercallHandler;
pub use self::support::HypercallIo;
pub use self::support::HypercallParameters;
pub use self::support::DEFAULT_MAX_MULTICALL_ENTRIES;
pub use self::x86::X86HypercallRegister;
pub use self::x86::X86RegisterIo;
pub use self::x86::X86RegisterState;
