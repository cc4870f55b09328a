// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! X86-64 hypercall support.

use super::HypercallIo;
use crate::arity::AbiMode;
use crate::support::AsHandler;
use xendef::MAX_HYPERCALL_ARGS;

/// Argument registers of the 64-bit convention.
const NATIVE_ARGS: [X86HypercallRegister; MAX_HYPERCALL_ARGS] = [
    X86HypercallRegister::Rdi,
    X86HypercallRegister::Rsi,
    X86HypercallRegister::Rdx,
    X86HypercallRegister::R10,
    X86HypercallRegister::R8,
    X86HypercallRegister::R9,
];

/// Argument registers of the 32-bit convention.
const COMPAT_ARGS: [X86HypercallRegister; MAX_HYPERCALL_ARGS] = [
    X86HypercallRegister::Rbx,
    X86HypercallRegister::Rcx,
    X86HypercallRegister::Rdx,
    X86HypercallRegister::Rsi,
    X86HypercallRegister::Rdi,
    X86HypercallRegister::Rbp,
];

/// An implementation of [`HypercallIo`] on X86 register state.
///
/// The hypercall number is in `rax` (`eax`) and the result is returned there.
/// The hypercall instruction, `vmcall` or `vmmcall`, is 3 bytes long.
pub struct X86RegisterIo<T> {
    inner: T,
    abi: AbiMode,
}

impl<T: X86RegisterState> X86RegisterIo<T> {
    /// Returns a register accessor backed by `t`.
    ///
    /// Uses the 64-bit calling convention if `is_64bit`, otherwise the 32-bit
    /// compat one.
    pub fn new(t: T, is_64bit: bool) -> Self {
        let abi = if is_64bit {
            AbiMode::Native
        } else {
            AbiMode::Compat
        };
        Self { inner: t, abi }
    }

    fn mask(&self, value: u64) -> u64 {
        value
            & match self.abi {
                AbiMode::Native => u64::MAX,
                AbiMode::Compat => u32::MAX as u64,
            }
    }

    fn arg_register(&self, n: usize) -> X86HypercallRegister {
        match self.abi {
            AbiMode::Native => NATIVE_ARGS[n],
            AbiMode::Compat => COMPAT_ARGS[n],
        }
    }
}

impl<T> AsHandler<T> for X86RegisterIo<T> {
    fn as_handler(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T> AsHandler<T> for X86RegisterIo<&mut T> {
    fn as_handler(&mut self) -> &mut T {
        &mut *self.inner
    }
}

impl<T: X86RegisterState> HypercallIo for X86RegisterIo<T> {
    fn advance_ip(&mut self) {
        let rip = self.inner.rip().wrapping_add(3);
        self.inner.set_rip(self.mask(rip));
    }

    fn retry(&mut self) {
        // rip is still at the vmcall/vmmcall instruction, nothing to do.
    }

    fn abi(&mut self) -> AbiMode {
        self.abi
    }

    fn code(&mut self) -> u64 {
        let value = self.inner.gp(X86HypercallRegister::Rax);
        self.mask(value)
    }

    fn arg(&mut self, n: usize) -> u64 {
        let value = self.inner.gp(self.arg_register(n));
        self.mask(value)
    }

    fn set_arg(&mut self, n: usize, value: u64) {
        let value = self.mask(value);
        self.inner.set_gp(self.arg_register(n), value);
    }

    fn set_result(&mut self, n: u64) {
        let n = self.mask(n);
        self.inner.set_gp(X86HypercallRegister::Rax, n);
    }
}

/// Register state access for x86/x64.
pub trait X86RegisterState {
    /// RIP register.
    fn rip(&mut self) -> u64;

    /// Sets the RIP register.
    fn set_rip(&mut self, rip: u64);

    /// Gets a general purpose register.
    fn gp(&mut self, n: X86HypercallRegister) -> u64;

    /// Sets a general purpose register.
    fn set_gp(&mut self, n: X86HypercallRegister, value: u64);
}

impl<T: X86RegisterState> X86RegisterState for &'_ mut T {
    fn rip(&mut self) -> u64 {
        (**self).rip()
    }

    fn set_rip(&mut self, rip: u64) {
        (**self).set_rip(rip)
    }

    fn gp(&mut self, n: X86HypercallRegister) -> u64 {
        (**self).gp(n)
    }

    fn set_gp(&mut self, n: X86HypercallRegister, value: u64) {
        (**self).set_gp(n, value)
    }
}

/// An x86 GP register. This just contains the subset used in the hypercall ABI.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum X86HypercallRegister {
    /// RAX
    Rax,
    /// RBX
    Rbx,
    /// RCX
    Rcx,
    /// RDX
    Rdx,
    /// RSI
    Rsi,
    /// RDI
    Rdi,
    /// RBP
    Rbp,
    /// R8
    R8,
    /// R9
    R9,
    /// R10
    R10,
}
