// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The hypercall arity table.
//!
//! Every hypercall slot records how many argument words the call consumes,
//! once for the native (64-bit) calling convention and once for the compat
//! (32-bit) one. The table is built with [`ArityTableBuilder`] and frozen into
//! an [`ArityTable`], which has no mutating operations; the production table
//! is evaluated at compile time, so a malformed definition fails the build.

use bitfield_struct::bitfield;
use thiserror::Error;
use xendef::HypercallCode;
use xendef::MAX_HYPERCALL_ARGS;
use xendef::NR_HYPERCALLS;

/// The calling convention a hypercall was issued with.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum AbiMode {
    /// The host's native 64-bit convention.
    Native,
    /// The 32-bit compatibility convention.
    Compat,
}

/// The argument counts of one hypercall slot.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct ArityEntry {
    /// The argument count under [`AbiMode::Native`].
    #[bits(3)]
    pub native: u8,
    /// The argument count under [`AbiMode::Compat`].
    #[bits(3)]
    pub compat: u8,
    defined: bool,
    #[bits(1)]
    _reserved: u8,
}

impl ArityEntry {
    /// Returns the argument count for `abi`.
    pub const fn argc(&self, abi: AbiMode) -> usize {
        match abi {
            AbiMode::Native => self.native() as usize,
            AbiMode::Compat => self.compat() as usize,
        }
    }
}

/// Error returned when resolving a hypercall's arity.
#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
pub enum ArityError {
    /// The code is outside `0..NR_HYPERCALLS`.
    #[error("unknown hypercall {0:?}")]
    UnknownHypercall(HypercallCode),
}

/// Builds an [`ArityTable`].
///
/// All methods are `const` so that tables can be built in static
/// initializers. Invalid definitions panic.
#[derive(Debug, Clone)]
pub struct ArityTableBuilder {
    entries: [ArityEntry; NR_HYPERCALLS],
}

impl ArityTableBuilder {
    /// Returns a builder with every slot set to the zero-argument placeholder.
    pub const fn new() -> Self {
        Self {
            entries: [ArityEntry::new(); NR_HYPERCALLS],
        }
    }

    /// Defines `code` as taking `argc` arguments under both conventions.
    pub const fn args(self, code: HypercallCode, argc: usize) -> Self {
        self.compat(code, argc, argc)
    }

    /// Defines `code` as taking `native` arguments natively and `compat`
    /// arguments under the compat convention.
    pub const fn compat(mut self, code: HypercallCode, native: usize, compat: usize) -> Self {
        let Some(index) = code.index() else {
            panic!("hypercall code out of range");
        };
        assert!(
            native <= MAX_HYPERCALL_ARGS && compat <= MAX_HYPERCALL_ARGS,
            "hypercall argument count too large"
        );
        assert!(
            !self.entries[index].defined(),
            "hypercall arity defined twice"
        );
        self.entries[index] = ArityEntry::new()
            .with_native(native as u8)
            .with_compat(compat as u8)
            .with_defined(true);
        self
    }

    /// Freezes the table.
    pub const fn build(self) -> ArityTable {
        ArityTable {
            entries: self.entries,
        }
    }
}

impl Default for ArityTableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// An immutable mapping from hypercall code to argument counts.
#[derive(Debug, Clone)]
pub struct ArityTable {
    entries: [ArityEntry; NR_HYPERCALLS],
}

impl ArityTable {
    /// Looks up the entry for `code`.
    ///
    /// Returns `None` only for codes outside `0..NR_HYPERCALLS`. Slots that
    /// were never defined return the zero-argument placeholder.
    pub fn lookup(&self, code: HypercallCode) -> Option<ArityEntry> {
        code.index().map(|index| self.entries[index])
    }

    /// Returns the number of arguments `code` takes under `abi`.
    pub fn resolve(&self, code: HypercallCode, abi: AbiMode) -> Result<usize, ArityError> {
        self.lookup(code)
            .map(|entry| entry.argc(abi))
            .ok_or(ArityError::UnknownHypercall(code))
    }

    /// Returns whether `code` was explicitly defined when the table was
    /// built.
    pub fn is_defined(&self, code: HypercallCode) -> bool {
        self.lookup(code).is_some_and(|entry| entry.defined())
    }

    /// Returns whether `code` takes arguments natively but none under the
    /// compat convention, meaning compat guests cannot issue it.
    pub fn is_compat_retired(&self, code: HypercallCode) -> bool {
        self.lookup(code)
            .is_some_and(|entry| entry.native() > 0 && entry.compat() == 0)
    }

    /// Iterates over the defined entries in code order.
    pub fn iter(&self) -> impl Iterator<Item = (HypercallCode, ArityEntry)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.defined())
            .map(|(index, &entry)| (HypercallCode(index as u64), entry))
    }
}

/// The Xen x86 hypercall arity table.
pub static XEN_ARITY_TABLE: ArityTable = ArityTableBuilder::new()
    .args(HypercallCode::SET_TRAP_TABLE, 1)
    .args(HypercallCode::MMU_UPDATE, 4)
    .args(HypercallCode::SET_GDT, 2)
    .args(HypercallCode::STACK_SWITCH, 2)
    .compat(HypercallCode::SET_CALLBACKS, 3, 4)
    .args(HypercallCode::FPU_TASKSWITCH, 1)
    .args(HypercallCode::SCHED_OP_COMPAT, 2)
    .args(HypercallCode::PLATFORM_OP, 1)
    .args(HypercallCode::SET_DEBUGREG, 2)
    .args(HypercallCode::GET_DEBUGREG, 1)
    .compat(HypercallCode::UPDATE_DESCRIPTOR, 2, 4)
    .args(HypercallCode::MEMORY_OP, 2)
    .args(HypercallCode::MULTICALL, 2)
    .compat(HypercallCode::UPDATE_VA_MAPPING, 3, 4)
    .compat(HypercallCode::SET_TIMER_OP, 1, 2)
    .args(HypercallCode::EVENT_CHANNEL_OP_COMPAT, 1)
    .args(HypercallCode::XEN_VERSION, 2)
    .args(HypercallCode::CONSOLE_IO, 3)
    .args(HypercallCode::PHYSDEV_OP_COMPAT, 1)
    .args(HypercallCode::GRANT_TABLE_OP, 3)
    .args(HypercallCode::VM_ASSIST, 2)
    .compat(HypercallCode::UPDATE_VA_MAPPING_OTHERDOMAIN, 4, 5)
    .args(HypercallCode::VCPU_OP, 3)
    // Retired in compat mode.
    .compat(HypercallCode::SET_SEGMENT_BASE, 2, 0)
    .args(HypercallCode::MMUEXT_OP, 4)
    .args(HypercallCode::XSM_OP, 1)
    .args(HypercallCode::NMI_OP, 2)
    .args(HypercallCode::SCHED_OP, 2)
    .args(HypercallCode::CALLBACK_OP, 2)
    .args(HypercallCode::XENOPROF_OP, 2)
    .args(HypercallCode::EVENT_CHANNEL_OP, 2)
    .args(HypercallCode::PHYSDEV_OP, 2)
    .args(HypercallCode::HVM_OP, 2)
    .args(HypercallCode::SYSCTL, 1)
    .args(HypercallCode::DOMCTL, 1)
    .args(HypercallCode::KEXEC_OP, 2)
    .args(HypercallCode::TMEM_OP, 1)
    .args(HypercallCode::XENPMU_OP, 2)
    .args(HypercallCode::DM_OP, 3)
    .args(HypercallCode::MCA, 1)
    .args(HypercallCode::ARCH_1, 1)
    .build();
