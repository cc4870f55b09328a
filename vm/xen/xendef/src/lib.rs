// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Xen x86 hypercall ABI definitions.
//!
//! Hypercall numbers, argument limits, the guest-visible error codes, and the
//! in-memory layout of multicall entries. These values are an ABI contract
//! with guests and must not change.

#![no_std]

use core::fmt::Debug;
use core::mem::size_of;
use static_assertions::const_assert_eq;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// The number of hypercall slots. Valid hypercall numbers are
/// `0..NR_HYPERCALLS`.
pub const NR_HYPERCALLS: usize = 64;

/// The maximum number of arguments any hypercall takes, matching the
/// argument registers available at the trap boundary.
pub const MAX_HYPERCALL_ARGS: usize = 6;

/// A hypercall number.
///
/// This is an open set: any value can be represented, but only values below
/// [`NR_HYPERCALLS`] can name a hypercall.
#[derive(
    Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, IntoBytes, Immutable, KnownLayout, FromBytes,
)]
#[repr(transparent)]
pub struct HypercallCode(pub u64);

macro_rules! hypercall_codes {
    ($ty:ty, $($ident:ident = $val:expr),* $(,)?) => {
        impl $ty {
            $(
                #[allow(missing_docs)]
                pub const $ident: Self = Self($val);
            )*

            /// Returns the ABI name of the hypercall, if it has one.
            pub fn name(&self) -> Option<&'static str> {
                Some(match self.0 {
                    $(
                        $val => stringify!($ident),
                    )*
                    _ => return None,
                })
            }
        }
    };
}

hypercall_codes! {
    HypercallCode,
    SET_TRAP_TABLE = 0,
    MMU_UPDATE = 1,
    SET_GDT = 2,
    STACK_SWITCH = 3,
    SET_CALLBACKS = 4,
    FPU_TASKSWITCH = 5,
    SCHED_OP_COMPAT = 6,
    PLATFORM_OP = 7,
    SET_DEBUGREG = 8,
    GET_DEBUGREG = 9,
    UPDATE_DESCRIPTOR = 10,
    MEMORY_OP = 12,
    MULTICALL = 13,
    UPDATE_VA_MAPPING = 14,
    SET_TIMER_OP = 15,
    EVENT_CHANNEL_OP_COMPAT = 16,
    XEN_VERSION = 17,
    CONSOLE_IO = 18,
    PHYSDEV_OP_COMPAT = 19,
    GRANT_TABLE_OP = 20,
    VM_ASSIST = 21,
    UPDATE_VA_MAPPING_OTHERDOMAIN = 22,
    IRET = 23,
    VCPU_OP = 24,
    SET_SEGMENT_BASE = 25,
    MMUEXT_OP = 26,
    XSM_OP = 27,
    NMI_OP = 28,
    SCHED_OP = 29,
    CALLBACK_OP = 30,
    XENOPROF_OP = 31,
    EVENT_CHANNEL_OP = 32,
    PHYSDEV_OP = 33,
    HVM_OP = 34,
    SYSCTL = 35,
    DOMCTL = 36,
    KEXEC_OP = 37,
    TMEM_OP = 38,
    XC_RESERVED_OP = 39,
    XENPMU_OP = 40,
    DM_OP = 41,
    HYPFS_OP = 42,
    MCA = 48,
    ARCH_1 = 49,
}

impl HypercallCode {
    /// Returns the table index for this code, or `None` if it is outside
    /// `0..NR_HYPERCALLS`.
    pub const fn index(self) -> Option<usize> {
        if self.0 < NR_HYPERCALLS as u64 {
            Some(self.0 as usize)
        } else {
            None
        }
    }
}

impl Debug for HypercallCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.name() {
            Some(name) => f.pad(name),
            None => Debug::fmt(&self.0, f),
        }
    }
}

/// A Xen error number.
///
/// Guests see these negated in the hypercall return value.
//
// DEVNOTE: use `NonZeroU16` to get a niche optimization, since 0 is success.
#[derive(Copy, Clone, PartialEq, Eq, Hash, IntoBytes, Immutable, KnownLayout)]
#[repr(transparent)]
pub struct XenError(core::num::NonZeroU16);

impl From<core::num::NonZeroU16> for XenError {
    fn from(err: core::num::NonZeroU16) -> Self {
        Self(err)
    }
}

impl XenError {
    /// Returns the positive error number.
    pub const fn errno(self) -> u16 {
        self.0.get()
    }

    /// Returns the value placed in the guest's return register, the negated
    /// error number.
    pub const fn to_guest(self) -> u64 {
        (-(self.0.get() as i64)) as u64
    }
}

impl Debug for XenError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.debug_name() {
            Some(name) => f.pad(name),
            None => Debug::fmt(&self.0.get(), f),
        }
    }
}

impl core::fmt::Display for XenError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.doc_str() {
            Some(s) => f.write_str(s.trim_start()),
            None => write!(f, "Xen error {}", self.0),
        }
    }
}

impl core::error::Error for XenError {}

macro_rules! xen_error {
    ($ty:ty, $(#[doc = $doc:expr] $ident:ident = $val:expr),* $(,)?) => {

        impl $ty {
            $(
                #[doc = $doc]
                pub const $ident: Self = Self(core::num::NonZeroU16::new($val).unwrap());
            )*

            fn debug_name(&self) -> Option<&'static str> {
                Some(match self.0.get() {
                    $(
                        $val => stringify!($ident),
                    )*
                    _ => return None,
                })
            }

            fn doc_str(&self) -> Option<&'static str> {
                Some(match self.0.get() {
                    $(
                        $val => $doc,
                    )*
                    _ => return None,
                })
            }
        }
    };
}

// DEVNOTE: the doc comments here are also used as the runtime error strings.
xen_error! {
    XenError,
    /// Operation not permitted
    EPERM = 1,
    /// No such file or directory
    ENOENT = 2,
    /// No such process
    ESRCH = 3,
    /// Interrupted system call
    EINTR = 4,
    /// I/O error
    EIO = 5,
    /// No such device or address
    ENXIO = 6,
    /// Arg list too long
    E2BIG = 7,
    /// Bad file number
    EBADF = 9,
    /// Try again
    EAGAIN = 11,
    /// Out of memory
    ENOMEM = 12,
    /// Permission denied
    EACCES = 13,
    /// Bad address
    EFAULT = 14,
    /// Device or resource busy
    EBUSY = 16,
    /// File exists
    EEXIST = 17,
    /// No such device
    ENODEV = 19,
    /// Invalid argument
    EINVAL = 22,
    /// No space left on device
    ENOSPC = 28,
    /// Math result not representable
    ERANGE = 34,
    /// Resource deadlock would occur
    EDEADLK = 35,
    /// Function not implemented
    ENOSYS = 38,
    /// Too many symbolic links encountered
    ELOOP = 40,
    /// No data available
    ENODATA = 61,
    /// Value too large for defined data type
    EOVERFLOW = 75,
    /// Interrupted system call should be restarted
    ERESTART = 85,
    /// Operation not supported on transport endpoint
    EOPNOTSUPP = 95,
    /// Connection timed out
    ETIMEDOUT = 110,
}

/// A useful result type for hypercall handlers.
pub type XenResult<T> = Result<T, XenError>;

/// The largest error number a return value can carry.
const MAX_ERRNO: u64 = 4095;

/// Encodes a hypercall result as the value returned to the guest.
pub fn encode_result(result: XenResult<u64>) -> u64 {
    match result {
        Ok(value) => value,
        Err(err) => err.to_guest(),
    }
}

/// Decodes a native guest return value. Values in `-4095..=-1` are errors.
pub fn decode_result(value: u64) -> XenResult<u64> {
    match core::num::NonZeroU16::new(value.wrapping_neg() as u16) {
        Some(errno) if value.wrapping_neg() <= MAX_ERRNO => Err(XenError(errno)),
        _ => Ok(value),
    }
}

/// Decodes a 32-bit compat guest return value by sign extending it.
pub fn decode_compat_result(value: u32) -> XenResult<u64> {
    decode_result(value as i32 as i64 as u64).map(|v| v & u32::MAX as u64)
}

/// The number of argument slots in a multicall entry.
pub const MULTICALL_ENTRY_ARGS: usize = 6;

/// A native (64-bit) multicall list entry, `struct multicall_entry`.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct MulticallEntry {
    pub op: u64,
    pub result: u64,
    pub args: [u64; MULTICALL_ENTRY_ARGS],
}

/// A compat (32-bit) multicall list entry.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct CompatMulticallEntry {
    pub op: u32,
    pub result: u32,
    pub args: [u32; MULTICALL_ENTRY_ARGS],
}

const_assert_eq!(size_of::<MulticallEntry>(), 64);
const_assert_eq!(size_of::<CompatMulticallEntry>(), 32);
