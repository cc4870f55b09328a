// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The multicall engine.
//!
//! A multicall runs a list of hypercalls in order within one trap. Each entry
//! goes through the single-call path and gets its own result, so one failing
//! entry does not stop the ones after it.

use crate::arity::AbiMode;
use crate::support::CallArgs;
use crate::support::CallRequest;
use crate::support::DispatchError;
use crate::support::Dispatcher;
use std::mem::offset_of;
use std::mem::size_of;
use thiserror::Error;
use xendef::CompatMulticallEntry;
use xendef::HypercallCode;
use xendef::MulticallEntry;
use zerocopy::FromZeros;
use zerocopy::IntoBytes;

/// Access to guest physical memory, used to read the guest's multicall list.
pub trait GuestMemoryAccess {
    /// Reads `buf.len()` bytes at `gpa`.
    fn read_at(&mut self, gpa: u64, buf: &mut [u8]) -> Result<(), GuestMemoryError>;

    /// Writes `buf` at `gpa`.
    fn write_at(&mut self, gpa: u64, buf: &[u8]) -> Result<(), GuestMemoryError>;
}

/// A guest memory access failed.
#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
#[error("guest memory access failed at {gpa:#x} ({len:#x} bytes)")]
pub struct GuestMemoryError {
    /// The start of the failed access.
    pub gpa: u64,
    /// The length of the failed access.
    pub len: u64,
}

/// One entry of a multicall.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BatchCall {
    /// The hypercall number.
    pub code: HypercallCode,
    /// The argument words.
    pub args: CallArgs,
}

/// An abstract multicall list: a sequence of calls, each with a result slot.
pub trait MulticallAccess {
    /// The number of entries.
    fn len(&self) -> usize;

    /// Returns true if there are no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads entry `index`.
    fn read_entry(&mut self, index: usize) -> Result<BatchCall, GuestMemoryError>;

    /// Writes the result of entry `index`.
    fn write_result(
        &mut self,
        index: usize,
        result: Result<u64, DispatchError>,
    ) -> Result<(), GuestMemoryError>;
}

/// The result of running a multicall.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MulticallOutcome {
    /// Every entry ran and has a result.
    Completed,
    /// Entry `next` asked to be restarted. It and the entries after it have
    /// not completed and their result slots are untouched.
    Preempted {
        /// The index to resume at.
        next: usize,
    },
}

/// A multicall held in host memory.
#[derive(Debug, Default)]
pub struct MulticallBatch {
    calls: Vec<BatchCall>,
    results: Vec<Option<Result<u64, DispatchError>>>,
}

impl MulticallBatch {
    /// Returns an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a call. At most [`xendef::MAX_HYPERCALL_ARGS`] words are kept.
    pub fn push(&mut self, code: HypercallCode, args: &[u64]) -> &mut Self {
        self.calls.push(BatchCall {
            code,
            args: CallArgs::new(args),
        });
        self.results.push(None);
        self
    }

    /// The result slots, `None` for entries that have not completed.
    pub fn results(&self) -> &[Option<Result<u64, DispatchError>>] {
        &self.results
    }
}

impl MulticallAccess for MulticallBatch {
    fn len(&self) -> usize {
        self.calls.len()
    }

    fn read_entry(&mut self, index: usize) -> Result<BatchCall, GuestMemoryError> {
        Ok(self.calls[index])
    }

    fn write_result(
        &mut self,
        index: usize,
        result: Result<u64, DispatchError>,
    ) -> Result<(), GuestMemoryError> {
        self.results[index] = Some(result);
        Ok(())
    }
}

/// A multicall list in guest memory, as passed to the multicall hypercall.
///
/// Entries are `multicall_entry` records, [`MulticallEntry`] natively and
/// [`CompatMulticallEntry`] in compat mode. Only the `result` field of each
/// entry is written back.
pub struct GuestMulticallList<'a> {
    memory: &'a mut dyn GuestMemoryAccess,
    abi: AbiMode,
    call_list: u64,
    nr_calls: usize,
}

impl<'a> GuestMulticallList<'a> {
    /// Returns a list of `nr_calls` entries at guest address `call_list`.
    ///
    /// Fails if the list does not fit in the address space of `abi`.
    pub fn new(
        memory: &'a mut dyn GuestMemoryAccess,
        abi: AbiMode,
        call_list: u64,
        nr_calls: usize,
    ) -> Result<Self, GuestMemoryError> {
        let limit = match abi {
            AbiMode::Native => u64::MAX,
            AbiMode::Compat => 1 << 32,
        };
        let len = (nr_calls as u64).checked_mul(Self::entry_size(abi));
        let fits = len
            .and_then(|len| call_list.checked_add(len))
            .is_some_and(|end| end <= limit);
        if !fits {
            return Err(GuestMemoryError {
                gpa: call_list,
                len: len.unwrap_or(u64::MAX),
            });
        }
        Ok(Self {
            memory,
            abi,
            call_list,
            nr_calls,
        })
    }

    /// The size of one entry in bytes.
    pub const fn entry_size(abi: AbiMode) -> u64 {
        match abi {
            AbiMode::Native => size_of::<MulticallEntry>() as u64,
            AbiMode::Compat => size_of::<CompatMulticallEntry>() as u64,
        }
    }

    /// The guest address of entry `index`.
    pub fn entry_gpa(&self, index: usize) -> u64 {
        self.call_list + index as u64 * Self::entry_size(self.abi)
    }
}

impl MulticallAccess for GuestMulticallList<'_> {
    fn len(&self) -> usize {
        self.nr_calls
    }

    fn read_entry(&mut self, index: usize) -> Result<BatchCall, GuestMemoryError> {
        let gpa = self.entry_gpa(index);
        let call = match self.abi {
            AbiMode::Native => {
                let mut entry = MulticallEntry::new_zeroed();
                self.memory.read_at(gpa, entry.as_mut_bytes())?;
                BatchCall {
                    code: HypercallCode(entry.op),
                    args: CallArgs::new(&entry.args),
                }
            }
            AbiMode::Compat => {
                let mut entry = CompatMulticallEntry::new_zeroed();
                self.memory.read_at(gpa, entry.as_mut_bytes())?;
                BatchCall {
                    code: HypercallCode(entry.op.into()),
                    args: CallArgs::new(&entry.args.map(u64::from)),
                }
            }
        };
        Ok(call)
    }

    fn write_result(
        &mut self,
        index: usize,
        result: Result<u64, DispatchError>,
    ) -> Result<(), GuestMemoryError> {
        let gpa = self.entry_gpa(index);
        let value = xendef::encode_result(result.map_err(Into::into));
        match self.abi {
            AbiMode::Native => self.memory.write_at(
                gpa + offset_of!(MulticallEntry, result) as u64,
                value.as_bytes(),
            ),
            AbiMode::Compat => self.memory.write_at(
                gpa + offset_of!(CompatMulticallEntry, result) as u64,
                (value as u32).as_bytes(),
            ),
        }
    }
}

impl<H> Dispatcher<H> {
    /// Runs every entry of `batch` in order, writing each entry's result.
    ///
    /// A failing entry does not stop the batch. The batch as a whole fails
    /// only if it is longer than the configured limit, in which case no entry
    /// runs, or if the list itself cannot be accessed.
    pub fn run_batch(
        &self,
        handler: &mut H,
        abi: AbiMode,
        batch: &mut dyn MulticallAccess,
    ) -> Result<MulticallOutcome, DispatchError> {
        self.run_batch_from(handler, abi, batch, 0)
    }

    /// Runs the entries of `batch` starting at `start`, to resume a preempted
    /// batch.
    pub fn run_batch_from(
        &self,
        handler: &mut H,
        abi: AbiMode,
        batch: &mut dyn MulticallAccess,
        start: usize,
    ) -> Result<MulticallOutcome, DispatchError> {
        let count = batch.len();
        let max = self.config().max_multicall_entries;
        if count > max {
            let err = DispatchError::BatchTooLarge { count, max };
            tracing::debug!(error = &err as &dyn std::error::Error, "multicall rejected");
            return Err(err);
        }

        for index in start..count {
            let BatchCall { code, args } = batch
                .read_entry(index)
                .map_err(DispatchError::BatchAccess)?;

            let mut request = CallRequest { code, abi, args };
            let result = self.call(None, handler, &mut request);
            if matches!(&result, Err(err) if err.is_restart()) {
                tracing::debug!(index, ?code, "multicall preempted");
                return Ok(MulticallOutcome::Preempted { next: index });
            }

            batch
                .write_result(index, result)
                .map_err(DispatchError::BatchAccess)?;
        }

        Ok(MulticallOutcome::Completed)
    }
}
