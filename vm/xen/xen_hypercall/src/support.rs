// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Support for validating and dispatching hypercalls.

use crate::arity::AbiMode;
use crate::arity::ArityError;
use crate::arity::ArityTable;
use crate::arity::XEN_ARITY_TABLE;
use crate::multicall::GuestMemoryAccess;
use crate::multicall::GuestMemoryError;
use crate::multicall::GuestMulticallList;
use crate::multicall::MulticallOutcome;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use thiserror::Error;
use xendef::HypercallCode;
use xendef::XenError;
use xendef::XenResult;
use xendef::MAX_HYPERCALL_ARGS;

/// The default limit on the number of entries in one multicall.
pub const DEFAULT_MAX_MULTICALL_ENTRIES: usize = 512;

/// Written to argument registers a completed hypercall does not consume, when
/// scrubbing is enabled.
const SCRUB_PATTERN_NATIVE: u64 = 0xdeadbeefdeadf00d;
const SCRUB_PATTERN_COMPAT: u64 = 0xdeadf00d;

/// Dispatcher configuration.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// The maximum number of entries in one multicall. Longer batches fail
    /// with [`DispatchError::BatchTooLarge`] before any entry runs.
    pub max_multicall_entries: usize,
    /// Overwrite argument registers beyond a call's arity after it completes.
    pub scrub_unused_args: bool,
}

impl DispatcherConfig {
    /// The default configuration. Scrubbing is enabled in debug builds.
    pub const DEFAULT: Self = Self {
        max_multicall_entries: DEFAULT_MAX_MULTICALL_ENTRIES,
        scrub_unused_args: cfg!(debug_assertions),
    };
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// The argument words of one call.
///
/// Holds at most [`MAX_HYPERCALL_ARGS`] words; a longer source is truncated,
/// since no hypercall consumes more.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct CallArgs {
    words: [u64; MAX_HYPERCALL_ARGS],
    len: usize,
}

impl CallArgs {
    /// Copies up to [`MAX_HYPERCALL_ARGS`] words from `words`.
    pub fn new(words: &[u64]) -> Self {
        let mut args = Self::default();
        let len = words.len().min(MAX_HYPERCALL_ARGS);
        args.words[..len].copy_from_slice(&words[..len]);
        args.len = len;
        args
    }

    /// A full register set, as supplied by a trap.
    pub fn from_fn(f: impl FnMut(usize) -> u64) -> Self {
        Self {
            words: std::array::from_fn(f),
            len: MAX_HYPERCALL_ARGS,
        }
    }

    /// The argument words.
    pub fn as_slice(&self) -> &[u64] {
        &self.words[..self.len]
    }

    fn set(&mut self, n: usize, value: u64) {
        self.words[n] = value;
    }
}

/// A single hypercall to validate and dispatch.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CallRequest {
    /// The hypercall number.
    pub code: HypercallCode,
    /// The calling convention the call was issued with.
    pub abi: AbiMode,
    /// The argument words supplied by the guest.
    pub args: CallArgs,
}

impl CallRequest {
    /// Returns a new request.
    pub fn new(code: HypercallCode, abi: AbiMode, args: &[u64]) -> Self {
        Self {
            code,
            abi,
            args: CallArgs::new(args),
        }
    }
}

/// A failure to dispatch a hypercall.
///
/// Each variant maps to a distinct guest-visible error code, see
/// `From<DispatchError> for XenError`.
#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The hypercall number is outside the table.
    #[error("unknown hypercall {0:?}")]
    UnknownHypercall(HypercallCode),
    /// Fewer argument words were supplied than the hypercall takes.
    #[error("hypercall {code:?} takes {required} arguments, {supplied} supplied")]
    ArgumentUnderflow {
        /// The hypercall.
        code: HypercallCode,
        /// The resolved argument count.
        required: usize,
        /// The number of words supplied.
        supplied: usize,
    },
    /// A multicall has more entries than the configured limit.
    #[error("multicall of {count} entries exceeds the limit of {max}")]
    BatchTooLarge {
        /// The number of entries requested.
        count: usize,
        /// The configured limit.
        max: usize,
    },
    /// A multicall entry is itself a multicall.
    #[error("multicall issued from within a multicall")]
    NestedMulticall,
    /// The guest's multicall list could not be accessed.
    #[error("multicall list access failed")]
    BatchAccess(#[source] GuestMemoryError),
    /// The hypercall handler failed.
    #[error("hypercall handler failed")]
    Handler(#[source] XenError),
}

impl DispatchError {
    /// Returns true if the handler asked for the hypercall to be restarted.
    pub fn is_restart(&self) -> bool {
        matches!(self, Self::Handler(XenError::ERESTART))
    }
}

impl From<ArityError> for DispatchError {
    fn from(err: ArityError) -> Self {
        match err {
            ArityError::UnknownHypercall(code) => Self::UnknownHypercall(code),
        }
    }
}

impl From<DispatchError> for XenError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::UnknownHypercall(_) => Self::ENOSYS,
            DispatchError::ArgumentUnderflow { .. } => Self::ENODATA,
            DispatchError::BatchTooLarge { .. } => Self::E2BIG,
            DispatchError::NestedMulticall => Self::ELOOP,
            DispatchError::BatchAccess(_) => Self::EFAULT,
            DispatchError::Handler(err) => err,
        }
    }
}

/// Parameters to pass to a hypercall dispatch function.
#[derive(Debug, Copy, Clone)]
pub struct HypercallParameters<'a> {
    code: HypercallCode,
    abi: AbiMode,
    args: &'a [u64],
}

impl<'a> HypercallParameters<'a> {
    /// The hypercall number.
    pub fn code(&self) -> HypercallCode {
        self.code
    }

    /// The calling convention the call was issued with.
    pub fn abi(&self) -> AbiMode {
        self.abi
    }

    /// The argument words, exactly as many as the hypercall takes under
    /// [`Self::abi`].
    pub fn args(&self) -> &'a [u64] {
        self.args
    }

    /// Returns a reader over the arguments.
    pub fn reader(&self) -> ArgReader<'a> {
        ArgReader {
            args: self.args,
            abi: self.abi,
            next: 0,
        }
    }
}

/// Reads hypercall arguments in order.
///
/// The compat convention passes 64-bit values as two 32-bit slots, low half
/// first; [`ArgReader::wide`] joins them.
pub struct ArgReader<'a> {
    args: &'a [u64],
    abi: AbiMode,
    next: usize,
}

impl ArgReader<'_> {
    /// Reads one argument word.
    pub fn word(&mut self) -> XenResult<u64> {
        let value = *self.args.get(self.next).ok_or(XenError::EINVAL)?;
        self.next += 1;
        Ok(value)
    }

    /// Reads a 64-bit value.
    pub fn wide(&mut self) -> XenResult<u64> {
        match self.abi {
            AbiMode::Native => self.word(),
            AbiMode::Compat => {
                let low = self.word()? & 0xffff_ffff;
                let high = self.word()? & 0xffff_ffff;
                Ok(low | (high << 32))
            }
        }
    }
}

/// Trait for getting the handler from the `handler` parameter passed to
/// [`Dispatcher::dispatch`].
///
/// This is useful when the handler parameter is a wrapper that applies a
/// specific hypercall calling convention.
pub trait AsHandler<H> {
    /// Gets the inner handler.
    fn as_handler(&mut self) -> &mut H;
}

/// Provides the register state of a trapped hypercall.
pub trait HypercallIo {
    /// Advances the instruction pointer for a completed hypercall.
    ///
    /// Either `advance_ip` or `retry` will be called.
    fn advance_ip(&mut self);

    /// Retains the instruction pointer at the hypercall instruction so that
    /// the hypercall will be re-executed.
    ///
    /// Either `advance_ip` or `retry` will be called.
    fn retry(&mut self);

    /// The calling convention of the trapping guest.
    fn abi(&mut self) -> AbiMode;

    /// The hypercall number.
    fn code(&mut self) -> u64;

    /// Argument register `n`, in `0..MAX_HYPERCALL_ARGS`.
    fn arg(&mut self, n: usize) -> u64;

    /// Sets argument register `n`, in `0..MAX_HYPERCALL_ARGS`.
    fn set_arg(&mut self, n: usize, value: u64);

    /// Sets the hypercall return value.
    fn set_result(&mut self, n: u64);
}

impl<T: HypercallIo> HypercallIo for &mut T {
    fn advance_ip(&mut self) {
        (**self).advance_ip()
    }

    fn retry(&mut self) {
        (**self).retry()
    }

    fn abi(&mut self) -> AbiMode {
        (**self).abi()
    }

    fn code(&mut self) -> u64 {
        (**self).code()
    }

    fn arg(&mut self, n: usize) -> u64 {
        (**self).arg(n)
    }

    fn set_arg(&mut self, n: usize, value: u64) {
        (**self).set_arg(n, value)
    }

    fn set_result(&mut self, n: u64) {
        (**self).set_result(n)
    }
}

/// A trait defined on dummy objects to provide metadata for a hypercall.
pub trait HypercallDefinition {
    /// The hypercall code.
    const CODE: HypercallCode;
}

/// A trait to dispatch an individual hypercall.
pub trait HypercallDispatch<T> {
    /// Dispatch this hypercall.
    fn dispatch(&mut self, params: HypercallParameters<'_>) -> XenResult<u64>;
}

/// A hypercall, identified by its code.
pub struct Hypercall<const CODE: u64>(());

impl<const CODE: u64> HypercallDefinition for Hypercall<CODE> {
    const CODE: HypercallCode = HypercallCode(CODE);
}

/// Creates a hypercall dispatcher, where the dispatcher can support any of the
/// list of provided hypercalls.
///
/// The multicall hypercall is implemented by the dispatcher itself and should
/// not be listed.
///
/// ```ignore
/// xen_hypercall::dispatcher!(
///     Self,
///     [
///         xen_hypercall::XenFpuTaskswitch,
///         xen_hypercall::XenSetTimerOp,
///         xen_hypercall::XenSchedOp,
///     ],
/// );
/// ```
#[macro_export]
macro_rules! dispatcher {
    ($handler:ty, [ $($(#[$a:meta])* $hc:ty),* $(,)? ] $(,)?) => {
        {
            use $crate::{Dispatcher, HypercallDefinition, HypercallHandler};

            Dispatcher::<$handler>::new(|hc| match hc {
                $(
                $(#[$a])*
                <$hc as HypercallDefinition>::CODE => Some(HypercallHandler::new::<$hc>()),
                )*
                _ => None,
            })
        }
    };
}

/// Hypercall dispatcher.
///
/// Construct with [`dispatcher!`].
pub struct Dispatcher<H> {
    lookup: fn(HypercallCode) -> Option<HypercallHandler<H>>,
    table: &'static ArityTable,
    config: DispatcherConfig,
}

#[doc(hidden)]
pub struct HypercallHandler<H> {
    f: fn(&mut H, HypercallParameters<'_>) -> XenResult<u64>,
}

impl<H> HypercallHandler<H> {
    pub fn new<C: HypercallDefinition>() -> Self
    where
        H: HypercallDispatch<C>,
    {
        Self { f: H::dispatch }
    }
}

impl<H> Dispatcher<H> {
    #[doc(hidden)]
    pub const fn new(lookup: fn(HypercallCode) -> Option<HypercallHandler<H>>) -> Self {
        Self {
            lookup,
            table: &XEN_ARITY_TABLE,
            config: DispatcherConfig::DEFAULT,
        }
    }

    /// Uses `table` instead of [`XEN_ARITY_TABLE`].
    pub fn with_table(mut self, table: &'static ArityTable) -> Self {
        self.table = table;
        self
    }

    /// Replaces the configuration.
    pub fn with_config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// The arity table used to validate calls.
    pub fn table(&self) -> &'static ArityTable {
        self.table
    }

    /// The dispatcher configuration.
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Returns the hypercalls defined in the arity table that have no
    /// registered handler.
    ///
    /// Such calls fail with `ENOSYS`. Integrators can check this at startup.
    pub fn unregistered(&self) -> impl Iterator<Item = HypercallCode> + '_ {
        self.table
            .iter()
            .map(|(code, _)| code)
            .filter(|&code| code != HypercallCode::MULTICALL && (self.lookup)(code).is_none())
    }

    /// Dispatches the hypercall described by the register state in `handler`
    /// and completes it: sets the return value and advances the instruction
    /// pointer, or rewinds for a continuation.
    pub fn dispatch(
        &self,
        guest_memory: &mut dyn GuestMemoryAccess,
        handler: impl HypercallIo + AsHandler<H>,
    ) {
        let mut dispatcher = InnerDispatcher::new(self, handler);
        let result = self.call(
            Some(guest_memory),
            dispatcher.handler.as_handler(),
            &mut dispatcher.request,
        );
        dispatcher.complete(result);
    }

    /// Validates and dispatches a single hypercall.
    ///
    /// Returns the handler's result verbatim. If the result is a restart
    /// request (see [`DispatchError::is_restart`]), `request.args` holds the
    /// arguments to re-issue the call with.
    pub fn dispatch_call(
        &self,
        guest_memory: &mut dyn GuestMemoryAccess,
        handler: &mut H,
        request: &mut CallRequest,
    ) -> Result<u64, DispatchError> {
        self.call(Some(guest_memory), handler, request)
    }

    /// Validates and dispatches one call. `guest_memory` is `None` while
    /// running the entries of a multicall.
    pub(crate) fn call(
        &self,
        guest_memory: Option<&mut dyn GuestMemoryAccess>,
        handler: &mut H,
        request: &mut CallRequest,
    ) -> Result<u64, DispatchError> {
        let CallRequest { code, abi, args } = *request;
        let argc = self.table.resolve(code, abi).inspect_err(|err| {
            tracing::debug!(
                error = err as &dyn std::error::Error,
                ?abi,
                "hypercall rejected"
            );
        })?;

        if code == HypercallCode::MULTICALL && guest_memory.is_none() {
            tracing::debug!("nested multicall rejected");
            return Err(DispatchError::NestedMulticall);
        }

        let Some(args) = args.as_slice().get(..argc) else {
            let err = DispatchError::ArgumentUnderflow {
                code,
                required: argc,
                supplied: args.as_slice().len(),
            };
            tracing::debug!(error = &err as &dyn std::error::Error, "hypercall rejected");
            return Err(err);
        };

        tracing::trace!(?code, ?abi, argc, "hypercall");

        if abi == AbiMode::Compat && self.table.is_compat_retired(code) {
            tracing::debug!(?code, "hypercall not available to compat guests");
            return Err(DispatchError::Handler(XenError::ENOSYS));
        }

        if let (HypercallCode::MULTICALL, Some(guest_memory)) = (code, guest_memory) {
            let &[call_list, nr_calls, ..] = args else {
                return Err(DispatchError::ArgumentUnderflow {
                    code,
                    required: 2,
                    supplied: args.len(),
                });
            };
            return self.guest_multicall(
                guest_memory,
                handler,
                request,
                call_list,
                nr_calls as u32 as usize,
            );
        }

        let params = HypercallParameters { code, abi, args };
        match (self.lookup)(code) {
            Some(h) => (h.f)(handler, params).map_err(DispatchError::Handler),
            None => Err(self.unhandled(code)),
        }
    }

    fn guest_multicall(
        &self,
        guest_memory: &mut dyn GuestMemoryAccess,
        handler: &mut H,
        request: &mut CallRequest,
        call_list: u64,
        nr_calls: usize,
    ) -> Result<u64, DispatchError> {
        let abi = request.abi;
        let mut list = GuestMulticallList::new(guest_memory, abi, call_list, nr_calls)
            .map_err(DispatchError::BatchAccess)?;

        match self.run_batch(handler, abi, &mut list)? {
            MulticallOutcome::Completed => Ok(0),
            MulticallOutcome::Preempted { next } => {
                // Resume at the preempted entry.
                request.args.set(0, list.entry_gpa(next));
                request.args.set(1, (nr_calls - next) as u64);
                Err(DispatchError::Handler(XenError::ERESTART))
            }
        }
    }

    /// Logs an unsupported hypercall and returns the appropriate error.
    ///
    /// A defined hypercall without a handler warns the first time each code is
    /// seen in this process.
    fn unhandled(&self, code: HypercallCode) -> DispatchError {
        if !self.table.is_defined(code) {
            tracing::debug!(?code, "reserved hypercall");
        } else if first_unhandled(code) {
            tracing::warn!(?code, "no handler for hypercall");
        } else {
            tracing::debug!(?code, "no handler for hypercall");
        }
        DispatchError::Handler(XenError::ENOSYS)
    }
}

/// One bit per hypercall slot, set once the missing handler was reported.
static UNHANDLED_REPORTED: AtomicU64 = AtomicU64::new(0);

/// Returns true the first time it is called for `code`.
fn first_unhandled(code: HypercallCode) -> bool {
    let Some(index) = code.index() else {
        return false;
    };
    let bit = 1 << index;
    UNHANDLED_REPORTED.fetch_or(bit, Ordering::Relaxed) & bit == 0
}

/// A helper for dispatching a trapped hypercall.
struct InnerDispatcher<'a, H, T> {
    dispatcher: &'a Dispatcher<H>,
    request: CallRequest,
    handler: T,
}

impl<'a, H, T: HypercallIo + AsHandler<H>> InnerDispatcher<'a, H, T> {
    fn new(dispatcher: &'a Dispatcher<H>, mut handler: T) -> Self {
        let abi = handler.abi();
        let code = HypercallCode(handler.code());
        let args = CallArgs::from_fn(|n| handler.arg(n));
        Self {
            dispatcher,
            request: CallRequest { code, abi, args },
            handler,
        }
    }

    /// Complete hypercall handling.
    fn complete(&mut self, result: Result<u64, DispatchError>) {
        if matches!(&result, Err(err) if err.is_restart()) {
            tracing::trace!(code = ?self.request.code, "hypercall continuation");
            for (n, &value) in self.request.args.as_slice().iter().enumerate() {
                if self.handler.arg(n) != value {
                    self.handler.set_arg(n, value);
                }
            }
            self.handler.retry();
            return;
        }

        self.handler
            .set_result(xendef::encode_result(result.map_err(XenError::from)));

        if self.dispatcher.config.scrub_unused_args {
            self.scrub_unused_args();
        }
        self.handler.advance_ip();
    }

    fn scrub_unused_args(&mut self) {
        let CallRequest { code, abi, .. } = self.request;
        // Unknown hypercalls never reached a handler.
        let Ok(argc) = self.dispatcher.table.resolve(code, abi) else {
            return;
        };
        let pattern = match abi {
            AbiMode::Native => SCRUB_PATTERN_NATIVE,
            AbiMode::Compat => SCRUB_PATTERN_COMPAT,
        };
        for n in argc..MAX_HYPERCALL_ARGS {
            self.handler.set_arg(n, pattern);
        }
    }
}
