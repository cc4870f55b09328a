// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Support for individual hypercalls.
//!
//! Every hypercall in the arity table has a marker type here, for use with
//! [`dispatcher!`](crate::dispatcher). Handlers implement
//! [`HypercallDispatch`] for the marker directly, or for the calls listed
//! below, the corresponding typed trait.

use super::support::Hypercall;
use super::support::HypercallDispatch;
use super::support::HypercallParameters;
use xendef::HypercallCode;
use xendef::XenResult;

macro_rules! hypercalls {
    ($($(#[$a:meta])* $name:ident = $code:ident),* $(,)?) => {
        $(
            $(#[$a])*
            pub type $name = Hypercall<{ HypercallCode::$code.0 }>;
        )*
    };
}

hypercalls! {
    /// Defines the `set_trap_table` hypercall.
    XenSetTrapTable = SET_TRAP_TABLE,
    /// Defines the `mmu_update` hypercall.
    XenMmuUpdate = MMU_UPDATE,
    /// Defines the `set_gdt` hypercall.
    XenSetGdt = SET_GDT,
    /// Defines the `stack_switch` hypercall.
    XenStackSwitch = STACK_SWITCH,
    /// Defines the `set_callbacks` hypercall.
    XenSetCallbacks = SET_CALLBACKS,
    /// Defines the `fpu_taskswitch` hypercall.
    XenFpuTaskswitch = FPU_TASKSWITCH,
    /// Defines the legacy `sched_op` hypercall.
    XenSchedOpCompat = SCHED_OP_COMPAT,
    /// Defines the `platform_op` hypercall.
    XenPlatformOp = PLATFORM_OP,
    /// Defines the `set_debugreg` hypercall.
    XenSetDebugreg = SET_DEBUGREG,
    /// Defines the `get_debugreg` hypercall.
    XenGetDebugreg = GET_DEBUGREG,
    /// Defines the `update_descriptor` hypercall.
    XenUpdateDescriptor = UPDATE_DESCRIPTOR,
    /// Defines the `memory_op` hypercall.
    XenMemoryOp = MEMORY_OP,
    /// Defines the `update_va_mapping` hypercall.
    XenUpdateVaMapping = UPDATE_VA_MAPPING,
    /// Defines the `set_timer_op` hypercall.
    XenSetTimerOp = SET_TIMER_OP,
    /// Defines the legacy `event_channel_op` hypercall.
    XenEventChannelOpCompat = EVENT_CHANNEL_OP_COMPAT,
    /// Defines the `xen_version` hypercall.
    XenXenVersion = XEN_VERSION,
    /// Defines the `console_io` hypercall.
    XenConsoleIo = CONSOLE_IO,
    /// Defines the legacy `physdev_op` hypercall.
    XenPhysdevOpCompat = PHYSDEV_OP_COMPAT,
    /// Defines the `grant_table_op` hypercall.
    XenGrantTableOp = GRANT_TABLE_OP,
    /// Defines the `vm_assist` hypercall.
    XenVmAssist = VM_ASSIST,
    /// Defines the `update_va_mapping_otherdomain` hypercall.
    XenUpdateVaMappingOtherdomain = UPDATE_VA_MAPPING_OTHERDOMAIN,
    /// Defines the `vcpu_op` hypercall.
    XenVcpuOp = VCPU_OP,
    /// Defines the `set_segment_base` hypercall. 64-bit guests only; compat
    /// callers get `ENOSYS` without reaching the handler.
    XenSetSegmentBase = SET_SEGMENT_BASE,
    /// Defines the `mmuext_op` hypercall.
    XenMmuextOp = MMUEXT_OP,
    /// Defines the `xsm_op` hypercall.
    XenXsmOp = XSM_OP,
    /// Defines the `nmi_op` hypercall.
    XenNmiOp = NMI_OP,
    /// Defines the `sched_op` hypercall.
    XenSchedOp = SCHED_OP,
    /// Defines the `callback_op` hypercall.
    XenCallbackOp = CALLBACK_OP,
    /// Defines the `xenoprof_op` hypercall.
    XenXenoprofOp = XENOPROF_OP,
    /// Defines the `event_channel_op` hypercall.
    XenEventChannelOp = EVENT_CHANNEL_OP,
    /// Defines the `physdev_op` hypercall.
    XenPhysdevOp = PHYSDEV_OP,
    /// Defines the `hvm_op` hypercall.
    XenHvmOp = HVM_OP,
    /// Defines the `sysctl` hypercall.
    XenSysctl = SYSCTL,
    /// Defines the `domctl` hypercall.
    XenDomctl = DOMCTL,
    /// Defines the `kexec_op` hypercall.
    XenKexecOp = KEXEC_OP,
    /// Defines the `tmem_op` hypercall.
    XenTmemOp = TMEM_OP,
    /// Defines the `xenpmu_op` hypercall.
    XenXenpmuOp = XENPMU_OP,
    /// Defines the `dm_op` hypercall.
    XenDmOp = DM_OP,
    /// Defines the `mca` hypercall.
    XenMca = MCA,
    /// Defines the first architecture-specific hypercall.
    XenArch1 = ARCH_1,
}

/// Implements the `fpu_taskswitch` hypercall.
pub trait FpuTaskswitch {
    /// Sets or clears `CR0.TS` for the calling vCPU.
    fn fpu_taskswitch(&mut self, set: bool) -> XenResult<()>;
}

impl<T: FpuTaskswitch> HypercallDispatch<XenFpuTaskswitch> for T {
    fn dispatch(&mut self, params: HypercallParameters<'_>) -> XenResult<u64> {
        let mut args = params.reader();
        self.fpu_taskswitch(args.word()? != 0)?;
        Ok(0)
    }
}

/// Implements the `set_timer_op` hypercall.
pub trait SetTimerOp {
    /// Arms the vCPU's one-shot timer for system time `timeout` in
    /// nanoseconds, or disarms it if `timeout` is zero.
    fn set_timer_op(&mut self, timeout: u64) -> XenResult<()>;
}

impl<T: SetTimerOp> HypercallDispatch<XenSetTimerOp> for T {
    fn dispatch(&mut self, params: HypercallParameters<'_>) -> XenResult<u64> {
        let mut args = params.reader();
        self.set_timer_op(args.wide()?)?;
        Ok(0)
    }
}

/// Implements the `sched_op` hypercall.
pub trait SchedOp {
    /// Runs scheduler command `cmd`. `arg` is the guest address of the
    /// command's argument structure.
    fn sched_op(&mut self, cmd: u32, arg: u64) -> XenResult<u64>;
}

impl<T: SchedOp> HypercallDispatch<XenSchedOp> for T {
    fn dispatch(&mut self, params: HypercallParameters<'_>) -> XenResult<u64> {
        let mut args = params.reader();
        let cmd = args.word()? as u32;
        self.sched_op(cmd, args.word()?)
    }
}

/// Implements the `xen_version` hypercall.
pub trait XenVersion {
    /// Runs version query `cmd`. `arg` is the guest address of the output
    /// buffer, if the query has one.
    fn xen_version(&mut self, cmd: u32, arg: u64) -> XenResult<u64>;
}

impl<T: XenVersion> HypercallDispatch<XenXenVersion> for T {
    fn dispatch(&mut self, params: HypercallParameters<'_>) -> XenResult<u64> {
        let mut args = params.reader();
        let cmd = args.word()? as u32;
        self.xen_version(cmd, args.word()?)
    }
}

/// Implements the `console_io` hypercall.
pub trait ConsoleIo {
    /// Reads or writes `count` bytes of the hypervisor console at guest
    /// address `buffer`.
    fn console_io(&mut self, cmd: u32, count: u32, buffer: u64) -> XenResult<u64>;
}

impl<T: ConsoleIo> HypercallDispatch<XenConsoleIo> for T {
    fn dispatch(&mut self, params: HypercallParameters<'_>) -> XenResult<u64> {
        let mut args = params.reader();
        let cmd = args.word()? as u32;
        let count = args.word()? as u32;
        self.console_io(cmd, count, args.word()?)
    }
}

/// Implements the `vm_assist` hypercall.
pub trait VmAssist {
    /// Enables or disables a VM assist.
    fn vm_assist(&mut self, cmd: u32, assist_type: u32) -> XenResult<()>;
}

impl<T: VmAssist> HypercallDispatch<XenVmAssist> for T {
    fn dispatch(&mut self, params: HypercallParameters<'_>) -> XenResult<u64> {
        let mut args = params.reader();
        let cmd = args.word()? as u32;
        self.vm_assist(cmd, args.word()? as u32)?;
        Ok(0)
    }
}

/// Implements the `update_va_mapping` hypercall.
pub trait UpdateVaMapping {
    /// Writes page table entry `val` for virtual address `va` in the current
    /// address space.
    fn update_va_mapping(&mut self, va: u64, val: u64, flags: u64) -> XenResult<()>;
}

impl<T: UpdateVaMapping> HypercallDispatch<XenUpdateVaMapping> for T {
    fn dispatch(&mut self, params: HypercallParameters<'_>) -> XenResult<u64> {
        let mut args = params.reader();
        let va = args.word()?;
        let val = args.wide()?;
        self.update_va_mapping(va, val, args.word()?)?;
        Ok(0)
    }
}

/// Implements the `update_va_mapping_otherdomain` hypercall.
pub trait UpdateVaMappingOtherdomain {
    /// Writes page table entry `val` for virtual address `va` in domain
    /// `domid`'s address space.
    fn update_va_mapping_otherdomain(
        &mut self,
        va: u64,
        val: u64,
        flags: u64,
        domid: u16,
    ) -> XenResult<()>;
}

impl<T: UpdateVaMappingOtherdomain> HypercallDispatch<XenUpdateVaMappingOtherdomain> for T {
    fn dispatch(&mut self, params: HypercallParameters<'_>) -> XenResult<u64> {
        let mut args = params.reader();
        let va = args.word()?;
        let val = args.wide()?;
        let flags = args.word()?;
        self.update_va_mapping_otherdomain(va, val, flags, args.word()? as u16)?;
        Ok(0)
    }
}
