use crate::{
    interrupts::{self, Vector},
    interrupts::controller::{Controller, MagicCandy},
    interrupts::handler::InterruptHandler,
    runlevel::RunLevel,
};
use core::{cell::UnsafeCell, ptr::NonNull, sync::atomic::AtomicPtr};

/// Number of processors the static block array provides for.
pub const MAX_PROCESSORS: usize = 64;

/// Capacity of the pending-interrupt queue. One slot per run level above
/// [`RunLevel::Low`] is the minimum a correct level assignment can require;
/// re-asserted duplicate vectors get the slack above that.
pub(crate) const PENDING_CAPACITY: usize = 16;

/// A hardware interrupt deferred because it arrived while the processor was
/// already at or above its run level. The line stays in service at its
/// controller, uncompleted, until the replay.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingInterrupt {
    pub vector: Vector,
    pub controller: Controller,
    pub magic: MagicCandy,
}

/// Opaque reference to the thread a processor is running. The dispatch core
/// never dereferences it; it exists only to be handed to the signal-delivery
/// seam.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadRef(NonNull<()>);

impl ThreadRef {
    pub const fn from_raw(ptr: NonNull<()>) -> Self {
        Self(ptr)
    }

    pub const fn as_ptr(self) -> NonNull<()> {
        self.0
    }
}

/// Per-processor dispatch state. Each block is pinned to its processor for
/// the lifetime of the system and mutated only by code running there with
/// interrupts disabled.
pub(crate) struct ProcessorBlock {
    /// Nominal run level. Written only by the run-level manager on this
    /// processor; read by anything running here.
    pub run_level: RunLevel,

    /// Deferred interrupts, ordered with the highest run level at the tail.
    pub pending: heapless::Vec<PendingInterrupt, PENDING_CAPACITY>,

    /// Whether a dispatch-level software pass has been requested. Cleared
    /// only by the run-level manager when it services the request.
    pub pending_dispatch_interrupt: bool,

    /// Handler chain heads for the configurable vector range.
    pub interrupt_table: [AtomicPtr<InterruptHandler>; Vector::CONFIGURABLE_COUNT],

    /// Thread currently running on this processor, if the kernel tracks one.
    pub running_thread: Option<ThreadRef>,

    /// Controller delivering interrupts to this processor.
    pub controller: Option<Controller>,
}

impl ProcessorBlock {
    const fn new() -> Self {
        Self {
            run_level: RunLevel::Low,
            pending: heapless::Vec::new(),
            pending_dispatch_interrupt: false,
            interrupt_table: [const { AtomicPtr::new(core::ptr::null_mut()) };
                Vector::CONFIGURABLE_COUNT],
            running_thread: None,
            controller: None,
        }
    }

    /// Defers an interrupt until the run level drops back below its own.
    ///
    /// The caller enqueues only while `run_level` is at or above the entry's
    /// level, and a line already in service dominates anything its controller
    /// delivers after it, so pushing at the tail keeps the queue ordered with
    /// the highest level last.
    pub fn push_pending(&mut self, pending: PendingInterrupt) {
        let level = pending.vector.run_level();
        debug_assert!(self.run_level >= level);
        debug_assert!(
            self.pending
                .last()
                .is_none_or(|tail| tail.vector.run_level() <= level),
            "pending interrupts must arrive in rising priority order"
        );

        self.pending
            .push(pending)
            .expect("pending interrupt queue overflow");
    }
}

#[repr(transparent)]
struct ProcessorCell(UnsafeCell<ProcessorBlock>);

// Safety: Each block is accessed only from its owning processor, with
// interrupts disabled across every mutation; see `ProcessorBlock`.
unsafe impl Sync for ProcessorCell {}

static PROCESSORS: [ProcessorCell; MAX_PROCESSORS] =
    [const { ProcessorCell(UnsafeCell::new(ProcessorBlock::new())) }; MAX_PROCESSORS];

/// Block of the processor this code is running on.
pub(crate) fn current() -> NonNull<ProcessorBlock> {
    let id = crate::arch::processor_id();
    let cell = PROCESSORS.get(id).expect("processor id out of range");

    // Safety: `UnsafeCell::get` never returns null.
    unsafe { NonNull::new_unchecked(cell.0.get()) }
}

/// Publishes the controller delivering interrupts to the current processor.
pub fn install_controller(controller: Controller) {
    interrupts::uninterruptable(|| {
        // Safety: Interrupts are disabled and the block belongs to this
        // processor, so the access is exclusive.
        unsafe {
            (*current().as_ptr()).controller = Some(controller);
        }

        trace!(
            "Interrupt controller installed on processor {}.",
            crate::arch::processor_id()
        );
    });
}

/// Records the thread currently running on this processor for the
/// signal-delivery seam.
pub fn set_running_thread(thread: Option<ThreadRef>) {
    interrupts::uninterruptable(|| {
        // Safety: Interrupts are disabled and the block belongs to this
        // processor, so the access is exclusive.
        unsafe {
            (*current().as_ptr()).running_thread = thread;
        }
    });
}

/// Requests a dispatch-level software pass on the current processor. The
/// run-level manager clears the flag when it services the request on the next
/// pass through [`RunLevel::Dispatch`].
pub fn request_dispatch_interrupt() {
    interrupts::uninterruptable(|| {
        // Safety: Interrupts are disabled and the block belongs to this
        // processor, so the access is exclusive.
        unsafe {
            (*current().as_ptr()).pending_dispatch_interrupt = true;
        }
    });
}

#[cfg(test)]
pub(crate) fn pending_depth() -> usize {
    // Safety: Test threads own their adopted block outright.
    unsafe { (&(*current().as_ptr()).pending).len() }
}

#[cfg(test)]
pub(crate) fn dispatch_interrupt_requested() -> bool {
    // Safety: Test threads own their adopted block outright.
    unsafe { (*current().as_ptr()).pending_dispatch_interrupt }
}

#[cfg(test)]
pub(crate) fn run_level_of(id: usize) -> RunLevel {
    // Safety: Reading a foreign block's run level tolerates staleness; the
    // tests that use this synchronize through the calls under test.
    unsafe { (*PROCESSORS[id].0.get()).run_level }
}
