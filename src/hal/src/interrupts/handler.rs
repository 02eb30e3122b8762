use crate::{
    interrupts::{self, Vector},
    processor::{self, ProcessorBlock},
    runlevel::RunLevel,
    trap::TrapFrame,
};
use core::{
    ptr::NonNull,
    sync::atomic::{AtomicPtr, AtomicU64, Ordering},
};

/// Sampling period for storm detection: a handler is examined whenever the
/// low bits of its interrupt count wrap through zero.
pub const STORM_COUNT_MASK: u64 = 0x3FF;

/// Two samplings of one handler closer together than this many seconds get
/// reported as a possible storm.
pub const STORM_DELTA_SECONDS: u64 = 10;

/// What a service routine reports about the line it was called for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptStatus {
    /// The device behind the line was interrupting and has been serviced.
    Claimed,

    /// The interrupt did not belong to this handler's device.
    NotClaimed,
}

/// Hardware triggering mode of the line a handler serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    Edge,
    Level,
}

/// What a handler asked to receive on every invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceContext {
    /// Fixed context value, typically a pointer the owning driver encoded.
    Value(usize),

    /// Sentinel requesting the live trap frame instead of a stored value.
    TrapFrame,
}

/// Argument a service routine receives, resolved per invocation from the
/// handler's [`ServiceContext`].
pub enum InterruptArgument<'a> {
    /// The context value supplied when the handler was connected.
    Context(usize),

    /// The trap frame active when the interrupt fired. Replayed interrupts
    /// carry none.
    TrapFrame(Option<&'a mut TrapFrame>),
}

pub type ServiceRoutine = fn(InterruptArgument<'_>) -> InterruptStatus;

/// A registered interrupt service, one node of a vector's handler chain.
///
/// Nodes are owned by the subsystem that connects them and must stay alive
/// and unmoved for as long as they are published. The count and timestamp
/// fields are sampling bookkeeping; racing updates from another processor
/// cost at most a lost diagnostic.
pub struct InterruptHandler {
    vector: Vector,
    run_level: RunLevel,
    mode: TriggerMode,
    context: ServiceContext,
    service: ServiceRoutine,
    next: AtomicPtr<InterruptHandler>,
    interrupt_count: AtomicU64,
    last_storm_timestamp: AtomicU64,
}

impl InterruptHandler {
    /// Creates an unconnected handler node. `run_level` must equal the run
    /// level of `vector`; [`connect_handler`] rejects anything else.
    pub const fn new(
        vector: Vector,
        run_level: RunLevel,
        mode: TriggerMode,
        context: ServiceContext,
        service: ServiceRoutine,
    ) -> Self {
        Self {
            vector,
            run_level,
            mode,
            context,
            service,
            next: AtomicPtr::new(core::ptr::null_mut()),
            interrupt_count: AtomicU64::new(0),
            last_storm_timestamp: AtomicU64::new(0),
        }
    }

    pub fn vector(&self) -> Vector {
        self.vector
    }

    pub fn run_level(&self) -> RunLevel {
        self.run_level
    }

    pub fn mode(&self) -> TriggerMode {
        self.mode
    }

    /// Number of times the service routine has been invoked.
    pub fn interrupt_count(&self) -> u64 {
        self.interrupt_count.load(Ordering::Relaxed)
    }

    pub(crate) fn storm_timestamp(&self) -> u64 {
        self.last_storm_timestamp.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConnectError {
    #[error("vector {0} is below the configurable range")]
    NotConfigurable(Vector),

    #[error("handler declares run level {declared:?} but vector {vector} maps to {expected:?}")]
    RunLevelMismatch {
        vector: Vector,
        declared: RunLevel,
        expected: RunLevel,
    },
}

/// Publishes `handler` at the tail of its vector's chain on the current
/// processor, so service order matches connect order.
///
/// The publish is a single release store of an aligned pointer, performed
/// with interrupts disabled; a walk already in progress keeps seeing a
/// well-formed chain. Disconnection is the owning subsystem's problem and is
/// not provided here.
pub fn connect_handler(handler: &'static InterruptHandler) -> Result<(), ConnectError> {
    if !handler.vector.is_configurable() {
        return Err(ConnectError::NotConfigurable(handler.vector));
    }

    let expected = handler.vector.run_level();
    if handler.run_level != expected {
        return Err(ConnectError::RunLevelMismatch {
            vector: handler.vector,
            declared: handler.run_level,
            expected,
        });
    }

    handler.next.store(core::ptr::null_mut(), Ordering::Relaxed);
    let node = core::ptr::from_ref(handler).cast_mut();

    interrupts::uninterruptable(|| {
        let processor = processor::current();
        // Safety: Momentary shared access to the chain-head slot of this
        // processor's block; only atomic operations go through it.
        let slot = unsafe { &(*processor.as_ptr()).interrupt_table[handler.vector.table_index()] };

        let head = slot.load(Ordering::Acquire);
        if head.is_null() {
            slot.store(node, Ordering::Release);
        } else {
            let mut tail = head;
            loop {
                // Safety: Connected nodes are 'static and published with
                // release stores.
                let next = unsafe { (*tail).next.load(Ordering::Acquire) };
                if next.is_null() {
                    break;
                }
                tail = next;
            }

            // Safety: As above; `tail` is the last connected node.
            unsafe {
                (*tail).next.store(node, Ordering::Release);
            }
        }
    });

    trace!(
        "Handler connected on vector {} at {:?}.",
        handler.vector, handler.run_level
    );

    Ok(())
}

/// Walks the handler chain registered for `vector` on `processor`.
///
/// Preconditions: `vector` is configurable, the processor is at the vector's
/// run level, and interrupts are enabled only if the acknowledging controller
/// enforces priority masking. The caller owns completion; this function never
/// touches the controller.
pub(crate) fn run_isr(
    mut trap_frame: Option<&mut TrapFrame>,
    processor: NonNull<ProcessorBlock>,
    vector: Vector,
) {
    let interrupt_level = vector.run_level();
    debug_assert!(vector.is_configurable());
    // Safety: Momentary read of a field only this processor writes.
    debug_assert_eq!(unsafe { (*processor.as_ptr()).run_level }, interrupt_level);

    // Safety: Momentary shared access to the chain-head slot; only the atomic
    // load goes through it.
    let head = unsafe {
        (*processor.as_ptr()).interrupt_table[vector.table_index()].load(Ordering::Acquire)
    };

    if head.is_null() {
        // Nothing ever connected here. Noisy but non-fatal: the caller still
        // completes the interrupt so the line is not wedged.
        error!(
            "unexpected interrupt on vector {vector}, processor {}",
            crate::arch::processor_id()
        );
        debug_assert!(false, "unexpected interrupt on vector {vector}");
        return;
    }

    let mut node = head;
    while !node.is_null() {
        // Safety: Connected nodes are 'static and their links are published
        // with release stores; the chain stays well-formed for the walk.
        let handler = unsafe { &*node };
        debug_assert_eq!(
            handler.run_level, interrupt_level,
            "handler run level must match its vector"
        );

        let count = handler
            .interrupt_count
            .fetch_add(1, Ordering::Relaxed)
            .wrapping_add(1);
        if count & STORM_COUNT_MASK == 0 && handler.run_level <= RunLevel::Clock {
            note_storm_sample(handler, count);
        }

        let status = match handler.context {
            ServiceContext::Value(value) => (handler.service)(InterruptArgument::Context(value)),
            ServiceContext::TrapFrame => {
                (handler.service)(InterruptArgument::TrapFrame(trap_frame.as_deref_mut()))
            }
        };

        // A claimed level-triggered line is already de-asserted; the rest of
        // the chain would run against nothing.
        if status == InterruptStatus::Claimed && handler.mode == TriggerMode::Level {
            break;
        }

        node = handler.next.load(Ordering::Acquire);
    }
}

/// Samples the time counter against the previous sampling of this handler
/// and reports a possible storm when they land too close together.
fn note_storm_sample(handler: &InterruptHandler, count: u64) {
    let services = crate::kernel::services();
    let previous = handler.last_storm_timestamp.load(Ordering::Relaxed);
    let now = services.read_time_counter();

    // The second read shrugs off a sampling race with another processor; a
    // lost sample costs one diagnostic, not correctness.
    if previous != 0
        && handler.last_storm_timestamp.load(Ordering::Relaxed) == previous
        && now.saturating_sub(previous) / services.time_counter_frequency() < STORM_DELTA_SECONDS
    {
        warn!(
            "possible interrupt storm on vector {}: {count} interrupts serviced",
            handler.vector
        );
    }

    handler.last_storm_timestamp.store(now, Ordering::Relaxed);
}
