//! Shared fixtures for the unit tests: per-thread processor adoption, the
//! canonical vector map, a recording controller driver, and kernel services
//! routed to per-test closures. Each test thread models one processor, so
//! the suite runs in parallel without the blocks aliasing.

use crate::{
    arch::emulated,
    interrupts::{self, Vector},
    interrupts::controller::{Controller, ControllerDriver, InterruptCause, MagicCandy},
    interrupts::dispatch::{dispatch_interrupt, get_run_level},
    interrupts::handler::{
        InterruptArgument, InterruptHandler, InterruptStatus, ServiceContext, ServiceRoutine,
        TriggerMode, connect_handler,
    },
    kernel::{self, KernelServices},
    processor::{self, ThreadRef},
    runlevel::{RunLevel, VectorMap, install_vector_map},
    trap::TrapFrame,
};
use std::{
    cell::{Cell, RefCell},
    sync::atomic::{AtomicU32, AtomicUsize, Ordering},
};
use zerocopy::FromZeros;

/// Vectors the scenario tests use, with the levels the canonical map gives
/// them.
pub const DEVICE_LOW_VECTOR: Vector = Vector::new(30); // Device2
pub const DEVICE_VECTOR: Vector = Vector::new(50); // Device4
pub const DEVICE_TWIN_VECTOR: Vector = Vector::new(51); // Device4
pub const DEVICE_HIGH_VECTOR: Vector = Vector::new(70); // Device6
pub const UNREGISTERED_VECTOR: Vector = Vector::new(77); // Device7, never connected
pub const CLOCK_VECTOR: Vector = Vector::new(200); // Clock
pub const HIGH_VECTOR: Vector = Vector::new(250); // High

fn canonical_vector_map() -> VectorMap {
    VectorMap::new()
        .assign(DEVICE_LOW_VECTOR, RunLevel::Device2)
        .assign(DEVICE_VECTOR, RunLevel::Device4)
        .assign(DEVICE_TWIN_VECTOR, RunLevel::Device4)
        .assign(DEVICE_HIGH_VECTOR, RunLevel::Device6)
        .assign(UNREGISTERED_VECTOR, RunLevel::Device7)
        .assign(CLOCK_VECTOR, RunLevel::Clock)
        .assign(HIGH_VECTOR, RunLevel::High)
}

type SoftwareDispatchHook = Box<dyn FnMut(Option<&mut TrapFrame>)>;

std::thread_local! {
    static SOFTWARE_DISPATCH: RefCell<Option<SoftwareDispatchHook>> = RefCell::new(None);
    static SOFTWARE_DISPATCH_PASSES: Cell<usize> = const { Cell::new(0) };
    static SIGNAL_DELIVERIES: RefCell<Vec<ThreadRef>> = RefCell::new(Vec::new());
    static TIME_COUNTER: Cell<u64> = const { Cell::new(0) };
    static TIME_FREQUENCY: Cell<u64> = const { Cell::new(1_000) };
    static CAPTURED_LOGS: RefCell<Vec<String>> = RefCell::new(Vec::new());
    static SERVICE_CALLS: RefCell<Vec<ServiceCall>> = RefCell::new(Vec::new());
}

struct TestServices;

impl KernelServices for TestServices {
    fn dispatch_software_interrupt(&self, trap_frame: Option<&mut TrapFrame>) {
        // Take the hook out for the call so it may freely use the other
        // fixtures (or replace itself).
        let hook = SOFTWARE_DISPATCH.with(|slot| slot.borrow_mut().take());
        if let Some(mut hook) = hook {
            hook(trap_frame);
            SOFTWARE_DISPATCH.with(|slot| {
                let mut slot = slot.borrow_mut();
                if slot.is_none() {
                    *slot = Some(hook);
                }
            });
        }
    }

    fn dispatch_pending_signals(&self, thread: ThreadRef, _trap_frame: &mut TrapFrame) {
        SIGNAL_DELIVERIES.with(|deliveries| deliveries.borrow_mut().push(thread));
    }

    fn read_time_counter(&self) -> u64 {
        TIME_COUNTER.with(Cell::get)
    }

    fn time_counter_frequency(&self) -> u64 {
        TIME_FREQUENCY.with(Cell::get)
    }
}

static TEST_SERVICES: TestServices = TestServices;

struct CaptureLogger;

impl log::Log for CaptureLogger {
    fn enabled(&self, _: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        CAPTURED_LOGS.with(|logs| logs.borrow_mut().push(format!("{}", record.args())));
    }

    fn flush(&self) {}
}

static CAPTURE_LOGGER: CaptureLogger = CaptureLogger;

static NEXT_PROCESSOR: AtomicUsize = AtomicUsize::new(0);

/// Hands out a processor id no other test thread will touch.
pub fn reserve_processor_id() -> usize {
    let id = NEXT_PROCESSOR.fetch_add(1, Ordering::Relaxed);
    assert!(
        id < processor::MAX_PROCESSORS,
        "test suite exhausted the processor block array"
    );
    id
}

/// Claims a fresh processor block for the calling test thread and resets its
/// thread-local fixtures. Returns the processor id.
pub fn adopt_fresh_processor() -> usize {
    static INSTALL: std::sync::Once = std::sync::Once::new();
    INSTALL.call_once(|| {
        install_vector_map(canonical_vector_map());
        kernel::set_kernel_services(&TEST_SERVICES);
        log::set_logger(&CAPTURE_LOGGER).expect("logger already installed");
        log::set_max_level(log::LevelFilter::Trace);
    });

    let id = reserve_processor_id();
    emulated::set_processor_id(id);
    emulated::set_interrupt_flag(false);

    SOFTWARE_DISPATCH.with(|slot| *slot.borrow_mut() = None);
    SOFTWARE_DISPATCH_PASSES.with(|passes| passes.set(0));
    SIGNAL_DELIVERIES.with(|deliveries| deliveries.borrow_mut().clear());
    CAPTURED_LOGS.with(|logs| logs.borrow_mut().clear());
    SERVICE_CALLS.with(|calls| calls.borrow_mut().clear());
    TIME_COUNTER.with(|counter| counter.set(0));
    TIME_FREQUENCY.with(|frequency| frequency.set(1_000));

    id
}

pub fn set_software_dispatch_hook(hook: impl FnMut(Option<&mut TrapFrame>) + 'static) {
    SOFTWARE_DISPATCH.with(|slot| *slot.borrow_mut() = Some(Box::new(hook)));
}

pub fn mark_software_dispatch_pass() {
    SOFTWARE_DISPATCH_PASSES.with(|passes| passes.set(passes.get() + 1));
}

pub fn software_dispatch_passes() -> usize {
    SOFTWARE_DISPATCH_PASSES.with(Cell::get)
}

pub fn signal_deliveries() -> Vec<ThreadRef> {
    SIGNAL_DELIVERIES.with(|deliveries| deliveries.borrow().clone())
}

pub fn set_time_counter(value: u64) {
    TIME_COUNTER.with(|counter| counter.set(value));
}

pub fn set_time_frequency(value: u64) {
    TIME_FREQUENCY.with(|frequency| frequency.set(value));
}

pub fn captured_logs() -> Vec<String> {
    CAPTURED_LOGS.with(|logs| logs.borrow().clone())
}

pub fn storm_reports() -> Vec<String> {
    captured_logs()
        .into_iter()
        .filter(|line| line.contains("possible interrupt storm"))
        .collect()
}

/// One observed service routine invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceCall {
    /// Context value the handler was connected with; the nested-dispatch
    /// service records the vector it forwards to.
    pub context: usize,
    /// Whether a trap frame was present; `None` for plain-context handlers.
    pub had_trap_frame: Option<bool>,
    /// Run level observed during the call.
    pub run_level: RunLevel,
    /// Interrupt flag observed during the call.
    pub interrupts_enabled: bool,
}

pub fn service_calls() -> Vec<ServiceCall> {
    SERVICE_CALLS.with(|calls| calls.borrow().clone())
}

fn record_call(context: usize, had_trap_frame: Option<bool>) {
    SERVICE_CALLS.with(|calls| {
        calls.borrow_mut().push(ServiceCall {
            context,
            had_trap_frame,
            run_level: get_run_level(),
            interrupts_enabled: interrupts::is_enabled(),
        });
    });
}

pub fn recording_claimed_service(argument: InterruptArgument<'_>) -> InterruptStatus {
    record_argument(&argument);
    InterruptStatus::Claimed
}

pub fn recording_unclaimed_service(argument: InterruptArgument<'_>) -> InterruptStatus {
    record_argument(&argument);
    InterruptStatus::NotClaimed
}

fn record_argument(argument: &InterruptArgument<'_>) {
    match argument {
        InterruptArgument::Context(value) => record_call(*value, None),
        InterruptArgument::TrapFrame(frame) => record_call(usize::MAX, Some(frame.is_some())),
    }
}

/// Service routine that models a lower-priority line firing while the walk
/// for a higher one is in progress: it re-enters the dispatcher with the
/// vector encoded in its context.
fn nested_dispatch_service(argument: InterruptArgument<'_>) -> InterruptStatus {
    let InterruptArgument::Context(raw) = argument else {
        panic!("nested dispatch service expects a context value");
    };
    record_call(raw, None);

    let was_enabled = interrupts::is_enabled();
    if was_enabled {
        interrupts::disable();
    }

    let mut frame = TrapFrame::new_zeroed();
    dispatch_interrupt(
        Vector::new(u8::try_from(raw).expect("vector context fits in a byte")),
        &mut frame,
    );

    if was_enabled {
        interrupts::enable();
    }

    InterruptStatus::Claimed
}

/// Connects a leaked recording handler on the current processor.
pub fn connect_recording_handler(
    vector: Vector,
    mode: TriggerMode,
    claims: bool,
    context: usize,
) -> &'static InterruptHandler {
    let service: ServiceRoutine = if claims {
        recording_claimed_service
    } else {
        recording_unclaimed_service
    };

    let handler: &'static InterruptHandler = Box::leak(Box::new(InterruptHandler::new(
        vector,
        vector.run_level(),
        mode,
        ServiceContext::Value(context),
        service,
    )));
    connect_handler(handler).expect("handler connect failed");
    handler
}

/// Connects a leaked handler that asked for the live trap frame.
pub fn connect_trap_frame_handler(vector: Vector, mode: TriggerMode) -> &'static InterruptHandler {
    let handler: &'static InterruptHandler = Box::leak(Box::new(InterruptHandler::new(
        vector,
        vector.run_level(),
        mode,
        ServiceContext::TrapFrame,
        recording_claimed_service,
    )));
    connect_handler(handler).expect("handler connect failed");
    handler
}

/// Connects a leaked handler that re-enters the dispatcher for
/// `inner_vector` from inside the walk of `outer_vector`.
pub fn connect_nested_dispatch_handler(
    outer_vector: Vector,
    inner_vector: Vector,
) -> &'static InterruptHandler {
    let handler: &'static InterruptHandler = Box::leak(Box::new(InterruptHandler::new(
        outer_vector,
        outer_vector.run_level(),
        TriggerMode::Edge,
        ServiceContext::Value(usize::from(inner_vector.get())),
        nested_dispatch_service,
    )));
    connect_handler(handler).expect("handler connect failed");
    handler
}

/// Events a [`MockController`] records, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerEvent {
    Acknowledge(Vector, MagicCandy),
    EndOfInterrupt(MagicCandy),
    FastEndOfInterrupt,
}

/// Recording controller driver with a scriptable acknowledge cause. Each
/// acknowledge mints a distinct cookie so the tests can pair completions
/// with the acknowledge that produced them.
pub struct MockController {
    cause: spin::Mutex<InterruptCause>,
    priority_count: u32,
    fast_eoi: bool,
    next_magic: AtomicU32,
    events: spin::Mutex<Vec<ControllerEvent>>,
}

impl MockController {
    pub fn new(priority_count: u32) -> Self {
        Self {
            cause: spin::Mutex::new(InterruptCause::LineFired),
            priority_count,
            fast_eoi: false,
            next_magic: AtomicU32::new(0xCA4D_0001),
            events: spin::Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_fast_eoi(mut self) -> Self {
        self.fast_eoi = true;
        self
    }

    /// Leaks the driver and installs it on the current processor.
    pub fn install(self) -> &'static Self {
        let driver: &'static Self = Box::leak(Box::new(self));
        processor::install_controller(Controller::new(driver));
        driver
    }

    pub fn set_cause(&self, cause: InterruptCause) {
        *self.cause.lock() = cause;
    }

    pub fn events(&self) -> Vec<ControllerEvent> {
        self.events.lock().clone()
    }
}

impl ControllerDriver for MockController {
    fn acknowledge(&self, vector: &mut Vector, magic: &mut MagicCandy) -> InterruptCause {
        let cause = *self.cause.lock();
        if cause == InterruptCause::LineFired {
            *magic = MagicCandy::from_raw(self.next_magic.fetch_add(1, Ordering::Relaxed));
        }
        self.events
            .lock()
            .push(ControllerEvent::Acknowledge(*vector, *magic));
        cause
    }

    fn end_of_interrupt(&self, magic: MagicCandy) {
        self.events
            .lock()
            .push(ControllerEvent::EndOfInterrupt(magic));
    }

    fn supports_fast_eoi(&self) -> bool {
        self.fast_eoi
    }

    fn fast_end_of_interrupt(&self) {
        self.events.lock().push(ControllerEvent::FastEndOfInterrupt);
    }

    fn priority_count(&self) -> u32 {
        self.priority_count
    }
}
