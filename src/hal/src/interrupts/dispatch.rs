//! The run-level state machine: hardware interrupt entry, raise and lower,
//! replay of deferred interrupts, and the dispatch-level software flush.
//!
//! Everything here runs on the current processor's stack with no scratch
//! state beyond the processor block, so a strictly-higher interrupt taken
//! while interrupts are enabled re-enters these paths safely; recursion depth
//! is bounded by the number of run levels above the current one.

use crate::{
    interrupts::{self, Vector},
    interrupts::controller::{InterruptCause, MagicCandy},
    interrupts::handler,
    kernel,
    processor::{self, PendingInterrupt},
    runlevel::RunLevel,
    trap::TrapFrame,
};

/// Entry point from the trap vector glue for a hardware interrupt.
///
/// Called, and returning, with interrupts disabled. Acknowledges through the
/// processor's controller, then either defers the interrupt (when the
/// processor is already at or above its level) or runs its handler chain at
/// the vector's run level, completes it, and unwinds the run level, replaying
/// anything that queued up in the meantime.
pub fn dispatch_interrupt(vector: Vector, trap_frame: &mut TrapFrame) {
    debug_assert!(
        !interrupts::is_enabled(),
        "dispatch entered with interrupts enabled"
    );

    let processor = processor::current();

    // Safety: Interrupts are disabled and the block belongs to this
    // processor. Accesses stay momentary so a preempting dispatch, once
    // interrupts are re-enabled below, never aliases a live borrow.
    let (running_thread, controller) = unsafe {
        let block = processor.as_ptr();
        ((*block).running_thread, (*block).controller)
    };

    let Some(controller) = controller else {
        debug_assert!(false, "interrupt taken with no controller installed");
        return;
    };

    let mut vector = vector;
    let mut magic = MagicCandy::NONE;
    if controller.acknowledge(&mut vector, &mut magic) != InterruptCause::LineFired {
        return;
    }

    let interrupt_level = vector.run_level();
    // Safety: As above.
    let old_level = unsafe { (*processor.as_ptr()).run_level };

    if old_level >= interrupt_level {
        // Already at or above this level: hold the line, in service and
        // uncompleted, until the run level drops back down.
        // Safety: As above.
        unsafe {
            (*processor.as_ptr()).push_pending(PendingInterrupt {
                vector,
                controller,
                magic,
            });
        }
        return;
    }

    // Safety: As above.
    unsafe {
        (*processor.as_ptr()).run_level = interrupt_level;
    }

    if controller.enforces_priority() {
        // The hardware now masks this level and below; let strictly higher
        // vectors preempt the walk.
        interrupts::enable();
    }

    handler::run_isr(Some(&mut *trap_frame), processor, vector);

    interrupts::disable();
    controller.complete(magic);

    lower_run_level_internal(old_level, Some(&mut *trap_frame));

    if old_level == RunLevel::Low && trap_frame.is_from_user_mode() {
        if let Some(thread) = running_thread {
            interrupts::enable();
            kernel::services().dispatch_pending_signals(thread, trap_frame);
            interrupts::disable();
        }
    }
}

/// Raises the current processor's run level, returning the previous level for
/// the matching [`lower_run_level`].
///
/// Cheap: raising cannot change the masked state of anything already
/// delivered, so the pending queue is untouched.
pub fn raise_run_level(new_level: RunLevel) -> RunLevel {
    let was_enabled = interrupts::is_enabled();
    if was_enabled {
        interrupts::disable();
    }

    let processor = processor::current();
    // Safety: Interrupts are disabled and the block belongs to this
    // processor.
    let old_level = unsafe { (*processor.as_ptr()).run_level };
    debug_assert!(new_level >= old_level, "run level can only be raised upward");
    // Safety: As above.
    unsafe {
        (*processor.as_ptr()).run_level = new_level;
    }

    if was_enabled {
        interrupts::enable();
    }

    old_level
}

/// Lowers the current processor's run level, replaying deferred interrupts
/// above the target in priority order and flushing dispatch-level software
/// work on the way down.
pub fn lower_run_level(new_level: RunLevel) {
    lower_run_level_internal(new_level, None);
}

/// Current processor's nominal run level. Lock-free per-processor read.
pub fn get_run_level() -> RunLevel {
    // Safety: Plain read of a field only this processor ever writes.
    unsafe { (*processor::current().as_ptr()).run_level }
}

fn lower_run_level_internal(new_level: RunLevel, mut trap_frame: Option<&mut TrapFrame>) {
    let was_enabled = interrupts::is_enabled();
    if was_enabled {
        interrupts::disable();
    }

    let mut processor = processor::current();
    // Safety: Interrupts are disabled and the block belongs to this
    // processor; every access below is momentary for the same reason as in
    // `dispatch_interrupt`.
    debug_assert!(new_level <= unsafe { (*processor.as_ptr()).run_level });

    // Replay deferred interrupts above the target level, highest first. The
    // loop stops at the first tail entry at or below the target, leaving the
    // residual queue consistent with the new level.
    loop {
        // Safety: As above; the borrow ends before the replay runs.
        let pending = unsafe {
            let block = &mut *processor.as_ptr();
            if block
                .pending
                .last()
                .is_some_and(|tail| tail.vector.run_level() > new_level)
            {
                block.pending.pop()
            } else {
                None
            }
        };
        let Some(pending) = pending else { break };

        // Safety: As above.
        unsafe {
            (*processor.as_ptr()).run_level = pending.vector.run_level();
        }
        replay_interrupt(pending);
    }

    // Flush dispatch-level software work on the way through Dispatch. The
    // scheduler lowers with interrupts disabled precisely to suppress this
    // block, and honoring that avoids unbounded re-entry; a run level still
    // above Dispatch means we came down from a real interrupt, where the
    // flush happens regardless of the saved interrupt state.
    // Safety: As above.
    let flush = unsafe {
        let block = processor.as_ptr();
        (*block).pending_dispatch_interrupt
            && new_level < RunLevel::Dispatch
            && (was_enabled || (*block).run_level > RunLevel::Dispatch)
    };

    if flush {
        // Safety: As above.
        unsafe {
            (*processor.as_ptr()).run_level = RunLevel::Dispatch;
        }

        // Safety: As above; re-checked every pass because the software
        // dispatch may request another.
        while unsafe { (*processor.as_ptr()).pending_dispatch_interrupt } {
            // Safety: As above.
            unsafe {
                (*processor.as_ptr()).pending_dispatch_interrupt = false;
            }

            interrupts::enable();
            kernel::services().dispatch_software_interrupt(trap_frame.as_deref_mut());
            interrupts::disable();
        }

        // The software dispatch may have rescheduled this thread onto another
        // processor; the final run level write must land where we run now.
        processor = processor::current();
    }

    // Safety: As above.
    unsafe {
        (*processor.as_ptr()).run_level = new_level;
    }

    if was_enabled {
        interrupts::enable();
    }
}

/// Runs the handler chain and completion for a previously deferred
/// interrupt.
///
/// The processor is already at the vector's run level and the caller owns
/// restoring the level afterward. Replayed interrupts carry no trap frame;
/// the one they arrived with belonged to a context long since resumed.
fn replay_interrupt(pending: PendingInterrupt) {
    debug_assert!(!interrupts::is_enabled());
    debug_assert_eq!(get_run_level(), pending.vector.run_level());

    if pending.controller.enforces_priority() {
        interrupts::enable();
    }

    handler::run_isr(None, processor::current(), pending.vector);

    interrupts::disable();
    pending.controller.complete(pending.magic);
}
