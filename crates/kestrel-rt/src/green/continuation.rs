// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Continuation seam: stack allocation and register save/restore.
//!
//! Everything platform-specific about switching stacks lives behind this
//! module, on top of `corosensei` stackful coroutines. A task's body runs
//! on its own fixed-size stack; it hands control back to its processor by
//! suspending through the [`Yielder`] with a [`Switch`] reason.
//!
//! Stacks do not grow. Overflowing one is an unchecked contract: the
//! guard page below the stack turns it into a segfault, never into silent
//! corruption of a neighbouring task.

use std::io;

use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult};

/// Why a task gave control back to its processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Switch {
    /// Voluntary reschedule; requeue locally.
    Yield,
    /// Parked until an external resume.
    Suspend,
}

pub(crate) type Yielder = corosensei::Yielder<(), Switch>;

/// What the processor sees when a resumed continuation returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resumed {
    Switched(Switch),
    Finished,
}

/// An allocated stack that has not been bound to a body yet.
///
/// Split from [`Continuation::new`] so stack allocation can fail before a
/// task id is consumed.
pub(crate) struct Stack(DefaultStack);

impl Stack {
    pub fn allocate(size: usize) -> io::Result<Self> {
        DefaultStack::new(size).map(Stack)
    }
}

pub(crate) struct Continuation {
    coroutine: Coroutine<(), Switch, ()>,
}

// SAFETY: the coroutine only ever runs on one processor at a time (the
// task state machine guarantees exclusive `Running`), and it is only moved
// between threads while suspended. Task bodies must not keep references to
// thread-local storage across a yield; the runtime's own TLS accessors are
// never inlined into task code.
unsafe impl Send for Continuation {}

impl Continuation {
    /// Bind `body` to `stack`. The trampoline runs `body` on first resume;
    /// returning from it finishes the continuation.
    pub fn new<F>(stack: Stack, body: F) -> Self
    where
        F: FnOnce(&Yielder) + 'static,
    {
        Self {
            coroutine: Coroutine::with_stack(stack.0, move |yielder: &Yielder, ()| body(yielder)),
        }
    }

    /// Switch onto the continuation's stack until it suspends or returns.
    ///
    /// Resuming a continuation whose body already returned aborts.
    pub fn resume(&mut self) -> Resumed {
        if self.coroutine.done() {
            crate::error::fatal(format_args!("resumed a continuation after its entry returned"));
        }
        match self.coroutine.resume(()) {
            CoroutineResult::Yield(switch) => Resumed::Switched(switch),
            CoroutineResult::Return(()) => Resumed::Finished,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.coroutine.done()
    }
}
