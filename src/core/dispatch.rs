//! Inbound-message trampoline.
//!
//! The bus calls the trampoline on its own dispatch task. The trampoline
//! looks up whichever callback is installed at that moment, runs it with the
//! payload untouched, and contains any panic so the dispatch task survives.

use crate::bus::{Message, MessageHandler};
use crate::core::notifier::{LifecycleState, Shared};
use std::any::Any;
use std::cell::RefCell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};
use std::time::Instant;

/// Callback receiving the notification payload as text.
pub type UpdateCallback = Box<dyn Fn(String) + Send + Sync>;

/// Callback receiving the notification payload as raw bytes.
pub type RawCallback = Box<dyn Fn(&[u8]) + Send + Sync>;

/// The installed handler.
pub(crate) enum Callback {
    Text(UpdateCallback),
    Raw(RawCallback),
}

impl Callback {
    fn invoke(&self, payload: &[u8]) {
        match self {
            Self::Text(callback) => callback(String::from_utf8_lossy(payload).into_owned()),
            Self::Raw(callback) => callback(payload),
        }
    }
}

thread_local! {
    /// Notifiers whose callbacks are running on this thread, innermost last.
    static DISPATCHING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

fn key(shared: &Shared) -> usize {
    shared as *const Shared as usize
}

/// Whether the current thread is inside a callback of `shared`.
pub(crate) fn in_dispatch(shared: &Shared) -> bool {
    let key = key(shared);
    DISPATCHING.with(|stack| stack.borrow().contains(&key))
}

struct DispatchGuard;

impl DispatchGuard {
    fn enter(shared: &Shared) -> Self {
        let key = key(shared);
        DISPATCHING.with(|stack| stack.borrow_mut().push(key));
        DispatchGuard
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        DISPATCHING.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Build the handler registered with the bus.
///
/// Holds only a weak reference so the subscription never keeps a dropped
/// notifier alive.
pub(crate) fn trampoline(shared: Weak<Shared>) -> MessageHandler {
    Arc::new(move |message: Message| {
        if let Some(shared) = shared.upgrade() {
            dispatch(&shared, &message);
        }
    })
}

pub(crate) fn dispatch(shared: &Shared, message: &Message) {
    // Held for the whole invocation; `close` waits on the write side.
    let _gate = shared.gate.read_recursive();

    if shared.state() == LifecycleState::Released {
        tracing::trace!(subject = %message.subject, "notification after close ignored");
        return;
    }

    let Some(callback) = shared.callback.load_full() else {
        tracing::trace!(subject = %message.subject, "no update callback set, notification dropped");
        shared.instrumentation.dispatch_dropped();
        return;
    };

    let started = Instant::now();
    let outcome = {
        let _dispatching = DispatchGuard::enter(shared);
        catch_unwind(AssertUnwindSafe(|| callback.invoke(&message.payload)))
    };

    match outcome {
        Ok(()) => {
            tracing::trace!(subject = %message.subject, bytes = message.payload.len(), "update callback invoked");
            shared.instrumentation.dispatch_delivered(started);
        }
        Err(panic) => {
            tracing::error!(
                subject = %message.subject,
                panic = %panic_message(panic.as_ref()),
                "update callback panicked"
            );
            shared.instrumentation.dispatch_panicked(started);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_panic_message() {
        let from_str = catch_unwind(|| {
            panic!("boom");
        })
        .unwrap_err();
        assert_eq!(panic_message(from_str.as_ref()), "boom");

        let from_string = catch_unwind(|| {
            panic!("{}", String::from("formatted"));
        })
        .unwrap_err();
        assert_eq!(panic_message(from_string.as_ref()), "formatted");
    }

    #[test]
    fn test_text_callback_decodes_payload() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let callback = Callback::Text(Box::new(move |msg: String| {
            seen_clone.lock().unwrap().push(msg);
        }));

        callback.invoke(b"");
        callback.invoke(b"policy v2");

        assert_eq!(*seen.lock().unwrap(), vec!["".to_string(), "policy v2".to_string()]);
    }

    #[test]
    fn test_raw_callback_sees_bytes_unchanged() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let callback = Callback::Raw(Box::new(move |bytes: &[u8]| {
            seen_clone.lock().unwrap().extend_from_slice(bytes);
        }));

        callback.invoke(&[0xff, 0x00, 0x7f]);
        assert_eq!(*seen.lock().unwrap(), vec![0xff, 0x00, 0x7f]);
    }

    #[test]
    fn test_dispatch_guard_is_per_notifier() {
        let outer = Shared::new(Default::default());
        let inner = Shared::new(Default::default());

        assert!(!in_dispatch(&outer));
        {
            let _outer = DispatchGuard::enter(&outer);
            assert!(in_dispatch(&outer));
            assert!(!in_dispatch(&inner));
            {
                let _inner = DispatchGuard::enter(&inner);
                assert!(in_dispatch(&outer));
                assert!(in_dispatch(&inner));
            }
            assert!(!in_dispatch(&inner));
        }
        assert!(!in_dispatch(&outer));
    }
}
