//! Terminal signal tracking for the polling loop.
//!
//! Handlers only record which signal arrived. The loop polls
//! [`pending_signal`] between sleep slices and after each tick, so an
//! external command already running is allowed to finish.

use std::sync::atomic::{AtomicI32, Ordering};

static PENDING_SIGNAL: AtomicI32 = AtomicI32::new(0);

pub const HANDLED_SIGNALS: [i32; 3] = [libc::SIGHUP, libc::SIGINT, libc::SIGTERM];

pub fn install_handlers() {
    extern "C" fn handler(signal: libc::c_int) {
        PENDING_SIGNAL.store(signal, Ordering::SeqCst);
    }

    unsafe {
        let handler_ptr = handler as *const () as libc::sighandler_t;
        for signal in HANDLED_SIGNALS {
            libc::signal(signal, handler_ptr);
        }
    }
}

pub fn pending_signal() -> Option<i32> {
    match PENDING_SIGNAL.load(Ordering::SeqCst) {
        0 => None,
        signal => Some(signal),
    }
}

/// `128 + signal`, the shell convention.
pub fn exit_code_for(signal: i32) -> i32 {
    128 + signal
}
