//! Best-effort data preservation when the process is about to die from an
//! unrecoverable signal: runs `force_flush_all()` on an alternate stack
//! (the main stack may itself be the reason we're here, e.g. overflow),
//! then restores whatever handler was previously installed for that
//! signal and re-raises it, so the process still crashes the way it
//! would have without us in the loop.

use std::{mem::MaybeUninit, ptr, sync::Once};

const CRASH_SIGNALS: [libc::c_int; 6] =
    [libc::SIGSEGV, libc::SIGABRT, libc::SIGFPE, libc::SIGILL, libc::SIGTRAP, libc::SIGBUS];

const ALT_STACK_SIZE: usize = 64 * 1024;

static INSTALL: Once = Once::new();
static mut ALT_STACK: [u8; ALT_STACK_SIZE] = [0; ALT_STACK_SIZE];
static mut PREVIOUS: [MaybeUninit<libc::sigaction>; CRASH_SIGNALS.len()] =
    [MaybeUninit::uninit(); CRASH_SIGNALS.len()];

/// Installs handlers for the crash signals the first time it's called;
/// later calls are no-ops. Safe to call from multiple threads.
pub(crate) fn install_crash_handlers() {
    INSTALL.call_once(|| unsafe {
        install_alt_stack();
        for (i, &signal) in CRASH_SIGNALS.iter().enumerate() {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = handle_crash_signal as usize;
            action.sa_flags = libc::SA_SIGINFO | libc::SA_ONSTACK;
            libc::sigemptyset(&mut action.sa_mask);

            let mut previous: libc::sigaction = std::mem::zeroed();
            if libc::sigaction(signal, &action, &mut previous) == 0 {
                PREVIOUS[i] = MaybeUninit::new(previous);
            }
        }
    });
}

unsafe fn install_alt_stack() {
    let stack = libc::stack_t {
        ss_sp: ptr::addr_of_mut!(ALT_STACK) as *mut libc::c_void,
        ss_flags: 0,
        ss_size: ALT_STACK_SIZE,
    };
    libc::sigaltstack(&stack, ptr::null_mut());
}

extern "C" fn handle_crash_signal(
    signal: libc::c_int,
    _info: *mut libc::siginfo_t,
    _context: *mut libc::c_void,
) {
    crate::manager::force_flush_all();
    unsafe { chain_to_previous(signal) };
}

/// Restores the handler that was registered for `signal` before ours and
/// re-raises it, letting the kernel dispatch to whatever that handler
/// actually is (a custom one, `SIG_DFL`, or `SIG_IGN`) without us having
/// to reason about its calling convention.
unsafe fn chain_to_previous(signal: libc::c_int) {
    let Some(index) = CRASH_SIGNALS.iter().position(|&s| s == signal) else { return };
    let previous = PREVIOUS[index].assume_init();
    let mut restored: libc::sigaction = std::mem::zeroed();
    libc::sigaction(signal, &previous, &mut restored);
    libc::raise(signal);
}
