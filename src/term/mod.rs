//! Signal handling and terminal control
//!
//! Installs the process signal traps, owns raw-mode handling for the
//! controlling TTY and exposes the non-blocking key reader used by the
//! interactive console. The signal handler only touches atomics and the
//! saved termios state; on the fourth signal it writes a fixed diagnostic
//! and hard-exits with code 123, skipping destructors.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};

#[cfg(unix)]
use std::mem::MaybeUninit;

static RECEIVED_SIGTERM: AtomicI32 = AtomicI32::new(0);
static RECEIVED_NB_SIGNALS: AtomicUsize = AtomicUsize::new(0);
static TRANSCODE_INIT_DONE: AtomicUsize = AtomicUsize::new(0);
static EXITED: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
static RESTORE_TTY: AtomicBool = AtomicBool::new(false);
#[cfg(unix)]
static mut OLD_TTY: MaybeUninit<libc::termios> = MaybeUninit::uninit();

/// The signal that interrupted the transcode, if any.
pub fn received_signal() -> Option<i32> {
    match RECEIVED_SIGTERM.load(Ordering::SeqCst) {
        0 => None,
        sig => Some(sig),
    }
}

/// How many termination-class signals have arrived so far.
pub fn received_signal_count() -> usize {
    RECEIVED_NB_SIGNALS.load(Ordering::SeqCst)
}

/// Mark the end of initialization; from now on the first signal is left to
/// the cooperative shutdown path instead of cancelling blocking I/O.
pub fn mark_init_done() {
    TRANSCODE_INIT_DONE.store(1, Ordering::SeqCst);
}

/// Flag that the main thread finished finalization, releasing any console
/// control handler that is stalling process teardown.
pub fn mark_exited() {
    EXITED.store(true, Ordering::SeqCst);
}

/// Signal count at which the process stops cooperating and hard-exits.
pub fn signal_storm(count: usize) -> bool {
    count > 3
}

/// Initialization-gated interrupt predicate: during initialization any
/// signal cancels; in steady state the first one is reserved for the
/// cooperative shutdown.
fn should_interrupt(signals: usize, init_done: usize) -> bool {
    signals > init_done
}

/// Blocking I/O in collaborators consults this to abort long reads once a
/// signal has arrived.
pub fn interrupt_requested() -> bool {
    should_interrupt(
        RECEIVED_NB_SIGNALS.load(Ordering::SeqCst),
        TRANSCODE_INIT_DONE.load(Ordering::SeqCst),
    )
}

/// Clone-able cancellation handle handed to collaborators.
#[derive(Debug, Clone, Copy, Default)]
pub struct CancelToken;

impl CancelToken {
    pub fn new() -> Self {
        Self
    }

    pub fn is_cancelled(&self) -> bool {
        interrupt_requested()
    }
}

#[cfg(unix)]
unsafe fn restore_tty_now() {
    // Async-signal-safe: tcsetattr on saved state only.
    if RESTORE_TTY.load(Ordering::SeqCst) {
        let saved = std::ptr::addr_of!(OLD_TTY);
        libc::tcsetattr(0, libc::TCSANOW, (*saved).as_ptr());
    }
}

#[cfg(unix)]
unsafe extern "C" fn sigterm_handler(sig: libc::c_int) {
    RECEIVED_SIGTERM.store(sig, Ordering::SeqCst);
    let count = RECEIVED_NB_SIGNALS.fetch_add(1, Ordering::SeqCst) + 1;
    restore_tty_now();
    if signal_storm(count) {
        const MSG: &[u8] = b"Received > 3 system signals, hard exiting\n";
        libc::write(
            libc::STDERR_FILENO,
            MSG.as_ptr() as *const libc::c_void,
            MSG.len(),
        );
        libc::_exit(123);
    }
}

/// Install signal traps and, when interaction is requested, put the TTY in
/// raw mode. Restoration is guaranteed on every exit path via [`exit`] and
/// the handler itself.
#[cfg(unix)]
pub fn init(stdin_interaction: bool) {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = sigterm_handler as usize;
        // block other interrupts while one is handled, restart
        // interruptible syscalls
        libc::sigfillset(&mut action.sa_mask);
        action.sa_flags = libc::SA_RESTART;

        if stdin_interaction {
            let mut tty: libc::termios = std::mem::zeroed();
            if libc::tcgetattr(0, &mut tty) == 0 {
                std::ptr::addr_of_mut!(OLD_TTY).write(MaybeUninit::new(tty));
                RESTORE_TTY.store(true, Ordering::SeqCst);

                tty.c_iflag &= !(libc::IGNBRK
                    | libc::BRKINT
                    | libc::PARMRK
                    | libc::ISTRIP
                    | libc::INLCR
                    | libc::IGNCR
                    | libc::ICRNL
                    | libc::IXON);
                tty.c_oflag |= libc::OPOST;
                tty.c_lflag &= !(libc::ECHO | libc::ECHONL | libc::ICANON | libc::IEXTEN);
                tty.c_cflag &= !(libc::CSIZE | libc::PARENB);
                tty.c_cflag |= libc::CS8;
                tty.c_cc[libc::VMIN] = 1;
                tty.c_cc[libc::VTIME] = 0;

                libc::tcsetattr(0, libc::TCSANOW, &tty);
            }
            libc::sigaction(libc::SIGQUIT, &action, std::ptr::null_mut());
        }

        libc::sigaction(libc::SIGINT, &action, std::ptr::null_mut());
        libc::sigaction(libc::SIGTERM, &action, std::ptr::null_mut());
        libc::sigaction(libc::SIGXCPU, &action, std::ptr::null_mut());
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

#[cfg(not(unix))]
pub fn init(_stdin_interaction: bool) {}

/// Restore the TTY. Safe to call more than once.
#[cfg(unix)]
pub fn exit() {
    unsafe {
        restore_tty_now();
    }
}

#[cfg(not(unix))]
pub fn exit() {}

/// Read one byte from standard input without blocking. Returns the byte,
/// or -1 when no input is pending, or 0 on end of file.
#[cfg(unix)]
pub fn read_key() -> i32 {
    unsafe {
        let mut tv = libc::timeval { tv_sec: 0, tv_usec: 0 };
        let mut rfds: libc::fd_set = std::mem::zeroed();
        libc::FD_ZERO(&mut rfds);
        libc::FD_SET(0, &mut rfds);

        let n = libc::select(
            1,
            &mut rfds,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            &mut tv,
        );
        if n > 0 {
            let mut ch: u8 = 0;
            let n = libc::read(0, &mut ch as *mut u8 as *mut libc::c_void, 1);
            if n == 1 {
                return ch as i32;
            }
            return n as i32;
        }
    }
    -1
}

#[cfg(not(unix))]
pub fn read_key() -> i32 {
    -1
}

/// Toggle TTY echo; used while the console prompts for a command line.
#[cfg(unix)]
pub fn set_tty_echo(on: bool) {
    unsafe {
        let mut tty: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(0, &mut tty) == 0 {
            if on {
                tty.c_lflag |= libc::ECHO;
            } else {
                tty.c_lflag &= !libc::ECHO;
            }
            libc::tcsetattr(0, libc::TCSANOW, &tty);
        }
    }
}

#[cfg(not(unix))]
pub fn set_tty_echo(_on: bool) {}

/// Whether standard input is a terminal; interaction is disabled otherwise.
#[cfg(unix)]
pub fn stdin_isatty() -> bool {
    unsafe { libc::isatty(0) == 1 }
}

#[cfg(not(unix))]
pub fn stdin_isatty() -> bool {
    false
}
