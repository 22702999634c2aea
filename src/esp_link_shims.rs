//! ESP-IDF runtime symbols required by the async stack.
//!
//! `embassy-sync` needs a `critical-section` implementation and the
//! `async-io-mini` timers need an `embassy-time` driver. Host builds get both
//! from the `std` features of those crates; on the device they are provided
//! here on top of FreeRTOS threads and the ESP high-resolution timer.
//!
//! Timer wakes are served by one background thread holding a deadline list,
//! so the dispatcher's millisecond readiness tick costs a list entry rather
//! than a thread.

use core::cell::{Cell, RefCell};
use core::task::Waker;
use core::time::Duration;
use std::sync::{Condvar, Mutex, MutexGuard, Once, PoisonError};

use log::error;

// ── critical-section ─────────────────────────────────────────

static CS_LOCK: Mutex<()> = Mutex::new(());

thread_local! {
    static CS_DEPTH: Cell<u8> = const { Cell::new(0) };
    static CS_GUARD: RefCell<Option<MutexGuard<'static, ()>>> = const { RefCell::new(None) };
}

/// Re-entrant acquire: only the outermost call takes the lock.
#[unsafe(no_mangle)]
pub extern "C" fn _critical_section_1_0_acquire() -> u8 {
    CS_DEPTH.with(|depth| {
        let d = depth.get();
        if d == 0 {
            let guard = CS_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
            CS_GUARD.with(|g| *g.borrow_mut() = Some(guard));
        }
        let d = d.saturating_add(1);
        depth.set(d);
        d
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn _critical_section_1_0_release(_token: u8) {
    CS_DEPTH.with(|depth| {
        let d = depth.get();
        if d == 0 {
            return;
        }
        depth.set(d - 1);
        if d == 1 {
            CS_GUARD.with(|g| *g.borrow_mut() = None);
        }
    });
}

// ── embassy-time driver ──────────────────────────────────────

/// Pending wake-ups, at most one entry per waker.
static WAKES: Mutex<Vec<(u64, Waker)>> = Mutex::new(Vec::new());
static WAKES_CHANGED: Condvar = Condvar::new();
static WAKE_THREAD: Once = Once::new();

const WAKE_THREAD_STACK: usize = 4 * 1024;

/// Microseconds since boot; matches the default 1 MHz embassy tick.
#[unsafe(no_mangle)]
fn _embassy_time_now() -> u64 {
    // SAFETY: esp_timer_get_time has no preconditions once the IDF is up.
    let us = unsafe { esp_idf_svc::sys::esp_timer_get_time() };
    us.max(0) as u64
}

#[unsafe(no_mangle)]
fn _embassy_time_schedule_wake(at: u64, waker: &Waker) {
    WAKE_THREAD.call_once(start_wake_thread);

    let mut wakes = WAKES.lock().unwrap_or_else(PoisonError::into_inner);
    match wakes.iter_mut().find(|(_, w)| w.will_wake(waker)) {
        Some(entry) => entry.0 = entry.0.min(at),
        None => wakes.push((at, waker.clone())),
    }
    drop(wakes);
    WAKES_CHANGED.notify_one();
}

fn start_wake_thread() {
    let spawned = std::thread::Builder::new()
        .name("time-wake".into())
        .stack_size(WAKE_THREAD_STACK)
        .spawn(wake_loop);
    if let Err(e) = spawned {
        error!("TIME: wake thread failed to start: {}", e);
    }
}

fn wake_loop() {
    let mut due: Vec<Waker> = Vec::new();
    let mut wakes = WAKES.lock().unwrap_or_else(PoisonError::into_inner);
    loop {
        let now = _embassy_time_now();
        let mut i = 0;
        while i < wakes.len() {
            if wakes[i].0 <= now {
                due.push(wakes.swap_remove(i).1);
            } else {
                i += 1;
            }
        }

        if !due.is_empty() {
            drop(wakes);
            for waker in due.drain(..) {
                waker.wake();
            }
            wakes = WAKES.lock().unwrap_or_else(PoisonError::into_inner);
            continue;
        }

        wakes = match wakes.iter().map(|(at, _)| *at).min() {
            Some(next) => {
                let wait = Duration::from_micros(next.saturating_sub(now));
                WAKES_CHANGED
                    .wait_timeout(wakes, wait)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
            None => WAKES_CHANGED
                .wait(wakes)
                .unwrap_or_else(PoisonError::into_inner),
        };
    }
}
