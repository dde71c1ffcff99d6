use crate::consensus::RaftMessage;
use crate::dispatch::Event;
use rand::Rng;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

/// A deadline shared between a timer task and the actor that keeps pushing
/// it out.
#[derive(Clone, Default)]
struct SharedDeadline {
    data: Arc<Mutex<Option<Instant>>>,
}

impl SharedDeadline {
    fn new() -> Self {
        SharedDeadline {
            data: Arc::new(Mutex::new(None)),
        }
    }

    fn replace(&self, deadline: Instant) {
        self.data
            .lock()
            .expect("SharedDeadline.replace() mutex guard poison")
            .replace(deadline);
    }

    fn take(&self) -> Option<Instant> {
        self.data
            .lock()
            .expect("SharedDeadline.take() mutex guard poison")
            .take()
    }
}

struct Stopper {
    stop_signal: Arc<AtomicBool>,
}

struct StopCheck {
    stop_signal: Arc<AtomicBool>,
}

impl Drop for Stopper {
    fn drop(&mut self) {
        self.stop_signal.store(true, Ordering::Release);
    }
}

impl StopCheck {
    fn should_stop(&self) -> bool {
        self.stop_signal.load(Ordering::Acquire)
    }
}

fn stop_signal() -> (Stopper, StopCheck) {
    let stop_signal = Arc::new(AtomicBool::new(false));
    let stopper = Stopper {
        stop_signal: stop_signal.clone(),
    };
    let stop_check = StopCheck { stop_signal };
    (stopper, stop_check)
}

/// Handle to the randomized election timer. Always running, in every role:
/// followers and candidates campaign off it, leaders use it as the lease
/// check interval. Dropping the handle stops the timer task.
pub(super) struct ElectionTimerHandle {
    next_wake_time: SharedDeadline,
    timeout_range: RangeInclusive<Duration>,
    _to_drop: Stopper,
}

struct ElectionTimerTask {
    next_wake_time: SharedDeadline,
    event_queue: mpsc::WeakSender<Event>,
    stop_check: StopCheck,
    // Static backoff between fired timeouts, so a wedged election does not
    // spin the queue.
    timeout_backoff: Duration,
}

impl ElectionTimerHandle {
    pub(super) fn spawn_timer_task(
        min_timeout: Duration,
        max_timeout: Duration,
        event_queue: mpsc::WeakSender<Event>,
    ) -> Self {
        let next_wake_time = SharedDeadline::new();
        let (stopper, stop_check) = stop_signal();

        let task = ElectionTimerTask {
            next_wake_time: next_wake_time.clone(),
            event_queue,
            stop_check,
            timeout_backoff: min_timeout,
        };
        let handle = ElectionTimerHandle {
            next_wake_time,
            timeout_range: RangeInclusive::new(min_timeout, max_timeout),
            _to_drop: stopper,
        };

        // The task must find a deadline when it starts, otherwise it fires
        // a timeout immediately.
        handle.reset();
        tokio::task::spawn(task.run());

        handle
    }

    /// Push the deadline out by a fresh randomized timeout. Randomization
    /// spreads simultaneous campaigns apart.
    pub(super) fn reset(&self) {
        let timeout = rand::thread_rng().gen_range(self.timeout_range.clone());
        self.next_wake_time.replace(Instant::now() + timeout);
    }
}

impl ElectionTimerTask {
    async fn run(self) {
        loop {
            match self.next_wake_time.take() {
                Some(wake_time) => {
                    tokio::time::sleep_until(wake_time).await;
                }
                None => {
                    // Slept through the deadline without a renewal.
                    if self.stop_check.should_stop() {
                        return;
                    }
                    if !send_event(&self.event_queue, RaftMessage::ElectionTimeout).await {
                        return;
                    }
                    tokio::time::sleep(self.timeout_backoff).await;
                }
            }
            if self.stop_check.should_stop() {
                return;
            }
        }
    }
}

/// Handle to the fixed-interval heartbeat ticker. Only alive while this
/// replica is leader; dropping it stops the task.
pub(super) struct HeartbeatTimerHandle {
    _to_drop: Stopper,
}

struct HeartbeatTimerTask {
    interval: Duration,
    event_queue: mpsc::WeakSender<Event>,
    stop_check: StopCheck,
}

impl HeartbeatTimerHandle {
    pub(super) fn spawn_timer_task(interval: Duration, event_queue: mpsc::WeakSender<Event>) -> Self {
        let (stopper, stop_check) = stop_signal();
        let task = HeartbeatTimerTask {
            interval,
            event_queue,
            stop_check,
        };
        tokio::task::spawn(task.run());

        HeartbeatTimerHandle { _to_drop: stopper }
    }
}

impl HeartbeatTimerTask {
    async fn run(self) {
        loop {
            tokio::time::sleep(self.interval).await;
            if self.stop_check.should_stop() {
                return;
            }
            if !send_event(&self.event_queue, RaftMessage::HeartbeatTimeout).await {
                return;
            }
        }
    }
}

/// Timer tasks hold only a weak sender so a dropped actor is not kept alive
/// by its own timers. Returns false when the actor is gone.
async fn send_event(event_queue: &mpsc::WeakSender<Event>, message: RaftMessage) -> bool {
    match event_queue.upgrade() {
        Some(sender) => sender.send(Event::Inbound(message)).await.is_ok(),
        None => false,
    }
}
