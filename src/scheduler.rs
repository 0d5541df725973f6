//! Cooperative single-threaded scheduler (§4.2).
//!
//! Restructured from the teacher's `Schedule`/`ScheduleKind`/`Scheduler`
//! (periodic/boost/one-shot schedules with quiet hours) into the generic
//! `{handler, period_ms, next_due_ms}` task list the spec describes. The
//! `SchedulerDelegate`-style decoupling is kept in spirit: each task is a
//! boxed closure a component registers at startup, one of which is
//! `EventBus::dispatch` itself, registered with the shortest period and
//! highest precedence.

/// One scheduled unit of work.
struct Task {
    label: &'static str,
    period_ms: u64,
    next_due_ms: u64,
    handler: Box<dyn FnMut(u64)>,
}

/// A set of tasks run cooperatively from a single thread. `tick(now_ms)`
/// visits every task whose `next_due_ms <= now` in registration order,
/// invokes it, and advances its due time.
///
/// Drift policy (§4.2): a missed task runs once and its `next_due_ms` is
/// reset to `now + period_ms` — missed ticks are dropped, never caught up.
pub struct Scheduler {
    tasks: Vec<Task>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    /// Register a task. Tasks run in registration order among those due in
    /// the same `tick()` call — register the EventBus dispatch task first
    /// (shortest period, highest precedence, §4.2).
    pub fn register<F>(&mut self, label: &'static str, period_ms: u64, start_ms: u64, handler: F)
    where
        F: FnMut(u64) + 'static,
    {
        self.tasks.push(Task {
            label,
            period_ms,
            next_due_ms: start_ms + period_ms,
            handler: Box::new(handler),
        });
    }

    pub fn remove(&mut self, label: &str) {
        self.tasks.retain(|t| t.label != label);
    }

    /// Run every task whose `next_due_ms <= now`, applying the drift
    /// policy. Returns the number of tasks invoked.
    pub fn tick(&mut self, now_ms: u64) -> usize {
        let mut fired = 0usize;
        for task in &mut self.tasks {
            if now_ms >= task.next_due_ms {
                (task.handler)(now_ms);
                // Drop missed ticks: always resume counting from `now`,
                // never attempt to "catch up" lost periods.
                task.next_due_ms = now_ms + task.period_ms;
                fired += 1;
            }
        }
        fired
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn task_fires_at_declared_cadence() {
        let mut sched = Scheduler::new();
        let calls = Rc::new(RefCell::new(Vec::new()));
        let calls2 = calls.clone();
        sched.register("tick10", 10, 0, move |now| calls2.borrow_mut().push(now));

        sched.tick(5); // not yet due
        assert!(calls.borrow().is_empty());
        sched.tick(10); // due
        assert_eq!(*calls.borrow(), vec![10]);
        sched.tick(15); // not due again until 20
        assert_eq!(calls.borrow().len(), 1);
        sched.tick(20);
        assert_eq!(*calls.borrow(), vec![10, 20]);
    }

    #[test]
    fn missed_tick_is_dropped_not_caught_up() {
        let mut sched = Scheduler::new();
        let calls = Rc::new(RefCell::new(0u32));
        let calls2 = calls.clone();
        sched.register("tick10", 10, 0, move |_now| *calls2.borrow_mut() += 1);

        // Jump straight to t=1000 (100 periods missed); only one firing
        // should occur, and the next due time should be relative to 1000.
        sched.tick(1000);
        assert_eq!(*calls.borrow(), 1);
        sched.tick(1005);
        assert_eq!(*calls.borrow(), 1); // not due until 1010
        sched.tick(1010);
        assert_eq!(*calls.borrow(), 2);
    }

    #[test]
    fn remove_stops_future_firings() {
        let mut sched = Scheduler::new();
        let calls = Rc::new(RefCell::new(0u32));
        let calls2 = calls.clone();
        sched.register("t", 10, 0, move |_now| *calls2.borrow_mut() += 1);
        sched.tick(10);
        assert_eq!(*calls.borrow(), 1);
        sched.remove("t");
        sched.tick(20);
        assert_eq!(*calls.borrow(), 1);
    }

    #[test]
    fn tasks_run_in_registration_order() {
        let mut sched = Scheduler::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        let o1 = order.clone();
        let o2 = order.clone();
        sched.register("first", 10, 0, move |_now| o1.borrow_mut().push("first"));
        sched.register("second", 10, 0, move |_now| o2.borrow_mut().push("second"));
        sched.tick(10);
        assert_eq!(*order.borrow(), vec!["first", "second"]);
    }
}
