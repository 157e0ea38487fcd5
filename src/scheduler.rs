//! Event scheduler: nanosecond virtual time, priority-heap timers.
//!
//! Single-threaded by design — it runs on the Machine thread only; other
//! threads reach it exclusively through posted commands.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

pub type TimerId = u64;
pub type TimerCallback = Box<dyn FnMut(&mut Scheduler) + Send>;

struct TimerMeta {
    name: &'static str,
    period_ns: u64,
    deadline_ns: u64,
    one_shot: bool,
    active: bool,
}

/// Heap entry: ordered by deadline, ties broken by registration id.
struct HeapEntry {
    deadline_ns: u64,
    id: TimerId,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline_ns == other.deadline_ns && self.id == other.id
    }
}
impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the earliest deadline sorts first.
        other.deadline_ns.cmp(&self.deadline_ns).then_with(|| other.id.cmp(&self.id))
    }
}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Timer metadata lives in one vector, callbacks in a parallel vector of
/// `RefCell`s — a callback can be invoked (borrowing only `callbacks[id]`)
/// while the same call freely mutates `meta` for any timer, including its
/// own, with no unsafe code and no risk of invalidating the firing loop.
pub struct Scheduler {
    now_ns: u64,
    meta: Vec<Option<TimerMeta>>,
    callbacks: Vec<RefCell<TimerCallback>>,
    heap: BinaryHeap<HeapEntry>,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler { now_ns: 0, meta: Vec::new(), callbacks: Vec::new(), heap: BinaryHeap::new() }
    }

    pub fn now_ns(&self) -> u64 {
        self.now_ns
    }

    /// Registers a new, inactive timer and returns its id.
    pub fn register_timer(&mut self, name: &'static str, callback: TimerCallback) -> TimerId {
        let id = self.meta.len() as TimerId;
        self.meta.push(Some(TimerMeta {
            name,
            period_ns: 0,
            deadline_ns: 0,
            one_shot: true,
            active: false,
        }));
        self.callbacks.push(RefCell::new(callback));
        id
    }

    pub fn name_of(&self, id: TimerId) -> Option<&'static str> {
        self.meta.get(id as usize).and_then(|t| t.as_ref()).map(|t| t.name)
    }

    /// Arms `id` to fire `delay_ns` from now. `one_shot = false` re-arms the
    /// timer at `deadline += period_ns` after every firing.
    pub fn activate_timer(&mut self, id: TimerId, delay_ns: u64, one_shot: bool) {
        if let Some(Some(timer)) = self.meta.get_mut(id as usize) {
            timer.period_ns = delay_ns;
            timer.deadline_ns = self.now_ns + delay_ns;
            timer.one_shot = one_shot;
            timer.active = true;
            self.heap.push(HeapEntry { deadline_ns: timer.deadline_ns, id });
        }
    }

    /// Idempotent: deactivating an already-inactive or unknown timer is a no-op.
    pub fn deactivate_timer(&mut self, id: TimerId) {
        if let Some(Some(timer)) = self.meta.get_mut(id as usize) {
            timer.active = false;
        }
    }

    pub fn is_active(&self, id: TimerId) -> bool {
        self.meta.get(id as usize).and_then(|t| t.as_ref()).map(|t| t.active).unwrap_or(false)
    }

    /// Estimated time to the next firing of `id`, or `None` if inactive.
    pub fn get_eta(&self, id: TimerId) -> Option<u64> {
        let timer = self.meta.get(id as usize)?.as_ref()?;
        if !timer.active {
            return None;
        }
        Some(timer.deadline_ns.saturating_sub(self.now_ns))
    }

    /// Advances virtual time by `elapsed_ns` and fires every timer whose
    /// deadline has passed, in deadline order (ties by registration id).
    /// Callbacks may freely register/cancel timers, including themselves,
    /// without invalidating this iteration.
    pub fn advance(&mut self, elapsed_ns: u64) {
        self.now_ns += elapsed_ns;
        loop {
            let Some(top) = self.heap.peek() else { break };
            if top.deadline_ns > self.now_ns {
                break;
            }
            let entry = self.heap.pop().unwrap();
            let id = entry.id;

            // A stale heap entry (timer deactivated/re-armed since queued) is
            // simply skipped; the live entry for that activation remains.
            let due = matches!(
                self.meta.get(id as usize),
                Some(Some(t)) if t.active && t.deadline_ns == entry.deadline_ns
            );
            if !due {
                continue;
            }
            if let Some(cell) = self.callbacks.get(id as usize) {
                let mut cb = cell.borrow_mut();
                (cb)(self);
            }
            if let Some(Some(timer)) = self.meta.get_mut(id as usize) {
                if timer.active {
                    if timer.one_shot {
                        timer.active = false;
                    } else {
                        timer.deadline_ns += timer.period_ns;
                        self.heap.push(HeapEntry { deadline_ns: timer.deadline_ns, id });
                    }
                }
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;
    use std::rc::Rc;

    #[test]
    fn one_shot_timer_fires_exactly_once() {
        let mut sched = Scheduler::new();
        let fired = Rc::new(StdRefCell::new(0));
        let fired2 = fired.clone();
        let id = sched.register_timer("t", Box::new(move |_s| *fired2.borrow_mut() += 1));
        sched.activate_timer(id, 1_000, true);
        sched.advance(500);
        assert_eq!(*fired.borrow(), 0);
        sched.advance(600);
        assert_eq!(*fired.borrow(), 1);
        sched.advance(10_000);
        assert_eq!(*fired.borrow(), 1);
        assert!(!sched.is_active(id));
    }

    #[test]
    fn periodic_timer_reinserts_at_deadline_plus_period() {
        let mut sched = Scheduler::new();
        let count = Rc::new(StdRefCell::new(0));
        let count2 = count.clone();
        let id = sched.register_timer("p", Box::new(move |_s| *count2.borrow_mut() += 1));
        sched.activate_timer(id, 1_000, false);
        sched.advance(1_000);
        assert_eq!(*count.borrow(), 1);
        sched.advance(1_000);
        assert_eq!(*count.borrow(), 2);
        sched.advance(3_000);
        assert_eq!(*count.borrow(), 5);
    }

    #[test]
    fn virtual_time_is_monotone_and_deadline_observed() {
        let mut sched = Scheduler::new();
        let observed = Rc::new(StdRefCell::new(0u64));
        let observed2 = observed.clone();
        let id = sched.register_timer("t", Box::new(move |s| *observed2.borrow_mut() = s.now_ns()));
        sched.activate_timer(id, 5_000, true);
        sched.advance(5_000);
        assert!(*observed.borrow() >= 5_000);
    }

    #[test]
    fn deactivate_is_idempotent() {
        let mut sched = Scheduler::new();
        let id = sched.register_timer("t", Box::new(|_s| {}));
        sched.deactivate_timer(id);
        sched.deactivate_timer(id);
        assert!(!sched.is_active(id));
    }

    #[test]
    fn callback_can_register_and_activate_another_timer() {
        let mut sched = Scheduler::new();
        let second_fired = Rc::new(StdRefCell::new(false));
        let second_fired2 = second_fired.clone();
        let id = sched.register_timer(
            "first",
            Box::new(move |s| {
                let sf = second_fired2.clone();
                let nested = s.register_timer("second", Box::new(move |_s| *sf.borrow_mut() = true));
                s.activate_timer(nested, 100, true);
            }),
        );
        sched.activate_timer(id, 1_000, true);
        sched.advance(1_000);
        sched.advance(100);
        assert!(*second_fired.borrow());
    }

    #[test]
    fn ties_broken_by_registration_order() {
        let mut sched = Scheduler::new();
        let order = Rc::new(StdRefCell::new(Vec::new()));
        let o1 = order.clone();
        let id1 = sched.register_timer("a", Box::new(move |_s| o1.borrow_mut().push(1)));
        let o2 = order.clone();
        let id2 = sched.register_timer("b", Box::new(move |_s| o2.borrow_mut().push(2)));
        sched.activate_timer(id1, 1_000, true);
        sched.activate_timer(id2, 1_000, true);
        sched.advance(1_000);
        assert_eq!(*order.borrow(), vec![1, 2]);
    }

    #[test]
    fn self_deactivate_during_own_callback_is_idempotent_afterwards() {
        let mut sched = Scheduler::new();
        let id_cell: Rc<StdRefCell<TimerId>> = Rc::new(StdRefCell::new(0));
        let id_cell2 = id_cell.clone();
        let id = sched.register_timer(
            "self-cancel",
            Box::new(move |s| {
                let id = *id_cell2.borrow();
                s.deactivate_timer(id);
            }),
        );
        *id_cell.borrow_mut() = id;
        sched.activate_timer(id, 1_000, false);
        sched.advance(1_000);
        assert!(!sched.is_active(id));
    }
}
