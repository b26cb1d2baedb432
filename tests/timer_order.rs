mod common;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tickloop::Runtime;

#[test]
fn test_timers_fire_in_deadline_order() {
    common::init_test_logging();
    let mut rt = Runtime::new();
    let handle = rt.handle();
    let order = Rc::new(RefCell::new(Vec::new()));

    for ms in [300u64, 100, 200] {
        let order = order.clone();
        handle.schedule(Duration::from_millis(ms), move || order.borrow_mut().push(ms));
    }

    rt.run();

    assert_eq!(*order.borrow(), vec![100, 200, 300]);
}

#[test]
fn test_timer_waits_at_least_its_delay() {
    let mut rt = Runtime::new();
    let fired_at = Rc::new(RefCell::new(None));
    let start = Instant::now();

    let f = fired_at.clone();
    rt.handle()
        .schedule(Duration::from_millis(50), move || *f.borrow_mut() = Some(Instant::now()));
    rt.run();

    let fired_at = fired_at.borrow().expect("timer should have fired");
    assert!(fired_at - start >= Duration::from_millis(50));
}

#[test]
fn test_cancelled_timer_never_fires() {
    let mut rt = Runtime::new();
    let handle = rt.handle();
    let fired = Rc::new(RefCell::new(false));

    let f = fired.clone();
    let timer = handle.schedule(Duration::from_millis(10), move || *f.borrow_mut() = true);

    assert!(handle.cancel(timer));
    assert!(!handle.cancel(timer), "cancel should be idempotent");

    rt.run();
    assert!(!*fired.borrow());
}

#[test]
fn test_timer_scheduled_from_callback_waits_for_next_tick() {
    let mut rt = Runtime::new();
    let handle = rt.handle();
    let log = Rc::new(RefCell::new(Vec::new()));

    let (h, l) = (handle.clone(), log.clone());
    handle.schedule(Duration::ZERO, move || {
        l.borrow_mut().push("outer");
        let l = l.clone();
        // Already expired when registered, still not fired by this advance.
        h.schedule(Duration::ZERO, move || l.borrow_mut().push("inner"));
    });

    let first = rt.tick();
    assert_eq!(first.timers_fired, 1);
    assert_eq!(*log.borrow(), vec!["outer"]);

    let second = rt.tick();
    assert_eq!(second.timers_fired, 1);
    assert_eq!(*log.borrow(), vec!["outer", "inner"]);
}

#[test]
fn test_self_rescheduling_timer_advances_once_per_tick() {
    let mut rt = Runtime::new();
    let handle = rt.handle();
    let count = Rc::new(RefCell::new(0));

    fn arm(handle: tickloop::Handle, count: Rc<RefCell<u32>>) {
        let h = handle.clone();
        handle.schedule(Duration::ZERO, move || {
            *count.borrow_mut() += 1;
            if *count.borrow() < 5 {
                arm(h, count);
            }
        });
    }
    arm(handle.clone(), count.clone());

    for expected in 1..=5 {
        rt.tick();
        assert_eq!(*count.borrow(), expected);
    }
    assert_eq!(handle.pending_timers(), 0);
}

#[test]
fn test_cancel_after_fire_is_noop() {
    let mut rt = Runtime::new();
    let handle = rt.handle();
    let timer = handle.schedule(Duration::ZERO, || {});

    rt.tick();
    assert!(!handle.cancel(timer));
}

#[test]
fn test_huge_delay_parks_timer_instead_of_panicking() {
    let mut rt = Runtime::new();
    let handle = rt.handle();
    let fired = Rc::new(RefCell::new(false));

    let f = fired.clone();
    let timer = handle.schedule(Duration::MAX, move || *f.borrow_mut() = true);

    assert_eq!(rt.tick().timers_fired, 0);
    assert_eq!(handle.pending_timers(), 1);
    assert!(handle.cancel(timer));
    assert!(!*fired.borrow());
}
