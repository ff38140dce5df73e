//! Mutex, semaphore and condition-variable behavior, including deadlock detection.

use std::cell::RefCell;
use std::rc::Rc;

use platsim_kernel::{ActivityError, Engine, EngineError, PlatformConfig};

fn platform(yaml: &str) -> PlatformConfig {
    serde_yaml::from_str(yaml).unwrap()
}

const ONE_HOST: &str = "hosts: [{name: h1, speed: 1e9}]";

#[test]
fn mutex_hand_off_is_fifo() {
    let mut engine = Engine::new(1);
    engine.build_platform(&platform(ONE_HOST)).unwrap();
    let h1 = engine.host_by_name("h1").unwrap();

    let order = Rc::new(RefCell::new(Vec::new()));
    let mutex = Rc::new(RefCell::new(None));

    {
        let mutex = mutex.clone();
        let order = order.clone();
        engine.spawn("holder", h1, move |ctx| async move {
            let m = ctx.create_mutex();
            *mutex.borrow_mut() = Some(m.clone());
            m.lock(&ctx).await;
            ctx.sleep(1.0).await.unwrap();
            order.borrow_mut().push("holder".to_string());
            m.unlock(&ctx);
        });
    }
    for (name, delay) in [("first", 0.1), ("second", 0.2)] {
        let mutex = mutex.clone();
        let order = order.clone();
        engine.spawn(name, h1, move |ctx| async move {
            ctx.sleep(delay).await.unwrap();
            let m = mutex.borrow().clone().unwrap();
            m.lock(&ctx).await;
            order.borrow_mut().push(ctx.label());
            m.unlock(&ctx);
        });
    }

    engine.run().unwrap();
    assert_eq!(*order.borrow(), vec!["holder", "first", "second"]);
}

#[test]
fn try_lock_does_not_block() {
    let mut engine = Engine::new(1);
    engine.build_platform(&platform(ONE_HOST)).unwrap();
    let h1 = engine.host_by_name("h1").unwrap();

    engine.spawn("solo", h1, |ctx| async move {
        let m = ctx.create_mutex();
        assert!(m.try_lock(&ctx));
        assert!(!m.try_lock(&ctx));
        m.unlock(&ctx);
        assert!(m.try_lock(&ctx));
        m.unlock(&ctx);
    });

    engine.run().unwrap();
}

#[test]
fn deadlock_is_detected_and_diagnosed() {
    // Two actors lock m1 and m2 in opposite order; the engine halts with a diagnostic
    // naming both actors and both mutexes.
    let mut engine = Engine::new(1);
    engine.build_platform(&platform(ONE_HOST)).unwrap();
    let h1 = engine.host_by_name("h1").unwrap();

    let mutexes = Rc::new(RefCell::new(None));
    {
        let mutexes = mutexes.clone();
        engine.spawn("alice", h1, move |ctx| async move {
            let m1 = ctx.create_mutex();
            let m2 = ctx.create_mutex();
            *mutexes.borrow_mut() = Some((m1.clone(), m2.clone()));
            m1.lock(&ctx).await;
            ctx.sleep(0.1).await.unwrap();
            m2.lock(&ctx).await;
        });
    }
    {
        let mutexes = mutexes.clone();
        engine.spawn("bob", h1, move |ctx| async move {
            ctx.yield_now().await;
            let (m1, m2) = mutexes.borrow().clone().unwrap();
            m2.lock(&ctx).await;
            ctx.sleep(0.1).await.unwrap();
            m1.lock(&ctx).await;
        });
    }

    let reported = Rc::new(RefCell::new(false));
    {
        let reported = reported.clone();
        engine.on_deadlock(move |_| *reported.borrow_mut() = true);
    }

    match engine.run() {
        Err(EngineError::Deadlock(entries)) => {
            assert_eq!(entries.len(), 2);
            let actors: Vec<&str> = entries.iter().map(|e| e.actor.as_str()).collect();
            assert!(actors.contains(&"alice") && actors.contains(&"bob"));
            for entry in entries.iter() {
                assert!(entry.waiting_on.contains("mutex"), "got '{}'", entry.waiting_on);
            }
        }
        other => panic!("expected a deadlock, got {:?}", other.map_err(|e| e.to_string())),
    }
    assert!(*reported.borrow());
}

#[test]
fn semaphore_timed_acquire() {
    let mut engine = Engine::new(1);
    engine.build_platform(&platform(ONE_HOST)).unwrap();
    let h1 = engine.host_by_name("h1").unwrap();

    let semaphore = Rc::new(RefCell::new(None));
    {
        let semaphore = semaphore.clone();
        engine.spawn("consumer", h1, move |ctx| async move {
            let sem = ctx.create_semaphore(0);
            *semaphore.borrow_mut() = Some(sem.clone());

            // Nobody releases yet: times out after 0.5 s.
            let err = sem.acquire_timeout(&ctx, 0.5).await.unwrap_err();
            assert_eq!(err, ActivityError::Timeout);
            assert!((ctx.time() - 0.5).abs() < 1e-6);

            // The producer releases at t = 1: acquisition succeeds before the deadline.
            sem.acquire_timeout(&ctx, 10.0).await.unwrap();
            assert!((ctx.time() - 1.0).abs() < 1e-6);
        });
    }
    {
        let semaphore = semaphore.clone();
        engine.spawn("producer", h1, move |ctx| async move {
            ctx.sleep(1.0).await.unwrap();
            semaphore.borrow().clone().unwrap().release();
        });
    }

    engine.run().unwrap();
}

#[test]
fn semaphore_counts_units() {
    let mut engine = Engine::new(1);
    engine.build_platform(&platform(ONE_HOST)).unwrap();
    let h1 = engine.host_by_name("h1").unwrap();

    engine.spawn("solo", h1, |ctx| async move {
        let sem = ctx.create_semaphore(2);
        assert!(sem.try_acquire(&ctx));
        assert!(sem.try_acquire(&ctx));
        assert!(!sem.try_acquire(&ctx));
        sem.release();
        assert!(sem.try_acquire(&ctx));
        sem.release();
        sem.release();
    });

    engine.run().unwrap();
}

#[test]
fn condvar_notify_one_wakes_in_order() {
    let mut engine = Engine::new(1);
    engine.build_platform(&platform(ONE_HOST)).unwrap();
    let h1 = engine.host_by_name("h1").unwrap();

    let shared = Rc::new(RefCell::new(None));
    let log = Rc::new(RefCell::new(Vec::new()));

    {
        let shared = shared.clone();
        let log = log.clone();
        engine.spawn("waiter", h1, move |ctx| async move {
            let mutex = ctx.create_mutex();
            let cond = ctx.create_condvar();
            *shared.borrow_mut() = Some((mutex.clone(), cond.clone()));
            mutex.lock(&ctx).await;
            cond.wait(&ctx, &mutex).await.unwrap();
            log.borrow_mut().push(("woken", ctx.time()));
            mutex.unlock(&ctx);
        });
    }
    {
        let shared = shared.clone();
        engine.spawn("notifier", h1, move |ctx| async move {
            ctx.sleep(1.0).await.unwrap();
            let (mutex, cond) = shared.borrow().clone().unwrap();
            mutex.lock(&ctx).await;
            cond.notify_one();
            mutex.unlock(&ctx);
        });
    }

    engine.run().unwrap();
    let log = log.borrow();
    assert_eq!(log.len(), 1);
    assert!((log[0].1 - 1.0).abs() < 1e-6);
}

#[test]
fn condvar_wait_timeout_reacquires_mutex() {
    let mut engine = Engine::new(1);
    engine.build_platform(&platform(ONE_HOST)).unwrap();
    let h1 = engine.host_by_name("h1").unwrap();

    engine.spawn("lonely", h1, |ctx| async move {
        let mutex = ctx.create_mutex();
        let cond = ctx.create_condvar();
        mutex.lock(&ctx).await;
        let err = cond.wait_timeout(&ctx, &mutex, 0.5).await.unwrap_err();
        assert_eq!(err, ActivityError::Timeout);
        assert!((ctx.time() - 0.5).abs() < 1e-6);
        // The mutex is held again on return, also on the timeout path.
        mutex.unlock(&ctx);
    });

    engine.run().unwrap();
}
