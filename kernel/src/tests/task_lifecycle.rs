// 测试：任务生命周期（retain / hold / kill / drain）
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::vec::Vec;

use super::host::{boot, boot_with, memory_map, spawn_task, with_crit, HostPlatform};
use crate::arch::Cpu;
use crate::errno::Errno;
use crate::process::{kill_reason, HoldScope};

#[test]
fn new_task_starts_with_one_hold() {
    let (platform, sched) = boot(1);
    let (task, _) = spawn_task(sched);

    with_crit(platform, |c| {
        assert_eq!(task.retain_count(c), 0);
        assert_eq!(task.hold_count(c), 1);
        assert!(!task.is_killed(c));
        assert_eq!(task.kill_status(c), None);
        assert!(task.is_user_task());
        assert_eq!(task.uid(), 1000);
        assert_eq!(sched.nr_tasks(c), 1);
        assert!(Arc::ptr_eq(&sched.find_task(c, task.id()).unwrap(), &task));
    });
}

#[test]
fn task_ids_are_unique() {
    let (_, sched) = boot(1);
    let (a, _) = spawn_task(sched);
    let (b, _) = spawn_task(sched);
    assert_ne!(a.id(), b.id());
    assert!(a.id().as_u32() > 0);
}

#[test]
fn retain_fails_only_when_killed_and_unheld() {
    let (platform, sched) = boot(1);
    let (task, _) = spawn_task(sched);

    with_crit(platform, |c| {
        assert!(task.retain(c));
        task.kill(c, kill_reason::NORMAL);
        // 隐式 hold 还在
        assert!(task.retain(c));
        task.unhold(c);
        assert!(!task.retain(c));
        assert_eq!(task.retain_count(c), 2);
        task.release(c);
        task.release(c);
    });
}

#[test]
fn hold_fails_after_kill() {
    let (platform, sched) = boot(1);
    let (task, _) = spawn_task(sched);

    with_crit(platform, |c| {
        assert!(task.hold(c));
        task.kill(c, kill_reason::ABORT);
        assert!(!task.hold(c));
        assert_eq!(task.hold_count(c), 2);
    });
}

#[test]
fn drain_happens_exactly_once() {
    let (platform, sched) = boot(1);
    let (task, drops) = spawn_task(sched);

    with_crit(platform, |c| {
        assert!(task.retain(c));
        task.kill(c, kill_reason::NORMAL);
        task.unhold(c);
        assert!(!task.is_drained(c));
        assert_eq!(sched.pending_garbage(c), 0);

        task.release(c);
        assert!(task.is_drained(c));
        assert_eq!(sched.pending_garbage(c), 1);
    });

    // 回收前地址空间还没有释放
    assert_eq!(drops.load(Ordering::SeqCst), 0);
    assert_eq!(sched.collect_garbage(), 1);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
    assert_eq!(sched.collect_garbage(), 0);

    with_crit(platform, |c| {
        assert_eq!(sched.nr_tasks(c), 0);
        assert!(sched.find_task(c, task.id()).is_none());
    });
}

#[test]
fn kill_after_counts_drop_drains_immediately() {
    let (platform, sched) = boot(1);
    let (task, _) = spawn_task(sched);

    with_crit(platform, |c| {
        assert!(task.retain(c));
        task.release(c);
        assert!(task.hold(c));
        task.unhold(c);
        task.unhold(c);
        assert_eq!(task.hold_count(c), 0);
        assert!(!task.is_drained(c));
        assert_eq!(sched.pending_garbage(c), 0);

        // 两个计数已经归零，kill 的一刻即销毁
        task.kill(c, kill_reason::NORMAL);
        assert!(task.is_drained(c));
        assert!(!task.retain(c));
        assert_eq!(sched.pending_garbage(c), 1);
    });
}

#[test]
fn drain_through_unhold() {
    let (platform, sched) = boot(1);
    let (task, _) = spawn_task(sched);

    with_crit(platform, |c| {
        assert!(task.retain(c));
        task.release(c);
        task.kill(c, kill_reason::PERMISSIONS);
        task.unhold(c);
        assert!(task.is_drained(c));
        assert_eq!(sched.pending_garbage(c), 1);
    });
}

#[test]
fn second_kill_keeps_first_status() {
    let (platform, sched) = boot(1);
    let (task, _) = spawn_task(sched);

    with_crit(platform, |c| {
        task.kill(c, kill_reason::PERMISSIONS);
        task.kill(c, kill_reason::NORMAL);
        assert_eq!(task.kill_status(c), Some(kill_reason::PERMISSIONS));
        assert_eq!(task.hold_count(c), 1);
    });
}

#[test]
fn hold_scope_defers_teardown() {
    let (platform, sched) = boot(1);
    let (task, _) = spawn_task(sched);

    let scope = with_crit(platform, |c| HoldScope::new(c, &task)).unwrap();
    with_crit(platform, |c| {
        task.kill(c, kill_reason::NORMAL);
        task.unhold(c);
        // 作用域 hold 还在，引用仍然可以获取
        assert!(task.retain(c));
        task.release(c);
        assert!(!task.is_drained(c));
        assert!(HoldScope::new(c, &task).is_none());
    });

    drop(scope);
    assert!(platform.irq_enabled());
    with_crit(platform, |c| assert!(task.is_drained(c)));
}

#[test]
fn refused_hold_scope_leaves_counts_alone() {
    let (platform, sched) = boot(1);
    let (task, drops) = spawn_task(sched);

    let outer = with_crit(platform, |c| HoldScope::new(c, &task)).unwrap();
    with_crit(platform, |c| {
        task.kill(c, kill_reason::NORMAL);
        task.unhold(c);
        assert_eq!(task.hold_count(c), 1);
        assert!(HoldScope::new(c, &task).is_none());
        assert_eq!(task.hold_count(c), 1);
        assert!(!task.is_drained(c));
        assert_eq!(sched.pending_garbage(c), 0);
    });

    // 外层作用域的 unhold 才是最后一个
    drop(outer);
    with_crit(platform, |c| {
        assert!(task.is_drained(c));
        assert_eq!(sched.pending_garbage(c), 1);
    });
    assert_eq!(sched.collect_garbage(), 1);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
#[should_panic(expected = "released more than retained")]
fn release_underflow_is_fatal() {
    let (platform, sched) = boot(1);
    let (task, _) = spawn_task(sched);
    with_crit(platform, |c| task.release(c));
}

#[test]
#[should_panic(expected = "unheld more than held")]
fn unhold_underflow_is_fatal() {
    let (platform, sched) = boot(1);
    let (task, _) = spawn_task(sched);
    with_crit(platform, |c| {
        task.unhold(c);
        task.unhold(c);
    });
}

#[test]
fn registry_full_is_out_of_memory() {
    let (_, sched) = boot_with(1, 4, 1);
    let (_keep, _) = spawn_task(sched);

    let drops = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let err = crate::process::Task::new(
        sched,
        0,
        crate::process::TaskFlags::empty(),
        std::boxed::Box::new(memory_map(drops.clone())),
    )
    .unwrap_err();
    assert_eq!(err, Errno::OutOfMemory);
    // 失败的任务随即释放
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn full_registry_does_not_consume_task_ids() {
    let (platform, sched) = boot_with(1, 4, 1);
    let (first, _) = spawn_task(sched);

    let drops = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    for _ in 0..3 {
        let result = crate::process::Task::new(
            sched,
            0,
            crate::process::TaskFlags::empty(),
            std::boxed::Box::new(memory_map(drops.clone())),
        );
        assert_eq!(result.err(), Some(Errno::OutOfMemory));
    }

    with_crit(platform, |c| {
        first.kill(c, kill_reason::NORMAL);
        first.unhold(c);
    });
    assert_eq!(sched.collect_garbage(), 1);

    let (second, _) = spawn_task(sched);
    assert_eq!(second.id().as_u32(), first.id().as_u32() + 1);
    with_crit(platform, |c| assert_eq!(sched.nr_tasks(c), 1));
}

#[test]
fn concurrent_retain_release_and_kill_drain_once() {
    let (platform, sched) = boot(4);
    let (task, drops) = spawn_task(sched);

    let workers: Vec<_> = (0..3)
        .map(|core| {
            let task = task.clone();
            std::thread::spawn(move || {
                HostPlatform::enter_core(core + 1);
                let mut retained = 0;
                for _ in 0..2000 {
                    with_crit(platform, |c| {
                        if task.retain(c) {
                            retained += 1;
                            task.release(c);
                        }
                    });
                }
                retained
            })
        })
        .collect();

    with_crit(platform, |c| {
        task.kill(c, kill_reason::ABORT);
        task.unhold(c);
    });

    for worker in workers {
        worker.join().unwrap();
    }

    with_crit(platform, |c| {
        assert!(task.is_drained(c));
        assert_eq!(task.retain_count(c), 0);
        assert_eq!(sched.pending_garbage(c), 1);
    });
    assert_eq!(sched.collect_garbage(), 1);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}
