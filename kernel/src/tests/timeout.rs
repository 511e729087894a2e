// 测试：截止时间与定时器
use super::host::{boot, spawn_task, spawn_thread, with_crit, HostPlatform, TimerEvent};
use crate::sched::{Scheduler, ThreadId};

fn next(platform: &HostPlatform, sched: &Scheduler) -> Option<ThreadId> {
    with_crit(platform, |c| sched.dispatch(c).thread().map(|t| t.id()))
}

fn timer(delay: u64, precise: bool) -> Option<TimerEvent> {
    Some(TimerEvent::Set { core: 0, delay, precise })
}

#[test]
fn sleeping_threads_wait_for_their_deadline() {
    let (platform, sched) = boot(1);
    let (task, _) = spawn_task(sched);
    let a = spawn_thread(platform, &task, 1);
    let b = spawn_thread(platform, &task, 2);
    platform.set_time(100);

    assert_eq!(next(platform, sched), Some(a.id()));
    with_crit(platform, |c| sched.set_timeout(c, 500, true));
    assert_eq!(platform.save_and_tick_calls(), 1);

    assert_eq!(next(platform, sched), Some(b.id()));
    with_crit(platform, |c| sched.set_timeout(c, 300, false));

    // 两个都在睡眠，按最早的截止时间设置定时器
    assert!(with_crit(platform, |c| sched.dispatch(c)).is_idle());
    assert_eq!(platform.last_timer(), timer(200, false));

    platform.set_time(299);
    assert_eq!(next(platform, sched), None);
    assert_eq!(platform.last_timer(), timer(1, false));

    platform.set_time(300);
    assert_eq!(next(platform, sched), Some(b.id()));
    with_crit(platform, |c| assert_eq!(sched.next_tick(c, &b), Some(0)));
    assert_eq!(platform.last_timer(), timer(sched.quantum(), true));

    platform.set_time(600);
    assert_eq!(next(platform, sched), Some(a.id()));
}

#[test]
fn near_deadline_shortens_the_quantum() {
    let (platform, sched) = boot(1);
    let (task, _) = spawn_task(sched);
    let a = spawn_thread(platform, &task, 1);
    let b = spawn_thread(platform, &task, 2);
    platform.set_time(100);

    assert_eq!(next(platform, sched), Some(a.id()));
    with_crit(platform, |c| sched.set_timeout(c, 105, false));
    assert_eq!(next(platform, sched), Some(b.id()));

    // a 的截止时间落在 b 的时间片之内
    assert_eq!(next(platform, sched), Some(b.id()));
    assert_eq!(platform.last_timer(), timer(5, false));
}

#[test]
fn infinite_timeout_until_cleared() {
    let (platform, sched) = boot(1);
    let (task, _) = spawn_task(sched);
    let a = spawn_thread(platform, &task, 1);

    assert_eq!(next(platform, sched), Some(a.id()));
    with_crit(platform, |c| sched.set_infinite_timeout(c));
    with_crit(platform, |c| assert_eq!(sched.next_tick(c, &a), Some(u64::MAX)));

    // 没有任何可等的截止时间
    assert_eq!(next(platform, sched), None);
    assert_eq!(platform.last_timer(), Some(TimerEvent::Cleared { core: 0 }));

    platform.set_time(1_000_000);
    assert_eq!(next(platform, sched), None);

    assert!(with_crit(platform, |c| sched.clear_timeout(c, &a)));
    assert_eq!(next(platform, sched), Some(a.id()));
    assert!(!with_crit(platform, |c| sched.clear_timeout(c, &a)));
}

#[test]
fn clear_timeout_without_deadline_is_false() {
    let (platform, sched) = boot(1);
    let (task, _) = spawn_task(sched);
    let a = spawn_thread(platform, &task, 1);
    assert!(!with_crit(platform, |c| sched.clear_timeout(c, &a)));
}

#[test]
#[should_panic(expected = "with no thread bound to core 0")]
fn set_timeout_without_current_thread_is_fatal() {
    let (platform, sched) = boot(1);
    with_crit(platform, |c| sched.set_timeout(c, 10, true));
}
