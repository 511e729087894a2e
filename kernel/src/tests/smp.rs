// 测试：多核并发调度
//
// 每个 std 线程扮演一个核心，同时对共享就绪队列调用 dispatch。
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::vec::Vec;

use super::host::{boot, spawn_task, spawn_thread, with_crit, HostPlatform};
use crate::process::kill_reason;
use crate::sched::{global, init};

const CORES: usize = 3;
const ROUNDS: usize = 500;

#[test]
fn a_thread_never_runs_on_two_cores() {
    let (platform, sched) = boot(CORES);
    let (task, _) = spawn_task(sched);
    let threads: Vec<_> = (0..4).map(|i| spawn_thread(platform, &task, i)).collect();
    let max_index = threads.iter().map(|t| t.id().index()).max().unwrap() as usize;
    let running: Arc<Vec<AtomicBool>> =
        Arc::new((0..=max_index).map(|_| AtomicBool::new(false)).collect());

    let cores: Vec<_> = (0..CORES)
        .map(|core| {
            let running = running.clone();
            std::thread::spawn(move || {
                HostPlatform::enter_core(core);
                let mut current: Option<usize> = None;
                let mut dispatched = 0;
                for _ in 0..ROUNDS {
                    // 解绑发生在 dispatch 里，先清掉自己的标记
                    if let Some(index) = current.take() {
                        running[index].store(false, Ordering::SeqCst);
                    }
                    with_crit(platform, |c| {
                        if let Some(thread) = sched.dispatch(c).thread() {
                            let index = thread.id().index() as usize;
                            assert!(
                                !running[index].swap(true, Ordering::SeqCst),
                                "thread {} dispatched on two cores",
                                thread.id()
                            );
                            current = Some(index);
                            dispatched += 1;
                        }
                    });
                }
                dispatched
            })
        })
        .collect();

    let total: usize = cores.into_iter().map(|core| core.join().unwrap()).sum();
    assert!(total > 0);
}

#[test]
fn task_torn_down_once_while_cores_dispatch() {
    let (platform, sched) = boot(CORES);
    let (task, drops) = spawn_task(sched);
    let _threads: Vec<_> = (0..4).map(|i| spawn_thread(platform, &task, i)).collect();

    let cores: Vec<_> = (0..CORES)
        .map(|core| {
            std::thread::spawn(move || {
                HostPlatform::enter_core(core);
                for _ in 0..ROUNDS {
                    with_crit(platform, |c| {
                        sched.dispatch(c);
                    });
                }
            })
        })
        .collect();

    with_crit(platform, |c| {
        task.kill(c, kill_reason::ABORT);
        task.unhold(c);
    });
    for core in cores {
        core.join().unwrap();
    }

    // 每个核心再调度一次，解绑最后运行的线程
    for core in 0..CORES {
        HostPlatform::enter_core(core);
        assert!(with_crit(platform, |c| sched.dispatch(c)).is_idle());
    }
    HostPlatform::enter_core(0);

    with_crit(platform, |c| {
        assert!(task.is_drained(c));
        assert_eq!(sched.pending_garbage(c), 1);
    });
    assert_eq!(sched.collect_garbage(), 1);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
    with_crit(platform, |c| assert_eq!(sched.nr_threads(c), 0));
}

#[test]
fn start_wakes_other_cores() {
    let (platform, sched) = boot(CORES);
    let boot_core = std::thread::spawn(move || {
        HostPlatform::enter_core(1);
        sched.start();
    });
    // 没有线程可运行，启动核心最终停在 wait_timeout
    assert!(boot_core.join().is_err());
    assert_eq!(platform.woken(), [0, 2]);
}

#[test]
fn global_scheduler_initializes_once() {
    let platform: &'static HostPlatform =
        std::boxed::Box::leak(std::boxed::Box::new(HostPlatform::new(2)));
    assert!(global().is_none());

    let scheduler = init(platform).unwrap();
    assert!(core::ptr::eq(scheduler, global().unwrap()));
    assert_eq!(scheduler.quantum(), 10);

    assert_eq!(
        init(platform).err(),
        Some(crate::errno::Errno::DeviceOrResourceBusy)
    );
}
