//! Integration scenarios driving the kernel core end to end: scheduling,
//! synchronization, and IPC.
//!
//! Each blocking syscall in this crate is a restartable precondition check
//! (see `Blocking` in `error.rs`): once a test blocks a process, it must
//! simulate the same kernel trap landing again by calling `redeliver` (or,
//! for `delay`, just letting the clock ticks run out) before checking the
//! result.

use teachkernel::boot::{kernel_start, KernelImage};
use teachkernel::config::KernelConfig;
use teachkernel::context::UserContext;
use teachkernel::error::KernelError;
use teachkernel::loader::StubLoader;
use teachkernel::platform::sim::SimPlatform;
use teachkernel::{syscall, Kernel, Pid, TrapKind};

fn boot() -> (Kernel<SimPlatform, StubLoader>, UserContext) {
    let config = KernelConfig::default();
    let platform = SimPlatform::new();
    let mut loader = StubLoader::new();
    loader.register("init", 2);

    let image = KernelImage {
        text_pages: 4,
        data_pages: 4,
        heap_pages: 8,
    };

    let mut uctx = UserContext::default();
    let kernel = kernel_start(platform, loader, config, image, "init", &[], &mut uctx).expect("bootstrap");
    (kernel, uctx)
}

/// Run `code` with `args` as `pid` and return its ABI result, mirroring how
/// a hardware trap would land with that process already scheduled.
fn run_as(kernel: &mut Kernel<SimPlatform, StubLoader>, pid: Pid, code: i64, args: [i64; 4]) -> i64 {
    kernel.scheduler.running = Some(pid);
    let mut uctx = kernel.pcb(pid).unwrap().user_ctx;
    uctx.code = code;
    uctx.regs = args;
    kernel.handle_syscall(&mut uctx);
    // A blocked call leaves `uctx` holding whatever dispatch switched to,
    // not `pid`'s own trapframe (already saved by `block_and_dispatch`);
    // only a call that actually completed belongs written back here.
    if kernel.scheduler.running == Some(pid) {
        kernel.pcb_mut(pid).unwrap().user_ctx = uctx;
    }
    uctx.regs[0]
}

fn read_u32(kernel: &Kernel<SimPlatform, StubLoader>, pid: Pid, addr: usize) -> u32 {
    u32::from_le_bytes(kernel.copy_in_user(pid, addr, 4).unwrap().try_into().unwrap())
}

const OUT_PTR: usize = 4096; // page 0 is R|X text; page 1 is R|W data.

#[test]
fn fork_and_round_robin_scheduling() {
    let (mut kernel, mut uctx) = boot();
    let init = kernel.running_pid().unwrap();

    let child1 = run_as(&mut kernel, init, syscall::FORK, [0; 4]) as Pid;
    let child2 = run_as(&mut kernel, init, syscall::FORK, [0; 4]) as Pid;
    assert_ne!(child1, child2);

    // init is still `running`; child1 and child2 sit on ready in fork order.
    uctx = kernel.pcb(init).unwrap().user_ctx;
    kernel.handle_trap(TrapKind::Clock, &mut uctx);
    assert_eq!(kernel.running_pid(), Some(child1));
    kernel.handle_trap(TrapKind::Clock, &mut uctx);
    assert_eq!(kernel.running_pid(), Some(child2));
    kernel.handle_trap(TrapKind::Clock, &mut uctx);
    assert_eq!(kernel.running_pid(), Some(init));
}

#[test]
fn lock_blocks_and_redelivers_on_release() {
    let (mut kernel, _uctx) = boot();
    let init = kernel.running_pid().unwrap();

    run_as(&mut kernel, init, syscall::LOCK_INIT, [OUT_PTR as i64, 0, 0, 0]);
    let lock_id = read_u32(&kernel, init, OUT_PTR);

    let rc = run_as(&mut kernel, init, syscall::LOCK_ACQUIRE, [lock_id as i64, 0, 0, 0]);
    assert_eq!(rc, 0);

    let child = run_as(&mut kernel, init, syscall::FORK, [0; 4]) as Pid;
    kernel.pcb_mut(child).unwrap().resource_list.push(lock_id);

    // Child contends for the lock init still holds; it parks on LockWait.
    kernel.scheduler.running = Some(child);
    let mut child_ctx = kernel.pcb(child).unwrap().user_ctx;
    child_ctx.code = syscall::LOCK_ACQUIRE;
    child_ctx.regs[0] = lock_id as i64;
    kernel.handle_syscall(&mut child_ctx);
    assert!(kernel.scheduler.contains(teachkernel::scheduler::QueueName::LockWait, child));

    // init releases; update_lock moves child to ready.
    let rc = run_as(&mut kernel, init, syscall::LOCK_RELEASE, [lock_id as i64, 0, 0, 0]);
    assert_eq!(rc, 0);
    assert!(kernel.scheduler.contains(teachkernel::scheduler::QueueName::Ready, child));

    // The driver notices child is ready with a pending syscall and
    // re-delivers it; this time acquire succeeds.
    kernel.scheduler.running = Some(child);
    kernel.redeliver(child).unwrap();
    assert_eq!(kernel.pcb(child).unwrap().user_ctx.regs[0], 0);
}

#[test]
fn pipe_producer_consumer_round_trip() {
    let (mut kernel, _uctx) = boot();
    let init = kernel.running_pid().unwrap();

    run_as(&mut kernel, init, syscall::PIPE_INIT, [OUT_PTR as i64, 0, 0, 0]);
    let pipe_id = read_u32(&kernel, init, OUT_PTR);

    let msg = b"hello";
    kernel.copy_out_user(init, OUT_PTR + 64, msg).unwrap();
    let rc = run_as(
        &mut kernel,
        init,
        syscall::PIPE_WRITE,
        [pipe_id as i64, (OUT_PTR + 64) as i64, msg.len() as i64, 0],
    );
    assert_eq!(rc, msg.len() as i64);

    let rc = run_as(
        &mut kernel,
        init,
        syscall::PIPE_READ,
        [pipe_id as i64, (OUT_PTR + 128) as i64, 16, 0],
    );
    assert_eq!(rc, msg.len() as i64);
    let read_back = kernel.copy_in_user(init, OUT_PTR + 128, msg.len()).unwrap();
    assert_eq!(read_back, msg);
}

#[test]
fn pipe_read_blocks_until_data_arrives() {
    let (mut kernel, _uctx) = boot();
    let init = kernel.running_pid().unwrap();

    run_as(&mut kernel, init, syscall::PIPE_INIT, [OUT_PTR as i64, 0, 0, 0]);
    let pipe_id = read_u32(&kernel, init, OUT_PTR);

    let child = run_as(&mut kernel, init, syscall::FORK, [0; 4]) as Pid;
    kernel.pcb_mut(child).unwrap().resource_list.push(pipe_id);

    kernel.scheduler.running = Some(child);
    let mut child_ctx = kernel.pcb(child).unwrap().user_ctx;
    child_ctx.code = syscall::PIPE_READ;
    child_ctx.regs = [pipe_id as i64, (OUT_PTR + 64) as i64, 4, 0];
    kernel.handle_syscall(&mut child_ctx);
    assert!(kernel.scheduler.contains(teachkernel::scheduler::QueueName::PipeReadWait, child));

    kernel.copy_out_user(init, OUT_PTR + 128, b"ab").unwrap();
    run_as(&mut kernel, init, syscall::PIPE_WRITE, [pipe_id as i64, (OUT_PTR + 128) as i64, 2, 0]);
    assert!(kernel.scheduler.contains(teachkernel::scheduler::QueueName::Ready, child));

    kernel.scheduler.running = Some(child);
    kernel.redeliver(child).unwrap();
    assert_eq!(kernel.pcb(child).unwrap().user_ctx.regs[0], 2);
}

#[test]
fn wait_reaps_terminated_child() {
    let (mut kernel, _uctx) = boot();
    let init = kernel.running_pid().unwrap();
    let child = run_as(&mut kernel, init, syscall::FORK, [0; 4]) as Pid;

    kernel.scheduler.running = Some(child);
    let mut child_ctx = kernel.pcb(child).unwrap().user_ctx;
    kernel.sys_exit(&mut child_ctx, 7);

    let rc = run_as(&mut kernel, init, syscall::WAIT, [OUT_PTR as i64, 0, 0, 0]);
    assert_eq!(rc, child as i64);
    let status = i32::from_le_bytes(kernel.copy_in_user(init, OUT_PTR, 4).unwrap().try_into().unwrap());
    assert_eq!(status, 7);
    assert!(kernel.pcb(child).is_none());
}

#[test]
fn wait_blocks_until_child_exits() {
    let (mut kernel, _uctx) = boot();
    let init = kernel.running_pid().unwrap();
    let child = run_as(&mut kernel, init, syscall::FORK, [0; 4]) as Pid;

    kernel.scheduler.running = Some(init);
    let mut init_ctx = kernel.pcb(init).unwrap().user_ctx;
    init_ctx.code = syscall::WAIT;
    init_ctx.regs[0] = OUT_PTR as i64;
    kernel.handle_syscall(&mut init_ctx);
    assert!(kernel.scheduler.contains(teachkernel::scheduler::QueueName::WaitForChild, init));
    assert_ne!(kernel.running_pid(), Some(init));

    kernel.scheduler.running = Some(child);
    let mut child_ctx = kernel.pcb(child).unwrap().user_ctx;
    kernel.sys_exit(&mut child_ctx, 3);
    assert!(kernel.scheduler.contains(teachkernel::scheduler::QueueName::Ready, init));

    kernel.scheduler.running = Some(init);
    kernel.redeliver(init).unwrap();
    assert_eq!(kernel.pcb(init).unwrap().user_ctx.regs[0], child as i64);
}

#[test]
fn orphaned_grandchild_is_reaped_on_parent_exit() {
    let (mut kernel, _uctx) = boot();
    let init = kernel.running_pid().unwrap();
    let child = run_as(&mut kernel, init, syscall::FORK, [0; 4]) as Pid;

    kernel.scheduler.running = Some(child);
    let grandchild = run_as(&mut kernel, child, syscall::FORK, [0; 4]) as Pid;

    kernel.scheduler.running = Some(grandchild);
    let mut gc_ctx = kernel.pcb(grandchild).unwrap().user_ctx;
    kernel.sys_exit(&mut gc_ctx, 0);
    assert!(kernel.pcb(grandchild).is_some());

    kernel.scheduler.running = Some(child);
    let mut child_ctx = kernel.pcb(child).unwrap().user_ctx;
    kernel.sys_exit(&mut child_ctx, 0);

    // Nobody will ever `wait` for grandchild now that its parent is gone.
    assert!(kernel.pcb(grandchild).is_none());
}

#[test]
fn delay_wakes_after_requested_ticks() {
    let (mut kernel, _uctx) = boot();
    let init = kernel.running_pid().unwrap();

    kernel.scheduler.running = Some(init);
    let mut uctx = kernel.pcb(init).unwrap().user_ctx;
    uctx.code = syscall::DELAY;
    uctx.regs[0] = 3;
    kernel.handle_syscall(&mut uctx);
    assert_ne!(kernel.running_pid(), Some(init));

    kernel.handle_trap(TrapKind::Clock, &mut uctx);
    kernel.handle_trap(TrapKind::Clock, &mut uctx);
    assert!(!kernel.scheduler.contains(teachkernel::scheduler::QueueName::Ready, init));
    kernel.handle_trap(TrapKind::Clock, &mut uctx);
    // The third tick's dispatch may have already handed the CPU to init.
    let resumed = kernel.running_pid() == Some(init) || kernel.scheduler.contains(teachkernel::scheduler::QueueName::Ready, init);
    assert!(resumed);
    assert_eq!(kernel.pcb(init).unwrap().user_ctx.regs[0], 0);
}

#[test]
fn brk_grows_and_shrinks_across_a_page_boundary() {
    let (mut kernel, _uctx) = boot();
    let init = kernel.running_pid().unwrap();
    let page_size = KernelConfig::default().page_size;
    let data_end = kernel.pcb(init).unwrap().data_end;

    let rc = run_as(&mut kernel, init, syscall::BRK, [(data_end + page_size + 16) as i64, 0, 0, 0]);
    assert_eq!(rc, 0);
    assert_eq!(kernel.pcb(init).unwrap().brk, kernel.config.page_round_up(data_end + page_size + 16));

    let rc = run_as(&mut kernel, init, syscall::BRK, [(data_end + 1) as i64, 0, 0, 0]);
    assert_eq!(rc, 0);
    assert_eq!(kernel.pcb(init).unwrap().brk, kernel.config.page_round_up(data_end + 1));
}

#[test]
fn reclaim_requires_ownership() {
    let (mut kernel, _uctx) = boot();
    let init = kernel.running_pid().unwrap();
    run_as(&mut kernel, init, syscall::LOCK_INIT, [OUT_PTR as i64, 0, 0, 0]);
    let lock_id = read_u32(&kernel, init, OUT_PTR);

    let other = run_as(&mut kernel, init, syscall::FORK, [0; 4]) as Pid;
    let rc = run_as(&mut kernel, other, syscall::RECLAIM, [lock_id as i64, 0, 0, 0]);
    assert_eq!(rc, -1);

    let rc = run_as(&mut kernel, init, syscall::RECLAIM, [lock_id as i64, 0, 0, 0]);
    assert_eq!(rc, 0);
    assert!(kernel.sys_lock_release(lock_id).is_err());
}

#[test]
fn wait_with_no_children_errors() {
    let (mut kernel, _uctx) = boot();
    let init = kernel.running_pid().unwrap();
    let result = kernel.sys_wait(&mut kernel.pcb(init).unwrap().user_ctx.clone(), OUT_PTR);
    assert!(matches!(result, Err(KernelError::NoChildren)));
}
