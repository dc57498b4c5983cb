//! Exercises the kernel core end to end: boot, fork a child, contend a
//! lock across the two, and drive the resulting block/redeliver cycle by
//! hand the way a real trap loop would.

use teachkernel::boot::{kernel_start, KernelImage};
use teachkernel::config::KernelConfig;
use teachkernel::context::UserContext;
use teachkernel::loader::StubLoader;
use teachkernel::platform::sim::SimPlatform;
use teachkernel::syscall;

fn main() {
    env_logger::init();

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
    let mut kernel = kernel_start(platform, loader, config, image, "init", &[], &mut uctx)
        .expect("bootstrap");

    let init_pid = kernel.running_pid().unwrap();
    log::info!("init running as pid {init_pid}");

    let out_ptr = KernelConfig::default().page_size; // page 0 is R|X text; page 1 is R|W data
    uctx.code = syscall::PIPE_INIT;
    uctx.regs[0] = out_ptr as i64;
    kernel.handle_syscall(&mut uctx);
    let pipe_id = i32::from_le_bytes(
        kernel
            .copy_in_user(kernel.running_pid().unwrap(), out_ptr, 4)
            .expect("read pipe id")
            .try_into()
            .unwrap(),
    ) as u32;
    log::info!("created pipe {pipe_id:#x}");

    uctx.code = syscall::LOCK_INIT;
    uctx.regs[0] = (out_ptr + 64) as i64;
    kernel.handle_syscall(&mut uctx);
    let lock_id = i32::from_le_bytes(
        kernel
            .copy_in_user(kernel.running_pid().unwrap(), out_ptr + 64, 4)
            .expect("read lock id")
            .try_into()
            .unwrap(),
    ) as u32;

    uctx.code = syscall::LOCK_ACQUIRE;
    uctx.regs[0] = lock_id as i64;
    kernel.handle_syscall(&mut uctx);
    log::info!("init holds lock {lock_id:#x}");

    uctx.code = syscall::FORK;
    kernel.handle_syscall(&mut uctx);
    let child_pid = uctx.regs[0] as u32;
    log::info!("forked child {child_pid}");
    kernel.pcb_mut(child_pid).unwrap().resource_list.push(lock_id);

    // Let the child run and contend for the lock init is still holding; it
    // parks on the lock-wait queue and yields the CPU.
    kernel.scheduler.running = Some(child_pid);
    let mut child_ctx = kernel.pcb(child_pid).unwrap().user_ctx;
    child_ctx.code = syscall::LOCK_ACQUIRE;
    child_ctx.regs[0] = lock_id as i64;
    kernel.handle_syscall(&mut child_ctx);
    log::info!("child {child_pid} blocked; running = {:?}", kernel.running_pid());

    // init releases, which wakes the child onto the ready queue.
    kernel.scheduler.running = Some(init_pid);
    let mut init_ctx = kernel.pcb(init_pid).unwrap().user_ctx;
    init_ctx.code = syscall::LOCK_RELEASE;
    init_ctx.regs[0] = lock_id as i64;
    kernel.handle_syscall(&mut init_ctx);
    log::info!("init released the lock");

    // A real trap loop would notice the child is ready and re-deliver its
    // last trap; redeliver replays the same LOCK_ACQUIRE from scratch.
    kernel.scheduler.running = Some(child_pid);
    kernel.redeliver(child_pid).expect("redeliver child");
    log::info!(
        "child {child_pid} acquired the lock on redelivery, rc = {}",
        kernel.pcb(child_pid).unwrap().user_ctx.regs[0]
    );

    // `uctx` above is stale (last written at the FORK trap); a real trap
    // loop always hands the clock handler the currently-running process's
    // own saved frame, not whatever local last held it.
    uctx = kernel.pcb(kernel.running_pid().unwrap()).unwrap().user_ctx;
    for tick in 0..4 {
        log::info!("clock tick {tick}, running = {:?}", kernel.running_pid());
        kernel.handle_trap(teachkernel::TrapKind::Clock, &mut uctx);
    }

    log::info!("demo complete; {} process(es) remain", kernel.pcbs.len());
}
