//! Bootstrap: build a `Kernel`, carve out the identity-mapped kernel
//! image, create idle and init, and load init's executable.

use crate::config::KernelConfig;
use crate::context::UserContext;
use crate::error::{KResult, KernelError};
use crate::kernel::Kernel;
use crate::loader::Loader;
use crate::pagetable::Prot;
use crate::pcb::Pid;
use crate::platform::Platform;

/// Identity-mapped kernel image shape, in pages, used to pre-reserve the
/// frames backing the kernel's own text/data/heap before any process is
/// created.
pub struct KernelImage {
    pub text_pages: usize,
    pub data_pages: usize,
    pub heap_pages: usize,
}

/// `kernel_start(argv, pmem, uctx)`. `init_path` is `argv[0]` (or a
/// caller-supplied default); `uctx` receives init's context so the trap
/// epilogue resumes it.
pub fn kernel_start<P: Platform, L: Loader>(
    platform: P,
    loader: L,
    config: KernelConfig,
    image: KernelImage,
    init_path: &str,
    init_argv: &[String],
    uctx: &mut UserContext,
) -> KResult<Kernel<P, L>> {
    let mut kernel = Kernel::new(config, platform, loader);

    identity_map_kernel_image(&mut kernel, &image)?;

    let idle_pid: Pid = kernel.process_create_idle("idle");
    reserve_idle_resources(&mut kernel, idle_pid)?;

    let init_pid = kernel.process_create("init")?;
    kernel.kc_copy(init_pid);

    let region1_pages = kernel.config.region1_pages;
    let page_size = kernel.config.page_size;
    let loaded = kernel
        .loader
        .load(init_path, init_argv, &mut kernel.frames, region1_pages, page_size)
        .map_err(|_| KernelError::NoSuchResource)?;
    {
        let init = kernel.require_pcb_mut(init_pid)?;
        init.region1_pt = loaded.region1;
        init.text_end = loaded.text_end;
        init.data_end = loaded.data_end;
        init.brk = loaded.brk;
        init.user_ctx.pc = loaded.entry_pc;
        init.user_ctx.sp = loaded.initial_sp;
    }

    kernel.platform.install_kernel_stack_table(&kernel.kernel_stack_master);
    let region1_pt = kernel.require_pcb(init_pid)?.region1_pt.clone();
    kernel.platform.install_region1_table(&region1_pt);
    kernel.platform.enable_virtual_memory();

    kernel.scheduler.idle = idle_pid;
    kernel.scheduler.running = Some(init_pid);

    *uctx = kernel.require_pcb(init_pid)?.user_ctx;
    Ok(kernel)
}

/// Map the kernel's own text (RX), data (RW), and heap (RW) pages into the
/// master kernel-stack page table using identity page/frame numbers,
/// marking those frames as in use so the process frame allocator never
/// hands them out.
fn identity_map_kernel_image<P: Platform, L: Loader>(kernel: &mut Kernel<P, L>, image: &KernelImage) -> KResult<()> {
    let mut page = 0usize;
    for _ in 0..image.text_pages {
        reserve_identity_page(kernel, page, Prot::R | Prot::X)?;
        page += 1;
    }
    for _ in 0..image.data_pages + image.heap_pages {
        reserve_identity_page(kernel, page, Prot::R | Prot::W)?;
        page += 1;
    }
    Ok(())
}

fn reserve_identity_page<P: Platform, L: Loader>(kernel: &mut Kernel<P, L>, page: usize, prot: Prot) -> KResult<()> {
    kernel.frames.set(page);
    if page < kernel.kernel_stack_master.len() {
        kernel.kernel_stack_master.set(page, prot, page)?;
    }
    Ok(())
}

/// Reserve idle's kernel-stack frames and one region-1 stack frame, then
/// point its user context at the in-kernel idle loop.
fn reserve_idle_resources<P: Platform, L: Loader>(kernel: &mut Kernel<P, L>, idle_pid: Pid) -> KResult<()> {
    let kernel_stack_pages = kernel.config.kernel_stack_pages;
    for page in 0..kernel_stack_pages {
        let frame = kernel.frames.find_and_set().map_err(crate::error::FrameErrorWrap)?;
        kernel
            .require_pcb_mut(idle_pid)?
            .kernel_stack_pt
            .set(page, Prot::R | Prot::W, frame)?;
    }

    let region1_pages = kernel.config.region1_pages;
    let stack_page = region1_pages - 1;
    let stack_frame = kernel.frames.find_and_set().map_err(crate::error::FrameErrorWrap)?;
    let page_size = kernel.config.page_size;
    let idle = kernel.require_pcb_mut(idle_pid)?;
    idle.region1_pt.set(stack_page, Prot::R | Prot::W, stack_frame)?;
    idle.user_ctx.sp = (stack_page + 1) * page_size;
    idle.user_ctx.pc = 0; // the idle loop is a fixed address inside kernel text, not user code
    Ok(())
}
