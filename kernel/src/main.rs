//! Kernel entry: boot protocol, memory bring-up, scheduler start.
//!
//! The heavy machinery lives in the library crates; this binary only
//! sequences initialization: read the limine responses, seed the buddy
//! allocator, wire the platform services, register the program
//! registry, and hand the boot CPU to the scheduler. Interrupt
//! controller and device bring-up are external collaborators that hook
//! the seams registered here.

#![no_std]
#![no_main]
#![allow(unsafe_op_in_unsafe_fn)]

use core::arch::asm;
use core::panic::PanicInfo;
use core::sync::atomic::{AtomicU64, Ordering};

use limine::BaseRevision;
use limine::request::{FramebufferRequest, HhdmRequest, MemoryMapRequest};
use yula_abi::input::{KeyEvent, MouseState};
use yula_abi::task::Priority;
use yula_abi::{PhysAddr, VirtAddr};
use yula_lib::kernel_services::platform::{FramebufferInfo, PlatformServices, register_platform};
use yula_lib::{klog_error, klog_info};

#[used]
#[unsafe(link_section = ".limine_requests_start_marker")]
static LIMINE_REQUESTS_START_MARKER: [u64; 1] = [0];

#[used]
#[unsafe(link_section = ".limine_requests")]
static BASE_REVISION: BaseRevision = BaseRevision::new();

#[used]
#[unsafe(link_section = ".limine_requests")]
static HHDM_REQUEST: HhdmRequest = HhdmRequest::new();

#[used]
#[unsafe(link_section = ".limine_requests")]
static MEMMAP_REQUEST: MemoryMapRequest = MemoryMapRequest::new();

#[used]
#[unsafe(link_section = ".limine_requests")]
static FRAMEBUFFER_REQUEST: FramebufferRequest = FramebufferRequest::new();

#[used]
#[unsafe(link_section = ".limine_requests_end_marker")]
static LIMINE_REQUESTS_END_MARKER: [u64; 1] = [0];

unsafe extern "C" {
    static _kernel_end: u8;
}

// --- platform service backing (filled during boot) ---

static FB_INFO: AtomicU64 = AtomicU64::new(0); // packed (w:16|h:16|pitch:16|bpp:16)
static FB_PHYS: AtomicU64 = AtomicU64::new(0);
static FB_VIRT: AtomicU64 = AtomicU64::new(0);

fn timer_frequency() -> u32 {
    // The external timer bring-up programs 1 kHz and drives
    // `scheduler_timer_tick` from its interrupt handler.
    1000
}

fn framebuffer_info() -> Option<FramebufferInfo> {
    let packed = FB_INFO.load(Ordering::Acquire);
    if packed == 0 {
        return None;
    }
    Some(FramebufferInfo {
        base: FB_PHYS.load(Ordering::Acquire),
        width: (packed >> 48) as u32,
        height: ((packed >> 32) & 0xFFFF) as u32,
        pitch: ((packed >> 16) & 0xFFFF) as u32,
        bytes_per_pixel: (packed & 0xFFFF) as u32,
    })
}

fn framebuffer_base() -> VirtAddr {
    VirtAddr::try_new(FB_VIRT.load(Ordering::Acquire)).unwrap_or(VirtAddr::NULL)
}

fn kbd_pop_byte() -> i32 {
    -1 // keyboard driver registers its own table when present
}

fn poll_key_event(_out: &mut KeyEvent) -> bool {
    false
}

fn poll_mouse_state(_out: &mut MouseState) -> bool {
    false
}

static PLATFORM_TABLE: PlatformServices = PlatformServices {
    timer_frequency,
    framebuffer_info,
    framebuffer_base,
    kbd_pop_byte,
    poll_key_event,
    poll_mouse_state,
};

fn read_cr3() -> u64 {
    let value: u64;
    unsafe {
        asm!("mov {}, cr3", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    value & !0xFFF
}

fn init_memory() {
    let hhdm = HHDM_REQUEST
        .get_response()
        .expect("limine: no HHDM response");
    yula_mm::hhdm::hhdm_init(hhdm.offset());

    yula_mm::paging::set_kernel_root(PhysAddr::new(read_cr3()));

    let memmap = MEMMAP_REQUEST
        .get_response()
        .expect("limine: no memory map");

    let mut highest_usable = 0u64;
    for entry in memmap.entries() {
        if entry.entry_type == limine::memory_map::EntryType::USABLE {
            highest_usable = highest_usable.max(entry.base + entry.length);
        }
    }

    // SAFETY: the linker script provides `_kernel_end` at the end of the
    // image.
    let kernel_end_virt = (&raw const _kernel_end) as u64;
    let kernel_end_phys = kernel_end_virt.saturating_sub(hhdm.offset());
    yula_mm::pmm_init(highest_usable, PhysAddr::new(kernel_end_phys));
}

fn init_framebuffer() {
    let Some(response) = FRAMEBUFFER_REQUEST.get_response() else {
        klog_info!("boot: no framebuffer");
        return;
    };
    let Some(fb) = response.framebuffers().next() else {
        return;
    };

    let bpp = (fb.bpp() as u32 / 8).max(1);
    let pitch_px = fb.pitch() as u32 / bpp;
    let packed = ((fb.width() as u64 & 0xFFFF) << 48)
        | ((fb.height() as u64 & 0xFFFF) << 32)
        | ((pitch_px as u64 & 0xFFFF) << 16)
        | (bpp as u64 & 0xFFFF);

    let virt = fb.addr() as u64;
    let hhdm_offset = yula_mm::hhdm::hhdm_offset();
    FB_VIRT.store(virt, Ordering::Release);
    FB_PHYS.store(virt.saturating_sub(hhdm_offset), Ordering::Release);
    FB_INFO.store(packed, Ordering::Release);

    klog_info!(
        "boot: framebuffer {}x{} pitch {} bpp {}",
        fb.width(),
        fb.height(),
        pitch_px,
        bpp * 8
    );
}

extern "C" fn init_task(_arg: u64) {
    // The display stack: compositor first, then the window manager.
    if yula_userland::syscall::process::spawn_process(b"/bin/compositor", 0, 0) < 0 {
        klog_error!("init: compositor failed to spawn");
    }
    yula_core::sched::sleep::sleep_current_ms(50);
    if yula_userland::syscall::process::spawn_process(b"/bin/wm", 0, 0) < 0 {
        klog_error!("init: wm failed to spawn");
    }

    // Reap whatever becomes a zombie under us.
    loop {
        let mut status = 0i32;
        let _ = yula_core::sched::waitpid(-1, &mut status);
        yula_core::sched::sleep::sleep_current_ms(100);
    }
}

#[cfg(feature = "builtin-tests")]
extern "C" fn test_task(_arg: u64) {
    yula_tests::run_all_suites();
    yula_core::sched::exit_current(0);
}

#[unsafe(no_mangle)]
unsafe extern "C" fn kmain() -> ! {
    klog_info!("yulaos: booting");

    assert!(BASE_REVISION.is_supported());

    init_memory();
    init_framebuffer();
    register_platform(&PLATFORM_TABLE);

    yula_userland::program_registry::program_registry_init();
    yula_core::scheduler_init();

    if yula_core::sched::spawn_kthread("init", Priority::Normal, init_task, 0).is_none() {
        klog_error!("boot: could not start init");
    }

    #[cfg(feature = "builtin-tests")]
    if yula_core::sched::spawn_kthread("tests", Priority::Low, test_task, 0).is_none() {
        klog_error!("boot: could not start test task");
    }

    yula_core::sched::scheduler::enter_scheduler();
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    klog_error!("KERNEL PANIC: {}", info);
    loop {
        yula_lib::cpu::disable_interrupts();
        yula_lib::cpu::halt();
    }
}
