//! Slab allocator (C5, §4.4).
//!
//! Fixed-size-class allocator over pages obtained from the linear+physical
//! managers, carved into equal objects with an intrusive free-list exactly
//! as §4.4 describes. The page *source* is injected as a pair of function
//! pointers rather than hard-wired to `memory::page`/`memory::linear`
//! directly (§9 Design Notes style: small, explicit state rather than a
//! trait-object hierarchy for something with one real implementation): the
//! kernel wiring at the bottom of this file supplies the real one, and
//! `#[cfg(test)]` supplies a `std`-backed one so the free-list bookkeeping
//! itself is exercised on the host without a real MMU (§0.4).

use core::mem::size_of;
use core::ptr::NonNull;

use spin::Mutex;

use crate::config::{PAGE_SIZE, SLAB_SIZE_CLASSES};
use crate::error::{KResult, KernelError};

const NUM_CLASSES: usize = SLAB_SIZE_CLASSES.len();
const MAX_SLABS_PER_CLASS: usize = 64;
const RAW_FLAG: u32 = 0x8000_0000;

/// Four-byte header prefixed to every returned object so `free` needs only
/// the pointer, never the original size — matches the field's minimum
/// alignment (`SLAB_MIN_ALIGN == size_of::<usize>()`) on a 32-bit target.
#[repr(C)]
struct Header {
    tag: u32,
}

const HEADER_SIZE: usize = size_of::<Header>();

struct FreeNode {
    next: Option<NonNull<FreeNode>>,
}

struct SlabPage {
    base: NonNull<u8>,
    order: u32,
    object_size: u16,
    free: Option<NonNull<FreeNode>>,
    free_count: u16,
    total_count: u16,
}

struct SlabClass {
    object_size: u16,
    pages: heapless::Vec<SlabPage, MAX_SLABS_PER_CLASS>,
}

impl SlabClass {
    const fn new(object_size: u16) -> Self {
        SlabClass { object_size, pages: heapless::Vec::new() }
    }
}

pub struct SlabAllocator {
    alloc_pages: fn(u32) -> KResult<NonNull<u8>>,
    free_pages: fn(NonNull<u8>, u32),
    classes: [SlabClass; NUM_CLASSES],
}

unsafe impl Send for SlabAllocator {}

fn class_order_for(bytes: usize) -> u32 {
    let mut order: u32 = 0;
    while (PAGE_SIZE as usize) << order < bytes {
        order += 1;
    }
    order
}

impl SlabAllocator {
    pub fn new(alloc_pages: fn(u32) -> KResult<NonNull<u8>>, free_pages: fn(NonNull<u8>, u32)) -> Self {
        let mut classes: [SlabClass; NUM_CLASSES] = core::array::from_fn(|_| SlabClass::new(0));
        for (i, size) in SLAB_SIZE_CLASSES.iter().enumerate() {
            classes[i] = SlabClass::new(*size);
        }
        SlabAllocator { alloc_pages, free_pages, classes }
    }

    fn class_index_for(&self, total: usize) -> Option<usize> {
        self.classes.iter().position(|c| total <= c.object_size as usize)
    }

    /// Carves a fresh page (or power-of-two run of pages for an
    /// unusually large size class — not used by the default classes, but
    /// kept general) into `object_size`-sized objects linked into one
    /// intrusive free-list.
    fn grow(&mut self, class_idx: usize) -> KResult<()> {
        let object_size = self.classes[class_idx].object_size as usize;
        let page = (self.alloc_pages)(0)?;
        let total_count = (PAGE_SIZE as usize / object_size) as u16;

        let mut head: Option<NonNull<FreeNode>> = None;
        for i in (0..total_count).rev() {
            let obj_ptr = unsafe { page.as_ptr().add(i as usize * object_size) } as *mut FreeNode;
            unsafe { (*obj_ptr).next = head };
            head = NonNull::new(obj_ptr);
        }

        let slab = SlabPage { base: page, order: 0, object_size: object_size as u16, free: head, free_count: total_count, total_count };
        self.classes[class_idx].pages.push(slab).map_err(|_| KernelError::Exhausted)?;
        Ok(())
    }

    pub fn allocate(&mut self, requested: usize) -> KResult<NonNull<u8>> {
        if requested == 0 {
            return Err(KernelError::InvalidArgument("zero-sized allocation"));
        }
        let total = requested + HEADER_SIZE;

        if let Some(class_idx) = self.class_index_for(total) {
            if !self.classes[class_idx].pages.iter().any(|p| p.free_count > 0) {
                self.grow(class_idx)?;
            }
            let class = &mut self.classes[class_idx];
            let slab = class.pages.iter_mut().find(|p| p.free_count > 0).expect("just grew");
            let node = slab.free.take().expect("free_count > 0 implies a free node");
            slab.free = unsafe { (*node.as_ptr()).next };
            slab.free_count -= 1;

            let header = node.as_ptr() as *mut Header;
            unsafe { (*header).tag = class_idx as u32 };
            let object = unsafe { (node.as_ptr() as *mut u8).add(HEADER_SIZE) };
            Ok(NonNull::new(object).expect("non-null free-list node"))
        } else {
            let order = class_order_for(total);
            let page = (self.alloc_pages)(order)?;
            let header = page.as_ptr() as *mut Header;
            unsafe { (*header).tag = RAW_FLAG | order };
            let object = unsafe { page.as_ptr().add(HEADER_SIZE) };
            Ok(NonNull::new(object).expect("non-null page"))
        }
    }

    pub fn free(&mut self, object: NonNull<u8>) {
        let header_ptr = unsafe { object.as_ptr().sub(HEADER_SIZE) } as *mut Header;
        let tag = unsafe { (*header_ptr).tag };

        if tag & RAW_FLAG != 0 {
            let order = tag & !RAW_FLAG;
            (self.free_pages)(NonNull::new(header_ptr as *mut u8).unwrap(), order);
            return;
        }

        let class_idx = tag as usize;
        let class = &mut self.classes[class_idx];
        let page_size = PAGE_SIZE as usize;
        let slab_idx = class
            .pages
            .iter()
            .position(|p| {
                let base = p.base.as_ptr() as usize;
                (header_ptr as usize) >= base && (header_ptr as usize) < base + page_size
            })
            .expect("freed object belongs to a known slab page");

        let node = header_ptr as *mut FreeNode;
        let slab = &mut class.pages[slab_idx];
        unsafe { (*node).next = slab.free };
        slab.free = NonNull::new(node);
        slab.free_count += 1;

        if slab.free_count == slab.total_count {
            let page = slab.base;
            let order = slab.order;
            class.pages.remove(slab_idx);
            (self.free_pages)(page, order);
        }
    }
}

static SLAB: Mutex<Option<SlabAllocator>> = Mutex::new(None);

pub fn init() {
    *SLAB.lock() = Some(SlabAllocator::new(kernel_backend::alloc_pages, kernel_backend::free_pages));
    log::info!("[memory] slab allocator initialized: {} size classes", NUM_CLASSES);
}

pub fn allocate(size: usize) -> KResult<NonNull<u8>> {
    SLAB.lock().as_mut().expect("slab::init not called").allocate(size)
}

pub fn free(ptr: NonNull<u8>) {
    SLAB.lock().as_mut().expect("slab::init not called").free(ptr)
}

/// Real kernel page source: pages come from the kernel heap's linear window
/// (`config::HEAP_START`), backed by fresh physical frames mapped
/// auto-release so `unmap_range` reclaims them on free.
mod kernel_backend {
    use core::ptr::NonNull;
    use spin::Mutex;

    use crate::config::{HEAP_INITIAL_SIZE, HEAP_START, PAGE_SIZE};
    use crate::error::KResult;
    use crate::memory::linear::{self, LinearManagerId};
    use crate::memory::page::{self, PageAttribute};
    use crate::memory::physical;

    static HEAP: Mutex<Option<LinearManagerId>> = Mutex::new(None);

    fn heap_manager() -> LinearManagerId {
        let mut heap = HEAP.lock();
        if heap.is_none() {
            *heap = Some(linear::create(HEAP_START, HEAP_INITIAL_SIZE).expect("kernel heap linear range exhausted"));
        }
        heap.unwrap()
    }

    pub fn alloc_pages(order: u32) -> KResult<NonNull<u8>> {
        let size = PAGE_SIZE << order;
        let linear_addr = linear::with_manager(heap_manager(), |m| m.allocate(size, true))?;
        for i in 0..(size / PAGE_SIZE) {
            let phys = physical::allocate(PAGE_SIZE)?;
            page::with_kernel_manager(|pm| pm.set_page(linear_addr + i * PAGE_SIZE, phys, PageAttribute::KernelPage, true))?;
        }
        Ok(NonNull::new(linear_addr as *mut u8).expect("linear allocation returned null"))
    }

    pub fn free_pages(ptr: NonNull<u8>, order: u32) {
        let linear_addr = ptr.as_ptr() as u32;
        let size = PAGE_SIZE << order;
        let _ = page::with_kernel_manager(|pm| pm.unmap_range(linear_addr, size / PAGE_SIZE));
        let _ = linear::with_manager(heap_manager(), |m| m.release(linear_addr));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::alloc::{alloc_zeroed, dealloc, Layout};

    fn test_alloc_pages(order: u32) -> KResult<NonNull<u8>> {
        let size = (PAGE_SIZE as usize) << order;
        let layout = Layout::from_size_align(size, PAGE_SIZE as usize).unwrap();
        let ptr = unsafe { alloc_zeroed(layout) };
        Ok(NonNull::new(ptr).expect("host allocation failed"))
    }

    fn test_free_pages(ptr: NonNull<u8>, order: u32) {
        let size = (PAGE_SIZE as usize) << order;
        let layout = Layout::from_size_align(size, PAGE_SIZE as usize).unwrap();
        unsafe { dealloc(ptr.as_ptr(), layout) };
    }

    fn fresh() -> SlabAllocator {
        SlabAllocator::new(test_alloc_pages, test_free_pages)
    }

    #[test]
    fn small_allocation_round_trips() {
        let mut slab = fresh();
        let obj = slab.allocate(24).unwrap();
        unsafe { obj.as_ptr().write(0x42) };
        slab.free(obj);
    }

    #[test]
    fn objects_from_same_class_are_distinct() {
        let mut slab = fresh();
        let a = slab.allocate(16).unwrap();
        let b = slab.allocate(16).unwrap();
        assert_ne!(a.as_ptr(), b.as_ptr());
        slab.free(a);
        slab.free(b);
    }

    #[test]
    fn large_allocation_falls_through_to_raw_pages() {
        let mut slab = fresh();
        let huge = slab.allocate(3 * PAGE_SIZE as usize).unwrap();
        slab.free(huge);
    }

    #[test]
    fn freed_slab_page_is_returned_to_page_source() {
        let mut slab = fresh();
        // Exhaust one page's worth of the smallest class, then free them
        // all back — the page should be released rather than retained.
        let object_size = SLAB_SIZE_CLASSES[0] as usize;
        let per_page = PAGE_SIZE as usize / object_size;
        let mut objs = heapless::Vec::<NonNull<u8>, 256>::new();
        for _ in 0..per_page {
            objs.push(slab.allocate(object_size - HEADER_SIZE).unwrap()).unwrap();
        }
        for obj in objs {
            slab.free(obj);
        }
        assert!(slab.classes[0].pages.is_empty());
    }
}
