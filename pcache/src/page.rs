//! Page module - the cached unit and the handle given out to callers.

use std::{
    fmt,
    ops::Deref,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use log::warn;
use parking_lot::{
    Condvar, MappedRwLockReadGuard, MappedRwLockWriteGuard, Mutex, RwLock, RwLockReadGuard,
    RwLockWriteGuard,
};

use crate::{
    arena::NodeId,
    page_id::PageId,
    pager::{PageLayout, Pager},
    txn::{AllocError, alloc_buffer},
};

/// How long a single wait for pager attachment lasts before it is retried.
const ATTACH_WAIT: Duration = Duration::from_millis(1);
/// Number of expired waits after which a warning is logged.
const ATTACH_WARN_ROUNDS: u32 = 1000;

/// Where the page lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    /// Page occupies slot `slot` of the cache's fixed pool.
    Resident { slot: usize },
    /// Page was allocated by a transaction and is owned by whoever holds it.
    Private,
}

/// Single cached page: raw buffer plus the state its [`Pager`] maintains.
///
/// Link fields and the reference count are not stored here. They belong to the cache and
/// are only touched under its lock.
pub struct Page {
    kind: PageKind,
    /// Page content.
    buffer: RwLock<Box<[u8]>>,
    /// Set by the pager once the page content is initialized, cleared when the page is reused.
    layout: Mutex<Option<PageLayout>>,
    /// Signalled when [`Page::layout`] is set.
    attached: Condvar,
    /// Set to true if the page was modified and not yet written back. Maintained by the pager.
    dirty: AtomicBool,
}

impl Page {
    fn new(kind: PageKind, buffer: Box<[u8]>) -> Self {
        Self {
            kind,
            buffer: RwLock::new(buffer),
            layout: Mutex::new(None),
            attached: Condvar::new(),
            dirty: AtomicBool::new(false),
        }
    }

    /// Creates page for slot `slot` of the pool.
    pub(crate) fn resident(slot: usize, page_size: usize) -> Result<Arc<Self>, AllocError> {
        let buffer = alloc_buffer(page_size)?;
        Ok(Arc::new(Self::new(PageKind::Resident { slot }, buffer)))
    }

    /// Creates private page around buffer handed out by a transaction.
    pub(crate) fn private(buffer: Box<[u8]>) -> Arc<Self> {
        Arc::new(Self::new(PageKind::Private, buffer))
    }

    pub fn kind(&self) -> PageKind {
        self.kind
    }

    pub fn is_resident(&self) -> bool {
        matches!(self.kind, PageKind::Resident { .. })
    }

    /// Returns pool slot of resident page.
    pub fn slot(&self) -> Option<usize> {
        match self.kind {
            PageKind::Resident { slot } => Some(slot),
            PageKind::Private => None,
        }
    }

    pub fn size(&self) -> usize {
        self.buffer.read().len()
    }

    /// Acquires shared guard on the page content.
    pub fn read(&self) -> MappedRwLockReadGuard<'_, [u8]> {
        RwLockReadGuard::map(self.buffer.read(), |b| &**b)
    }

    /// Acquires exclusive guard on the page content.
    pub fn write(&self) -> MappedRwLockWriteGuard<'_, [u8]> {
        RwLockWriteGuard::map(self.buffer.write(), |b| &mut **b)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }

    /// Initializes the page content with `init` and attaches the layout it returns, unless
    /// a pager is already attached. Returns true if `init` ran.
    ///
    /// Everyone waiting to copy the page is woken up afterwards. Must not be called while
    /// holding a guard on the page content.
    pub fn attach_with<F>(&self, init: F) -> bool
    where
        F: FnOnce(&mut [u8]) -> PageLayout,
    {
        let mut layout = self.layout.lock();
        if layout.is_some() {
            return false;
        }
        let attached = {
            let mut buffer = self.write();
            init(&mut *buffer)
        };
        *layout = Some(attached);
        self.attached.notify_all();
        true
    }

    /// Attaches `layout` without touching the content. Returns false if already attached.
    pub fn attach(&self, layout: PageLayout) -> bool {
        self.attach_with(|_| layout)
    }

    pub fn is_attached(&self) -> bool {
        self.layout.lock().is_some()
    }

    pub fn layout(&self) -> Option<PageLayout> {
        self.layout.lock().clone()
    }

    pub fn pager(&self) -> Option<Arc<dyn Pager>> {
        self.layout.lock().as_ref().map(|l| l.pager.clone())
    }

    /// Clears the pager back-reference so the pager initializes the page again.
    pub(crate) fn detach(&self) {
        *self.layout.lock() = None;
    }

    /// Blocks until pager is attached to the page and returns its layout.
    fn wait_attached(&self) -> PageLayout {
        let mut layout = self.layout.lock();
        let mut rounds = 0u32;
        loop {
            if let Some(l) = layout.as_ref() {
                return l.clone();
            }
            if self.attached.wait_for(&mut layout, ATTACH_WAIT).timed_out() {
                rounds += 1;
                if rounds % ATTACH_WARN_ROUNDS == 0 {
                    warn!("pcache: still waiting for pager to attach to copy source ({rounds} rounds)");
                }
            }
        }
    }

    /// Makes this page a copy of `source`: pager reference, content and layout.
    ///
    /// Waits until `source` is initialized by its pager.
    pub(crate) fn copy_from(&self, source: &Page) {
        let layout = source.wait_attached();
        {
            let src = source.read();
            let mut dst = self.write();
            dst.copy_from_slice(&src);
        }
        *self.layout.lock() = Some(layout);
        self.attached.notify_all();
    }

    /// Takes the buffer out of a private page that is being destroyed.
    pub(crate) fn take_buffer(&self) -> Box<[u8]> {
        std::mem::take(&mut *self.buffer.write())
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("kind", &self.kind)
            .field("attached", &self.is_attached())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

/// Page handed out by [`crate::PageCache::fetch`].
///
/// Every [`PageRef`] accounts for one reference on the page and must be given back through
/// [`crate::PageCache::release`]. Dropping it instead leaks the pin.
#[must_use = "pages must be handed back to PageCache::release"]
pub struct PageRef {
    node: NodeId,
    page_id: PageId,
    page: Arc<Page>,
}

impl PageRef {
    pub(crate) fn new(node: NodeId, page_id: PageId, page: Arc<Page>) -> Self {
        Self {
            node,
            page_id,
            page,
        }
    }

    pub(crate) fn node(&self) -> NodeId {
        self.node
    }

    pub(crate) fn arc(&self) -> &Arc<Page> {
        &self.page
    }

    /// Key the page was fetched under. It cannot change while the page is held.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns true if both handles point to the same page object.
    pub fn same_page(&self, other: &PageRef) -> bool {
        Arc::ptr_eq(&self.page, &other.page)
    }
}

impl Deref for PageRef {
    type Target = Page;

    fn deref(&self) -> &Page {
        &self.page
    }
}

impl fmt::Debug for PageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageRef")
            .field("page_id", &self.page_id)
            .field("page", &self.page)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Barrier, thread};

    use super::*;

    struct NullPager;

    impl Pager for NullPager {}

    #[test]
    fn resident_and_private_kinds() {
        let resident = Page::resident(3, 128).unwrap();
        assert!(resident.is_resident());
        assert_eq!(resident.slot(), Some(3));
        assert_eq!(resident.size(), 128);

        let private = Page::private(vec![1u8; 128].into_boxed_slice());
        assert!(!private.is_resident());
        assert_eq!(private.slot(), None);
        assert_eq!(private.read()[0], 1);
    }

    #[test]
    fn attach_and_detach() {
        let page = Page::resident(0, 64).unwrap();
        assert!(!page.is_attached());
        assert!(page.pager().is_none());

        page.attach(PageLayout::new(Arc::new(NullPager), 8));
        assert!(page.is_attached());
        assert_eq!(page.layout().unwrap().header_offset, 8);

        page.detach();
        assert!(!page.is_attached());
    }

    #[test]
    fn attach_with_runs_once() {
        let page = Page::resident(0, 64).unwrap();
        let pager: Arc<dyn Pager> = Arc::new(NullPager);

        let first = page.attach_with(|buf| {
            buf[0] = 1;
            PageLayout::new(pager.clone(), 4)
        });
        let second = page.attach_with(|buf| {
            buf[0] = 2;
            PageLayout::new(pager.clone(), 8)
        });

        assert!(first);
        assert!(!second);
        assert_eq!(page.read()[0], 1);
        assert_eq!(page.layout().unwrap().header_offset, 4);
    }

    #[test]
    fn copy_from_copies_content_and_layout() {
        let source = Page::private(vec![0u8; 64].into_boxed_slice());
        source.write()[..4].copy_from_slice(b"abcd");
        let mut layout = PageLayout::new(Arc::new(NullPager), 16);
        layout.key_len = 8;
        layout.max_local = 40;
        source.attach(layout.clone());

        let copy = Page::resident(1, 64).unwrap();
        copy.copy_from(&source);

        assert_eq!(&copy.read()[..4], b"abcd");
        let copied = copy.layout().unwrap();
        assert!(copied.same_pager(&layout));
        assert_eq!(copied.header_offset, 16);
        assert_eq!(copied.key_len, 8);
        assert_eq!(copied.max_local, 40);

        // Independent buffers.
        copy.write()[0] = b'z';
        assert_eq!(source.read()[0], b'a');
    }

    #[test]
    fn copy_from_waits_for_pager() {
        let source = Page::private(vec![0u8; 32].into_boxed_slice());
        let copy = Page::private(vec![0u8; 32].into_boxed_slice());
        let start = Arc::new(Barrier::new(2));

        let copier = {
            let source = source.clone();
            let copy = copy.clone();
            let start = start.clone();
            thread::spawn(move || {
                start.wait();
                copy.copy_from(&source);
            })
        };

        start.wait();
        thread::sleep(Duration::from_millis(20));
        assert!(!copy.is_attached());

        source.write()[0] = 42;
        source.attach(PageLayout::new(Arc::new(NullPager), 0));
        copier.join().unwrap();

        assert!(copy.is_attached());
        assert_eq!(copy.read()[0], 42);
    }

    #[test]
    fn take_buffer_leaves_empty_page() {
        let page = Page::private(vec![5u8; 16].into_boxed_slice());
        let buffer = page.take_buffer();
        assert_eq!(buffer.len(), 16);
        assert_eq!(page.size(), 0);
    }
}
