//! Persistent storage of LNCV values
//!
//! Values live in fixed size pages of 16-bit words. Writes are two-phase: a page is first staged
//! and only replaces the stored copy on commit, so an interrupted write leaves the old page intact.
use snafu::Snafu;

/// Number of 16-bit words in a page
pub const PAGE_WORDS: usize = 30;

/// One page of stored values
pub type Page = [u16; PAGE_WORDS];

/// Errors reported by a [`PageStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    /// The store has never been formatted
    ///
    /// This is fatal at startup; the device is expected to reformat the store and restart.
    #[snafu(display("Persistent store is not initialized"))]
    NotInitialized,
    /// The page index does not exist
    #[snafu(display("Page {page} is out of range"))]
    PageOutOfRange {
        /// The requested page
        page: u16,
    },
    /// Commit was called with no page staged
    #[snafu(display("No page staged for commit"))]
    NothingStaged,
    /// The underlying memory reported a failure
    #[snafu(display("Storage hardware error"))]
    Hardware,
}

/// A paged, two-phase persistent store
pub trait PageStore {
    /// Check that the store has been formatted
    fn check_initialized(&self) -> Result<(), StoreError>;

    /// Read a committed page
    fn read_page(&self, page: u16, out: &mut Page) -> Result<(), StoreError>;

    /// Stage a page to be written on the next commit
    fn write_page(&mut self, page: u16, data: &Page) -> Result<(), StoreError>;

    /// Make the staged page permanent
    fn commit(&mut self) -> Result<(), StoreError>;
}

/// A [`PageStore`] held in RAM
///
/// Useful for tests and for devices without non-volatile memory. A freshly created store is
/// formatted with every word set to `0xFFFF`, which is how erased flash reads back.
#[derive(Debug, Clone)]
pub struct MemoryPageStore<const PAGES: usize = 1> {
    pages: [Page; PAGES],
    staged: Option<(u16, Page)>,
    initialized: bool,
    commits: usize,
}

impl<const PAGES: usize> Default for MemoryPageStore<PAGES> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const PAGES: usize> MemoryPageStore<PAGES> {
    /// Create an erased, formatted store
    pub const fn new() -> Self {
        Self {
            pages: [[0xFFFF; PAGE_WORDS]; PAGES],
            staged: None,
            initialized: true,
            commits: 0,
        }
    }

    /// Create a store which reports [`StoreError::NotInitialized`]
    pub const fn unformatted() -> Self {
        Self {
            pages: [[0xFFFF; PAGE_WORDS]; PAGES],
            staged: None,
            initialized: false,
            commits: 0,
        }
    }

    /// Erase every page and mark the store as formatted
    pub fn format(&mut self) {
        self.pages = [[0xFFFF; PAGE_WORDS]; PAGES];
        self.staged = None;
        self.initialized = true;
    }

    /// Number of successful commits
    pub fn commit_count(&self) -> usize {
        self.commits
    }

    /// Direct access to a committed page
    pub fn page(&self, page: u16) -> Option<&Page> {
        self.pages.get(page as usize)
    }

    fn ready(&self) -> Result<(), StoreError> {
        if self.initialized {
            Ok(())
        } else {
            Err(StoreError::NotInitialized)
        }
    }
}

impl<const PAGES: usize> PageStore for MemoryPageStore<PAGES> {
    fn check_initialized(&self) -> Result<(), StoreError> {
        self.ready()
    }

    fn read_page(&self, page: u16, out: &mut Page) -> Result<(), StoreError> {
        self.ready()?;
        let stored = self
            .pages
            .get(page as usize)
            .ok_or(StoreError::PageOutOfRange { page })?;
        out.copy_from_slice(stored);
        Ok(())
    }

    fn write_page(&mut self, page: u16, data: &Page) -> Result<(), StoreError> {
        self.ready()?;
        if page as usize >= PAGES {
            return PageOutOfRangeSnafu { page }.fail();
        }
        self.staged = Some((page, *data));
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.ready()?;
        let (page, data) = self.staged.take().ok_or(StoreError::NothingStaged)?;
        self.pages[page as usize] = data;
        self.commits += 1;
        Ok(())
    }
}
