/// Walks a paged listing by the server-reported page count.
///
/// The exact `total_pages` from the response decides whether another
/// page exists; a final page that happens to be full does not invite a
/// futile extra request, and a short page is not mistaken for the end
/// when the server says otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub page: u32,
    pub total_pages: u32,
}

impl PageCursor {
    /// Position before any fetch; the first request targets page 1.
    pub fn start() -> Self {
        Self {
            page: 0,
            total_pages: 1,
        }
    }

    pub fn has_more(&self) -> bool {
        self.page < self.total_pages
    }

    pub fn next_page(&self) -> u32 {
        self.page + 1
    }

    pub fn advance(&mut self, page: u32, total_pages: u32) {
        self.page = page;
        self.total_pages = total_pages;
    }

    pub fn reset(&mut self) {
        *self = Self::start();
    }
}

impl Default for PageCursor {
    fn default() -> Self {
        Self::start()
    }
}
