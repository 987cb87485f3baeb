use crate::core::state::{Book, BookPage};

/// Page-by-page navigation over a finished book, starting at the cover.
#[derive(Debug, Clone)]
pub struct BookViewer<'a> {
    book: &'a Book,
    index: usize,
}

impl<'a> BookViewer<'a> {
    pub fn new(book: &'a Book) -> Self {
        Self { book, index: 0 }
    }

    pub fn current(&self) -> Option<&'a BookPage> {
        self.book.pages.get(self.index)
    }

    pub fn has_next(&self) -> bool {
        self.index + 1 < self.book.pages.len()
    }

    pub fn has_prev(&self) -> bool {
        self.index > 0
    }

    pub fn next(&mut self) -> Option<&'a BookPage> {
        if self.has_next() {
            self.index += 1;
        }
        self.current()
    }

    pub fn prev(&mut self) -> Option<&'a BookPage> {
        self.index = self.index.saturating_sub(1);
        self.current()
    }

    /// "Cover" on the first page, otherwise "N / M" over the story pages.
    pub fn label(&self) -> String {
        if self.index == 0 {
            "Cover".to_string()
        } else {
            format!("{} / {}", self.index, self.book.pages.len().saturating_sub(1))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book() -> Book {
        Book {
            title: "Felix".to_string(),
            pages: (0..=10)
                .map(|n| BookPage {
                    page_number: n,
                    text: format!("text {}", n),
                    image_ref: String::new(),
                    is_cover: n == 0,
                })
                .collect(),
        }
    }

    #[test]
    fn test_starts_on_cover() {
        let book = book();
        let viewer = BookViewer::new(&book);
        assert!(viewer.current().unwrap().is_cover);
        assert_eq!(viewer.label(), "Cover");
        assert!(!viewer.has_prev());
        assert!(viewer.has_next());
    }

    #[test]
    fn test_navigation_clamps_at_both_ends() {
        let book = book();
        let mut viewer = BookViewer::new(&book);
        assert_eq!(viewer.prev().unwrap().page_number, 0);

        for _ in 0..20 {
            viewer.next();
        }
        assert_eq!(viewer.current().unwrap().page_number, 10);
        assert_eq!(viewer.label(), "10 / 10");
        assert!(!viewer.has_next());

        assert_eq!(viewer.prev().unwrap().page_number, 9);
        assert_eq!(viewer.label(), "9 / 10");
    }
}
