use std::collections::HashSet;

use bfs_core::path;

/// Where the log lives on the writable layer.
pub const DELETION_LOG_PATH: &str = "/.deletedFiles.log";

/// Paths of the readable layer that have been deleted through the overlay.
///
/// The text form has one entry per line: `d` followed by the path marks it
/// deleted, any other tag clears an earlier mark.
#[derive(Debug, Default)]
pub(crate) struct DeletionLog {
    text: String,
    deleted: HashSet<String>,
}

impl DeletionLog {
    pub(crate) fn parse(text: impl Into<String>) -> Self {
        let mut log = Self {
            text: text.into(),
            deleted: HashSet::new(),
        };
        log.reparse();
        log
    }

    fn reparse(&mut self) {
        self.deleted.clear();
        for line in self.text.lines() {
            let mut chars = line.chars();
            let Some(tag) = chars.next() else {
                continue;
            };
            let p = chars.as_str();
            if tag == 'd' {
                self.deleted.insert(p.to_owned());
            } else {
                self.deleted.remove(p);
            }
        }
    }

    pub(crate) fn text(&self) -> &str {
        &self.text
    }

    pub(crate) fn replace(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.reparse();
    }

    pub(crate) fn delete(&mut self, p: &str) {
        self.deleted.insert(p.to_owned());
        self.text.push('d');
        self.text.push_str(p);
        self.text.push('\n');
    }

    /// True when `p` or one of its ancestors was deleted.
    pub(crate) fn hides(&self, p: &str) -> bool {
        let mut current = p;
        loop {
            if self.deleted.contains(current) {
                return true;
            }
            if current == "/" {
                return false;
            }
            current = path::dirname(current);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn later_lines_override_earlier_ones() {
        let log = DeletionLog::parse("d/a\nd/b\nu/a\n\n");
        assert!(!log.hides("/a"));
        assert!(log.hides("/b"));
        assert_eq!(log.text(), "d/a\nd/b\nu/a\n\n");
    }

    #[test]
    fn deleting_a_directory_hides_its_children() {
        let mut log = DeletionLog::default();
        log.delete("/dir");
        assert!(log.hides("/dir/nested/file"));
        assert!(!log.hides("/directory"));
        assert!(!log.hides("/"));
        assert_eq!(log.text(), "d/dir\n");

        log.replace("");
        assert!(!log.hides("/dir"));
    }
}
