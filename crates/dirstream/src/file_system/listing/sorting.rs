//! Name ordering for listings.
//!
//! Directories and files are kept as two separately sorted sequences. Putting
//! directories first is up to whoever renders them.

use std::cmp::Ordering;

use crate::file_system::listing::metadata::Entry;

/// Compares two names using natural (alphanumeric) sort, case-insensitive.
///
/// Names that only differ by case fall back to a byte comparison so the order is total
/// and stable across runs.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    alphanumeric_sort::compare_str(a.to_lowercase(), b.to_lowercase()).then_with(|| a.cmp(b))
}

/// Sorts entries by name (natural, case-insensitive).
pub fn sort_by_name(entries: &mut [Entry]) {
    entries.sort_by(|a, b| compare_names(&a.name, &b.name));
}

/// Splits entries into (directories, files), each sorted by name.
pub fn split_and_sort(entries: Vec<Entry>) -> (Vec<Entry>, Vec<Entry>) {
    let (mut directories, mut files): (Vec<Entry>, Vec<Entry>) = entries.into_iter().partition(|e| e.is_dir);
    sort_by_name(&mut directories);
    sort_by_name(&mut files);
    (directories, files)
}

/// Returns entries in delivery order: sorted directories, then sorted files.
///
/// Used to decide which entries make up the first page.
pub fn delivery_order(entries: Vec<Entry>) -> Vec<Entry> {
    let (mut directories, files) = split_and_sort(entries);
    directories.extend(files);
    directories
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn file(name: &str) -> Entry {
        Entry::minimal(Path::new("/t"), name, false, false)
    }

    fn dir(name: &str) -> Entry {
        Entry::minimal(Path::new("/t"), name, true, false)
    }

    fn names(entries: &[Entry]) -> Vec<&str> {
        entries.iter().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn test_natural_order() {
        let mut entries = vec![file("img_10.png"), file("img_2.png"), file("img_1.png")];
        sort_by_name(&mut entries);
        assert_eq!(names(&entries), vec!["img_1.png", "img_2.png", "img_10.png"]);
    }

    #[test]
    fn test_case_insensitive_order() {
        let mut entries = vec![file("banana"), file("Apple"), file("cherry")];
        sort_by_name(&mut entries);
        assert_eq!(names(&entries), vec!["Apple", "banana", "cherry"]);
    }

    #[test]
    fn test_case_only_difference_is_stable() {
        assert_eq!(compare_names("README", "readme"), Ordering::Less);
        assert_eq!(compare_names("readme", "README"), Ordering::Greater);
        assert_eq!(compare_names("same", "same"), Ordering::Equal);
    }

    #[test]
    fn test_split_and_sort() {
        let entries = vec![file("b.txt"), dir("Zeta"), file("A.txt"), dir("alpha")];
        let (dirs, files) = split_and_sort(entries);
        assert_eq!(names(&dirs), vec!["alpha", "Zeta"]);
        assert_eq!(names(&files), vec!["A.txt", "b.txt"]);
    }

    #[test]
    fn test_delivery_order_puts_directories_first() {
        let entries = vec![file("a.txt"), dir("z"), file("b.txt")];
        let ordered = delivery_order(entries);
        assert_eq!(names(&ordered), vec!["z", "a.txt", "b.txt"]);
    }
}
