use crate::types::{FolderContents, FolderFile, FolderStats, ItemId, ItemStatus, ProcessedItem};

/// Stable id for an item rebuilt from a folder listing.
///
/// 32-bit `h * 31 + c` string hash over UTF-16 code units, absolute value.
/// Unique only within one folder's namespace.
pub fn hash_filename(filename: &str) -> ItemId {
    let mut hash: i32 = 0;
    for unit in filename.encode_utf16() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(unit as i32);
    }
    hash.unsigned_abs() as ItemId
}

fn folder_basename(folder: &str) -> &str {
    folder
        .trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(folder)
}

impl ProcessedItem {
    /// Rebuild a processed item from a captioned file in a folder listing.
    pub fn from_folder_file(folder: &str, file: &FolderFile) -> Self {
        Self {
            id: hash_filename(&file.filename),
            filename: file.filename.clone(),
            image: format!("/data/{}/{}", folder_basename(folder), file.filename),
            caption: file.caption.clone().unwrap_or_default(),
            status: ItemStatus::Success,
            timestamp: file.last_modified.clone().unwrap_or_default(),
            error_message: None,
        }
    }
}

/// Items for every already-captioned file in the listing.
pub fn reconstruct_items(folder: &str, contents: &FolderContents) -> Vec<ProcessedItem> {
    contents
        .files
        .iter()
        .filter(|f| f.has_caption)
        .map(|f| ProcessedItem::from_folder_file(folder, f))
        .collect()
}

/// Offered only when every image of a non-empty folder has a caption.
pub fn show_reprocess_button(stats: Option<&FolderStats>) -> bool {
    matches!(stats, Some(s) if s.total_images > 0 && s.captioned == s.total_images)
}

pub fn show_start_button(stats: Option<&FolderStats>) -> bool {
    !show_reprocess_button(stats) && matches!(stats, Some(s) if s.uncaptioned > 0)
}

pub fn is_empty_folder(stats: Option<&FolderStats>) -> bool {
    matches!(stats, Some(s) if s.total_images == 0)
}

/// Which batch action a folder currently allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderAction {
    Start,
    Reprocess,
    /// Empty folder, or stats not loaded yet.
    None,
}

impl FolderAction {
    pub fn for_stats(stats: Option<&FolderStats>) -> Self {
        if show_reprocess_button(stats) {
            FolderAction::Reprocess
        } else if show_start_button(stats) {
            FolderAction::Start
        } else {
            FolderAction::None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(total: usize, captioned: usize) -> FolderStats {
        FolderStats {
            total_images: total,
            captioned,
            uncaptioned: total - captioned,
        }
    }

    #[test]
    fn test_hash_is_stable() {
        assert_eq!(hash_filename(""), 0);
        // "a" = 97
        assert_eq!(hash_filename("a"), 97);
        // "ab" = 97 * 31 + 98
        assert_eq!(hash_filename("ab"), 3105);
        assert_eq!(hash_filename("IMG_0001.jpg"), hash_filename("IMG_0001.jpg"));
        assert_ne!(hash_filename("IMG_0001.jpg"), hash_filename("IMG_0002.jpg"));
    }

    #[test]
    fn test_hash_wraps_and_stays_positive() {
        let long = "a_very_long_filename_that_overflows_32_bits_many_times.jpeg";
        let id = hash_filename(long);
        assert!(id <= i32::MAX as u64 + 1);
    }

    #[test]
    fn test_fully_captioned_offers_reprocess() {
        let s = stats(10, 10);
        assert!(show_reprocess_button(Some(&s)));
        assert!(!show_start_button(Some(&s)));
        assert_eq!(FolderAction::for_stats(Some(&s)), FolderAction::Reprocess);
    }

    #[test]
    fn test_uncaptioned_offers_start() {
        let s = stats(10, 0);
        assert!(show_start_button(Some(&s)));
        assert!(!show_reprocess_button(Some(&s)));

        let partial = stats(10, 7);
        assert_eq!(FolderAction::for_stats(Some(&partial)), FolderAction::Start);
    }

    #[test]
    fn test_empty_or_unknown_folder() {
        let empty = stats(0, 0);
        assert!(is_empty_folder(Some(&empty)));
        assert!(!show_reprocess_button(Some(&empty)));
        assert!(!show_start_button(Some(&empty)));
        assert_eq!(FolderAction::for_stats(None), FolderAction::None);
        assert!(!is_empty_folder(None));
    }

    #[test]
    fn test_reconstruct_items() {
        let contents = FolderContents {
            stats: stats(2, 1),
            files: vec![
                FolderFile {
                    filename: "a.jpg".into(),
                    has_caption: true,
                    caption: Some("a red door".into()),
                    last_modified: Some("2024-05-01T10:00:00Z".into()),
                },
                FolderFile {
                    filename: "b.jpg".into(),
                    has_caption: false,
                    caption: None,
                    last_modified: None,
                },
            ],
        };
        let items = reconstruct_items("/srv/images/houses/", &contents);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, hash_filename("a.jpg"));
        assert_eq!(items[0].image, "/data/houses/a.jpg");
        assert_eq!(items[0].caption, "a red door");
        assert_eq!(items[0].status, ItemStatus::Success);
    }
}
