use crate::model::ReviewItem;

/// Retirement is derived purely from the review count. The flag is persisted
/// so stores can filter server-side, but the count stays authoritative on
/// every engine write.
pub fn is_mastered(review_count: u32, threshold: u32) -> bool {
    review_count >= threshold
}

/// Recomputes the persisted flag from the count. Idempotent.
pub fn apply_mastery(item: &mut ReviewItem, threshold: u32) {
    item.mastered = is_mastered(item.review_count, threshold);
}

/// Drops retired items from a candidate set. Selection honors the flag as
/// stored: an externally cleared flag re-admits the item regardless of its
/// count, until its next grade recomputes it.
pub fn filter_candidates(items: Vec<ReviewItem>) -> Vec<ReviewItem> {
    items.into_iter().filter(|item| !item.mastered).collect()
}
