use std::cmp::Ordering;

use chrono::NaiveDate;

use crate::model::{BatchItem, ReviewItem};

const NEW_ITEM_BASE: i64 = 150;
const DUE_BASE: i64 = 150;
const OVERDUE_POINTS_PER_DAY: i64 = 5;
const UPCOMING_BASE: i64 = 30;
const UPCOMING_POINTS_PER_DAY: i64 = 3;
const RECENT_ADDITION_MAX: i64 = 20;
const LOW_REVIEW_MAX: i64 = 30;

/// Priority of one item on a given date. Pure, no I/O.
///
/// New items (never reviewed) and due items share the 150 base band, so a
/// freshly saved entry competes on equal footing with an entry whose review
/// fell due today. Items not yet due score at most 30 before bonuses.
pub fn priority_score(item: &ReviewItem, today: NaiveDate) -> i64 {
    let band = match item.next_review_date {
        None => NEW_ITEM_BASE + recent_addition_bonus(item.date_added, today),
        Some(due) if due <= today => {
            let days_overdue = (today - due).num_days().max(0);
            DUE_BASE + OVERDUE_POINTS_PER_DAY * days_overdue
        }
        Some(due) => {
            let days_until = (due - today).num_days();
            (UPCOMING_BASE - UPCOMING_POINTS_PER_DAY * days_until).max(0)
        }
    };

    band + low_review_bonus(item.review_count)
}

/// Bonus for entries saved recently and never studied. 20 points on the day
/// the entry was added, reaching 0 after 20 days.
fn recent_addition_bonus(date_added: NaiveDate, today: NaiveDate) -> i64 {
    let days = (today - date_added).num_days().max(0);
    RECENT_ADDITION_MAX / (1 + days)
}

/// Bonus favoring items with few completed reviews, applied to every band.
/// 30 points at zero reviews, decaying toward 0 as the count grows.
fn low_review_bonus(review_count: u32) -> i64 {
    LOW_REVIEW_MAX / (1 + i64::from(review_count))
}

/// Total order used to rank a batch: higher score first, oldest-added first
/// on equal scores, then source and id so the ordering is deterministic.
pub fn compare_ranked(a: &BatchItem, b: &BatchItem) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| a.item.date_added.cmp(&b.item.date_added))
        .then_with(|| a.item.source_id.cmp(&b.item.source_id))
        .then_with(|| a.item.id.cmp(&b.item.id))
}
