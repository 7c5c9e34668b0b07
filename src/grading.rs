use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::mastery;
use crate::model::{ItemPatch, ReviewItem};

/// User recall grade for one review. Determines both the count transition
/// and the next interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grade {
    Again,
    Good,
    Easy,
}

/// One grading transition. Pure; the caller persists the returned patch.
///
/// The interval exponent uses the pre-grading count: Good on a count-3 item
/// schedules 2^3 = 8 days out, then the count becomes 4. Easy skips one step
/// ahead on both the count and the exponent. Again resets the count and
/// schedules tomorrow. The cap bounds the interval only, never the count.
pub fn apply_grade(
    item: &ReviewItem,
    grade: Grade,
    today: NaiveDate,
    interval_cap_days: u32,
    mastery_threshold: u32,
) -> ItemPatch {
    let (review_count, interval_days) = match grade {
        Grade::Again => (0, 1),
        Grade::Good => (
            item.review_count.saturating_add(1),
            capped_interval(item.review_count, interval_cap_days),
        ),
        Grade::Easy => (
            item.review_count.saturating_add(2),
            capped_interval(item.review_count.saturating_add(1), interval_cap_days),
        ),
    };

    ItemPatch {
        review_count,
        next_review_date: today + Duration::days(i64::from(interval_days)),
        last_reviewed_date: today,
        mastered: mastery::is_mastered(review_count, mastery_threshold),
    }
}

/// min(2^exponent, cap) without evaluating the shift for exponents that
/// already exceed the cap.
fn capped_interval(exponent: u32, cap_days: u32) -> u32 {
    if exponent >= 32 || (1u64 << exponent) >= u64::from(cap_days) {
        cap_days
    } else {
        1u32 << exponent
    }
}
