use crate::core::query::{QueryOptions, MAX_STARS, MIN_STARS};
use crate::domain::model::{ParseResult, Review};

/// Applies `options` to a copy of `data`; the stored value is never touched.
///
/// Reviews keep their page order. With any rating bound set, reviews without
/// stars are dropped; with any date bound set, undated reviews are dropped.
/// Truncation to `count` happens last.
pub fn apply_response_options(data: &ParseResult, options: &QueryOptions) -> ParseResult {
    let min = options.min_rating.unwrap_or(MIN_STARS);
    let max = options.max_rating.unwrap_or(MAX_STARS);
    let limit = options.count.unwrap_or(usize::MAX);

    let reviews: Vec<Review> = data
        .reviews
        .iter()
        .filter(|review| !options.has_rating_bounds() || within_rating(review, min, max))
        .filter(|review| !options.has_date_bounds() || within_dates(review, options))
        .take(limit)
        .cloned()
        .collect();

    ParseResult {
        name: data.name.clone(),
        rating: data.rating.clone(),
        review_count: data.review_count.clone(),
        reviews,
    }
}

fn within_rating(review: &Review, min: u8, max: u8) -> bool {
    review
        .rating_stars
        .is_some_and(|stars| stars >= min && stars <= max)
}

fn within_dates(review: &Review, options: &QueryOptions) -> bool {
    let Some(date) = review.date else {
        return false;
    };
    options.date_start.map_or(true, |start| date >= start)
        && options.date_end.map_or(true, |end| date <= end)
}
