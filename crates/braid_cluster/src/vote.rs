//! Built-in vote functions for replicate.
//!
//! A voter reduces the successful replica outcomes, in site order, to one
//! value. Returning `None` means the outcomes do not agree enough.

/// Most frequent value; ties go to the value seen first
#[must_use]
pub fn majority<T: PartialEq>(outcomes: Vec<T>) -> Option<T> {
    let mut counts: Vec<(T, usize)> = Vec::new();
    for outcome in outcomes {
        match counts.iter_mut().find(|(value, _)| *value == outcome) {
            Some((_, count)) => *count += 1,
            None => counts.push((outcome, 1)),
        }
    }

    let best = counts.iter().map(|(_, count)| *count).max()?;
    counts
        .into_iter()
        .find(|(_, count)| *count == best)
        .map(|(value, _)| value)
}

/// Value held by more than half of the outcomes
#[must_use]
pub fn strict_majority<T: PartialEq>(outcomes: Vec<T>) -> Option<T> {
    let total = outcomes.len();
    let mut counts: Vec<(T, usize)> = Vec::new();
    for outcome in outcomes {
        match counts.iter_mut().find(|(value, _)| *value == outcome) {
            Some((_, count)) => *count += 1,
            None => counts.push((outcome, 1)),
        }
    }
    counts
        .into_iter()
        .find(|(_, count)| count * 2 > total)
        .map(|(value, _)| value)
}

/// First outcome in site order
#[must_use]
pub fn first<T>(outcomes: Vec<T>) -> Option<T> {
    outcomes.into_iter().next()
}
