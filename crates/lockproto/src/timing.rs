//! Burst numbering and skew helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Value substituted for the burst placeholder at launch time.
///
/// Persistent launches record every burst from one process, so they get a
/// neutral token instead of a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BurstToken {
    Number(u32),
    Neutral,
}

impl BurstToken {
    pub const NEUTRAL: &'static str = "persistent";

    pub fn render(&self) -> String {
        match self {
            BurstToken::Number(n) => n.to_string(),
            BurstToken::Neutral => Self::NEUTRAL.to_string(),
        }
    }
}

/// Spread between the earliest and latest timestamp, in microseconds.
///
/// Used for inter-process skew diagnostics. `None` for fewer than two stamps.
pub fn spread<'a, I>(stamps: I) -> Option<i64>
where
    I: IntoIterator<Item = &'a DateTime<Utc>>,
{
    let mut iter = stamps.into_iter();
    let first = *iter.next()?;
    let (mut min, mut max, mut n) = (first, first, 1usize);
    for at in iter {
        min = min.min(*at);
        max = max.max(*at);
        n += 1;
    }
    if n < 2 {
        return None;
    }
    (max - min).num_microseconds()
}
