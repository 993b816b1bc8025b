//! Placement rules and the consecutive-space search

use serde::Serialize;

/// Number of consecutive car spaces a van takes when it overflows.
pub const VAN_RUN_LENGTH: usize = 3;

/// How a park request was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    /// A space designated for the vehicle's own type
    Exact,
    /// A run of car spaces taken by a van
    VanOverflow,
    /// A single car or van space taken by a motorcycle
    MotorcycleOverflow,
}

impl Placement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Placement::Exact => "exact",
            Placement::VanOverflow => "van_overflow",
            Placement::MotorcycleOverflow => "motorcycle_overflow",
        }
    }
}

/// Find the first window of `k` free spaces with consecutive numbers.
///
/// `pairs` holds `(space number, occupied)` in ascending number order.
/// Returns the number of the first space of the earliest window. A gap in
/// the numbering or an occupied space breaks the current run.
pub fn find_consecutive_run(pairs: &[(u32, bool)], k: usize) -> Option<u32> {
    if k == 0 {
        return None;
    }

    let mut start = 0u32;
    let mut len = 0usize;
    let mut prev: Option<u32> = None;

    for &(number, occupied) in pairs {
        let follows = prev.and_then(|p| p.checked_add(1)) == Some(number);
        prev = Some(number);

        if occupied {
            len = 0;
            continue;
        }

        if len > 0 && follows {
            len += 1;
        } else {
            start = number;
            len = 1;
        }

        if len == k {
            return Some(start);
        }
    }

    None
}
