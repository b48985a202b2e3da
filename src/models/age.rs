//! Child age validation and bucketing.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Youngest supported child age.
pub const MIN_CHILD_AGE: u32 = 3;

/// Oldest supported child age.
pub const MAX_CHILD_AGE: u32 = 15;

/// Rejects ages outside `3..=15`.
pub fn validate_child_age(age: u32) -> Result<u32> {
    if !(MIN_CHILD_AGE..=MAX_CHILD_AGE).contains(&age) {
        return Err(Error::InvalidChildAge(age));
    }
    Ok(age)
}

/// Clamps an age into `3..=15` for prompt rendering.
#[must_use]
pub const fn clamp_age(age: u32) -> u32 {
    if age < MIN_CHILD_AGE {
        MIN_CHILD_AGE
    } else if age > MAX_CHILD_AGE {
        MAX_CHILD_AGE
    } else {
        age
    }
}

/// Content-cache age bucket.
///
/// Generated content is shared between children in the same bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeBucket {
    /// Ages up to 6.
    Early,
    /// Ages 7 to 9.
    Middle,
    /// Ages 10 and up.
    Senior,
}

impl AgeBucket {
    /// Buckets an age.
    #[must_use]
    pub const fn from_age(age: u32) -> Self {
        match age {
            0..=6 => Self::Early,
            7..=9 => Self::Middle,
            _ => Self::Senior,
        }
    }

    /// Stable numeric form used in cache keys and logs.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Early => 1,
            Self::Middle => 2,
            Self::Senior => 3,
        }
    }
}

impl std::fmt::Display for AgeBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Cognitive layer used to phrase generation prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeLayer {
    /// 3 to 6: short, concrete sentences.
    Concrete,
    /// 7 to 12: cause and structure.
    Causal,
    /// 13 to 15: systems thinking.
    Systemic,
}

impl AgeLayer {
    /// Layer for an age (clamped first).
    #[must_use]
    pub const fn from_age(age: u32) -> Self {
        match clamp_age(age) {
            0..=6 => Self::Concrete,
            7..=12 => Self::Causal,
            _ => Self::Systemic,
        }
    }

    /// Instruction phrase injected into prompts.
    #[must_use]
    pub const fn instruction(self) -> &'static str {
        match self {
            Self::Concrete => "3-6岁：短句、具象、像生活故事一样描述。",
            Self::Causal => "7-12岁：强调因果与结构，口语化解释“为什么”。",
            Self::Systemic => "13-15岁：可加入系统思维、成本与权衡，但保持易懂。",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(3, AgeBucket::Early ; "youngest")]
    #[test_case(6, AgeBucket::Early ; "six")]
    #[test_case(7, AgeBucket::Middle ; "seven")]
    #[test_case(9, AgeBucket::Middle ; "nine")]
    #[test_case(10, AgeBucket::Senior ; "ten")]
    #[test_case(15, AgeBucket::Senior ; "oldest")]
    fn test_age_bucket(age: u32, expected: AgeBucket) {
        assert_eq!(AgeBucket::from_age(age), expected);
    }

    #[test_case(1, AgeLayer::Concrete)]
    #[test_case(6, AgeLayer::Concrete)]
    #[test_case(7, AgeLayer::Causal)]
    #[test_case(12, AgeLayer::Causal)]
    #[test_case(13, AgeLayer::Systemic)]
    #[test_case(40, AgeLayer::Systemic)]
    fn test_age_layer(age: u32, expected: AgeLayer) {
        assert_eq!(AgeLayer::from_age(age), expected);
    }

    #[test]
    fn test_validate_child_age() {
        assert!(validate_child_age(3).is_ok());
        assert!(validate_child_age(15).is_ok());
        assert!(matches!(
            validate_child_age(2),
            Err(Error::InvalidChildAge(2))
        ));
        assert!(matches!(
            validate_child_age(16),
            Err(Error::InvalidChildAge(16))
        ));
    }

    #[test]
    fn test_clamp_age() {
        assert_eq!(clamp_age(0), 3);
        assert_eq!(clamp_age(9), 9);
        assert_eq!(clamp_age(99), 15);
    }
}
