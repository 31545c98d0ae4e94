// Copyright (c) The regress Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::TestcaseLimitParseError;
use serde::{Deserialize, Deserializer};
use std::{fmt, num::NonZeroUsize, str::FromStr};

/// How many of the generated testcases to run.
///
/// Written as `"all"` or a positive integer in config files and on the command line.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TestcaseLimit {
    /// Run every testcase.
    #[default]
    All,

    /// Run only the first N testcases.
    Count(NonZeroUsize),
}

impl TestcaseLimit {
    /// Returns true if this limit restricts the run.
    ///
    /// Results of a restricted run aren't compared across contexts.
    pub fn is_limited(&self) -> bool {
        matches!(self, Self::Count(_))
    }

    /// Truncates `items` to the limit.
    pub fn apply<T>(&self, items: &mut Vec<T>) {
        if let Self::Count(count) = self {
            items.truncate(count.get());
        }
    }
}

impl FromStr for TestcaseLimit {
    type Err = TestcaseLimitParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }

        let count = s
            .parse::<isize>()
            .map_err(|e| TestcaseLimitParseError::new(format!("{e} parsing '{s}'")))?;
        match usize::try_from(count).ok().and_then(NonZeroUsize::new) {
            Some(count) => Ok(Self::Count(count)),
            None => Err(TestcaseLimitParseError::new(
                "testcase-limit may not be <= 0",
            )),
        }
    }
}

impl fmt::Display for TestcaseLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Count(count) => write!(f, "{count}"),
        }
    }
}

impl<'de> Deserialize<'de> for TestcaseLimit {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = TestcaseLimit;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(formatter, "a positive integer or the string \"all\"")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if v == "all" {
                    return Ok(TestcaseLimit::All);
                }

                // Layered config sources may hand integers over as strings.
                match v.parse::<i64>() {
                    Ok(val) => serde::de::Visitor::visit_i64(self, val),
                    Err(_) => Err(serde::de::Error::invalid_value(
                        serde::de::Unexpected::Str(v),
                        &"the string \"all\" or a positive integer",
                    )),
                }
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                usize::try_from(v)
                    .ok()
                    .and_then(NonZeroUsize::new)
                    .map(TestcaseLimit::Count)
                    .ok_or_else(|| {
                        serde::de::Error::invalid_value(
                            serde::de::Unexpected::Signed(v),
                            &"a positive integer or the string \"all\"",
                        )
                    })
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                usize::try_from(v)
                    .ok()
                    .and_then(NonZeroUsize::new)
                    .map(TestcaseLimit::Count)
                    .ok_or_else(|| {
                        serde::de::Error::invalid_value(
                            serde::de::Unexpected::Unsigned(v),
                            &"a positive integer or the string \"all\"",
                        )
                    })
            }
        }

        deserializer.deserialize_any(V)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn testcase_limit_from_str() {
        let successes = vec![
            ("all", TestcaseLimit::All),
            ("ALL", TestcaseLimit::All),
            ("1", TestcaseLimit::Count(NonZeroUsize::new(1).unwrap())),
            ("12", TestcaseLimit::Count(NonZeroUsize::new(12).unwrap())),
        ];
        let failures = vec!["-1", "0", "foo", ""];

        for (input, output) in successes {
            assert_eq!(
                TestcaseLimit::from_str(input).unwrap_or_else(|err| panic!(
                    "expected input '{input}' to succeed, failed with: {err}"
                )),
                output,
                "success case '{input}' matches",
            );
        }

        for input in failures {
            TestcaseLimit::from_str(input).expect_err(&format!("expected input '{input}' to fail"));
        }
    }

    #[test]
    fn apply_truncates() {
        let mut items = vec![1, 2, 3];
        TestcaseLimit::All.apply(&mut items);
        assert_eq!(items, vec![1, 2, 3]);
        TestcaseLimit::Count(NonZeroUsize::new(2).unwrap()).apply(&mut items);
        assert_eq!(items, vec![1, 2]);
    }
}
