use std::{
    fmt::Display,
    iter::Sum,
    num::ParseIntError,
    ops::{Add, AddAssign, Sub},
    str::FromStr,
};

use crate::constants::SIZE_UNLIMITED;

/// A size in bytes.
///
/// `ByteCount::UNLIMITED` is used as "no upper limit". Arithmetic saturates,
/// so adding to an unlimited value stays unlimited and subtracting never
/// wraps below zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ByteCount(pub u64);

impl From<u64> for ByteCount {
    fn from(x: u64) -> Self {
        ByteCount(x)
    }
}

impl ByteCount {
    pub const ZERO: ByteCount = ByteCount(0);
    pub const UNLIMITED: ByteCount = ByteCount(u64::MAX);

    pub const fn kib(n: u64) -> Self {
        Self(n << 10)
    }

    pub const fn mib(n: u64) -> Self {
        Self(n << 20)
    }

    pub const fn gib(n: u64) -> Self {
        Self(n << 30)
    }

    pub const fn tib(n: u64) -> Self {
        Self(n << 40)
    }

    pub fn bytes(self) -> u64 {
        self.0
    }

    pub fn is_unlimited(self) -> bool {
        self == Self::UNLIMITED
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Rounds down to a multiple of `grain`. A zero grain leaves the value as is.
    pub fn round_down(self, grain: ByteCount) -> Self {
        if grain.0 == 0 || self.is_unlimited() {
            return self;
        }
        Self(self.0 - self.0 % grain.0)
    }

    /// Rounds up to a multiple of `grain`, saturating at unlimited.
    pub fn round_up(self, grain: ByteCount) -> Self {
        if grain.0 == 0 || self.is_unlimited() {
            return self;
        }
        match self.0 % grain.0 {
            0 => self,
            rem => Self(self.0.saturating_add(grain.0 - rem)),
        }
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    pub fn to_human_readable(&self) -> String {
        if self.is_unlimited() {
            return SIZE_UNLIMITED.to_owned();
        }
        match self.0.trailing_zeros() {
            _ if self.0 == 0 => "0".to_owned(),
            0..=9 => format!("{}", self.0),
            10..=19 => format!("{}K", self.0 >> 10),
            20..=29 => format!("{}M", self.0 >> 20),
            30..=39 => format!("{}G", self.0 >> 30),
            _ => format!("{}T", self.0 >> 40),
        }
    }

    pub fn from_human_readable(mut s: &str) -> Result<Self, ParseIntError> {
        s = s.trim();
        if s == SIZE_UNLIMITED {
            return Ok(Self::UNLIMITED);
        }
        let try_parse = |val: &str, shift: u8| Ok(Self(val.trim().parse::<u64>()? << shift));
        if let Some(p) = s.strip_suffix('K') {
            try_parse(p, 10)
        } else if let Some(p) = s.strip_suffix('M') {
            try_parse(p, 20)
        } else if let Some(p) = s.strip_suffix('G') {
            try_parse(p, 30)
        } else if let Some(p) = s.strip_suffix('T') {
            try_parse(p, 40)
        } else {
            try_parse(s, 0)
        }
    }
}

impl Add for ByteCount {
    type Output = ByteCount;

    fn add(self, rhs: Self) -> Self::Output {
        ByteCount(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for ByteCount {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for ByteCount {
    type Output = ByteCount;

    fn sub(self, rhs: Self) -> Self::Output {
        self.saturating_sub(rhs)
    }
}

impl Sum for ByteCount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(ByteCount::ZERO, |acc, x| acc + x)
    }
}

impl<'a> Sum<&'a ByteCount> for ByteCount {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

impl Display for ByteCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_human_readable())
    }
}

impl FromStr for ByteCount {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_human_readable(s.trim())
    }
}

impl<'de> serde::Deserialize<'de> for ByteCount {
    fn deserialize<D>(deserializer: D) -> Result<ByteCount, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // Size may be provided as a string (e.g. "1K") or as a pure number
        // (e.g. 1024). Serde forces a number when only digits are provided, so
        // we need to deserialize as a generic value and then check the type.
        let value = serde_yaml::Value::deserialize(deserializer)?;

        match value {
            serde_yaml::Value::String(s) => ByteCount::from_str(s.as_str())
                .map_err(|e| serde::de::Error::custom(format!("invalid byte count size: {e}"))),
            serde_yaml::Value::Number(n) => {
                let n = n.as_u64().ok_or_else(|| {
                    serde::de::Error::custom("invalid byte count size, expected unsigned integer")
                })?;
                Ok(ByteCount(n))
            }
            _ => Err(serde::de::Error::custom("invalid byte count size")),
        }
    }
}

impl serde::Serialize for ByteCount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if self.0 & 0x3FF != 0 && !self.is_unlimited() {
            // If the count is not a multiple of 1024, then we must write it as
            // a raw number.
            serializer.serialize_u64(self.0)
        } else {
            serializer.serialize_str(self.to_human_readable().as_str())
        }
    }
}
