// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
//! Two-lane stereo arithmetic used by the mixer and the filters.

use std::ops::{Add, AddAssign, Mul, MulAssign, Neg, Sub};

/// One interleaved left/right frame of 16-bit fixed-point sample data.
pub type RawFrame = [i16; 2];

/// A left/right pair of values processed together.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Stereo {
    pub left: f64,
    pub right: f64,
}

impl Stereo {
    pub const ZERO: Stereo = Stereo::splat(0.0);

    pub const fn new(left: f64, right: f64) -> Self {
        Self { left, right }
    }

    pub const fn splat(value: f64) -> Self {
        Self::new(value, value)
    }

    /// Widens a fixed-point frame without rescaling.
    #[inline]
    pub fn from_raw(frame: RawFrame) -> Self {
        Self::new(f64::from(frame[0]), f64::from(frame[1]))
    }

    /// Truncates toward zero into a fixed-point frame, saturating at the i16 range.
    #[inline]
    pub fn to_raw(self) -> RawFrame {
        [self.left as i16, self.right as i16]
    }

    #[inline]
    pub fn abs(self) -> Self {
        Self::new(self.left.abs(), self.right.abs())
    }

    /// Elementwise maximum.
    #[inline]
    pub fn max(self, other: Self) -> Self {
        Self::new(self.left.max(other.left), self.right.max(other.right))
    }

    /// The larger of the two lanes.
    #[inline]
    pub fn max_lane(self) -> f64 {
        self.left.max(self.right)
    }

    #[inline]
    pub fn round(self) -> Self {
        Self::new(self.left.round(), self.right.round())
    }
}

impl Add for Stereo {
    type Output = Stereo;

    #[inline]
    fn add(self, rhs: Stereo) -> Stereo {
        Stereo::new(self.left + rhs.left, self.right + rhs.right)
    }
}

impl AddAssign for Stereo {
    #[inline]
    fn add_assign(&mut self, rhs: Stereo) {
        self.left += rhs.left;
        self.right += rhs.right;
    }
}

impl Sub for Stereo {
    type Output = Stereo;

    #[inline]
    fn sub(self, rhs: Stereo) -> Stereo {
        Stereo::new(self.left - rhs.left, self.right - rhs.right)
    }
}

impl Mul<f64> for Stereo {
    type Output = Stereo;

    #[inline]
    fn mul(self, rhs: f64) -> Stereo {
        Stereo::new(self.left * rhs, self.right * rhs)
    }
}

impl MulAssign<f64> for Stereo {
    #[inline]
    fn mul_assign(&mut self, rhs: f64) {
        self.left *= rhs;
        self.right *= rhs;
    }
}

impl Neg for Stereo {
    type Output = Stereo;

    #[inline]
    fn neg(self) -> Stereo {
        Stereo::new(-self.left, -self.right)
    }
}
