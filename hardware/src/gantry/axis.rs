use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

/// Gantry axes, in the order the DMC controller expects their fields.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum Axis {
    /// Linear X (controller axis A), millimeters
    X,
    /// Linear Y (controller axis B), millimeters
    Y,
    /// Linear Z (controller axis C), millimeters
    Z,
    /// Rotation theta (controller axis D), degrees
    Theta,
    /// Rotation phi (controller axis E), degrees
    Phi,
}

impl Axis {
    /// Linear axes homed against their reverse limit switches.
    pub const LINEAR: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Controller axis letter used in commands like `BGA` or `MG _LRA`.
    pub fn letter(self) -> char {
        match self {
            Axis::X => 'A',
            Axis::Y => 'B',
            Axis::Z => 'C',
            Axis::Theta => 'D',
            Axis::Phi => 'E',
        }
    }

    /// Physical unit for this axis.
    pub fn unit(self) -> &'static str {
        match self {
            Axis::X | Axis::Y | Axis::Z => "mm",
            Axis::Theta | Axis::Phi => "deg",
        }
    }

    /// Iterate axes in controller order (A through E).
    pub fn all() -> impl Iterator<Item = Axis> {
        Axis::iter()
    }
}

/// One value per gantry axis.
///
/// Used for step positions (`Axes<i64>`), physical positions (`Axes<f64>`),
/// speeds, and absolute targets where `None` leaves an axis in place
/// (`Axes<Option<f64>>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Axes<T> {
    pub x: T,
    pub y: T,
    pub z: T,
    pub theta: T,
    pub phi: T,
}

/// Raw controller step counts.
pub type StepPosition = Axes<i64>;

/// Millimeters for x/y/z, degrees for theta/phi.
pub type PhysicalPosition = Axes<f64>;

/// Per-axis speeds in steps per second.
pub type AxisSpeeds = Axes<f64>;

/// Absolute move target in physical units; `None` axes stay where they are.
pub type AxisTargets = Axes<Option<f64>>;

impl<T> Axes<T> {
    pub const fn new(x: T, y: T, z: T, theta: T, phi: T) -> Self {
        Self {
            x,
            y,
            z,
            theta,
            phi,
        }
    }

    pub fn get(&self, axis: Axis) -> &T {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
            Axis::Z => &self.z,
            Axis::Theta => &self.theta,
            Axis::Phi => &self.phi,
        }
    }

    pub fn get_mut(&mut self, axis: Axis) -> &mut T {
        match axis {
            Axis::X => &mut self.x,
            Axis::Y => &mut self.y,
            Axis::Z => &mut self.z,
            Axis::Theta => &mut self.theta,
            Axis::Phi => &mut self.phi,
        }
    }

    /// Apply `f` to every axis value, passing the axis along.
    pub fn map<U>(self, mut f: impl FnMut(Axis, T) -> U) -> Axes<U> {
        Axes {
            x: f(Axis::X, self.x),
            y: f(Axis::Y, self.y),
            z: f(Axis::Z, self.z),
            theta: f(Axis::Theta, self.theta),
            phi: f(Axis::Phi, self.phi),
        }
    }

    /// Values in controller order.
    pub fn to_array(self) -> [T; 5] {
        [self.x, self.y, self.z, self.theta, self.phi]
    }

    /// Build from values in controller order.
    pub fn from_array([x, y, z, theta, phi]: [T; 5]) -> Self {
        Self::new(x, y, z, theta, phi)
    }
}

impl<T: Copy> Axes<T> {
    /// Same value on every axis.
    pub const fn splat(value: T) -> Self {
        Self::new(value, value, value, value, value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Axis, T)> + '_ {
        Axis::all().map(move |axis| (axis, *self.get(axis)))
    }
}

impl<T: std::fmt::Display> Axes<T> {
    /// Comma-separated fields in controller order, as used by `DP`, `PR`, `SP` etc.
    pub fn to_command_fields(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.x, self.y, self.z, self.theta, self.phi
        )
    }
}

impl Axes<i64> {
    /// Component-wise sum.
    pub fn offset_by(self, delta: Axes<i64>) -> Axes<i64> {
        Axes::new(
            self.x + delta.x,
            self.y + delta.y,
            self.z + delta.z,
            self.theta + delta.theta,
            self.phi + delta.phi,
        )
    }

    /// Negate every component.
    pub fn reversed(self) -> Axes<i64> {
        self.map(|_, v| -v)
    }

    pub fn is_zero(&self) -> bool {
        self.to_array().iter().all(|&v| v == 0)
    }
}

impl Axes<Option<f64>> {
    /// Target that leaves every axis in place.
    pub const fn unchanged() -> Self {
        Self::splat(None)
    }

    /// Target only the given axis.
    pub fn only(axis: Axis, value: f64) -> Self {
        let mut targets = Self::unchanged();
        *targets.get_mut(axis) = Some(value);
        targets
    }
}

impl std::fmt::Display for Axes<i64> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({})", self.to_command_fields())
    }
}
