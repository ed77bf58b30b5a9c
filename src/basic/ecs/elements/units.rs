use std::marker::PhantomData;

use bevy_ecs::component::Component;
use derive_more::derive::{Deref, DerefMut, From, Into};
use serde::{Deserialize, Serialize};

/// Macro for defining a new unit marker component.
///
/// The marker implements [`UnitTrait`] with a display suffix, e.g.
/// `define_unit!(Watt, "w")`.
macro_rules! define_unit {
    ($unit:ident, $suffix:literal) => {
        #[derive(Component, Debug, Default, Serialize, Deserialize, Clone)]
        pub struct $unit;

        impl UnitTrait for $unit {
            const SUFFIX: &'static str = $suffix;

            fn suffix() -> &'static str {
                Self::SUFFIX
            }
        }
    };
}

/// A quantity paired with a compile-time unit marker.
///
/// Keeps SI and per-unit values from mixing silently in element
/// components: a `Pair<f64, Volt>` cannot be handed where a
/// `Pair<f64, PerUnit>` is expected.
#[derive(Component, Debug, Default, Serialize, Deserialize, Clone, From, Into, Deref, DerefMut)]
#[serde(transparent)]
pub struct Pair<T, Unit>(
    pub T,
    #[deref(ignore)]
    #[deref_mut(ignore)]
    pub PhantomData<Unit>,
);

impl<T, Unit> Pair<T, Unit> {
    pub fn new(value: T) -> Self {
        Pair(value, PhantomData)
    }
}

/// Trait for unit marker types, providing the display suffix.
pub trait UnitTrait {
    const SUFFIX: &'static str;

    fn suffix() -> &'static str {
        Self::SUFFIX
    }
}

// SI units the network description speaks in, plus the dimensionless one.
define_unit!(Volt, "v");
define_unit!(Watt, "w");
define_unit!(Var, "var");
define_unit!(Ohm, "ohm");
define_unit!(Siemens, "s");
define_unit!(Degree, "deg");
define_unit!(PerUnit, "pu");

impl<T, Unit: UnitTrait> UnitTrait for Pair<T, Unit> {
    fn suffix() -> &'static str {
        Unit::suffix()
    }

    const SUFFIX: &'static str = Unit::SUFFIX;
}

/// Min/max bounds on a value.
#[derive(Debug, Component, Serialize, Deserialize, Clone)]
pub struct Limit<T> {
    pub min: T,
    pub max: T,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_suffixes() {
        assert_eq!(Volt::suffix(), "v");
        assert_eq!(<Pair<f64, Watt>>::suffix(), "w");
    }

    #[test]
    fn pair_round_trips_through_serde() {
        let p: Pair<f64, Volt> = Pair::new(230.0);
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, "230.0");
        let back: Pair<f64, Volt> = serde_json::from_str(&json).unwrap();
        assert_eq!(*back, 230.0);
    }
}
