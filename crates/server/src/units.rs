//! Unit parsing and conversion for sensor measurements.
//!
//! Every unit belongs to a [`Dimension`]; conversions are only defined between
//! units of the same dimension. Linear units convert through a base unit with a
//! scale factor, temperatures additionally apply an offset.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Debug, Error, PartialEq)]
pub enum UnitError {
    #[error("Unknown unit: {0}")]
    Unknown(String),
    #[error("Cannot convert {from} to {to}: incompatible dimensions")]
    Incompatible { from: Unit, to: Unit },
    #[error("Value is not a finite number")]
    NotFinite,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Temperature,
    Pressure,
    Concentration,
    MassConcentration,
    Speed,
    Length,
    Ratio,
    SoundLevel,
    Index,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Unit {
    Celsius,
    Fahrenheit,
    Kelvin,
    Pascal,
    Hectopascal,
    Kilopascal,
    Millibar,
    Bar,
    InchOfMercury,
    MillimetreOfMercury,
    Ppm,
    Ppb,
    MicrogramPerCubicMetre,
    MilligramPerCubicMetre,
    MetrePerSecond,
    KilometrePerHour,
    MilePerHour,
    Knot,
    Millimetre,
    Centimetre,
    Metre,
    Inch,
    Percent,
    Decibel,
    Index,
}

impl Unit {
    pub const ALL: [Unit; 25] = [
        Unit::Celsius,
        Unit::Fahrenheit,
        Unit::Kelvin,
        Unit::Pascal,
        Unit::Hectopascal,
        Unit::Kilopascal,
        Unit::Millibar,
        Unit::Bar,
        Unit::InchOfMercury,
        Unit::MillimetreOfMercury,
        Unit::Ppm,
        Unit::Ppb,
        Unit::MicrogramPerCubicMetre,
        Unit::MilligramPerCubicMetre,
        Unit::MetrePerSecond,
        Unit::KilometrePerHour,
        Unit::MilePerHour,
        Unit::Knot,
        Unit::Millimetre,
        Unit::Centimetre,
        Unit::Metre,
        Unit::Inch,
        Unit::Percent,
        Unit::Decibel,
        Unit::Index,
    ];

    /// Canonical spelling, also used for storage.
    pub fn symbol(self) -> &'static str {
        match self {
            Unit::Celsius => "celsius",
            Unit::Fahrenheit => "fahrenheit",
            Unit::Kelvin => "kelvin",
            Unit::Pascal => "pa",
            Unit::Hectopascal => "hpa",
            Unit::Kilopascal => "kpa",
            Unit::Millibar => "mbar",
            Unit::Bar => "bar",
            Unit::InchOfMercury => "inhg",
            Unit::MillimetreOfMercury => "mmhg",
            Unit::Ppm => "ppm",
            Unit::Ppb => "ppb",
            Unit::MicrogramPerCubicMetre => "ug/m3",
            Unit::MilligramPerCubicMetre => "mg/m3",
            Unit::MetrePerSecond => "m/s",
            Unit::KilometrePerHour => "km/h",
            Unit::MilePerHour => "mph",
            Unit::Knot => "knots",
            Unit::Millimetre => "mm",
            Unit::Centimetre => "cm",
            Unit::Metre => "m",
            Unit::Inch => "in",
            Unit::Percent => "percent",
            Unit::Decibel => "db",
            Unit::Index => "index",
        }
    }

    pub fn dimension(self) -> Dimension {
        match self {
            Unit::Celsius | Unit::Fahrenheit | Unit::Kelvin => Dimension::Temperature,
            Unit::Pascal
            | Unit::Hectopascal
            | Unit::Kilopascal
            | Unit::Millibar
            | Unit::Bar
            | Unit::InchOfMercury
            | Unit::MillimetreOfMercury => Dimension::Pressure,
            Unit::Ppm | Unit::Ppb => Dimension::Concentration,
            Unit::MicrogramPerCubicMetre | Unit::MilligramPerCubicMetre => {
                Dimension::MassConcentration
            }
            Unit::MetrePerSecond | Unit::KilometrePerHour | Unit::MilePerHour | Unit::Knot => {
                Dimension::Speed
            }
            Unit::Millimetre | Unit::Centimetre | Unit::Metre | Unit::Inch => Dimension::Length,
            Unit::Percent => Dimension::Ratio,
            Unit::Decibel => Dimension::SoundLevel,
            Unit::Index => Dimension::Index,
        }
    }

    /// `(scale, offset)` such that `base = value * scale + offset`.
    ///
    /// Base units: kelvin, pascal, ppb, µg/m³, m/s, millimetre.
    fn to_base(self) -> (f64, f64) {
        match self {
            Unit::Celsius => (1.0, 273.15),
            Unit::Fahrenheit => (5.0 / 9.0, 273.15 - 32.0 * 5.0 / 9.0),
            Unit::Kelvin => (1.0, 0.0),
            Unit::Pascal => (1.0, 0.0),
            Unit::Hectopascal | Unit::Millibar => (100.0, 0.0),
            Unit::Kilopascal => (1_000.0, 0.0),
            Unit::Bar => (100_000.0, 0.0),
            Unit::InchOfMercury => (3_386.389, 0.0),
            Unit::MillimetreOfMercury => (133.322_387_415, 0.0),
            Unit::Ppm => (1_000.0, 0.0),
            Unit::Ppb => (1.0, 0.0),
            Unit::MicrogramPerCubicMetre => (1.0, 0.0),
            Unit::MilligramPerCubicMetre => (1_000.0, 0.0),
            Unit::MetrePerSecond => (1.0, 0.0),
            Unit::KilometrePerHour => (1.0 / 3.6, 0.0),
            Unit::MilePerHour => (0.447_04, 0.0),
            Unit::Knot => (1_852.0 / 3_600.0, 0.0),
            Unit::Millimetre => (1.0, 0.0),
            Unit::Centimetre => (10.0, 0.0),
            Unit::Metre => (1_000.0, 0.0),
            Unit::Inch => (25.4, 0.0),
            Unit::Percent | Unit::Decibel | Unit::Index => (1.0, 0.0),
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Unit {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['µ', 'μ'], "u").replace('³', "3");
        let unit = match normalized.as_str() {
            "celsius" | "c" | "°c" | "degc" | "deg_c" => Unit::Celsius,
            "fahrenheit" | "f" | "°f" | "degf" | "deg_f" => Unit::Fahrenheit,
            "kelvin" | "k" => Unit::Kelvin,
            "pa" | "pascal" => Unit::Pascal,
            "hpa" | "hectopascal" => Unit::Hectopascal,
            "kpa" | "kilopascal" => Unit::Kilopascal,
            "mbar" | "millibar" | "mb" => Unit::Millibar,
            "bar" => Unit::Bar,
            "inhg" | "in_hg" => Unit::InchOfMercury,
            "mmhg" | "mm_hg" | "torr" => Unit::MillimetreOfMercury,
            "ppm" => Unit::Ppm,
            "ppb" => Unit::Ppb,
            "ug/m3" | "ugm3" | "microgram_per_m3" => Unit::MicrogramPerCubicMetre,
            "mg/m3" | "mgm3" | "milligram_per_m3" => Unit::MilligramPerCubicMetre,
            "m/s" | "mps" => Unit::MetrePerSecond,
            "km/h" | "kmh" | "kph" => Unit::KilometrePerHour,
            "mph" => Unit::MilePerHour,
            "knots" | "knot" | "kn" | "kt" => Unit::Knot,
            "mm" | "millimetre" | "millimeter" => Unit::Millimetre,
            "cm" | "centimetre" | "centimeter" => Unit::Centimetre,
            "m" | "metre" | "meter" => Unit::Metre,
            "in" | "inch" | "inches" => Unit::Inch,
            "percent" | "%" | "%rh" | "pct" => Unit::Percent,
            "db" | "dba" | "db(a)" | "decibel" => Unit::Decibel,
            "index" | "uvi" => Unit::Index,
            _ => return Err(UnitError::Unknown(s.to_string())),
        };
        Ok(unit)
    }
}

/// Convert `value` from one unit into another of the same dimension.
pub fn convert(value: f64, from: Unit, to: Unit) -> Result<f64, UnitError> {
    if !value.is_finite() {
        return Err(UnitError::NotFinite);
    }
    if from == to {
        return Ok(value);
    }
    if from.dimension() != to.dimension() {
        return Err(UnitError::Incompatible { from, to });
    }
    let (from_scale, from_offset) = from.to_base();
    let (to_scale, to_offset) = to.to_base();
    let base = value * from_scale + from_offset;
    Ok((base - to_offset) / to_scale)
}

/// Parse both unit names and convert.
pub fn convert_str(value: f64, from: &str, to: &str) -> Result<f64, UnitError> {
    convert(value, from.parse()?, to.parse()?)
}

/// Supported units grouped by dimension, in declaration order.
pub fn catalog() -> Vec<(Dimension, Vec<&'static str>)> {
    let mut groups: Vec<(Dimension, Vec<&'static str>)> = Vec::new();
    for unit in Unit::ALL {
        match groups.iter_mut().find(|(d, _)| *d == unit.dimension()) {
            Some((_, symbols)) => symbols.push(unit.symbol()),
            None => groups.push((unit.dimension(), vec![unit.symbol()])),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn temperature_conversions() {
        assert!(approx(convert(0.0, Unit::Celsius, Unit::Fahrenheit).unwrap(), 32.0));
        assert!(approx(convert(100.0, Unit::Celsius, Unit::Fahrenheit).unwrap(), 212.0));
        assert!(approx(convert(-40.0, Unit::Fahrenheit, Unit::Celsius).unwrap(), -40.0));
        assert!(approx(convert(0.0, Unit::Kelvin, Unit::Celsius).unwrap(), -273.15));
    }

    #[test]
    fn pressure_and_speed_conversions() {
        assert!(approx(convert(1013.25, Unit::Hectopascal, Unit::Kilopascal).unwrap(), 101.325));
        assert!(approx(convert(1.0, Unit::Millibar, Unit::Hectopascal).unwrap(), 1.0));
        assert!(approx(convert(36.0, Unit::KilometrePerHour, Unit::MetrePerSecond).unwrap(), 10.0));
        assert!(approx(convert(1.0, Unit::Knot, Unit::KilometrePerHour).unwrap(), 1.852));
    }

    #[test]
    fn concentration_conversions() {
        assert!(approx(convert(1.0, Unit::Ppm, Unit::Ppb).unwrap(), 1000.0));
        assert!(approx(convert(250.0, Unit::MicrogramPerCubicMetre, Unit::MilligramPerCubicMetre).unwrap(), 0.25));
    }

    #[test]
    fn incompatible_units_are_rejected() {
        let err = convert(1.0, Unit::Celsius, Unit::Ppm).unwrap_err();
        assert_eq!(
            err,
            UnitError::Incompatible {
                from: Unit::Celsius,
                to: Unit::Ppm
            }
        );
        assert!(err.to_string().contains("celsius"));
    }

    #[test]
    fn non_finite_values_are_rejected() {
        assert_eq!(convert(f64::NAN, Unit::Celsius, Unit::Celsius), Err(UnitError::NotFinite));
        assert_eq!(convert(f64::INFINITY, Unit::Millimetre, Unit::Inch), Err(UnitError::NotFinite));
    }

    #[test]
    fn parses_aliases() {
        assert_eq!("°C".parse::<Unit>().unwrap(), Unit::Celsius);
        assert_eq!("degF".parse::<Unit>().unwrap(), Unit::Fahrenheit);
        assert_eq!("µg/m³".parse::<Unit>().unwrap(), Unit::MicrogramPerCubicMetre);
        assert_eq!(" HPA ".parse::<Unit>().unwrap(), Unit::Hectopascal);
        assert_eq!("%".parse::<Unit>().unwrap(), Unit::Percent);
        assert!(matches!("furlongs".parse::<Unit>(), Err(UnitError::Unknown(_))));
    }

    #[test]
    fn symbols_round_trip_through_parser() {
        for unit in Unit::ALL {
            assert_eq!(unit.symbol().parse::<Unit>().unwrap(), unit);
        }
    }

    #[test]
    fn catalog_groups_every_unit_once() {
        let catalog = catalog();
        let total: usize = catalog.iter().map(|(_, units)| units.len()).sum();
        assert_eq!(total, Unit::ALL.len());
        let temperature = catalog
            .iter()
            .find(|(d, _)| *d == Dimension::Temperature)
            .unwrap();
        assert_eq!(temperature.1, vec!["celsius", "fahrenheit", "kelvin"]);
    }
}
