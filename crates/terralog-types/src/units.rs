//! Unit systems, unit groups, and value conversion.
//!
//! A store is tagged with one [`UnitSystem`] at creation and every record
//! in it is expressed in that system for the life of the store. Transfers
//! between stores with differing systems convert each observation through
//! its [`UnitGroup`].

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::types::{ArchiveRecord, Value};

/// mbar per inch of mercury.
const MBAR_PER_INHG: f64 = 33.86389;
/// m/s per mile per hour.
const MPS_PER_MPH: f64 = 0.44704;
/// m/s per kilometre per hour.
const MPS_PER_KPH: f64 = 1.0 / 3.6;
/// mm per inch.
const MM_PER_INCH: f64 = 25.4;
/// mm per centimetre.
const MM_PER_CM: f64 = 10.0;

/// The unit system a store's values are expressed in.
///
/// The numeric tags are the on-disk representation and must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(i64)]
pub enum UnitSystem {
    /// US customary: °F, inHg, mph, inches.
    Us = 1,
    /// Metric: °C, mbar, km/h, centimetres.
    Metric = 16,
    /// Metric with meteorological wind/rain units: °C, mbar, m/s, millimetres.
    MetricWx = 17,
}

impl UnitSystem {
    /// On-disk tag of the system.
    pub fn tag(self) -> i64 {
        self as i64
    }
}

impl TryFrom<i64> for UnitSystem {
    type Error = TypeError;

    fn try_from(tag: i64) -> Result<Self, Self::Error> {
        match tag {
            1 => Ok(UnitSystem::Us),
            16 => Ok(UnitSystem::Metric),
            17 => Ok(UnitSystem::MetricWx),
            other => Err(TypeError::UnknownUnitSystem(other)),
        }
    }
}

impl fmt::Display for UnitSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitSystem::Us => write!(f, "US"),
            UnitSystem::Metric => write!(f, "METRIC"),
            UnitSystem::MetricWx => write!(f, "METRICWX"),
        }
    }
}

/// Physical quantity group an observation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum UnitGroup {
    /// Temperatures: °F in US, °C in the metric systems.
    Temperature,
    /// Barometric pressures: inHg in US, mbar in the metric systems.
    Pressure,
    /// Speeds: mph in US, km/h in METRIC, m/s in METRICWX.
    Speed,
    /// Precipitation depths: inches in US, cm in METRIC, mm in METRICWX.
    Rain,
    /// Relative percentages; identical in every system.
    Percent,
    /// Concentrations (ppm, Bq/m³); identical in every system.
    Concentration,
}

/// Unit group of a stock observation column, by name.
///
/// Unknown observations return `None` and are copied verbatim by the
/// transfer engine.
pub fn unit_group_for(observation: &str) -> Option<UnitGroup> {
    match observation {
        "temperature" | "dew_point" | "heat_index" | "wind_chill" => Some(UnitGroup::Temperature),
        "pressure" | "barometer" | "altimeter" => Some(UnitGroup::Pressure),
        "wind_speed" | "wind_gust" => Some(UnitGroup::Speed),
        "rain" | "rain_rate" => Some(UnitGroup::Rain),
        "humidity" => Some(UnitGroup::Percent),
        "co2" | "radon" => Some(UnitGroup::Concentration),
        _ => None,
    }
}

/// Display label of a group's unit in a system.
pub fn unit_label(group: UnitGroup, system: UnitSystem) -> &'static str {
    match (group, system) {
        (UnitGroup::Temperature, UnitSystem::Us) => "°F",
        (UnitGroup::Temperature, _) => "°C",
        (UnitGroup::Pressure, UnitSystem::Us) => "inHg",
        (UnitGroup::Pressure, _) => "mbar",
        (UnitGroup::Speed, UnitSystem::Us) => "mph",
        (UnitGroup::Speed, UnitSystem::Metric) => "km/h",
        (UnitGroup::Speed, UnitSystem::MetricWx) => "m/s",
        (UnitGroup::Rain, UnitSystem::Us) => "in",
        (UnitGroup::Rain, UnitSystem::Metric) => "cm",
        (UnitGroup::Rain, UnitSystem::MetricWx) => "mm",
        (UnitGroup::Percent, _) => "%",
        (UnitGroup::Concentration, _) => "ppm",
    }
}

/// Convert a numeric value between unit systems within a group.
///
/// Groups whose unit is identical in both systems pass the value through.
///
/// # Examples
///
/// ```
/// use terralog_types::{convert, UnitGroup, UnitSystem};
///
/// let c = convert(100.0, UnitGroup::Temperature, UnitSystem::Us, UnitSystem::Metric);
/// assert!((c - 37.7778).abs() < 0.001);
/// ```
pub fn convert(value: f64, group: UnitGroup, from: UnitSystem, to: UnitSystem) -> f64 {
    if from == to {
        return value;
    }
    match group {
        UnitGroup::Temperature => match (from, to) {
            (UnitSystem::Us, _) => (value - 32.0) * 5.0 / 9.0,
            (_, UnitSystem::Us) => value * 9.0 / 5.0 + 32.0,
            _ => value,
        },
        UnitGroup::Pressure => match (from, to) {
            (UnitSystem::Us, _) => value * MBAR_PER_INHG,
            (_, UnitSystem::Us) => value / MBAR_PER_INHG,
            _ => value,
        },
        UnitGroup::Speed => {
            // Through m/s as the canonical unit.
            let mps = match from {
                UnitSystem::Us => value * MPS_PER_MPH,
                UnitSystem::Metric => value * MPS_PER_KPH,
                UnitSystem::MetricWx => value,
            };
            match to {
                UnitSystem::Us => mps / MPS_PER_MPH,
                UnitSystem::Metric => mps / MPS_PER_KPH,
                UnitSystem::MetricWx => mps,
            }
        }
        UnitGroup::Rain => {
            // Through mm as the canonical unit.
            let mm = match from {
                UnitSystem::Us => value * MM_PER_INCH,
                UnitSystem::Metric => value * MM_PER_CM,
                UnitSystem::MetricWx => value,
            };
            match to {
                UnitSystem::Us => mm / MM_PER_INCH,
                UnitSystem::Metric => mm / MM_PER_CM,
                UnitSystem::MetricWx => mm,
            }
        }
        UnitGroup::Percent | UnitGroup::Concentration => value,
    }
}

/// Convert every convertible observation of a record between unit systems.
///
/// Numeric values in a known group convert to [`Value::Real`]; null and
/// text values, and observations without a unit group, pass through
/// untouched. Identity-group values keep their original representation.
pub fn convert_record(record: &ArchiveRecord, from: UnitSystem, to: UnitSystem) -> ArchiveRecord {
    if from == to {
        return record.clone();
    }

    let mut out = ArchiveRecord::new(record.timestamp);
    for (name, value) in &record.values {
        let converted = match (unit_group_for(name), value.as_f64()) {
            (Some(group), Some(v)) => {
                let c = convert(v, group, from, to);
                if c == v {
                    value.clone()
                } else {
                    Value::Real(c)
                }
            }
            _ => value.clone(),
        };
        out.values.insert(name.clone(), converted);
    }
    out
}
