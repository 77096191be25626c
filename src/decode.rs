//! Register semantics: turning raw register words into labelled readings.

use num_derive::FromPrimitive;
use strum::IntoStaticStr;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("payload of {0} bytes cannot be grouped into whole 16-bit words")]
    OddPayload(usize),
    #[error("register {address:#06x} holds no known {field} code: {value:#x}")]
    UnknownCode {
        address: u16,
        field: &'static str,
        value: u64,
    },
}

/// Merge response payload bytes into one integer.
///
/// Each byte pair is big-endian, but for multi-word values the device sends
/// the low word at the lower address, so the pair order is reversed before
/// folding: the trailing pair ends up in the most significant position.
pub fn combine_words(payload: &[u8]) -> Result<u64, DecodeError> {
    if payload.len() % 2 != 0 {
        return Err(DecodeError::OddPayload(payload.len()));
    }
    let mut combined = 0u64;
    for pair in payload.chunks_exact(2).rev() {
        combined = (combined << 16) | u64::from(u16::from_be_bytes([pair[0], pair[1]]));
    }
    Ok(combined)
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
    /// A scaled physical quantity.
    Number(f64),
    /// A raw counter or code passed through unscaled.
    Integer(u64),
    /// A label from a closed enumeration or a flag's label pair.
    Label(&'static str),
    /// A single status bit.
    Flag(bool),
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Value::Number(n) => f.write_fmt(format_args!("{}", n)),
            Value::Integer(n) => f.write_fmt(format_args!("{}", n)),
            Value::Label(s) => f.write_str(s),
            Value::Flag(b) => f.write_str(if b { "true" } else { "false" }),
        }
    }
}

impl serde::Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match *self {
            Value::Number(n) => serializer.serialize_f64(n),
            Value::Integer(n) => serializer.serialize_u64(n),
            Value::Label(s) => serializer.serialize_str(s),
            Value::Flag(b) => serializer.serialize_bool(b),
        }
    }
}

/// One decoded quantity. Composite registers produce several of these, all
/// carrying the same source address but distinct unit labels.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize)]
pub struct Reading {
    pub address: u16,
    pub unit: &'static str,
    pub value: Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive, IntoStaticStr)]
pub enum ChargingMode {
    #[strum(serialize = "Connect/Disconnect")]
    ConnectDisconnect = 0x00,
    #[strum(serialize = "PWM")]
    Pwm = 0x01,
    #[strum(serialize = "MPPT")]
    Mppt = 0x02,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive, IntoStaticStr)]
pub enum BatteryType {
    #[strum(serialize = "User defined")]
    UserDefined = 0x00,
    #[strum(serialize = "Sealed")]
    Sealed = 0x01,
    #[strum(serialize = "Gel")]
    Gel = 0x02,
    #[strum(serialize = "Flooded")]
    Flooded = 0x03,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive, IntoStaticStr)]
pub enum LoadControlMode {
    #[strum(serialize = "Manual control")]
    ManualControl = 0x00,
    #[strum(serialize = "Light ON/OFF")]
    LightOnOff = 0x01,
    #[strum(serialize = "Light ON + timer")]
    LightOnTimer = 0x02,
    #[strum(serialize = "Time control")]
    TimeControl = 0x03,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive, IntoStaticStr)]
pub enum ManagementMode {
    #[strum(serialize = "Voltage compensation")]
    VoltageCompensation = 0x00,
    #[strum(serialize = "SOC")]
    StateOfCharge = 0x01,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive, IntoStaticStr)]
pub enum RatedVoltageCode {
    #[strum(serialize = "Auto recognize")]
    AutoRecognize = 0x00,
    #[strum(serialize = "12V")]
    Volt12 = 0x01,
    #[strum(serialize = "24V")]
    Volt24 = 0x02,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive, IntoStaticStr)]
pub enum TimerSelection {
    #[strum(serialize = "Using one timer")]
    OneTimer = 0x00,
    #[strum(serialize = "Using two timers")]
    TwoTimers = 0x01,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive, IntoStaticStr)]
pub enum ManualMode {
    #[strum(serialize = "Auto")]
    Auto = 0x00,
    #[strum(serialize = "Manual")]
    Manual = 0x01,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive, IntoStaticStr)]
pub enum TestMode {
    #[strum(serialize = "Enabled")]
    Enabled = 0x00,
    #[strum(serialize = "Disabled")]
    Disabled = 0x01,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive, IntoStaticStr)]
pub enum BatteryVoltageStatus {
    #[strum(serialize = "Normal")]
    Normal = 0x00,
    #[strum(serialize = "Over volt")]
    OverVolt = 0x01,
    #[strum(serialize = "Under volt")]
    UnderVolt = 0x02,
    #[strum(serialize = "Low volt disconnect")]
    LowVoltDisconnect = 0x03,
    #[strum(serialize = "Fault")]
    Fault = 0x04,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive, IntoStaticStr)]
pub enum BatteryTemperatureStatus {
    #[strum(serialize = "Normal")]
    Normal = 0x00,
    #[strum(serialize = "Higher than warning settings")]
    OverTemperature = 0x01,
    #[strum(serialize = "Lower than warning settings")]
    LowTemperature = 0x02,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive, IntoStaticStr)]
pub enum ChargingInputVoltStatus {
    #[strum(serialize = "Normal")]
    Normal = 0x00,
    #[strum(serialize = "Low")]
    Low = 0x01,
    #[strum(serialize = "High")]
    High = 0x02,
    #[strum(serialize = "No access, input volt error")]
    NoAccess = 0x03,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive, IntoStaticStr)]
pub enum OutputPowerLoad {
    #[strum(serialize = "Light load")]
    Light = 0x00,
    #[strum(serialize = "Moderate")]
    Moderate = 0x01,
    #[strum(serialize = "Rated")]
    Rated = 0x02,
    #[strum(serialize = "Overload")]
    Overload = 0x03,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive, IntoStaticStr)]
pub enum DischargingInputVoltStatus {
    #[strum(serialize = "Normal")]
    Normal = 0x00,
    #[strum(serialize = "No power connected")]
    NoPower = 0x01,
    #[strum(serialize = "Higher volt input")]
    HigherVolt = 0x02,
    #[strum(serialize = "Input volt error")]
    VoltError = 0x03,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive, IntoStaticStr)]
pub enum ChargingStage {
    #[strum(serialize = "No charging")]
    NotCharging = 0x00,
    #[strum(serialize = "Float")]
    Float = 0x01,
    #[strum(serialize = "Boost")]
    Boost = 0x02,
    #[strum(serialize = "Equalization")]
    Equalization = 0x03,
}

fn enumerated<E: num_traits::FromPrimitive>(
    address: u16,
    field: &'static str,
    value: u64,
) -> Result<E, DecodeError> {
    E::from_u64(value).ok_or(DecodeError::UnknownCode { address, field, value })
}

fn scaled(address: u16, unit: &'static str, raw: u64, scale: Option<u32>) -> Reading {
    let value = match scale {
        Some(scale) => Value::Number(raw as f64 / f64::from(scale)),
        None => Value::Integer(raw),
    };
    Reading { address, unit, value }
}

fn label<E>(address: u16, unit: &'static str, raw: u64) -> Result<Reading, DecodeError>
where
    E: num_traits::FromPrimitive + Into<&'static str>,
{
    let code: E = enumerated(address, unit, raw)?;
    Ok(Reading { address, unit, value: Value::Label(code.into()) })
}

fn flag(address: u16, unit: &'static str, raw: u64, on: &'static str, off: &'static str) -> Reading {
    Reading {
        address,
        unit,
        value: Value::Label(if raw == 1 { on } else { off }),
    }
}

fn bit(address: u16, unit: &'static str, raw: u64, position: u32) -> Reading {
    Reading {
        address,
        unit,
        value: Value::Flag((raw >> position) & 1 == 1),
    }
}

/// The 16-bit value packs a pair of byte-wide quantities, high byte first.
fn byte_pair(address: u16, raw: u64, high: &'static str, low: &'static str) -> Vec<Reading> {
    vec![
        Reading { address, unit: high, value: Value::Integer((raw >> 8) & 0xFF) },
        Reading { address, unit: low, value: Value::Integer(raw & 0xFF) },
    ]
}

/// Battery real-time state. D3-D0 voltage state, D7-D4 temperature state,
/// D8 inner resistance abnormal, D15 wrong rated voltage identification.
fn battery_status(address: u16, raw: u64) -> Result<Vec<Reading>, DecodeError> {
    Ok(vec![
        label::<BatteryVoltageStatus>(address, "battery voltage status", raw & 0x000F)?,
        label::<BatteryTemperatureStatus>(address, "battery temperature status", (raw >> 4) & 0x000F)?,
        bit(address, "battery inner resistance abnormal", raw, 8),
        bit(address, "wrong rated voltage identification", raw, 15),
    ])
}

/// Charging equipment state. D15-D14 input volt status, D13-D12 output
/// power, then individual fault bits down to D0 (running).
fn charging_status(address: u16, raw: u64) -> Result<Vec<Reading>, DecodeError> {
    let mut readings = vec![
        label::<ChargingInputVoltStatus>(address, "charging input volt status", (raw >> 14) & 0b11)?,
        label::<OutputPowerLoad>(address, "output power", (raw >> 12) & 0b11)?,
    ];
    let bits: &[(&'static str, u32)] = &[
        ("short circuit", 11),
        ("unable to discharge", 10),
        ("unable to stop discharging", 9),
        ("output voltage abnormal", 8),
        ("input overpressure", 7),
        ("high voltage side short circuit", 6),
        ("boost overpressure", 5),
        ("output overpressure", 4),
        ("fault", 1),
        ("running", 0),
    ];
    readings.extend(bits.iter().map(|&(unit, position)| bit(address, unit, raw, position)));
    Ok(readings)
}

/// Discharging equipment state. D15-D14 input volt status, fault bits down
/// to D4, D3-D2 charging stage, D1 fault, D0 running. Bits 5 and 6 are
/// reserved by the device and ignored here.
fn discharging_status(address: u16, raw: u64) -> Result<Vec<Reading>, DecodeError> {
    let mut readings = vec![label::<DischargingInputVoltStatus>(
        address,
        "discharging input volt status",
        (raw >> 14) & 0b11,
    )?];
    let bits: &[(&'static str, u32)] = &[
        ("charging MOSFET short", 13),
        ("charging or anti-reverse MOSFET short", 12),
        ("anti-reverse MOSFET short", 11),
        ("input over current", 10),
        ("load over current", 9),
        ("load short", 8),
        ("load MOSFET short", 7),
        ("PV input short", 4),
    ];
    readings.extend(bits.iter().map(|&(unit, position)| bit(address, unit, raw, position)));
    readings.push(label::<ChargingStage>(address, "charging stage", (raw >> 2) & 0b11)?);
    readings.push(bit(address, "fault", raw, 1));
    readings.push(bit(address, "running", raw, 0));
    Ok(readings)
}

/// Which interpretation a catalog entry assigns to its raw value.
///
/// A tagged enum rather than a table of function pointers so the dispatch
/// below is checked for exhaustiveness.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, strum::Display)]
pub enum Decoder {
    Volts,
    Amps,
    Watts,
    DegreesCelsius,
    Percent,
    KilowattHours,
    AmpHours,
    TemperatureCoefficient,
    Seconds,
    Minutes,
    Hours,
    ChargingMode,
    BatteryType,
    LoadControlMode,
    ManagementMode,
    RatedVoltageCode,
    TimerSelection,
    ManualMode,
    TestMode,
    LoadSwitch,
    OverTemperature,
    DayNight,
    HourMinute,
    MinuteSecond,
    DayHour,
    YearMonth,
    BatteryStatus,
    ChargingStatus,
    DischargingStatus,
}

impl Decoder {
    /// Interpret one combined raw value. Most registers produce a single
    /// reading; byte-pair and status registers fan out into several.
    pub fn decode(
        self,
        address: u16,
        raw: u64,
        scale: Option<u32>,
    ) -> Result<Vec<Reading>, DecodeError> {
        Ok(match self {
            Decoder::Volts => vec![scaled(address, "volts", raw, scale)],
            Decoder::Amps => vec![scaled(address, "amps", raw, scale)],
            Decoder::Watts => vec![scaled(address, "watts", raw, scale)],
            Decoder::DegreesCelsius => vec![scaled(address, "degrees C", raw, scale)],
            Decoder::Percent => vec![scaled(address, "percent", raw, scale)],
            Decoder::KilowattHours => vec![scaled(address, "kwh", raw, scale)],
            Decoder::AmpHours => vec![scaled(address, "ah", raw, scale)],
            Decoder::TemperatureCoefficient => vec![scaled(address, "mV/C/2", raw, scale)],
            Decoder::Seconds => vec![scaled(address, "seconds", raw, scale)],
            Decoder::Minutes => vec![scaled(address, "minutes", raw, scale)],
            Decoder::Hours => vec![scaled(address, "hours", raw, scale)],
            Decoder::ChargingMode => vec![label::<ChargingMode>(address, "charging mode", raw)?],
            Decoder::BatteryType => vec![label::<BatteryType>(address, "battery type", raw)?],
            Decoder::LoadControlMode => {
                vec![label::<LoadControlMode>(address, "load control mode", raw)?]
            }
            Decoder::ManagementMode => {
                vec![label::<ManagementMode>(address, "management mode", raw)?]
            }
            Decoder::RatedVoltageCode => {
                vec![label::<RatedVoltageCode>(address, "rated voltage code", raw)?]
            }
            Decoder::TimerSelection => {
                vec![label::<TimerSelection>(address, "timer selection", raw)?]
            }
            Decoder::ManualMode => vec![label::<ManualMode>(address, "manual mode", raw)?],
            Decoder::TestMode => vec![label::<TestMode>(address, "test mode", raw)?],
            Decoder::LoadSwitch => vec![flag(address, "load switch", raw, "On", "Off")],
            Decoder::OverTemperature => vec![flag(address, "over temperature", raw, "Yes", "No")],
            Decoder::DayNight => vec![flag(address, "day or night", raw, "Night", "Day")],
            Decoder::HourMinute => byte_pair(address, raw, "hour", "minute"),
            Decoder::MinuteSecond => byte_pair(address, raw, "minute", "second"),
            Decoder::DayHour => byte_pair(address, raw, "day", "hour"),
            Decoder::YearMonth => byte_pair(address, raw, "year", "month"),
            Decoder::BatteryStatus => battery_status(address, raw)?,
            Decoder::ChargingStatus => charging_status(address, raw)?,
            Decoder::DischargingStatus => discharging_status(address, raw)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_combine_with_the_trailing_pair_most_significant() {
        assert_eq!(combine_words(&[0x01, 0x02, 0x03, 0x04]).unwrap(), (0x0304 << 16) | 0x0102);
        assert_eq!(combine_words(&[0x12, 0x34]).unwrap(), 0x1234);
        assert_eq!(combine_words(&[]).unwrap(), 0);
    }

    #[test]
    fn odd_length_payload_is_a_decode_error() {
        assert_eq!(combine_words(&[0x01, 0x02, 0x03]), Err(DecodeError::OddPayload(3)));
    }

    #[test]
    fn scaled_quantities_divide_by_their_scale() {
        let readings = Decoder::Volts.decode(0x331A, 1284, Some(100)).unwrap();
        assert_eq!(
            readings,
            vec![Reading { address: 0x331A, unit: "volts", value: Value::Number(12.84) }]
        );
    }

    #[test]
    fn absent_scale_passes_the_raw_value_through() {
        let readings = Decoder::Percent.decode(0x311A, 87, None).unwrap();
        assert_eq!(readings[0].value, Value::Integer(87));
        let readings = Decoder::AmpHours.decode(0x9001, 200, None).unwrap();
        assert_eq!(readings[0].value, Value::Integer(200));
    }

    #[test]
    fn every_charging_mode_code_maps_to_its_label() {
        let labels = ["Connect/Disconnect", "PWM", "MPPT"];
        for (code, expected) in labels.into_iter().enumerate() {
            let readings = Decoder::ChargingMode.decode(0x3008, code as u64, None).unwrap();
            assert_eq!(readings[0].value, Value::Label(expected));
        }
    }

    #[test]
    fn unknown_battery_type_code_names_the_value() {
        let error = Decoder::BatteryType.decode(0x9000, 0x04, None).unwrap_err();
        assert_eq!(
            error,
            DecodeError::UnknownCode { address: 0x9000, field: "battery type", value: 0x04 }
        );
    }

    #[test]
    fn unknown_charging_mode_code_is_rejected() {
        let error = Decoder::ChargingMode.decode(0x3008, 0x03, None).unwrap_err();
        assert!(matches!(error, DecodeError::UnknownCode { value: 0x03, .. }));
    }

    #[test]
    fn byte_pair_registers_split_into_two_readings() {
        let readings = Decoder::HourMinute.decode(0x903E, 0x0A1E, None).unwrap();
        assert_eq!(
            readings,
            vec![
                Reading { address: 0x903E, unit: "hour", value: Value::Integer(10) },
                Reading { address: 0x903E, unit: "minute", value: Value::Integer(30) },
            ]
        );
    }

    #[test]
    fn flags_render_their_domain_labels() {
        let night = Decoder::DayNight.decode(0x200C, 1, None).unwrap();
        assert_eq!(night[0].value, Value::Label("Night"));
        let day = Decoder::DayNight.decode(0x200C, 0, None).unwrap();
        assert_eq!(day[0].value, Value::Label("Day"));
        let on = Decoder::LoadSwitch.decode(0x0006, 1, None).unwrap();
        assert_eq!(on[0].value, Value::Label("On"));
    }

    #[test]
    fn battery_status_splits_into_its_documented_fields() {
        // D15 set, D8 set, temperature high (D7-D4 = 1), voltage under (D3-D0 = 2).
        let readings = Decoder::BatteryStatus.decode(0x3200, 0b1000_0001_0001_0010, None).unwrap();
        assert_eq!(
            readings,
            vec![
                Reading {
                    address: 0x3200,
                    unit: "battery voltage status",
                    value: Value::Label("Under volt"),
                },
                Reading {
                    address: 0x3200,
                    unit: "battery temperature status",
                    value: Value::Label("Higher than warning settings"),
                },
                Reading {
                    address: 0x3200,
                    unit: "battery inner resistance abnormal",
                    value: Value::Flag(true),
                },
                Reading {
                    address: 0x3200,
                    unit: "wrong rated voltage identification",
                    value: Value::Flag(true),
                },
            ]
        );
    }

    #[test]
    fn battery_status_rejects_an_unknown_voltage_state() {
        let error = Decoder::BatteryStatus.decode(0x3200, 0x0005, None).unwrap_err();
        assert_eq!(
            error,
            DecodeError::UnknownCode {
                address: 0x3200,
                field: "battery voltage status",
                value: 0x05,
            }
        );
    }

    #[test]
    fn charging_status_exercises_true_and_false_bits() {
        // Input volt high (D15-D14 = 2), rated load (D13-D12 = 2), short
        // circuit (D11) and running (D0) set, everything else clear.
        let raw = (0b10 << 14) | (0b10 << 12) | (1 << 11) | 1;
        let readings = Decoder::ChargingStatus.decode(0x3201, raw, None).unwrap();
        assert_eq!(readings.len(), 12);
        assert_eq!(readings[0].value, Value::Label("High"));
        assert_eq!(readings[1].value, Value::Label("Rated"));
        let by_unit = |unit: &str| readings.iter().find(|r| r.unit == unit).unwrap().value;
        assert_eq!(by_unit("short circuit"), Value::Flag(true));
        assert_eq!(by_unit("running"), Value::Flag(true));
        assert_eq!(by_unit("fault"), Value::Flag(false));
        assert_eq!(by_unit("boost overpressure"), Value::Flag(false));
    }

    #[test]
    fn discharging_status_ignores_the_reserved_bits() {
        // Bits 5 and 6 set; they are undocumented and must not surface.
        let raw = (1 << 6) | (1 << 5) | (0b10 << 2) | 1;
        let readings = Decoder::DischargingStatus.decode(0x3202, raw, None).unwrap();
        assert_eq!(readings.len(), 12);
        let by_unit = |unit: &str| readings.iter().find(|r| r.unit == unit).unwrap().value;
        assert_eq!(by_unit("charging stage"), Value::Label("Boost"));
        assert_eq!(by_unit("running"), Value::Flag(true));
        assert_eq!(by_unit("fault"), Value::Flag(false));
        assert!(readings.iter().all(|r| r.address == 0x3202));
    }

    #[test]
    fn thirty_two_bit_counters_stay_unsigned() {
        let raw = combine_words(&[0xFF, 0xFF, 0xFF, 0xFF]).unwrap();
        let readings = Decoder::KilowattHours.decode(0x330A, raw, Some(100)).unwrap();
        assert_eq!(readings[0].value, Value::Number(u32::MAX as f64 / 100.0));
    }
}
