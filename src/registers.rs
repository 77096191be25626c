use crate::decode::Decoder;
use crate::modbus;

/// Handle into the catalog's parallel tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegisterIndex(usize);

impl RegisterIndex {
    pub fn from_address(address: u16) -> Option<RegisterIndex> {
        let index = ADDRESSES.partition_point(|v| *v < address);
        (ADDRESSES.get(index) == Some(&address)).then_some(Self(index))
    }

    pub fn from_name(name: &str) -> Option<RegisterIndex> {
        let index = NAMES.iter().position(|v| v.eq_ignore_ascii_case(name));
        index.map(Self)
    }

    /// Every catalog entry, in ascending address order. Full poll passes and
    /// listings rely on this ordering being stable.
    pub fn all() -> impl Iterator<Item = RegisterIndex> {
        (0..ADDRESSES.len()).map(Self)
    }

    pub fn address(&self) -> u16 {
        ADDRESSES[self.0]
    }

    pub fn name(&self) -> &'static str {
        NAMES[self.0]
    }

    pub fn decoder(&self) -> Decoder {
        DECODERS[self.0]
    }

    pub fn scale(&self) -> Option<u32> {
        SCALES[self.0]
    }

    /// How many 16-bit words the device returns for this register; the
    /// request must ask for exactly this many.
    pub fn word_count(&self) -> u8 {
        WORD_COUNTS[self.0]
    }

    pub fn description(&self) -> &'static str {
        DESCRIPTIONS[self.0]
    }

    pub fn function_code(&self) -> Result<modbus::FunctionCode, modbus::InvalidAddress> {
        modbus::function_code(self.address())
    }
}

macro_rules! for_each_register {
    ($m:ident) => {
        $m! {
            // Coils
            0x0002: ManualMode, 1, "Manual control the load";
            0x0005: TestMode, 1, "Enable load test mode";
            0x0006: LoadSwitch, 1, "Force the load on/off";
            // Discrete inputs
            0x2000: OverTemperature, 1, "Over temperature inside the device";
            0x200C: DayNight, 1, "Night";
            // Input registers: rated parameters
            0x3000: Volts, 1, "Charging equipment rated input voltage", scale = 100;
            0x3001: Amps, 1, "Charging equipment rated input current", scale = 100;
            0x3002: Watts, 2, "Charging equipment rated input power", scale = 100;
            0x3004: Volts, 1, "Charging equipment rated output voltage", scale = 100;
            0x3005: Amps, 1, "Charging equipment rated output current", scale = 100;
            0x3006: Watts, 2, "Charging equipment rated output power", scale = 100;
            0x3008: ChargingMode, 1, "Charging mode";
            0x300E: Amps, 1, "Rated output current of load", scale = 100;
            // Input registers: real-time telemetry
            0x3100: Volts, 1, "Charging equipment input voltage", scale = 100;
            0x3101: Amps, 1, "Charging equipment input current", scale = 100;
            0x3102: Watts, 2, "Charging equipment input power", scale = 100;
            0x3104: Volts, 1, "Charging equipment output voltage", scale = 100;
            0x3105: Amps, 1, "Charging equipment output current", scale = 100;
            0x3106: Watts, 2, "Charging equipment output power", scale = 100;
            0x310C: Volts, 1, "Discharging equipment output voltage", scale = 100;
            0x310D: Amps, 1, "Discharging equipment output current", scale = 100;
            0x310E: Watts, 2, "Discharging equipment output power", scale = 100;
            0x3110: DegreesCelsius, 1, "Battery temperature", scale = 100;
            0x3111: DegreesCelsius, 1, "Temperature inside equipment", scale = 100;
            0x3112: DegreesCelsius, 1, "Power components temperature", scale = 100;
            0x311A: Percent, 1, "Battery SOC";
            0x311B: DegreesCelsius, 1, "Remote battery temperature", scale = 100;
            0x311D: Volts, 1, "Battery real rated voltage", scale = 100;
            // Input registers: status words
            0x3200: BatteryStatus, 1, "Battery status";
            0x3201: ChargingStatus, 1, "Charging equipment status";
            0x3202: DischargingStatus, 1, "Discharging equipment status";
            // Input registers: statistics
            0x3300: Volts, 1, "Maximum input volt (PV) today", scale = 100;
            0x3301: Volts, 1, "Minimum input volt (PV) today", scale = 100;
            0x3302: Volts, 1, "Maximum battery volt today", scale = 100;
            0x3303: Volts, 1, "Minimum battery volt today", scale = 100;
            0x3304: KilowattHours, 2, "Consumed energy today", scale = 100;
            0x3306: KilowattHours, 2, "Consumed energy this month", scale = 100;
            0x3308: KilowattHours, 2, "Consumed energy this year", scale = 100;
            0x330A: KilowattHours, 2, "Total consumed energy", scale = 100;
            0x330C: KilowattHours, 2, "Generated energy today", scale = 100;
            0x330E: KilowattHours, 2, "Generated energy this month", scale = 100;
            0x3310: KilowattHours, 2, "Generated energy this year", scale = 100;
            0x3312: KilowattHours, 2, "Total generated energy", scale = 100;
            0x331A: Volts, 1, "Battery voltage", scale = 100;
            0x331B: Amps, 2, "Battery current", scale = 1;
            // Holding registers: battery settings
            0x9000: BatteryType, 1, "Battery type";
            0x9001: AmpHours, 1, "Battery capacity";
            0x9002: TemperatureCoefficient, 1, "Temperature compensation coefficient", scale = 1;
            0x9003: Volts, 1, "High volt disconnect", scale = 100;
            0x9004: Volts, 1, "Charging limit voltage", scale = 100;
            0x9005: Volts, 1, "Over voltage reconnect", scale = 100;
            0x9006: Volts, 1, "Equalization voltage", scale = 100;
            0x9007: Volts, 1, "Boost voltage", scale = 100;
            0x9008: Volts, 1, "Float voltage", scale = 100;
            0x9009: Volts, 1, "Boost reconnect voltage", scale = 100;
            0x900A: Volts, 1, "Low voltage reconnect", scale = 100;
            0x900B: Volts, 1, "Under voltage recover", scale = 100;
            0x900C: Volts, 1, "Under voltage warning", scale = 100;
            0x900D: Volts, 1, "Low voltage disconnect", scale = 100;
            0x900E: Volts, 1, "Discharging limit voltage", scale = 100;
            // Holding registers: real time clock
            0x9013: MinuteSecond, 1, "Real time clock minute and second";
            0x9014: DayHour, 1, "Real time clock day and hour";
            0x9015: YearMonth, 1, "Real time clock year and month";
            // Holding registers: temperature limits
            0x9017: DegreesCelsius, 1, "Battery temperature warning upper limit", scale = 100;
            0x9018: DegreesCelsius, 1, "Battery temperature warning lower limit", scale = 100;
            0x9019: DegreesCelsius, 1, "Controller inner temperature upper limit", scale = 100;
            0x901A: DegreesCelsius, 1, "Controller inner temperature upper limit recover", scale = 100;
            // Holding registers: day/night detection
            0x901E: Volts, 1, "Night time threshold volt (NTTV)", scale = 100;
            0x901F: Minutes, 1, "Light signal startup (night) delay time", scale = 1;
            0x9020: Volts, 1, "Day time threshold volt (DTTV)", scale = 100;
            0x9021: Minutes, 1, "Light signal turn off (day) delay time", scale = 1;
            // Holding registers: load control
            0x903D: LoadControlMode, 1, "Load controlling mode";
            0x903E: HourMinute, 1, "Working time length 1";
            0x903F: HourMinute, 1, "Working time length 2";
            0x9042: Seconds, 1, "Turn on timing 1 second", scale = 1;
            0x9043: Minutes, 1, "Turn on timing 1 minute", scale = 1;
            0x9044: Hours, 1, "Turn on timing 1 hour", scale = 1;
            0x9045: Seconds, 1, "Turn off timing 1 second", scale = 1;
            0x9046: Minutes, 1, "Turn off timing 1 minute", scale = 1;
            0x9047: Hours, 1, "Turn off timing 1 hour", scale = 1;
            0x9048: Seconds, 1, "Turn on timing 2 second", scale = 1;
            0x9049: Minutes, 1, "Turn on timing 2 minute", scale = 1;
            0x904A: Hours, 1, "Turn on timing 2 hour", scale = 1;
            0x904B: Seconds, 1, "Turn off timing 2 second", scale = 1;
            0x904C: Minutes, 1, "Turn off timing 2 minute", scale = 1;
            0x904D: Hours, 1, "Turn off timing 2 hour", scale = 1;
            0x9065: HourMinute, 1, "Length of night";
            0x9067: RatedVoltageCode, 1, "Battery rated voltage code";
            0x9069: TimerSelection, 1, "Load timing control selection";
            0x906A: LoadSwitch, 1, "Default load on/off in manual mode";
            0x906B: Minutes, 1, "Equalize duration", scale = 1;
            0x906C: Minutes, 1, "Boost duration", scale = 1;
            0x906D: Percent, 1, "Discharging percentage";
            0x906E: Percent, 1, "Charging percentage";
            0x9070: ManagementMode, 1, "Battery charge and discharge management mode";
        }
    };
}

macro_rules! optional {
    () => {
        None
    };
    ($($lit: tt)+) => {
        Some($($lit)*)
    };
}

macro_rules! make_lists {
    ($($address: literal: $decoder: ident, $words: literal, $name: literal $(, scale = $scale: literal)?;)+) => {
        pub static ADDRESSES: &[u16] = &[$($address),*];
        pub static NAMES: &[&str] = &[$($name),*];
        pub static DECODERS: &[Decoder] = &[$(Decoder::$decoder),*];
        pub static WORD_COUNTS: &[u8] = &[$($words),*];
        pub static SCALES: &[Option<u32>] = &[$(optional!($($scale)?)),*];
    };
}

for_each_register!(make_lists);

pub static DESCRIPTIONS: &[&str] = &const {
    let mut result = [""; ADDRESSES.len()];
    let mut index = 0;
    let mut previous_address = 0;
    while index < result.len() {
        let address = ADDRESSES[index];
        if index > 0 && address <= previous_address {
            panic!("ADDRESSES is not sorted (or has duplicate values)!");
        }
        previous_address = address;
        result[index] = match address {
            0x0002 => "When the load is in manual mode: 1 manual on, 0 manual off",
            0x0005 => "1 enable, 0 disable (normal)",
            0x0006 => "1 turn on, 0 turn off; used for temporary tests of the load",
            0x2000 => "Over temperature inside the device",
            0x200C => "1 night, 0 day",
            0x3000 => "PV array rated voltage",
            0x3001 => "PV array rated current",
            0x3002 => "PV array rated power",
            0x3005 => "Rated charging current to battery",
            0x3006 => "Rated charging power to battery",
            0x3008 => "Connect/disconnect, PWM or MPPT",
            0x3100 => "PV array voltage at the charge controller",
            0x3101 => "PV array current at the charge controller",
            0x3102 => "PV array power at the charge controller",
            0x3104 => "Battery voltage",
            0x3105 => "Battery charging current",
            0x3106 => "Battery charging power",
            0x310C => "Load voltage",
            0x310D => "Load current",
            0x310E => "Load power",
            0x3111 => "Temperature inside the case",
            0x3112 => "Heat sink temperature of the power components",
            0x311A => "Percentage of the battery's remaining capacity",
            0x311B => "Battery temperature measured by the remote sensor",
            0x311D => "Current system rated voltage: 1200 represents 12V, 2400 represents 24V",
            0x3200 => "Battery real time state",
            0x3201 => "Charging equipment real time state",
            0x3202 => "Discharging equipment real time state",
            0x3300 | 0x3301 | 0x3302 | 0x3303 => "Refreshed at 00:00 every day",
            0x3304 | 0x330C => "Cleared at 00:00 every day",
            0x3306 | 0x330E => "Cleared on the first day of the month",
            0x3308 | 0x3310 => "Cleared on the 1st of January",
            0x9000 => "Battery make-up: sealed, gel, flooded or user defined",
            0x9001 => "Rated capacity of the battery",
            0x9002 => "Range 0-9",
            0x9013 => {
                "High byte minute, low byte second. Year, month, day, minute and second should \
                 be written simultaneously"
            }
            0x9014 => "High byte day, low byte hour",
            0x9015 => "High byte year, low byte month",
            0x901E => "PV voltage lower than this value is detected as sundown",
            0x901F => {
                "PV voltage below the NTTV for longer than this delay is detected as night time"
            }
            0x9020 => "PV voltage higher than this value is detected as sunrise",
            0x9021 => {
                "PV voltage above the DTTV for longer than this delay is detected as daytime"
            }
            0x903D => "Manual control, light on/off, light on + timer, or time control",
            0x903E => "Length of load output timer 1: high byte hours, low byte minutes",
            0x903F => "Length of load output timer 2: high byte hours, low byte minutes",
            0x9065 => "Default length of the whole night: high byte hours, low byte minutes",
            0x9067 => "0 auto recognize, 1 12V, 2 24V",
            0x9069 => "Selected timing period of the load: 0 one timer, 1 two timers",
            0x906A => "0 off, 1 on",
            0x906B | 0x906C => "Usually 60-120 minutes",
            0x906D => {
                "Usually 20%-80%; the percentage of remaining capacity at which discharging stops"
            }
            0x906E => "Depth of charge, 20%-100%",
            0x9070 => "Voltage compensation or SOC",
            _ => "",
        };
        index += 1;
    }
    result
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_are_parallel() {
        assert_eq!(ADDRESSES.len(), NAMES.len());
        assert_eq!(ADDRESSES.len(), DECODERS.len());
        assert_eq!(ADDRESSES.len(), WORD_COUNTS.len());
        assert_eq!(ADDRESSES.len(), SCALES.len());
        assert_eq!(ADDRESSES.len(), DESCRIPTIONS.len());
    }

    #[test]
    fn iteration_is_in_ascending_address_order() {
        let addresses: Vec<u16> = RegisterIndex::all().map(|r| r.address()).collect();
        assert!(addresses.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn every_catalog_address_has_a_function_code() {
        for register in RegisterIndex::all() {
            assert!(
                register.function_code().is_ok(),
                "no function code for {:#06x}",
                register.address()
            );
        }
    }

    #[test]
    fn lookup_by_address() {
        let register = RegisterIndex::from_address(0x311A).unwrap();
        assert_eq!(register.name(), "Battery SOC");
        assert_eq!(register.decoder(), Decoder::Percent);
        assert!(RegisterIndex::from_address(0x3103).is_none());
        assert!(RegisterIndex::from_address(0xFFFF).is_none());
    }

    #[test]
    fn lookup_by_name_ignores_case() {
        let register = RegisterIndex::from_name("battery voltage").unwrap();
        assert_eq!(register.address(), 0x331A);
        assert!(RegisterIndex::from_name("no such register").is_none());
    }

    #[test]
    fn multi_word_registers_are_the_wide_quantities() {
        for register in RegisterIndex::all() {
            let words = register.word_count();
            assert!((1..=2).contains(&words));
            if words == 2 {
                assert!(matches!(
                    register.decoder(),
                    Decoder::Watts | Decoder::KilowattHours | Decoder::Amps
                ));
            }
        }
    }

    #[test]
    fn pass_through_decoders_carry_no_scale() {
        // Raw pass-through is pinned in the catalog, not implied by the
        // decoder: percent and amp-hour entries deliberately have no scale.
        assert_eq!(RegisterIndex::from_address(0x311A).unwrap().scale(), None);
        assert_eq!(RegisterIndex::from_address(0x9001).unwrap().scale(), None);
        assert_eq!(RegisterIndex::from_address(0x3304).unwrap().scale(), Some(100));
        assert_eq!(RegisterIndex::from_address(0x331B).unwrap().scale(), Some(1));
    }
}
