//! Device endpoint, identity and clock.

use std::fmt;

/// Default GMScreen control port.
pub const DEFAULT_PORT: u16 = 20000;

/// Network address of the set-top box.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Host name or IP address
    pub address: String,
    /// TCP port
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint.
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

impl From<&str> for Endpoint {
    /// Parse `host` or `host:port`. A missing or invalid port means the default.
    fn from(s: &str) -> Self {
        match s.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => match port.parse() {
                Ok(port) => Self::new(host, port),
                Err(_) => Self::new(s, DEFAULT_PORT),
            },
            _ => Self::new(s, DEFAULT_PORT),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Identity reported by `GetStbInfo`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Model name (`ProductName`)
    pub product_name: String,
    /// Firmware version (`SoftwareVersion`)
    pub software_version: String,
    /// Serial number (`SerialNumber`)
    pub serial_number: String,
    /// Channel count as reported; `None` when missing, unparsable or zero
    pub channel_count: Option<u32>,
}

/// Device wall clock as reported by `GetTime`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StbTime {
    /// Month, 1-12 (`StbMonth`)
    pub month: u8,
    /// Day of month (`StbDay`)
    pub day: u8,
    /// Hour, 0-23 (`StbHour`)
    pub hour: u8,
    /// Minute (`StbMin`)
    pub minute: u8,
}

impl fmt::Display for StbTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}/{:02} {:02}:{:02}",
            self.day, self.month, self.hour, self.minute
        )
    }
}
