//! Domain types for the flight oracle server

use std::fmt;

use serde::{Deserialize, Serialize};

/// Flight status codes as defined by the insurance contract.
///
/// `LateAirline` is the only code that triggers a payout on-chain; the rest
/// exist so simulated oracles can disagree realistically.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlightStatus {
    Unknown,
    OnTime,
    LateAirline,
    LateWeather,
    LateTechnical,
    LateOther,
}

impl FlightStatus {
    /// Numeric code used on the wire and by the contract.
    pub fn code(&self) -> u8 {
        match self {
            FlightStatus::Unknown => 0,
            FlightStatus::OnTime => 10,
            FlightStatus::LateAirline => 20,
            FlightStatus::LateWeather => 30,
            FlightStatus::LateTechnical => 40,
            FlightStatus::LateOther => 50,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(FlightStatus::Unknown),
            10 => Some(FlightStatus::OnTime),
            20 => Some(FlightStatus::LateAirline),
            30 => Some(FlightStatus::LateWeather),
            40 => Some(FlightStatus::LateTechnical),
            50 => Some(FlightStatus::LateOther),
            _ => None,
        }
    }

    /// All codes an oracle may report, for the simulated response policy.
    pub const ALL: [FlightStatus; 6] = [
        FlightStatus::Unknown,
        FlightStatus::OnTime,
        FlightStatus::LateAirline,
        FlightStatus::LateWeather,
        FlightStatus::LateTechnical,
        FlightStatus::LateOther,
    ];
}

/// Identifies one outstanding flight-status request.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey {
    pub airline: String,
    pub flight: String,
    pub timestamp: u64,
}

impl RequestKey {
    pub fn new(airline: impl Into<String>, flight: impl Into<String>, timestamp: u64) -> Self {
        Self {
            airline: airline.into(),
            flight: flight.into(),
            timestamp,
        }
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.airline, self.flight, self.timestamp)
    }
}

/// One simulated oracle actor and the selection indices the ledger assigned it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleIdentity {
    pub address: String,
    pub indices: [u8; 3],
}

/// Static flight reference data served by the query API.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Flight {
    pub id: u32,
    pub name: String,
}

/// The demo flights the UI offers for insurance purchase. Not owned by the
/// core; served verbatim.
pub fn known_flights() -> Vec<Flight> {
    [
        "AS2345", "SW7897", "AA8792", "UA01", "DELTA34", "SPI8797", "FRON235", "MI5657",
    ]
    .iter()
    .enumerate()
    .map(|(id, name)| Flight {
        id: id as u32,
        name: (*name).to_string(),
    })
    .collect()
}
