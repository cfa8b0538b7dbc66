//! Action messages sent by the peripheral.
//!
//! Each notification on [`crate::uuid::ACTION_CHARACTERISTIC`] carries one
//! UTF-8 line of the form:
//!
//! ```text
//! <action:int>,<latitude:float>,<longitude:float>,<description:text>
//! ```
//!
//! The description field is not escaped. A description containing a comma
//! yields more than four fields and is rejected.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, ParseError};

/// Number of comma-separated fields in an action message.
pub const FIELD_COUNT: usize = 4;

/// Action codes understood by the app.
///
/// Codes outside this table decode as [`ActionType::NoAction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[repr(u8)]
pub enum ActionType {
    /// Nothing to do.
    #[default]
    NoAction = 0,
    /// Speak the street at the given coordinates.
    TalkLocation = 1,
    /// Speak the description of a detected object.
    TalkObject = 2,
    /// Send an emergency SMS with the given coordinates.
    SendLocationSms = 3,
}

impl ActionType {
    /// Map a wire action code, falling back to `NoAction` for unknown codes.
    #[must_use]
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => ActionType::TalkLocation,
            2 => ActionType::TalkObject,
            3 => ActionType::SendLocationSms,
            _ => ActionType::NoAction,
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionType::NoAction => write!(f, "no action"),
            ActionType::TalkLocation => write!(f, "talk location"),
            ActionType::TalkObject => write!(f, "talk object"),
            ActionType::SendLocationSms => write!(f, "send location SMS"),
        }
    }
}

/// A decoded action message.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", rename_all = "snake_case"))]
pub enum DomainEvent {
    /// The peripheral reported nothing actionable.
    NoAction,
    /// Speak the user's current street.
    TalkLocation { lat: f64, lon: f64 },
    /// Speak a detected object.
    TalkObject { description: String },
    /// Send the user's location to the emergency contact.
    SendLocationSms { lat: f64, lon: f64 },
}

impl DomainEvent {
    /// Decode one notification payload.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] if the payload is not UTF-8, does not have
    /// exactly four fields, or the action/coordinate fields are not numbers.
    ///
    /// # Examples
    ///
    /// ```
    /// use navassist_types::DomainEvent;
    ///
    /// let event = DomainEvent::decode(b"2,0,0,Silla").unwrap();
    /// assert_eq!(event, DomainEvent::TalkObject { description: "Silla".into() });
    ///
    /// assert_eq!(DomainEvent::decode(b"9,0,0,x").unwrap(), DomainEvent::NoAction);
    /// assert!(DomainEvent::decode(b"1,notanumber,0,x").is_err());
    /// ```
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let text = core::str::from_utf8(bytes).map_err(|_| ParseError::InvalidUtf8)?;
        let fields: Vec<&str> = text.trim().split(',').map(str::trim).collect();

        if fields.len() != FIELD_COUNT {
            return Err(ParseError::FieldCount {
                expected: FIELD_COUNT,
                actual: fields.len(),
            });
        }

        let code: i32 = parse_field(fields[0], "action")?;
        let lat: f64 = parse_field(fields[1], "latitude")?;
        let lon: f64 = parse_field(fields[2], "longitude")?;
        let description = fields[3];

        Ok(Self::from_parts(ActionType::from_code(code), lat, lon, description))
    }

    /// Build an event from already-parsed fields.
    #[must_use]
    pub fn from_parts(action: ActionType, lat: f64, lon: f64, description: &str) -> Self {
        match action {
            ActionType::NoAction => DomainEvent::NoAction,
            ActionType::TalkLocation => DomainEvent::TalkLocation { lat, lon },
            ActionType::TalkObject => DomainEvent::TalkObject {
                description: description.to_string(),
            },
            ActionType::SendLocationSms => DomainEvent::SendLocationSms { lat, lon },
        }
    }

    /// The action this event represents.
    #[must_use]
    pub fn action(&self) -> ActionType {
        match self {
            DomainEvent::NoAction => ActionType::NoAction,
            DomainEvent::TalkLocation { .. } => ActionType::TalkLocation,
            DomainEvent::TalkObject { .. } => ActionType::TalkObject,
            DomainEvent::SendLocationSms { .. } => ActionType::SendLocationSms,
        }
    }

    /// Coordinates carried by location-bearing events.
    #[must_use]
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match self {
            DomainEvent::TalkLocation { lat, lon } | DomainEvent::SendLocationSms { lat, lon } => {
                Some((*lat, *lon))
            }
            _ => None,
        }
    }
}

fn parse_field<T: core::str::FromStr>(value: &str, field: &'static str) -> Result<T, ParseError> {
    value.parse().map_err(|_| ParseError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}


/// Property-based tests for the action decoder.
#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Decoding arbitrary bytes never panics.
        #[test]
        fn decode_never_panics(data: Vec<u8>) {
            let _ = DomainEvent::decode(&data);
        }

        /// Well-formed object messages keep their description.
        #[test]
        fn talk_object_keeps_description(desc in "[A-Za-z0-9 ]{0,32}") {
            let payload = format!("2,0,0,{desc}");
            let event = DomainEvent::decode(payload.as_bytes()).unwrap();
            prop_assert_eq!(event, DomainEvent::TalkObject { description: desc.trim().to_string() });
        }

        /// Any integer code outside 0..=3 decodes as NoAction.
        #[test]
        fn unknown_codes_are_no_action(code in any::<i32>().prop_filter("unknown", |c| !(0..=3).contains(c))) {
            let payload = format!("{code},1.0,2.0,x");
            prop_assert_eq!(DomainEvent::decode(payload.as_bytes()).unwrap(), DomainEvent::NoAction);
        }

        /// Coordinates survive the text round trip for location actions.
        #[test]
        fn location_coordinates_preserved(lat in -90.0f64..90.0, lon in -180.0f64..180.0) {
            let payload = format!("3,{lat},{lon},");
            let event = DomainEvent::decode(payload.as_bytes()).unwrap();
            prop_assert_eq!(event, DomainEvent::SendLocationSms { lat, lon });
        }
    }
}
