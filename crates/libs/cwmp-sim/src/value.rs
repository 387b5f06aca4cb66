//! Typed parameter values.
//!
//! Values travel as strings tagged with an `xsi:type`. Inside the simulator they
//! are held as a [`ParamValue`] and only converted back to text at the SOAP
//! boundary.

use std::fmt;

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::clock::{format_iso8601, ZERO_DATE};

pub const XSD_BOOLEAN: &str = "xsd:boolean";
pub const XSD_INT: &str = "xsd:int";
pub const XSD_UNSIGNED_INT: &str = "xsd:unsignedInt";
pub const XSD_DATE_TIME: &str = "xsd:dateTime";
pub const XSD_STRING: &str = "xsd:string";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParamValue {
    Boolean(bool),
    Int(i64),
    UnsignedInt(u64),
    DateTime(OffsetDateTime),
    String(String),
    /// Text that does not parse canonically as its declared type, or a type
    /// the simulator does not model. Kept verbatim.
    Raw { type_tag: String, text: String },
}

impl ParamValue {
    /// Builds a value from its wire form. Never fails: anything that would not
    /// render back to exactly `text` is stored as [`ParamValue::Raw`].
    pub fn from_wire(type_tag: &str, text: &str) -> Self {
        let typed = match type_tag {
            XSD_BOOLEAN => match text {
                "true" => Some(Self::Boolean(true)),
                "false" => Some(Self::Boolean(false)),
                _ => None,
            },
            XSD_INT => text.parse::<i64>().ok().map(Self::Int),
            XSD_UNSIGNED_INT => text.parse::<u64>().ok().map(Self::UnsignedInt),
            XSD_DATE_TIME => OffsetDateTime::parse(text, &Rfc3339).ok().map(Self::DateTime),
            XSD_STRING => Some(Self::String(text.to_string())),
            _ => None,
        };
        match typed {
            Some(value) if value.to_wire() == text => value,
            _ => Self::Raw { type_tag: type_tag.to_string(), text: text.to_string() },
        }
    }

    /// Value a freshly created object instance gets for a parameter of this type.
    pub fn default_for(type_tag: &str) -> Self {
        let text = match type_tag {
            XSD_BOOLEAN => "false",
            XSD_INT | XSD_UNSIGNED_INT => "0",
            XSD_DATE_TIME => ZERO_DATE,
            _ => "",
        };
        Self::from_wire(type_tag, text)
    }

    pub fn type_tag(&self) -> &str {
        match self {
            Self::Boolean(_) => XSD_BOOLEAN,
            Self::Int(_) => XSD_INT,
            Self::UnsignedInt(_) => XSD_UNSIGNED_INT,
            Self::DateTime(_) => XSD_DATE_TIME,
            Self::String(_) => XSD_STRING,
            Self::Raw { type_tag, .. } => type_tag,
        }
    }

    pub fn to_wire(&self) -> String {
        match self {
            Self::Boolean(value) => value.to_string(),
            Self::Int(value) => value.to_string(),
            Self::UnsignedInt(value) => value.to_string(),
            Self::DateTime(value) => format_iso8601(*value),
            Self::String(text) => text.clone(),
            Self::Raw { text, .. } => text.clone(),
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::UnsignedInt(value) => Some(*value),
            Self::Int(value) => u64::try_from(*value).ok(),
            Self::String(text) | Self::Raw { text, .. } => text.trim().parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_text_becomes_typed() {
        assert_eq!(ParamValue::from_wire(XSD_BOOLEAN, "true"), ParamValue::Boolean(true));
        assert_eq!(ParamValue::from_wire(XSD_INT, "-4"), ParamValue::Int(-4));
        assert_eq!(ParamValue::from_wire(XSD_UNSIGNED_INT, "300"), ParamValue::UnsignedInt(300));
        assert!(matches!(ParamValue::from_wire(XSD_DATE_TIME, ZERO_DATE), ParamValue::DateTime(_)));
    }

    #[test]
    fn non_canonical_text_is_kept_verbatim() {
        for (type_tag, text) in
            [(XSD_BOOLEAN, "1"), (XSD_INT, "007"), (XSD_UNSIGNED_INT, "-1"), ("xsd:base64", "AA==")]
        {
            let value = ParamValue::from_wire(type_tag, text);
            assert!(matches!(value, ParamValue::Raw { .. }), "{type_tag} {text}");
            assert_eq!(value.type_tag(), type_tag);
            assert_eq!(value.to_wire(), text);
        }
    }

    #[test]
    fn defaults_follow_declared_type() {
        assert_eq!(ParamValue::default_for(XSD_BOOLEAN).to_wire(), "false");
        assert_eq!(ParamValue::default_for(XSD_INT).to_wire(), "0");
        assert_eq!(ParamValue::default_for(XSD_UNSIGNED_INT).to_wire(), "0");
        assert_eq!(ParamValue::default_for(XSD_DATE_TIME).to_wire(), ZERO_DATE);
        assert_eq!(ParamValue::default_for(XSD_STRING).to_wire(), "");
        assert_eq!(ParamValue::default_for("xsd:hexBinary").type_tag(), "xsd:hexBinary");
    }
}
