//! Form body parsing for login submissions

use crate::error::FormError;
use std::collections::HashMap;

/// Fields submitted with an `application/x-www-form-urlencoded` body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormFields {
    fields: HashMap<String, String>,
}

impl FormFields {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Owned copy of a field, for recording
    pub fn take(&self, name: &str) -> Option<String> {
        self.get(name).map(str::to_string)
    }
}

/// Parse a form-encoded body. The whole body is decoded before anything is
/// returned, so a bad field rejects the request as a unit.
///
/// Repeated fields keep their first value; pairs without a name are skipped.
pub fn parse_form(body: &[u8]) -> Result<FormFields, FormError> {
    let body = std::str::from_utf8(body).map_err(|_| FormError::InvalidUtf8)?;
    let mut fields = HashMap::new();

    for pair in body.split('&').filter(|p| !p.is_empty()) {
        let (raw_name, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
        let name = decode_component(raw_name)?;
        if name.is_empty() {
            continue;
        }
        let value = decode_component(raw_value).map_err(|_| FormError::InvalidEncoding(name.clone()))?;
        fields.entry(name).or_insert(value);
    }

    Ok(FormFields { fields })
}

fn decode_component(raw: &str) -> Result<String, FormError> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .map_err(|_| FormError::InvalidEncoding(raw.to_string()))
}
