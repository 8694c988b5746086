//! Session description parsing and structural validation.
//!
//! Descriptions are checked before they reach the connectivity stack: a
//! recognised type tag, a non-blank body, the `v=0` version marker and at
//! least one `m=` media section.

use crate::error::DescriptionError;
use lanshare_transport::{SdpType, SessionDescription};
use serde_json::Value;

/// Validate the structure of a description body.
///
/// # Errors
///
/// Returns the first structural problem found.
pub fn validate_description(desc: &SessionDescription) -> Result<(), DescriptionError> {
    let body = desc.sdp.trim();
    if body.is_empty() {
        return Err(DescriptionError::EmptyBody);
    }
    if !body.lines().any(|line| line.trim() == "v=0") {
        return Err(DescriptionError::MissingVersion);
    }
    if !body.lines().any(|line| line.trim_start().starts_with("m=")) {
        return Err(DescriptionError::MissingMediaSection);
    }
    Ok(())
}

/// Decode a description from a JSON value and validate it
///
/// # Errors
///
/// Returns error if the value is not a well-formed, valid description.
pub fn description_from_value(value: &Value) -> Result<SessionDescription, DescriptionError> {
    let object = value
        .as_object()
        .ok_or_else(|| DescriptionError::Malformed("expected a JSON object".to_string()))?;

    let tag = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| DescriptionError::Malformed("missing \"type\"".to_string()))?;
    let sdp_type: SdpType = serde_json::from_value(Value::String(tag.to_string()))
        .map_err(|_| DescriptionError::UnknownType(tag.to_string()))?;

    let sdp = match object.get("sdp") {
        Some(Value::String(sdp)) => sdp.clone(),
        Some(Value::Null) | None => return Err(DescriptionError::EmptyBody),
        Some(_) => return Err(DescriptionError::Malformed("\"sdp\" is not a string".to_string())),
    };

    let desc = SessionDescription { sdp_type, sdp };
    validate_description(&desc)?;
    Ok(desc)
}

/// Parse a description from pasted or relayed text.
///
/// # Errors
///
/// Returns error if the text is not JSON or the description is invalid.
pub fn parse_description(text: &str) -> Result<SessionDescription, DescriptionError> {
    let value: Value = serde_json::from_str(text.trim())
        .map_err(|e| DescriptionError::Malformed(e.to_string()))?;
    description_from_value(&value)
}

/// Require a specific type tag family.
pub(crate) fn expect_type(
    desc: &SessionDescription,
    allowed: &[SdpType],
    expected: &'static str,
) -> Result<(), DescriptionError> {
    if allowed.contains(&desc.sdp_type) {
        Ok(())
    } else {
        Err(DescriptionError::UnexpectedType {
            expected,
            actual: desc.sdp_type.to_string(),
        })
    }
}
