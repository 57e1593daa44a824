use rookery_core::ChangeEvent;

use crate::error::DecodeError;

/// Decode one inbound frame into a change event.
///
/// Frames are UTF-8 text carrying a single JSON object. Unknown channel
/// or action values fail here as well, so a newer server cannot crash an
/// older client; the caller logs the error and drops the frame.
pub fn decode_frame(payload: &[u8]) -> Result<ChangeEvent, DecodeError> {
    let text = std::str::from_utf8(payload)?;
    Ok(serde_json::from_str(text)?)
}
