//! Decides whether an uploaded payload is binary, text or a script.

use boa_engine::{Context, Script, Source};
use hput_common::{Kind, Payload};

/// Number of leading bytes inspected for invalid UTF-8.
pub const BINARY_SNIFF_LEN: usize = 200;

/// Outcome of [`classify`]: the payload to store and a note for the uploader.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub payload: Payload,
    /// Empty unless a text payload failed to parse as a script.
    pub message: String,
}

impl Classification {
    pub fn kind(&self) -> Kind {
        self.payload.kind()
    }
}

/// True if the first [`BINARY_SNIFF_LEN`] bytes are not clean UTF-8. A
/// multi-byte character cut by the window does not count.
pub fn looks_binary(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(BINARY_SNIFF_LEN)];
    let valid = match std::str::from_utf8(head) {
        Ok(text) => text,
        Err(e) if e.error_len().is_none() && head.len() == BINARY_SNIFF_LEN => {
            match std::str::from_utf8(&head[..e.valid_up_to()]) {
                Ok(text) => text,
                Err(_) => return true,
            }
        }
        Err(_) => return true,
    };
    valid.contains(char::REPLACEMENT_CHARACTER)
}

/// Reported back when a payload is stored as binary.
pub const BINARY_MESSAGE: &str = "I think this is a binary file, saving it as such";

/// Classifies an uploaded body.
///
/// Bytes that look binary are kept verbatim. Anything else is decoded as
/// UTF-8 and parsed as a script: if it parses it is a script, otherwise it
/// is text and the parse error is reported back.
pub fn classify(bytes: Vec<u8>) -> Classification {
    if looks_binary(&bytes) {
        return Classification {
            payload: Payload::Binary(bytes),
            message: BINARY_MESSAGE.to_string(),
        };
    }

    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    };

    let mut context = Context::default();
    match Script::parse(Source::from_bytes(&text), None, &mut context) {
        Ok(_) => Classification {
            payload: Payload::Script(text),
            message: String::new(),
        },
        Err(err) => Classification {
            message: format!(
                "I think this is not javascript, so we'll treat it as text.\n\
                 If this were javascript, the error would be: {err}"
            ),
            payload: Payload::Text(text),
        },
    }
}
