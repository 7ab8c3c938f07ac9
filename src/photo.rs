//! Profile photos travel as `data:<mime>;base64,<payload>` URLs and are
//! stored as raw image bytes.

use base64::{engine::general_purpose::STANDARD, Engine};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PhotoError {
    #[error("photo is empty")]
    Empty,
    #[error("failed to decode base64 image: {0}")]
    Decode(String),
}

/// Accepts a data URL or a bare base64 payload.
pub fn decode(input: &str) -> Result<Vec<u8>, PhotoError> {
    let input = input.trim();
    let payload = match input.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map_or(rest, |(_, data)| data),
        None => input,
    };
    if payload.is_empty() {
        return Err(PhotoError::Empty);
    }
    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| PhotoError::Decode(e.to_string()))?;
    if bytes.is_empty() {
        return Err(PhotoError::Empty);
    }
    Ok(bytes)
}

/// Sniffs the image type from its magic bytes. Unknown data is labelled jpeg.
pub fn mime_type(bytes: &[u8]) -> &'static str {
    match bytes {
        [] | [_] | [_, _] | [_, _, _] => "application/octet-stream",
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [b'G', b'I', b'F', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        _ => "image/jpeg",
    }
}

pub fn to_data_url(bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type(bytes), STANDARD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn data_urls_and_bare_payloads_decode_alike() {
        let encoded = STANDARD.encode(PNG_HEADER);
        let from_url = decode(&format!("data:image/png;base64,{}", encoded)).expect("data url");
        let bare = decode(&encoded).expect("bare");
        assert_eq!(from_url, PNG_HEADER.to_vec());
        assert_eq!(bare, from_url);
        assert_eq!(to_data_url(&bare), format!("data:image/png;base64,{}", encoded));
    }

    #[test]
    fn rejects_empty_and_malformed_input() {
        assert_eq!(decode(""), Err(PhotoError::Empty));
        assert_eq!(decode("data:image/png;base64,"), Err(PhotoError::Empty));
        assert!(matches!(decode("not base64!"), Err(PhotoError::Decode(_))));
    }

    #[test]
    fn sniffs_common_image_types() {
        assert_eq!(mime_type(&[0xFF, 0xD8, 0xFF, 0xE0]), "image/jpeg");
        assert_eq!(mime_type(b"GIF89a"), "image/gif");
        assert_eq!(mime_type(b"RIFF\0\0\0\0WEBPVP8 "), "image/webp");
        assert_eq!(mime_type(&[1, 2]), "application/octet-stream");
        assert_eq!(mime_type(&[1, 2, 3, 4]), "image/jpeg");
    }
}
