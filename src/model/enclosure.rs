use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Separates encoded enclosures from each other.
const OUTER_SEPARATOR: char = '&';

/// Separates the encoded MIME type from the encoded URL of one enclosure.
const INNER_SEPARATOR: char = '#';

/// A media attachment of a message (podcast episode, image, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enclosure {
    pub url: String,
    pub mime_type: String,
}

impl Enclosure {
    pub fn new(url: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mime_type: mime_type.into(),
        }
    }
}

/// Encodes enclosures into the single column stored alongside a message.
///
/// Each field is base64-encoded before joining, so URLs and MIME types may
/// contain either separator character. An enclosure without a MIME type is
/// stored as its encoded URL alone.
pub fn encode_enclosures(enclosures: &[Enclosure]) -> String {
    enclosures
        .iter()
        .map(|enclosure| {
            if enclosure.mime_type.is_empty() {
                STANDARD.encode(&enclosure.url)
            } else {
                format!(
                    "{}{}{}",
                    STANDARD.encode(&enclosure.mime_type),
                    INNER_SEPARATOR,
                    STANDARD.encode(&enclosure.url)
                )
            }
        })
        .collect::<Vec<_>>()
        .join(&OUTER_SEPARATOR.to_string())
}

/// Decodes the stored enclosure column. Malformed entries are skipped.
pub fn decode_enclosures(data: &str) -> Vec<Enclosure> {
    data.split(OUTER_SEPARATOR)
        .filter(|part| !part.is_empty())
        .filter_map(|part| {
            let decoded = match part.split_once(INNER_SEPARATOR) {
                Some((mime, url)) => decode_field(mime)
                    .zip(decode_field(url))
                    .map(|(mime_type, url)| Enclosure { url, mime_type }),
                None => decode_field(part).map(|url| Enclosure {
                    url,
                    mime_type: String::new(),
                }),
            };

            if decoded.is_none() {
                tracing::debug!(enclosure = %part, "Skipping malformed stored enclosure");
            }
            decoded
        })
        .collect()
}

fn decode_field(field: &str) -> Option<String> {
    STANDARD
        .decode(field)
        .ok()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}
