use routex_error::UriError;

/// Совпадает ровно с одним сегментом.
pub const WILDCARD: &str = "*";
/// Совпадает с одним и более сегментами.
pub const MULTI_WILDCARD: &str = "**";

/// Разбирает URI вида `segment(.segment)*`.
///
/// Сегмент состоит из `[a-z0-9_]` либо равен `*` или `**`.
pub fn parse_uri(uri: &str) -> Result<Vec<&str>, UriError> {
    let path: Vec<&str> = uri.split('.').collect();
    if path.iter().all(|segment| is_valid_segment(segment)) {
        Ok(path)
    } else {
        Err(UriError {
            uri: uri.to_string(),
        })
    }
}

pub fn is_valid_uri(uri: &str) -> bool {
    parse_uri(uri).is_ok()
}

fn is_valid_segment(segment: &str) -> bool {
    if segment == WILDCARD || segment == MULTI_WILDCARD {
        return true;
    }
    !segment.is_empty()
        && segment
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}
