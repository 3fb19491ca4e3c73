//! DASH segment-template validation and segment name construction
//! (ISO/IEC 23009-1:2012 5.3.9.4.4).

use crate::error::{Error, Result};

/// Supported template identifiers. `$RepresentationID$` is reserved and
/// rejected.
const NUMBER: &str = "Number";
const TIME: &str = "Time";
const BANDWIDTH: &str = "Bandwidth";

// One identifier token between '$' delimiters: the identifier name plus an
// optional "%0Nd" format tag with a single-digit width.
fn parse_identifier(token: &str) -> Result<(&str, Option<usize>)> {
    let (ident, format_tag) = match token.find('%') {
        Some(pos) => (&token[..pos], Some(&token[pos..])),
        None => (token, None),
    };

    let width = match format_tag {
        None => None,
        Some(tag) => {
            let bytes = tag.as_bytes();
            if bytes.len() != 4
                || bytes[0] != b'%'
                || bytes[1] != b'0'
                || !bytes[2].is_ascii_digit()
                || bytes[3] != b'd'
            {
                return Err(Error::InvalidArgument(format!(
                    "invalid format tag '{tag}' in segment template"
                )));
            }
            Some((bytes[2] - b'0') as usize)
        }
    };

    if ident.is_empty() && width.is_some() {
        // "$$" escapes a literal '$' and takes no format tag.
        return Err(Error::InvalidArgument(
            "'$$' must not carry a format tag".into(),
        ));
    }
    Ok((ident, width))
}

fn split_template(template: &str) -> Result<Vec<&str>> {
    let parts: Vec<&str> = template.split('$').collect();
    // An even part count means an unmatched '$'.
    if parts.len() % 2 == 0 {
        return Err(Error::InvalidArgument(format!(
            "unmatched '$' in segment template '{template}'"
        )));
    }
    Ok(parts)
}

/// Validate a segment template: exactly one of `$Number$`/`$Time$` must be
/// used (possibly repeatedly), `$Bandwidth$` is optional, `$$` escapes a
/// literal dollar sign.
pub fn validate_segment_template(template: &str) -> Result<()> {
    let parts = split_template(template)?;

    let mut has_number = false;
    let mut has_time = false;
    for (i, part) in parts.iter().enumerate() {
        if i % 2 == 0 {
            continue; // literal text
        }
        let (ident, _width) = parse_identifier(part)?;
        match ident {
            "" | BANDWIDTH => {}
            NUMBER => has_number = true,
            TIME => has_time = true,
            other => {
                return Err(Error::InvalidArgument(format!(
                    "unknown identifier '${other}$' in segment template"
                )));
            }
        }
    }

    if has_number && has_time {
        return Err(Error::InvalidArgument(
            "$Number$ and $Time$ must not be used together".into(),
        ));
    }
    if !has_number && !has_time {
        return Err(Error::InvalidArgument(
            "segment template requires $Number$ or $Time$".into(),
        ));
    }
    Ok(())
}

/// Build a segment name from a validated template.
///
/// `$Number$` substitutes `segment_index + 1`, `$Time$` substitutes
/// `segment_start_time`, `$Bandwidth$` substitutes `bandwidth`.
pub fn get_segment_name(
    template: &str,
    segment_start_time: u64,
    segment_index: u32,
    bandwidth: u32,
) -> Result<String> {
    let parts = split_template(template)?;

    let mut name = String::with_capacity(template.len());
    for (i, part) in parts.iter().enumerate() {
        if i % 2 == 0 {
            name.push_str(part);
            continue;
        }
        let (ident, width) = parse_identifier(part)?;
        let value = match ident {
            "" => {
                name.push('$');
                continue;
            }
            NUMBER => u64::from(segment_index) + 1,
            TIME => segment_start_time,
            BANDWIDTH => u64::from(bandwidth),
            other => {
                return Err(Error::InvalidArgument(format!(
                    "unknown identifier '${other}$' in segment template"
                )));
            }
        };
        match width {
            Some(w) => name.push_str(&format!("{value:0w$}")),
            None => name.push_str(&value.to_string()),
        }
    }
    Ok(name)
}
