// EDN reading: response bodies and CLI input into `Value` trees via `edn_format::parse_str`.
use crate::core::edn::Value;
use crate::core::error::{Error, ErrorKind};

/// Deepest collection or tag nesting accepted from untrusted input.
pub const MAX_DEPTH: usize = 128;

/// Reads exactly one form; anything but whitespace or comments after it is an error.
pub fn from_str(input: &str) -> Result<Value, Error> {
    let mut forms = read_all(input)?;
    match forms.len() {
        1 => Ok(forms.remove(0)),
        0 => Err(decode_error("expected a form, found end of input")),
        _ => Err(decode_error("trailing characters after form")),
    }
}

pub fn from_slice(bytes: &[u8]) -> Result<Value, Error> {
    let text = std::str::from_utf8(bytes).map_err(|err| {
        Error::new(ErrorKind::Decode)
            .with_message("edn input is not valid utf-8")
            .with_source(err)
    })?;
    from_str(text)
}

/// Reads every top-level form in order.
pub fn read_all(input: &str) -> Result<Vec<Value>, Error> {
    check_nesting(input)?;
    // The newline ends a trailing line comment before the closing bracket.
    let wrapped = format!("[{input}\n]");
    match edn_format::parse_str(&wrapped) {
        Ok(Value::Vector(forms)) => Ok(forms),
        Ok(_) => Err(decode_error("unexpected top-level form")),
        Err(err) => Err(decode_error(&format!("invalid edn: {err:?}"))),
    }
}

fn decode_error(message: &str) -> Error {
    Error::new(ErrorKind::Decode).with_message(message.to_string())
}

fn nesting_error(offset: usize) -> Error {
    decode_error(&format!(
        "edn nesting deeper than {MAX_DEPTH} levels at offset {offset}"
    ))
}

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || "()[]{}\",;\\".contains(c)
}

/// Rejects input whose collections or tag prefixes nest past `MAX_DEPTH`, and any
/// closing delimiter without an opener. String and comment contents are ignored, as is
/// the character after a `\`.
fn check_nesting(input: &str) -> Result<(), Error> {
    let mut depth = 0usize;
    let mut prefixes = 0usize;
    let mut chars = input.char_indices().peekable();
    while let Some((offset, c)) = chars.next() {
        match c {
            '"' => {
                while let Some((_, c)) = chars.next() {
                    match c {
                        '\\' => {
                            chars.next();
                        }
                        '"' => break,
                        _ => {}
                    }
                }
                prefixes = 0;
            }
            ';' => {
                for (_, c) in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '\\' => {
                chars.next();
                prefixes = 0;
            }
            '(' | '[' | '{' => {
                depth += 1;
                prefixes = 0;
                if depth > MAX_DEPTH {
                    return Err(nesting_error(offset));
                }
            }
            ')' | ']' | '}' => {
                depth = depth.checked_sub(1).ok_or_else(|| {
                    decode_error(&format!("unmatched `{c}` at offset {offset}"))
                })?;
                prefixes = 0;
            }
            '#' => match chars.peek() {
                // set literal; its brace is counted on the next step
                Some((_, '{')) => {}
                // symbolic value such as ##Inf
                Some((_, '#')) => prefixes = 0,
                _ => {
                    prefixes += 1;
                    if prefixes > MAX_DEPTH {
                        return Err(nesting_error(offset));
                    }
                    while chars.next_if(|(_, c)| !is_delimiter(*c)).is_some() {}
                }
            },
            c if c.is_whitespace() || c == ',' => {}
            _ => prefixes = 0,
        }
    }
    Ok(())
}
