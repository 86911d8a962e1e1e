//! PowerShell quoting and encoding helpers.
//!
//! Scripts are never sent as plain command text. They are widened to UTF-16LE,
//! base64 encoded and handed to `PowerShell -EncodedCommand`, which sidesteps
//! the quoting rules of the remote command interpreter entirely. Literal values
//! embedded in those scripts (paths, payloads) go through
//! [`powershell_verbatim_literal`].

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};

use crate::error::{Error, Result};

/// Interpreter invoked for every script-bearing command.
pub const POWERSHELL: &str = "PowerShell";

/// Fixed arguments placed before the encoded script.
pub const POWERSHELL_ARGS: [&str; 6] = [
    "-NoProfile",
    "-NonInteractive",
    "-ExecutionPolicy",
    "Unrestricted",
    "-EncodedCommand",
    "",
];

const BYTE_UNITS: [&str; 4] = ["bytes", "KiB", "MiB", "GiB"];

/// Returns a single quoted PowerShell literal that evaluates to `value`.
///
/// Control characters, both quote characters and the backtick itself are
/// written with backtick escapes.
pub fn powershell_single_quoted_literal(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for ch in value.chars() {
        let escape = match ch {
            '\n' => "`n",
            '\r' => "`r",
            '\t' => "`t",
            '\u{7}' => "`a",
            '\u{8}' => "`b",
            '\u{c}' => "`f",
            '\u{b}' => "`v",
            '"' => "`\"",
            '\'' => "`'",
            '`' => "``",
            '\0' => "`0",
            _ => {
                quoted.push(ch);
                continue;
            }
        };
        quoted.push_str(escape);
    }
    quoted.push('\'');
    quoted
}

/// Evaluates a literal produced by [`powershell_single_quoted_literal`].
///
/// Returns `None` when `literal` is not in that form (missing quotes, an
/// unescaped quote inside, or an unknown escape).
pub fn parse_powershell_single_quoted_literal(literal: &str) -> Option<String> {
    let inner = literal.strip_prefix('\'')?.strip_suffix('\'')?;
    let mut value = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '`' => {
                let unescaped = match chars.next()? {
                    'n' => '\n',
                    'r' => '\r',
                    't' => '\t',
                    'a' => '\u{7}',
                    'b' => '\u{8}',
                    'f' => '\u{c}',
                    'v' => '\u{b}',
                    '"' => '"',
                    '\'' => '\'',
                    '`' => '`',
                    '0' => '\0',
                    _ => return None,
                };
                value.push(unescaped);
            }
            '\'' => return None,
            other => value.push(other),
        }
    }
    Some(value)
}

/// Characters PowerShell treats as a single quote.
const SINGLE_QUOTES: [char; 5] = ['\'', '\u{2018}', '\u{2019}', '\u{201a}', '\u{201b}'];

/// Returns a verbatim PowerShell string literal for `value`.
///
/// Inside single quotes PowerShell expands nothing, so backticks and
/// control characters pass through as-is and a quote is written twice.
/// Remote paths are embedded in generated scripts this way.
pub fn powershell_verbatim_literal(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for ch in value.chars() {
        if SINGLE_QUOTES.contains(&ch) {
            quoted.push(ch);
        }
        quoted.push(ch);
    }
    quoted.push('\'');
    quoted
}

/// Evaluates a single quoted literal the way PowerShell's tokenizer does.
///
/// Any quote character followed by another quote character is one literal
/// quote; a lone quote ends the string. Returns `None` if the string ends
/// before the last character of `literal`.
pub fn parse_powershell_verbatim_literal(literal: &str) -> Option<String> {
    let mut chars = literal.chars().peekable();
    if !SINGLE_QUOTES.contains(&chars.next()?) {
        return None;
    }
    let mut value = String::with_capacity(literal.len());
    while let Some(ch) = chars.next() {
        if !SINGLE_QUOTES.contains(&ch) {
            value.push(ch);
            continue;
        }
        match chars.peek() {
            Some(next) if SINGLE_QUOTES.contains(next) => {
                value.push(*next);
                chars.next();
            }
            Some(_) => return None,
            None => return Some(value),
        }
    }
    None
}

/// Encodes `script` the way `-EncodedCommand` expects it: UTF-16LE, then base64.
pub fn encode_script(script: &str) -> String {
    let utf16le: Vec<u8> = script.encode_utf16().flat_map(u16::to_le_bytes).collect();
    BASE64_STANDARD.encode(utf16le)
}

/// Decodes an `-EncodedCommand` payload back into the script text.
pub fn decode_script(encoded: &str) -> Result<String> {
    let bytes = BASE64_STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::validation(format!("encoded command is not base64: {e}")))?;
    if bytes.len() % 2 != 0 {
        return Err(Error::validation(
            "encoded command has an odd number of bytes",
        ));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units)
        .map_err(|e| Error::validation(format!("encoded command is not UTF-16: {e}")))
}

/// Returns the command and arguments that run `script` non-interactively:
///
/// `PowerShell -NoProfile -NonInteractive -ExecutionPolicy Unrestricted -EncodedCommand <base64>`
///
/// `&str` is always valid Unicode, so no input can be rejected here.
pub fn format_powershell_command_line(script: &str) -> (String, Vec<String>) {
    let mut args: Vec<String> = POWERSHELL_ARGS.iter().map(|a| (*a).to_string()).collect();
    if let Some(last) = args.last_mut() {
        *last = encode_script(script);
    }
    (POWERSHELL.to_string(), args)
}

/// Length in bytes of the base64 text produced for a script of
/// `utf16_units` UTF-16 code units.
pub fn encoded_script_len(utf16_units: usize) -> usize {
    (utf16_units * 2).div_ceil(3) * 4
}

/// Length of the full command line (interpreter, fixed switches and
/// separators) for an encoded payload of `encoded_len` bytes.
pub fn command_line_len(encoded_len: usize) -> usize {
    let fixed: usize = POWERSHELL.len()
        + POWERSHELL_ARGS
            .iter()
            .map(|a| a.len() + 1)
            .sum::<usize>();
    fixed + encoded_len
}

/// Formats a byte count for log output, e.g. `1.500 KiB`.
pub fn format_bytes(bytes: f64) -> String {
    let mut value = bytes;
    let mut unit = 0;
    while value > 1024.0 && unit < BYTE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.3} {}", value, BYTE_UNITS[unit])
}
