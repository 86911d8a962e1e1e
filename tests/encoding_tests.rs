//! Tests for PowerShell quoting and script encoding.

use pretty_assertions::assert_eq;
use proptest::prelude::*;

use winrmcp::encoding::{
    command_line_len, decode_script, encode_script, encoded_script_len, format_bytes,
    format_powershell_command_line, parse_powershell_single_quoted_literal,
    parse_powershell_verbatim_literal, powershell_single_quoted_literal,
    powershell_verbatim_literal,
};

// ============================================================================
// Quoting
// ============================================================================

#[test]
fn test_quote_plain_value() {
    assert_eq!(
        powershell_single_quoted_literal("C:\\workspace\\file.txt"),
        "'C:\\workspace\\file.txt'"
    );
}

#[test]
fn test_quote_escapes_specials() {
    assert_eq!(powershell_single_quoted_literal("a\nb"), "'a`nb'");
    assert_eq!(powershell_single_quoted_literal("it's"), "'it`'s'");
    assert_eq!(powershell_single_quoted_literal("say \"hi\""), "'say `\"hi`\"'");
    assert_eq!(powershell_single_quoted_literal("`"), "'``'");
    assert_eq!(powershell_single_quoted_literal("\0\t\r"), "'`0`t`r'");
}

#[test]
fn test_verbatim_literal_for_paths() {
    assert_eq!(
        powershell_verbatim_literal("C:\\workspace\\John's notes.txt"),
        "'C:\\workspace\\John''s notes.txt'"
    );
    assert_eq!(powershell_verbatim_literal("a`b"), "'a`b'");
}

#[test]
fn test_quote_empty() {
    assert_eq!(powershell_single_quoted_literal(""), "''");
}

proptest! {
    #[test]
    fn prop_quoted_literal_round_trips(value in any::<String>()) {
        let literal = powershell_single_quoted_literal(&value);
        prop_assert!(literal.starts_with('\''));
        prop_assert!(literal.ends_with('\''));
        prop_assert_eq!(parse_powershell_single_quoted_literal(&literal), Some(value));
    }

    #[test]
    fn prop_verbatim_literal_round_trips(value in any::<String>()) {
        let literal = powershell_verbatim_literal(&value);
        prop_assert_eq!(parse_powershell_verbatim_literal(&literal), Some(value));
    }

    #[test]
    fn prop_encoded_script_round_trips(script in any::<String>()) {
        let encoded = encode_script(&script);
        prop_assert_eq!(encoded.len(), encoded_script_len(script.encode_utf16().count()));
        prop_assert_eq!(decode_script(&encoded).unwrap(), script);
    }
}

// ============================================================================
// Command Line
// ============================================================================

#[test]
fn test_command_line_layout() {
    let (command, args) = format_powershell_command_line("Write-Output 'ok'");
    assert_eq!(command, "PowerShell");
    assert_eq!(
        &args[..5],
        &[
            "-NoProfile",
            "-NonInteractive",
            "-ExecutionPolicy",
            "Unrestricted",
            "-EncodedCommand"
        ]
    );
    assert_eq!(decode_script(&args[5]).unwrap(), "Write-Output 'ok'");

    let line_len = command.len() + args.iter().map(|a| a.len() + 1).sum::<usize>();
    assert_eq!(line_len, command_line_len(args[5].len()));
}

#[test]
fn test_encoding_is_utf16le_base64() {
    // "A" -> 41 00 -> QQA=
    assert_eq!(encode_script("A"), "QQA=");
    // Astral plane characters become surrogate pairs
    assert_eq!(decode_script(&encode_script("\u{1F600}")).unwrap(), "\u{1F600}");
}

#[test]
fn test_decode_rejects_garbage() {
    assert!(decode_script("not base64!").is_err());
    // Odd byte count is not UTF-16
    assert!(decode_script("QQ==").is_err());
}

// ============================================================================
// Byte Formatting
// ============================================================================

#[test]
fn test_format_bytes_units() {
    assert_eq!(format_bytes(0.0), "0.000 bytes");
    assert_eq!(format_bytes(1000.0), "1000.000 bytes");
    assert_eq!(format_bytes(1536.0), "1.500 KiB");
    assert_eq!(format_bytes(3.0 * 1024.0 * 1024.0), "3.000 MiB");
    assert_eq!(format_bytes(5.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0), "5120.000 GiB");
}
