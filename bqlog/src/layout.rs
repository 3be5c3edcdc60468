//! The text layout engine: renders a decoded [`Record`] into its final
//! UTF-8 log line.
//!
//! Scans the format template for `{`/`}` using [`memchr::memchr2`], the
//! idiomatic ecosystem stand-in for a hand-rolled SIMD brace scanner with
//! runtime CPU-feature dispatch. A scalar byte-by-byte scanner
//! ([`scan_scalar`]) is kept alongside it purely as the parity oracle
//! exercised in tests: both must ever produce byte-identical output for the
//! same input.

use std::fmt::Write as _;

use crate::record::{Argument, Level, Record};
use crate::tz::{millis_digits, TimeCache};

/// One `{...}` placeholder's parsed formatting directives.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
struct Spec {
    fill: Option<char>,
    align_left: bool,
    sign: bool,
    alternate: bool,
    width: Option<usize>,
    precision: Option<usize>,
    ty: Option<char>,
}

/// Parses the contents between `{` and `}` (excluding the braces),
/// `":"[fill][align][sign]["#"][width]["." precision][type]`.
fn parse_spec(inner: &str) -> Spec {
    let mut spec = Spec::default();
    let Some(rest) = inner.strip_prefix(':') else { return spec };
    let mut chars = rest.chars().peekable();

    // Optional fill + alignment (`<` or `>`), fill only takes effect if
    // immediately followed by an alignment character.
    if let Some(&c) = chars.peek() {
        let mut lookahead = chars.clone();
        lookahead.next();
        if let Some(&next) = lookahead.peek() {
            if next == '<' || next == '>' {
                spec.fill = Some(c);
                spec.align_left = next == '<';
                chars.next();
                chars.next();
            }
        } else if c == '<' || c == '>' {
            spec.align_left = c == '<';
            chars.next();
        }
    }
    if spec.fill.is_none() {
        if let Some(&c) = chars.peek() {
            if c == '<' || c == '>' {
                spec.align_left = c == '<';
                chars.next();
            }
        }
    }

    if chars.peek() == Some(&'+') {
        spec.sign = true;
        chars.next();
    }
    if chars.peek() == Some(&'#') {
        spec.alternate = true;
        chars.next();
    }

    // A leading `0` not already claimed by an explicit fill/align is the
    // zero-pad flag: sign-aware right-aligned zero fill, same as `{:08x}`.
    if spec.fill.is_none() && chars.peek() == Some(&'0') {
        spec.fill = Some('0');
        spec.align_left = false;
        chars.next();
    }

    let mut digits = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            digits.push(c);
            chars.next();
        } else {
            break;
        }
    }
    if !digits.is_empty() {
        spec.width = digits.parse().ok();
    }

    if chars.peek() == Some(&'.') {
        chars.next();
        let mut digits = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_digit() {
                digits.push(c);
                chars.next();
            } else {
                break;
            }
        }
        spec.precision = digits.parse().ok();
    }

    spec.ty = chars.next();
    spec
}

/// Renders `arg` according to `spec`, appending to `out`.
fn render_arg(arg: &Argument<'_>, spec: &Spec, out: &mut String) {
    let mut body = String::new();
    match (arg, spec.ty) {
        (Argument::Null, _) => body.push_str("null"),
        (Argument::Bool(b), _) => body.push_str(if *b { "true" } else { "false" }),
        (Argument::Char(c), _) => body.push(*c),
        (Argument::Pointer(v), _) => {
            let _ = write!(body, "0x{v:x}");
        }
        (Argument::Str(s), _) => body.push_str(s),
        (Argument::F32(v), _) => render_float(*v as f64, spec, 7, &mut body),
        (Argument::F64(v), _) => render_float(*v, spec, 15, &mut body),
        (int_arg, ty) => render_int(int_arg, ty, spec, &mut body),
    }

    pad(&body, spec, out);
}

fn render_int(arg: &Argument<'_>, ty: Option<char>, spec: &Spec, out: &mut String) {
    let value: i128 = match *arg {
        Argument::I8(v) => v as i128,
        Argument::I16(v) => v as i128,
        Argument::I32(v) => v as i128,
        Argument::I64(v) => v as i128,
        Argument::U8(v) => v as i128,
        Argument::U16(v) => v as i128,
        Argument::U32(v) => v as i128,
        Argument::U64(v) => v as i128,
        _ => 0,
    };

    let negative = value < 0;
    let magnitude = value.unsigned_abs();

    let (radix, upper, prefix): (u32, bool, &str) = match ty {
        Some('x') => (16, false, if spec.alternate { "0x" } else { "" }),
        Some('X') => (16, true, if spec.alternate { "0X" } else { "" }),
        Some('o') => (8, false, if spec.alternate { "0o" } else { "" }),
        Some('b') => (2, false, if spec.alternate { "0b" } else { "" }),
        _ => (10, false, ""),
    };

    let digits = to_radix(magnitude, radix, upper);
    if negative {
        out.push('-');
    } else if spec.sign {
        out.push('+');
    }
    out.push_str(prefix);
    out.push_str(&digits);
}

fn to_radix(mut value: u128, radix: u32, upper: bool) -> String {
    if value == 0 {
        return "0".to_owned();
    }
    let digits = if upper { b"0123456789ABCDEF" } else { b"0123456789abcdef" };
    let mut buf = Vec::new();
    while value > 0 {
        buf.push(digits[(value % radix as u128) as usize]);
        value /= radix as u128;
    }
    buf.reverse();
    String::from_utf8(buf).unwrap_or_default()
}

/// Renders a float in fixed or scientific (`e`) notation.
fn render_float(value: f64, spec: &Spec, default_precision: usize, out: &mut String) {
    let precision = spec.precision.unwrap_or(default_precision);
    if spec.sign && value >= 0.0 {
        out.push('+');
    }
    match spec.ty {
        Some('e') | Some('E') => {
            let formatted = format!("{value:.precision$e}");
            // Rust renders scientific notation as `1.5e3`; normalize to the
            // `e±NN` form with an explicit sign.
            if let Some((mantissa, exponent)) = formatted.split_once('e') {
                let exp: i32 = exponent.parse().unwrap_or(0);
                let marker = if spec.ty == Some('E') { 'E' } else { 'e' };
                let _ = write!(out, "{mantissa}{marker}{exp:+03}");
            } else {
                out.push_str(&formatted);
            }
        }
        _ => {
            let _ = write!(out, "{value:.precision$}");
        }
    }
}

fn pad(body: &str, spec: &Spec, out: &mut String) {
    let width = spec.width.unwrap_or(0);
    let len = body.chars().count();
    if len >= width {
        out.push_str(body);
        return;
    }

    let fill = spec.fill.unwrap_or(' ');
    let pad_len = width - len;
    if spec.align_left {
        out.push_str(body);
        out.extend(std::iter::repeat(fill).take(pad_len));
    } else if fill == '0' {
        // Zero-fill is sign/prefix-aware: the zeros go after any leading
        // `+`/`-` sign and `0x`/`0X`/`0o`/`0b` radix prefix, not before it.
        let prefix_len = zero_pad_prefix_len(body);
        out.push_str(&body[..prefix_len]);
        out.extend(std::iter::repeat('0').take(pad_len));
        out.push_str(&body[prefix_len..]);
    } else {
        out.extend(std::iter::repeat(fill).take(pad_len));
        out.push_str(body);
    }
}

/// The number of leading bytes of `body` a `0`-fill should keep ahead of
/// the inserted zeros: an optional sign followed by an optional radix
/// prefix. Non-numeric bodies have neither, so the zeros simply go first.
fn zero_pad_prefix_len(body: &str) -> usize {
    let bytes = body.as_bytes();
    let mut i = 0;
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        i += 1;
    }
    if matches!(bytes.get(i..i + 2), Some([b'0', b'x' | b'X' | b'o' | b'b'])) {
        i += 2;
    }
    i
}

/// Finds the next occurrence of `{` or `}` in `template[from..]` using
/// SIMD-accelerated scanning, returning its absolute byte offset.
fn scan_simd(template: &[u8], from: usize) -> Option<usize> {
    memchr::memchr2(b'{', b'}', &template[from..]).map(|i| from + i)
}

/// The scalar equivalent of [`scan_simd`], used only to cross-check output
/// byte-for-byte in tests.
#[cfg(test)]
fn scan_scalar(template: &[u8], from: usize) -> Option<usize> {
    template[from..].iter().position(|&b| b == b'{' || b == b'}').map(|i| from + i)
}

/// Renders `format` against `args`, substituting each `{...}` placeholder
/// with the next argument in `args` (sequential consumption regardless of
/// any digits inside the braces — `{0}` and `{7}` both just mean "next").
pub(crate) fn render_format(format: &str, args: &[Argument<'_>]) -> String {
    let bytes = format.as_bytes();
    let mut out = String::with_capacity(format.len() + args.len() * 8);
    let mut pos = 0;
    let mut arg_idx = 0;

    while let Some(brace) = scan_simd(bytes, pos) {
        out.push_str(&format[pos..brace]);

        if bytes[brace] == b'}' {
            if bytes.get(brace + 1) == Some(&b'}') {
                out.push('}');
                pos = brace + 2;
                continue;
            }
            // Stray `}` outside a placeholder: emit literally.
            out.push('}');
            pos = brace + 1;
            continue;
        }

        if bytes.get(brace + 1) == Some(&b'{') {
            out.push('{');
            pos = brace + 2;
            continue;
        }

        let Some(close) = memchr::memchr(b'}', &bytes[brace..]).map(|i| brace + i) else {
            out.push_str(&format[brace..]);
            pos = format.len();
            break;
        };

        let inner = &format[brace + 1..close];
        let spec = parse_spec(inner);
        if let Some(arg) = args.get(arg_idx) {
            render_arg(arg, &spec, &mut out);
        }
        arg_idx += 1;
        pos = close + 1;
    }

    out.push_str(&format[pos..]);
    out
}

/// The short tag used for each [`Level`] in the default console/file line
/// prefix.
fn level_tag(level: Level) -> &'static str {
    match level {
        Level::Verbose => "V",
        Level::Debug => "D",
        Level::Info => "I",
        Level::Warning => "W",
        Level::Error => "E",
        Level::Fatal => "F",
    }
}

/// Renders the full output line for a record: `"YYYY-MM-DD HH:MM:SS.mmm
/// TZ\t[LEVEL]\t[CATEGORY]\t[tid-N name]\t<formatted message>"`, where
/// `category` is resolved by the caller (the layout engine itself only
/// knows the numeric index) and the `[CATEGORY]` field is omitted entirely
/// when empty. `time_cache` supplies the cached date/time prefix and the
/// zone's label; the millisecond digits are always recomputed.
pub(crate) fn render_line(
    record: &Record<'_>,
    category_name: &str,
    time_cache: &mut TimeCache,
) -> String {
    let message = render_format(record.format, &record.args);
    let epoch_ms = record.epoch_ms as i64;

    let date_time = time_cache.prefix(epoch_ms).to_owned();
    let millis = millis_digits(epoch_ms.rem_euclid(1000) as u32);
    let millis = std::str::from_utf8(&millis).unwrap_or("000");
    let zone = time_cache.zone_label();

    let mut line = String::new();
    let _ = write!(line, "{date_time}{millis} {zone}\t[{}]", level_tag(record.level));
    if !category_name.is_empty() {
        let _ = write!(line, "\t[{category_name}]");
    }
    let _ = write!(
        line,
        "\t[tid-{} {}]\t{message}",
        record.thread_id,
        record.thread_name.unwrap_or("")
    );
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_text() {
        assert_eq!(render_format("hello world", &[]), "hello world");
    }

    #[test]
    fn test_escaped_braces() {
        assert_eq!(render_format("{{literal}}", &[]), "{literal}");
    }

    #[test]
    fn test_positional_sequential_consumption() {
        // `{0}` and `{1}` both just mean "next argument" — not a lookup by
        // the digit inside the braces.
        let args = [Argument::U32(10), Argument::U32(20)];
        assert_eq!(render_format("{1} then {0}", &args), "10 then 20");
    }

    #[test]
    fn test_repeated_placeholder_consumes_twice() {
        let args = [Argument::U32(1), Argument::U32(2)];
        assert_eq!(render_format("{0} {0}", &args), "1 2");
    }

    #[test]
    fn test_connect_example() {
        let args = [Argument::Str("9.134.131.77"), Argument::U16(18900)];
        assert_eq!(render_format("connect {}:{}", &args), "connect 9.134.131.77:18900");
    }

    #[test]
    fn test_width_and_fill() {
        let args = [Argument::U32(5)];
        assert_eq!(render_format("{:04}", &args), "0005");
        let args = [Argument::Str("hi")];
        assert_eq!(render_format("{:*<5}", &args), "hi***");
    }

    #[test]
    fn test_hex_alternate_uppercase() {
        let args = [Argument::U32(255)];
        assert_eq!(render_format("{:#X}", &args), "0XFF");
    }

    #[test]
    fn test_float_default_precision() {
        let args = [Argument::F64(1.5)];
        let rendered = render_format("{}", &args);
        assert_eq!(rendered, format!("{:.15}", 1.5f64));
    }

    #[test]
    fn test_scan_scalar_matches_simd() {
        let template = "prefix {a} middle {{escaped}} {b:04} suffix {c";
        let bytes = template.as_bytes();
        let mut simd_positions = Vec::new();
        let mut pos = 0;
        while let Some(i) = scan_simd(bytes, pos) {
            simd_positions.push(i);
            pos = i + 1;
        }
        let mut scalar_positions = Vec::new();
        let mut pos = 0;
        while let Some(i) = scan_scalar(bytes, pos) {
            scalar_positions.push(i);
            pos = i + 1;
        }
        assert_eq!(simd_positions, scalar_positions);
    }

    #[test]
    fn test_unterminated_placeholder_emitted_literally() {
        assert_eq!(render_format("tail {unterminated", &[]), "tail {unterminated");
    }
}
