//! `format-number()` with the default decimal format.

use xv_core::XvError;
use xv_core::XvResult;

const DIGIT_CHARS: &[char] = &['0', '#', ',', '.'];

#[derive(Debug, Clone, PartialEq, Eq)]
struct SubPattern {
    prefix: String,
    suffix: String,
    min_int: usize,
    min_frac: usize,
    max_frac: usize,
    grouping: usize,
    multiplier: u32,
}

impl SubPattern {
    fn parse(source: &str, pattern: &str) -> XvResult<Self> {
        let start = source.find(DIGIT_CHARS).ok_or_else(|| invalid(pattern))?;
        let digits_len = source[start..]
            .find(|c: char| !DIGIT_CHARS.contains(&c))
            .unwrap_or(source.len() - start);
        let prefix = &source[..start];
        let digits = &source[start..start + digits_len];
        let suffix = &source[start + digits_len..];

        let (int_part, frac_part) = match digits.split_once('.') {
            Some((_, frac)) if frac.contains(['.', ',']) => return Err(invalid(pattern)),
            Some((int, frac)) => (int, frac),
            None => (digits, ""),
        };
        let grouping = match int_part.rfind(',') {
            Some(at) => int_part.len() - at - 1,
            None => 0,
        };
        let multiplier = if prefix.contains('%') || suffix.contains('%') {
            100
        } else if prefix.contains('\u{2030}') || suffix.contains('\u{2030}') {
            1000
        } else {
            1
        };

        Ok(Self {
            prefix: prefix.to_owned(),
            suffix: suffix.to_owned(),
            min_int: int_part.matches('0').count(),
            min_frac: frac_part.matches('0').count(),
            max_frac: frac_part.matches(['0', '#']).count(),
            grouping,
            multiplier,
        })
    }

    fn digits(&self, magnitude: f64) -> String {
        let fixed = format!("{:.*}", self.max_frac, magnitude * f64::from(self.multiplier));
        let (int_digits, frac_digits) = fixed.split_once('.').unwrap_or((fixed.as_str(), ""));

        let mut frac = frac_digits.to_owned();
        while frac.len() > self.min_frac && frac.ends_with('0') {
            frac.pop();
        }
        let significant = int_digits.trim_start_matches('0');
        let mut int = "0".repeat(self.min_int.saturating_sub(significant.len()));
        int.push_str(significant);
        if int.is_empty() && frac.is_empty() {
            int.push('0');
        }

        let mut out = group(&int, self.grouping);
        if !frac.is_empty() {
            out.push('.');
            out.push_str(&frac);
        }
        out
    }
}

/// Formats `value` by a JDK-style decimal pattern such as `#,##0.00` or `0.0%;(0.0%)`.
pub(crate) fn format_number(value: f64, pattern: &str) -> XvResult<String> {
    let (positive_source, negative_source) = match pattern.split_once(';') {
        Some((_, negative)) if negative.contains(';') => return Err(invalid(pattern)),
        Some((positive, negative)) => (positive, Some(negative)),
        None => (pattern, None),
    };
    let positive = SubPattern::parse(positive_source, pattern)?;

    if value.is_nan() {
        return Ok("NaN".to_owned());
    }
    let digits = if value.is_infinite() {
        "Infinity".to_owned()
    } else {
        positive.digits(value.abs())
    };
    let is_zero = digits.chars().all(|c| matches!(c, '0' | '.' | ','));
    if value.is_sign_positive() || is_zero {
        return Ok(format!("{}{digits}{}", positive.prefix, positive.suffix));
    }

    Ok(match negative_source {
        Some(source) => {
            let negative = SubPattern::parse(source, pattern)?;
            format!("{}{digits}{}", negative.prefix, negative.suffix)
        }
        None => format!("-{}{digits}{}", positive.prefix, positive.suffix),
    })
}

fn group(int: &str, size: usize) -> String {
    if size == 0 || int.len() <= size {
        return int.to_owned();
    }
    let mut out = String::with_capacity(int.len() + int.len() / size);
    for (index, digit) in int.chars().enumerate() {
        if index > 0 && (int.len() - index) % size == 0 {
            out.push(',');
        }
        out.push(digit);
    }
    out
}

fn invalid(pattern: &str) -> XvError {
    XvError::new(
        "xslt.eval.format_pattern",
        format!("invalid format-number pattern '{pattern}'"),
    )
}

#[cfg(test)]
mod tests {
    use super::format_number;

    fn format(value: f64, pattern: &str) -> String {
        match format_number(value, pattern) {
            Ok(text) => text,
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn grouping_and_fraction_digits() {
        assert_eq!(format(1234.5, "#,##0.00"), "1,234.50");
        assert_eq!(format(1234567.891, "#,###"), "1,234,568");
        assert_eq!(format(3.10, "0.##"), "3.1");
        assert_eq!(format(12.0, "000"), "012");
        assert_eq!(format(0.0, "#"), "0");
        assert_eq!(format(0.25, "#.00"), ".25");
    }

    #[test]
    fn percent_and_negative_subpatterns() {
        assert_eq!(format(0.256, "0.0%"), "25.6%");
        assert_eq!(format(-3.14159, "0.00;(0.00)"), "(3.14)");
        assert_eq!(format(-7.0, "#"), "-7");
        assert_eq!(format(-0.001, "0.0"), "0.0");
        assert_eq!(format(f64::NAN, "0"), "NaN");
        assert_eq!(format(f64::NEG_INFINITY, "0"), "-Infinity");
    }

    #[test]
    fn malformed_patterns_are_rejected() {
        for pattern in ["abc", "0.0.0", "0;0;0"] {
            if let Err(error) = format_number(1.0, pattern) {
                assert_eq!(error.code, "xslt.eval.format_pattern");
            } else {
                panic!("expected {pattern} to be rejected");
            }
        }
    }
}
