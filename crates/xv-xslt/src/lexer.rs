//! XPath 1.0 tokenizer.

use xv_core::XvError;
use xv_core::XvResult;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    DotDot,
    At,
    Comma,
    ColonColon,
    Slash,
    DoubleSlash,
    Pipe,
    Plus,
    Minus,
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
    /// Name test wildcard.
    Star,
    Multiply,
    And,
    Or,
    Mod,
    Div,
    Variable(String),
    Literal(String),
    Number(f64),
    /// QName or `prefix:*`.
    Name(String),
}

impl Token {
    fn is_operator(&self) -> bool {
        matches!(
            self,
            Self::And
                | Self::Or
                | Self::Mod
                | Self::Div
                | Self::Multiply
                | Self::Slash
                | Self::DoubleSlash
                | Self::Pipe
                | Self::Plus
                | Self::Minus
                | Self::Eq
                | Self::Neq
                | Self::Lt
                | Self::Le
                | Self::Gt
                | Self::Ge
        )
    }

    /// Whether a following `*` or NCName must be read as an operator.
    fn forces_operator(&self) -> bool {
        !matches!(
            self,
            Self::At | Self::ColonColon | Self::LParen | Self::LBracket | Self::Comma
        ) && !self.is_operator()
    }
}

pub(crate) fn tokenize(input: &str) -> XvResult<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens: Vec<Token> = Vec::new();
    let mut idx = 0_usize;

    while idx < chars.len() {
        let ch = chars[idx];
        if ch.is_whitespace() {
            idx += 1;
            continue;
        }

        let next = chars.get(idx + 1).copied();
        let operator_position = tokens.last().is_some_and(Token::forces_operator);
        let (token, width) = match ch {
            '(' => (Token::LParen, 1),
            ')' => (Token::RParen, 1),
            '[' => (Token::LBracket, 1),
            ']' => (Token::RBracket, 1),
            '@' => (Token::At, 1),
            ',' => (Token::Comma, 1),
            '|' => (Token::Pipe, 1),
            '+' => (Token::Plus, 1),
            '-' => (Token::Minus, 1),
            '=' => (Token::Eq, 1),
            '!' if next == Some('=') => (Token::Neq, 2),
            '<' if next == Some('=') => (Token::Le, 2),
            '<' => (Token::Lt, 1),
            '>' if next == Some('=') => (Token::Ge, 2),
            '>' => (Token::Gt, 1),
            ':' if next == Some(':') => (Token::ColonColon, 2),
            '/' if next == Some('/') => (Token::DoubleSlash, 2),
            '/' => (Token::Slash, 1),
            '*' if operator_position => (Token::Multiply, 1),
            '*' => (Token::Star, 1),
            '.' if next == Some('.') => (Token::DotDot, 2),
            '.' if next.is_some_and(|digit| digit.is_ascii_digit()) => read_number(&chars, idx),
            '.' => (Token::Dot, 1),
            '0'..='9' => read_number(&chars, idx),
            '"' | '\'' => {
                let close = chars[idx + 1..]
                    .iter()
                    .position(|candidate| *candidate == ch)
                    .ok_or_else(|| syntax_error(input, "unterminated string literal"))?;
                let value: String = chars[idx + 1..idx + 1 + close].iter().collect();
                (Token::Literal(value), close + 2)
            }
            '$' => {
                let (name, width) = read_qname(&chars, idx + 1);
                if name.is_empty() {
                    return Err(syntax_error(input, "expected variable name after `$`"));
                }
                (Token::Variable(name), width + 1)
            }
            other if is_name_start(other) => {
                let (name, width) = read_qname(&chars, idx);
                let token = if operator_position {
                    match name.as_str() {
                        "and" => Token::And,
                        "or" => Token::Or,
                        "mod" => Token::Mod,
                        "div" => Token::Div,
                        _ => {
                            return Err(syntax_error(
                                input,
                                &format!("expected an operator, found `{name}`"),
                            ));
                        }
                    }
                } else {
                    Token::Name(name)
                };
                (token, width)
            }
            other => {
                return Err(syntax_error(input, &format!("unexpected character `{other}`")));
            }
        };

        tokens.push(token);
        idx += width;
    }

    Ok(tokens)
}

fn read_number(chars: &[char], start: usize) -> (Token, usize) {
    let mut end = start;
    let mut seen_dot = false;
    while let Some(ch) = chars.get(end) {
        match ch {
            '0'..='9' => {}
            '.' if !seen_dot => seen_dot = true,
            _ => break,
        }
        end += 1;
    }
    let text: String = chars[start..end].iter().collect();
    (Token::Number(text.parse::<f64>().unwrap_or(f64::NAN)), end - start)
}

/// Reads `ncname`, `prefix:ncname` or `prefix:*`; never consumes `::`.
fn read_qname(chars: &[char], start: usize) -> (String, usize) {
    let mut end = read_ncname(chars, start);
    if end > start && chars.get(end) == Some(&':') && chars.get(end + 1) != Some(&':') {
        match chars.get(end + 1) {
            Some('*') => end += 2,
            Some(ch) if is_name_start(*ch) => end = read_ncname(chars, end + 1),
            _ => {}
        }
    }
    (chars[start..end].iter().collect(), end - start)
}

fn read_ncname(chars: &[char], start: usize) -> usize {
    let mut end = start;
    if chars.get(end).is_some_and(|ch| is_name_start(*ch)) {
        end += 1;
        while chars.get(end).is_some_and(|ch| is_name_char(*ch)) {
            end += 1;
        }
    }
    end
}

fn is_name_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_'
}

fn is_name_char(ch: char) -> bool {
    ch.is_alphanumeric() || matches!(ch, '_' | '-' | '.' | '\u{b7}')
}

pub(crate) fn syntax_error(expression: &str, detail: &str) -> XvError {
    XvError::new(
        "xslt.xpath.syntax",
        format!("{detail} in expression `{expression}`"),
    )
}
