use agentflow_core::error::{FlowError, Result};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Question,
    Colon,
    Bang,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Lt,
    Le,
    Gt,
    Ge,
    EqLoose,
    NeLoose,
    EqStrict,
    NeStrict,
    And,
    Or,
}

/// Split an expression into tokens.
pub(crate) fn tokenize(source: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let value = text
                .parse::<f64>()
                .map_err(|_| FlowError::Expression(format!("invalid number literal '{}'", text)))?;
            tokens.push(Token::Number(value));
            continue;
        }

        if c == '"' || c == '\'' {
            let (text, next) = read_string(&chars, i)?;
            tokens.push(Token::Str(text));
            i = next;
            continue;
        }

        if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }

        let rest = |n: usize| chars.get(i + n).copied();
        let (token, width) = match c {
            '(' => (Token::LParen, 1),
            ')' => (Token::RParen, 1),
            '[' => (Token::LBracket, 1),
            ']' => (Token::RBracket, 1),
            '.' => (Token::Dot, 1),
            '?' => (Token::Question, 1),
            ':' => (Token::Colon, 1),
            '+' => (Token::Plus, 1),
            '-' => (Token::Minus, 1),
            '*' => (Token::Star, 1),
            '/' => (Token::Slash, 1),
            '%' => (Token::Percent, 1),
            '<' if rest(1) == Some('=') => (Token::Le, 2),
            '<' => (Token::Lt, 1),
            '>' if rest(1) == Some('=') => (Token::Ge, 2),
            '>' => (Token::Gt, 1),
            '=' if rest(1) == Some('=') && rest(2) == Some('=') => (Token::EqStrict, 3),
            '=' if rest(1) == Some('=') => (Token::EqLoose, 2),
            '!' if rest(1) == Some('=') && rest(2) == Some('=') => (Token::NeStrict, 3),
            '!' if rest(1) == Some('=') => (Token::NeLoose, 2),
            '!' => (Token::Bang, 1),
            '&' if rest(1) == Some('&') => (Token::And, 2),
            '|' if rest(1) == Some('|') => (Token::Or, 2),
            other => {
                return Err(FlowError::Expression(format!(
                    "unexpected character '{}' at offset {}",
                    other, i
                )))
            }
        };
        tokens.push(token);
        i += width;
    }

    Ok(tokens)
}

/// Read a quoted string starting at `start`, returning its text and the index after the closing quote.
fn read_string(chars: &[char], start: usize) -> Result<(String, usize)> {
    let quote = chars[start];
    let mut text = String::new();
    let mut i = start + 1;

    while i < chars.len() {
        match chars[i] {
            '\\' => {
                let escaped = chars
                    .get(i + 1)
                    .ok_or_else(|| FlowError::Expression("unterminated escape".into()))?;
                text.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => *other,
                });
                i += 2;
            }
            c if c == quote => return Ok((text, i + 1)),
            c => {
                text.push(c);
                i += 1;
            }
        }
    }

    Err(FlowError::Expression("unterminated string literal".into()))
}
