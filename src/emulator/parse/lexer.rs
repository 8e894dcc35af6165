use super::{CompileError, CompileErrorKind};
use crate::emulator::{OpCode, Register, SourcePosition};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Multiply,
    Add,
    Comma,
    Colon,
    OpenBracket,
    CloseBracket,
    /// Two's complement value; negative literals are already wrapped.
    Number(u32),
    Byte,
    Word,
    Dword,
    Ptr,
    Register(Register),
    Operator(OpCode),
    /// Label or variable name, as written.
    Identifier(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSpan {
    pub token: Token,
    pub position: SourcePosition,
}

fn is_space(c: char) -> bool {
    matches!(
        c,
        '\t' | '\u{0B}'
            | '\u{0C}'
            | ' '
            | '\u{A0}'
            | '\u{1680}'
            | '\u{180E}'
            | '\u{2000}'..='\u{200A}'
            | '\u{202F}'
            | '\u{205F}'
            | '\u{3000}'
            | '\u{FEFF}'
    )
}

fn is_word_char(c: char) -> bool {
    c == '_' || c.is_ascii_alphanumeric() || c >= '\u{C0}'
}

/// Length of the line terminator starting at `chars[0]`, if there is one.
fn line_break(chars: &[char]) -> Option<usize> {
    match chars {
        ['\n', '\r', ..] | ['\r', '\n', ..] => Some(2),
        ['\n' | '\r' | '\u{85}' | '\u{2028}' | '\u{2029}', ..] => Some(1),
        _ => None,
    }
}

/// Decimal, `0x` hex, `0b` binary, or a decimal-looking body with an `h`/`b`
/// suffix. A leading `-` negates. Anything outside `-2^31..=2^32-1` is out of range.
pub fn parse_number(text: &str) -> Result<u32, CompileErrorKind> {
    let digits: Vec<char> = text.to_lowercase().chars().collect();
    let negative = digits.first() == Some(&'-');
    let mut start = usize::from(negative);
    let mut end = digits.len();
    let mut radix = 10;

    if end >= start + 2 {
        match &digits[start..start + 2] {
            ['0', 'x'] => {
                radix = 16;
                start += 2;
            }
            ['0', 'b'] => {
                radix = 2;
                start += 2;
            }
            _ => match digits[end - 1] {
                'b' => {
                    radix = 2;
                    end -= 1;
                }
                'h' => {
                    radix = 16;
                    end -= 1;
                }
                _ => {}
            },
        }
    }
    if start >= end {
        return Err(CompileErrorKind::InvalidNumber);
    }

    let mut value: u64 = 0;
    for c in &digits[start..end] {
        let digit = c.to_digit(radix).ok_or(CompileErrorKind::InvalidNumber)?;
        value = value
            .checked_mul(u64::from(radix))
            .and_then(|v| v.checked_add(u64::from(digit)))
            .ok_or(CompileErrorKind::ValueOutOfRange)?;
    }

    if negative {
        if value > 0x8000_0000 {
            return Err(CompileErrorKind::ValueOutOfRange);
        }
        Ok((value as u32).wrapping_neg())
    } else {
        u32::try_from(value).map_err(|_| CompileErrorKind::ValueOutOfRange)
    }
}

/// On-demand tokenizer with one token of lookahead.
///
/// Positions count characters. Lines end at `\n`, `\r`, `\r\n`, `\n\r`, U+0085,
/// U+2028 and U+2029; `;` comments run to the end of the line.
pub struct Lexer {
    chars: Vec<char>,
    index: usize,
    line: usize,
    line_start: usize,
    peeked: Option<TokenSpan>,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            index: 0,
            line: 0,
            line_start: 0,
            peeked: None,
        }
    }

    fn position(&self, index: usize) -> SourcePosition {
        SourcePosition {
            line: self.line,
            column: index - self.line_start,
            index,
        }
    }

    pub fn next_token(&mut self) -> Result<Option<TokenSpan>, CompileError> {
        if let Some(token) = self.peeked.take() {
            return Ok(Some(token));
        }
        self.scan()
    }

    pub fn peek_token(&mut self) -> Result<Option<&TokenSpan>, CompileError> {
        if self.peeked.is_none() {
            self.peeked = self.scan()?;
        }
        Ok(self.peeked.as_ref())
    }

    fn scan(&mut self) -> Result<Option<TokenSpan>, CompileError> {
        let mut in_comment = false;
        let mut start: Option<usize> = None;

        while self.index < self.chars.len() {
            let i = self.index;
            let c = self.chars[i];

            if let Some(width) = line_break(&self.chars[i..]) {
                let token = start.map(|s| self.make_token(s, i)).transpose()?;
                self.index = i + width;
                self.line += 1;
                self.line_start = self.index;
                if token.is_some() {
                    return Ok(token);
                }
                in_comment = false;
                continue;
            }
            if is_space(c) {
                self.index = i + 1;
                if let Some(s) = start {
                    return self.make_token(s, i).map(Some);
                }
                continue;
            }
            if in_comment {
                self.index = i + 1;
                continue;
            }

            match c {
                '*' | '+' | ',' | ':' | '[' | ']' => {
                    // a word right before punctuation ends there; the punctuation is scanned next time
                    if let Some(s) = start {
                        return self.make_token(s, i).map(Some);
                    }
                    self.index = i + 1;
                    return self.make_token(i, i + 1).map(Some);
                }
                ';' => {
                    if let Some(s) = start {
                        return self.make_token(s, i).map(Some);
                    }
                    in_comment = true;
                }
                '-' if start.is_none() => start = Some(i),
                c if is_word_char(c) => {
                    start.get_or_insert(i);
                }
                c => {
                    return Err(CompileError::at(
                        CompileErrorKind::InvalidChar(c),
                        self.position(i),
                    ))
                }
            }
            self.index = i + 1;
        }

        start.map(|s| self.make_token(s, self.chars.len())).transpose()
    }

    fn make_token(&self, start: usize, end: usize) -> Result<TokenSpan, CompileError> {
        let position = self.position(start);
        let text: String = self.chars[start..end].iter().collect();
        let token = match text.as_str() {
            "*" => Token::Multiply,
            "+" => Token::Add,
            "," => Token::Comma,
            ":" => Token::Colon,
            "[" => Token::OpenBracket,
            "]" => Token::CloseBracket,
            _ if text.starts_with(|c: char| c <= '9') => Token::Number(
                parse_number(&text).map_err(|kind| CompileError::at(kind, position))?,
            ),
            _ => {
                let lower = text.to_lowercase();
                match lower.as_str() {
                    "byte" => Token::Byte,
                    "word" => Token::Word,
                    "dword" => Token::Dword,
                    "ptr" => Token::Ptr,
                    _ => {
                        if let Some(register) = Register::from_name(&lower) {
                            Token::Register(register)
                        } else if let Some(op) = OpCode::from_mnemonic(&lower) {
                            Token::Operator(op)
                        } else {
                            Token::Identifier(text)
                        }
                    }
                }
            }
        };
        tracing::trace!("{}: {:?}", position, token);
        Ok(TokenSpan { token, position })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<TokenSpan> {
        let mut lexer = Lexer::new(source);
        let mut out = Vec::new();
        while let Some(token) = lexer.next_token().unwrap() {
            out.push(token);
        }
        out
    }

    fn kinds(source: &str) -> Vec<Token> {
        tokens(source).into_iter().map(|t| t.token).collect()
    }

    #[test]
    fn test_number_formats() {
        assert_eq!(parse_number("42"), Ok(42));
        assert_eq!(parse_number("0x1F"), Ok(0x1F));
        assert_eq!(parse_number("0b101"), Ok(5));
        assert_eq!(parse_number("101b"), Ok(5));
        assert_eq!(parse_number("0FFh"), Ok(0xFF));
        assert_eq!(parse_number("1h"), Ok(1));
        assert_eq!(parse_number("-1"), Ok(0xFFFF_FFFF));
        assert_eq!(parse_number("-0x80000000"), Ok(0x8000_0000));
        assert_eq!(parse_number("0xFFFFFFFF"), Ok(u32::MAX));
    }

    #[test]
    fn test_bad_numbers() {
        assert_eq!(parse_number("-"), Err(CompileErrorKind::InvalidNumber));
        assert_eq!(parse_number("0x"), Err(CompileErrorKind::InvalidNumber));
        assert_eq!(parse_number("12a"), Err(CompileErrorKind::InvalidNumber));
        assert_eq!(parse_number("0b102"), Err(CompileErrorKind::InvalidNumber));
        assert_eq!(
            parse_number("0x100000000"),
            Err(CompileErrorKind::ValueOutOfRange)
        );
        assert_eq!(
            parse_number("-2147483649"),
            Err(CompileErrorKind::ValueOutOfRange)
        );
        assert_eq!(
            parse_number("99999999999999999999999"),
            Err(CompileErrorKind::ValueOutOfRange)
        );
    }

    #[test]
    fn test_statement_tokens() {
        assert_eq!(
            kinds("start: mov dword ptr [ebx+ecx*4], -1 ; done"),
            vec![
                Token::Identifier("start".into()),
                Token::Colon,
                Token::Operator(OpCode::from_mnemonic("mov").unwrap()),
                Token::Dword,
                Token::Ptr,
                Token::OpenBracket,
                Token::Register(Register::Ebx),
                Token::Add,
                Token::Register(Register::Ecx),
                Token::Multiply,
                Token::Number(4),
                Token::CloseBracket,
                Token::Comma,
                Token::Number(u32::MAX),
            ]
        );
    }

    #[test]
    fn test_in_is_an_operator() {
        assert_eq!(
            kinds("IN al, dx"),
            vec![
                Token::Operator(OpCode::from_mnemonic("in").unwrap()),
                Token::Register(Register::Al),
                Token::Comma,
                Token::Register(Register::Dx),
            ]
        );
    }

    #[test]
    fn test_positions_follow_line_breaks() {
        let spans = tokens("nop\r\n  ; comment\n\tcli\u{2028}hlt");
        let positions: Vec<(usize, usize)> = spans
            .iter()
            .map(|t| (t.position.line, t.position.column))
            .collect();
        assert_eq!(positions, vec![(0, 0), (2, 1), (3, 0)]);
        assert_eq!(spans[1].position.index, 18);
    }

    #[test]
    fn test_unicode_spaces_separate_tokens() {
        assert_eq!(kinds("nop\u{3000}nop\u{A0}nop").len(), 3);
    }

    #[test]
    fn test_invalid_character() {
        let mut lexer = Lexer::new("mov eax, 1\nmov eax, $");
        let err = loop {
            match lexer.next_token() {
                Ok(Some(_)) => continue,
                Ok(None) => panic!("expected an error"),
                Err(e) => break e,
            }
        };
        assert_eq!(err.kind, CompileErrorKind::InvalidChar('$'));
        let position = err.position.unwrap();
        assert_eq!((position.line, position.column, position.index), (1, 9, 20));
    }

    #[test]
    fn test_peek_does_not_consume() {
        let mut lexer = Lexer::new("ret\n4");
        lexer.next_token().unwrap();
        assert_eq!(lexer.peek_token().unwrap().unwrap().token, Token::Number(4));
        let number = lexer.next_token().unwrap().unwrap();
        assert_eq!(number.position.line, 1);
        assert_eq!(lexer.next_token().unwrap(), None);
    }
}
