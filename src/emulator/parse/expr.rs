//! `[size ptr] [ sum ]` memory operands.
//!
//! ```text
//! sum     := product ('+' sum)?
//! product := factor ('*' product)?
//! factor  := number | register | variable
//! ```
//!
//! Constants fold with 32 bit wraparound. A register multiplied by a constant
//! is the index, a bare register the base; when two bare registers appear the
//! leftmost one becomes an index with scale 1.

use super::lexer::{Token, TokenSpan};
use super::{CompileError, CompileErrorKind, Compiler};
use crate::emulator::{MemoryRef, Operand, Register, SourcePosition};

#[derive(Debug, Clone, Copy)]
enum Term {
    Constant {
        value: u32,
        at: SourcePosition,
    },
    Register {
        register: Register,
        at: SourcePosition,
    },
    Scaled {
        register: Register,
        scale: u32,
        /// where the scale was written, for error reporting
        scale_at: SourcePosition,
        at: SourcePosition,
    },
}

impl Term {
    fn position(&self) -> SourcePosition {
        match self {
            Term::Constant { at, .. } | Term::Register { at, .. } | Term::Scaled { at, .. } => *at,
        }
    }
}

fn invalid_format(at: SourcePosition) -> CompileError {
    CompileError::at(CompileErrorKind::InvalidMemoryRefFormat, at)
}

fn scale_shift(scale: u32) -> Option<u8> {
    match scale {
        1 => Some(0),
        2 => Some(1),
        4 => Some(2),
        8 => Some(3),
        _ => None,
    }
}

impl Compiler<'_> {
    /// Parses a memory operand whose first token (`byte`/`word`/`dword` or `[`)
    /// was already consumed.
    pub(super) fn parse_memory_operand(&mut self, first: TokenSpan) -> Result<Operand, CompileError> {
        let size = match first.token {
            Token::Byte => 1,
            Token::Word => 2,
            Token::Dword => 4,
            _ => 0,
        };
        if size != 0 {
            self.expect(first.position, CompileErrorKind::PtrExpected, |t| {
                *t == Token::Ptr
            })?;
            self.expect(first.position, CompileErrorKind::SquareBracketExpected, |t| {
                *t == Token::OpenBracket
            })?;
        }

        let terms = self.parse_sum(first.position)?;
        // the sum only returns once it sees the closing bracket
        self.lexer.next_token()?;

        let mut memory = MemoryRef {
            size,
            ..MemoryRef::default()
        };
        let mut index: Option<(Register, u32, SourcePosition)> = None;
        for term in terms.into_iter().rev() {
            match term {
                Term::Constant { value, .. } => {
                    memory.displacement = memory.displacement.wrapping_add(value);
                }
                Term::Register { register, at } => {
                    if memory.base.is_none() {
                        memory.base = Some(register);
                    } else if index.is_none() {
                        index = Some((register, 1, at));
                    } else {
                        return Err(invalid_format(at));
                    }
                }
                Term::Scaled {
                    register,
                    scale,
                    scale_at,
                    at,
                } => {
                    if index.is_some() {
                        return Err(invalid_format(at));
                    }
                    index = Some((register, scale, scale_at));
                }
            }
        }
        if let Some((register, scale, at)) = index {
            memory.index = Some(register);
            memory.scale = scale_shift(scale)
                .ok_or_else(|| CompileError::at(CompileErrorKind::InvalidScale, at))?;
        }
        tracing::trace!("memory operand {}", memory);
        Ok(Operand::Memory(memory))
    }

    fn expect(
        &mut self,
        fallback: SourcePosition,
        kind: CompileErrorKind,
        accept: impl Fn(&Token) -> bool,
    ) -> Result<(), CompileError> {
        match self.lexer.next_token()? {
            Some(t) if accept(&t.token) => Ok(()),
            Some(t) => Err(CompileError::at(kind, t.position)),
            None => Err(CompileError::at(kind, fallback)),
        }
    }

    /// Terms in source order, up to (not including) the closing bracket.
    fn parse_sum(&mut self, start: SourcePosition) -> Result<Vec<Term>, CompileError> {
        let mut terms = Vec::new();
        loop {
            terms.push(self.parse_product(start)?);
            match self.lexer.peek_token()? {
                None => return Err(invalid_format(start)),
                Some(TokenSpan {
                    token: Token::CloseBracket,
                    ..
                }) => return Ok(terms),
                Some(_) => {}
            }
            if let Some(t) = self.lexer.next_token()? {
                if t.token != Token::Add {
                    return Err(invalid_format(t.position));
                }
            }
        }
    }

    fn parse_product(&mut self, start: SourcePosition) -> Result<Term, CompileError> {
        let left = self.parse_factor(start)?;
        match self.lexer.peek_token()? {
            None => return Err(invalid_format(start)),
            Some(TokenSpan {
                token: Token::Add | Token::CloseBracket,
                ..
            }) => return Ok(left),
            Some(_) => {}
        }
        if let Some(t) = self.lexer.next_token()? {
            if t.token != Token::Multiply {
                return Err(invalid_format(t.position));
            }
        }
        let right = self.parse_product(start)?;

        match (left, right) {
            (Term::Constant { value: a, .. }, Term::Constant { value: b, at }) => Ok(Term::Constant {
                value: a.wrapping_mul(b),
                at,
            }),
            (
                Term::Constant { value, .. },
                Term::Scaled {
                    register,
                    scale,
                    scale_at,
                    at,
                },
            ) => Ok(Term::Scaled {
                register,
                scale: value.wrapping_mul(scale),
                scale_at,
                at,
            }),
            (Term::Constant { value, at: scale_at }, Term::Register { register, at })
            | (Term::Register { register, at }, Term::Constant { value, at: scale_at }) => {
                Ok(Term::Scaled {
                    register,
                    scale: value,
                    scale_at,
                    at,
                })
            }
            // register * register, or a register times an already scaled register
            (_, right) => Err(invalid_format(right.position())),
        }
    }

    fn parse_factor(&mut self, start: SourcePosition) -> Result<Term, CompileError> {
        let Some(t) = self.lexer.next_token()? else {
            return Err(invalid_format(start));
        };
        match t.token {
            Token::Number(value) => Ok(Term::Constant {
                value,
                at: t.position,
            }),
            Token::Register(register) => Ok(Term::Register {
                register,
                at: t.position,
            }),
            // a variable inside brackets stands for its address
            Token::Identifier(ref name) => match self.variables.get(name) {
                Some(variable) => Ok(Term::Constant {
                    value: variable.address,
                    at: t.position,
                }),
                None => Err(invalid_format(t.position)),
            },
            _ => Err(invalid_format(t.position)),
        }
    }
}
