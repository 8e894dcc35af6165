use super::ops::{ControlOp, Op, ValidationError};
use super::variables::{Variable, VariableTable};
use super::{Emulator, Instruction, OpCode, Operand, SourcePosition, MEMORY_BASE};
use indexmap::IndexMap;
use lexer::{Lexer, Token, TokenSpan};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

mod expr;
pub mod lexer;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum CompileErrorKind {
    #[error("invalid character: \"{0}\"")]
    InvalidChar(char),
    #[error("invalid number")]
    InvalidNumber,
    #[error("value out of range")]
    ValueOutOfRange,
    #[error("label or operator expected")]
    LabelOrOperatorExpected,
    #[error("operator expected after prefix")]
    OperatorExpectedAfterPrefix,
    #[error("operator cannot have a prefix")]
    OperatorCannotHavePrefix,
    #[error("operand expected")]
    OperandExpected,
    #[error("\":\" expected")]
    ColonExpected,
    #[error("\",\" expected")]
    CommaExpected,
    #[error("\"ptr\" expected")]
    PtrExpected,
    #[error("\"[\" expected")]
    SquareBracketExpected,
    #[error("invalid memory reference format")]
    InvalidMemoryRefFormat,
    #[error("invalid scale (only 1, 2, 4 and 8 are allowed)")]
    InvalidScale,
    #[error("duplicate label: \"{0}\"")]
    DuplicateLabel(String),
    #[error("unknown label: \"{0}\"")]
    UnknownLabel(String),
    #[error("not enough space for the variables: {0} bytes")]
    NotEnoughSpace(u64),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// The first error of a compilation. Only `NotEnoughSpace` has no position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub position: Option<SourcePosition>,
}

impl CompileError {
    pub fn at(kind: CompileErrorKind, position: SourcePosition) -> Self {
        Self {
            kind,
            position: Some(position),
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.position {
            Some(position) => write!(f, "{}: {}", position, self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for CompileError {}

/// What the last successful compilation produced besides the instructions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilationArtifacts {
    /// labels as written, in declaration order
    pub labels: IndexMap<String, u32>,
    pub address_to_label: IndexMap<u32, String>,
    /// 0-based source line to the address of its first instruction
    pub line_to_address: IndexMap<usize, u32>,
    pub address_to_line: IndexMap<u32, usize>,
    /// allocated variables, by address
    pub variables: Vec<Variable>,
}

impl CompilationArtifacts {
    pub fn line_of(&self, address: u32) -> Option<usize> {
        self.address_to_line.get(&address).copied()
    }
}

#[derive(Debug)]
pub struct ParseOutput {
    pub instructions: Vec<Instruction>,
    pub artifacts: CompilationArtifacts,
}

/// A label used before its declaration.
#[derive(Debug)]
struct PendingLabel {
    name: String,
    position: SourcePosition,
    instruction: usize,
    second_operand: bool,
}

/// Single pass compiler: statements are parsed and validated as tokens arrive,
/// forward label references are patched once the whole source was read.
pub struct Compiler<'a> {
    lexer: Lexer,
    variables: &'a VariableTable,
    memory_limit: u32,
    /// lower case name to instruction address
    labels: FxHashMap<String, u32>,
    pending: Vec<PendingLabel>,
    instructions: Vec<Instruction>,
    artifacts: CompilationArtifacts,
}

impl<'a> Compiler<'a> {
    /// `variables` must already be allocated.
    pub fn new(source: &str, variables: &'a VariableTable, memory_limit: u32) -> Self {
        Self {
            lexer: Lexer::new(source),
            variables,
            memory_limit,
            labels: FxHashMap::default(),
            pending: Vec::new(),
            instructions: Vec::new(),
            artifacts: CompilationArtifacts::default(),
        }
    }

    fn next_address(&self) -> u32 {
        self.memory_limit
            .wrapping_add((self.instructions.len() as u32) << 2)
    }

    pub fn compile(mut self) -> Result<ParseOutput, CompileError> {
        // position of a `rep` still waiting for its operator
        let mut prefix: Option<SourcePosition> = None;

        while let Some(t) = self.lexer.next_token()? {
            match t.token {
                Token::Identifier(name) => {
                    if prefix.is_some() {
                        return Err(CompileError::at(
                            CompileErrorKind::OperatorExpectedAfterPrefix,
                            t.position,
                        ));
                    }
                    if self.variables.get(&name).is_some() {
                        return Err(CompileError::at(
                            CompileErrorKind::LabelOrOperatorExpected,
                            t.position,
                        ));
                    }
                    match self.lexer.next_token()? {
                        Some(TokenSpan {
                            token: Token::Colon,
                            ..
                        }) => self.add_label(name, t.position)?,
                        _ => {
                            return Err(CompileError::at(
                                CompileErrorKind::ColonExpected,
                                t.position,
                            ))
                        }
                    }
                }
                Token::Operator(op) => prefix = self.parse_statement(op, t.position, prefix)?,
                _ => {
                    let kind = if prefix.is_some() {
                        CompileErrorKind::OperatorExpectedAfterPrefix
                    } else {
                        CompileErrorKind::LabelOrOperatorExpected
                    };
                    return Err(CompileError::at(kind, t.position));
                }
            }
        }
        if let Some(position) = prefix {
            return Err(CompileError::at(
                CompileErrorKind::OperatorExpectedAfterPrefix,
                position,
            ));
        }

        self.resolve_labels()?;
        self.artifacts.variables = self.variables.iter().cloned().collect();
        self.artifacts.variables.sort_by_key(|v| v.address);
        Ok(ParseOutput {
            instructions: self.instructions,
            artifacts: self.artifacts,
        })
    }

    fn add_label(&mut self, name: String, position: SourcePosition) -> Result<(), CompileError> {
        let key = name.to_lowercase();
        if self.labels.contains_key(&key) {
            return Err(CompileError::at(
                CompileErrorKind::DuplicateLabel(name),
                position,
            ));
        }
        let address = self.next_address();
        tracing::debug!("label {} at {:#010X}", name, address);
        self.labels.insert(key, address);
        self.artifacts.address_to_label.insert(address, name.clone());
        self.artifacts.labels.insert(name, address);
        Ok(())
    }

    /// Parses one instruction. Returns the position of `op` when it is a prefix
    /// that still needs its operator.
    fn parse_statement(
        &mut self,
        op: OpCode,
        position: SourcePosition,
        prefix: Option<SourcePosition>,
    ) -> Result<Option<SourcePosition>, CompileError> {
        let def = op.definition();
        if def.is_prefix {
            if prefix.is_some() {
                return Err(CompileError::at(
                    CompileErrorKind::OperatorExpectedAfterPrefix,
                    position,
                ));
            }
            self.emit(op, None, None, position)?;
            return Ok(Some(position));
        }
        if prefix.is_some() && !def.accepts_prefix {
            return Err(CompileError::at(
                CompileErrorKind::OperatorCannotHavePrefix,
                position,
            ));
        }

        let (op1, op2) = match def.operand_count {
            0 => (None, None),
            // the one operator whose operand is optional
            _ if op == OpCode::Control(ControlOp::Ret) => match self.lexer.peek_token()? {
                Some(TokenSpan {
                    token: Token::Number(value),
                    ..
                }) => {
                    let value = *value;
                    self.lexer.next_token()?;
                    (Some(Operand::immediate(value)), None)
                }
                _ => (None, None),
            },
            1 => (Some(self.parse_operand(position, false)?), None),
            _ => {
                let op1 = self.parse_operand(position, false)?;
                match self.lexer.next_token()? {
                    Some(TokenSpan {
                        token: Token::Comma,
                        ..
                    }) => {}
                    Some(t) => {
                        return Err(CompileError::at(CompileErrorKind::CommaExpected, t.position))
                    }
                    None => {
                        return Err(CompileError::at(CompileErrorKind::CommaExpected, position))
                    }
                }
                (Some(op1), Some(self.parse_operand(position, true)?))
            }
        };
        self.emit(op, op1, op2, position)?;
        Ok(None)
    }

    fn parse_operand(
        &mut self,
        operator: SourcePosition,
        second_operand: bool,
    ) -> Result<Operand, CompileError> {
        let Some(t) = self.lexer.next_token()? else {
            return Err(CompileError::at(CompileErrorKind::OperandExpected, operator));
        };
        match t.token {
            Token::Byte | Token::Word | Token::Dword | Token::OpenBracket => {
                self.parse_memory_operand(t)
            }
            Token::Number(value) => Ok(Operand::immediate(value)),
            Token::Register(register) => Ok(Operand::Register(register)),
            Token::Identifier(name) => {
                if let Some(variable) = self.variables.get(&name) {
                    return Ok(variable.operand());
                }
                if let Some(address) = self.labels.get(&name.to_lowercase()) {
                    return Ok(Operand::Label { address: *address });
                }
                // patched by resolve_labels
                self.pending.push(PendingLabel {
                    name,
                    position: t.position,
                    instruction: self.instructions.len(),
                    second_operand,
                });
                Ok(Operand::Label { address: 0 })
            }
            _ => Err(CompileError::at(CompileErrorKind::OperandExpected, operator)),
        }
    }

    fn emit(
        &mut self,
        op: OpCode,
        mut op1: Option<Operand>,
        mut op2: Option<Operand>,
        position: SourcePosition,
    ) -> Result<(), CompileError> {
        let def = op.definition();
        if !def.is_prefix {
            def.validate(&mut op1, &mut op2)
                .map_err(|e| CompileError::at(e.into(), position))?;
        }
        let address = self.next_address();
        self.artifacts
            .line_to_address
            .entry(position.line)
            .or_insert(address);
        self.artifacts.address_to_line.insert(address, position.line);
        self.instructions.push(Instruction {
            op,
            op1,
            op2,
            position,
        });
        Ok(())
    }

    fn resolve_labels(&mut self) -> Result<(), CompileError> {
        for pending in self.pending.drain(..) {
            let Some(address) = self.labels.get(&pending.name.to_lowercase()).copied() else {
                return Err(CompileError::at(
                    CompileErrorKind::UnknownLabel(pending.name),
                    pending.position,
                ));
            };
            let label = Some(Operand::Label { address });
            if let Some(instruction) = self.instructions.get_mut(pending.instruction) {
                if pending.second_operand {
                    instruction.op2 = label;
                } else {
                    instruction.op1 = label;
                }
            }
        }
        Ok(())
    }
}

impl Emulator {
    /// Allocates `variables` and compiles `source` against them. The emulator
    /// itself is left untouched; the caller loads the instructions.
    pub fn parse_program(
        &self,
        source: &str,
        variables: &mut VariableTable,
    ) -> Result<ParseOutput, CompileError> {
        let span = tracing::info_span!("compile", source_length = source.len());
        let _guard = span.enter();

        let memory_size = self.memory.size();
        variables.allocate(memory_size).map_err(|total| CompileError {
            kind: CompileErrorKind::NotEnoughSpace(total),
            position: None,
        })?;

        let out = Compiler::new(source, variables, MEMORY_BASE.wrapping_add(memory_size)).compile();
        match &out {
            Ok(out) => tracing::info!(
                "compiled {} instructions, {} labels",
                out.instructions.len(),
                out.artifacts.labels.len()
            ),
            Err(e) => tracing::warn!("compilation error: {}", e),
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulator::variables::VariableContents;
    use crate::emulator::{MemoryRef, Register};

    fn compile_with(source: &str, variables: &mut VariableTable) -> Result<ParseOutput, CompileError> {
        let emulator = Emulator::new(4096).unwrap();
        emulator.parse_program(source, variables)
    }

    fn compile(source: &str) -> Result<ParseOutput, CompileError> {
        compile_with(source, &mut VariableTable::new())
    }

    fn error_kind(source: &str) -> CompileErrorKind {
        compile(source).unwrap_err().kind
    }

    fn memory(source: &str) -> MemoryRef {
        let out = compile(source).unwrap();
        match out.instructions[0].op2 {
            Some(Operand::Memory(memory)) => memory,
            other => panic!("expected a memory operand, got {:?}", other),
        }
    }

    const LIMIT: u32 = 4096 + 1024;

    #[test]
    fn test_labels_forward_and_backward() {
        let out = compile("jmp done\nagain: nop\njmp again\ndone: hlt").unwrap();
        assert_eq!(
            out.instructions[0].op1,
            Some(Operand::Label { address: LIMIT + 12 })
        );
        assert_eq!(
            out.instructions[2].op1,
            Some(Operand::Label { address: LIMIT + 4 })
        );
        assert_eq!(out.artifacts.labels["done"], LIMIT + 12);
        assert_eq!(out.artifacts.line_of(LIMIT + 8), Some(2));
    }

    #[test]
    fn test_label_errors() {
        assert_eq!(
            error_kind("a: nop\nA: nop"),
            CompileErrorKind::DuplicateLabel("A".into())
        );
        assert_eq!(
            error_kind("jmp nowhere"),
            CompileErrorKind::UnknownLabel("nowhere".into())
        );
        assert_eq!(error_kind("lonely nop"), CompileErrorKind::ColonExpected);
        assert_eq!(
            error_kind("eax: nop"),
            CompileErrorKind::LabelOrOperatorExpected
        );
    }

    #[test]
    fn test_memory_expressions() {
        let m = memory("lea eax, [ebx + ecx*4 + 8]");
        assert_eq!(
            (m.base, m.index, m.scale, m.displacement, m.size),
            (Some(Register::Ebx), Some(Register::Ecx), 2, 8, 0)
        );

        let m = memory("mov al, byte ptr [2*eax*4 + 1 + 2]");
        assert_eq!((m.base, m.index, m.scale), (None, Some(Register::Eax), 3));
        assert_eq!((m.displacement, m.size), (3, 1));

        let m = memory("mov eax, [esi + edi]");
        assert_eq!((m.base, m.index, m.scale), (Some(Register::Edi), Some(Register::Esi), 0));

        let m = memory("mov eax, [0xFFFFFFFF + 2]");
        assert_eq!((m.base, m.displacement), (None, 1));
    }

    #[test]
    fn test_memory_expression_errors() {
        assert_eq!(
            error_kind("mov eax, [eax*ebx]"),
            CompileErrorKind::InvalidMemoryRefFormat
        );
        assert_eq!(
            error_kind("mov eax, [eax + ebx + ecx]"),
            CompileErrorKind::InvalidMemoryRefFormat
        );
        assert_eq!(
            error_kind("mov eax, [eax*2 + ebx*2]"),
            CompileErrorKind::InvalidMemoryRefFormat
        );
        assert_eq!(error_kind("mov eax, [eax*3]"), CompileErrorKind::InvalidScale);
        assert_eq!(error_kind("mov eax, [eax"), CompileErrorKind::InvalidMemoryRefFormat);
        assert_eq!(error_kind("mov eax, dword [eax]"), CompileErrorKind::PtrExpected);
        assert_eq!(
            error_kind("mov eax, dword ptr eax"),
            CompileErrorKind::SquareBracketExpected
        );
        assert_eq!(
            error_kind("mov eax, [unknown]"),
            CompileErrorKind::InvalidMemoryRefFormat
        );
    }

    #[test]
    fn test_statement_errors() {
        assert_eq!(error_kind("mov eax 1"), CompileErrorKind::CommaExpected);
        assert_eq!(error_kind("mov eax,"), CompileErrorKind::OperandExpected);
        assert_eq!(error_kind("rep mov eax, 1"), CompileErrorKind::OperatorCannotHavePrefix);
        assert_eq!(error_kind("rep rep stosb"), CompileErrorKind::OperatorExpectedAfterPrefix);
        assert_eq!(error_kind("rep"), CompileErrorKind::OperatorExpectedAfterPrefix);
        assert_eq!(error_kind("5"), CompileErrorKind::LabelOrOperatorExpected);
        assert_eq!(
            error_kind("mov [eax], [ebx]"),
            CompileErrorKind::Validation(ValidationError::MemoryToMemory)
        );
    }

    #[test]
    fn test_error_positions() {
        let err = compile("nop\n  mov eax, bx").unwrap_err();
        assert_eq!(
            err.kind,
            CompileErrorKind::Validation(ValidationError::SizeMismatch)
        );
        assert_eq!(err.to_string(), "2:3: destination and source sizes do not match");
    }

    #[test]
    fn test_ret_operand_is_optional() {
        let out = compile("ret\nret 8").unwrap();
        assert_eq!(out.instructions[0].op1, None);
        assert_eq!(out.instructions[1].op1.and_then(|o| o.constant()), Some(8));
    }

    #[test]
    fn test_variables_in_operands() {
        let mut vars = VariableTable::new();
        vars.add("count", 4, None, false, 4096).unwrap();
        vars.add("text", 0, Some(VariableContents::Text("hi".into())), false, 4096)
            .unwrap();
        let out = compile_with("mov eax, count\nlea esi, [text + 2]", &mut vars).unwrap();

        let count = vars.get("count").unwrap();
        assert_eq!(
            out.instructions[0].op2,
            Some(Operand::Memory(MemoryRef::direct(count.address, 4)))
        );
        match out.instructions[1].op2 {
            Some(Operand::Memory(m)) => {
                assert_eq!(m.displacement, vars.get("text").unwrap().address + 2)
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(out.artifacts.variables.len(), 2);

        let err = compile_with("count: nop", &mut vars).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::LabelOrOperatorExpected);
    }

    #[test]
    fn test_not_enough_space_has_no_position() {
        let mut vars = VariableTable::new();
        vars.add("big", 4096, None, false, 4096).unwrap();
        vars.add("more", 1, None, false, 4096).unwrap();
        let err = compile_with("nop", &mut vars).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::NotEnoughSpace(4097));
        assert_eq!(err.position, None);
    }
}
