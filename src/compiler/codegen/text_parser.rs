//! Parser for inline Wasm text fragments.
//!
//! Runtime-library methods can carry their body as a text fragment; this
//! parser turns such a fragment into the same instruction list the method
//! translator produces. Both flat sequences (`local.get 0` per line, blocks
//! closed with `end`) and folded forms (`(i32.add (local.get 0)
//! (i32.const 1))`, operands first) are accepted.
//!
//! `call` takes a `$class.method` id plus an optional string descriptor:
//!
//! ```text
//! local.get 0
//! call $wasm/Runtime.vtableOf "(Ljava/lang/Object;)I"
//! ```
//!
//! Unknown mnemonics and missing immediates are reported with the fragment
//! line they occurred on.

use crate::compiler::codegen::function_name::FunctionName;
use crate::compiler::codegen::instructions::{
    BlockOp, ConstValue, NumericOp, WasmInstruction, WasmOp,
};
use crate::compiler::codegen::value_types::ValueType;
use crate::compiler::codegen::wasm_opcodes::{BlockStartKind, TextOp, lookup_mnemonic};
use crate::compiler::compiler_errors::{ErrorKind, WasmError};

pub fn parse_fragment(source: &str) -> Result<Vec<WasmInstruction>, WasmError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let mut instrs = Vec::new();
    parser.parse_sequence(&mut instrs, false)?;
    Ok(instrs)
}

// =============================================================================
// Tokeniser
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    /// Mnemonics, keywords and the number-like words (`nan`, `inf`)
    Ident(String),
    /// `$`-prefixed identifier
    Id(String),
    /// Unparsed number text; the context decides the width
    Number(String),
    Str(String),
}

fn tokenize(source: &str) -> Result<Vec<(Token, u32)>, WasmError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    let mut line = 1u32;

    while let Some(&ch) = chars.peek() {
        match ch {
            '\n' => {
                line += 1;
                chars.next();
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            ';' => {
                // line comment
                chars.next();
                if chars.peek() != Some(&';') {
                    return Err(err_at("unexpected ';'", line));
                }
                for c in chars.by_ref() {
                    if c == '\n' {
                        line += 1;
                        break;
                    }
                }
            }
            '(' => {
                chars.next();
                if chars.peek() == Some(&';') {
                    // block comment
                    chars.next();
                    let mut prev = ' ';
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '\n' {
                            line += 1;
                        }
                        if prev == ';' && c == ')' {
                            closed = true;
                            break;
                        }
                        prev = c;
                    }
                    if !closed {
                        return Err(err_at("unterminated block comment", line));
                    }
                } else {
                    tokens.push((Token::LParen, line));
                }
            }
            ')' => {
                chars.next();
                tokens.push((Token::RParen, line));
            }
            '"' => {
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some('n') => value.push('\n'),
                            Some('t') => value.push('\t'),
                            Some('\\') => value.push('\\'),
                            Some('"') => value.push('"'),
                            Some(other) => value.push(other),
                            None => break,
                        },
                        '\n' => {
                            line += 1;
                            value.push(c);
                        }
                        _ => value.push(c),
                    }
                }
                if !closed {
                    return Err(err_at("unterminated string", line));
                }
                tokens.push((Token::Str(value), line));
            }
            '$' => {
                chars.next();
                let mut value = String::new();
                while let Some(&c) = chars.peek() {
                    if is_id_char(c) {
                        value.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if value.is_empty() {
                    return Err(err_at("empty $ identifier", line));
                }
                tokens.push((Token::Id(value), line));
            }
            c if c.is_ascii_digit() || c == '+' || c == '-' => {
                let mut value = String::new();
                value.push(c);
                chars.next();
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || matches!(next, '.' | '_' | '+' | '-') {
                        value.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push((Token::Number(value), line));
            }
            c if c.is_ascii_alphabetic() => {
                let mut value = String::new();
                while let Some(&next) = chars.peek() {
                    if is_id_char(next) || next == '=' {
                        value.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push((Token::Ident(value), line));
            }
            other => return Err(err_at(&format!("unexpected character '{other}'"), line)),
        }
    }
    Ok(tokens)
}

/// Identifier characters: alphanumerics plus the symbol set the text format
/// allows (mnemonic dots and underscores included).
fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!#$%&'*+-./:<>?@\\^_`|~".contains(c)
}

fn err_at(msg: &str, line: u32) -> WasmError {
    WasmError::new(msg, ErrorKind::Input).at_line(line)
}

// =============================================================================
// Parser
// =============================================================================

struct Parser {
    tokens: Vec<(Token, u32)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn line(&self) -> u32 {
        self.tokens
            .get(self.pos.min(self.tokens.len().saturating_sub(1)))
            .map(|(_, l)| *l)
            .unwrap_or(0)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Parse instructions until end of input or, inside a folded form, the
    /// closing paren (which is left for the caller).
    fn parse_sequence(
        &mut self,
        out: &mut Vec<WasmInstruction>,
        folded: bool,
    ) -> Result<(), WasmError> {
        loop {
            match self.peek() {
                None => {
                    if folded {
                        return Err(err_at("missing ')'", self.line()));
                    }
                    return Ok(());
                }
                Some(Token::RParen) => {
                    if !folded {
                        return Err(err_at("unexpected ')'", self.line()));
                    }
                    return Ok(());
                }
                Some(Token::LParen) => {
                    self.next();
                    self.parse_folded(out)?;
                }
                _ => self.parse_plain(out)?,
            }
        }
    }

    /// A folded form: `(op immediates operand-forms...)`. Operands are
    /// emitted before the operation; folded blocks carry their body and an
    /// implicit `end`.
    fn parse_folded(&mut self, out: &mut Vec<WasmInstruction>) -> Result<(), WasmError> {
        let line = self.line();
        let op = self.parse_operation(line)?;
        match op {
            Parsed::Nothing => {
                self.expect_rparen()?;
            }
            Parsed::Block(kind, result) => {
                let opener = block_opener(kind, result);
                out.push(WasmInstruction::new(opener, 0, line));
                self.parse_sequence(out, true)?;
                self.expect_rparen()?;
                out.push(WasmInstruction::new(WasmOp::Block(BlockOp::End), 0, line));
            }
            Parsed::Plain(op) => {
                // Nested operand forms precede the operator
                let mut operands = Vec::new();
                loop {
                    match self.peek() {
                        Some(Token::LParen) => {
                            self.next();
                            self.parse_folded(&mut operands)?;
                        }
                        Some(Token::RParen) => break,
                        _ => return Err(err_at("expected '(' or ')' in folded form", self.line())),
                    }
                }
                self.expect_rparen()?;
                out.append(&mut operands);
                out.push(WasmInstruction::new(op, 0, line));
            }
        }
        Ok(())
    }

    fn parse_plain(&mut self, out: &mut Vec<WasmInstruction>) -> Result<(), WasmError> {
        let line = self.line();
        match self.parse_operation(line)? {
            Parsed::Nothing => {}
            Parsed::Block(kind, result) => {
                out.push(WasmInstruction::new(block_opener(kind, result), 0, line));
            }
            Parsed::Plain(op) => out.push(WasmInstruction::new(op, 0, line)),
        }
        Ok(())
    }

    /// One operation with its immediates consumed; block starts are returned
    /// separately so the caller decides between flat and folded endings.
    fn parse_operation(&mut self, line: u32) -> Result<Parsed, WasmError> {
        let name = match self.next() {
            Some(Token::Ident(name)) => name,
            Some(other) => {
                return Err(err_at(&format!("expected an opcode, found {other:?}"), line))
            }
            None => return Err(err_at("expected an opcode", line)),
        };
        let op = match lookup_mnemonic(&name) {
            Some(op) => op,
            None => return Err(err_at(&format!("unknown opcode '{name}'"), line)),
        };

        let parsed = match op {
            TextOp::Const(ty) => Parsed::Plain(WasmOp::Const(self.parse_const(ty, line)?)),
            TextOp::Local(local_op) => Parsed::Plain(WasmOp::Local {
                op: local_op,
                index: self.parse_index(line)?,
            }),
            TextOp::Global(global_op) => {
                let name = match self.next() {
                    Some(Token::Id(name)) => name,
                    _ => return Err(err_at("global access needs a $name", line)),
                };
                Parsed::Plain(WasmOp::Global {
                    op: global_op,
                    name,
                })
            }
            TextOp::Numeric { op, ty } => Parsed::Plain(WasmOp::Numeric { op, ty }),
            TextOp::Convert(op) => Parsed::Plain(WasmOp::Convert(op)),
            TextOp::Memory { op, ty } => {
                let mut offset = 0u32;
                while let Some(Token::Ident(word)) = self.peek() {
                    if let Some(rest) = word.strip_prefix("offset=") {
                        offset = parse_u32_text(rest, line)?;
                        self.next();
                    } else if word.starts_with("align=") {
                        self.next();
                    } else {
                        break;
                    }
                }
                let align = match ty {
                    ValueType::I64 | ValueType::F64 => 3,
                    _ => 2,
                };
                Parsed::Plain(WasmOp::Memory {
                    op,
                    ty,
                    offset,
                    align,
                })
            }
            TextOp::BlockStart(kind) => {
                let result = self.parse_block_result(line)?;
                Parsed::Block(kind, result)
            }
            TextOp::Else => Parsed::Plain(WasmOp::Block(BlockOp::Else)),
            TextOp::End => Parsed::Plain(WasmOp::Block(BlockOp::End)),
            TextOp::Br => Parsed::Plain(WasmOp::Block(BlockOp::Br {
                depth: self.parse_index(line)?,
            })),
            TextOp::BrIf => Parsed::Plain(WasmOp::Block(BlockOp::BrIf {
                depth: self.parse_index(line)?,
            })),
            TextOp::Return => Parsed::Plain(WasmOp::Block(BlockOp::Return)),
            TextOp::Drop => Parsed::Plain(WasmOp::Block(BlockOp::Drop)),
            TextOp::Unreachable => Parsed::Plain(WasmOp::Block(BlockOp::Unreachable)),
            TextOp::Nop => Parsed::Nothing,
            TextOp::Call => {
                let id = match self.next() {
                    Some(Token::Id(id)) => id,
                    _ => return Err(err_at("call needs a $class.method id", line)),
                };
                let descriptor = match self.peek() {
                    Some(Token::Str(_)) => match self.next() {
                        Some(Token::Str(descriptor)) => descriptor,
                        _ => unreachable!(),
                    },
                    _ => "()V".to_owned(),
                };
                let signature = format!("{id}{descriptor}");
                let name = match FunctionName::from_signature(&signature) {
                    Some(name) => name,
                    None => {
                        return Err(err_at(
                            &format!("'{id}' is not a class.method id"),
                            line,
                        ))
                    }
                };
                Parsed::Plain(WasmOp::Call { name })
            }
            TextOp::Throw => {
                // optional event index; only event 0 exists
                if matches!(self.peek(), Some(Token::Number(_))) {
                    self.parse_index(line)?;
                }
                Parsed::Plain(WasmOp::Block(BlockOp::Throw))
            }
            TextOp::Rethrow => Parsed::Plain(WasmOp::Block(BlockOp::Rethrow)),
            TextOp::Catch => Parsed::Plain(WasmOp::Block(BlockOp::Catch)),
            TextOp::RefNull => {
                if matches!(self.peek(), Some(Token::Ident(word)) if word == "extern" || word == "externref")
                {
                    self.next();
                }
                Parsed::Plain(WasmOp::Numeric {
                    op: NumericOp::RefNull,
                    ty: ValueType::Externref,
                })
            }
            TextOp::RefIsNull => Parsed::Plain(WasmOp::Numeric {
                op: NumericOp::RefIsNull,
                ty: ValueType::Externref,
            }),
            TextOp::RefFunc => {
                return Err(err_at("ref.func is not supported in fragments", line))
            }
        };
        Ok(parsed)
    }

    fn parse_block_result(&mut self, line: u32) -> Result<ValueType, WasmError> {
        if self.peek() != Some(&Token::LParen) {
            return Ok(ValueType::Void);
        }
        // lookahead for `(result ...)`; any other form belongs to the body
        if !matches!(
            self.tokens.get(self.pos + 1),
            Some((Token::Ident(word), _)) if word == "result"
        ) {
            return Ok(ValueType::Void);
        }
        self.next();
        self.next();
        let ty = match self.next() {
            Some(Token::Ident(name)) => match ValueType::from_name(&name) {
                Some(ty) => ty,
                None => return Err(err_at(&format!("unknown result type '{name}'"), line)),
            },
            _ => return Err(err_at("missing result type", line)),
        };
        self.expect_rparen()?;
        Ok(ty)
    }

    fn parse_index(&mut self, line: u32) -> Result<u32, WasmError> {
        match self.next() {
            Some(Token::Number(text)) => parse_u32_text(&text, line),
            _ => Err(err_at("expected an index", line)),
        }
    }

    fn parse_const(&mut self, ty: ValueType, line: u32) -> Result<ConstValue, WasmError> {
        let text = match self.next() {
            Some(Token::Number(text)) => text,
            Some(Token::Ident(word)) if word == "nan" || word == "inf" => word,
            _ => return Err(err_at("constant needs a numeric immediate", line)),
        };
        match ty {
            ValueType::I32 => {
                let wide = parse_int_text(&text, line)?;
                if wide < i64::from(i32::MIN) || wide > i64::from(u32::MAX) {
                    return Err(err_at(&format!("i32 constant out of range: {text}"), line));
                }
                Ok(ConstValue::I32(wide as i32))
            }
            ValueType::I64 => Ok(ConstValue::I64(parse_int_text(&text, line)?)),
            ValueType::F32 => Ok(ConstValue::F32(parse_float_text(&text, line)? as f32)),
            ValueType::F64 => Ok(ConstValue::F64(parse_float_text(&text, line)?)),
            other => Err(err_at(&format!("no constant form for {other:?}"), line)),
        }
    }

    fn expect_rparen(&mut self) -> Result<(), WasmError> {
        match self.next() {
            Some(Token::RParen) => Ok(()),
            _ => Err(err_at("missing ')'", self.line())),
        }
    }
}

enum Parsed {
    Plain(WasmOp),
    Block(BlockStartKind, ValueType),
    /// `nop` parses but contributes nothing
    Nothing,
}

fn block_opener(kind: BlockStartKind, result: ValueType) -> WasmOp {
    match kind {
        BlockStartKind::Block => WasmOp::Block(BlockOp::Block { result }),
        BlockStartKind::Loop => WasmOp::Block(BlockOp::Loop),
        BlockStartKind::If => WasmOp::Block(BlockOp::If { result }),
        BlockStartKind::Try => WasmOp::Block(BlockOp::Try { result }),
    }
}

// =============================================================================
// Number parsing
// =============================================================================

fn parse_u32_text(text: &str, line: u32) -> Result<u32, WasmError> {
    let value = parse_int_text(text, line)?;
    if value < 0 || value > i64::from(u32::MAX) {
        return Err(err_at(&format!("index out of range: {text}"), line));
    }
    Ok(value as u32)
}

fn parse_int_text(text: &str, line: u32) -> Result<i64, WasmError> {
    let cleaned = text.replace('_', "");
    let (negative, body) = match cleaned.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, cleaned.strip_prefix('+').unwrap_or(&cleaned)),
    };
    let magnitude = if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else {
        body.parse::<u64>()
    };
    let magnitude = match magnitude {
        Ok(m) => m,
        Err(_) => return Err(err_at(&format!("invalid integer '{text}'"), line)),
    };
    if negative {
        if magnitude > i64::MIN.unsigned_abs() {
            return Err(err_at(&format!("integer out of range: {text}"), line));
        }
        Ok((magnitude as i64).wrapping_neg())
    } else {
        Ok(magnitude as i64)
    }
}

fn parse_float_text(text: &str, line: u32) -> Result<f64, WasmError> {
    let cleaned = text.replace('_', "");
    let (negative, body) = match cleaned.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, cleaned.strip_prefix('+').unwrap_or(&cleaned)),
    };
    let magnitude = if body == "nan" {
        f64::NAN
    } else if body == "inf" {
        f64::INFINITY
    } else if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        parse_hex_float(hex).ok_or_else(|| err_at(&format!("invalid hex float '{text}'"), line))?
    } else {
        match body.parse::<f64>() {
            Ok(value) => value,
            Err(_) => return Err(err_at(&format!("invalid float '{text}'"), line)),
        }
    };
    Ok(if negative { -magnitude } else { magnitude })
}

/// `0x`-prefixed float in the `1.5p5` style: a hex mantissa scaled by a
/// power of two.
fn parse_hex_float(body: &str) -> Option<f64> {
    let (mantissa_text, exponent) = match body.split_once(['p', 'P']) {
        Some((m, e)) => (m, e.parse::<i32>().ok()?),
        None => (body, 0),
    };
    let (int_text, frac_text) = match mantissa_text.split_once('.') {
        Some((i, f)) => (i, f),
        None => (mantissa_text, ""),
    };
    if int_text.is_empty() && frac_text.is_empty() {
        return None;
    }
    let mut value = 0.0f64;
    for digit in int_text.chars() {
        value = value * 16.0 + f64::from(digit.to_digit(16)?);
    }
    let mut scale = 1.0 / 16.0;
    for digit in frac_text.chars() {
        value += f64::from(digit.to_digit(16)?) * scale;
        scale /= 16.0;
    }
    Some(value * 2f64.powi(exponent))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::codegen::instructions::LocalOp;
    use crate::compiler::codegen::text_writer;

    #[test]
    fn flat_fragment_parses() {
        let instrs = parse_fragment("local.get 0\ni32.const 1\ni32.add").unwrap();
        assert_eq!(instrs.len(), 3);
        assert_eq!(
            instrs[0].op,
            WasmOp::Local {
                op: LocalOp::Get,
                index: 0
            }
        );
        assert_eq!(instrs[1].op, WasmOp::Const(ConstValue::I32(1)));
        assert_eq!(
            instrs[2].op,
            WasmOp::Numeric {
                op: NumericOp::Add,
                ty: ValueType::I32
            }
        );
    }

    #[test]
    fn folded_operands_come_first() {
        let instrs = parse_fragment("(i32.add (local.get 0) (i32.const 1))").unwrap();
        assert_eq!(
            instrs.iter().map(|i| &i.op).collect::<Vec<_>>(),
            vec![
                &WasmOp::Local {
                    op: LocalOp::Get,
                    index: 0
                },
                &WasmOp::Const(ConstValue::I32(1)),
                &WasmOp::Numeric {
                    op: NumericOp::Add,
                    ty: ValueType::I32
                },
            ]
        );
    }

    #[test]
    fn blocks_parse_flat_and_folded() {
        let flat = parse_fragment("block (result i32)\ni32.const 7\nend").unwrap();
        let folded = parse_fragment("(block (result i32) (i32.const 7))").unwrap();
        let flat_ops: Vec<_> = flat.iter().map(|i| &i.op).collect();
        let folded_ops: Vec<_> = folded.iter().map(|i| &i.op).collect();
        assert_eq!(flat_ops, folded_ops);
        assert_eq!(
            flat_ops[0],
            &WasmOp::Block(BlockOp::Block {
                result: ValueType::I32
            })
        );
    }

    #[test]
    fn call_takes_id_and_descriptor() {
        let instrs =
            parse_fragment("local.get 0\ncall $wasm/Runtime.vtableOf \"(Ljava/lang/Object;)I\"")
                .unwrap();
        match &instrs[1].op {
            WasmOp::Call { name } => {
                assert_eq!(name.class_name, "wasm/Runtime");
                assert_eq!(name.method_name, "vtableOf");
                assert_eq!(name.descriptor, "(Ljava/lang/Object;)I");
            }
            other => panic!("expected call, found {other:?}"),
        }
    }

    #[test]
    fn numeric_literals_cover_hex_and_hex_floats() {
        let instrs = parse_fragment(
            "i32.const 0x10\ni64.const -3\nf64.const 0x1.5p5\nf32.const 2.5\nf64.const inf",
        )
        .unwrap();
        assert_eq!(instrs[0].op, WasmOp::Const(ConstValue::I32(16)));
        assert_eq!(instrs[1].op, WasmOp::Const(ConstValue::I64(-3)));
        assert_eq!(instrs[2].op, WasmOp::Const(ConstValue::F64(42.0)));
        assert_eq!(instrs[3].op, WasmOp::Const(ConstValue::F32(2.5)));
        assert_eq!(instrs[4].op, WasmOp::Const(ConstValue::F64(f64::INFINITY)));
    }

    #[test]
    fn errors_carry_the_fragment_line() {
        let err = parse_fragment("nop\ni32.bogus 1").unwrap_err();
        assert_eq!(err.source_line, 2);
        assert!(err.msg.contains("i32.bogus"));

        let err = parse_fragment("local.get").unwrap_err();
        assert!(err.msg.contains("index"));
    }

    #[test]
    fn comments_are_skipped() {
        let instrs =
            parse_fragment(";; leading\ni32.const 1 ;; trailing\n(; inline ;) i32.const 2")
                .unwrap();
        assert_eq!(instrs.len(), 2);
    }

    /// Spec §8: parse → write → parse is a fixed point for the shared
    /// instruction subset.
    #[test]
    fn round_trip_through_the_text_writer() {
        let source = "local.get 0\ni32.const 16\ni32.add\nblock (result i32)\ni32.const 7\nend\ndrop\nreturn";
        let first = parse_fragment(source).unwrap();
        let written = text_writer::write_fragment(&first).unwrap();
        let second = parse_fragment(&written).unwrap();
        let first_ops: Vec<_> = first.iter().map(|i| &i.op).collect();
        let second_ops: Vec<_> = second.iter().map(|i| &i.op).collect();
        assert_eq!(first_ops, second_ops);

        // and writing again is byte-identical
        let rewritten = text_writer::write_fragment(&second).unwrap();
        assert_eq!(written, rewritten);
    }
}
