//! Compiler for snippets written in bytecode assembly
//!
//! Snippets are sequences of statements separated by `;` or newlines, with `//` comments:
//!
//! ```text,ignore,no_run
//!     load $1                          // typed load of a binding
//!     ifeq skip
//!     getstatic java.lang.System.out:Ljava/io/PrintStream;
//!     ldc "non-zero"
//!     invokevirtual java.io.PrintStream.println:(Ljava/lang/String;)V
//! skip:
//! ```
//!
//! A `;` which closes a class name inside a descriptor (`Ljava/lang/String;`) is part of the
//! descriptor, not a statement separator.
//!
//! Locals can be referred to by slot number or by binding name (`$0`, `$1`, `$_`, `$e`, or
//! the name of a local variable from the `LocalVariableTable`). Jumps target labels, and a label
//! at the very end of the snippet refers to whatever code follows the fragment once spliced.
//! Exception handlers are declared with `.catch FROM TO HANDLER TYPE` (or `any` as the type).
//! Switches are written `tableswitch LOW DEFAULT TARGET...` and
//! `lookupswitch DEFAULT KEY=TARGET...`.
//!
//! The maximum stack size is computed by walking the control flow of the assembled code.

use super::{Binding, Bindings, CompileError, Compiler, Fragment};
use crate::jvm::class_file::{ClassConstantIndex, ConstantIndex, ConstantsPool, ExceptionHandler};
use crate::jvm::code::opcodes::*;
use crate::jvm::code::BytecodeBuilder;
use crate::jvm::{BinaryName, FieldType, MethodDescriptor, Name, ParseDescriptor, RefType};
use crate::jvm::ValueKind;
use crate::util::Width;
use log::debug;
use std::collections::HashMap;
use std::str::FromStr;

/// [`Compiler`] for the snippet assembly language
#[derive(Debug, Default, Clone, Copy)]
pub struct SnippetAssembler;

impl SnippetAssembler {
    pub fn new() -> SnippetAssembler {
        SnippetAssembler
    }
}

impl Compiler for SnippetAssembler {
    fn compile(
        &mut self,
        source: &str,
        bindings: &Bindings,
        constants: &mut ConstantsPool,
    ) -> Result<Fragment, CompileError> {
        let mut assembly = Assembly::new(bindings, constants);
        for (line, tokens) in statements(source)? {
            assembly.line = line;
            assembly.statement(&tokens)?;
        }
        assembly.finish()
    }
}

/// Instructions taking no operands: mnemonic, opcode, slots popped, slots pushed
const SIMPLE_INSTRUCTIONS: &[(&str, u8, u16, u16)] = &[
    ("nop", 0x00, 0, 0),
    ("aconst_null", 0x01, 0, 1),
    ("iconst_m1", 0x02, 0, 1),
    ("iconst_0", 0x03, 0, 1),
    ("iconst_1", 0x04, 0, 1),
    ("iconst_2", 0x05, 0, 1),
    ("iconst_3", 0x06, 0, 1),
    ("iconst_4", 0x07, 0, 1),
    ("iconst_5", 0x08, 0, 1),
    ("lconst_0", 0x09, 0, 2),
    ("lconst_1", 0x0a, 0, 2),
    ("fconst_0", 0x0b, 0, 1),
    ("fconst_1", 0x0c, 0, 1),
    ("fconst_2", 0x0d, 0, 1),
    ("dconst_0", 0x0e, 0, 2),
    ("dconst_1", 0x0f, 0, 2),
    ("iaload", 0x2e, 2, 1),
    ("laload", 0x2f, 2, 2),
    ("faload", 0x30, 2, 1),
    ("daload", 0x31, 2, 2),
    ("aaload", 0x32, 2, 1),
    ("baload", 0x33, 2, 1),
    ("caload", 0x34, 2, 1),
    ("saload", 0x35, 2, 1),
    ("iastore", 0x4f, 3, 0),
    ("lastore", 0x50, 4, 0),
    ("fastore", 0x51, 3, 0),
    ("dastore", 0x52, 4, 0),
    ("aastore", 0x53, 3, 0),
    ("bastore", 0x54, 3, 0),
    ("castore", 0x55, 3, 0),
    ("sastore", 0x56, 3, 0),
    ("pop", 0x57, 1, 0),
    ("pop2", 0x58, 2, 0),
    ("dup", 0x59, 1, 2),
    ("dup_x1", 0x5a, 2, 3),
    ("dup_x2", 0x5b, 3, 4),
    ("dup2", 0x5c, 2, 4),
    ("dup2_x1", 0x5d, 3, 5),
    ("dup2_x2", 0x5e, 4, 6),
    ("swap", 0x5f, 2, 2),
    ("iadd", 0x60, 2, 1),
    ("ladd", 0x61, 4, 2),
    ("fadd", 0x62, 2, 1),
    ("dadd", 0x63, 4, 2),
    ("isub", 0x64, 2, 1),
    ("lsub", 0x65, 4, 2),
    ("fsub", 0x66, 2, 1),
    ("dsub", 0x67, 4, 2),
    ("imul", 0x68, 2, 1),
    ("lmul", 0x69, 4, 2),
    ("fmul", 0x6a, 2, 1),
    ("dmul", 0x6b, 4, 2),
    ("idiv", 0x6c, 2, 1),
    ("ldiv", 0x6d, 4, 2),
    ("fdiv", 0x6e, 2, 1),
    ("ddiv", 0x6f, 4, 2),
    ("irem", 0x70, 2, 1),
    ("lrem", 0x71, 4, 2),
    ("frem", 0x72, 2, 1),
    ("drem", 0x73, 4, 2),
    ("ineg", 0x74, 1, 1),
    ("lneg", 0x75, 2, 2),
    ("fneg", 0x76, 1, 1),
    ("dneg", 0x77, 2, 2),
    ("ishl", 0x78, 2, 1),
    ("lshl", 0x79, 3, 2),
    ("ishr", 0x7a, 2, 1),
    ("lshr", 0x7b, 3, 2),
    ("iushr", 0x7c, 2, 1),
    ("lushr", 0x7d, 3, 2),
    ("iand", 0x7e, 2, 1),
    ("land", 0x7f, 4, 2),
    ("ior", 0x80, 2, 1),
    ("lor", 0x81, 4, 2),
    ("ixor", 0x82, 2, 1),
    ("lxor", 0x83, 4, 2),
    ("i2l", 0x85, 1, 2),
    ("i2f", 0x86, 1, 1),
    ("i2d", 0x87, 1, 2),
    ("l2i", 0x88, 2, 1),
    ("l2f", 0x89, 2, 1),
    ("l2d", 0x8a, 2, 2),
    ("f2i", 0x8b, 1, 1),
    ("f2l", 0x8c, 1, 2),
    ("f2d", 0x8d, 1, 2),
    ("d2i", 0x8e, 2, 1),
    ("d2l", 0x8f, 2, 2),
    ("d2f", 0x90, 2, 1),
    ("i2b", 0x91, 1, 1),
    ("i2c", 0x92, 1, 1),
    ("i2s", 0x93, 1, 1),
    ("lcmp", 0x94, 4, 1),
    ("fcmpl", 0x95, 2, 1),
    ("fcmpg", 0x96, 2, 1),
    ("dcmpl", 0x97, 4, 1),
    ("dcmpg", 0x98, 4, 1),
    ("ireturn", 0xac, 1, 0),
    ("lreturn", 0xad, 2, 0),
    ("freturn", 0xae, 1, 0),
    ("dreturn", 0xaf, 2, 0),
    ("areturn", 0xb0, 1, 0),
    ("return", 0xb1, 0, 0),
    ("arraylength", 0xbe, 1, 1),
    ("athrow", 0xbf, 1, 0),
    ("monitorenter", 0xc2, 1, 0),
    ("monitorexit", 0xc3, 1, 0),
];

/// Jumps to a label: mnemonic, opcode, slots popped
const BRANCH_INSTRUCTIONS: &[(&str, u8, u16)] = &[
    ("ifeq", IFEQ, 1),
    ("ifne", IFNE, 1),
    ("iflt", IFLT, 1),
    ("ifge", IFGE, 1),
    ("ifgt", IFGT, 1),
    ("ifle", IFLE, 1),
    ("if_icmpeq", IF_ICMPEQ, 2),
    ("if_icmpne", IF_ICMPNE, 2),
    ("if_icmplt", IF_ICMPLT, 2),
    ("if_icmpge", IF_ICMPGE, 2),
    ("if_icmpgt", IF_ICMPGT, 2),
    ("if_icmple", IF_ICMPLE, 2),
    ("if_acmpeq", IF_ACMPEQ, 2),
    ("if_acmpne", IF_ACMPNE, 2),
    ("goto", GOTO, 0),
    ("ifnull", IFNULL, 1),
    ("ifnonnull", IFNONNULL, 1),
];

/// Typed local variable instructions, by mnemonic prefix
const LOCAL_INSTRUCTIONS: &[(&str, ValueKind, bool)] = &[
    ("iload", ValueKind::Int, false),
    ("lload", ValueKind::Long, false),
    ("fload", ValueKind::Float, false),
    ("dload", ValueKind::Double, false),
    ("aload", ValueKind::Reference, false),
    ("istore", ValueKind::Int, true),
    ("lstore", ValueKind::Long, true),
    ("fstore", ValueKind::Float, true),
    ("dstore", ValueKind::Double, true),
    ("astore", ValueKind::Reference, true),
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Str(String),
}

/// Split a snippet into statements of tokens, each tagged with the line it starts on
fn statements(source: &str) -> Result<Vec<(usize, Vec<Token>)>, CompileError> {
    let chars: Vec<char> = source.chars().collect();
    let mut statements = vec![];
    let mut current = vec![];
    let mut start_line = 1;
    let mut line = 1;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\n' | ';' => {
                if !current.is_empty() {
                    statements.push((start_line, std::mem::take(&mut current)));
                }
                if c == '\n' {
                    line += 1;
                }
                i += 1;
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '"' => {
                if current.is_empty() {
                    start_line = line;
                }
                let mut string = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(CompileError::Syntax {
                                line,
                                message: String::from("unterminated string literal"),
                            })
                        }
                        Some('"') => break,
                        Some('\\') => {
                            i += 1;
                            let escaped = match chars.get(i) {
                                Some('n') => '\n',
                                Some('t') => '\t',
                                Some('r') => '\r',
                                Some('0') => '\0',
                                Some('"') => '"',
                                Some('\\') => '\\',
                                other => {
                                    return Err(CompileError::Syntax {
                                        line,
                                        message: format!("bad escape {:?}", other),
                                    })
                                }
                            };
                            string.push(escaped);
                        }
                        Some(&c) => {
                            if c == '\n' {
                                line += 1;
                            }
                            string.push(c);
                        }
                    }
                    i += 1;
                }
                current.push(Token::Str(string));
                i += 1;
            }
            c if c.is_whitespace() => i += 1,
            _ => {
                if current.is_empty() {
                    start_line = line;
                }
                let mut word = String::new();
                while i < chars.len() {
                    let c = chars[i];
                    let starts_comment = c == '/' && chars.get(i + 1) == Some(&'/');
                    let ends_statement = c == ';' && !in_class_descriptor(&word);
                    if c.is_whitespace() || c == '"' || ends_statement || starts_comment {
                        break;
                    }
                    word.push(c);
                    i += 1;
                }
                current.push(Token::Word(word));
            }
        }
    }
    if !current.is_empty() {
        statements.push((start_line, current));
    }
    Ok(statements)
}

/// Whether a word ends inside the `L...;` part of a descriptor
///
/// Descriptors only show up after the `:` of a member reference or as array class names, and in
/// those a `;` closes a class name instead of ending the statement.
fn in_class_descriptor(word: &str) -> bool {
    let descriptor = match word.split_once(':') {
        Some((_, descriptor)) => descriptor,
        None if word.starts_with('[') => word,
        None => return false,
    };
    let mut in_class = false;
    for c in descriptor.chars() {
        if in_class {
            in_class = c != ';';
        } else {
            in_class = c == 'L';
        }
    }
    in_class
}

/// Where control goes after an instruction
#[derive(Debug)]
enum Flow {
    /// Falls through to the next instruction
    Next,

    /// Never falls through (returns, `athrow`, `ret`)
    Stop,

    /// Unconditional jump
    Goto(String),

    /// Either jumps or falls through
    Branch(String),

    /// Jumps to one of these
    Switch(Vec<String>),
}

/// Assembled instruction, as needed to compute the stack depth
#[derive(Debug)]
struct Assembled {
    offset: usize,
    pops: u16,
    pushes: u16,
    flow: Flow,
}

/// Exception handler declared with `.catch`
struct Catch {
    from: String,
    to: String,
    handler: String,
    catch_type: Option<ClassConstantIndex>,
}

/// State while assembling one snippet
struct Assembly<'a> {
    bindings: &'a Bindings,
    constants: &'a mut ConstantsPool,
    builder: BytecodeBuilder,
    instructions: Vec<Assembled>,
    labels: HashMap<String, usize>,

    /// Jumps to patch: offset of the jump and label targeted
    jump_fixups: Vec<(usize, String)>,

    /// Switch targets to patch: offset of the switch, offset of the operand, and label targeted
    switch_fixups: Vec<(usize, usize, String)>,

    catches: Vec<Catch>,
    line: usize,
}

impl<'a> Assembly<'a> {
    fn new(bindings: &'a Bindings, constants: &'a mut ConstantsPool) -> Assembly<'a> {
        let mut builder = BytecodeBuilder::new();
        builder.require_locals(bindings.slots_used());
        Assembly {
            bindings,
            constants,
            builder,
            instructions: vec![],
            labels: HashMap::new(),
            jump_fixups: vec![],
            switch_fixups: vec![],
            catches: vec![],
            line: 0,
        }
    }

    fn syntax<T>(&self, message: impl Into<String>) -> Result<T, CompileError> {
        Err(CompileError::Syntax {
            line: self.line,
            message: message.into(),
        })
    }

    fn statement(&mut self, tokens: &[Token]) -> Result<(), CompileError> {
        let mut tokens = tokens;
        while let Some(Token::Word(word)) = tokens.first() {
            match word.strip_suffix(':') {
                Some(label) if !label.is_empty() => {
                    let offset = self.builder.current_offset();
                    if self.labels.insert(label.to_owned(), offset).is_some() {
                        return self.syntax(format!("label `{}` is defined twice", label));
                    }
                    tokens = &tokens[1..];
                }
                _ => break,
            }
        }
        match tokens.split_first() {
            None => Ok(()),
            Some((Token::Word(mnemonic), operands)) => self.instruction(mnemonic, operands),
            Some((Token::Str(_), _)) => self.syntax("expected an instruction, not a string"),
        }
    }

    fn word<'t>(&self, operands: &'t [Token], index: usize) -> Result<&'t str, CompileError> {
        match operands.get(index) {
            Some(Token::Word(word)) => Ok(word.as_str()),
            Some(Token::Str(_)) => self.syntax(format!("operand {} should not be a string", index)),
            None => self.syntax(format!("missing operand {}", index)),
        }
    }

    fn number<T: FromStr>(&self, word: &str) -> Result<T, CompileError> {
        match word.parse() {
            Ok(value) => Ok(value),
            Err(_) => self.syntax(format!("`{}` is not a valid number here", word)),
        }
    }

    fn operand_count(&self, operands: &[Token], expected: usize) -> Result<(), CompileError> {
        if operands.len() != expected {
            return self.syntax(format!(
                "expected {} operands, found {}",
                expected,
                operands.len()
            ));
        }
        Ok(())
    }

    fn binding(&self, name: &str) -> Result<&'a Binding, CompileError> {
        self.bindings
            .lookup(name)
            .ok_or_else(|| CompileError::UnknownBinding(name.to_owned()))
    }

    /// Local slot operand: either a slot number or the name of a binding
    fn slot(&self, word: &str) -> Result<u16, CompileError> {
        if word.starts_with(|c: char| c.is_ascii_digit()) {
            self.number(word)
        } else {
            Ok(self.binding(word)?.slot)
        }
    }

    fn push(&mut self, offset: usize, pops: u16, pushes: u16, flow: Flow) {
        self.instructions.push(Assembled {
            offset,
            pops,
            pushes,
            flow,
        });
    }

    fn instruction(&mut self, mnemonic: &str, operands: &[Token]) -> Result<(), CompileError> {
        let offset = self.builder.current_offset();

        if let Some(&(_, opcode, pops, pushes)) = SIMPLE_INSTRUCTIONS
            .iter()
            .find(|(name, ..)| *name == mnemonic)
        {
            self.operand_count(operands, 0)?;
            self.builder.push_opcode(opcode);
            let flow = if is_return(opcode) || opcode == ATHROW {
                Flow::Stop
            } else {
                Flow::Next
            };
            self.push(offset, pops, pushes, flow);
            return Ok(());
        }

        if let Some(&(_, opcode, pops)) = BRANCH_INSTRUCTIONS
            .iter()
            .find(|(name, ..)| *name == mnemonic)
        {
            self.operand_count(operands, 1)?;
            let label = self.word(operands, 0)?.to_owned();
            let site = self.builder.push_jump_placeholder(opcode);
            self.jump_fixups.push((site, label.clone()));
            let flow = if opcode == GOTO {
                Flow::Goto(label)
            } else {
                Flow::Branch(label)
            };
            self.push(offset, pops, 0, flow);
            return Ok(());
        }

        if let Some((kind, store, slot)) = self.local_instruction(mnemonic, operands)? {
            let width = kind.width() as u16;
            if store {
                self.builder.push_store(kind, slot);
                self.push(offset, width, 0, Flow::Next);
            } else {
                self.builder.push_load(kind, slot);
                self.push(offset, 0, width, Flow::Next);
            }
            return Ok(());
        }

        match mnemonic {
            "iinc" => {
                self.operand_count(operands, 2)?;
                let slot = self.slot(self.word(operands, 0)?)?;
                let delta = self.number(self.word(operands, 1)?)?;
                self.builder.push_iinc(slot, delta);
                self.push(offset, 0, 0, Flow::Next);
            }
            "ret" => {
                self.operand_count(operands, 1)?;
                let slot = self.slot(self.word(operands, 0)?)?;
                self.builder.push_ret(slot);
                self.push(offset, 0, 0, Flow::Stop);
            }
            "bipush" => {
                self.operand_count(operands, 1)?;
                let value: i8 = self.number(self.word(operands, 0)?)?;
                self.builder.push_opcode(BIPUSH);
                self.builder.push_u8(value as u8);
                self.push(offset, 0, 1, Flow::Next);
            }
            "sipush" => {
                self.operand_count(operands, 1)?;
                let value: i16 = self.number(self.word(operands, 0)?)?;
                self.builder.push_opcode(SIPUSH);
                self.builder.push_i16(value);
                self.push(offset, 0, 1, Flow::Next);
            }
            "ldc" => {
                self.operand_count(operands, 1)?;
                let index: ConstantIndex = match &operands[0] {
                    Token::Str(string) => {
                        let utf8 = self.constants.get_utf8(string.as_str())?;
                        self.constants.get_string(utf8)?.0
                    }
                    Token::Word(word) => {
                        let value: i32 = self.number(word)?;
                        self.constants.get_integer(value)?
                    }
                };
                match u8::try_from(index.0) {
                    Ok(index) => {
                        self.builder.push_opcode(LDC);
                        self.builder.push_u8(index);
                    }
                    Err(_) => {
                        self.builder.push_opcode(LDC_W);
                        self.builder.push_u16(index.0);
                    }
                }
                self.push(offset, 0, 1, Flow::Next);
            }
            "getstatic" | "putstatic" | "getfield" | "putfield" => {
                self.operand_count(operands, 1)?;
                let (owner, name, descriptor) = self.member(self.word(operands, 0)?)?;
                let field_type = FieldType::parse(descriptor)
                    .map_err(|err| CompileError::BadType(format!("{}: {}", descriptor, err)))?;
                let width = field_type.width() as u16;
                let index = self.constants.get_field_ref(&owner, name, descriptor)?;
                let (opcode, pops, pushes) = match mnemonic {
                    "getstatic" => (GETSTATIC, 0, width),
                    "putstatic" => (PUTSTATIC, width, 0),
                    "getfield" => (GETFIELD, 1, width),
                    _ => (PUTFIELD, 1 + width, 0),
                };
                self.builder.push_opcode(opcode);
                self.builder.push_u16((index.0).0);
                self.push(offset, pops, pushes, Flow::Next);
            }
            "invokestatic" | "invokevirtual" | "invokespecial" | "invokeinterface" => {
                self.operand_count(operands, 1)?;
                let (owner, name, descriptor) = self.member(self.word(operands, 0)?)?;
                let method_type = MethodDescriptor::parse(descriptor)
                    .map_err(|err| CompileError::BadType(format!("{}: {}", descriptor, err)))?;
                let is_static = mnemonic == "invokestatic";
                let is_interface = mnemonic == "invokeinterface";
                let pops = method_type.parameter_length(!is_static) as u16;
                let pushes = method_type.return_type.as_ref().map_or(0, |t| t.width()) as u16;
                let index =
                    self.constants
                        .get_method_ref(&owner, name, descriptor, is_interface)?;
                let opcode = match mnemonic {
                    "invokestatic" => INVOKESTATIC,
                    "invokevirtual" => INVOKEVIRTUAL,
                    "invokespecial" => INVOKESPECIAL,
                    _ => INVOKEINTERFACE,
                };
                self.builder.push_opcode(opcode);
                self.builder.push_u16((index.0).0);
                if is_interface {
                    self.builder.push_u8(pops as u8);
                    self.builder.push_u8(0);
                }
                self.push(offset, pops, pushes, Flow::Next);
            }
            "new" | "checkcast" | "instanceof" | "anewarray" => {
                self.operand_count(operands, 1)?;
                let class = self.class(self.word(operands, 0)?)?;
                let (opcode, pops) = match mnemonic {
                    "new" => (NEW, 0),
                    "checkcast" => (CHECKCAST, 1),
                    "instanceof" => (INSTANCEOF, 1),
                    _ => (ANEWARRAY, 1),
                };
                self.builder.push_opcode(opcode);
                self.builder.push_u16((class.0).0);
                self.push(offset, pops, 1, Flow::Next);
            }
            "tableswitch" => self.table_switch(operands)?,
            "lookupswitch" => self.lookup_switch(operands)?,
            ".catch" => {
                self.operand_count(operands, 4)?;
                let catch_type = match self.word(operands, 3)? {
                    "any" => None,
                    name => Some(self.class(name)?),
                };
                self.catches.push(Catch {
                    from: self.word(operands, 0)?.to_owned(),
                    to: self.word(operands, 1)?.to_owned(),
                    handler: self.word(operands, 2)?.to_owned(),
                    catch_type,
                });
            }
            _ => return self.syntax(format!("unknown instruction `{}`", mnemonic)),
        }
        Ok(())
    }

    /// Decode loads and stores (`iload 4`, `astore_2`, `load $x`, ...)
    fn local_instruction(
        &self,
        mnemonic: &str,
        operands: &[Token],
    ) -> Result<Option<(ValueKind, bool, u16)>, CompileError> {
        if mnemonic == "load" || mnemonic == "store" {
            self.operand_count(operands, 1)?;
            let binding = self.binding(self.word(operands, 0)?)?;
            let kind = binding
                .field_type
                .as_ref()
                .map_or(ValueKind::Reference, |typ| typ.kind());
            return Ok(Some((kind, mnemonic == "store", binding.slot)));
        }

        for (prefix, kind, store) in LOCAL_INSTRUCTIONS {
            match mnemonic.strip_prefix(prefix) {
                Some("") => {
                    self.operand_count(operands, 1)?;
                    let slot = self.slot(self.word(operands, 0)?)?;
                    return Ok(Some((*kind, *store, slot)));
                }
                Some(suffix @ ("_0" | "_1" | "_2" | "_3")) => {
                    self.operand_count(operands, 0)?;
                    let slot = self.number(&suffix[1..])?;
                    return Ok(Some((*kind, *store, slot)));
                }
                _ => (),
            }
        }
        Ok(None)
    }

    /// Split a member reference `owner.name:descriptor`
    fn member<'w>(&self, word: &'w str) -> Result<(String, &'w str, &'w str), CompileError> {
        let split = word
            .split_once(':')
            .and_then(|(path, descriptor)| Some((path.rsplit_once('.')?, descriptor)));
        match split {
            Some(((owner, name), descriptor)) if !name.is_empty() => {
                let owner = BinaryName::from_source_name(owner).map_err(CompileError::BadType)?;
                Ok((owner.as_str().to_owned(), name, descriptor))
            }
            _ => self.syntax(format!("`{}` is not of the form `owner.name:descriptor`", word)),
        }
    }

    /// Get the class constant for a class name or an array descriptor
    fn class(&mut self, word: &str) -> Result<ClassConstantIndex, CompileError> {
        let ref_type = if word.starts_with('[') {
            RefType::parse(word).map_err(|err| CompileError::BadType(format!("{}: {}", word, err)))?
        } else {
            RefType::Object(BinaryName::from_source_name(word).map_err(CompileError::BadType)?)
        };
        Ok(self.constants.get_ref_type(&ref_type)?)
    }

    /// Emit the opcode and padding of a switch, returning the offset of the switch
    fn switch_header(&mut self, opcode: u8) -> usize {
        let site = self.builder.current_offset();
        self.builder.push_opcode(opcode);
        for _ in 0..switch_padding(site) {
            self.builder.push_u8(0);
        }
        site
    }

    fn switch_target(&mut self, site: usize, label: &str) {
        let at = self.builder.current_offset();
        self.builder.push_i32(0);
        self.switch_fixups.push((site, at, label.to_owned()));
    }

    fn table_switch(&mut self, operands: &[Token]) -> Result<(), CompileError> {
        if operands.len() < 3 {
            return self.syntax("`tableswitch` needs a low key, a default, and targets");
        }
        let low: i32 = self.number(self.word(operands, 0)?)?;
        let default = self.word(operands, 1)?.to_owned();
        let mut targets = vec![];
        for index in 2..operands.len() {
            targets.push(self.word(operands, index)?.to_owned());
        }
        let high = match low.checked_add(targets.len() as i32 - 1) {
            Some(high) => high,
            None => return self.syntax("`tableswitch` keys overflow"),
        };

        let site = self.switch_header(TABLESWITCH);
        self.switch_target(site, &default);
        self.builder.push_i32(low);
        self.builder.push_i32(high);
        for target in &targets {
            self.switch_target(site, target);
        }

        targets.push(default);
        self.push(site, 1, 0, Flow::Switch(targets));
        Ok(())
    }

    fn lookup_switch(&mut self, operands: &[Token]) -> Result<(), CompileError> {
        let default = self.word(operands, 0)?.to_owned();
        let mut pairs: Vec<(i32, String)> = vec![];
        for index in 1..operands.len() {
            let pair = self.word(operands, index)?;
            match pair.split_once('=') {
                Some((key, label)) => pairs.push((self.number(key)?, label.to_owned())),
                None => return self.syntax(format!("`{}` is not of the form `KEY=LABEL`", pair)),
            }
        }
        pairs.sort_by_key(|(key, _)| *key);
        if pairs.windows(2).any(|pair| pair[0].0 == pair[1].0) {
            return self.syntax("`lookupswitch` has duplicate keys");
        }

        let site = self.switch_header(LOOKUPSWITCH);
        self.switch_target(site, &default);
        self.builder.push_i32(pairs.len() as i32);
        for (key, label) in &pairs {
            self.builder.push_i32(*key);
            self.switch_target(site, label);
        }

        let mut targets: Vec<String> = pairs.into_iter().map(|(_, label)| label).collect();
        targets.push(default);
        self.push(site, 1, 0, Flow::Switch(targets));
        Ok(())
    }

    fn label(&self, name: &str) -> Result<usize, CompileError> {
        self.labels
            .get(name)
            .copied()
            .ok_or_else(|| CompileError::UnknownLabel(name.to_owned()))
    }

    /// Resolve labels, compute the maximum stack, and produce the fragment
    fn finish(mut self) -> Result<Fragment, CompileError> {
        for (site, label) in std::mem::take(&mut self.jump_fixups) {
            let target = self.label(&label)?;
            self.builder.patch_jump(site, target)?;
        }
        for (site, at, label) in std::mem::take(&mut self.switch_fixups) {
            let target = self.label(&label)?;
            self.builder.patch_i32(at, target as i32 - site as i32);
        }
        let handlers = self
            .catches
            .iter()
            .map(|catch| {
                Ok(ExceptionHandler {
                    start_pc: self.label(&catch.from)? as u16,
                    end_pc: self.label(&catch.to)? as u16,
                    handler_pc: self.label(&catch.handler)? as u16,
                    catch_type: catch.catch_type,
                })
            })
            .collect::<Result<Vec<ExceptionHandler>, CompileError>>()?;
        for handler in handlers {
            self.builder.push_exception_handler(handler);
        }

        let max_stack = self.max_stack()?;
        self.builder.require_stack(max_stack);
        let code = self.builder.into_code()?;
        debug!(
            "assembled snippet into {} bytes (max stack {}, max locals {})",
            code.code.len(),
            code.max_stack,
            code.max_locals
        );
        Ok(Fragment::from(code))
    }

    /// Walk the control flow to find the deepest the operand stack gets
    ///
    /// The end of the fragment is tracked like an instruction, since every path falling off the
    /// end must agree on the depth of the stack left for the code that follows.
    fn max_stack(&self) -> Result<u16, CompileError> {
        let code_len = self.builder.current_offset();
        let end = self.instructions.len();
        let mut index_of: HashMap<usize, usize> = self
            .instructions
            .iter()
            .enumerate()
            .map(|(index, insn)| (insn.offset, index))
            .collect();
        index_of.insert(code_len, end);
        let mut depths: Vec<Option<u16>> = vec![None; end + 1];
        let mut worklist: Vec<(usize, u16)> = vec![];

        let mut reach = |offset: usize,
                         depth: u16,
                         worklist: &mut Vec<(usize, u16)>|
         -> Result<(), CompileError> {
            let index = match index_of.get(&offset) {
                Some(index) => *index,
                None => return Err(CompileError::InconsistentStack { offset }),
            };
            match depths[index] {
                None => {
                    depths[index] = Some(depth);
                    if index != end {
                        worklist.push((index, depth));
                    }
                }
                Some(existing) if existing != depth => {
                    return Err(CompileError::InconsistentStack { offset })
                }
                Some(_) => (),
            }
            Ok(())
        };

        let initial = self.bindings.initial_stack_depth;
        let mut max_stack = initial;
        reach(0, initial, &mut worklist)?;
        for handler in self.handler_offsets() {
            max_stack = max_stack.max(1);
            reach(handler, 1, &mut worklist)?;
        }

        while let Some((index, depth)) = worklist.pop() {
            let insn = &self.instructions[index];
            if depth < insn.pops {
                return Err(CompileError::StackUnderflow {
                    offset: insn.offset,
                });
            }
            let after = depth - insn.pops + insn.pushes;
            max_stack = max_stack.max(after);

            let next = match self.instructions.get(index + 1) {
                Some(next) => next.offset,
                None => code_len,
            };
            match &insn.flow {
                Flow::Next => reach(next, after, &mut worklist)?,
                Flow::Stop => (),
                Flow::Goto(label) => reach(self.label(label)?, after, &mut worklist)?,
                Flow::Branch(label) => {
                    reach(next, after, &mut worklist)?;
                    reach(self.label(label)?, after, &mut worklist)?;
                }
                Flow::Switch(labels) => {
                    for label in labels {
                        reach(self.label(label)?, after, &mut worklist)?;
                    }
                }
            }
        }
        Ok(max_stack)
    }

    /// Offsets of the handlers declared so far
    fn handler_offsets(&self) -> Vec<usize> {
        self.catches
            .iter()
            .filter_map(|catch| self.labels.get(&catch.handler).copied())
            .collect()
    }
}
