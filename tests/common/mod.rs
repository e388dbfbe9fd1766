//! Small classes to edit, and a toy interpreter to run their methods afterwards
//!
//! The interpreter only knows the `int`/reference subset of the instruction set the tests use.
//! Calls to `Log.record:(I)V` are recorded as effects and calls to `Log.fail:()V` throw a
//! `java/lang/RuntimeException`. Every step checks the stack and locals against the maxima of the
//! method, so running code also checks those are big enough.

#![allow(dead_code)]

use jarsplice::jvm::class_file::*;
use jarsplice::jvm::code::opcodes::*;
use jarsplice::jvm::{ClassAccessFlags, MethodAccessFlags};
use jarsplice::splice::{EditableClass, Settings};

pub const LOG_CLASS: &str = "Log";

/// Class with a handful of static methods, built constant by constant
pub struct ClassBuilder {
    constants: ConstantsPool,
    this_class: ClassConstantIndex,
    super_class: ClassConstantIndex,
    methods: Vec<Method>,
    version: Version,
}

impl ClassBuilder {
    pub fn new(name: &str) -> ClassBuilder {
        let mut constants = ConstantsPool::new();
        let this_class = constants.get_class(name.to_owned()).unwrap();
        let super_class = constants.get_class("java/lang/Object").unwrap();
        ClassBuilder {
            constants,
            this_class,
            super_class,
            methods: vec![],
            version: Version::JAVA6,
        }
    }

    pub fn version(&mut self, version: Version) -> &mut ClassBuilder {
        self.version = version;
        self
    }

    /// Index of the `Log.record:(I)V` method reference, as big-endian operand bytes
    pub fn record(&mut self) -> [u8; 2] {
        self.method_ref(LOG_CLASS, "record", "(I)V")
    }

    /// Index of the `Log.fail:()V` method reference, as big-endian operand bytes
    pub fn fail(&mut self) -> [u8; 2] {
        self.method_ref(LOG_CLASS, "fail", "()V")
    }

    pub fn method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> [u8; 2] {
        let MethodRefConstantIndex(ConstantIndex(index)) = self
            .constants
            .get_method_ref(class, name, descriptor, false)
            .unwrap();
        index.to_be_bytes()
    }

    pub fn class(&mut self, name: &str) -> ClassConstantIndex {
        self.constants.get_class(name.to_owned()).unwrap()
    }

    /// Add a static method
    ///
    /// `lines` are `(start_pc, line)` pairs and `locals` are `(start_pc, length, name,
    /// descriptor, slot)` tuples.
    pub fn method(
        &mut self,
        name: &str,
        descriptor: &str,
        mut code: Code,
        lines: &[(u16, u16)],
        locals: &[(u16, u16, &str, &str, u16)],
    ) -> &mut ClassBuilder {
        if !lines.is_empty() {
            let name_index = self.constants.get_utf8(LineNumberTable::NAME).unwrap();
            code.attributes
                .push(CodeAttribute::LineNumberTable(LineNumberTable {
                    name_index,
                    entries: lines
                        .iter()
                        .map(|&(start_pc, line_number)| LineNumber {
                            start_pc,
                            line_number,
                        })
                        .collect(),
                }));
        }
        for &(start_pc, length, name, descriptor, index) in locals {
            let name_index = self.constants.get_utf8(name.to_owned()).unwrap();
            let descriptor_index = self.constants.get_utf8(descriptor.to_owned()).unwrap();
            code.local_variable_table_mut(&mut self.constants)
                .unwrap()
                .entries
                .push(LocalVariable {
                    start_pc,
                    length,
                    name_index,
                    descriptor_index,
                    index,
                });
        }

        let name_index = self.constants.get_utf8(name.to_owned()).unwrap();
        let descriptor_index = self.constants.get_utf8(descriptor.to_owned()).unwrap();
        let code = self.constants.get_attribute(&code).unwrap();
        self.methods.push(Method {
            access_flags: MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            name_index,
            descriptor_index,
            attributes: vec![code],
        });
        self
    }

    /// Add a method with raw attributes (eg. an abstract method with none)
    pub fn raw_method(
        &mut self,
        name: &str,
        descriptor: &str,
        access_flags: MethodAccessFlags,
        attributes: Vec<Attribute>,
    ) -> &mut ClassBuilder {
        let name_index = self.constants.get_utf8(name.to_owned()).unwrap();
        let descriptor_index = self.constants.get_utf8(descriptor.to_owned()).unwrap();
        self.methods.push(Method {
            access_flags,
            name_index,
            descriptor_index,
            attributes,
        });
        self
    }

    pub fn stack_map_table(&mut self) -> CodeAttribute {
        let name_index = self.constants.get_utf8("StackMapTable").unwrap();
        CodeAttribute::StackMapTable(Attribute {
            name_index,
            info: vec![0, 0],
        })
    }

    /// Serialized class file
    pub fn build(&self) -> Vec<u8> {
        let class_file = ClassFile {
            version: self.version,
            constants: self.constants.clone(),
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            this_class: self.this_class,
            super_class: Some(self.super_class),
            interfaces: vec![],
            fields: vec![],
            methods: self.methods.clone(),
            attributes: vec![],
        };
        class_file.to_bytes().unwrap()
    }

    pub fn editable(&self) -> EditableClass {
        EditableClass::parse(&self.build(), Settings::new()).unwrap()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Int(i32),
    Null,
    Exception(&'static str),
    ReturnAddress(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Returned(Option<Value>),
    Threw(&'static str),
}

/// What running a method did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    pub outcome: Outcome,
    pub effects: Vec<i32>,
}

const RUNTIME_EXCEPTION: &str = "java/lang/RuntimeException";

/// Run a static method of a serialized class with some `int` arguments
pub fn run(class_bytes: &[u8], name: &str, args: &[i32]) -> Run {
    let class_file = ClassFile::parse(class_bytes).expect("class does not parse");
    let constants = &class_file.constants;
    let method = class_file
        .methods
        .iter()
        .find(|method| constants.utf8(method.name_index) == Some(name))
        .expect("no such method");
    let attribute = method.attribute("Code", constants).expect("no code");
    let code = Code::parse(&attribute.info, constants).expect("code does not parse");

    let mut locals = vec![None; code.max_locals as usize];
    for (slot, arg) in args.iter().enumerate() {
        locals[slot] = Some(Value::Int(*arg));
    }
    let mut stack: Vec<Value> = vec![];
    let mut effects = vec![];
    let mut pc = 0;
    let bytes = &code.code;

    let u16_at = |at: usize| u16::from_be_bytes([bytes[at], bytes[at + 1]]);
    let i16_at = |at: usize| i16::from_be_bytes([bytes[at], bytes[at + 1]]) as isize;
    let i32_at =
        |at: usize| i32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
    let jump = |pc: usize, offset: isize| (pc as isize + offset) as usize;

    for _ in 0..1_000_000 {
        assert!(
            stack.len() <= code.max_stack as usize,
            "stack overflows max_stack at {}",
            pc
        );
        let opcode = bytes[pc];
        let mut thrown: Option<&'static str> = None;
        let mut next = pc + instruction_width(bytes, pc).unwrap();

        macro_rules! pop_int {
            () => {
                match stack.pop() {
                    Some(Value::Int(value)) => value,
                    other => panic!("expected int at {}, found {:?}", pc, other),
                }
            };
        }
        macro_rules! load {
            ($slot:expr) => {{
                let value = locals[$slot as usize]
                    .unwrap_or_else(|| panic!("uninitialized local {} at {}", $slot, pc));
                stack.push(value);
            }};
        }
        macro_rules! store {
            ($slot:expr) => {{
                let value = stack.pop().expect("store from empty stack");
                locals[$slot as usize] = Some(value);
            }};
        }

        match opcode {
            NOP => (),
            ACONST_NULL => stack.push(Value::Null),
            ICONST_M1..=ICONST_5 => stack.push(Value::Int(opcode as i32 - ICONST_0 as i32)),
            BIPUSH => stack.push(Value::Int(bytes[pc + 1] as i8 as i32)),
            SIPUSH => stack.push(Value::Int(i16_at(pc + 1) as i32)),
            ILOAD | ALOAD => load!(bytes[pc + 1]),
            ISTORE | ASTORE => store!(bytes[pc + 1]),
            _ if (ILOAD_0..=ILOAD_3).contains(&opcode) => load!(opcode - ILOAD_0),
            _ if (ALOAD_0..=ALOAD_3).contains(&opcode) => load!(opcode - ALOAD_0),
            _ if (ISTORE_0..ISTORE_0 + 4).contains(&opcode) => store!(opcode - ISTORE_0),
            _ if (ASTORE_0..=ASTORE_3).contains(&opcode) => store!(opcode - ASTORE_0),
            POP => {
                stack.pop().expect("pop from empty stack");
            }
            DUP => {
                let top = *stack.last().expect("dup of empty stack");
                stack.push(top);
            }
            IADD | ISUB | IMUL => {
                let right = pop_int!();
                let left = pop_int!();
                stack.push(Value::Int(match opcode {
                    IADD => left.wrapping_add(right),
                    ISUB => left.wrapping_sub(right),
                    _ => left.wrapping_mul(right),
                }));
            }
            IINC => {
                let slot = bytes[pc + 1] as usize;
                let current = locals[slot];
                match current {
                    Some(Value::Int(value)) => {
                        locals[slot] = Some(Value::Int(value + bytes[pc + 2] as i8 as i32))
                    }
                    other => panic!("iinc of {:?} at {}", other, pc),
                }
            }
            IFEQ..=IFLE => {
                let value = pop_int!();
                let taken = match opcode {
                    IFEQ => value == 0,
                    IFNE => value != 0,
                    IFLT => value < 0,
                    IFGE => value >= 0,
                    IFGT => value > 0,
                    _ => value <= 0,
                };
                if taken {
                    next = jump(pc, i16_at(pc + 1));
                }
            }
            IF_ICMPEQ..=IF_ICMPLE => {
                let right = pop_int!();
                let left = pop_int!();
                let taken = match opcode {
                    IF_ICMPEQ => left == right,
                    IF_ICMPNE => left != right,
                    IF_ICMPLT => left < right,
                    IF_ICMPGE => left >= right,
                    IF_ICMPGT => left > right,
                    _ => left <= right,
                };
                if taken {
                    next = jump(pc, i16_at(pc + 1));
                }
            }
            IFNULL | IFNONNULL => {
                let is_null = stack.pop() == Some(Value::Null);
                if is_null == (opcode == IFNULL) {
                    next = jump(pc, i16_at(pc + 1));
                }
            }
            GOTO => next = jump(pc, i16_at(pc + 1)),
            GOTO_W => next = jump(pc, i32_at(pc + 1) as isize),
            JSR => {
                stack.push(Value::ReturnAddress(next));
                next = jump(pc, i16_at(pc + 1));
            }
            JSR_W => {
                stack.push(Value::ReturnAddress(next));
                next = jump(pc, i32_at(pc + 1) as isize);
            }
            RET => match locals[bytes[pc + 1] as usize] {
                Some(Value::ReturnAddress(address)) => next = address,
                other => panic!("ret to {:?} at {}", other, pc),
            },
            TABLESWITCH => {
                let base = pc + 1 + switch_padding(pc);
                let default = i32_at(base);
                let low = i32_at(base + 4);
                let high = i32_at(base + 8);
                let key = pop_int!();
                let relative = if key < low || key > high {
                    default
                } else {
                    i32_at(base + 12 + 4 * (key - low) as usize)
                };
                next = jump(pc, relative as isize);
            }
            IRETURN => {
                let value = pop_int!();
                return Run {
                    outcome: Outcome::Returned(Some(Value::Int(value))),
                    effects,
                };
            }
            ARETURN => {
                let value = stack.pop();
                return Run {
                    outcome: Outcome::Returned(value),
                    effects,
                };
            }
            RETURN => {
                return Run {
                    outcome: Outcome::Returned(None),
                    effects,
                }
            }
            INVOKESTATIC => {
                let index = ConstantIndex(u16_at(pc + 1));
                let (class, name, descriptor) =
                    constants.member_ref(index).expect("bad method reference");
                match (class, name, descriptor) {
                    (LOG_CLASS, "record", "(I)V") => effects.push(pop_int!()),
                    (LOG_CLASS, "fail", "()V") => thrown = Some(RUNTIME_EXCEPTION),
                    other => panic!("unknown method {:?}", other),
                }
            }
            ATHROW => match stack.pop() {
                Some(Value::Exception(class)) => thrown = Some(class),
                other => panic!("athrow of {:?} at {}", other, pc),
            },
            other => panic!("unsupported opcode 0x{:02x} at {}", other, pc),
        }

        if let Some(class) = thrown {
            let handler = code.exception_table.iter().find(|handler| {
                let covered = handler.start_pc as usize <= pc && pc < handler.end_pc as usize;
                let catches = match handler.catch_type {
                    None => true,
                    Some(catch_type) => matches!(
                        constants.class_name(catch_type),
                        Some(name) if name == class || name == "java/lang/Throwable"
                    ),
                };
                covered && catches
            });
            match handler {
                Some(handler) => {
                    stack.clear();
                    stack.push(Value::Exception(class));
                    next = handler.handler_pc as usize;
                }
                None => {
                    return Run {
                        outcome: Outcome::Threw(class),
                        effects,
                    }
                }
            }
        }

        pc = next;
    }
    panic!("method did not finish");
}

/// Shorthand for the method reference operand of `invokestatic`
pub fn invokestatic(index: [u8; 2]) -> [u8; 3] {
    [INVOKESTATIC, index[0], index[1]]
}
