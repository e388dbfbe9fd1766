use super::code::opcodes::*;
use super::{BinaryName, Name};
use crate::util::Width;
use std::io::{Error, ErrorKind, Result};
use std::iter::Peekable;
use std::str::Chars;

/// Utility trait for converting descriptors to and from string representations
pub trait RenderDescriptor {
    /// Turn the descriptor into a string
    fn render(&self) -> String {
        let mut string = String::new();
        self.render_to(&mut string);
        string
    }

    /// Write the descriptor to a string
    fn render_to(&self, write_to: &mut String);
}

pub trait ParseDescriptor: Sized {
    /// Parse a descriptor from a string
    fn parse(source: &str) -> Result<Self> {
        let mut chars = source.chars().peekable();
        let ret = Self::parse_from(&mut chars)?;
        match chars.next() {
            None => Ok(ret),
            Some(c) => {
                let msg = format!("Unexpected leftover input '{}'", c);
                Err(Error::new(ErrorKind::InvalidInput, msg))
            }
        }
    }

    /// Read the descriptor from a character buffer
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self>;
}

/// Primitive value types
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum BaseType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
}

impl Width for BaseType {
    fn width(&self) -> usize {
        match self {
            BaseType::Double | BaseType::Long => 2,
            _ => 1,
        }
    }
}

impl RenderDescriptor for BaseType {
    fn render_to(&self, write_to: &mut String) {
        let c = match self {
            BaseType::Byte => 'B',
            BaseType::Char => 'C',
            BaseType::Double => 'D',
            BaseType::Float => 'F',
            BaseType::Int => 'I',
            BaseType::Long => 'J',
            BaseType::Short => 'S',
            BaseType::Boolean => 'Z',
        };
        write_to.push(c);
    }
}

impl ParseDescriptor for BaseType {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        let typ = match source.next() {
            Some('B') => BaseType::Byte,
            Some('C') => BaseType::Char,
            Some('D') => BaseType::Double,
            Some('F') => BaseType::Float,
            Some('I') => BaseType::Int,
            Some('J') => BaseType::Long,
            Some('S') => BaseType::Short,
            Some('Z') => BaseType::Boolean,
            Some(c) => {
                let msg = format!("Invalid base type character '{}'", c);
                return Err(Error::new(ErrorKind::InvalidInput, msg));
            }
            None => {
                let msg = "Missing base type character";
                return Err(Error::new(ErrorKind::UnexpectedEof, msg));
            }
        };
        Ok(typ)
    }
}

/// Array type over some element type
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct ArrayType<T> {
    /// Additional dimensions (`A[]` has 0 additional dimensions, `A[][][][]` has 3)
    pub additional_dimensions: usize,

    /// Underlying element type (`A` is the underlying element type of `A[][]`)
    pub element_type: T,
}

impl<T: RenderDescriptor> RenderDescriptor for ArrayType<T> {
    fn render_to(&self, write_to: &mut String) {
        for _ in 0..=self.additional_dimensions {
            write_to.push('[');
        }
        self.element_type.render_to(write_to);
    }
}

impl RenderDescriptor for BinaryName {
    fn render_to(&self, write_to: &mut String) {
        write_to.push('L');
        write_to.push_str(self.as_str());
        write_to.push(';');
    }
}

impl ParseDescriptor for BinaryName {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        if let Some('L') = source.next() {
            let mut class_name = String::new();
            loop {
                let c: char = source.next().ok_or_else(|| {
                    let msg = format!("Missing terminator for 'L{}'", class_name);
                    Error::new(ErrorKind::UnexpectedEof, msg)
                })?;
                if c == ';' {
                    return BinaryName::from_string(class_name)
                        .map_err(|msg| Error::new(ErrorKind::InvalidInput, msg));
                } else {
                    class_name.push(c)
                }
            }
        } else {
            Err(Error::new(
                ErrorKind::InvalidInput,
                "Expected object type to start with `L`",
            ))
        }
    }
}

/// Reference type
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum RefType {
    Object(BinaryName),
    ObjectArray(ArrayType<BinaryName>),
    PrimitiveArray(ArrayType<BaseType>),
}

impl RenderDescriptor for RefType {
    fn render_to(&self, write_to: &mut String) {
        match self {
            RefType::Object(cls) => cls.render_to(write_to),
            RefType::PrimitiveArray(arr) => arr.render_to(write_to),
            RefType::ObjectArray(arr) => arr.render_to(write_to),
        }
    }
}

impl ParseDescriptor for RefType {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        Ok(match source.peek().copied() {
            Some('L') => RefType::Object(BinaryName::parse_from(source)?),
            Some('[') => {
                source.next();
                let mut additional_dimensions = 0;
                while source.next_if_eq(&'[').is_some() {
                    additional_dimensions += 1;
                }
                if let Some('L') = source.peek().copied() {
                    RefType::ObjectArray(ArrayType {
                        additional_dimensions,
                        element_type: BinaryName::parse_from(source)?,
                    })
                } else {
                    RefType::PrimitiveArray(ArrayType {
                        additional_dimensions,
                        element_type: BaseType::parse_from(source)?,
                    })
                }
            }
            Some(c) => {
                let msg = format!("Invalid reference type character '{}'", c);
                return Err(Error::new(ErrorKind::InvalidInput, msg));
            }
            None => {
                let msg = "Missing field type";
                return Err(Error::new(ErrorKind::UnexpectedEof, msg));
            }
        })
    }
}

/// Type of a class, instance, or local variable
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum FieldType {
    Base(BaseType),
    Ref(RefType),
}

impl Width for FieldType {
    fn width(&self) -> usize {
        match self {
            FieldType::Base(base_type) => base_type.width(),
            FieldType::Ref(_) => 1,
        }
    }
}

impl FieldType {
    pub const fn object(class_name: BinaryName) -> FieldType {
        FieldType::Ref(RefType::Object(class_name))
    }

    pub const fn int() -> FieldType {
        FieldType::Base(BaseType::Int)
    }

    pub const fn long() -> FieldType {
        FieldType::Base(BaseType::Long)
    }

    /// How values of this type live on the operand stack and in locals
    pub fn kind(&self) -> ValueKind {
        match self {
            FieldType::Base(BaseType::Long) => ValueKind::Long,
            FieldType::Base(BaseType::Float) => ValueKind::Float,
            FieldType::Base(BaseType::Double) => ValueKind::Double,
            FieldType::Base(_) => ValueKind::Int,
            FieldType::Ref(_) => ValueKind::Reference,
        }
    }
}

impl RenderDescriptor for FieldType {
    fn render_to(&self, write_to: &mut String) {
        match self {
            FieldType::Base(base_type) => base_type.render_to(write_to),
            FieldType::Ref(reference_type) => reference_type.render_to(write_to),
        }
    }
}

impl ParseDescriptor for FieldType {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        match source.peek().copied() {
            None => Err(Error::new(ErrorKind::UnexpectedEof, "Missing field type")),
            Some('B' | 'C' | 'D' | 'F' | 'I' | 'J' | 'S' | 'Z') => {
                BaseType::parse_from(source).map(FieldType::Base)
            }
            Some('L' | '[') => RefType::parse_from(source).map(FieldType::Ref),
            Some(c) => {
                let msg = format!("Invalid field type character '{}'", c);
                Err(Error::new(ErrorKind::InvalidInput, msg))
            }
        }
    }
}

/// Signature of a method
#[derive(PartialEq, Eq, Hash, Debug, Clone)]
pub struct MethodDescriptor {
    pub parameters: Vec<FieldType>,
    pub return_type: Option<FieldType>, // `None` is for `void` (ie. no return)
}

impl MethodDescriptor {
    /// Total width of parameters (not the same as the length of the vector)
    pub fn parameter_length(&self, has_this_param: bool) -> usize {
        let this_len = if has_this_param { 1 } else { 0 };
        this_len
            + self
                .parameters
                .iter()
                .map(|parameter| parameter.width())
                .sum::<usize>()
    }
}

impl RenderDescriptor for MethodDescriptor {
    fn render_to(&self, write_to: &mut String) {
        write_to.push('(');
        for parameter in &self.parameters {
            parameter.render_to(write_to);
        }
        write_to.push(')');
        match &self.return_type {
            None => write_to.push('V'),
            Some(typ) => typ.render_to(write_to),
        }
    }
}

impl ParseDescriptor for MethodDescriptor {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        if source.next() != Some('(') {
            let msg = "Expected method descriptor to start with `(`";
            return Err(Error::new(ErrorKind::InvalidInput, msg));
        }

        let mut parameters = vec![];
        while source.next_if_eq(&')').is_none() {
            parameters.push(FieldType::parse_from(source)?);
        }

        let return_type = if source.next_if_eq(&'V').is_some() {
            None
        } else {
            Some(FieldType::parse_from(source)?)
        };

        Ok(MethodDescriptor {
            parameters,
            return_type,
        })
    }
}

/// Computational kind of a value, which decides the typed instruction used to move it around
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum ValueKind {
    Int,
    Long,
    Float,
    Double,
    Reference,
}

impl Width for ValueKind {
    fn width(&self) -> usize {
        match self {
            ValueKind::Long | ValueKind::Double => 2,
            _ => 1,
        }
    }
}

impl ValueKind {
    /// Opcode of `<t>load` taking an explicit slot operand
    pub const fn load_opcode(self) -> u8 {
        match self {
            ValueKind::Int => ILOAD,
            ValueKind::Long => LLOAD,
            ValueKind::Float => FLOAD,
            ValueKind::Double => DLOAD,
            ValueKind::Reference => ALOAD,
        }
    }

    /// Opcode of `<t>load_0` (the next three opcodes load slots 1 to 3)
    pub const fn load_short_opcode(self) -> u8 {
        match self {
            ValueKind::Int => ILOAD_0,
            ValueKind::Long => LLOAD_0,
            ValueKind::Float => FLOAD_0,
            ValueKind::Double => DLOAD_0,
            ValueKind::Reference => ALOAD_0,
        }
    }

    /// Opcode of `<t>store` taking an explicit slot operand
    pub const fn store_opcode(self) -> u8 {
        match self {
            ValueKind::Int => ISTORE,
            ValueKind::Long => LSTORE,
            ValueKind::Float => FSTORE,
            ValueKind::Double => DSTORE,
            ValueKind::Reference => ASTORE,
        }
    }

    /// Opcode of `<t>store_0` (the next three opcodes store slots 1 to 3)
    pub const fn store_short_opcode(self) -> u8 {
        match self {
            ValueKind::Int => ISTORE_0,
            ValueKind::Long => LSTORE_0,
            ValueKind::Float => FSTORE_0,
            ValueKind::Double => DSTORE_0,
            ValueKind::Reference => ASTORE_0,
        }
    }

    /// Opcode which pushes the zero value (or `null`) of this kind
    pub const fn zero_opcode(self) -> u8 {
        match self {
            ValueKind::Int => ICONST_0,
            ValueKind::Long => LCONST_0,
            ValueKind::Float => FCONST_0,
            ValueKind::Double => DCONST_0,
            ValueKind::Reference => ACONST_NULL,
        }
    }

    /// Kind of value returned by a return opcode (`None` for `return`)
    pub const fn of_return(opcode: u8) -> Option<ValueKind> {
        match opcode {
            IRETURN => Some(ValueKind::Int),
            LRETURN => Some(ValueKind::Long),
            FRETURN => Some(ValueKind::Float),
            DRETURN => Some(ValueKind::Double),
            ARETURN => Some(ValueKind::Reference),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn method_descriptors() {
        let desc = MethodDescriptor::parse("(IJ[Ljava/lang/String;[[D)V").unwrap();
        assert_eq!(
            desc.parameters,
            vec![
                FieldType::int(),
                FieldType::long(),
                FieldType::Ref(RefType::ObjectArray(ArrayType {
                    additional_dimensions: 0,
                    element_type: BinaryName::STRING,
                })),
                FieldType::Ref(RefType::PrimitiveArray(ArrayType {
                    additional_dimensions: 1,
                    element_type: BaseType::Double,
                })),
            ]
        );
        assert_eq!(desc.return_type, None);
        assert_eq!(desc.parameter_length(false), 5);
        assert_eq!(desc.parameter_length(true), 6);
        assert_eq!(desc.render(), "(IJ[Ljava/lang/String;[[D)V");
    }

    #[test]
    fn bad_descriptors() {
        assert!(MethodDescriptor::parse("I)V").is_err());
        assert!(MethodDescriptor::parse("(I)").is_err());
        assert!(MethodDescriptor::parse("(Ljava/lang/String)V").is_err());
        assert!(FieldType::parse("IJ").is_err());
        assert!(FieldType::parse("Q").is_err());
    }

    #[test]
    fn value_kinds() {
        assert_eq!(FieldType::parse("Z").unwrap().kind(), ValueKind::Int);
        assert_eq!(FieldType::parse("[J").unwrap().kind(), ValueKind::Reference);
        assert_eq!(FieldType::parse("D").unwrap().kind().width(), 2);
        assert_eq!(ValueKind::of_return(ARETURN), Some(ValueKind::Reference));
        assert_eq!(ValueKind::of_return(RETURN), None);
        assert_eq!(ValueKind::Long.load_short_opcode() + 3, LLOAD_3);
    }
}
