use super::{
    read_bytes, ClassConstantIndex, ConstantsPool, Deserialize, Serialize, Utf8ConstantIndex,
};
use crate::jvm::Error;
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// Attributes (used in classes, fields, methods, and even on some attributes)
///
/// Anything not decoded further stays in this raw form and is written back unchanged.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name_index: Utf8ConstantIndex,
    pub info: Vec<u8>,
}

impl Attribute {
    /// Name of the attribute, if the constant pool has it
    pub fn name<'a>(&self, constants: &'a ConstantsPool) -> Option<&'a str> {
        constants.utf8(self.name_index)
    }
}

impl Serialize for Attribute {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.name_index.serialize(writer)?;

        // Attribute info length is 4 bytes
        (self.info.len() as u32).serialize(writer)?;
        writer.write_all(&self.info)?;

        Ok(())
    }
}

impl Deserialize for Attribute {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        let name_index = Utf8ConstantIndex::deserialize(reader)?;
        let len = u32::deserialize(reader)?;
        let info = read_bytes(reader, len as usize)?;
        Ok(Attribute { name_index, info })
    }
}

/// Attributes are all stored in the same way (see `Attribute`), but internally
/// they represent very different things. This trait is implemented by things
/// which can be turned into attributes.
pub trait AttributeLike: Serialize {
    /// Name of the attribute
    const NAME: &'static str;
}

impl ConstantsPool {
    /// Encode an attribute, adding its name to the constant pool
    pub fn get_attribute<A: AttributeLike>(&mut self, attribute: &A) -> Result<Attribute, Error> {
        let name_index = self.get_utf8(A::NAME)?;
        let mut info = vec![];

        attribute.serialize(&mut info).map_err(Error::IoError)?;

        Ok(Attribute { name_index, info })
    }
}

/// Decoded `Code` attribute
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.3
#[derive(Debug, Clone, PartialEq)]
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionHandler>,
    pub attributes: Vec<CodeAttribute>,
}

impl Code {
    /// Code with no handlers or nested attributes
    pub fn new(max_stack: u16, max_locals: u16, code: Vec<u8>) -> Code {
        Code {
            max_stack,
            max_locals,
            code,
            exception_table: vec![],
            attributes: vec![],
        }
    }

    /// Decode the body of a `Code` attribute
    ///
    /// The constant pool is used to recognize which nested attributes hold bytecode offsets.
    pub fn parse(info: &[u8], constants: &ConstantsPool) -> Result<Code, Error> {
        let mut reader = Cursor::new(info);
        let max_stack = u16::deserialize(&mut reader)?;
        let max_locals = u16::deserialize(&mut reader)?;
        let code_len = u32::deserialize(&mut reader)?;
        let code = read_bytes(&mut reader, code_len as usize)?;
        let exception_table = Vec::<ExceptionHandler>::deserialize(&mut reader)?;

        let raw_attributes = Vec::<Attribute>::deserialize(&mut reader)?;
        let mut attributes = Vec::with_capacity(raw_attributes.len());
        for attribute in raw_attributes {
            attributes.push(CodeAttribute::parse(attribute, constants)?);
        }

        if reader.position() as usize != info.len() {
            return Err(Error::MalformedClassFile(String::from(
                "trailing bytes after `Code` attribute",
            )));
        }

        Ok(Code {
            max_stack,
            max_locals,
            code,
            exception_table,
            attributes,
        })
    }

    /// Line number entries across all of the `LineNumberTable` attributes
    pub fn line_numbers(&self) -> impl Iterator<Item = &LineNumber> {
        self.attributes
            .iter()
            .filter_map(|attribute| match attribute {
                CodeAttribute::LineNumberTable(table) => Some(table),
                _ => None,
            })
            .flat_map(|table| table.entries.iter())
    }

    pub fn has_line_numbers(&self) -> bool {
        self.attributes
            .iter()
            .any(|attribute| matches!(attribute, CodeAttribute::LineNumberTable(_)))
    }

    /// Local variable entries across all of the `LocalVariableTable` attributes
    pub fn local_variables(&self) -> impl Iterator<Item = &LocalVariable> {
        self.attributes
            .iter()
            .filter_map(|attribute| match attribute {
                CodeAttribute::LocalVariableTable(table) => Some(table),
                _ => None,
            })
            .flat_map(|table| table.entries.iter())
    }

    /// First `LocalVariableTable`, created if there isn't one yet
    pub fn local_variable_table_mut(
        &mut self,
        constants: &mut ConstantsPool,
    ) -> Result<&mut LocalVariableTable, Error> {
        let existing = self
            .attributes
            .iter()
            .position(|attribute| matches!(attribute, CodeAttribute::LocalVariableTable(_)));
        let position = match existing {
            Some(position) => position,
            None => {
                let name_index = constants.get_utf8(LocalVariableTable::NAME)?;
                self.attributes
                    .push(CodeAttribute::LocalVariableTable(LocalVariableTable {
                        name_index,
                        entries: vec![],
                    }));
                self.attributes.len() - 1
            }
        };
        match &mut self.attributes[position] {
            CodeAttribute::LocalVariableTable(table) => Ok(table),
            _ => unreachable!("position was found by matching on a local variable table"),
        }
    }

    /// Drop any `StackMapTable`, returning whether there was one
    pub fn remove_stack_map_table(&mut self) -> bool {
        let before = self.attributes.len();
        self.attributes
            .retain(|attribute| !matches!(attribute, CodeAttribute::StackMapTable(_)));
        before != self.attributes.len()
    }
}

impl Serialize for Code {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.max_stack.serialize(writer)?;
        self.max_locals.serialize(writer)?;
        (self.code.len() as u32).serialize(writer)?;
        writer.write_all(&self.code)?;
        self.exception_table.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}

impl AttributeLike for Code {
    const NAME: &'static str = "Code";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Start of exception handler range (inclusive)
    pub start_pc: u16,

    /// End of exception handler range (exclusive)
    pub end_pc: u16,

    /// Start of the exception handler
    pub handler_pc: u16,

    /// Class of exceptions caught (`None` catches everything)
    pub catch_type: Option<ClassConstantIndex>,
}

impl Serialize for ExceptionHandler {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.start_pc.serialize(writer)?;
        self.end_pc.serialize(writer)?;
        self.handler_pc.serialize(writer)?;
        match self.catch_type {
            Some(catch_type) => catch_type.serialize(writer),
            None => 0u16.serialize(writer),
        }
    }
}

impl Deserialize for ExceptionHandler {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        let start_pc = u16::deserialize(reader)?;
        let end_pc = u16::deserialize(reader)?;
        let handler_pc = u16::deserialize(reader)?;
        let catch_type = ClassConstantIndex::deserialize(reader)?;
        Ok(ExceptionHandler {
            start_pc,
            end_pc,
            handler_pc,
            catch_type: if (catch_type.0).0 == 0 {
                None
            } else {
                Some(catch_type)
            },
        })
    }
}

/// Attributes nested inside `Code`
///
/// The ones which refer to bytecode offsets get decoded, since every edit of the code needs to
/// update them.
#[derive(Debug, Clone, PartialEq)]
pub enum CodeAttribute {
    LineNumberTable(LineNumberTable),
    LocalVariableTable(LocalVariableTable),

    /// Same layout as `LocalVariableTable`, but with signatures instead of descriptors
    LocalVariableTypeTable(LocalVariableTable),

    /// Verification frames: kept raw since they can't be updated without recomputing them
    StackMapTable(Attribute),

    Other(Attribute),
}

impl CodeAttribute {
    fn parse(attribute: Attribute, constants: &ConstantsPool) -> Result<CodeAttribute, Error> {
        let name_index = attribute.name_index;
        let parsed = match attribute.name(constants) {
            Some(LineNumberTable::NAME) => {
                let entries = Vec::<LineNumber>::deserialize(&mut Cursor::new(&attribute.info))?;
                CodeAttribute::LineNumberTable(LineNumberTable {
                    name_index,
                    entries,
                })
            }
            Some(LocalVariableTable::NAME) => {
                let entries =
                    Vec::<LocalVariable>::deserialize(&mut Cursor::new(&attribute.info))?;
                CodeAttribute::LocalVariableTable(LocalVariableTable {
                    name_index,
                    entries,
                })
            }
            Some("LocalVariableTypeTable") => {
                let entries =
                    Vec::<LocalVariable>::deserialize(&mut Cursor::new(&attribute.info))?;
                CodeAttribute::LocalVariableTypeTable(LocalVariableTable {
                    name_index,
                    entries,
                })
            }
            Some("StackMapTable") => CodeAttribute::StackMapTable(attribute),
            _ => CodeAttribute::Other(attribute),
        };
        Ok(parsed)
    }
}

impl Serialize for CodeAttribute {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        let (name_index, info) = match self {
            CodeAttribute::LineNumberTable(table) => {
                let mut info = vec![];
                table.entries.serialize(&mut info)?;
                (table.name_index, info)
            }
            CodeAttribute::LocalVariableTable(table)
            | CodeAttribute::LocalVariableTypeTable(table) => {
                let mut info = vec![];
                table.entries.serialize(&mut info)?;
                (table.name_index, info)
            }
            CodeAttribute::StackMapTable(attribute) | CodeAttribute::Other(attribute) => {
                return attribute.serialize(writer)
            }
        };
        Attribute { name_index, info }.serialize(writer)
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.12
#[derive(Debug, Clone, PartialEq)]
pub struct LineNumberTable {
    pub name_index: Utf8ConstantIndex,
    pub entries: Vec<LineNumber>,
}

impl LineNumberTable {
    pub const NAME: &'static str = "LineNumberTable";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumber {
    pub start_pc: u16,
    pub line_number: u16,
}

impl Serialize for LineNumber {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.start_pc.serialize(writer)?;
        self.line_number.serialize(writer)
    }
}

impl Deserialize for LineNumber {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        Ok(LineNumber {
            start_pc: u16::deserialize(reader)?,
            line_number: u16::deserialize(reader)?,
        })
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.13
#[derive(Debug, Clone, PartialEq)]
pub struct LocalVariableTable {
    pub name_index: Utf8ConstantIndex,
    pub entries: Vec<LocalVariable>,
}

impl LocalVariableTable {
    pub const NAME: &'static str = "LocalVariableTable";
}

/// Local variable in scope over `[start_pc, start_pc + length)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalVariable {
    pub start_pc: u16,
    pub length: u16,
    pub name_index: Utf8ConstantIndex,
    pub descriptor_index: Utf8ConstantIndex,
    pub index: u16,
}

impl LocalVariable {
    /// Whether the variable is in scope at some offset
    pub fn is_live_at(&self, offset: usize) -> bool {
        let start = self.start_pc as usize;
        start <= offset && offset < start + self.length as usize
    }
}

impl Serialize for LocalVariable {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.start_pc.serialize(writer)?;
        self.length.serialize(writer)?;
        self.name_index.serialize(writer)?;
        self.descriptor_index.serialize(writer)?;
        self.index.serialize(writer)
    }
}

impl Deserialize for LocalVariable {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        Ok(LocalVariable {
            start_pc: u16::deserialize(reader)?,
            length: u16::deserialize(reader)?,
            name_index: Utf8ConstantIndex::deserialize(reader)?,
            descriptor_index: Utf8ConstantIndex::deserialize(reader)?,
            index: u16::deserialize(reader)?,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn code_attribute_round_trip() {
        let mut constants = ConstantsPool::new();
        let mut code = Code::new(2, 3, vec![0x03, 0xac]);
        code.exception_table.push(ExceptionHandler {
            start_pc: 0,
            end_pc: 1,
            handler_pc: 1,
            catch_type: None,
        });
        code.attributes
            .push(CodeAttribute::LineNumberTable(LineNumberTable {
                name_index: constants.get_utf8(LineNumberTable::NAME).unwrap(),
                entries: vec![LineNumber {
                    start_pc: 0,
                    line_number: 12,
                }],
            }));
        let stack_map = Attribute {
            name_index: constants.get_utf8("StackMapTable").unwrap(),
            info: vec![0, 0],
        };
        code.attributes
            .push(CodeAttribute::StackMapTable(stack_map));

        let attribute = constants.get_attribute(&code).unwrap();
        assert_eq!(attribute.name(&constants), Some("Code"));

        let mut parsed = Code::parse(&attribute.info, &constants).unwrap();
        assert_eq!(parsed, code);
        assert_eq!(parsed.line_numbers().count(), 1);

        assert!(parsed.remove_stack_map_table());
        assert!(!parsed.remove_stack_map_table());

        let name_index = constants.get_utf8("x").unwrap();
        let descriptor_index = constants.get_utf8("I").unwrap();
        let table = parsed.local_variable_table_mut(&mut constants).unwrap();
        table.entries.push(LocalVariable {
            start_pc: 0,
            length: 2,
            name_index,
            descriptor_index,
            index: 0,
        });
        assert_eq!(parsed.local_variables().count(), 1);
        assert!(parsed.local_variables().all(|var| var.is_live_at(1)));
    }

    #[test]
    fn truncated_code_attribute() {
        let constants = ConstantsPool::new();
        assert!(Code::parse(&[0, 1, 0, 1, 0, 0, 0, 4, 0x03], &constants).is_err());
    }
}
