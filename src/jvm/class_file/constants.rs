use super::{read_bytes, Deserialize, Serialize};
use crate::jvm::{Name, RefType, RenderDescriptor};
use crate::util::Width;
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::borrow::{Borrow, Cow};
use std::collections::HashMap;
use std::io::{Error as IoError, ErrorKind};
use std::result::Result;

/// Class file constants pool
///
/// Unlike a pool built up from scratch, this one starts out with whatever constants the class
/// already has. Existing entries are never moved or removed (instructions and attributes refer
/// to them by index), new entries are appended and the `get_*` methods reuse an existing
/// matching constant when there is one.
#[derive(Clone, Debug)]
pub struct ConstantsPool {
    /// Entries indexed by constant index (index 0 and the slot after a long/double are `None`)
    constants: Vec<Option<Constant>>,

    utf8s: HashMap<String, Utf8ConstantIndex>,
    classes: HashMap<Utf8ConstantIndex, ClassConstantIndex>,
    strings: HashMap<Utf8ConstantIndex, StringConstantIndex>,
    integers: HashMap<i32, ConstantIndex>,
    name_and_types: HashMap<(Utf8ConstantIndex, Utf8ConstantIndex), NameAndTypeConstantIndex>,
    fieldrefs: HashMap<(ClassConstantIndex, NameAndTypeConstantIndex), FieldRefConstantIndex>,
    methodrefs:
        HashMap<(ClassConstantIndex, NameAndTypeConstantIndex, bool), MethodRefConstantIndex>,
}

impl Default for ConstantsPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantsPool {
    /// Make a fresh empty constants pool
    pub fn new() -> ConstantsPool {
        ConstantsPool {
            constants: vec![None],
            utf8s: HashMap::new(),
            classes: HashMap::new(),
            strings: HashMap::new(),
            integers: HashMap::new(),
            name_and_types: HashMap::new(),
            fieldrefs: HashMap::new(),
            methodrefs: HashMap::new(),
        }
    }

    /// Number of slots in the pool, as written in `constant_pool_count`
    pub fn len(&self) -> usize {
        self.constants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constants.len() <= 1
    }

    /// Look up a constant
    pub fn get(&self, index: ConstantIndex) -> Option<&Constant> {
        self.constants.get(index.0 as usize).and_then(Option::as_ref)
    }

    /// Look up the string in a `Utf8` constant
    pub fn utf8(&self, index: Utf8ConstantIndex) -> Option<&str> {
        match self.get(index.0) {
            Some(Constant::Utf8(string)) => Some(string),
            _ => None,
        }
    }

    /// Look up the name in a `Class` constant
    pub fn class_name(&self, index: ClassConstantIndex) -> Option<&str> {
        match self.get(index.0) {
            Some(Constant::Class(name)) => self.utf8(*name),
            _ => None,
        }
    }

    /// Look up the name and descriptor in a `NameAndType` constant
    pub fn name_and_type(&self, index: NameAndTypeConstantIndex) -> Option<(&str, &str)> {
        match self.get(index.0) {
            Some(Constant::NameAndType { name, descriptor }) => {
                Some((self.utf8(*name)?, self.utf8(*descriptor)?))
            }
            _ => None,
        }
    }

    /// Look up the owning class, name, and descriptor of a field or method reference
    pub fn member_ref(&self, index: ConstantIndex) -> Option<(&str, &str, &str)> {
        let (class, name_and_type) = match self.get(index)? {
            Constant::FieldRef(class, name_and_type) => (*class, *name_and_type),
            Constant::MethodRef {
                class,
                name_and_type,
                ..
            } => (*class, *name_and_type),
            _ => return None,
        };
        let (name, descriptor) = self.name_and_type(name_and_type)?;
        Some((self.class_name(class)?, name, descriptor))
    }

    /// Push a constant into the constant pool, provided there is space for it
    ///
    /// Note: the largest valid index is 65535, indexing starts at 1, and some constants take two
    /// spaces.
    fn push_constant(&mut self, constant: Constant) -> Result<ConstantIndex, ConstantPoolOverflow> {
        let offset: u16 = self.constants.len() as u16;

        if offset.checked_add(constant.width() as u16).is_none() {
            return Err(ConstantPoolOverflow { constant, offset });
        }

        let width = constant.width();
        self.constants.push(Some(constant));
        if width == 2 {
            self.constants.push(None);
        }
        Ok(ConstantIndex(offset))
    }

    /// Record an existing constant in the maps used for reusing constants
    fn remember(&mut self, index: ConstantIndex) {
        let constant = match self.constants.get(index.0 as usize) {
            Some(Some(constant)) => constant.clone(),
            _ => return,
        };
        match constant {
            Constant::Utf8(string) => {
                self.utf8s.entry(string).or_insert(Utf8ConstantIndex(index));
            }
            Constant::Class(name) => {
                self.classes.entry(name).or_insert(ClassConstantIndex(index));
            }
            Constant::String(utf8) => {
                self.strings.entry(utf8).or_insert(StringConstantIndex(index));
            }
            Constant::Integer(integer) => {
                self.integers.entry(integer).or_insert(index);
            }
            Constant::NameAndType { name, descriptor } => {
                self.name_and_types
                    .entry((name, descriptor))
                    .or_insert(NameAndTypeConstantIndex(index));
            }
            Constant::FieldRef(class, name_and_type) => {
                self.fieldrefs
                    .entry((class, name_and_type))
                    .or_insert(FieldRefConstantIndex(index));
            }
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => {
                self.methodrefs
                    .entry((class, name_and_type, is_interface))
                    .or_insert(MethodRefConstantIndex(index));
            }
            _ => (),
        }
    }

    /// Get or insert a utf8 constant from the constant pool
    pub fn get_utf8<'a, S: Into<Cow<'a, str>>>(
        &mut self,
        utf8: S,
    ) -> Result<Utf8ConstantIndex, ConstantPoolOverflow> {
        let cow = utf8.into();

        if let Some(idx) = self.utf8s.get::<str>(cow.borrow()) {
            Ok(*idx)
        } else {
            let owned = cow.into_owned();
            let constant = Constant::Utf8(owned.clone());
            let idx = Utf8ConstantIndex(self.push_constant(constant)?);
            self.utf8s.insert(owned, idx);
            Ok(idx)
        }
    }

    /// Get or insert a class constant from the constant pool
    ///
    /// The name is either a binary name (`java/lang/String`) or, for array types, a descriptor.
    pub fn get_class<'a, S: Into<Cow<'a, str>>>(
        &mut self,
        name: S,
    ) -> Result<ClassConstantIndex, ConstantPoolOverflow> {
        let name = self.get_utf8(name)?;
        if let Some(idx) = self.classes.get(&name) {
            Ok(*idx)
        } else {
            let idx = ClassConstantIndex(self.push_constant(Constant::Class(name))?);
            self.classes.insert(name, idx);
            Ok(idx)
        }
    }

    /// Get or insert the class constant for a reference type
    ///
    /// When making a `CONSTANT_Class_info`, reference types are almost always objects. However,
    /// there are a handful of places where an array type needs to be fit in (eg. for a
    /// `checkcast` to an array type).
    pub fn get_ref_type(
        &mut self,
        ref_type: &RefType,
    ) -> Result<ClassConstantIndex, ConstantPoolOverflow> {
        match ref_type {
            RefType::Object(name) => self.get_class(name.as_str()),
            other => self.get_class(other.render()),
        }
    }

    /// Get or insert a string constant from the constant pool
    pub fn get_string(
        &mut self,
        utf8: Utf8ConstantIndex,
    ) -> Result<StringConstantIndex, ConstantPoolOverflow> {
        if let Some(idx) = self.strings.get(&utf8) {
            Ok(*idx)
        } else {
            let constant = Constant::String(utf8);
            let idx = StringConstantIndex(self.push_constant(constant)?);
            self.strings.insert(utf8, idx);
            Ok(idx)
        }
    }

    /// Get or insert an integer constant from the constant pool
    pub fn get_integer(&mut self, integer: i32) -> Result<ConstantIndex, ConstantPoolOverflow> {
        if let Some(idx) = self.integers.get(&integer) {
            Ok(*idx)
        } else {
            let idx = self.push_constant(Constant::Integer(integer))?;
            self.integers.insert(integer, idx);
            Ok(idx)
        }
    }

    /// Get or insert a name & type constant from the constant pool
    pub fn get_name_and_type(
        &mut self,
        name: Utf8ConstantIndex,
        descriptor: Utf8ConstantIndex,
    ) -> Result<NameAndTypeConstantIndex, ConstantPoolOverflow> {
        let name_and_type_key = (name, descriptor);
        if let Some(idx) = self.name_and_types.get(&name_and_type_key) {
            Ok(*idx)
        } else {
            let constant = Constant::NameAndType { name, descriptor };
            let idx = NameAndTypeConstantIndex(self.push_constant(constant)?);
            self.name_and_types.insert(name_and_type_key, idx);
            Ok(idx)
        }
    }

    /// Get or insert a `CONSTANT_Fieldref_info`
    pub fn get_field_ref(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<FieldRefConstantIndex, ConstantPoolOverflow> {
        let class = self.get_class(class)?;
        let name = self.get_utf8(name)?;
        let descriptor = self.get_utf8(descriptor)?;
        let name_and_type = self.get_name_and_type(name, descriptor)?;
        if let Some(idx) = self.fieldrefs.get(&(class, name_and_type)) {
            Ok(*idx)
        } else {
            let constant = Constant::FieldRef(class, name_and_type);
            let idx = FieldRefConstantIndex(self.push_constant(constant)?);
            self.fieldrefs.insert((class, name_and_type), idx);
            Ok(idx)
        }
    }

    /// Get or insert a `CONSTANT_Methodref_info` or `CONSTANT_InterfaceMethodref_info`
    pub fn get_method_ref(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
        is_interface: bool,
    ) -> Result<MethodRefConstantIndex, ConstantPoolOverflow> {
        let class = self.get_class(class)?;
        let name = self.get_utf8(name)?;
        let descriptor = self.get_utf8(descriptor)?;
        let name_and_type = self.get_name_and_type(name, descriptor)?;
        let key = (class, name_and_type, is_interface);
        if let Some(idx) = self.methodrefs.get(&key) {
            Ok(*idx)
        } else {
            let constant = Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            };
            let idx = MethodRefConstantIndex(self.push_constant(constant)?);
            self.methodrefs.insert(key, idx);
            Ok(idx)
        }
    }
}

impl Serialize for ConstantsPool {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        (self.constants.len() as u16).serialize(writer)?;
        for constant in self.constants.iter().flatten() {
            constant.serialize(writer)?;
        }
        Ok(())
    }
}

impl Deserialize for ConstantsPool {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        let count = u16::deserialize(reader)?;
        let mut pool = ConstantsPool::new();
        while pool.constants.len() < count as usize {
            let constant = Constant::deserialize(reader)?;
            let width = constant.width();
            let index = ConstantIndex(pool.constants.len() as u16);
            pool.constants.push(Some(constant));
            if width == 2 {
                pool.constants.push(None);
            }
            pool.remember(index);
        }
        if pool.constants.len() != count as usize {
            let msg = "Wide constant runs past the end of the constant pool";
            return Err(IoError::new(ErrorKind::InvalidData, msg));
        }
        Ok(pool)
    }
}

#[derive(Debug)]
pub struct ConstantPoolOverflow {
    pub constant: Constant,
    pub offset: u16,
}

/// Constants as in the constant pool
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.4
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// Class or an interface
    Class(Utf8ConstantIndex),

    /// Field
    FieldRef(ClassConstantIndex, NameAndTypeConstantIndex),

    /// Method (this combines `Methodref` and `InterfaceMethodref`
    MethodRef {
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
        is_interface: bool,
    },

    /// Constant object of type `java.lang.String`
    String(Utf8ConstantIndex),

    /// Constant primitive of type `int`
    Integer(i32),

    /// Constant primitive of type `float`
    Float(f32),

    /// Constant primitive of type `long`
    Long(i64),

    /// Constant primitive of type `double`
    Double(f64),

    /// Name and a type (eg. for a field or a method)
    NameAndType {
        name: Utf8ConstantIndex,
        descriptor: Utf8ConstantIndex,
    },

    /// Constant UTF-8 encoded raw string value
    ///
    /// Despite the name, the encoding is not quite UTF-8 (the encoding of the
    /// null character `\u{0000}` and the encoding of supplementary characters
    /// is different).
    Utf8(String),

    /// Constant object of type `java.lang.invoke.MethodHandle`
    MethodHandle {
        handle_kind: HandleKind,
        member: ConstantIndex,
    },

    /// Method type
    MethodType { descriptor: Utf8ConstantIndex },

    /// Dynamically-computed constant
    Dynamic {
        bootstrap_method: u16,
        name_and_type: NameAndTypeConstantIndex,
    },

    /// Dynamically-computed call site
    InvokeDynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap_method: u16,
        method_descriptor: NameAndTypeConstantIndex,
    },

    /// Module (only in `module-info` classes)
    Module(Utf8ConstantIndex),

    /// Package exported or opened by a module
    Package(Utf8ConstantIndex),
}

impl Serialize for Constant {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            Constant::Utf8(string) => {
                1u8.serialize(writer)?;
                let buffer: Vec<u8> = encode_modified_utf8(string);
                (buffer.len() as u16).serialize(writer)?;
                writer.write_all(&buffer)?;
            }
            Constant::Integer(integer) => {
                3u8.serialize(writer)?;
                integer.serialize(writer)?;
            }
            Constant::Float(float) => {
                4u8.serialize(writer)?;
                float.serialize(writer)?;
            }
            Constant::Long(long) => {
                5u8.serialize(writer)?;
                long.serialize(writer)?;
            }
            Constant::Double(double) => {
                6u8.serialize(writer)?;
                double.serialize(writer)?;
            }
            Constant::Class(name) => {
                7u8.serialize(writer)?;
                name.serialize(writer)?;
            }
            Constant::String(bytes) => {
                8u8.serialize(writer)?;
                bytes.serialize(writer)?;
            }
            Constant::FieldRef(class, name_and_type) => {
                9u8.serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => {
                (if !is_interface { 10u8 } else { 11u8 }).serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::NameAndType { name, descriptor } => {
                12u8.serialize(writer)?;
                name.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::MethodHandle {
                handle_kind,
                member,
            } => {
                15u8.serialize(writer)?;
                handle_kind.serialize(writer)?;
                member.serialize(writer)?;
            }
            Constant::MethodType { descriptor } => {
                16u8.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::Dynamic {
                bootstrap_method,
                name_and_type,
            } => {
                17u8.serialize(writer)?;
                bootstrap_method.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::InvokeDynamic {
                bootstrap_method,
                method_descriptor,
            } => {
                18u8.serialize(writer)?;
                bootstrap_method.serialize(writer)?;
                method_descriptor.serialize(writer)?;
            }
            Constant::Module(name) => {
                19u8.serialize(writer)?;
                name.serialize(writer)?;
            }
            Constant::Package(name) => {
                20u8.serialize(writer)?;
                name.serialize(writer)?;
            }
        };
        Ok(())
    }
}

impl Deserialize for Constant {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        let constant = match u8::deserialize(reader)? {
            1 => {
                let len = u16::deserialize(reader)?;
                let bytes = read_bytes(reader, len as usize)?;
                let string = decode_modified_utf8(&bytes).ok_or_else(|| {
                    IoError::new(ErrorKind::InvalidData, "Malformed modified UTF-8 constant")
                })?;
                Constant::Utf8(string)
            }
            3 => Constant::Integer(i32::deserialize(reader)?),
            4 => Constant::Float(f32::deserialize(reader)?),
            5 => Constant::Long(i64::deserialize(reader)?),
            6 => Constant::Double(f64::deserialize(reader)?),
            7 => Constant::Class(Utf8ConstantIndex::deserialize(reader)?),
            8 => Constant::String(Utf8ConstantIndex::deserialize(reader)?),
            9 => Constant::FieldRef(
                ClassConstantIndex::deserialize(reader)?,
                NameAndTypeConstantIndex::deserialize(reader)?,
            ),
            tag @ (10 | 11) => Constant::MethodRef {
                class: ClassConstantIndex::deserialize(reader)?,
                name_and_type: NameAndTypeConstantIndex::deserialize(reader)?,
                is_interface: tag == 11,
            },
            12 => Constant::NameAndType {
                name: Utf8ConstantIndex::deserialize(reader)?,
                descriptor: Utf8ConstantIndex::deserialize(reader)?,
            },
            15 => Constant::MethodHandle {
                handle_kind: HandleKind::deserialize(reader)?,
                member: ConstantIndex::deserialize(reader)?,
            },
            16 => Constant::MethodType {
                descriptor: Utf8ConstantIndex::deserialize(reader)?,
            },
            17 => Constant::Dynamic {
                bootstrap_method: u16::deserialize(reader)?,
                name_and_type: NameAndTypeConstantIndex::deserialize(reader)?,
            },
            18 => Constant::InvokeDynamic {
                bootstrap_method: u16::deserialize(reader)?,
                method_descriptor: NameAndTypeConstantIndex::deserialize(reader)?,
            },
            19 => Constant::Module(Utf8ConstantIndex::deserialize(reader)?),
            20 => Constant::Package(Utf8ConstantIndex::deserialize(reader)?),
            tag => {
                let msg = format!("Unknown constant pool tag {}", tag);
                return Err(IoError::new(ErrorKind::InvalidData, msg));
            }
        };
        Ok(constant)
    }
}

/// Modified UTF-8 format used in class files.
///
/// See [this `DataInput` section for details][0]. Quoting from that section:
///
/// > The differences between this format and the standard UTF-8 format are the following:
/// >
/// >  * The null byte `\u0000` is encoded in 2-byte format rather than 1-byte, so that the encoded
/// >    strings never have embedded nulls.
/// >  * Only the 1-byte, 2-byte, and 3-byte formats are used.
/// >  * Supplementary characters are represented in the form of surrogate pairs.
///
/// [0]: https://docs.oracle.com/en/java/javase/17/docs/api/java.base/java/io/DataInput.html#modified-utf-8
pub fn encode_modified_utf8(string: &str) -> Vec<u8> {
    let mut buffer: Vec<u8> = vec![];
    let mut units = [0u16; 2];
    for c in string.chars() {
        for unit in c.encode_utf16(&mut units).iter() {
            let code = *unit as u32;
            if code != 0 && code < 0x80 {
                buffer.push(code as u8);
            } else if code < 0x800 {
                buffer.push((code >> 6 & 0x1F) as u8 | 0b1100_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            } else {
                buffer.push((code >> 12 & 0x0F) as u8 | 0b1110_0000);
                buffer.push((code >> 6 & 0x3F) as u8 | 0b1000_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            }
        }
    }
    buffer
}

/// Inverse of [`encode_modified_utf8`]
///
/// Returns `None` if the bytes are not a valid encoding, including when they contain an unpaired
/// surrogate (which has no `char` representation).
pub fn decode_modified_utf8(bytes: &[u8]) -> Option<String> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter().copied();
    let continuation = |byte: Option<u8>| -> Option<u16> {
        match byte {
            Some(b) if b & 0b1100_0000 == 0b1000_0000 => Some((b & 0x3F) as u16),
            _ => None,
        }
    };
    while let Some(first) = iter.next() {
        let unit = if first & 0b1000_0000 == 0 && first != 0 {
            first as u16
        } else if first & 0b1110_0000 == 0b1100_0000 {
            ((first & 0x1F) as u16) << 6 | continuation(iter.next())?
        } else if first & 0b1111_0000 == 0b1110_0000 {
            let high = continuation(iter.next())?;
            let low = continuation(iter.next())?;
            ((first & 0x0F) as u16) << 12 | high << 6 | low
        } else {
            return None;
        };
        units.push(unit);
    }
    String::from_utf16(&units).ok()
}

#[cfg(test)]
mod encode_modified_utf8_tests {
    use super::*;

    #[test]
    fn containing_null_byte() {
        assert_eq!(encode_modified_utf8("a\x00a"), vec![97, 192, 128, 97]);
        assert_eq!(decode_modified_utf8(&[97, 192, 128, 97]).unwrap(), "a\x00a");
    }

    #[test]
    fn simple_ascii() {
        assert_eq!(encode_modified_utf8("foo"), vec![102, 111, 111]);
        assert_eq!(decode_modified_utf8(b"hel10_World").unwrap(), "hel10_World");
    }

    #[test]
    fn two_and_three_byte_encodings() {
        let encoded = vec![196, 132, 199, 141, 224, 164, 132, 224, 189, 168];
        assert_eq!(encode_modified_utf8("ĄǍऄཨ"), encoded);
        assert_eq!(decode_modified_utf8(&encoded).unwrap(), "ĄǍऄཨ");
    }

    #[test]
    fn supplementary_characters() {
        let encoded = vec![
            237, 160, 128, 237, 176, 128, 237, 172, 191, 237, 191, 191, 237, 175, 191, 237, 191,
            191,
        ];
        assert_eq!(encode_modified_utf8("\u{10000}\u{dffff}\u{10FFFF}"), encoded);
        assert_eq!(
            decode_modified_utf8(&encoded).unwrap(),
            "\u{10000}\u{dffff}\u{10FFFF}"
        );
    }

    #[test]
    fn malformed() {
        // plain zero byte, truncated sequence, lone surrogate
        assert_eq!(decode_modified_utf8(&[0]), None);
        assert_eq!(decode_modified_utf8(&[0xE0, 0xA4]), None);
        assert_eq!(decode_modified_utf8(&[237, 160, 128]), None);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reuses_existing_constants() {
        let mut pool = ConstantsPool::new();
        let class = pool.get_class("java/lang/Object").unwrap();
        let method = pool
            .get_method_ref("java/lang/Object", "<init>", "()V", false)
            .unwrap();
        let long = pool.push_constant(Constant::Long(1)).unwrap();
        let after_long = pool.get_integer(7).unwrap();
        assert_eq!(after_long.0, long.0 + 2);

        let mut bytes = vec![];
        pool.serialize(&mut bytes).unwrap();
        let mut parsed = ConstantsPool::deserialize(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(parsed.len(), pool.len());

        assert_eq!(parsed.get_class("java/lang/Object").unwrap(), class);
        assert_eq!(
            parsed
                .get_method_ref("java/lang/Object", "<init>", "()V", false)
                .unwrap(),
            method
        );
        assert_eq!(parsed.get_integer(7).unwrap(), after_long);
        assert_eq!(parsed.len(), pool.len());
        assert_eq!(
            parsed.member_ref(method.0),
            Some(("java/lang/Object", "<init>", "()V"))
        );
    }

    #[test]
    fn overflow() {
        let mut pool = ConstantsPool::new();
        for i in 1..u16::MAX {
            pool.get_integer(i as i32).unwrap();
        }
        assert!(pool.get_integer(-1).is_err());
    }
}

/// Almost all constants have width 1, except for `Constant::Long` and `Constant::Double`. Quoting
/// the JVM specification:
///
/// > All 8-byte constants take up two entries in the constant_pool table of the class file. If a
/// > CONSTANT_Long_info or CONSTANT_Double_info structure is the item in the constant_pool table
/// > at index n, then the next usable item in the pool is located at index n+2.
impl Width for Constant {
    fn width(&self) -> usize {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }
}

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct ConstantIndex(pub u16);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct Utf8ConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct StringConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct NameAndTypeConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct ClassConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct FieldRefConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct MethodRefConstantIndex(pub ConstantIndex);

impl Serialize for ConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Deserialize for ConstantIndex {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        Ok(ConstantIndex(u16::deserialize(reader)?))
    }
}

/// Typed indices are just a [`ConstantIndex`] on disk
macro_rules! typed_constant_index {
    ($($typ:ident),*) => {
        $(
            impl From<$typ> for ConstantIndex {
                fn from(index: $typ) -> ConstantIndex {
                    index.0
                }
            }

            impl Serialize for $typ {
                fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
                    self.0.serialize(writer)
                }
            }

            impl Deserialize for $typ {
                fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
                    Ok($typ(ConstantIndex::deserialize(reader)?))
                }
            }
        )*
    };
}

typed_constant_index!(
    Utf8ConstantIndex,
    StringConstantIndex,
    NameAndTypeConstantIndex,
    ClassConstantIndex,
    FieldRefConstantIndex,
    MethodRefConstantIndex
);

/// Type of method handle
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-5.html#jvms-5.4.3.5-220
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum HandleKind {
    GetField,
    GetStatic,
    PutField,
    PutStatic,
    InvokeVirtual,
    InvokeStatic,
    InvokeSpecial,
    NewInvokeSpecial,
    InvokeInterface,
}

impl Serialize for HandleKind {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        let byte: u8 = match self {
            HandleKind::GetField => 1,
            HandleKind::GetStatic => 2,
            HandleKind::PutField => 3,
            HandleKind::PutStatic => 4,
            HandleKind::InvokeVirtual => 5,
            HandleKind::InvokeStatic => 6,
            HandleKind::InvokeSpecial => 7,
            HandleKind::NewInvokeSpecial => 8,
            HandleKind::InvokeInterface => 9,
        };
        byte.serialize(writer)
    }
}

impl Deserialize for HandleKind {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        let kind = match u8::deserialize(reader)? {
            1 => HandleKind::GetField,
            2 => HandleKind::GetStatic,
            3 => HandleKind::PutField,
            4 => HandleKind::PutStatic,
            5 => HandleKind::InvokeVirtual,
            6 => HandleKind::InvokeStatic,
            7 => HandleKind::InvokeSpecial,
            8 => HandleKind::NewInvokeSpecial,
            9 => HandleKind::InvokeInterface,
            other => {
                let msg = format!("Unknown method handle kind {}", other);
                return Err(IoError::new(ErrorKind::InvalidData, msg));
            }
        };
        Ok(kind)
    }
}
