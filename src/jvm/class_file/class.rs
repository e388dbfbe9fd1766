use super::{
    Attribute, ClassConstantIndex, ConstantsPool, Deserialize, Field, Method, Serialize, Version,
};
use crate::jvm::{ClassAccessFlags, Error};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::fs;
use std::io::{Cursor, ErrorKind};
use std::path::Path;

/// Representation of the [`class` file format of the JVM][0]
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html
#[derive(Debug, Clone)]
pub struct ClassFile {
    pub version: Version,
    pub constants: ConstantsPool,
    pub access_flags: ClassAccessFlags,
    pub this_class: ClassConstantIndex,
    pub super_class: Option<ClassConstantIndex>,
    pub interfaces: Vec<ClassConstantIndex>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// Magic header bytes that go at the front of the serialized class file
    const MAGIC: [u8; 4] = [0xCA, 0xFE, 0xBA, 0xBE];

    /// Decode a class file
    ///
    /// Running out of input or finding garbage is reported as a malformed class file rather than
    /// as an I/O error.
    pub fn parse(bytes: &[u8]) -> Result<ClassFile, Error> {
        let mut reader = Cursor::new(bytes);
        let class_file = ClassFile::deserialize(&mut reader).map_err(|err| match err.kind() {
            ErrorKind::UnexpectedEof | ErrorKind::InvalidData => {
                Error::MalformedClassFile(err.to_string())
            }
            _ => Error::IoError(err),
        })?;
        if reader.position() as usize != bytes.len() {
            return Err(Error::MalformedClassFile(String::from(
                "trailing bytes after class file",
            )));
        }
        Ok(class_file)
    }

    /// Binary name of the class
    pub fn name(&self) -> Option<&str> {
        self.constants.class_name(self.this_class)
    }

    /// Serialize the class file into a fresh buffer
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let mut bytes = vec![];
        self.serialize(&mut bytes)?;
        Ok(bytes)
    }

    /// Save the class file to disk
    pub fn save_to_path<P: AsRef<Path>>(
        &self,
        path: P,
        create_missing_directories: bool,
    ) -> std::io::Result<()> {
        let path = path.as_ref();
        if create_missing_directories {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut class_file = fs::File::create(path)?;
        self.serialize(&mut class_file)
    }
}

impl Serialize for ClassFile {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&ClassFile::MAGIC)?;
        self.version.serialize(writer)?;
        self.constants.serialize(writer)?;
        self.access_flags.serialize(writer)?;
        self.this_class.serialize(writer)?;
        match self.super_class {
            Some(super_class) => super_class.serialize(writer)?,
            None => 0u16.serialize(writer)?,
        }
        self.interfaces.serialize(writer)?;
        self.fields.serialize(writer)?;
        self.methods.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}

impl Deserialize for ClassFile {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        let mut magic = [0; 4];
        reader.read_exact(&mut magic)?;
        if magic != ClassFile::MAGIC {
            let msg = format!("Bad magic header {:02X?}", magic);
            return Err(std::io::Error::new(ErrorKind::InvalidData, msg));
        }

        let version = Version::deserialize(reader)?;
        let constants = ConstantsPool::deserialize(reader)?;
        let access_flags = ClassAccessFlags::deserialize(reader)?;
        let this_class = ClassConstantIndex::deserialize(reader)?;
        let super_class = ClassConstantIndex::deserialize(reader)?;
        Ok(ClassFile {
            version,
            constants,
            access_flags,
            this_class,
            super_class: if (super_class.0).0 == 0 {
                None
            } else {
                Some(super_class)
            },
            interfaces: Vec::<ClassConstantIndex>::deserialize(reader)?,
            fields: Vec::<Field>::deserialize(reader)?,
            methods: Vec::<Method>::deserialize(reader)?,
            attributes: Vec::<Attribute>::deserialize(reader)?,
        })
    }
}
