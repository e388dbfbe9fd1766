use super::{Attribute, ConstantsPool, Deserialize, Serialize, Utf8ConstantIndex};
use crate::jvm::MethodAccessFlags;
use byteorder::{ReadBytesExt, WriteBytesExt};

/// Method declared by a class or interface
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.6
#[derive(Debug, Clone, PartialEq)]
pub struct Method {
    pub access_flags: MethodAccessFlags,
    pub name_index: Utf8ConstantIndex,
    pub descriptor_index: Utf8ConstantIndex,
    pub attributes: Vec<Attribute>,
}

impl Method {
    /// Find the first attribute with a given name
    pub fn attribute(&self, name: &str, constants: &ConstantsPool) -> Option<&Attribute> {
        self.attributes
            .iter()
            .find(|attribute| attribute.name(constants) == Some(name))
    }

    /// Find the first attribute with a given name
    pub fn attribute_mut(
        &mut self,
        name: &str,
        constants: &ConstantsPool,
    ) -> Option<&mut Attribute> {
        self.attributes
            .iter_mut()
            .find(|attribute| attribute.name(constants) == Some(name))
    }
}

impl Serialize for Method {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.access_flags.serialize(writer)?;
        self.name_index.serialize(writer)?;
        self.descriptor_index.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}

impl Deserialize for Method {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        Ok(Method {
            access_flags: MethodAccessFlags::deserialize(reader)?,
            name_index: Utf8ConstantIndex::deserialize(reader)?,
            descriptor_index: Utf8ConstantIndex::deserialize(reader)?,
            attributes: Vec::<Attribute>::deserialize(reader)?,
        })
    }
}
