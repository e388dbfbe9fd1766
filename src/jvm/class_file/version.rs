use super::{Deserialize, Serialize};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::Result;

/// Version of the class file, which is used to verify that the JVM has the
/// necessary features to interpret the class
#[derive(PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Clone, Copy)]
pub struct Version {
    pub minor_version: u16,
    pub major_version: u16,
}

impl Version {
    /// JVM class file version corresponding to Java SE 6, the last one without mandatory
    /// `StackMapTable` verification
    pub const JAVA6: Version = Version {
        minor_version: 0,
        major_version: 50,
    };

    /// Whether the JVM will refuse to load methods that lack stack map frames
    ///
    /// These are also the versions in which `jsr` and `ret` are rejected.
    pub fn requires_stack_map_frames(&self) -> bool {
        *self > Version::JAVA6
    }
}

impl Serialize for Version {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        self.minor_version.serialize(writer)?;
        self.major_version.serialize(writer)?;
        Ok(())
    }
}

impl Deserialize for Version {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        let minor_version = u16::deserialize(reader)?;
        let major_version = u16::deserialize(reader)?;
        Ok(Version {
            minor_version,
            major_version,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stack_map_frames() {
        assert!(!Version::JAVA6.requires_stack_map_frames());
        assert!(!Version {
            minor_version: 3,
            major_version: 45
        }
        .requires_stack_map_frames());
        assert!(Version {
            minor_version: 0,
            major_version: 51
        }
        .requires_stack_map_frames());
    }
}
