use super::{Behavior, Compiler, Error, Settings, SnippetAssembler};
use crate::jvm::class_file::ClassFile;
use crate::jvm::{MethodDescriptor, ParseDescriptor};
use log::debug;
use std::fs;
use std::path::Path;

/// Class whose methods can be edited
///
/// A class starts out editable and becomes frozen once it has been written out (see
/// [`EditableClass::to_bytes`]). Frozen classes reject every edit until they are explicitly
/// defrosted.
pub struct EditableClass {
    pub(super) class_file: ClassFile,
    pub(super) settings: Settings,
    pub(super) compiler: Box<dyn Compiler>,
    frozen: bool,
}

impl EditableClass {
    /// Wrap a decoded class, compiling snippets with [`SnippetAssembler`]
    pub fn new(class_file: ClassFile, settings: Settings) -> EditableClass {
        EditableClass {
            class_file,
            settings,
            compiler: Box::new(SnippetAssembler::new()),
            frozen: false,
        }
    }

    pub fn parse(bytes: &[u8], settings: Settings) -> Result<EditableClass, Error> {
        let class_file = ClassFile::parse(bytes)?;
        Ok(EditableClass::new(class_file, settings))
    }

    pub fn from_path<P: AsRef<Path>>(path: P, settings: Settings) -> Result<EditableClass, Error> {
        let bytes = fs::read(path).map_err(crate::jvm::Error::IoError)?;
        EditableClass::parse(&bytes, settings)
    }

    /// Use a different compiler for snippets
    pub fn set_compiler(&mut self, compiler: Box<dyn Compiler>) {
        self.compiler = compiler;
    }

    /// Binary name of the class
    pub fn name(&self) -> &str {
        self.class_file.name().unwrap_or("<unnamed>")
    }

    pub fn class_file(&self) -> &ClassFile {
        &self.class_file
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Make a frozen class editable again
    pub fn defrost(&mut self) {
        self.frozen = false;
    }

    /// Fail if the class is frozen
    pub fn check_modify(&self) -> Result<(), Error> {
        if self.frozen {
            Err(Error::Frozen(self.name().to_owned()))
        } else {
            Ok(())
        }
    }

    /// Names and descriptors of every method declared in the class
    pub fn methods(&self) -> Vec<(&str, &str)> {
        let constants = &self.class_file.constants;
        self.class_file
            .methods
            .iter()
            .filter_map(|method| {
                let name = constants.utf8(method.name_index)?;
                let descriptor = constants.utf8(method.descriptor_index)?;
                Some((name, descriptor))
            })
            .collect()
    }

    /// Find a method to edit
    ///
    /// Without a descriptor, the first method with a matching name is picked.
    pub fn behavior(&mut self, name: &str, descriptor: Option<&str>) -> Result<Behavior<'_>, Error> {
        let constants = &self.class_file.constants;
        let index = self.class_file.methods.iter().position(|method| {
            constants.utf8(method.name_index) == Some(name)
                && descriptor.map_or(true, |descriptor| {
                    constants.utf8(method.descriptor_index) == Some(descriptor)
                })
        });
        let index = match index {
            Some(index) => index,
            None => {
                let method = match descriptor {
                    Some(descriptor) => format!("{}.{}:{}", self.name(), name, descriptor),
                    None => format!("{}.{}", self.name(), name),
                };
                return Err(Error::NoSuchMethod(method));
            }
        };

        let descriptor = constants
            .utf8(self.class_file.methods[index].descriptor_index)
            .ok_or_else(|| Error::TypeResolution(format!("descriptor of {}", name)))?;
        let descriptor = MethodDescriptor::parse(descriptor)
            .map_err(|err| Error::TypeResolution(format!("{}: {}", descriptor, err)))?;

        debug!("editing {}.{}", self.name(), name);
        Ok(Behavior::new(self, index, descriptor))
    }

    /// Serialize the class, freezing it
    pub fn to_bytes(&mut self) -> Result<Vec<u8>, Error> {
        let bytes = self.class_file.to_bytes()?;
        self.freeze();
        Ok(bytes)
    }

    /// Write the class out to disk, freezing it
    pub fn save_to_path<P: AsRef<Path>>(
        &mut self,
        path: P,
        create_missing_directories: bool,
    ) -> Result<(), Error> {
        self.class_file
            .save_to_path(path, create_missing_directories)
            .map_err(crate::jvm::Error::IoError)?;
        self.freeze();
        Ok(())
    }
}
