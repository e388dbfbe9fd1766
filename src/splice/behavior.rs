use super::fragment::{self, place, Fragment};
use super::{Binding, Bindings, EditableClass, Error};
use crate::jvm;
use crate::jvm::class_file::{
    Attribute, AttributeLike, Code, CodeAttribute, ExceptionHandler, LocalVariable, Method,
};
use crate::jvm::code::opcodes::{instruction_width, is_return, ATHROW, JSR, JSR_W};
use crate::jvm::code::{insert_gap, BytecodeBuilder, Gap, GapMode};
use crate::jvm::{
    BinaryName, FieldType, MethodAccessFlags, MethodDescriptor, Name, ParseDescriptor, ValueKind,
};
use crate::util::Width;
use log::{debug, warn};

/// Method or constructor being edited
///
/// Every edit is atomic: the method is only updated once the snippet has compiled and the new code
/// has been laid out, so a failed edit leaves the class exactly as it was.
pub struct Behavior<'a> {
    class: &'a mut EditableClass,
    index: usize,
    descriptor: MethodDescriptor,
}

impl<'a> Behavior<'a> {
    pub(super) fn new(
        class: &'a mut EditableClass,
        index: usize,
        descriptor: MethodDescriptor,
    ) -> Behavior<'a> {
        Behavior {
            class,
            index,
            descriptor,
        }
    }

    fn method(&self) -> &Method {
        &self.class.class_file.methods[self.index]
    }

    pub fn name(&self) -> &str {
        self.class
            .class_file
            .constants
            .utf8(self.method().name_index)
            .unwrap_or("<unnamed>")
    }

    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }

    pub fn is_static(&self) -> bool {
        self.method().access_flags.contains(MethodAccessFlags::STATIC)
    }

    /// Width of the receiver and parameters in local slots
    fn parameter_width(&self) -> u16 {
        self.descriptor.parameter_length(!self.is_static()) as u16
    }

    /// Decoded copy of the method body
    pub fn code(&self) -> Result<Code, Error> {
        let constants = &self.class.class_file.constants;
        let attribute = self
            .method()
            .attribute(Code::NAME, constants)
            .ok_or(Error::NoMethodBody)?;
        Ok(Code::parse(&attribute.info, constants)?)
    }

    /// Raw contents of a method attribute
    pub fn attribute(&self, name: &str) -> Option<&[u8]> {
        self.method()
            .attribute(name, &self.class.class_file.constants)
            .map(|attribute| attribute.info.as_slice())
    }

    /// Add or replace a raw method attribute
    pub fn set_attribute(&mut self, name: &str, info: Vec<u8>) -> Result<(), Error> {
        self.with_rollback(|behavior| {
            let class_file = &mut behavior.class.class_file;
            let name_index = class_file.constants.get_utf8(name)?;
            let method = &mut class_file.methods[behavior.index];
            match method.attribute_mut(name, &class_file.constants) {
                Some(attribute) => attribute.info = info,
                None => method.attributes.push(Attribute { name_index, info }),
            }
            Ok(())
        })
    }

    /// Run a change to the method, undoing any change to the class if it fails
    fn with_rollback<T>(
        &mut self,
        change: impl FnOnce(&mut Behavior<'a>) -> Result<T, Error>,
    ) -> Result<T, Error> {
        self.class.check_modify()?;
        let constants = self.class.class_file.constants.clone();
        let method = self.method().clone();
        let result = change(self);
        if result.is_err() {
            let class_file = &mut self.class.class_file;
            class_file.constants = constants;
            class_file.methods[self.index] = method;
        }
        result
    }

    /// Edit a decoded copy of the method body, writing it back if the edit succeeds
    fn edit<T>(
        &mut self,
        change: impl FnOnce(&mut Behavior<'a>, &mut Code) -> Result<T, Error>,
    ) -> Result<T, Error> {
        self.with_rollback(|behavior| {
            let mut code = behavior.code()?;
            let bytecode_changed = code.code.clone();
            let value = change(behavior, &mut code)?;
            let bytecode_changed = bytecode_changed != code.code;
            behavior.commit(code, bytecode_changed)?;
            Ok(value)
        })
    }

    /// Write a method body back into the `Code` attribute
    fn commit(&mut self, mut code: Code, bytecode_changed: bool) -> Result<(), Error> {
        let has_stack_map = code
            .attributes
            .iter()
            .any(|attribute| matches!(attribute, CodeAttribute::StackMapTable(_)));
        if bytecode_changed && has_stack_map {
            if self.class.settings.drop_stale_stack_maps {
                code.remove_stack_map_table();
                warn!(
                    "dropped the StackMapTable of {}.{}, frames must be recomputed",
                    self.class.name(),
                    self.name()
                );
            } else {
                warn!(
                    "StackMapTable of {}.{} no longer matches its code",
                    self.class.name(),
                    self.name()
                );
            }
        }

        let class_file = &mut self.class.class_file;
        let attribute = class_file.constants.get_attribute(&code)?;
        let method = &mut class_file.methods[self.index];
        match method.attribute_mut(Code::NAME, &class_file.constants) {
            Some(existing) => *existing = attribute,
            None => method.attributes.push(attribute),
        }
        Ok(())
    }

    fn compile(&mut self, source: &str, bindings: &Bindings) -> Result<Fragment, Error> {
        let class = &mut *self.class;
        let fragment = class
            .compiler
            .compile(source, bindings, &mut class.class_file.constants)?;
        debug!(
            "compiled {} bytes for {}.{}",
            fragment.len(),
            self.class.name(),
            self.name()
        );
        Ok(fragment)
    }

    /// Receiver (for instance methods) followed by declared parameters
    fn parameter_bindings(&self) -> Vec<Binding> {
        let settings = &self.class.settings;
        let mut bindings = vec![];
        let mut slot = 0;
        if !self.is_static() {
            let this_class = BinaryName::from_string(self.class.name().to_owned())
                .unwrap_or(BinaryName::OBJECT);
            bindings.push(Binding::new(
                settings.parameter_binding_name(0),
                0,
                Some(FieldType::object(this_class)),
            ));
            slot = 1;
        }
        for (position, parameter) in self.descriptor.parameters.iter().enumerate() {
            bindings.push(Binding::new(
                settings.parameter_binding_name(position + 1),
                slot,
                Some(parameter.clone()),
            ));
            slot += parameter.width() as u16;
        }
        bindings
    }

    /// Named locals live at `offset`, ignoring any in slots at or above `below`
    fn local_bindings(&self, code: &Code, offset: usize, below: Option<u16>) -> Vec<Binding> {
        let constants = &self.class.class_file.constants;
        code.local_variables()
            .filter(|local| local.is_live_at(offset))
            .filter(|local| below.map_or(true, |below| local.index < below))
            .filter_map(|local| {
                let name = constants.utf8(local.name_index)?;
                let descriptor = constants.utf8(local.descriptor_index)?;
                let field_type = FieldType::parse(descriptor).ok()?;
                Some(Binding::new(name, local.index, Some(field_type)))
            })
            .collect()
    }

    /// Run a snippet at the start of the method
    ///
    /// Jumps back to the first instruction (eg. loops at the very start of the method) skip the
    /// snippet, so it runs exactly once per call.
    pub fn insert_before(&mut self, source: &str) -> Result<(), Error> {
        self.edit(|behavior, code| {
            let bindings = Bindings {
                parameters: behavior.parameter_bindings(),
                locals: behavior.local_bindings(code, 0, None),
                first_free_slot: behavior.parameter_width(),
                ..Bindings::default()
            };
            let fragment = behavior.compile(source, &bindings)?;
            place(code, 0, &fragment, GapMode::Exclusive)?;
            debug!("inserted {} bytes before {}", fragment.len(), behavior.name());
            Ok(())
        })
    }

    /// Run a snippet whenever the method returns
    ///
    /// The snippet is compiled once into a subroutine appended to the method, and every return
    /// calls it (with `jsr`) just before returning. The value about to be returned is bound to the
    /// return value binding and the snippet may change it.
    ///
    /// With `as_finally`, the subroutine also runs when an exception escapes the original body,
    /// after which the exception is rethrown. In that case the return value binding holds the
    /// zero value (or `null`) and the snippet only sees parameters, since no other local is known
    /// to be initialized.
    pub fn insert_after(&mut self, source: &str, as_finally: bool) -> Result<(), Error> {
        self.edit(|behavior, code| {
            let return_type = behavior.descriptor.return_type.clone();
            let return_kind = return_type.as_ref().map(FieldType::kind);
            let result_width = return_type.as_ref().map_or(1, |typ| typ.width()) as u16;

            let return_address_slot = code.max_locals;
            let result_slot = next_slot(return_address_slot, 1)?;
            let exception_slot = next_slot(result_slot, result_width)?;
            let first_free_slot = if as_finally {
                next_slot(exception_slot, 1)?
            } else {
                exception_slot
            };

            let parameter_width = behavior.parameter_width();
            let bindings = Bindings {
                parameters: behavior.parameter_bindings(),
                locals: behavior.local_bindings(
                    code,
                    0,
                    if as_finally { Some(parameter_width) } else { None },
                ),
                return_value: Some(Binding::new(
                    behavior.class.settings.return_value_binding_name.clone(),
                    result_slot,
                    return_type.clone(),
                )),
                caught: None,
                first_free_slot,
                initial_stack_depth: code.max_stack,
            };
            let fragment = behavior.compile(source, &bindings)?;

            // Stub for exceptional exits followed by the subroutine itself
            let mut block = BytecodeBuilder::new();
            if as_finally {
                let kind = return_kind.unwrap_or(ValueKind::Reference);
                block.push_store(ValueKind::Reference, exception_slot);
                block.push_zero(kind);
                block.push_store(kind, result_slot);
                let call = block.push_jump_placeholder(JSR);
                block.push_load(ValueKind::Reference, exception_slot);
                block.push_opcode(ATHROW);
                let target = block.current_offset();
                block.patch_jump(call, target)?;
            }
            let subroutine_offset = block.current_offset();
            block.push_store(ValueKind::Reference, return_address_slot);
            block.append_code(&Code::from(fragment))?;
            block.push_ret(return_address_slot);
            block.require_stack(code.max_stack.saturating_add(1).max(2));
            let block = Fragment::from(block.into_code()?);

            let mut body_end = code.code.len();
            let block_start = fragment::append(code, &block)?;
            let mut subroutine = block_start + subroutine_offset;
            if as_finally && body_end > 0 {
                code.exception_table.push(ExceptionHandler {
                    start_pc: 0,
                    end_pc: body_end as u16,
                    handler_pc: block_start as u16,
                    catch_type: None,
                });
            }

            let (save, restore) = save_and_restore(return_kind, result_slot)?;
            let mut offset = 0;
            let mut sites = 0;
            while offset < body_end {
                if is_return(code.code[offset]) {
                    let gap = call_subroutine(code, offset, subroutine, &save, &restore)?;
                    subroutine = gap.map(subroutine)?;
                    body_end = gap.map(body_end)?;
                    offset = gap.position + gap.length;
                    sites += 1;
                }
                offset += instruction_width(&code.code, offset)?;
            }
            code.max_locals = code.max_locals.max(first_free_slot);

            debug!(
                "{}: {} return sites call the epilogue at {}{}",
                behavior.name(),
                sites,
                subroutine,
                if as_finally { " (also on exceptions)" } else { "" }
            );
            let version = behavior.class.class_file.version;
            if version.requires_stack_map_frames() {
                warn!(
                    "{}.{} now calls subroutines, which class files of version {}.{} may not use",
                    behavior.class.name(),
                    behavior.name(),
                    version.major_version,
                    version.minor_version
                );
            }
            Ok(())
        })
    }

    /// Find the line a snippet inserted at `line` would actually run at
    ///
    /// This is the first line at or after `line` for which there is code. If there is none, it
    /// is the closest line before `line`.
    pub fn resolve_line(&self, line: u16) -> Result<u16, Error> {
        self.locate_line(line).map(|(line, _)| line)
    }

    fn locate_line(&self, line: u16) -> Result<(u16, usize), Error> {
        let code = self.code()?;
        nearest_line(&code, line).ok_or(Error::NoLineNumberInfo)
    }

    /// Run a snippet at the start of a source line, returning the line actually used
    ///
    /// The snippet sees the named locals live at that point. Jumps to the start of the line run
    /// the snippet too. Without `modify`, this only resolves the line (see
    /// [`Behavior::resolve_line`]).
    pub fn insert_at(&mut self, line: u16, modify: bool, source: &str) -> Result<u16, Error> {
        let (resolved, offset) = self.locate_line(line)?;
        if !modify {
            return Ok(resolved);
        }
        self.edit(|behavior, code| {
            let bindings = Bindings {
                parameters: behavior.parameter_bindings(),
                locals: behavior.local_bindings(code, offset, None),
                first_free_slot: code.max_locals,
                ..Bindings::default()
            };
            let fragment = behavior.compile(source, &bindings)?;
            let start = place(code, offset, &fragment, GapMode::Inclusive)?;
            debug!(
                "inserted {} bytes at line {} (offset {}) of {}",
                fragment.len(),
                resolved,
                start,
                behavior.name()
            );
            Ok(())
        })?;
        Ok(resolved)
    }

    /// Catch exceptions of some type escaping the body, handling them with a snippet
    ///
    /// The caught exception is bound to `name` (or the default exception binding). The snippet
    /// must leave the method itself, by returning or throwing.
    pub fn add_catch(
        &mut self,
        source: &str,
        exception_type: &str,
        name: Option<&str>,
    ) -> Result<(), Error> {
        self.edit(|behavior, code| {
            let exception_class =
                BinaryName::from_source_name(exception_type).map_err(Error::TypeResolution)?;
            let catch_type = behavior
                .class
                .class_file
                .constants
                .get_class(exception_class.as_str().to_owned())?;

            let exception_slot = code.max_locals;
            let name = match name {
                Some(name) => name.to_owned(),
                None => behavior.class.settings.exception_binding_name.clone(),
            };
            let bindings = Bindings {
                parameters: behavior.parameter_bindings(),
                caught: Some(Binding::new(
                    name,
                    exception_slot,
                    Some(FieldType::object(exception_class)),
                )),
                first_free_slot: next_slot(exception_slot, 1)?,
                ..Bindings::default()
            };
            let fragment = behavior.compile(source, &bindings)?;

            let mut block = BytecodeBuilder::new();
            block.push_store(ValueKind::Reference, exception_slot);
            block.append_code(&Code::from(fragment))?;
            block.require_stack(1);
            let block = Fragment::from(block.into_code()?);

            let body_end = code.code.len();
            let handler = fragment::append(code, &block)?;
            code.exception_table.push(ExceptionHandler {
                start_pc: 0,
                end_pc: body_end as u16,
                handler_pc: handler as u16,
                catch_type: Some(catch_type),
            });
            debug!(
                "{}: catching {} with a handler at {}",
                behavior.name(),
                exception_type,
                handler
            );
            Ok(())
        })
    }

    /// Declare a new local variable spanning the whole body, returning its slot
    ///
    /// Later snippets can refer to the variable by name.
    pub fn add_local_variable(&mut self, name: &str, descriptor: &str) -> Result<u16, Error> {
        self.edit(|behavior, code| {
            let field_type = FieldType::parse(descriptor)
                .map_err(|err| Error::TypeResolution(format!("{}: {}", descriptor, err)))?;
            let slot = code.max_locals;
            let width = field_type.width() as u16;

            let constants = &mut behavior.class.class_file.constants;
            let name_index = constants.get_utf8(name.to_owned())?;
            let descriptor_index = constants.get_utf8(descriptor.to_owned())?;
            let length = code.code.len() as u16;
            code.local_variable_table_mut(constants)?
                .entries
                .push(LocalVariable {
                    start_pc: 0,
                    length,
                    name_index,
                    descriptor_index,
                    index: slot,
                });
            code.max_locals = next_slot(slot, width)?;
            debug!("{}: local `{}` in slot {}", behavior.name(), name, slot);
            Ok(slot)
        })
    }

    /// Replace the body of the method with a snippet
    ///
    /// Abstract and native methods get a body and stop being abstract or native.
    pub fn set_body(&mut self, source: &str) -> Result<(), Error> {
        self.with_rollback(|behavior| {
            let parameter_width = behavior.parameter_width();
            let bindings = Bindings {
                parameters: behavior.parameter_bindings(),
                first_free_slot: parameter_width,
                ..Bindings::default()
            };
            let fragment = behavior.compile(source, &bindings)?;
            let mut code = Code::from(fragment);
            code.max_locals = code.max_locals.max(parameter_width);
            behavior.commit(code, false)?;

            let method = &mut behavior.class.class_file.methods[behavior.index];
            method
                .access_flags
                .remove(MethodAccessFlags::ABSTRACT | MethodAccessFlags::NATIVE);
            Ok(())
        })
    }
}

/// Slot just after a value of some width stored at `slot`
fn next_slot(slot: u16, width: u16) -> Result<u16, Error> {
    slot.checked_add(width)
        .ok_or(Error::Bytecode(jvm::Error::MethodCodeMaxLocalsOverflow(
            slot as usize + width as usize,
        )))
}

/// Line table entry closest to a requested line, along with its start offset
///
/// Prefers the nearest line at or after the request, then the nearest line before it. On a tie,
/// the first entry wins.
fn nearest_line(code: &Code, line: u16) -> Option<(u16, usize)> {
    let mut best: Option<(i32, u16, usize)> = None;
    for entry in code.line_numbers() {
        let distance = entry.line_number as i32 - line as i32;
        let better = match best {
            None => true,
            Some((best_distance, _, _)) => {
                (distance < 0 && distance > best_distance)
                    || (distance >= 0 && (distance < best_distance || best_distance < 0))
            }
        };
        if better {
            best = Some((distance, entry.line_number, entry.start_pc as usize));
        }
    }
    best.map(|(_, line, offset)| (line, offset))
}

/// Code to stash the value about to be returned, and to put it back on the stack
fn save_and_restore(
    return_kind: Option<ValueKind>,
    result_slot: u16,
) -> Result<(Vec<u8>, Vec<u8>), Error> {
    let mut save = BytecodeBuilder::new();
    let mut restore = BytecodeBuilder::new();
    match return_kind {
        Some(kind) => {
            save.push_store(kind, result_slot);
            restore.push_load(kind, result_slot);
        }
        None => {
            save.push_zero(ValueKind::Reference);
            save.push_store(ValueKind::Reference, result_slot);
        }
    }
    Ok((save.into_code()?.code, restore.into_code()?.code))
}

/// Call the subroutine from just before the return instruction at `site`
///
/// Jumps to the return now land on the call sequence. A `jsr_w` is used when the subroutine is
/// too far away for a `jsr`.
fn call_subroutine(
    code: &mut Code,
    site: usize,
    subroutine: usize,
    save: &[u8],
    restore: &[u8],
) -> Result<Gap, Error> {
    let narrow_length = save.len() + 3 + restore.len();
    let mut wide = subroutine - site + narrow_length + 4 > i16::MAX as usize;
    loop {
        let call_length = if wide { 5 } else { 3 };
        let mut staged = code.clone();
        let gap = insert_gap(
            &mut staged,
            site,
            save.len() + call_length + restore.len(),
            GapMode::Inclusive,
        )?;
        let call = gap.position + save.len();
        let relative = gap.map(subroutine)? as isize - call as isize;

        let mut sequence = save.to_vec();
        if wide {
            sequence.push(JSR_W);
            sequence.extend_from_slice(&(relative as i32).to_be_bytes());
        } else {
            match i16::try_from(relative) {
                Ok(relative) => {
                    sequence.push(JSR);
                    sequence.extend_from_slice(&relative.to_be_bytes());
                }
                Err(_) => {
                    wide = true;
                    continue;
                }
            }
        }
        sequence.extend_from_slice(restore);

        staged.code[gap.position..gap.position + sequence.len()].copy_from_slice(&sequence);
        *code = staged;
        return Ok(gap);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::{
        ClassFile, ConstantsPool, LineNumber, LineNumberTable, Utf8ConstantIndex, Version,
    };
    use crate::jvm::code::opcodes::*;
    use crate::jvm::{ClassAccessFlags, RenderDescriptor};
    use crate::splice::{CompileError, Settings};

    /// Class `Sample` with one method whose body is `code`
    fn sample(
        access_flags: MethodAccessFlags,
        descriptor: &str,
        code: Option<Code>,
    ) -> EditableClass {
        let mut constants = ConstantsPool::new();
        let this_class = constants.get_class("Sample").unwrap();
        let super_class = constants.get_class("java/lang/Object").unwrap();
        let name_index = constants.get_utf8("run").unwrap();
        let descriptor_index = constants.get_utf8(descriptor.to_owned()).unwrap();
        let attributes = match code {
            Some(code) => vec![constants.get_attribute(&code).unwrap()],
            None => vec![],
        };
        let class_file = ClassFile {
            version: Version::JAVA6,
            constants,
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            this_class,
            super_class: Some(super_class),
            interfaces: vec![],
            fields: vec![],
            methods: vec![Method {
                access_flags,
                name_index,
                descriptor_index,
                attributes,
            }],
            attributes: vec![],
        };
        EditableClass::new(class_file, Settings::new())
    }

    fn with_lines(mut code: Code, name_index: Utf8ConstantIndex, lines: &[(u16, u16)]) -> Code {
        code.attributes.push(CodeAttribute::LineNumberTable(LineNumberTable {
            name_index,
            entries: lines
                .iter()
                .map(|&(start_pc, line_number)| LineNumber {
                    start_pc,
                    line_number,
                })
                .collect(),
        }));
        code
    }

    #[test]
    fn before_binds_parameters() {
        // static int run(int) { return $1; }
        let code = Code::new(1, 1, vec![ILOAD_0, IRETURN]);
        let mut class = sample(MethodAccessFlags::STATIC, "(I)I", Some(code));
        let mut method = class.behavior("run", None).unwrap();
        method.insert_before("iinc $1 5").unwrap();

        let code = method.code().unwrap();
        assert_eq!(code.code, vec![IINC, 0, 5, ILOAD_0, IRETURN]);
        assert_eq!((code.max_stack, code.max_locals), (1, 1));
    }

    #[test]
    fn after_calls_subroutine() {
        // int run() { return 7; }
        let code = Code::new(1, 1, vec![BIPUSH, 7, IRETURN]);
        let mut class = sample(MethodAccessFlags::empty(), "()I", Some(code));
        let mut method = class.behavior("run", None).unwrap();
        method.insert_after("iinc $_ 1", false).unwrap();

        // bipush 7; istore_2; jsr +5; iload_2; ireturn; astore_1; iinc 2 1; ret 1
        let code = method.code().unwrap();
        assert_eq!(
            code.code,
            vec![
                BIPUSH,
                7,
                ISTORE_0 + 2,
                JSR,
                0,
                5,
                ILOAD_0 + 2,
                IRETURN,
                ASTORE_0 + 1,
                IINC,
                2,
                1,
                RET,
                1
            ]
        );
        assert_eq!(code.max_locals, 3);
        assert_eq!(code.max_stack, 2);
        assert!(code.exception_table.is_empty());
    }

    #[test]
    fn finally_covers_body() {
        // void run() { return; }
        let code = Code::new(0, 1, vec![RETURN]);
        let mut class = sample(MethodAccessFlags::empty(), "()V", Some(code));
        let mut method = class.behavior("run", None).unwrap();
        method.insert_after("nop", true).unwrap();

        let code = method.code().unwrap();
        assert_eq!(
            code.code,
            vec![
                // aconst_null; astore_2; jsr; return
                ACONST_NULL, ASTORE_0 + 2, JSR, 0, 12, RETURN,
                // astore_3; aconst_null; astore_2; jsr; aload_3; athrow
                ASTORE_3, ACONST_NULL, ASTORE_0 + 2, JSR, 0, 5, ALOAD_3, ATHROW,
                // astore_1; nop; ret 1
                ASTORE_0 + 1, NOP, RET, 1,
            ]
        );
        assert_eq!(
            code.exception_table,
            vec![ExceptionHandler {
                start_pc: 0,
                end_pc: 6,
                handler_pc: 6,
                catch_type: None,
            }]
        );
        assert_eq!(code.max_locals, 4);
    }

    #[test]
    fn line_resolution() {
        let mut constants = ConstantsPool::new();
        let table_name = constants.get_utf8(LineNumberTable::NAME).unwrap();
        let code = with_lines(
            Code::new(1, 1, vec![ICONST_0, POP, ICONST_1, POP, RETURN]),
            table_name,
            &[(0, 10), (2, 12), (4, 13)],
        );
        assert_eq!(nearest_line(&code, 11), Some((12, 2)));
        assert_eq!(nearest_line(&code, 12), Some((12, 2)));
        assert_eq!(nearest_line(&code, 9), Some((10, 0)));
        assert_eq!(nearest_line(&code, 20), Some((13, 4)));
        assert_eq!(nearest_line(&Code::new(0, 0, vec![RETURN]), 1), None);
    }

    #[test]
    fn failed_edit_leaves_class_untouched() {
        let code = Code::new(1, 1, vec![ILOAD_0, IRETURN]);
        let mut class = sample(MethodAccessFlags::STATIC, "(I)I", Some(code));
        let before = class.class_file().to_bytes().unwrap();

        let mut method = class.behavior("run", None).unwrap();
        let source = "ldc \"new constant\"\ninvokestatic Missing.call:(Ljava/lang/String;)V\npop";
        assert!(matches!(
            method.insert_before(source),
            Err(Error::Compile(CompileError::StackUnderflow { .. }))
        ));
        assert!(matches!(
            method.insert_at(3, true, "nop"),
            Err(Error::NoLineNumberInfo)
        ));
        assert_eq!(class.class_file().to_bytes().unwrap(), before);
    }

    #[test]
    fn frozen_class_rejects_edits() {
        let code = Code::new(0, 0, vec![RETURN]);
        let mut class = sample(MethodAccessFlags::STATIC, "()V", Some(code));
        let bytes = class.to_bytes().unwrap();
        assert!(class.is_frozen());

        let mut method = class.behavior("run", None).unwrap();
        assert!(matches!(method.insert_before("nop"), Err(Error::Frozen(_))));
        assert!(matches!(method.set_body("return"), Err(Error::Frozen(_))));
        assert_eq!(class.class_file().to_bytes().unwrap(), bytes);

        class.defrost();
        class
            .behavior("run", None)
            .unwrap()
            .insert_before("nop")
            .unwrap();
    }

    #[test]
    fn locals_and_bodies() {
        let mut class = sample(
            MethodAccessFlags::STATIC | MethodAccessFlags::NATIVE,
            "(J)J",
            None,
        );
        let mut method = class.behavior("run", Some("(J)J")).unwrap();
        assert!(matches!(method.insert_before("nop"), Err(Error::NoMethodBody)));

        method.set_body("lload $1\nlreturn").unwrap();
        assert!(!method
            .method()
            .access_flags
            .contains(MethodAccessFlags::NATIVE));
        assert_eq!(method.code().unwrap().max_locals, 2);

        let slot = method.add_local_variable("total", "J").unwrap();
        assert_eq!(slot, 2);
        let code = method.code().unwrap();
        assert_eq!(code.max_locals, 4);
        let local = code.local_variables().next().unwrap();
        assert_eq!((local.start_pc, local.length, local.index), (0, 2, 2));

        method.insert_before("lload $1\nlstore total").unwrap();
        assert_eq!(
            method.code().unwrap().code,
            vec![LLOAD_0, LSTORE_0 + 2, LLOAD_0, LRETURN]
        );

        assert!(matches!(
            method.add_local_variable("bad", "Q"),
            Err(Error::TypeResolution(_))
        ));
        let descriptor = method.descriptor().render();
        assert_eq!(descriptor, "(J)J");
    }

    #[test]
    fn catch_appends_handler() {
        let code = Code::new(0, 0, vec![RETURN]);
        let mut class = sample(MethodAccessFlags::STATIC, "()V", Some(code));
        let mut method = class.behavior("run", None).unwrap();
        method
            .add_catch("aload ex\nathrow", "java.io.IOException", Some("ex"))
            .unwrap();

        let code = method.code().unwrap();
        assert_eq!(code.code, vec![RETURN, ASTORE_0, ALOAD_0, ATHROW]);
        assert_eq!(code.exception_table.len(), 1);
        let row = code.exception_table[0];
        assert_eq!((row.start_pc, row.end_pc, row.handler_pc), (0, 1, 1));
        let catch_type = row.catch_type.unwrap();
        assert_eq!(
            class.class_file().constants.class_name(catch_type),
            Some("java/io/IOException")
        );
    }

    #[test]
    fn attributes_and_lookup() {
        let code = Code::new(0, 0, vec![RETURN]);
        let mut class = sample(MethodAccessFlags::STATIC, "()V", Some(code));
        assert!(matches!(
            class.behavior("run", Some("(I)V")),
            Err(Error::NoSuchMethod(_))
        ));
        assert!(matches!(
            class.behavior("walk", None),
            Err(Error::NoSuchMethod(_))
        ));

        let mut method = class.behavior("run", Some("()V")).unwrap();
        assert_eq!(method.attribute("Custom"), None);
        method.set_attribute("Custom", vec![1, 2, 3]).unwrap();
        method.set_attribute("Custom", vec![4]).unwrap();
        assert_eq!(method.attribute("Custom"), Some(&[4][..]));
        assert_eq!(method.method().attributes.len(), 2);
    }

    #[test]
    fn epilogues_in_wide_slots() {
        // static void run() { return; } with 300 locals
        let code = Code::new(0, 300, vec![RETURN]);
        let mut class = sample(MethodAccessFlags::STATIC, "()V", Some(code));
        let mut method = class.behavior("run", None).unwrap();
        method.insert_after("nop", true).unwrap();
        method.insert_after("nop", true).unwrap();
        method.insert_before("nop").unwrap();

        let code = method.code().unwrap();
        assert_eq!(code.code[0], NOP);
        assert_eq!(code.max_locals, 306);

        // Both subroutines return through `wide ret` in slots 300 and 303
        let starts = instruction_starts(&code.code).unwrap();
        let rets: Vec<u16> = starts
            .iter()
            .filter(|&&start| code.code[start] == WIDE && code.code[start + 1] == RET)
            .map(|&start| u16::from_be_bytes([code.code[start + 2], code.code[start + 3]]))
            .collect();
        assert_eq!(rets.len(), 2);
        assert!(rets.contains(&300) && rets.contains(&303));

        assert_eq!(code.exception_table.len(), 2);
        for row in &code.exception_table {
            assert_eq!(row.start_pc, 1);
            assert_eq!(row.end_pc, row.handler_pc);
            assert!(row.catch_type.is_none());
            assert!(starts.contains(&(row.handler_pc as usize)));
        }
        assert!(code.exception_table[0].end_pc < code.exception_table[1].end_pc);
    }

    #[test]
    fn subroutines_in_verified_classes() {
        let code = Code::new(0, 0, vec![RETURN]);
        let mut class = sample(MethodAccessFlags::STATIC, "()V", Some(code));
        class.class_file.version = Version {
            minor_version: 0,
            major_version: 52,
        };
        let mut method = class.behavior("run", None).unwrap();
        method.insert_after("nop", false).unwrap();

        // aconst_null; astore_1; jsr +4; return; astore_0; nop; ret 0
        let code = method.code().unwrap();
        assert_eq!(
            code.code,
            vec![ACONST_NULL, ASTORE_0 + 1, JSR, 0, 4, RETURN, ASTORE_0, NOP, RET, 0]
        );
        assert!(class.class_file().version.requires_stack_map_frames());
    }
}
