mod common;

use common::{run, ClassBuilder, Outcome, Run, Value};
use jarsplice::jvm::class_file::{Code, CodeAttribute, Version};
use jarsplice::jvm::code::opcodes::*;
use jarsplice::jvm::MethodAccessFlags;
use jarsplice::splice::{CompileError, EditableClass, Error, Settings};

fn returned(value: i32, effects: &[i32]) -> Run {
    Run {
        outcome: Outcome::Returned(Some(Value::Int(value))),
        effects: effects.to_vec(),
    }
}

fn threw(effects: &[i32]) -> Run {
    Run {
        outcome: Outcome::Threw("java/lang/RuntimeException"),
        effects: effects.to_vec(),
    }
}

/// `static int count(int n) { while (n > 0) n--; return n; }` with lines 10, 11, 12
fn counting() -> ClassBuilder {
    let code = Code::new(
        1,
        1,
        vec![
            ILOAD_0, IFLE, 0, 9, // 0: line 10
            IINC, 0, 0xff, // 4: line 11
            GOTO, 0xff, 0xf9, // 7
            ILOAD_0, IRETURN, // 10: line 12
        ],
    );
    let mut builder = ClassBuilder::new("Counting");
    builder.method("count", "(I)I", code, &[(0, 10), (4, 11), (10, 12)], &[]);
    builder
}

/// `static int pick(int n) { if (n != 0) return 1; return 2; }`
fn picking() -> ClassBuilder {
    let code = Code::new(
        1,
        1,
        vec![ILOAD_0, IFEQ, 0, 5, ICONST_1, IRETURN, ICONST_2, IRETURN],
    );
    let mut builder = ClassBuilder::new("Picking");
    builder.method("pick", "(I)I", code, &[], &[]);
    builder
}

/// `static int risky(int n) { if (n != 0) Log.fail(); return 5; }`
fn risky() -> ClassBuilder {
    let mut builder = ClassBuilder::new("Risky");
    let fail = builder.fail();
    let code = Code::new(
        1,
        1,
        vec![
            ILOAD_0,
            IFEQ,
            0,
            6,
            INVOKESTATIC,
            fail[0],
            fail[1],
            ICONST_5,
            IRETURN,
        ],
    );
    builder.method("risky", "(I)I", code, &[(0, 1), (7, 2)], &[]);
    builder
}

/// `static int sum(int n) { int total = 0; total = n + total; return total; }`
fn summing() -> ClassBuilder {
    let code = Code::new(
        2,
        2,
        vec![
            ICONST_0,
            ISTORE_0 + 1,
            ILOAD_0, // line 21
            ILOAD_0 + 1,
            IADD,
            ISTORE_0 + 1,
            ILOAD_0 + 1, // line 22
            IRETURN,
        ],
    );
    let mut builder = ClassBuilder::new("Summing");
    builder.method(
        "sum",
        "(I)I",
        code,
        &[(0, 20), (2, 21), (6, 22)],
        &[(2, 6, "total", "I", 1)],
    );
    builder
}

const RECORD: &str = "invokestatic Log.record:(I)V";

#[test]
fn unedited_class_round_trips() {
    for builder in [counting(), picking(), risky(), summing()] {
        let bytes = builder.build();
        let mut class = EditableClass::parse(&bytes, Settings::new()).unwrap();
        assert_eq!(class.to_bytes().unwrap(), bytes);
    }
}

#[test]
fn before_runs_once_per_call() {
    let mut class = counting().editable();
    class
        .behavior("count", None)
        .unwrap()
        .insert_before(&format!("bipush 42\n{}", RECORD))
        .unwrap();
    let bytes = class.to_bytes().unwrap();

    // The loop jumps back to the original first instruction, not to the snippet
    assert_eq!(run(&bytes, "count", &[3]), returned(0, &[42]));
    assert_eq!(run(&bytes, "count", &[0]), returned(0, &[42]));
}

#[test]
fn at_line_runs_on_jumps_to_the_line() {
    let mut class = counting().editable();
    let line = class
        .behavior("count", None)
        .unwrap()
        .insert_at(10, true, &format!("bipush 7; {}", RECORD))
        .unwrap();
    assert_eq!(line, 10);
    let bytes = class.to_bytes().unwrap();

    // Loop head is evaluated for n = 2, 1, 0
    assert_eq!(run(&bytes, "count", &[2]), returned(0, &[7, 7, 7]));
}

#[test]
fn line_resolution_is_a_dry_run() {
    let builder = counting();
    let mut class = builder.editable();
    let mut method = class.behavior("count", None).unwrap();
    assert_eq!(method.resolve_line(9).unwrap(), 10);
    assert_eq!(method.resolve_line(11).unwrap(), 11);
    assert_eq!(method.resolve_line(50).unwrap(), 12);
    assert_eq!(method.insert_at(9, false, "this does not compile").unwrap(), 10);
    assert_eq!(class.to_bytes().unwrap(), builder.build());

    // Dry runs work even on frozen classes
    let mut method = class.behavior("count", None).unwrap();
    assert_eq!(method.insert_at(11, false, "").unwrap(), 11);

    let mut class = picking().editable();
    let mut method = class.behavior("pick", None).unwrap();
    assert!(matches!(method.resolve_line(1), Err(Error::NoLineNumberInfo)));
    assert!(matches!(
        method.insert_at(1, true, "nop"),
        Err(Error::NoLineNumberInfo)
    ));
}

#[test]
fn after_runs_on_every_return() {
    let mut class = picking().editable();
    class
        .behavior("pick", None)
        .unwrap()
        .insert_after(&format!("load $_\n{}\niinc $_ 10", RECORD), false)
        .unwrap();
    let bytes = class.to_bytes().unwrap();

    assert_eq!(run(&bytes, "pick", &[1]), returned(11, &[1]));
    assert_eq!(run(&bytes, "pick", &[0]), returned(12, &[2]));
}

#[test]
fn after_is_skipped_by_exceptions_unless_finally() {
    let mut class = risky().editable();
    class
        .behavior("risky", None)
        .unwrap()
        .insert_after(&format!("bipush 99\n{}", RECORD), false)
        .unwrap();
    let bytes = class.to_bytes().unwrap();
    assert_eq!(run(&bytes, "risky", &[0]), returned(5, &[99]));
    assert_eq!(run(&bytes, "risky", &[1]), threw(&[]));

    let mut class = risky().editable();
    class
        .behavior("risky", None)
        .unwrap()
        .insert_after(&format!("bipush 99\n{}", RECORD), true)
        .unwrap();
    let bytes = class.to_bytes().unwrap();
    assert_eq!(run(&bytes, "risky", &[0]), returned(5, &[99]));
    assert_eq!(run(&bytes, "risky", &[1]), threw(&[99]));
}

#[test]
fn finally_sees_zero_return_value() {
    let mut class = risky().editable();
    class
        .behavior("risky", None)
        .unwrap()
        .insert_after(&format!("load $_\n{}", RECORD), true)
        .unwrap();
    let bytes = class.to_bytes().unwrap();
    assert_eq!(run(&bytes, "risky", &[0]), returned(5, &[5]));
    assert_eq!(run(&bytes, "risky", &[1]), threw(&[0]));
}

#[test]
fn catch_handles_matching_exceptions() {
    let mut class = risky().editable();
    class
        .behavior("risky", None)
        .unwrap()
        .add_catch("bipush -1\nireturn", "java.lang.RuntimeException", None)
        .unwrap();
    let bytes = class.to_bytes().unwrap();
    assert_eq!(run(&bytes, "risky", &[0]), returned(5, &[]));
    assert_eq!(run(&bytes, "risky", &[1]), returned(-1, &[]));

    let mut class = risky().editable();
    class
        .behavior("risky", None)
        .unwrap()
        .add_catch("aload $e\nathrow", "java.io.IOException", None)
        .unwrap();
    let bytes = class.to_bytes().unwrap();
    assert_eq!(run(&bytes, "risky", &[1]), threw(&[]));
}

#[test]
fn finally_wraps_earlier_handlers() {
    let mut class = risky().editable();
    let mut method = class.behavior("risky", None).unwrap();
    method
        .add_catch(
            "aload failure\npop\nbipush -1\nireturn",
            "java/lang/RuntimeException",
            Some("failure"),
        )
        .unwrap();
    method
        .insert_after(&format!("bipush 99\n{}", RECORD), true)
        .unwrap();
    let bytes = class.to_bytes().unwrap();

    // The return in the handler goes through the epilogue too
    assert_eq!(run(&bytes, "risky", &[0]), returned(5, &[99]));
    assert_eq!(run(&bytes, "risky", &[1]), returned(-1, &[99]));
}

#[test]
fn edits_compose() {
    let mut class = counting().editable();
    let mut method = class.behavior("count", None).unwrap();
    method
        .insert_at(11, true, &format!("load $1\n{}", RECORD))
        .unwrap();
    method
        .insert_after(&format!("bipush 100\n{}", RECORD), false)
        .unwrap();
    method
        .insert_before(&format!("bipush 1\n{}", RECORD))
        .unwrap();
    let bytes = class.to_bytes().unwrap();

    assert_eq!(run(&bytes, "count", &[3]), returned(0, &[1, 3, 2, 1, 100]));
}

#[test]
fn snippets_see_live_locals() {
    let mut class = summing().editable();
    let mut method = class.behavior("sum", None).unwrap();
    method
        .insert_at(22, true, &format!("load total\n{}", RECORD))
        .unwrap();

    // `total` is not in scope yet on the first line
    let before = method.code().unwrap();
    assert!(matches!(
        method.insert_at(20, true, &format!("load total\n{}", RECORD)),
        Err(Error::Compile(CompileError::UnknownBinding(_)))
    ));
    assert_eq!(method.code().unwrap(), before);

    let bytes = class.to_bytes().unwrap();
    assert_eq!(run(&bytes, "sum", &[5]), returned(5, &[5]));
}

#[test]
fn new_locals_are_usable_by_later_snippets() {
    let mut class = picking().editable();
    let mut method = class.behavior("pick", None).unwrap();
    let slot = method.add_local_variable("calls", "I").unwrap();
    assert_eq!(slot, 1);
    method.insert_before("bipush 40\nstore calls").unwrap();
    method
        .insert_after(&format!("load calls\n{}", RECORD), false)
        .unwrap();
    let bytes = class.to_bytes().unwrap();
    assert_eq!(run(&bytes, "pick", &[0]), returned(2, &[40]));
}

#[test]
fn distant_epilogue_uses_wide_calls() {
    let mut body = vec![ILOAD_0, IFNE, 0, 5, ICONST_3, IRETURN];
    body.extend(std::iter::repeat(NOP).take(33_000));
    body.extend_from_slice(&[ICONST_4, IRETURN]);
    let mut builder = ClassBuilder::new("Distant");
    builder.method("far", "(I)I", Code::new(1, 1, body), &[], &[]);

    let mut class = builder.editable();
    let mut method = class.behavior("far", None).unwrap();
    method.insert_after("iinc $_ 1", false).unwrap();
    let code = method.code().unwrap();
    assert_eq!(&code.code[5..7], &[ISTORE_0 + 2, JSR_W]);
    assert_eq!(&code.code[33_014..33_016], &[ISTORE_0 + 2, JSR]);

    let bytes = class.to_bytes().unwrap();
    assert_eq!(run(&bytes, "far", &[0]), returned(4, &[]));
    assert_eq!(run(&bytes, "far", &[1]), returned(5, &[]));
}

#[test]
fn frozen_classes_reject_edits() {
    let mut class = picking().editable();
    let bytes = class.to_bytes().unwrap();
    assert!(class.is_frozen());

    let mut method = class.behavior("pick", None).unwrap();
    assert!(matches!(method.insert_before("nop"), Err(Error::Frozen(_))));
    assert!(matches!(
        method.insert_after("nop", true),
        Err(Error::Frozen(_))
    ));
    assert!(matches!(
        method.add_catch("athrow", "java.lang.Exception", None),
        Err(Error::Frozen(_))
    ));
    assert!(matches!(
        method.add_local_variable("x", "I"),
        Err(Error::Frozen(_))
    ));
    assert!(matches!(
        method.set_attribute("Custom", vec![1]),
        Err(Error::Frozen(_))
    ));
    assert_eq!(class.class_file().to_bytes().unwrap(), bytes);

    let mut class = counting().editable();
    let bytes = class.to_bytes().unwrap();
    let mut method = class.behavior("count", None).unwrap();
    assert_eq!(method.insert_at(11, false, "").unwrap(), 11);
    assert!(matches!(
        method.insert_at(11, true, "nop"),
        Err(Error::Frozen(_))
    ));
    assert_eq!(class.class_file().to_bytes().unwrap(), bytes);
}

#[test]
fn failed_edits_are_atomic() {
    let builder = picking();
    let mut class = builder.editable();
    let mut method = class.behavior("pick", None).unwrap();
    assert!(matches!(
        method.insert_after("ldc \"unused\"\ngoto nowhere", true),
        Err(Error::Compile(CompileError::UnknownLabel(_)))
    ));
    assert!(matches!(
        method.add_catch("athrow", "not a..type", None),
        Err(Error::TypeResolution(_))
    ));
    assert_eq!(class.to_bytes().unwrap(), builder.build());
}

#[test]
fn stale_stack_maps() {
    let mut builder = ClassBuilder::new("Mapped");
    builder.version(Version {
        minor_version: 0,
        major_version: 51,
    });
    let mut code = Code::new(1, 1, vec![ICONST_1, IRETURN]);
    code.attributes.push(builder.stack_map_table());
    builder.method("one", "()I", code, &[], &[]);
    let has_stack_map = |code: &Code| {
        code.attributes
            .iter()
            .any(|attribute| matches!(attribute, CodeAttribute::StackMapTable(_)))
    };

    // Declaring a local leaves the code and its frames alone
    let mut class = builder.editable();
    let mut method = class.behavior("one", None).unwrap();
    method.add_local_variable("unused", "I").unwrap();
    assert!(has_stack_map(&method.code().unwrap()));
    method.insert_before("nop").unwrap();
    assert!(!has_stack_map(&method.code().unwrap()));

    let mut settings = Settings::new();
    settings.drop_stale_stack_maps = false;
    let mut class = EditableClass::parse(&builder.build(), settings).unwrap();
    let mut method = class.behavior("one", None).unwrap();
    method.insert_before("nop").unwrap();
    assert!(has_stack_map(&method.code().unwrap()));
}

#[test]
fn bodies_for_native_methods() {
    let mut builder = ClassBuilder::new("Native");
    builder.raw_method(
        "add3",
        "(I)I",
        MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC | MethodAccessFlags::NATIVE,
        vec![],
    );
    let mut class = builder.editable();
    let mut method = class.behavior("add3", Some("(I)I")).unwrap();
    assert!(matches!(method.insert_before("nop"), Err(Error::NoMethodBody)));
    assert!(matches!(method.resolve_line(1), Err(Error::NoMethodBody)));
    method.set_body("iload_0\nbipush 3\niadd\nireturn").unwrap();
    assert!(!class.class_file().methods[0]
        .access_flags
        .contains(MethodAccessFlags::NATIVE));

    let bytes = class.to_bytes().unwrap();
    assert_eq!(run(&bytes, "add3", &[4]), returned(7, &[]));
}
