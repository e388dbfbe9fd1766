/// Elements with a width
///
/// Widths show up in a couple places in class files:
///
///   - constant pool entries (most entries have width 1, but `long` and `double` take 2)
///   - local variables (depending on type, they have width 1 or 2)
///   - operand stack entries (same as locals)
///
pub trait Width {
    fn width(&self) -> usize;
}
