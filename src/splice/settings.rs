#[derive(Debug, Clone)]
pub struct Settings {
    /// Default name of the binding holding a caught exception (eg. `$e`)
    pub exception_binding_name: String,

    /// Name of the binding holding the value about to be returned (eg. `$_`)
    pub return_value_binding_name: String,

    /// Prefix of positional parameter bindings (eg. `$` makes `$0`, `$1`, ...)
    ///
    /// For instance methods, `$0` is the receiver and the declared parameters start at `$1`.
    pub parameter_binding_prefix: String,

    /// Drop the `StackMapTable` of a method whenever its code is edited
    ///
    /// Frames are not recomputed, so after an edit the existing table is stale. With this unset,
    /// the stale table is written back out and is left for some later pass to fix up.
    pub drop_stale_stack_maps: bool,
}

impl Settings {
    pub fn new() -> Settings {
        Settings {
            exception_binding_name: String::from("$e"),
            return_value_binding_name: String::from("$_"),
            parameter_binding_prefix: String::from("$"),
            drop_stale_stack_maps: true,
        }
    }

    /// Name of the binding for the parameter in slot position `index`
    pub fn parameter_binding_name(&self, index: usize) -> String {
        format!("{}{}", self.parameter_binding_prefix, index)
    }
}

impl Default for Settings {
    fn default() -> Settings {
        Settings::new()
    }
}
