use jarsplice::splice::{EditableClass, Error, Settings};
use jarsplice::*;

use clap::error::ErrorKind;
use clap::{Arg, ArgAction, Command};
use std::fs;

fn command() -> Command {
    Command::new("JVM method splicer")
        .version(clap::crate_version!())
        .about("Splice snippets of bytecode into the methods of a compiled class")
        .arg(
            Arg::new("INPUT")
                .help("Class file to edit")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("CLASS_FILE")
                .help("Where to write the edited class (defaults to overwriting the input)"),
        )
        .arg(
            Arg::new("list")
                .long("list")
                .action(ArgAction::SetTrue)
                .help("List the methods of the class and exit"),
        )
        .arg(
            Arg::new("method")
                .long("method")
                .value_name("NAME[DESCRIPTOR]")
                .required_unless_present("list")
                .help("Method to edit (eg. `run` or `run(I)V`)"),
        )
        .arg(
            Arg::new("local")
                .long("local")
                .value_name("NAME:DESCRIPTOR")
                .action(ArgAction::Append)
                .help("Declare a local variable spanning the whole method"),
        )
        .arg(
            Arg::new("body")
                .long("body")
                .value_name("SNIPPET")
                .help("Replace the method body"),
        )
        .arg(
            Arg::new("before")
                .long("before")
                .value_name("SNIPPET")
                .help("Run a snippet on entry"),
        )
        .arg(
            Arg::new("at")
                .long("at")
                .value_name("LINE:SNIPPET")
                .action(ArgAction::Append)
                .help("Run a snippet at the start of a source line"),
        )
        .arg(
            Arg::new("resolve line")
                .long("resolve-line")
                .value_name("LINE")
                .value_parser(clap::value_parser!(u16))
                .help("Print the line an insertion at LINE would use and exit"),
        )
        .arg(
            Arg::new("after")
                .long("after")
                .value_name("SNIPPET")
                .help("Run a snippet on every return"),
        )
        .arg(
            Arg::new("finally")
                .long("finally")
                .action(ArgAction::SetTrue)
                .requires("after")
                .help("Also run the `--after` snippet when an exception escapes"),
        )
        .arg(
            Arg::new("catch")
                .long("catch")
                .value_name("TYPE:SNIPPET")
                .help("Handle exceptions of some type escaping the method"),
        )
        .arg(
            Arg::new("catch name")
                .long("catch-name")
                .value_name("NAME")
                .requires("catch")
                .help("Name the caught exception is bound to (defaults to `$e`)"),
        )
        .arg(
            Arg::new("keep stack maps")
                .long("keep-stack-maps")
                .action(ArgAction::SetTrue)
                .help("Write stale `StackMapTable` attributes back out instead of dropping them"),
        )
}

/// Snippets can be given inline or, prefixed with `@`, as a path to read them from
fn snippet(argument: &str) -> Result<String, Error> {
    match argument.strip_prefix('@') {
        Some(path) => Ok(fs::read_to_string(path).map_err(jvm::Error::IoError)?),
        None => Ok(argument.to_owned()),
    }
}

fn main() -> Result<(), Error> {
    env_logger::init();

    let mut command = command();
    let matches = command.get_matches_mut();

    let mut settings = Settings::new();
    if matches.get_flag("keep stack maps") {
        settings.drop_stale_stack_maps = false;
    }

    let input = match matches.get_one::<String>("INPUT") {
        Some(input) => input,
        None => command
            .error(ErrorKind::MissingRequiredArgument, "no INPUT class file given")
            .exit(),
    };
    log::info!("Reading '{}'", input);
    let mut class = EditableClass::from_path(input, settings)?;

    if matches.get_flag("list") {
        for (name, descriptor) in class.methods() {
            println!("{}{}", name, descriptor);
        }
        return Ok(());
    }

    let method = match matches.get_one::<String>("method") {
        Some(method) => method,
        None => command
            .error(
                ErrorKind::MissingRequiredArgument,
                "`--method` is required unless `--list` is given",
            )
            .exit(),
    };
    let (name, descriptor) = match method.find('(') {
        Some(split) => (&method[..split], Some(&method[split..])),
        None => (method.as_str(), None),
    };
    let mut behavior = class.behavior(name, descriptor)?;

    if let Some(line) = matches.get_one::<u16>("resolve line") {
        println!("{}", behavior.resolve_line(*line)?);
        return Ok(());
    }

    for local in matches.get_many::<String>("local").into_iter().flatten() {
        match local.split_once(':') {
            Some((name, descriptor)) => {
                let slot = behavior.add_local_variable(name, descriptor)?;
                log::info!("Declared '{}' in slot {}", name, slot);
            }
            None => command
                .error(ErrorKind::InvalidValue, "`--local` expects NAME:DESCRIPTOR")
                .exit(),
        }
    }
    if let Some(body) = matches.get_one::<String>("body") {
        behavior.set_body(&snippet(body)?)?;
    }
    if let Some(before) = matches.get_one::<String>("before") {
        behavior.insert_before(&snippet(before)?)?;
    }
    for at in matches.get_many::<String>("at").into_iter().flatten() {
        let parsed = at
            .split_once(':')
            .and_then(|(line, source)| Some((line.trim().parse::<u16>().ok()?, source)));
        match parsed {
            Some((line, source)) => {
                let used = behavior.insert_at(line, true, &snippet(source)?)?;
                log::info!("Inserted at line {} (requested {})", used, line);
            }
            None => command
                .error(ErrorKind::InvalidValue, "`--at` expects LINE:SNIPPET")
                .exit(),
        }
    }
    if let Some(after) = matches.get_one::<String>("after") {
        behavior.insert_after(&snippet(after)?, matches.get_flag("finally"))?;
    }
    if let Some(catch) = matches.get_one::<String>("catch") {
        match catch.split_once(':') {
            Some((exception_type, source)) => {
                let name = matches.get_one::<String>("catch name").map(String::as_str);
                behavior.add_catch(&snippet(source)?, exception_type, name)?;
            }
            None => command
                .error(ErrorKind::InvalidValue, "`--catch` expects TYPE:SNIPPET")
                .exit(),
        }
    }

    let output = matches.get_one::<String>("output").unwrap_or(input);
    log::info!("Writing '{}'", output);
    class.save_to_path(output, true)?;

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn arguments() {
        command().debug_assert();

        let missing = command()
            .try_get_matches_from(["jarsplice", "A.class"])
            .unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::MissingRequiredArgument);
        assert!(command()
            .try_get_matches_from(["jarsplice", "A.class", "--list"])
            .is_ok());

        let matches = command()
            .try_get_matches_from(["jarsplice", "A.class", "--method", "run(I)V", "--finally"])
            .unwrap_err();
        assert_eq!(matches.kind(), ErrorKind::MissingRequiredArgument);
        let matches = command()
            .try_get_matches_from(["jarsplice", "A.class", "--method", "run", "--at", "3:nop"])
            .unwrap();
        assert_eq!(matches.get_one::<String>("method").unwrap(), "run");
    }
}
