use crate::jvm_error::ShutdownCode;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use zip::ZipArchive;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variables whose contents are prepended to the command line,
/// in this order. Later options can override earlier ones.
const JAVA_ENV_KEYS: [&str; 3] = ["JAVA_TOOL_OPTIONS", "_JAVA_OPTIONS", "JDK_JAVA_OPTIONS"];

/// The `-verbose:` levels. `Class` traces class loading only; the other
/// levels widen the whole log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    #[default]
    Quiet,
    Class,
    Info,
    Fine,
    Finest,
}

impl Verbosity {
    fn parse(level: &str) -> Option<Verbosity> {
        match level {
            "class" => Some(Verbosity::Class),
            "info" => Some(Verbosity::Info),
            "fine" => Some(Verbosity::Fine),
            "finest" => Some(Verbosity::Finest),
            _ => None,
        }
    }
}

/// Everything the driver learned from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmOptions {
    pub class_paths: Vec<String>,
    pub jar: Option<String>,
    pub starting_class: Option<String>,
    pub app_args: Vec<String>,
    pub verbosity: Verbosity,
}

impl Default for VmOptions {
    fn default() -> VmOptions {
        VmOptions {
            class_paths: vec![".".to_string()],
            jar: None,
            starting_class: None,
            app_args: Vec::new(),
            verbosity: Verbosity::Quiet,
        }
    }
}

/// What the driver should do after argument handling.
#[derive(Debug, PartialEq, Eq)]
pub enum CliAction {
    Run(VmOptions),
    Exit(ShutdownCode),
}

pub fn collect_env_args() -> Vec<String> {
    let mut args = Vec::new();
    for key in JAVA_ENV_KEYS {
        if let Ok(value) = std::env::var(key) {
            args.extend(value.split_whitespace().map(str::to_string));
        }
    }
    args
}

/// Splits an option like `-verbose:fine` or `-Dname=value` into its root
/// and embedded argument.
fn option_root_and_arg(option: &str) -> (&str, Option<&str>) {
    match option.find([':', '=']) {
        Some(marker) => (&option[..marker], Some(&option[marker + 1..])),
        None => (option, None),
    }
}

/// Handles the full argument list (environment options already prepended,
/// program name excluded).
pub fn handle_cli(args: &[String], out: &mut dyn Write, err: &mut dyn Write) -> CliAction {
    let mut options = VmOptions::default();
    let mut i = 0;
    while i < args.len() {
        let raw = &args[i];
        let (root, embedded) = option_root_and_arg(raw);
        match root {
            "-help" | "-h" | "-?" => {
                let _ = writeln!(err, "{}", usage_text());
                return CliAction::Exit(ShutdownCode::Ok);
            }
            "--help" => {
                let _ = writeln!(out, "{}", usage_text());
                return CliAction::Exit(ShutdownCode::Ok);
            }
            "-version" => {
                let _ = writeln!(err, "{}", version_text());
                return CliAction::Exit(ShutdownCode::Ok);
            }
            "--version" => {
                let _ = writeln!(out, "{}", version_text());
                return CliAction::Exit(ShutdownCode::Ok);
            }
            "-showversion" => {
                let _ = writeln!(err, "{}", version_text());
            }
            "--show-version" => {
                let _ = writeln!(out, "{}", version_text());
            }
            "-verbose" => match embedded.and_then(Verbosity::parse) {
                Some(level) => options.verbosity = level,
                None => {
                    let _ = writeln!(err, "{raw} is not a recognized option. Ignored.");
                }
            },
            "-classpath" | "-cp" => {
                let value = match embedded {
                    Some(value) => Some(value.to_string()),
                    None => {
                        i += 1;
                        args.get(i).cloned()
                    }
                };
                match value {
                    Some(path) => options.class_paths.push(path),
                    None => {
                        let _ = writeln!(err, "{root} requires a path argument.");
                        return CliAction::Exit(ShutdownCode::ApplicationException);
                    }
                }
            }
            "-jar" => {
                i += 1;
                match args.get(i) {
                    Some(path) => {
                        options.starting_class = jar_main_class(path);
                        if options.starting_class.is_none() {
                            let _ = writeln!(err, "no Main-Class manifest attribute in {path}");
                            return CliAction::Exit(ShutdownCode::ApplicationException);
                        }
                        options.jar = Some(path.clone());
                        options.app_args = args[i + 1..].to_vec();
                        return CliAction::Run(options);
                    }
                    None => {
                        let _ = writeln!(err, "-jar requires a path argument.");
                        return CliAction::Exit(ShutdownCode::ApplicationException);
                    }
                }
            }
            _ if root.starts_with('-') => {
                let _ = writeln!(err, "{raw} is not a recognized option. Ignored.");
            }
            _ => {
                // the starting class; everything after it belongs to the app
                let class = raw.strip_suffix(".class").unwrap_or(raw).replace('.', "/");
                options.starting_class = Some(class);
                options.app_args = args[i + 1..].to_vec();
                return CliAction::Run(options);
            }
        }
        i += 1;
    }
    CliAction::Run(options)
}

/// Reads Main-Class out of a jar's manifest, converting dotted form to the
/// slash form the loader uses.
fn jar_main_class(path: &str) -> Option<String> {
    let file = File::open(path).ok()?;
    let mut archive = ZipArchive::new(BufReader::new(file)).ok()?;
    let mut manifest = String::new();
    archive
        .by_name("META-INF/MANIFEST.MF")
        .ok()?
        .read_to_string(&mut manifest)
        .ok()?;
    manifest.lines().find_map(|line| {
        line.strip_prefix("Main-Class:")
            .map(|name| name.trim().replace('.', "/"))
    })
}

pub fn usage_text() -> String {
    format!(
        "Usage: javelin [options] <mainclass> [args...]
           (to execute a class)
   or  javelin [options] -jar <jarfile> [args...]
           (to execute a jar file)

where options include:
    -classpath | -cp <path>  add a class-path root
    -verbose:[class|info|fine|finest]  enable verbose output
    -? -h -help   print this help message to the error stream
    --help        print this help message to the output stream
    -version      print product version to the error stream and exit
    --version     print product version to the output stream and exit
    -showversion  print product version to the error stream and continue
    --show-version
                  print product version to the output stream and continue

javelin v. {VERSION}"
    )
}

pub fn version_text() -> String {
    format!("javelin VM v. {VERSION}\n64-bit interpreter")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(args: &[&str]) -> (CliAction, String, String) {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let mut out = Vec::new();
        let mut err = Vec::new();
        let action = handle_cli(&args, &mut out, &mut err);
        (
            action,
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    #[test]
    fn help_prints_usage_and_exits_clean() {
        let (action, _, err) = run(&["-help"]);
        assert_eq!(CliAction::Exit(ShutdownCode::Ok), action);
        assert!(err.contains("Usage: javelin"));

        let (action, out, _) = run(&["--help"]);
        assert_eq!(CliAction::Exit(ShutdownCode::Ok), action);
        assert!(out.contains("Usage: javelin"));
    }

    #[test]
    fn version_exits_showversion_continues() {
        let (action, _, err) = run(&["-version"]);
        assert_eq!(CliAction::Exit(ShutdownCode::Ok), action);
        assert!(err.contains("javelin VM"));

        let (action, out, _) = run(&["--show-version", "Hello"]);
        assert!(out.contains("javelin VM"));
        match action {
            CliAction::Run(options) => {
                assert_eq!(Some("Hello".to_string()), options.starting_class)
            }
            other => panic!("expected Run, got {other:?}"),
        }
    }

    #[test]
    fn positional_class_takes_the_remaining_args() {
        let (action, _, _) = run(&["-verbose:fine", "pkg.Hello.class", "a", "-b"]);
        match action {
            CliAction::Run(options) => {
                assert_eq!(Some("pkg/Hello".to_string()), options.starting_class);
                assert_eq!(vec!["a".to_string(), "-b".to_string()], options.app_args);
                assert_eq!(Verbosity::Fine, options.verbosity);
            }
            other => panic!("expected Run, got {other:?}"),
        }
    }

    #[test]
    fn each_verbose_level_is_distinct() {
        for (flag, expected) in [
            ("-verbose:class", Verbosity::Class),
            ("-verbose:info", Verbosity::Info),
            ("-verbose:fine", Verbosity::Fine),
            ("-verbose:finest", Verbosity::Finest),
        ] {
            let (action, _, _) = run(&[flag, "Hello"]);
            match action {
                CliAction::Run(options) => assert_eq!(expected, options.verbosity, "{flag}"),
                other => panic!("expected Run, got {other:?}"),
            }
        }
        let (action, _, err) = run(&["-verbose:chatty", "Hello"]);
        assert!(err.contains("not a recognized option"));
        match action {
            CliAction::Run(options) => assert_eq!(Verbosity::Quiet, options.verbosity),
            other => panic!("expected Run, got {other:?}"),
        }
    }

    #[test]
    fn classpath_accepts_embedded_and_split_forms() {
        let (action, _, _) = run(&["-cp", "build", "-classpath=lib", "Hello"]);
        match action {
            CliAction::Run(options) => {
                assert_eq!(
                    vec![".".to_string(), "build".to_string(), "lib".to_string()],
                    options.class_paths
                );
            }
            other => panic!("expected Run, got {other:?}"),
        }
    }

    #[test]
    fn unknown_options_warn_and_continue() {
        let (action, _, err) = run(&["-client", "Hello"]);
        assert!(err.contains("not a recognized option"));
        assert!(matches!(action, CliAction::Run(_)));
    }
}
