use javelin_vm::class_finder::{FileSystemClassPath, JarFileClassPath};
use javelin_vm::cli::{self, CliAction, Verbosity, VmOptions};
use javelin_vm::java_exception::MethodCallError;
use javelin_vm::jvm_error::ShutdownCode;
use javelin_vm::vm::VirtualMachine;
use log::{error, info, warn, LevelFilter};

fn main() {
    let mut args = cli::collect_env_args();
    args.extend(std::env::args().skip(1));

    let options = match cli::handle_cli(&args, &mut std::io::stdout(), &mut std::io::stderr()) {
        CliAction::Exit(code) => std::process::exit(code as i32),
        CliAction::Run(options) => options,
    };

    let mut logger = env_logger::Builder::new();
    match options.verbosity {
        Verbosity::Quiet => logger.filter_level(LevelFilter::Warn),
        // class-load tracing only: the loader module opens up, the rest
        // stays quiet
        Verbosity::Class => logger
            .filter_level(LevelFilter::Warn)
            .filter_module("javelin_vm::class_loader", LevelFilter::Info),
        Verbosity::Info => logger.filter_level(LevelFilter::Info),
        Verbosity::Fine => logger.filter_level(LevelFilter::Debug),
        Verbosity::Finest => logger.filter_level(LevelFilter::Trace),
    };
    logger.format_timestamp(None).init();

    std::process::exit(run(options) as i32);
}

fn run(options: VmOptions) -> ShutdownCode {
    let starting_class = match &options.starting_class {
        Some(class) => class.clone(),
        None => {
            error!("no executable program specified");
            eprintln!("{}", cli::usage_text());
            return ShutdownCode::ApplicationException;
        }
    };

    let mut vm = VirtualMachine::new();
    for path in &options.class_paths {
        match FileSystemClassPath::new(path) {
            Ok(class_path) => vm.add_class_path(Box::new(class_path)),
            Err(err) => warn!("skipping class path {path}: {err}"),
        }
    }
    if let Some(jar) = &options.jar {
        match JarFileClassPath::new(jar) {
            Ok(class_path) => vm.add_class_path(Box::new(class_path)),
            Err(err) => {
                error!("cannot open jar {jar}: {err}");
                return ShutdownCode::ApplicationException;
            }
        }
    }

    if let Err(err) = vm.load_base_classes() {
        error!("failed to load base classes: {err}");
        return ShutdownCode::JvmException;
    }

    info!("starting execution with: {starting_class}");
    match vm.run_main(&starting_class, &options.app_args) {
        Ok(_) => ShutdownCode::Ok,
        Err(MethodCallError::JavaException(throwable)) => {
            eprintln!("{}", vm.format_uncaught(&throwable));
            ShutdownCode::ApplicationException
        }
        Err(MethodCallError::Internal(err)) => {
            error!("{err}");
            ShutdownCode::JvmException
        }
    }
}
