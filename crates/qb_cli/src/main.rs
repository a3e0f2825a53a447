use std::sync::Arc;

use qb_runtime::{ENTRY_FUNCTION, IoGateway, ModuleRegistry, Scheduler, Value};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const USAGE: &str = "Usage: qbrt <module> [args...]";

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let mut argv = std::env::args().skip(1);
    let Some(module_name) = argv.next() else {
        eprintln!("{USAGE}");
        return 2;
    };
    let program_args: Vec<String> = argv.collect();

    let registry = Arc::new(ModuleRegistry::from_env());
    let module = match registry.load(&module_name) {
        Ok(module) => module,
        Err(fault) => {
            eprintln!("{fault}");
            return 2;
        }
    };

    let Some(entry_set) = module.variants(ENTRY_FUNCTION) else {
        eprintln!("no {ENTRY_FUNCTION} function defined in module '{module_name}'");
        return 2;
    };

    // Entry either takes the argument list or takes nothing.
    let arg_list =
        Value::list(program_args.iter().map(|a| Value::str(a.as_str())).collect());
    let (entry, args) = match entry_set.resolve(std::slice::from_ref(&arg_list)) {
        Ok(def) => (def, vec![arg_list]),
        Err(_) => match entry_set.resolve(&[]) {
            Ok(def) => (def, Vec::new()),
            Err(fault) => {
                eprintln!("{fault}");
                return 2;
            }
        },
    };

    let io = IoGateway::stdio();
    let scheduler = Scheduler::new(registry, io, Scheduler::workers_from_env());
    scheduler.run(entry, args)
}
