use clap::Parser as ClapParser;
use std::{
    fmt::Write as _,
    fs, io,
    path::Path,
    process,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    thread,
};

use bytecode::{CompiledMethod, text};
use env_logger::Env;
use log::{debug, info};
use parking_lot::Mutex;

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Textual assembly files, assembled in order
    #[arg(required = true, help = "The assembly files to assemble")]
    files: Vec<String>,

    #[arg(long, help = "Print the disassembly of each method")]
    print_bytecode: bool,

    #[arg(long, help = "Print the line table of each method")]
    print_lines: bool,

    #[arg(long, help = "Print the exception table of each method")]
    print_exceptions: bool,

    /// Report every failing file instead of stopping at the first
    #[arg(long, help = "Continue with the remaining files after an error")]
    keep_going: bool,

    #[arg(short, long, default_value_t = 1, help = "Worker threads")]
    jobs: usize,

    /// `-v` for debug logging, `-vv` for trace
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// What to print for each assembled method.
#[derive(Debug, Clone, Copy, Default)]
struct Listing {
    bytecode: bool,
    lines: bool,
    exceptions: bool,
}

impl Listing {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            bytecode: cli.print_bytecode,
            lines: cli.print_lines,
            exceptions: cli.print_exceptions,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    let listing = Listing::from_cli(&cli);
    let results = run_batch(
        &cli.files,
        cli.jobs,
        cli.keep_going,
        |path| fs::read_to_string(path),
        listing,
    );

    let mut failed = false;
    for result in results.into_iter().flatten() {
        match result {
            Ok(output) => print!("{output}"),
            Err(message) => {
                eprintln!("{message}");
                failed = true;
            }
        }
    }
    if failed {
        process::exit(1);
    }
}

/// Assemble `files` on up to `jobs` threads. The result list follows the
/// order of `files`; without `keep_going` it ends at the first failure and
/// the files after it are not reported.
fn run_batch<F>(
    files: &[String],
    jobs: usize,
    keep_going: bool,
    load: F,
    listing: Listing,
) -> Vec<Option<Result<String, String>>>
where
    F: Fn(&str) -> io::Result<String> + Sync,
{
    let results: Mutex<Vec<Option<Result<String, String>>>> =
        Mutex::new(vec![None; files.len()]);
    let next = AtomicUsize::new(0);
    let stop = AtomicBool::new(false);
    let workers = jobs.clamp(1, files.len().max(1));
    debug!("assembling {} files on {workers} threads", files.len());

    thread::scope(|s| {
        for _ in 0..workers {
            s.spawn(|| {
                loop {
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    let i = next.fetch_add(1, Ordering::Relaxed);
                    let Some(path) = files.get(i) else {
                        break;
                    };
                    let result = assemble_file(path, &load, listing);
                    if result.is_err() && !keep_going {
                        stop.store(true, Ordering::Relaxed);
                    }
                    results.lock()[i] = Some(result);
                }
            });
        }
    });

    let mut results = results.into_inner();
    if !keep_going {
        if let Some(first) = results.iter().position(|r| matches!(r, Some(Err(_)))) {
            results.truncate(first + 1);
        }
    }
    results
}

fn assemble_file<F>(path: &str, load: &F, listing: Listing) -> Result<String, String>
where
    F: Fn(&str) -> io::Result<String>,
{
    let source = load(path).map_err(|e| format!("{path}: {e}"))?;
    let name = Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(path);
    let method = text::assemble(&source, name, path)
        .map_err(|e| format!("{path}:{}: {}", e.line, e.source))?;
    info!("{path}: {} bytes", method.bytecode.len());
    Ok(render(path, &method, listing))
}

fn render(path: &str, method: &CompiledMethod, listing: Listing) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{path}: `{}` {} bytes, {} literals, {} locals, stack {}",
        method.name,
        method.bytecode.len(),
        method.literals.len(),
        method.local_count,
        method.stack_size
    );
    if listing.bytecode {
        out.push_str(&method.disassemble());
    }
    if listing.lines {
        let _ = writeln!(out, "-- lines --");
        for entry in method.lines.entries() {
            let _ = writeln!(out, "[{}, {}) line {}", entry.start, entry.end, entry.line);
        }
    }
    if listing.exceptions {
        let _ = writeln!(out, "-- exceptions --");
        for entry in method.exceptions.entries() {
            let _ = writeln!(out, "{entry}");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = "push 5\nset x\npush x\nret\n";
    const BAD: &str = "push 1\nfrobnicate\nret\n";

    fn load(path: &str) -> io::Result<String> {
        match path {
            "missing.s" => Err(io::Error::new(io::ErrorKind::NotFound, "not found")),
            p if p.starts_with("bad") => Ok(BAD.to_string()),
            _ => Ok(GOOD.to_string()),
        }
    }

    fn files(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn errors_name_file_and_line() {
        let err = assemble_file("bad.s", &load, Listing::default()).unwrap_err();
        assert!(err.starts_with("bad.s:2: "), "{err}");
        let err = assemble_file("missing.s", &load, Listing::default()).unwrap_err();
        assert!(err.starts_with("missing.s: "), "{err}");
    }

    #[test]
    fn summary_names_method_after_file() {
        let out = assemble_file("dir/ok.s", &load, Listing::default()).unwrap();
        assert!(out.starts_with("dir/ok.s: `ok`"), "{out}");
        assert!(out.contains("1 locals"));
    }

    #[test]
    fn listings_are_optional() {
        let listing = Listing {
            bytecode: true,
            lines: true,
            exceptions: true,
        };
        let out = assemble_file("ok.s", &load, listing).unwrap();
        assert!(out.contains("-- bytecode --"));
        assert!(out.contains("-- lines --"));
        assert!(out.contains("-- exceptions --"));
    }

    #[test]
    fn batch_stops_at_first_failure() {
        let names = files(&["a.s", "bad.s", "c.s"]);
        let results = run_batch(&names, 1, false, load, Listing::default());
        assert_eq!(results.len(), 2);
        assert!(matches!(results[0], Some(Ok(_))));
        assert!(matches!(results[1], Some(Err(_))));
    }

    #[test]
    fn parallel_batch_keeps_command_line_order() {
        let names = files(&["a.s", "bad1.s", "c.s", "bad2.s", "e.s", "f.s"]);
        let results = run_batch(&names, 4, true, load, Listing::default());
        assert_eq!(results.len(), names.len());
        for (name, result) in names.iter().zip(&results) {
            match result {
                Some(Ok(out)) => assert!(out.starts_with(name.as_str())),
                Some(Err(err)) => {
                    assert!(name.starts_with("bad"));
                    assert!(err.starts_with(name.as_str()));
                }
                None => panic!("{name} was skipped"),
            }
        }
    }
}
