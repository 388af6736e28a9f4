use std::env;
use std::fs::File;
use std::io::{self, prelude::*};
use std::path::PathBuf;
use std::process::exit;

use log::{info, LevelFilter};

use flathead::host::Host;
use flathead::machine::{ExitReason, Machine};
use flathead::terminal::TerminalHost;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn usage() -> ! {
    eprintln!("Usage: flathead [-d LEVEL] <story-file>");
    eprintln!("  -d, --debug LEVEL   0 = silent, 1 = per-instruction, 2 = decoder trace");
    exit(1);
}

fn main() -> io::Result<()> {
    let mut debug_level = 0u8;
    let mut story: Option<String> = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-d" | "--debug" => {
                let level = args.next().unwrap_or_else(|| usage());
                debug_level = match level.parse() {
                    Ok(l @ 0..=2) => l,
                    _ => {
                        eprintln!("Invalid debug level {level}, must be 0, 1, or 2");
                        exit(1);
                    }
                };
            }
            "-h" | "--help" => usage(),
            _ if story.is_none() => story = Some(arg),
            _ => usage(),
        }
    }
    let Some(story) = story else { usage() };

    // The debug flag picks the logger floor; RUST_LOG still wins when set.
    let filter = match debug_level {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(filter)
        .init();

    let path = PathBuf::from(&story);
    if !path.exists() {
        eprintln!("Story file not found: {story}");
        exit(1);
    }

    let mut f = File::open(&path)?;
    let mut data = Vec::new();
    f.read_to_end(&mut data)?;

    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "story".to_string());

    println!("Flathead Z-Machine v{VERSION}");
    println!("Loading game: {story}");

    let mut machine = match Machine::new(data.clone(), &name, Box::new(TerminalHost::new())) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("Could not load story file: {e}");
            exit(1);
        }
    };

    // Restarts and loads come back out of the run loop so the machine can
    // be rebuilt or repointed here.
    loop {
        match machine.run() {
            Ok(ExitReason::Quit) => {
                info!("Exit code {}", ExitReason::Quit.code());
                println!("\nGame over. Thanks for playing!");
                break;
            }
            Ok(ExitReason::Restart) => {
                info!("Exit code {}", ExitReason::Restart.code());
                machine = match Machine::new(data.clone(), &name, Box::new(TerminalHost::new())) {
                    Ok(m) => m,
                    Err(e) => {
                        eprintln!("Could not restart: {e}");
                        exit(1);
                    }
                };
            }
            Ok(ExitReason::Load) => {
                info!("Exit code {}", ExitReason::Load.code());
                let mut host = TerminalHost::new();
                match host.load(&name) {
                    Some(state) => machine.replace_state(&state),
                    None => println!("No saved game to load."),
                }
            }
            Err(e) => {
                eprintln!("{e}");
                exit(1);
            }
        }
    }

    Ok(())
}
