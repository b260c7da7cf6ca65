//! Punto de entrada ("driver").
//!
//! Este módulo orquesta las diferentes fases del proceso de
//! compilación y expone una CLI.

use anyhow::{self, Context};
use clap::{self, crate_version, Arg, Command};
use log::{info, warn};
use slc::{
    listing::{self, EmitOptions},
    sim::{Exit, Machine},
    sink::Image,
};

use std::{
    fs::{self, File},
    io::{self, BufReader, Read, Write},
    process,
};

fn main() -> anyhow::Result<()> {
    // Parsing de CLI
    let args = Command::new("slc")
        .version(crate_version!())
        .about("Compiler for Z80-compatible 8-bit targets")
        .arg(
            Arg::new("input")
                .required(true)
                .value_name("INPUT")
                .help("Source file"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .takes_value(true)
                .value_name("FILE")
                .default_value("out.bin")
                .help("Output image"),
        )
        .arg(
            Arg::new("line-map")
                .long("line-map")
                .takes_value(true)
                .value_name("FILE")
                .help("Write a map from source lines to image addresses"),
        )
        .arg(
            Arg::new("listing")
                .short('S')
                .long("listing")
                .help("Print a disassembly of the image to stdout"),
        )
        .arg(
            Arg::new("run")
                .short('r')
                .long("run")
                .help("Run the image in the simulator, feeding it stdin"),
        )
        .arg(
            Arg::new("max-steps")
                .long("max-steps")
                .takes_value(true)
                .value_name("N")
                .default_value("100000000")
                .help("Instruction limit for --run"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .multiple_occurrences(true)
                .help("Increase log verbosity"),
        )
        .get_matches();

    let level = match args.occurrences_of("verbose") {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    // Se extraen argumentos necesarios
    let input = args.value_of("input").context("Missing input file")?;
    let output = args.value_of("output").context("Missing output file")?;
    let max_steps: u64 = args
        .value_of("max-steps")
        .unwrap_or_default()
        .parse()
        .context("Invalid value for --max-steps")?;

    let mut options = EmitOptions::empty();
    if args.is_present("line-map") {
        options |= EmitOptions::LINE_MAP;
    }

    if args.is_present("listing") {
        options |= EmitOptions::LISTING;
    }

    let file = File::open(input).with_context(|| format!("Failed to open: {}", input))?;

    let compiled = match slc::compile(BufReader::new(file), input, Image::new()) {
        Ok(compiled) => compiled,
        Err(diagnostics) => {
            eprint!("{}", diagnostics);
            process::exit(1);
        }
    };

    let image = compiled.sink.into_bytes();
    fs::write(output, &image).with_context(|| format!("Failed to write image: {}", output))?;
    info!("Wrote {} byte(s) to {}", image.len(), output);

    if options.contains(EmitOptions::LINE_MAP) {
        if let Some(path) = args.value_of("line-map") {
            let mut file = File::create(path)
                .with_context(|| format!("Failed to open for writing: {}", path))?;

            listing::write_line_map(&compiled.lines, &mut file)
                .with_context(|| format!("Failed to write line map: {}", path))?;
        }
    }

    if options.contains(EmitOptions::LISTING) {
        let mut stdout = io::stdout().lock();
        listing::write_listing(&image, &compiled.lines, &mut stdout)
            .context("Failed to write listing to stdout")?;
    }

    if args.is_present("run") {
        let mut input = Vec::new();
        io::stdin()
            .read_to_end(&mut input)
            .context("Failed to read program input from stdin")?;

        let mut machine = Machine::new(&image)?.with_input(&input);
        let exit = machine.run(max_steps).context("Simulation failed")?;

        let mut stdout = io::stdout();
        stdout.write_all(machine.output())?;
        stdout.flush()?;

        let code = match exit {
            Exit::Returned { a, .. } | Exit::Exited(a) => a,
            Exit::Halted => 0,
            Exit::BoundsTrap { address } => {
                warn!("Index out of bounds, trapped at {:#06x}", address);
                0xFF
            }
        };

        info!("Program exited with code {} after {} step(s)", code, machine.steps());
        process::exit(code.into());
    }

    Ok(())
}
