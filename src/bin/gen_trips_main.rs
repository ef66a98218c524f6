// gen_trips_main.rs
use adaptive_signals::demand::trip_generation::{
    generate_trips, load_taz_map, read_od_csv, write_trips, TripGenerationOptions,
};
use adaptive_signals::Result;
use clap::Parser;
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "gen_trips")]
#[command(version, about = "Turns a time-sliced OD table into a trips file")]
struct Cli {
    /// OD table (time_begin,time_end,origin_taz,dest_taz,veh)
    #[arg(long)]
    csv: PathBuf,

    /// Trips CSV to write
    #[arg(long)]
    out: PathBuf,

    /// Simulation time of --time0, seconds
    #[arg(long, default_value_t = 0)]
    begin: i64,

    /// Upper bound on departures per second within one OD row
    #[arg(long, default_value_t = 50.0)]
    veh_per_second_cap: f64,

    /// Keep zone names as trip endpoints
    #[arg(long)]
    emit_taz: bool,

    /// Origin zone -> edge weights (JSON)
    #[arg(long)]
    origin_map: Option<PathBuf>,

    /// Destination zone -> edge weights (JSON)
    #[arg(long)]
    dest_map: Option<PathBuf>,

    /// Clock time that maps to --begin (HH:MM)
    #[arg(long, default_value = "07:00")]
    time0: String,
}

fn run(cli: Cli) -> Result<()> {
    let mut options = TripGenerationOptions {
        begin: cli.begin,
        veh_per_second_cap: cli.veh_per_second_cap,
        emit_taz: cli.emit_taz,
        time0: cli.time0,
        ..TripGenerationOptions::default()
    };
    if let Some(path) = &cli.origin_map {
        options.origin_map = load_taz_map(path)?;
    }
    if let Some(path) = &cli.dest_map {
        options.dest_map = load_taz_map(path)?;
    }

    let rows = read_od_csv(&cli.csv)?;
    let trips = generate_trips(&rows, &options)?;
    write_trips(&cli.out, &trips)?;
    println!(
        "Wrote {} with {} trips. emit_taz={}",
        cli.out.display(),
        trips.len(),
        options.emit_taz
    );
    Ok(())
}

fn main() {
    env_logger::init();
    if let Err(e) = run(Cli::parse()) {
        eprintln!("Error generating trips: {}", e);
        process::exit(1);
    }
}
