// analyze_results_main.rs
use adaptive_signals::flow_analyzer::kpi::KPI_HEADER;
use adaptive_signals::flow_analyzer::{analyze_outputs, draw_kpi_chart, write_kpi_table};
use adaptive_signals::global_variables::{KPI_CHART_FILE, KPI_FILE, OUTPUTS_DIR};
use adaptive_signals::Result;
use clap::Parser;
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "analyze_results")]
#[command(version, about = "Compares scenario runs and writes the KPI table")]
struct Cli {
    /// Directory holding one sub-directory per scenario
    #[arg(long, default_value = OUTPUTS_DIR)]
    outputs: PathBuf,

    /// Scenarios to compare, in table order
    #[arg(long, value_delimiter = ',', default_value = "baseline,adaptive")]
    scenes: Vec<String>,

    /// Also draw a bar chart of the travel-time KPIs
    #[arg(long)]
    chart: bool,
}

fn run(cli: Cli) -> Result<()> {
    let scenes: Vec<&str> = cli.scenes.iter().map(String::as_str).collect();
    let kpis = analyze_outputs(&cli.outputs, &scenes)?;

    println!("{}", KPI_HEADER.join(","));
    for row in &kpis {
        println!("{}", row.table_row().join(","));
    }

    let table = cli.outputs.join(KPI_FILE);
    write_kpi_table(&table, &kpis)?;
    println!("[ok] wrote {}", table.display());

    if cli.chart {
        let chart = cli.outputs.join(KPI_CHART_FILE);
        draw_kpi_chart(&chart, &kpis)?;
        println!("[ok] wrote {}", chart.display());
    }
    Ok(())
}

fn main() {
    env_logger::init();
    if let Err(e) = run(Cli::parse()) {
        eprintln!("Error analyzing results: {}", e);
        process::exit(1);
    }
}
