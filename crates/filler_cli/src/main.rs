use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use filler_core::{
    metrics::{append_metrics_row, write_metrics_header},
    Event, EventLevel, MachineDef, MachineState, SessionSummary, SettingsUpdate,
};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "filler_cli", about = "Filling-line production simulator CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every machine headless for a fixed number of ticks.
    Run {
        #[arg(long)]
        ticks: u64,
        /// JSON machine file. Two default fillers when omitted.
        #[arg(long)]
        machines: Option<PathBuf>,
        /// Only run the machine with this id.
        #[arg(long)]
        machine: Option<String>,
        /// Override every machine's box limit.
        #[arg(long, allow_negative_numbers = true)]
        limit: Option<i64>,
        /// Override every machine's cycle time in minutes.
        #[arg(long, allow_negative_numbers = true)]
        cycle_time: Option<f64>,
        #[arg(long, default_value_t = 100)]
        print_every: u64,
        #[arg(long, default_value = "normal", value_parser = ["normal", "debug"])]
        event_level: String,
        /// Write a metrics CSV to this path.
        #[arg(long)]
        metrics_out: Option<PathBuf>,
        /// Sample metrics every N ticks.
        #[arg(long, default_value_t = 10)]
        metrics_every: u64,
        /// Print the final session summaries as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print the tick interval for a limit and cycle time.
    Interval {
        #[arg(long)]
        limit: u32,
        #[arg(long)]
        cycle_time: f64,
    },
}

// ---------------------------------------------------------------------------
// Run loop
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct MachineReport {
    machine_id: String,
    name: String,
    simulated_seconds: f64,
    #[serde(flatten)]
    summary: SessionSummary,
}

struct RunOptions {
    ticks: u64,
    print_every: u64,
    event_level: EventLevel,
    metrics_out: Option<PathBuf>,
    metrics_every: u64,
    json: bool,
}

fn select_machines(
    defs: Vec<MachineDef>,
    only: Option<&str>,
    limit: Option<i64>,
    cycle_time: Option<f64>,
) -> Result<Vec<MachineState>> {
    let mut machines: Vec<MachineState> = defs
        .iter()
        .filter(|def| only.map_or(true, |id| def.id.0 == id))
        .map(MachineState::new)
        .collect();
    if machines.is_empty() {
        bail!("no machine matches {:?}", only.unwrap_or_default());
    }
    if limit.is_some() || cycle_time.is_some() {
        for machine in &mut machines {
            let update = SettingsUpdate {
                limit: limit.unwrap_or_else(|| i64::from(machine.limit)),
                cycle_time_minutes: cycle_time.unwrap_or(machine.cycle_time_minutes),
                name: None,
            };
            machine.update_settings(&update);
        }
    }
    Ok(machines)
}

fn run(mut machines: Vec<MachineState>, opts: &RunOptions) -> Result<Vec<MachineReport>> {
    let mut metrics_writer = match &opts.metrics_out {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("creating {}", path.display()))?;
            let mut writer = std::io::BufWriter::new(file);
            write_metrics_header(&mut writer).context("writing metrics header")?;
            Some(writer)
        }
        None => None,
    };

    for machine in &mut machines {
        for envelope in machine.start() {
            if let Event::StartRefused { reason } = &envelope.event {
                println!("!!! {} refused to start: {reason}", machine.name);
            }
        }
    }

    println!(
        "Starting simulation: ticks={} machines={}",
        opts.ticks,
        machines.len()
    );
    println!("{}", "-".repeat(80));

    for step in 1..=opts.ticks {
        for machine in &mut machines {
            advance(machine, step, opts.event_level);
        }

        if opts.print_every > 0 && step % opts.print_every == 0 {
            print_status(step, &machines);
        }

        if let Some(ref mut writer) = metrics_writer {
            if opts.metrics_every > 0 && step % opts.metrics_every == 0 {
                for machine in &machines {
                    let snapshot = filler_core::compute_snapshot(step, machine);
                    append_metrics_row(writer, &snapshot).context("writing metrics row")?;
                }
            }
        }
    }

    println!("{}", "-".repeat(80));
    println!("Done after {} ticks:", opts.ticks);
    print_status(opts.ticks, &machines);

    if let Some(ref mut writer) = metrics_writer {
        writer.flush().context("final metrics flush")?;
    }

    let reports = machines
        .iter_mut()
        .map(|machine| {
            let simulated_seconds = machine.tick_interval().as_secs_f64() * machine.progress as f64;
            let summary = machine.session_summary();
            machine.reset();
            MachineReport {
                machine_id: machine.id.0.clone(),
                name: machine.name.clone(),
                simulated_seconds,
                summary,
            }
        })
        .collect();
    Ok(reports)
}

/// One tick at the machine's own rate, counted as one interval of running
/// time so that a headless run reports nominal efficiency.
fn advance(machine: &mut MachineState, step: u64, event_level: EventLevel) {
    let events = machine.tick(event_level);
    if machine.running {
        machine.record_running_time(machine.tick_interval());
    }
    for envelope in &events {
        match &envelope.event {
            Event::BoxCompleted { box_number, items } => println!(
                "*** {} completed box {box_number} ({items} items) at tick={step:04} ***",
                machine.name
            ),
            Event::ItemProduced { items_in_box } => println!(
                "    {} item {} -> box {} [{items_in_box}/{}]",
                machine.name, machine.items_produced, machine.current_box, machine.limit
            ),
            _ => {}
        }
    }
}

fn print_status(step: u64, machines: &[MachineState]) {
    let stats = filler_core::dashboard_stats(machines);
    println!(
        "[tick={step:04}]  active={}  boxes={}  items={}",
        stats.active_machines, stats.total_boxes, stats.total_items
    );
    for machine in machines {
        println!(
            "    {name:<12} box={box_no:4}  fill={fill:3}%  [{items:>5}/{limit}]  produced={produced}",
            name = machine.name,
            box_no = machine.current_box,
            fill = machine.fill_percentage(),
            items = machine.items_in_box,
            limit = machine.limit,
            produced = machine.items_produced,
        );
    }
}

fn print_reports(reports: &[MachineReport], json: bool) -> Result<()> {
    if json {
        let text = serde_json::to_string_pretty(reports).context("serializing summaries")?;
        println!("{text}");
        return Ok(());
    }
    for report in reports {
        println!(
            "{}: boxes={} items={} efficiency={}% simulated={:.1}s",
            report.name,
            report.summary.total_boxes,
            report.summary.total_items,
            report.summary.efficiency,
            report.simulated_seconds,
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            ticks,
            machines,
            machine,
            limit,
            cycle_time,
            print_every,
            event_level,
            metrics_out,
            metrics_every,
            json,
        } => {
            let defs = match machines {
                Some(path) => filler_world::load_machines(&path)?,
                None => filler_world::default_machines(),
            };
            let selected = select_machines(defs, machine.as_deref(), limit, cycle_time)?;
            let opts = RunOptions {
                ticks,
                print_every,
                event_level: match event_level.as_str() {
                    "debug" => EventLevel::Debug,
                    _ => EventLevel::Normal,
                },
                metrics_out,
                metrics_every,
                json,
            };
            let reports = run(selected, &opts)?;
            print_reports(&reports, opts.json)?;
        }
        Commands::Interval { limit, cycle_time } => {
            let def = MachineDef {
                id: filler_core::MachineId("interval".to_string()),
                name: String::new(),
                limit,
                cycle_time_minutes: cycle_time,
            };
            let interval = MachineState::new(&def).tick_interval();
            println!("{:.3} ms", interval.as_secs_f64() * 1000.0);
        }
    }
    Ok(())
}
