//! CLI for the AppOptics metrics API.
//!
//! Provides commands for listing metrics, reading and submitting
//! measurements, and inspecting spaces, alerts and annotations.

use std::time::Duration;

use appoptics::{
    AnnotationEvent, Connection, ConnectionConfig, MeasurementQuery, Params, Protocol,
    SubmitOptions, TagSet,
};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// appoptics: command-line client for the AppOptics metrics API.
#[derive(Parser)]
#[command(name = "appoptics", version, about)]
struct Cli {
    /// API token.
    #[arg(long, env = "APPOPTICS_TOKEN", hide_env_values = true)]
    token: String,

    /// API host.
    #[arg(long, env = "APPOPTICS_HOSTNAME", default_value = "api.appoptics.com")]
    hostname: String,

    /// `http` or `https`.
    #[arg(long, default_value = "https")]
    protocol: Protocol,

    /// Request timeout in seconds.
    #[arg(long, default_value = "10")]
    timeout: u64,

    /// Log requests and responses (repeat for bodies).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format.
    #[arg(long, default_value = "text", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// List metric definitions.
    Metrics {
        /// Only metrics whose name contains this string.
        #[arg(long)]
        name: Option<String>,
    },

    /// Show one gauge definition.
    Get {
        /// Metric name.
        name: String,
    },

    /// Read measurements of a metric.
    Measurements {
        /// Metric name.
        name: String,

        /// Time range to read, counting back from now (e.g. "1h", "30m", "7d").
        #[arg(long, default_value = "1h")]
        range: String,

        /// Resolution in seconds.
        #[arg(long)]
        resolution: Option<u64>,

        /// Tag filter as key=value; may be repeated.
        #[arg(long = "tag", value_parser = parse_tag)]
        tags: Vec<(String, String)>,
    },

    /// Submit one measurement.
    Submit {
        /// Metric name.
        name: String,

        /// Measured value.
        value: f64,

        /// Tag as key=value; may be repeated. At least one is required.
        #[arg(long = "tag", value_parser = parse_tag, required = true)]
        tags: Vec<(String, String)>,

        /// Measurement time, epoch seconds.
        #[arg(long)]
        time: Option<i64>,
    },

    /// List spaces.
    Spaces,

    /// List alerts.
    Alerts,

    /// Post an event to an annotation stream.
    Annotate {
        /// Stream name.
        stream: String,

        /// Event title.
        title: String,

        /// Event description.
        #[arg(long)]
        description: Option<String>,
    },
}

/// Output format for command results.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// One line per entity.
    Text,
    /// Pretty-printed JSON.
    Json,
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = connect(&cli).and_then(|mut conn| run(&mut conn, cli.command, &cli.format));

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "appoptics=info",
        _ => "appoptics=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn connect(cli: &Cli) -> Result<Connection, Box<dyn std::error::Error>> {
    let config = ConnectionConfig::new(cli.token.clone())
        .with_hostname(cli.hostname.clone())
        .with_protocol(cli.protocol)
        .with_timeout(Duration::from_secs(cli.timeout));
    debug!(hostname = %cli.hostname, protocol = %cli.protocol, "connecting");
    Ok(Connection::new(config)?)
}

fn run(conn: &mut Connection, command: Commands, format: &OutputFormat) -> CliResult {
    match command {
        Commands::Metrics { name } => cmd_metrics(conn, name, format),
        Commands::Get { name } => cmd_get(conn, &name),
        Commands::Measurements {
            name,
            range,
            resolution,
            tags,
        } => cmd_measurements(conn, &name, &range, resolution, tags, format),
        Commands::Submit {
            name,
            value,
            tags,
            time,
        } => cmd_submit(conn, &name, value, tags, time),
        Commands::Spaces => cmd_spaces(conn, format),
        Commands::Alerts => cmd_alerts(conn, format),
        Commands::Annotate {
            stream,
            title,
            description,
        } => cmd_annotate(conn, &stream, title, description),
    }
}

/// Implements `appoptics metrics`.
fn cmd_metrics(conn: &mut Connection, name: Option<String>, format: &OutputFormat) -> CliResult {
    let mut params = Params::new();
    if let Some(name) = name {
        params.insert("name".to_string(), name.into());
    }

    let mut metrics = Vec::new();
    for metric in conn.list_all_metrics(params) {
        metrics.push(metric?);
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&metrics)?),
        OutputFormat::Text => {
            for metric in &metrics {
                println!("{}\t{}", metric.kind(), metric.name());
            }
            println!();
            println!("{} metrics", metrics.len());
        }
    }
    Ok(())
}

/// Implements `appoptics get <name>`.
fn cmd_get(conn: &mut Connection, name: &str) -> CliResult {
    let info = conn.get_metric(name, Params::new())?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

/// Implements `appoptics measurements <name>`.
fn cmd_measurements(
    conn: &mut Connection,
    name: &str,
    range: &str,
    resolution: Option<u64>,
    tags: Vec<(String, String)>,
    format: &OutputFormat,
) -> CliResult {
    let mut query = MeasurementQuery::last(parse_duration(range)?);
    if let Some(resolution) = resolution {
        query = query.with_resolution(resolution);
    }
    if !tags.is_empty() {
        query = query.with_tags(tags.into_iter().collect());
    }

    let data = conn.get_measurements(name, query)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&data)?),
        OutputFormat::Text => {
            for series in &data.series {
                let tags: Vec<String> = series.tags.iter().map(|(k, v)| format!("{k}={v}")).collect();
                println!("# {}", tags.join(","));
                for point in &series.measurements {
                    match point.value {
                        Some(value) => println!("{},{value}", point.time),
                        None => println!("{},", point.time),
                    }
                }
            }
        }
    }
    Ok(())
}

/// Implements `appoptics submit <name> <value>`.
fn cmd_submit(
    conn: &mut Connection,
    name: &str,
    value: f64,
    tags: Vec<(String, String)>,
    time: Option<i64>,
) -> CliResult {
    let tags: TagSet = tags.into_iter().collect();
    let mut options = SubmitOptions::new().with_tags(tags);
    if let Some(time) = time {
        options = options.at(time);
    }
    conn.submit(name, value, options)?;
    println!("Submitted {name}={value}");
    Ok(())
}

/// Implements `appoptics spaces`.
fn cmd_spaces(conn: &mut Connection, format: &OutputFormat) -> CliResult {
    let mut spaces = Vec::new();
    for space in conn.list_spaces(Params::new()) {
        spaces.push(space?);
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&spaces)?),
        OutputFormat::Text => {
            for space in &spaces {
                println!("{}\t{}", space.id, space.name);
            }
        }
    }
    Ok(())
}

/// Implements `appoptics alerts`.
fn cmd_alerts(conn: &mut Connection, format: &OutputFormat) -> CliResult {
    let mut alerts = Vec::new();
    for alert in conn.list_alerts(Params::new()) {
        alerts.push(alert?);
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&alerts)?),
        OutputFormat::Text => {
            for alert in &alerts {
                let state = if alert.active { "active" } else { "disabled" };
                let id = alert.id.map_or_else(|| "-".to_string(), |id| id.to_string());
                println!("{id}\t{state}\t{}", alert.name);
            }
        }
    }
    Ok(())
}

/// Implements `appoptics annotate <stream> <title>`.
fn cmd_annotate(
    conn: &mut Connection,
    stream: &str,
    title: String,
    description: Option<String>,
) -> CliResult {
    let mut event = AnnotationEvent::titled(title);
    event.description = description;
    let created = conn.post_annotation(stream, &event)?;
    println!("{}", serde_json::to_string_pretty(&created)?);
    Ok(())
}

/// Parses a `key=value` tag argument.
fn parse_tag(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{s}'")),
    }
}

/// Parses a duration string like "1h", "30m", "7d" into seconds.
fn parse_duration(s: &str) -> Result<u64, Box<dyn std::error::Error>> {
    let s = s.trim();
    let Some((split, unit)) = s.char_indices().last() else {
        return Err("Empty duration string".into());
    };
    let num: u64 = s[..split].parse()?;

    let scale = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3600,
        'd' => 86400,
        _ => return Err(format!("Unknown duration unit: '{unit}'. Use s, m, h, or d.").into()),
    };

    num.checked_mul(scale)
        .ok_or_else(|| format!("Duration too large: '{s}'").into())
}
