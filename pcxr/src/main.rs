use clap::{ArgGroup, Parser};
use log::info;
use pcxr_lib::buffer::HostBuffer;
use pcxr_lib::common::{EngineConfig, DEFAULT_READ_AHEAD, DEFAULT_THREADS_PER_GROUP};
use pcxr_lib::edit::{class_histogram, export_selected, prune, save_pruned, save_selected};
use pcxr_lib::error::PcxrError;
use pcxr_lib::kernels::{EditKernel, EditOp, HostKernels};
use pcxr_lib::query::{NearestPointQuery, QueryScope};
use pcxr_lib::reader::read_cloud;
use pcxr_lib::worker::IoWorkers;
use pcxr_lib::{save_cloud, upload_cloud, upload_cloud_async, Header, PointCloud};
use std::error::Error;
use std::path::PathBuf;
use std::process;
use std::time::Instant;

type CliResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

const BOUNDS_REACH: f32 = 1.0e6;

#[derive(Parser, Debug)]
#[command(
    name = "PCXR Tool",
    version = "1.0",
    author = "Denis Avvakumov",
    about = "Inspects, queries and edits PCXR point clouds"
)]
#[command(group(
    ArgGroup::new("mode").required(true).args(&["info", "nearest", "classes", "prune", "export_selected", "import_las"])
))]
struct Cli {
    #[arg(long = "info", help = "Print the header and estimated bounds.")]
    info: bool,

    #[arg(
        long = "nearest",
        value_name = "X,Y,Z",
        value_parser = parse_point,
        allow_hyphen_values = true,
        help = "Find the point closest to X,Y,Z."
    )]
    nearest: Option<[f32; 3]>,

    #[arg(
        short = 's',
        long = "selected",
        default_value = "false",
        help = "Restrict --nearest and --info to selected points."
    )]
    selected: bool,

    #[arg(long = "classes", help = "Print the per-class point count.")]
    classes: bool,

    #[arg(
        short = 'p',
        long = "prune",
        help = "Drop deleted points and write the rest to the output file."
    )]
    prune: bool,

    #[arg(
        long = "export-selected",
        help = "Write only the selected points to the output file."
    )]
    export_selected: bool,

    #[arg(
        long = "select-ids",
        value_name = "IDS",
        value_delimiter = ',',
        help = "Select the points with these ids before running the mode."
    )]
    select_ids: Vec<u32>,

    #[arg(
        long = "import-las",
        help = "Convert a LAS/LAZ input into a PCXR output file."
    )]
    import_las: bool,

    #[cfg_attr(not(feature = "las"), allow(dead_code))]
    #[arg(
        long = "invert-yz",
        default_value = "false",
        help = "Store the source Z axis as Y when importing."
    )]
    invert_yz: bool,

    #[arg(
        short = 'i',
        long = "input",
        value_name = "INPUT",
        required = true,
        help = "Path to the input file."
    )]
    input: PathBuf,

    #[arg(
        short = 'o',
        long = "output",
        value_name = "OUTPUT",
        help = "Path to the output file."
    )]
    output: Option<PathBuf>,

    #[arg(
        short = 'r',
        long = "read-ahead",
        value_name = "POINTS",
        default_value_t = DEFAULT_READ_AHEAD,
        help = "Points decoded per streaming refill."
    )]
    read_ahead: usize,

    #[arg(
        short = 't',
        long = "threads",
        value_name = "THREADS",
        default_value_t = DEFAULT_THREADS_PER_GROUP,
        help = "Threads per reduction group."
    )]
    threads: usize,

    #[arg(
        short = 'a',
        long = "async",
        default_value = "false",
        help = "Load, upload and save on the async runtime."
    )]
    async_mode: bool,
}

fn parse_point(s: &str) -> Result<[f32; 3], String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() != 3 {
        return Err(format!("expected X,Y,Z, got '{}'", s));
    }
    let mut point = [0.0f32; 3];
    for (slot, part) in point.iter_mut().zip(&parts) {
        *slot = part
            .parse()
            .map_err(|e| format!("invalid coordinate '{}': {}", part, e))?;
    }
    Ok(point)
}

#[cfg(feature = "las")]
fn import_las(cli: &Cli) -> CliResult<(Header, PointCloud)> {
    use pcxr_lib::source::{import_source, ImportOptions, LasSource};
    let mut source = LasSource::open(&cli.input)?;
    let options = ImportOptions {
        invert_yz: cli.invert_yz,
        ..ImportOptions::default()
    };
    Ok(import_source(&mut source, &options)?)
}

#[cfg(not(feature = "las"))]
fn import_las(_cli: &Cli) -> CliResult<(Header, PointCloud)> {
    eprintln!("Error: --import-las requires building with the 'las' feature.");
    process::exit(1);
}

fn require_output(cli: &Cli) -> PathBuf {
    cli.output.clone().unwrap_or_else(|| {
        eprintln!("Error: this mode writes a file, pass --output (-o).");
        process::exit(1);
    })
}

fn main() -> CliResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = EngineConfig {
        read_ahead: cli.read_ahead.max(1),
        threads_per_group: cli.threads.max(1),
        ..EngineConfig::default()
    };
    let scope = if cli.selected {
        QueryScope::Selected
    } else {
        QueryScope::All
    };
    let mode = if cli.async_mode {
        "Asynchronous"
    } else {
        "Synchronous"
    };
    println!("Mode: {} | Input: {}", mode, cli.input.display());

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let workers = IoWorkers::new();

    let start = Instant::now();

    if cli.import_las {
        let output = require_output(&cli);
        let (header, cloud) = import_las(&cli)?;
        let written = if cli.async_mode {
            rt.block_on(workers.save(
                output.clone(),
                header,
                cloud,
                config.write_buffer_capacity,
            ))?
        } else {
            save_cloud(&output, &header, &cloud, config.write_buffer_capacity)?
        };
        println!(
            "Imported {} points into '{}' in {} ms",
            written.point_count,
            output.display(),
            start.elapsed().as_millis()
        );
        return Ok(());
    }

    let (header, cloud) = if cli.async_mode {
        rt.block_on(workers.load(cli.input.clone(), config.read_ahead))
    } else {
        read_cloud(&cli.input, config.read_ahead)
    }
    .unwrap_or_else(|e| {
        eprintln!("Error reading input file {}: {}", cli.input.display(), e);
        process::exit(1);
    });

    let mut buffer = HostBuffer::new(cloud.len());
    let ready = if cli.async_mode {
        rt.block_on(upload_cloud_async(&cloud, &mut buffer, &config))?
    } else {
        upload_cloud(&cloud, &mut buffer, &config)?
    };
    info!(
        "Uploaded {} points in {} transfers",
        ready.points, ready.transfers
    );

    let kernels = HostKernels;
    if !cli.select_ids.is_empty() {
        kernels.apply(&mut buffer, &EditOp::SelectIds(cli.select_ids.clone()));
        info!(
            "Selected {} points by id",
            kernels.selected_indices(&buffer).len()
        );
    }
    let query = NearestPointQuery::new(&buffer, &kernels, config.threads_per_group);

    if cli.info {
        print_header(&header);
        match query.estimate_bounds(BOUNDS_REACH, scope) {
            Ok((min, max)) => println!("Estimated bounds: {:?} .. {:?}", min, max),
            Err(PcxrError::DegeneratePopulation { .. }) => println!("Estimated bounds: none"),
            Err(e) => return Err(e.into()),
        }
    } else if let Some(from) = cli.nearest {
        match query.find(from, scope) {
            Ok(nearest) => println!(
                "Nearest point: id {} at {:?}, distance {}",
                nearest.id, nearest.position, nearest.distance
            ),
            Err(PcxrError::DegeneratePopulation { .. }) => {
                eprintln!("No candidate points for the query.");
                process::exit(1);
            }
            Err(e) => return Err(e.into()),
        }
    } else if cli.classes {
        let histogram = class_histogram(&buffer, &kernels);
        let mut classes: Vec<_> = histogram.into_iter().collect();
        classes.sort_unstable();
        for (class, count) in classes {
            println!("Class {:>3}: {}", class, count);
        }
    } else if cli.prune {
        let output = require_output(&cli);
        let written = if cli.async_mode {
            let blob = prune(&buffer, &kernels);
            rt.block_on(workers.save_array(output.clone(), header, blob))?
        } else {
            save_pruned(&output, &header, &buffer, &kernels)?
        };
        println!(
            "Kept {} of {} points, wrote '{}'",
            written.point_count,
            header.point_count,
            output.display()
        );
    } else if cli.export_selected {
        let output = require_output(&cli);
        let written = if cli.async_mode {
            let blob = export_selected(&buffer, &kernels);
            rt.block_on(workers.save_array(output.clone(), header, blob))?
        } else {
            save_selected(&output, &header, &buffer, &kernels)?
        };
        println!(
            "Exported {} selected points to '{}'",
            written.point_count,
            output.display()
        );
    }

    println!("Time: {} ms", start.elapsed().as_millis());
    Ok(())
}

fn print_header(header: &Header) {
    println!("Version: {}", header.version);
    println!("Points: {}", header.point_count);
    println!(
        "Stride: {} floats | Data offset: {}",
        header.stride, header.offset_to_point_data
    );
    println!(
        "Start position: {:?} | Start rotation: {:?}",
        header.start_position, header.start_rotation
    );
    println!(
        "Stored bounds: {:?} .. {:?}",
        header.bounds_min, header.bounds_max
    );
    println!("Scale: {:?} | Offset: {:?}", header.scale, header.offset);
}
