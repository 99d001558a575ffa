//! CLI interface for building and querying nearest-neighbor indexes

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use nnsearch::matrix::{from_rows, parse_row};
use nnsearch::{
    log_verbosity, Algorithm, DistanceMetric, IndexHeader, IndexParams, Matrix, SearchParams,
    VectorIndex,
};

#[derive(Parser)]
#[command(name = "nnsearch")]
#[command(about = "Multi-algorithm nearest-neighbor search", long_about = None)]
struct Cli {
    /// Log verbosity: 0 = off, 2 = error, 3 = warn, 4 = info, 5 = debug
    #[arg(long, default_value_t = 3)]
    verbosity: i32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy)]
enum AlgorithmArg {
    Linear,
    Kdtree,
    Kmeans,
    Hnsw,
}

impl From<AlgorithmArg> for Algorithm {
    fn from(arg: AlgorithmArg) -> Self {
        match arg {
            AlgorithmArg::Linear => Algorithm::Linear,
            AlgorithmArg::Kdtree => Algorithm::KdTree,
            AlgorithmArg::Kmeans => Algorithm::KMeans,
            AlgorithmArg::Hnsw => Algorithm::Hnsw,
        }
    }
}

#[derive(ValueEnum, Clone, Copy)]
enum MetricArg {
    Euclidean,
    SquaredEuclidean,
    Manhattan,
    Cosine,
    Dot,
}

impl From<MetricArg> for DistanceMetric {
    fn from(arg: MetricArg) -> Self {
        match arg {
            MetricArg::Euclidean => DistanceMetric::Euclidean,
            MetricArg::SquaredEuclidean => DistanceMetric::SquaredEuclidean,
            MetricArg::Manhattan => DistanceMetric::Manhattan,
            MetricArg::Cosine => DistanceMetric::Cosine,
            MetricArg::Dot => DistanceMetric::DotProduct,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Build an index from a JSON array of vectors and save it
    Build {
        /// JSON file holding an array of equally sized number arrays
        #[arg(long)]
        input: PathBuf,
        /// Where to write the index
        #[arg(long)]
        output: PathBuf,
        #[arg(long, value_enum, default_value = "kdtree")]
        algorithm: AlgorithmArg,
        /// JSON object of index parameters; its "algorithm" key overrides --algorithm
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, value_enum, default_value = "euclidean")]
        metric: MetricArg,
    },
    /// Find the k nearest neighbors of a query vector
    Search {
        #[arg(long)]
        index: PathBuf,
        /// Query vector as comma-separated values (e.g., "1.0,2.0,3.0")
        #[arg(long)]
        query: String,
        /// Number of results to return
        #[arg(short, long, default_value = "5")]
        k: usize,
        /// Candidates an approximate backend may examine
        #[arg(long, conflicts_with = "exact")]
        checks: Option<usize>,
        /// Search exhaustively where the backend supports it
        #[arg(long)]
        exact: bool,
        #[arg(long, value_enum, default_value = "euclidean")]
        metric: MetricArg,
    },
    /// Find every vector within a radius of a query vector
    Radius {
        #[arg(long)]
        index: PathBuf,
        /// Query vector as comma-separated values
        #[arg(long)]
        query: String,
        /// Radius in the metric's own units
        #[arg(long)]
        radius: f32,
        #[arg(long)]
        max_neighbors: Option<usize>,
        #[arg(long, value_enum, default_value = "euclidean")]
        metric: MetricArg,
    },
    /// Print the header of a saved index
    Info {
        #[arg(long)]
        index: PathBuf,
    },
}

fn read_dataset(path: &Path) -> Result<Matrix<f32>> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let rows: Vec<Vec<f32>> =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(from_rows(rows)?)
}

fn read_query(query: &str) -> Result<Matrix<f32>> {
    Ok(from_rows(vec![parse_row(query)?])?)
}

fn print_neighbors(ids: &[usize], dists: &[f32]) {
    if ids.is_empty() {
        println!("No results found");
        return;
    }
    println!("Top {} results:", ids.len());
    for (i, (id, dist)) in ids.iter().zip(dists).enumerate() {
        println!("{}. {} (distance: {:.4})", i + 1, id, dist);
    }
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Build {
            input,
            output,
            algorithm,
            config,
            metric,
        } => {
            let dataset = read_dataset(&input)?;
            let mut params = match config {
                Some(path) => {
                    let text = fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    IndexParams::from_json_str(&text)?
                }
                None => IndexParams::new(),
            };
            if !params.contains(nnsearch::params::ALGORITHM_KEY) {
                params.set(nnsearch::params::ALGORITHM_KEY, Algorithm::from(algorithm));
            }

            let index = VectorIndex::with_dataset(dataset, params, metric.into())?;
            index.build()?;
            index.save(&output)?;
            println!(
                "Built {} index over {} vectors of dimension {} -> {}",
                index.algorithm(),
                index.size(),
                index.veclen(),
                output.display()
            );
        }
        Commands::Search {
            index,
            query,
            k,
            checks,
            exact,
            metric,
        } => {
            let index = VectorIndex::<f32>::load(&index, metric.into())?;
            let params = match (exact, checks) {
                (true, _) => SearchParams::exact(),
                (false, Some(checks)) => SearchParams::default().with_checks(checks),
                (false, None) => SearchParams::default(),
            };

            let mut ids: Vec<Vec<usize>> = Vec::new();
            let mut dists = Vec::new();
            index.knn_search_vec(read_query(&query)?.view(), &mut ids, &mut dists, k, &params)?;
            print_neighbors(&ids[0], &dists[0]);
        }
        Commands::Radius {
            index,
            query,
            radius,
            max_neighbors,
            metric,
        } => {
            let index = VectorIndex::<f32>::load(&index, metric.into())?;
            let params = SearchParams::exact();

            let mut ids: Vec<Vec<usize>> = Vec::new();
            let mut dists = Vec::new();
            index.radius_search_vec(read_query(&query)?.view(), &mut ids, &mut dists, radius, &params)?;
            let shown = max_neighbors.unwrap_or(usize::MAX).min(ids[0].len());
            print_neighbors(&ids[0][..shown], &dists[0][..shown]);
        }
        Commands::Info { index } => {
            let header = IndexHeader::peek(&index)?;
            println!("Index: {}", index.display());
            println!("  format version: {}", header.version);
            println!("  element type:   {}", header.element_type);
            println!("  algorithm:      {}", header.algorithm);
            println!("  rows:           {}", header.rows);
            println!("  dimension:      {}", header.veclen);
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    log_verbosity(cli.verbosity);
    run(cli.command)
}
