mod vecfile;

use clap::{Args, Parser, Subcommand};
use hnswflow_core::config;
use hnswflow_core::{load_graph, Engine, EngineConfig, InMemoryGraph, PipelineMode, SearchStats};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hnswflow", about = "Batch ANN search over a pre-built hierarchical graph")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every query in a file against a graph snapshot
    Search(SearchArgs),
    /// Print graph snapshot metadata
    Inspect {
        /// Graph snapshot written by `save_graph`
        #[arg(long)]
        graph: PathBuf,
    },
}

#[derive(Args)]
struct SearchArgs {
    /// Graph snapshot written by `save_graph`
    #[arg(long)]
    graph: PathBuf,

    /// Query vectors (u32 count, u32 dim, f32 LE payload)
    #[arg(long)]
    queries: PathBuf,

    /// Ground-truth neighbor ids (u32 count, u32 k, i32 LE payload)
    #[arg(long)]
    ground_truth: Option<PathBuf>,

    /// Results per query
    #[arg(long, default_value_t = config::DEFAULT_EF)]
    ef: usize,

    /// Bounded candidate queue capacity
    #[arg(long, default_value_t = config::DEFAULT_CANDIDATE_CAPACITY)]
    candidate_capacity: usize,

    /// Visited filter buckets
    #[arg(long, default_value_t = config::DEFAULT_BLOOM_BUCKETS)]
    bloom_buckets: usize,

    /// Visited filter hash functions
    #[arg(long, default_value_t = config::DEFAULT_BLOOM_HASHES)]
    bloom_hashes: usize,

    /// Visited filter base seed
    #[arg(long, default_value_t = config::DEFAULT_BLOOM_SEED)]
    seed: u32,

    /// Candidates per in-flight batch
    #[arg(long, default_value_t = config::DEFAULT_MAX_CAND_BATCH_SIZE)]
    batch: usize,

    /// Batches in flight at once
    #[arg(long, default_value_t = config::DEFAULT_MAX_ASYNC_STAGES)]
    stages: usize,

    /// Run pipeline stages on their own threads
    #[arg(long, default_value_t = false)]
    threaded: bool,

    /// Query channels: independent pipelines that answer slices of the query file in parallel
    #[arg(long, default_value_t = config::DEFAULT_NUM_CHANNELS)]
    channels: usize,

    /// Compute threads each threaded pipeline splits distance work over
    #[arg(long, default_value_t = config::DEFAULT_COMPUTE_CHANNELS)]
    compute_channels: usize,

    /// Recall cut-off when ground truth is given
    #[arg(long, default_value_t = 10)]
    k: usize,

    /// Print one JSON line per query instead of a summary table
    #[arg(long, default_value_t = false)]
    json: bool,
}

impl SearchArgs {
    fn engine_config(&self, graph: &InMemoryGraph) -> Result<EngineConfig, hnswflow_core::EngineError> {
        let mut config = graph.engine_config()?;
        config.ef = self.ef;
        config.candidate_capacity = self.candidate_capacity;
        config.visited_filter.bucket_count = self.bloom_buckets;
        config.visited_filter.hash_count = self.bloom_hashes;
        config.visited_filter.seed = self.seed;
        config.max_cand_batch_size = self.batch;
        config.max_async_stages = self.stages;
        config.num_channels = self.channels;
        config.compute_channels = self.compute_channels;
        config.pipeline_mode = if self.threaded {
            PipelineMode::Threaded
        } else {
            PipelineMode::Inline
        };
        Ok(config)
    }
}

#[derive(Serialize)]
struct QueryReport<'a> {
    query: usize,
    neighbors: &'a [(u32, f32)],
    stats: SearchStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    recall: Option<f64>,
}

#[derive(Serialize)]
struct Summary {
    queries: usize,
    failed: usize,
    elapsed_secs: f64,
    qps: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    mean_recall: Option<f64>,
    mean_base_hops: f64,
    mean_evaluated: f64,
}

#[derive(Serialize)]
struct GraphInfo {
    nodes: usize,
    dimension: usize,
    levels: usize,
    entry_point: Option<u32>,
    nodes_per_level: Vec<usize>,
    mean_base_degree: f64,
}

fn run_search(args: &SearchArgs) -> Result<(), Box<dyn std::error::Error>> {
    let graph = Arc::new(load_graph(&args.graph)?);
    let (dim, queries) = vecfile::read_fvecs(&args.queries)?;
    if dim != graph.dimension {
        return Err(format!(
            "query dimension {} does not match graph dimension {}",
            dim, graph.dimension
        )
        .into());
    }
    let ground_truth = match &args.ground_truth {
        Some(path) => {
            let (gt_k, truth) = vecfile::read_ground_truth(path)?;
            if gt_k < args.k {
                tracing::warn!("ground truth has {} ids per query, recall@{} is computed over {}", gt_k, args.k, gt_k);
            }
            if truth.len() < queries.len() {
                return Err(format!(
                    "ground truth covers {} queries, query file has {}",
                    truth.len(),
                    queries.len()
                )
                .into());
            }
            Some(truth)
        }
        None => None,
    };

    let config = args.engine_config(&graph)?;
    let engine = Engine::new(Arc::clone(&graph), config)?;
    tracing::info!("Running {} queries", queries.len());

    let mut failed = 0usize;
    let mut recall_sum = 0.0f64;
    let mut base_hops = 0usize;
    let mut evaluated = 0usize;
    let t0 = Instant::now();
    let results = engine.search_batch(&queries);
    let elapsed = t0.elapsed().as_secs_f64();

    for (qi, result) in results.into_iter().enumerate() {
        let out = match result {
            Ok(out) => out,
            Err(e) => {
                tracing::warn!("query {} failed: {}", qi, e);
                failed += 1;
                continue;
            }
        };
        let recall = ground_truth
            .as_ref()
            .map(|truth| vecfile::recall_at_k(&out.ids(), &truth[qi], args.k));
        recall_sum += recall.unwrap_or(0.0);
        base_hops += out.stats.base_hops;
        evaluated += out.stats.evaluated;
        if args.json {
            let report = QueryReport {
                query: qi,
                neighbors: &out.neighbors,
                stats: out.stats,
                recall,
            };
            println!("{}", serde_json::to_string(&report)?);
        }
    }

    let answered = (queries.len() - failed).max(1) as f64;
    let summary = Summary {
        queries: queries.len(),
        failed,
        elapsed_secs: elapsed,
        qps: queries.len() as f64 / elapsed.max(f64::EPSILON),
        mean_recall: ground_truth.as_ref().map(|_| recall_sum / answered),
        mean_base_hops: base_hops as f64 / answered,
        mean_evaluated: evaluated as f64 / answered,
    };
    if args.json {
        println!("{}", serde_json::to_string(&summary)?);
    } else {
        println!("queries      {}", summary.queries);
        println!("failed       {}", summary.failed);
        println!("elapsed      {:.3}s", summary.elapsed_secs);
        println!("qps          {:.1}", summary.qps);
        if let Some(recall) = summary.mean_recall {
            println!("recall@{:<5} {:.4}", args.k, recall);
        }
        println!("base hops    {:.1}", summary.mean_base_hops);
        println!("evaluated    {:.1}", summary.mean_evaluated);
    }
    Ok(())
}

fn graph_info(graph: &InMemoryGraph) -> GraphInfo {
    let mut nodes_per_level = vec![0usize; graph.max_level];
    let mut base_degree = 0usize;
    for node in 0..graph.node_count() as u32 {
        for count in nodes_per_level.iter_mut().take(graph.node_levels(node)) {
            *count += 1;
        }
        base_degree += graph.links(node, 0).len();
    }
    GraphInfo {
        nodes: graph.node_count(),
        dimension: graph.dimension,
        levels: graph.max_level,
        entry_point: graph.entry_point,
        nodes_per_level,
        mean_base_degree: base_degree as f64 / graph.node_count().max(1) as f64,
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .json()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("hnswflow_core=info".parse()?))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Search(args) => run_search(&args),
        Command::Inspect { graph } => {
            let graph = load_graph(&graph)?;
            println!("{}", serde_json::to_string_pretty(&graph_info(&graph))?);
            Ok(())
        }
    }
}
