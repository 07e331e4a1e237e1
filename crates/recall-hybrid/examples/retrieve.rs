use std::env;
use std::sync::Arc;

use recall_core::{logging::init_tracing, Chunk, Config, EmbeddingProvider, Filter, Query};
use recall_embed::{resolve_model_dir, BgeM3Embedder, HashEmbedder};
use recall_hybrid::RetrievalEngine;

// Index a handful of chunks in memory and run one hybrid query twice.
// Usage:
//   cargo run -p recall-hybrid --example retrieve -- "vacation days" \
//     [--top-k 2] [--department hr] [--model]
//
// Without --model a hashing embedder stands in for BGE-M3.

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args: Vec<String> = env::args().skip(1).collect();
    let mut text = String::new();
    let mut top_k: usize = 2;
    let mut department: Option<String> = None;
    let mut use_model = false;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--top-k" => {
                let Some(v) = args.get(i + 1) else { anyhow::bail!("--top-k requires a number") };
                top_k = v.parse()?;
                i += 2;
            }
            "--department" => {
                let Some(v) = args.get(i + 1) else { anyhow::bail!("--department requires a value") };
                department = Some(v.clone());
                i += 2;
            }
            "--model" => {
                use_model = true;
                i += 1;
            }
            s if s.starts_with('-') => anyhow::bail!("unknown flag: {s}"),
            s => {
                if text.is_empty() {
                    text = s.to_string();
                }
                i += 1;
            }
        }
    }
    if text.is_empty() {
        text = "vacation days".to_string();
    }

    let settings = Config::load()?.settings()?;
    let provider: Arc<dyn EmbeddingProvider> = if use_model {
        Arc::new(BgeM3Embedder::load(&resolve_model_dir()?)?)
    } else {
        Arc::new(HashEmbedder::new(256))
    };

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let engine = RetrievalEngine::open(provider, settings)?;
        let version = engine
            .upsert_chunks(vec![
                Chunk::new("A", "vacation policy 15 days").with_metadata("department", "hr"),
                Chunk::new("B", "remote work 3 days").with_metadata("department", "it"),
                Chunk::new("C", "benefits overview").with_metadata("department", "hr"),
            ])
            .await?;
        println!("Indexed {} chunks at {version}\n", engine.corpus().len());

        let mut query = Query::new(text.as_str(), top_k).with_weights(0.7, 0.3);
        if let Some(dept) = department {
            query = query.with_filter(Filter::new().equals("department", dept));
        }

        for round in 1..=2 {
            let response = engine.retrieve(query.clone()).await?;
            println!(
                "Round {round}: cache_hit={} tier={:?} degraded={} total={:?}",
                response.cache_hit, response.cache_tier, response.degraded, response.latency.total
            );
            for (rank, r) in response.results.iter().enumerate() {
                let c = &r.candidate;
                println!(
                    "{:>2}. {} fused={:.3} rerank={:?} lexical={:?} vector={:?}\n    {}",
                    rank + 1,
                    c.chunk_id,
                    c.fused_score,
                    c.rerank_score,
                    c.raw_lexical_score,
                    c.raw_vector_score,
                    r.chunk.text
                );
            }
            let stages: Vec<String> = response.stages.iter().map(ToString::to_string).collect();
            println!("    stages: {}\n", stages.join(" -> "));
        }
        let stats = engine.stats();
        println!(
            "requests={} local_hits={} shared_hits={} misses={}",
            stats.requests, stats.local_hits, stats.shared_hits, stats.misses
        );
        anyhow::Ok(())
    })
}
