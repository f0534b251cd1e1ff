//! HTTP server binary for edgequake-explain.
//!
//! A thin shim over the library crate that maps flags and environment
//! variables to an `Explainer` and serves it with axum.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_explain::backend::{ChatBackend, OpenAiBackend, ProviderBackend};
use edgequake_explain::cache::{Cache, MemoryCache, DEFAULT_MAX_ENTRIES};
use edgequake_explain::pipeline::render::{PageRasterizer, PdfiumRasterizer, UnavailableRasterizer};
use edgequake_explain::server::{router, ServerOptions};
use edgequake_explain::{ConverterCommands, ExplainConfig, Explainer};
use std::future::IntoFuture;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"BACKENDS:
  By default requests go to an OpenAI-compatible endpoint (OPENAI_BASE_URL).
  --provider <name> switches to an edgequake-llm provider instead
  (openai, anthropic, gemini, ollama, ...); --provider auto detects one
  from the usual API-key environment variables.

CONVERTERS:
  bpmn   bpmn-to-image <in>:<out> --scale 0.7
  drawio drawio -x -f jpg -o <out> <in>
  svg    inkscape <in> --export-type=png --export-filename=<out>

PDF:
  pdfium is loaded from PDFIUM_LIB_PATH or the system library path. When it
  cannot be loaded the server still starts; PDF requests then fail with 500.
"#;

/// Explain diagrams with Vision LLMs over HTTP.
#[derive(Parser, Debug)]
#[command(
    name = "explain-server",
    version,
    about = "Explain diagrams (images, BPMN, draw.io, SVG, text, PDF) with Vision LLMs",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Listen port.
    #[arg(long, env = "SERVER_PORT", default_value_t = 8080)]
    port: u16,

    /// Listen address.
    #[arg(long, env = "SERVER_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Per-request timeout in seconds (also bounds SSE streams).
    #[arg(long, env = "SERVER_TIMEOUT_SECS", default_value_t = 120)]
    timeout: u64,

    /// Grace period for in-flight requests on shutdown, in seconds.
    #[arg(long, env = "SERVER_SHUTDOWN_TIMEOUT_SECS", default_value_t = 10)]
    shutdown_timeout: u64,

    /// Maximum concurrent requests.
    #[arg(long, env = "SERVER_THROTTLE_LIMIT", default_value_t = 50)]
    throttle_limit: usize,

    /// Maximum request body in MiB.
    #[arg(long, env = "SERVER_MAX_BODY_MB", default_value_t = 32)]
    max_body_mb: usize,

    /// OpenAI-compatible API root.
    #[arg(long, env = "OPENAI_BASE_URL", default_value = "http://localhost:8000/v1")]
    base_url: String,

    /// API key for the OpenAI-compatible endpoint.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Model ID sent with every request.
    #[arg(long, env = "OPENAI_MODEL", default_value = "default")]
    model: String,

    /// Use an edgequake-llm provider instead of the OpenAI-compatible endpoint.
    #[arg(long, env = "EXPLAIN_PROVIDER")]
    provider: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "EXPLAIN_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Rasterisation DPI for PDF pages.
    #[arg(long, env = "EXPLAIN_PAGE_DPI", default_value_t = 120,
          value_parser = clap::value_parser!(u32).range(36..=600))]
    page_dpi: u32,

    /// BPMN converter binary.
    #[arg(long, env = "BPMN_CONVERTER", default_value = "bpmn-to-image")]
    bpmn_converter: String,

    /// draw.io converter binary.
    #[arg(long, env = "DRAWIO_CONVERTER", default_value = "drawio")]
    drawio_converter: String,

    /// SVG converter binary.
    #[arg(long, env = "SVG_CONVERTER", default_value = "inkscape")]
    svg_converter: String,

    /// Directory containing the pdfium shared library.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib_path: Option<PathBuf>,

    /// Enable the response cache.
    #[arg(long, env = "CACHE_ENABLE")]
    cache: bool,

    /// Keep the cache in process memory instead of Redis.
    #[arg(long, env = "CACHE_IN_MEMORY")]
    cache_in_memory: bool,

    /// Entry cap for the in-memory cache.
    #[arg(long, env = "CACHE_MAX_ENTRIES", default_value_t = DEFAULT_MAX_ENTRIES)]
    cache_max_entries: usize,

    /// Redis address (host:port).
    #[arg(long, env = "REDIS_ADDR", default_value = "redis:6379")]
    redis_addr: String,

    /// Redis password.
    #[arg(long, env = "REDIS_PASSWORD", hide_env_values = true)]
    redis_password: Option<String>,

    /// Redis database index.
    #[arg(long, env = "REDIS_DB", default_value_t = 0)]
    redis_db: i64,

    /// Cache entry lifetime in seconds.
    #[arg(long, env = "REDIS_TTL_SECS", default_value_t = 600)]
    cache_ttl: u64,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "EXPLAIN_VERBOSE")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Pipeline config ──────────────────────────────────────────────────
    let mut builder = ExplainConfig::builder()
        .model(cli.model.clone())
        .page_dpi(cli.page_dpi)
        .converters(ConverterCommands {
            bpmn: cli.bpmn_converter.clone(),
            drawio: cli.drawio_converter.clone(),
            svg: cli.svg_converter.clone(),
        });
    if let Some(ref path) = cli.system_prompt {
        let prompt = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read system prompt: {}", path.display()))?;
        builder = builder.system_prompt(prompt);
    }
    let config = builder.build().context("Invalid pipeline configuration")?;

    // ── Collaborators ────────────────────────────────────────────────────
    let timeout = Duration::from_secs(cli.timeout);
    let backend = build_backend(&cli, timeout)?;
    let rasterizer = build_rasterizer(&cli);

    let mut explainer = Explainer::builder(backend)
        .config(config)
        .rasterizer(rasterizer);
    if let Some(cache) = build_cache(&cli).await {
        explainer = explainer.cache(cache);
    }
    let explainer = explainer.build();

    // ── Serve ────────────────────────────────────────────────────────────
    let app = router(
        explainer,
        ServerOptions {
            request_timeout: timeout,
            concurrency_limit: cli.throttle_limit,
            max_body_bytes: cli.max_body_mb * 1024 * 1024,
        },
    );

    let addr = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("explain-server listening on {addr}");

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutdown signal received");
                    shutdown.cancel();
                }
                Err(e) => warn!("Cannot listen for shutdown signal: {e}"),
            }
        }
    });

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .into_future();
    let shutdown_timeout = Duration::from_secs(cli.shutdown_timeout);

    tokio::select! {
        result = server => result.context("Server error")?,
        _ = async {
            shutdown.cancelled().await;
            tokio::time::sleep(shutdown_timeout).await;
        } => warn!("In-flight requests still running after {:?}; exiting", shutdown_timeout),
    }

    info!("explain-server stopped");
    Ok(())
}

fn build_backend(cli: &Cli, timeout: Duration) -> Result<Arc<dyn ChatBackend>> {
    match cli.provider.as_deref() {
        None | Some("") => {
            info!("Backend: OpenAI-compatible endpoint at {}", cli.base_url);
            let backend = OpenAiBackend::with_timeout(&cli.base_url, cli.api_key.clone(), Some(timeout))
                .context("Failed to create HTTP backend")?;
            Ok(Arc::new(backend))
        }
        Some("auto") => {
            info!("Backend: edgequake-llm provider (auto-detected)");
            Ok(Arc::new(ProviderBackend::from_env().context("Provider auto-detection failed")?))
        }
        Some(name) => {
            info!("Backend: edgequake-llm provider '{}' / {}", name, cli.model);
            Ok(Arc::new(
                ProviderBackend::named(name, &cli.model).context("Failed to create provider")?,
            ))
        }
    }
}

fn build_rasterizer(cli: &Cli) -> Arc<dyn PageRasterizer> {
    match PdfiumRasterizer::bind(cli.pdfium_lib_path.as_deref()) {
        Ok(rasterizer) => {
            info!("pdfium loaded; PDF requests enabled");
            Arc::new(rasterizer)
        }
        Err(e) => {
            warn!("{e}; PDF requests will fail");
            Arc::new(UnavailableRasterizer::new(e.to_string()))
        }
    }
}

async fn build_cache(cli: &Cli) -> Option<Arc<dyn Cache>> {
    if !cli.cache {
        return None;
    }
    let ttl = Duration::from_secs(cli.cache_ttl);
    if cli.cache_in_memory {
        info!(
            "Cache: in-memory (ttl {}s, max {} entries)",
            ttl.as_secs(),
            cli.cache_max_entries
        );
        return Some(Arc::new(
            MemoryCache::new(ttl).with_max_entries(cli.cache_max_entries),
        ));
    }
    redis_cache(cli, ttl).await
}

#[cfg(feature = "redis")]
async fn redis_cache(cli: &Cli, ttl: Duration) -> Option<Arc<dyn Cache>> {
    use edgequake_explain::cache::RedisCache;

    let info =
        match RedisCache::connection_info(&cli.redis_addr, cli.redis_password.as_deref(), cli.redis_db) {
            Ok(info) => info,
            Err(e) => {
                warn!("{e}; caching disabled");
                return None;
            }
        };
    match RedisCache::connect(info, ttl).await {
        Ok(cache) => Some(Arc::new(cache)),
        Err(e) => {
            warn!("Redis at {} unavailable ({}); caching disabled", cli.redis_addr, e);
            None
        }
    }
}

#[cfg(not(feature = "redis"))]
async fn redis_cache(cli: &Cli, ttl: Duration) -> Option<Arc<dyn Cache>> {
    warn!("Built without the `redis` feature; using the in-memory cache");
    Some(Arc::new(
        MemoryCache::new(ttl).with_max_entries(cli.cache_max_entries),
    ))
}
