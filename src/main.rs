mod cli;

use clipforge::config;

use anyhow::{Context, Result};
use cf_av::{build_catalog, FfprobeProber, Prober, Sandbox, ToolRegistry};
use cf_core::AssetCatalog;
use cf_llm::OpenAiCompatibleClient;
use cf_pipeline::{
    render_asset_line, tokenize, CandidateCommand, CommandValidator, GenerationParams,
    ProgressSender, RetryController, RunContext,
};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Per-invocation overrides of the `[pipeline]` section.
struct ComposeArgs {
    files: Vec<PathBuf>,
    prompt: String,
    model: Option<String>,
    top_p: Option<f32>,
    temperature: Option<f32>,
    max_attempts: Option<u32>,
    output_dir: Option<PathBuf>,
    keep_sandbox: bool,
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "clipforge=trace,cf_pipeline=debug,cf_llm=debug,cf_av=debug,cf_core=debug".to_string()
        } else {
            "clipforge=info,cf_pipeline=info,cf_llm=info,cf_av=info,cf_core=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Compose {
            files,
            prompt,
            model,
            top_p,
            temperature,
            max_attempts,
            output_dir,
            keep_sandbox,
            json,
        } => {
            let args = ComposeArgs {
                files,
                prompt,
                model,
                top_p,
                temperature,
                max_attempts,
                output_dir,
                keep_sandbox,
                json,
            };
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(compose(args, config_path))
        }
        Commands::Probe { files, json } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(probe_files(&files, json, config_path))
        }
        Commands::CheckTools => check_tools(config_path),
        Commands::Validate { command, files } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(validate_command(&command, &files, config_path))
        }
        Commands::Version => {
            println!("clipforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Cancellation token tripped by Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; cancelling");
            child.cancel();
        }
    });
    token
}

fn classify(e: cf_core::Error) -> anyhow::Error {
    let kind = e.kind();
    anyhow::Error::new(e).context(kind.to_string())
}

async fn compose(args: ComposeArgs, config_path: Option<&Path>) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    // CLI flags win over the config file for this invocation
    if let Some(dir) = args.output_dir {
        config.pipeline.output_dir = dir;
    }
    if let Some(n) = args.max_attempts {
        config.pipeline.max_attempts = n;
    }
    if args.keep_sandbox {
        config.pipeline.keep_sandbox = true;
    }
    config.check()?;

    let mut params = GenerationParams::from_config(&config);
    params.model = args.model;
    if let Some(top_p) = args.top_p {
        params.top_p = top_p;
    }
    if let Some(temperature) = args.temperature {
        params.temperature = temperature;
    }

    let registry = ToolRegistry::discover(&config.tools, &config.pipeline.executable);
    let prober = FfprobeProber::from_tool(registry.require("ffprobe")?);
    let catalog = build_catalog(&args.files, &prober, &config.limits)
        .await
        .map_err(classify)?;
    tracing::info!("Collected {} assets", catalog.len());

    let backend = Arc::new(OpenAiCompatibleClient::from_config(&config.backend)?);
    let controller = RetryController::new(&config, backend, &registry)?;

    let quiet = args.json;
    let ctx = RunContext::new()
        .with_cancellation(cancel_on_ctrl_c())
        .with_progress(ProgressSender::new(move |attempt, state| {
            if !quiet {
                eprintln!("[attempt {attempt}] {state}");
            }
        }));

    let composition = controller
        .run(
            &args.prompt,
            &catalog,
            &params,
            config.pipeline.max_attempts,
            &ctx,
        )
        .await
        .map_err(classify)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&composition)?);
    } else {
        println!("Output: {}", composition.output_path.display());
        println!();
        println!("{}", composition.explanation);
    }

    Ok(())
}

async fn probe_files(files: &[PathBuf], json: bool, config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let registry = ToolRegistry::discover(&config.tools, &config.pipeline.executable);
    let prober = FfprobeProber::from_tool(registry.require("ffprobe")?);

    let mut descriptors = Vec::new();
    for file in files {
        if !file.exists() {
            anyhow::bail!("File does not exist: {:?}", file);
        }
        if !prober.supports(file) {
            if !json {
                println!("{}: unsupported file type", file.display());
            }
            continue;
        }
        match prober.probe(file).await {
            Ok(Some(descriptor)) => {
                if !json {
                    println!("{}: {}", file.display(), render_asset_line(&descriptor));
                    println!("  Size: {} bytes", descriptor.size_bytes);
                }
                descriptors.push(descriptor);
            }
            Ok(None) => {
                if !json {
                    println!("{}: media kind not recognized", file.display());
                }
            }
            Err(e) => {
                if !json {
                    println!("{}: {}", file.display(), e);
                }
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&descriptors)?);
    }

    Ok(())
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    println!("Checking external tools...\n");

    let registry = ToolRegistry::discover(&config.tools, &config.pipeline.executable);
    let tools = registry.check_all();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version);
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install them to enable all features.");
    }

    Ok(())
}

async fn validate_command(command: &str, files: &[PathBuf], config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let pipeline = &config.pipeline;
    let registry = ToolRegistry::discover(&config.tools, &pipeline.executable);

    let candidate = CandidateCommand::extract(command, &pipeline.output_name).map_err(classify)?;
    // Reject quoting and executable problems before touching any tool
    tokenize(&candidate.command_text, &pipeline.executable)
        .map_err(classify)
        .context("Command rejected")?;

    let mut catalog = if files.is_empty() {
        AssetCatalog::new()
    } else {
        let prober = FfprobeProber::from_tool(registry.require("ffprobe")?);
        build_catalog(files, &prober, &config.limits)
            .await
            .map_err(classify)?
    };
    catalog.reserve(&pipeline.output_name);

    let tool = registry.require(&pipeline.executable)?.clone();
    let validator = CommandValidator::new(pipeline.executable.clone(), tool, pipeline.output_name.clone());

    let mut sandbox = Sandbox::create(pipeline.sandbox_root.as_deref())?;
    let staged = sandbox.stage(&catalog)?;
    for (name, path) in staged {
        tracing::debug!("Staged {} at {}", name, path.display());
    }

    let plan = validator
        .validate(&candidate, &sandbox, &cancel_on_ctrl_c())
        .await
        .map_err(classify)
        .context("Command rejected")?;

    println!("✓ Command accepted by the dry run");
    println!("  Would run: {}", plan.display_command());
    println!("  Inputs staged: {}", plan.input_files.len());

    Ok(())
}
