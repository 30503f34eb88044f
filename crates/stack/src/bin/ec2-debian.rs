//! ec2-debian CLI - synthesize the Debian web host stack.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ec2_debian_stack::assembly;
use ec2_debian_stack::config::CONFIG_FILE;
use ec2_debian_stack::{ContextCache, Ec2DebianStack, StackConfig, SynthesizedStack};

/// ec2-debian CLI - CloudFormation synthesis for a Debian EC2 web host.
#[derive(Parser)]
#[command(name = "ec2-debian")]
#[command(about = "Synthesize the Debian EC2 web host stack")]
struct Cli {
    /// Stack configuration file.
    #[arg(long, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Context value override (repeatable), e.g. `-c vpc_id=vpc-0abc`.
    #[arg(short = 'c', long = "context", value_name = "KEY=VALUE")]
    context: Vec<String>,

    /// Target account. Overrides `CDK_DEFAULT_ACCOUNT` and the config file.
    #[arg(long)]
    account: Option<String>,

    /// Target region. Overrides `CDK_DEFAULT_REGION` and the config file.
    #[arg(long)]
    region: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the cloud assembly and print the template.
    Synth {
        /// Output directory (defaults to the configured one).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Do not print the template.
        #[arg(short, long, default_value = "false")]
        quiet: bool,
    },

    /// List the stacks in this app.
    List,

    /// List the staged files and where they are uploaded.
    Assets,

    /// Print the first-boot script.
    Script,
}

fn synthesize(config: &StackConfig) -> Result<SynthesizedStack> {
    let inputs = config.inputs().context("Failed to read stack inputs")?;
    let cache = ContextCache::load(&config.context_file).context("Failed to load context cache")?;
    let stack = Ec2DebianStack::new(&config.stack_name, config.props());
    stack
        .synthesize(inputs.as_ref(), &cache)
        .with_context(|| format!("Failed to synthesize {}", config.stack_name))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = StackConfig::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?
        .with_context_overrides(&cli.context)
        .context("Invalid --context value")?
        .with_process_env()
        .with_env(cli.account, cli.region);

    match cli.command {
        Commands::Synth { output, quiet } => {
            let synthesized = synthesize(&config)?;
            let out_dir = output.unwrap_or_else(|| config.output_dir.clone());
            let manifest = assembly::write(&synthesized, &out_dir)
                .with_context(|| format!("Failed to write assembly to {}", out_dir.display()))?;

            if !quiet {
                print!("{}", synthesized.template.to_json_pretty()?);
            }

            if !manifest.missing.is_empty() {
                eprintln!(
                    "\n⚠️  {} lookup(s) missing from {}; placeholder values were used:",
                    manifest.missing.len(),
                    config.context_file.display()
                );
                for missing in &manifest.missing {
                    eprintln!("   {}", missing.key);
                }
            }
        }

        Commands::List => {
            println!("{}", config.stack_name);
        }

        Commands::Assets => {
            let synthesized = synthesize(&config)?;
            if synthesized.assets.is_empty() {
                println!("No assets (stack has no inputs)");
                return Ok(());
            }

            println!("\n{:<14} {:<32} {:<}", "ID", "SOURCE", "DESTINATION");
            println!("{}", "-".repeat(90));
            for asset in &synthesized.assets {
                println!(
                    "{:<14} {:<32} {}",
                    asset.id(),
                    asset.source_path().display(),
                    asset.s3_url()
                );
            }
        }

        Commands::Script => {
            let synthesized = synthesize(&config)?;
            match synthesized.boot_script {
                Some(script) => println!("{}", script.render()),
                None => println!("No boot script (stack has no inputs)"),
            }
        }
    }

    Ok(())
}
