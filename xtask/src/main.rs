use anyhow::{Context, Result};
use clap::Parser;
use std::process::Command;

#[derive(Parser)]
struct Args {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Parser)]
enum Cmd {
    /// Compile the TypeScript agent into the script gxpc loads at startup
    BuildAgent {
        #[arg(long, default_value = "gxpc/agent/script.ts")]
        source: String,
        #[arg(long, default_value = "gxpc/agent/script.js")]
        output: String,
        /// Keep source maps and skip compression
        #[arg(long)]
        debug: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Cmd::BuildAgent { source, output, debug } => build_agent(&source, &output, debug)?,
    }

    Ok(())
}

fn build_agent(source: &str, output: &str, debug: bool) -> Result<()> {
    // frida-compile bundles the frida-objc-bridge import into a single script
    let mut cmd = Command::new("npx");
    cmd.arg("frida-compile").arg(source).arg("-o").arg(output);
    if !debug {
        cmd.arg("-c").arg("-S");
    }

    let status = cmd.status().context("Failed to run frida-compile (is Node.js installed?)")?;

    if !status.success() {
        anyhow::bail!("Failed to compile agent script");
    }

    println!("✓ agent built successfully");
    println!("  Source: {source}");
    println!("  Output: {output}");

    Ok(())
}
