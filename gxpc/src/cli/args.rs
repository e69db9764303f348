//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "gxpc",
    version,
    about = "Sniff XPC traffic of a process through an injected agent",
    after_help = "\
EXAMPLES:
    gxpc -U -n launchd                         Attach to launchd on the USB device
    gxpc -U -p 123 -w 'com.apple.*'            Only print matching connections
    gxpc -U -f /usr/bin/app -- --verbose       Spawn suspended with arguments
    gxpc -U -g MobileSafari                    Wait for the process to launch
    gxpc --init                                Write a sample offsets config"
)]
pub struct Args {
    /// Connect to the device with this identifier
    #[arg(short, long, group = "device")]
    pub id: Option<String>,

    /// Connect to a remote frida-server at HOST[:PORT]
    #[arg(short, long, value_name = "HOST", group = "device")]
    pub remote: Option<String>,

    /// Use the first USB device
    #[arg(short = 'U', long, group = "device")]
    pub usb: bool,

    /// Attach to this process ID
    #[arg(short, long)]
    pub pid: Option<u32>,

    /// Attach to the first process with this exact name
    #[arg(short, long)]
    pub name: Option<String>,

    /// Spawn this executable suspended
    #[arg(short, long, value_name = "PATH")]
    pub file: Option<String>,

    /// Wait for a process with this name to launch, then attach to it
    #[arg(short, long, value_name = "NAME")]
    pub gate: Option<String>,

    /// Also append everything printed to FILE
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Offsets config (default: $HOME/gxpc.conf)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Write a sample offsets config and exit
    #[arg(long)]
    pub init: bool,

    /// List available devices and exit
    #[arg(short, long)]
    pub list: bool,

    /// Only print connections whose name matches one of these globs
    #[arg(short, long, value_name = "GLOB", value_delimiter = ',')]
    pub whitelist: Vec<String>,

    /// Never print connections whose name matches one of these globs
    #[arg(short, long, value_name = "GLOB", value_delimiter = ',')]
    pub blacklist: Vec<String>,

    /// Only print messages from PIDs matching these globs
    #[arg(long, value_name = "GLOB", value_delimiter = ',')]
    pub whitelistp: Vec<String>,

    /// Never print messages from PIDs matching these globs
    #[arg(long, value_name = "GLOB", value_delimiter = ',')]
    pub blacklistp: Vec<String>,

    /// External decoder invoked for `jlutil` messages
    #[arg(long, value_name = "PROGRAM", default_value = crate::dispatch::tool::DEFAULT_TOOL)]
    pub tool: String,

    /// Compiled agent script (default: the one built by `cargo xtask build-agent`)
    #[arg(long, value_name = "FILE")]
    pub agent: Option<PathBuf>,

    /// Arguments for the spawned executable
    #[arg(value_name = "SPAWN_ARGS", trailing_var_arg = true, allow_hyphen_values = true, requires = "file")]
    pub spawn_args: Vec<String>,
}
