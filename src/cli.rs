use std::ffi::OsString;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "ech-workers-client",
    version,
    about = "Run the ech-workers proxy, manage its profiles, the system proxy and login autostart"
)]
pub(crate) struct Cli {
    /// Config file (default: per-user config dir; ECHW_CONFIG overrides)
    #[arg(long, global = true)]
    pub(crate) config: Option<PathBuf>,

    /// Colorize messages: auto|always|never
    #[arg(long = "color", value_enum, global = true)]
    pub(crate) color: Option<ech_workers_client::ColorMode>,

    /// Print detailed diagnostics (ECHW_LOG overrides the filter)
    #[arg(long, global = true)]
    pub(crate) verbose: bool,

    /// Launched by the login autorun entry: run the active profile headless
    #[arg(long)]
    pub(crate) autostart: bool,

    /// With --autostart, also enable the system proxy once the worker is up
    #[arg(long = "system-proxy", requires = "autostart")]
    pub(crate) system_proxy: bool,

    #[command(subcommand)]
    pub(crate) command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum Command {
    /// Start the worker for the active profile and relay its output until interrupted
    Run {
        /// Route OS traffic through the worker once it is running
        #[arg(long = "system-proxy")]
        system_proxy: bool,
        /// Select this profile id before starting
        #[arg(long)]
        profile: Option<String>,
    },
    /// Manage connection profiles
    Profile {
        #[command(subcommand)]
        cmd: ProfileCmd,
    },
    /// Inspect or reset the OS system proxy
    Proxy {
        #[command(subcommand)]
        cmd: ProxyCmd,
    },
    /// Manage the login autorun entry
    Autostart {
        #[command(subcommand)]
        cmd: AutostartCmd,
    },
    /// Show resolved paths, worker executable, launch arguments and OS integration state
    Doctor,
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum ProfileCmd {
    /// List profiles; the active one is marked with '*'
    List,
    /// Show one profile (default: the active one)
    Show { id: Option<String> },
    /// Add a profile copying the active profile's fields, and select it
    Add {
        #[arg(default_value = ech_workers_client::profile::NEW_PROFILE_NAME)]
        name: String,
    },
    /// Edit connection fields of the active profile
    Save {
        #[arg(long)]
        server: Option<String>,
        #[arg(long)]
        listen: Option<String>,
        #[arg(long)]
        token: Option<String>,
        #[arg(long)]
        ip: Option<String>,
        #[arg(long)]
        dns: Option<String>,
        #[arg(long)]
        ech: Option<String>,
    },
    /// Rename a profile (default: the active one)
    Rename {
        name: String,
        #[arg(long)]
        id: Option<String>,
    },
    /// Delete a profile (default: the active one)
    Delete {
        id: Option<String>,
        /// Proceed without interactive confirmation
        #[arg(long)]
        yes: bool,
    },
    /// Make a profile active
    Select { id: String },
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum ProxyCmd {
    /// Print the current OS proxy settings
    Status,
    /// Disable the OS proxy (recovery after a crash)
    Off,
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum AutostartCmd {
    Status,
    On,
    Off,
}

/// Accept the single-dash `-autostart` written by older autorun entries.
pub(crate) fn normalize_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    args.into_iter()
        .map(|a| {
            if a == ech_workers_client::autostart::LEGACY_AUTOSTART_FLAG {
                OsString::from(ech_workers_client::autostart::AUTOSTART_FLAG)
            } else {
                a
            }
        })
        .collect()
}
