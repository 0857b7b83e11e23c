use clap::Parser;

/// Process-wide configuration, per the Configuration row of the external
/// interfaces (spec §6). All fields have defaults so an actor can start
/// from `KernelConfig::default()` and override individual knobs via CLI
/// flags (matching the teacher's use of `clap` for process configuration).
#[derive(Debug, Clone, Parser)]
#[command(name = "reservation-kernel", about = "Federated reservation/delegation kernel actor")]
pub struct KernelConfig {
    /// Port the actor's RPC transport binds to (transport itself is out of
    /// scope; kept here only because spec §6 names it as a recognized
    /// option).
    #[arg(long, default_value_t = 11000)]
    pub port: u16,

    /// Directory substrate/handler plugins are loaded from.
    #[arg(long, default_value = "plugins")]
    pub plugin_dir: String,

    /// Directory log files are written to.
    #[arg(long, default_value = "logs")]
    pub log_directory: String,

    /// Log level; falls back to `RUST_LOG`, then `info`.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Number of rotated log files to retain.
    #[arg(long, default_value_t = 5)]
    pub log_retain: u32,

    /// Maximum size in bytes of a single log file before rotation.
    #[arg(long, default_value_t = 10 * 1024 * 1024)]
    pub log_file_size: u64,

    /// Clock cycle length in milliseconds.
    #[arg(long, default_value_t = 60_000)]
    pub cycle_millis: u64,

    /// How many cycles ahead of `last_allocation` the broker/authority
    /// allocation loop plans for (the allocation horizon).
    #[arg(long, default_value_t = 4)]
    pub allocation_horizon: u64,

    /// Cycles between successive allocation passes.
    #[arg(long, default_value_t = 1)]
    pub call_interval: u64,

    /// Cycles of lead time a new ticket's start must clear the current
    /// cycle by (Testable Property 7's `advance_time`).
    #[arg(long, default_value_t = 2)]
    pub advance_time: u64,

    /// Cycles a queued bid may remain unsatisfied before it fails with
    /// `InsufficientResources`.
    #[arg(long, default_value_t = 8)]
    pub queue_threshold: u64,

    /// Maximum cycle drift tolerated between a peer's declared cycle and
    /// the local one before a reservation is considered suspect.
    #[arg(long, default_value_t = 1)]
    pub clock_skew: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        // clap::Parser::parse_from keeps the #[arg(default_value...)] values
        // without requiring a real argv, matching how the teacher's tests
        // construct configs without going through `main`.
        KernelConfig::parse_from(["reservation-kernel"])
    }
}
