use clap::Parser;

use reservation_kernel::admin::{self, AdminCommand};
use reservation_kernel::calendar::{AuthorityCalendarPolicy, BrokerSimpleUnitsPolicy, FixedNodeSelector};
use reservation_kernel::config::KernelConfig;
use reservation_kernel::id::ActorId;
use reservation_kernel::kernel::{self, ActorRole, Dispatcher};
use reservation_kernel::logger;
use reservation_kernel::plugins::{InMemoryDatabase, NullSubstrate, StubGraphPlugin};
use reservation_kernel::policy::Inventory;

/// Process configuration plus an optional one-shot administrative
/// command (spec §6). With no subcommand the actor spawns its
/// dispatcher thread and ticks on `cycle_millis` until killed.
#[derive(Parser)]
#[command(name = "reservation-kernel", about = "Federated reservation/delegation kernel actor")]
struct Cli {
    #[command(flatten)]
    config: KernelConfig,

    /// Which of the three actor roles this process plays.
    #[arg(long, default_value = "orchestrator")]
    role: String,

    #[command(subcommand)]
    command: Option<AdminCommand>,
}

fn parse_role(raw: &str) -> ActorRole {
    match raw {
        "broker" => ActorRole::Broker,
        "authority" => ActorRole::Authority,
        _ => ActorRole::Orchestrator,
    }
}

fn main() {
    let cli = Cli::parse();
    logger::init(&cli.config);

    let role = parse_role(&cli.role);
    let identity = ActorId::new();
    log::info!("starting actor {} as {:?}", identity, role);

    let mut dispatcher =
        Dispatcher::new(identity, role, cli.config.clone()).with_database(Box::new(InMemoryDatabase::new())).with_graph(Box::new(StubGraphPlugin::new()));

    dispatcher = match role {
        ActorRole::Broker => dispatcher.with_broker_policy(Box::new(BrokerSimpleUnitsPolicy::new(Inventory::new(), FixedNodeSelector::new("node-1")))),
        ActorRole::Authority => dispatcher.with_authority_policy(Box::new(AuthorityCalendarPolicy::new())).with_substrate(Box::new(NullSubstrate)),
        ActorRole::Orchestrator => dispatcher,
    };

    let (proxy, handle) = kernel::spawn(dispatcher);

    if let Some(command) = cli.command {
        let code = admin::run(&proxy, command);
        proxy.shutdown();
        let _ = handle.join();
        std::process::exit(code);
    }

    let tick_millis = cli.config.cycle_millis.max(1);
    let tick_proxy = proxy.clone();
    let ticker = std::thread::spawn(move || loop {
        std::thread::sleep(std::time::Duration::from_millis(tick_millis));
        tick_proxy.tick();
    });

    log::info!("actor running; ticking every {}ms", tick_millis);
    let _ = ticker.join();
    let _ = handle.join();
}
