use std::net::SocketAddr;
use std::process;
use std::sync::Arc;

use clap::{App, Arg};
use env_logger::Builder;
use log::{error, info, warn, LevelFilter};

use flowd::agent::Agent;
use flowd::config::{AgentConfig, DEFAULT_CONTROLLER, DEFAULT_CONTROL_INTERFACE};
use flowd::events::RouteSource;
use flowd::fpm;
use flowd::interfaces::{self, InterfaceMap};
use flowd::ipc::{IpcClient, MessageSender};
use flowd::netlink;
use flowd::table::FlowTable;

fn main() {
    let matches = App::new("flowd")
        .version("0.1")
        .about("Watches kernel routing and neighbor state and pushes flow modifications to the controller")
        .arg(
            Arg::with_name("address")
                .short("a")
                .long("address")
                .takes_value(true)
                .help("Controller IPC endpoint"),
        )
        .arg(
            Arg::with_name("interface")
                .short("i")
                .long("interface")
                .takes_value(true)
                .help("Interface whose MAC seeds the agent id"),
        )
        .arg(
            Arg::with_name("id")
                .short("n")
                .long("id")
                .takes_value(true)
                .help("Agent id as a hex literal (overrides -i)"),
        )
        .arg(
            Arg::with_name("fpm")
                .short("f")
                .long("fpm")
                .help("Read routes from the streaming daemon feed instead of netlink"),
        )
        .arg(
            Arg::with_name("v")
                .short("v")
                .multiple(true)
                .help("Sets the level of logging verbosity"),
        )
        .get_matches();

    let (flowd_level, other_level) = match matches.occurrences_of("v") {
        0 => (LevelFilter::Info, LevelFilter::Warn),
        1 => (LevelFilter::Debug, LevelFilter::Warn),
        2 => (LevelFilter::Trace, LevelFilter::Warn),
        _ => (LevelFilter::Trace, LevelFilter::Trace),
    };
    Builder::new()
        .filter(Some("flowd"), flowd_level)
        .filter(None, other_level)
        .init();

    let controller: SocketAddr = matches
        .value_of("address")
        .unwrap_or(DEFAULT_CONTROLLER)
        .parse()
        .expect("Must specify a valid controller address");
    let control_interface = matches
        .value_of("interface")
        .unwrap_or(DEFAULT_CONTROL_INTERFACE)
        .to_string();
    let source = if matches.is_present("fpm") {
        RouteSource::Fpm
    } else {
        RouteSource::Netlink
    };

    let interfaces = match interfaces::load_interfaces(&control_interface) {
        Ok(interfaces) => interfaces,
        Err(err) => {
            error!("{}", err);
            process::exit(1);
        }
    };
    info!("loaded {} interfaces", interfaces.len());

    let id = match matches.value_of("id") {
        Some(hex) => match u64::from_str_radix(hex.trim_start_matches("0x"), 16) {
            Ok(id) => id,
            Err(_) => {
                error!("invalid hex id: {}", hex);
                process::exit(1);
            }
        },
        None => match interfaces::hwaddr_of(&control_interface) {
            Some(mac) => mac.as_u64(),
            None => {
                warn!("cannot read MAC of {}, agent id defaults to 0", control_interface);
                0
            }
        },
    };

    let config = AgentConfig {
        id,
        controller,
        source,
        control_interface,
        fpm_listen: SocketAddr::from(([0, 0, 0, 0], fpm::FPM_PORT)),
    };
    info!("starting agent (id={:#x})", config.id);

    if let Err(err) = run(config, interfaces) {
        error!("{}", err);
        process::exit(1);
    }
}

fn run(config: AgentConfig, interfaces: InterfaceMap) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let (sender, inbound) =
            IpcClient::connect(config.controller, format!("{:x}", config.id)).await?;
        let ipc: Arc<dyn MessageSender> = Arc::new(sender);

        let agent = Agent::new(config.id, interfaces.clone(), Arc::clone(&ipc));
        agent.register_ports()?;

        let (table, resolver) = FlowTable::new(config.id, interfaces, ipc);
        tokio::spawn(resolver.run());

        {
            let table = Arc::clone(&table);
            tokio::spawn(async move {
                if let Err(err) = netlink::neighbor_listener(table).await {
                    error!("neighbor listener failed: {}", err);
                }
            });
        }

        match config.source {
            RouteSource::Netlink => {
                let table = Arc::clone(&table);
                tokio::spawn(async move {
                    if let Err(err) = netlink::route_listener(table).await {
                        error!("route listener failed: {}", err);
                    }
                });
            }
            RouteSource::Fpm => {
                let table = Arc::clone(&table);
                let listen = config.fpm_listen;
                tokio::spawn(async move {
                    if let Err(err) = fpm::serve(listen, table).await {
                        error!("route feed server failed: {}", err);
                    }
                });
            }
        }

        // The IPC listener is the foreground task; the process winds down
        // when the controller connection goes away.
        agent.listen(inbound).await;
        Ok(())
    })
}
