use clap::Parser;
use etherparse::{NetSlice, SlicedPacket, TransportSlice};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use tunnel::{Config, PlatformTunnel, ReadMode};

/// Open a TUN tunnel and log every packet routed into it
#[derive(Parser)]
#[command(name = "tunnel")]
#[command(version)]
struct Cli {
    /// Device index substituted into the name template
    #[arg(short, long, default_value_t = 0)]
    index: u32,

    /// Gateway address with prefix, e.g. 10.8.0.1/24
    #[arg(short, long, default_value = "10.8.0.1/24")]
    address: String,

    /// Interface MTU (0 = 1500)
    #[arg(short, long, default_value_t = 0)]
    mtu: u16,

    /// Interface name template, %d is replaced by the index
    #[arg(short, long, default_value = tunnel::config::DEFAULT_NAME_TEMPLATE)]
    name: String,

    /// Read through the background read loop
    #[arg(long)]
    cancellable: bool,

    /// Echo configuration commands and their output
    #[arg(short, long)]
    debug: bool,

    /// Extra routes to install through the tunnel
    #[arg(long = "route")]
    routes: Vec<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> tunnel::Result<()> {
    let mode = if cli.cancellable {
        ReadMode::Cancellable
    } else {
        ReadMode::Direct
    };
    let config = Config::from_cidr(cli.index, &cli.address)?
        .with_mtu(cli.mtu)
        .with_name_template(cli.name)
        .with_read_mode(mode)
        .with_debug(cli.debug);

    let tun = Arc::new(PlatformTunnel::new(config)?);
    for route in &cli.routes {
        tun.route(route)?;
    }

    let closer = tun.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        tracing::info!("interrupted, closing tunnel");
        let _ = closer.close();
    }) {
        tracing::warn!("failed to install Ctrl-C handler: {err}");
    }

    println!("Listening on {} ({}) …", tun.name(), tun.network());

    let mut buf = vec![0u8; usize::from(tun.mtu())];
    loop {
        let n = tun.read(&mut buf)?;
        if n == 0 {
            break;
        }
        println!("{}", describe(&buf[..n]));
    }

    tun.close()
}

/// One-line summary of an IP packet.
fn describe(packet: &[u8]) -> String {
    let sliced = match SlicedPacket::from_ip(packet) {
        Ok(sliced) => sliced,
        Err(err) => return format!("{} bytes (unparsed: {err})", packet.len()),
    };

    let (src, dst) = match &sliced.net {
        Some(NetSlice::Ipv4(ip)) => (
            ip.header().source_addr().to_string(),
            ip.header().destination_addr().to_string(),
        ),
        Some(NetSlice::Ipv6(ip)) => (
            ip.header().source_addr().to_string(),
            ip.header().destination_addr().to_string(),
        ),
        _ => ("?".into(), "?".into()),
    };

    let proto = match &sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => {
            format!("TCP {}→{}", tcp.source_port(), tcp.destination_port())
        }
        Some(TransportSlice::Udp(udp)) => {
            format!("UDP {}→{}", udp.source_port(), udp.destination_port())
        }
        Some(TransportSlice::Icmpv4(_)) => "ICMP".to_string(),
        Some(TransportSlice::Icmpv6(_)) => "ICMPv6".to_string(),
        _ => "other".to_string(),
    };

    format!("📥 {src} → {dst} {proto} ({} bytes)", packet.len())
}
