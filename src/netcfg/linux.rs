//! iproute2 command plan.

use std::time::Duration;

use super::{quote, Interface, Step};

/// Transmit queue length requested when the link comes up.
pub const TX_QUEUE_LEN: u32 = 100;

/// Pause between addressing and routing; `ip route add` can fail while the
/// new link is not yet visible to the routing subsystem.
pub const ROUTE_SETTLE: Duration = Duration::from_millis(100);

pub fn setup(iface: &Interface<'_>) -> Vec<Step> {
    vec![
        Step::Run(format!(
            "ip link set dev {} up mtu {} qlen {}",
            iface.name, iface.mtu, TX_QUEUE_LEN
        )),
        // The explicit route below owns the network; without `noprefixroute`
        // the kernel installs its own and `ip route add` fails with EEXIST.
        Step::Run(format!(
            "ip addr add dev {} local {} peer {} noprefixroute",
            iface.name, iface.gateway, iface.gateway
        )),
        Step::Settle(ROUTE_SETTLE),
        Step::Run(format!(
            "ip route add {} via {} dev {}",
            iface.network(),
            iface.address(),
            iface.name
        )),
    ]
}

pub fn route(name: &str, cidr: &str) -> String {
    format!("ip route add {} dev {name}", quote(cidr))
}
