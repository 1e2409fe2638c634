//! ifconfig/route command plan.

use super::{quote, Interface, Step};

pub fn setup(iface: &Interface<'_>) -> Vec<Step> {
    vec![
        Step::Run(format!(
            "ifconfig {} {} {} mtu {} netmask {} up",
            iface.name,
            iface.address(),
            iface.address(),
            iface.mtu,
            iface.netmask()
        )),
        Step::Run(route(iface.name, &iface.network().to_string())),
    ]
}

pub fn route(name: &str, cidr: &str) -> String {
    format!("route add -net {} -interface {name}", quote(cidr))
}
