//! Container networking strategies.
//!
//! Each configured network names a strategy; the initializer resolves the
//! name at the boundary and afterwards works with the tagged variant only.
//! Host-side `create` runs in the parent against the child's PID; the
//! child-side counterparts run inside the namespace before the mount
//! namespace is initialized, while host binaries are still reachable.

use std::process::Command;

use vessel_common::config::{ContainerConfig, Network};
use vessel_common::error::{Result, VesselError};
use vessel_common::state::NetworkState;

/// A network strategy: materializes host-side endpoints for one network.
pub trait Strategy {
    /// Strategy name as used in `Network::type_`.
    fn name(&self) -> &'static str;

    /// Creates host-side resources for `network` and records child-visible
    /// facts in `state`.
    ///
    /// # Errors
    ///
    /// Returns [`VesselError::NetworkFailed`] when the resources cannot be
    /// materialized; partial setup is the strategy's to unwind.
    fn create(&self, network: &Network, pid: i32, state: &mut NetworkState) -> Result<()>;
}

/// Resolves a strategy by its type string.
///
/// # Errors
///
/// Returns [`VesselError::NetworkFailed`] for unknown types.
pub fn strategy_for(type_: &str) -> Result<&'static dyn Strategy> {
    match type_ {
        "loopback" => Ok(&Loopback),
        "veth" => Ok(&Veth),
        other => Err(VesselError::NetworkFailed {
            kind: other.to_string(),
            message: "unknown network type".into(),
        }),
    }
}

/// Runs every configured network's strategy against the child `pid`.
///
/// Strategies may record facts in `state`; the caller ships the result to
/// the child through the sync pipe. Errors short-circuit the sequence.
///
/// # Errors
///
/// Returns the first strategy error, or an unknown-type error.
pub fn initialize(networks: &[Network], pid: i32, state: &mut NetworkState) -> Result<()> {
    for network in networks {
        let strategy = strategy_for(&network.type_)?;
        strategy.create(network, pid, state)?;
        tracing::debug!(strategy = strategy.name(), pid, "network created");
    }
    Ok(())
}

/// Child-side interface setup, run inside the new namespace.
///
/// # Errors
///
/// Returns an error if an interface cannot be configured or brought up.
pub fn setup_network(config: &ContainerConfig, state: &NetworkState) -> Result<()> {
    for network in &config.networks {
        match network.type_.as_str() {
            "loopback" => interface_up("lo", &network.type_)?,
            "veth" if !state.veth_child.is_empty() => {
                if !network.address.is_empty() {
                    run_ip(
                        &network.type_,
                        &["addr", "add", &network.address, "dev", &state.veth_child],
                    )?;
                }
                interface_up(&state.veth_child, &network.type_)?;
            }
            _ => {}
        }
    }
    Ok(())
}

/// Child-side route setup, run after [`setup_network`].
///
/// # Errors
///
/// Returns an error if a route cannot be installed.
pub fn setup_route(config: &ContainerConfig) -> Result<()> {
    for network in &config.networks {
        if !network.gateway.is_empty() {
            run_ip(
                &network.type_,
                &["route", "add", "default", "via", &network.gateway],
            )?;
        }
    }
    Ok(())
}

/// Strategy for containers that only need a working loopback.
///
/// Nothing happens host-side; the child brings `lo` up during its setup.
pub struct Loopback;

impl Strategy for Loopback {
    fn name(&self) -> &'static str {
        "loopback"
    }

    fn create(&self, _network: &Network, _pid: i32, _state: &mut NetworkState) -> Result<()> {
        Ok(())
    }
}

/// Strategy wiring a veth pair between the host (optionally a bridge) and
/// the container's network namespace.
///
/// Link plumbing is delegated to `ip(8)`; the recorded state tells the
/// child which interface ended up on its side.
pub struct Veth;

/// Interface names for a veth pair, derived from the child PID.
#[must_use]
pub fn veth_names(prefix: &str, pid: i32) -> (String, String) {
    let prefix = if prefix.is_empty() { "veth" } else { prefix };
    (format!("{prefix}h{pid}"), format!("{prefix}c{pid}"))
}

impl Strategy for Veth {
    fn name(&self) -> &'static str {
        "veth"
    }

    fn create(&self, network: &Network, pid: i32, state: &mut NetworkState) -> Result<()> {
        let (host, child) = veth_names(&network.veth_prefix, pid);

        run_ip(
            self.name(),
            &["link", "add", &host, "type", "veth", "peer", "name", &child],
        )?;
        if network.mtu > 0 {
            let mtu = network.mtu.to_string();
            run_ip(self.name(), &["link", "set", "dev", &host, "mtu", &mtu])?;
            run_ip(self.name(), &["link", "set", "dev", &child, "mtu", &mtu])?;
        }
        if !network.bridge.is_empty() {
            run_ip(self.name(), &["link", "set", &host, "master", &network.bridge])?;
        }
        run_ip(self.name(), &["link", "set", &host, "up"])?;
        run_ip(self.name(), &["link", "set", &child, "netns", &pid.to_string()])?;

        state.veth_host = host;
        state.veth_child = child;
        state.ns_path = format!("/proc/{pid}/ns/net");
        Ok(())
    }
}

fn run_ip(kind: &str, args: &[&str]) -> Result<()> {
    let status = Command::new("ip")
        .args(args)
        .status()
        .map_err(|err| VesselError::NetworkFailed {
            kind: kind.to_string(),
            message: format!("spawning ip {}: {err}", args.join(" ")),
        })?;
    if !status.success() {
        return Err(VesselError::NetworkFailed {
            kind: kind.to_string(),
            message: format!("ip {} exited with {status}", args.join(" ")),
        });
    }
    Ok(())
}

/// Brings a network interface up with `SIOCSIFFLAGS`, no `ip` binary needed.
fn interface_up(name: &str, kind: &str) -> Result<()> {
    let failed = |message: String| VesselError::NetworkFailed {
        kind: kind.to_string(),
        message,
    };
    if name.len() >= libc::IFNAMSIZ {
        return Err(failed(format!("interface name too long: {name}")));
    }

    // SAFETY: plain AF_INET datagram socket used only as an ioctl handle.
    let sock = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
    if sock < 0 {
        return Err(failed("socket() for interface ioctl failed".into()));
    }

    // SAFETY: ifreq is a plain-old-data struct; the name copy is bounded by
    // the IFNAMSIZ check above and the ioctls only read/write this struct.
    let result = unsafe {
        let mut ifr: libc::ifreq = std::mem::zeroed();
        std::ptr::copy_nonoverlapping(
            name.as_ptr(),
            ifr.ifr_name.as_mut_ptr().cast::<u8>(),
            name.len(),
        );
        if libc::ioctl(sock, libc::SIOCGIFFLAGS, &mut ifr) < 0 {
            Err(failed(format!("SIOCGIFFLAGS failed for {name}")))
        } else {
            ifr.ifr_ifru.ifru_flags |= (libc::IFF_UP | libc::IFF_RUNNING) as libc::c_short;
            if libc::ioctl(sock, libc::SIOCSIFFLAGS, &ifr) < 0 {
                Err(failed(format!("SIOCSIFFLAGS failed for {name}")))
            } else {
                Ok(())
            }
        }
    };
    // SAFETY: sock was created above and is not used past this point.
    unsafe { libc::close(sock) };
    result
}
